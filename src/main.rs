use anyhow::Result;
use clap::Parser;

use catalog_enricher::app;
use catalog_enricher::cli::Cli;
use catalog_enricher::infrastructure::{AppConfig, init_logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    init_logging(&config.logging)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        parsers = config.pipeline.parsers,
        scrappers = config.pipeline.scrappers,
        url_limit = config.pipeline.url_limit,
        "Starting catalog enricher"
    );

    app::run(config).await
}
