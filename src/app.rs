//! Service wiring: proxy pool, enricher, sink, overseer and HTTP server

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::api::build_router;
use crate::domain::Sink;
use crate::infrastructure::{
    AppConfig, CallbackSink, FetcherConfig, FileSink, PageEnricher, PageFetcher, ProxyPool,
};
use crate::pipeline::Overseer;

/// Runs the service until Ctrl-C, then drains the running jobs
pub async fn run(config: AppConfig) -> Result<()> {
    let proxies = ProxyPool::from_file(&config.fetch.proxy_file).await?;
    let fetcher = PageFetcher::new(
        proxies,
        FetcherConfig {
            timeout: config.fetch_timeout(),
            requests_per_second: config.fetch.requests_per_second,
        },
    );
    let enricher = PageEnricher::new(Arc::new(fetcher)).context("Failed to compile enrichment rules")?;

    let sink: Arc<dyn Sink> = if config.output.to_file {
        info!(dir = %config.output.dir.display(), "Results are written to files");
        Arc::new(FileSink::new(config.output.dir.clone()))
    } else {
        Arc::new(CallbackSink::default())
    };

    let overseer = Arc::new(Overseer::start(
        config.pipeline.parsers,
        config.pipeline_settings(),
        Arc::new(enricher),
        sink,
    ));

    let listener = TcpListener::bind(&config.server.host)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.host))?;
    info!(host = %config.server.host, "Listening");

    let served = axum::serve(listener, build_router(overseer.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = &served {
        warn!(error = %e, "HTTP server stopped with an error");
    }

    overseer.shutdown().await;
    info!("Service stopped");
    served.context("HTTP server failed")
}

async fn shutdown_signal() {
    wait_for_shutdown(tokio::signal::ctrl_c()).await;
}

/// Resolves once `signal` fires; never resolves if listening fails
async fn wait_for_shutdown(signal: impl Future<Output = std::io::Result<()>>) {
    if let Err(e) = signal.await {
        warn!(error = %e, "Failed to listen for Ctrl-C; serving until the process is killed");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
