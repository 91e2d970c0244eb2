//! Catalog Enricher - concurrent retailer catalog ingestion service
//!
//! Accepts XML product catalogs over HTTP, streams them through a
//! tokenizer, enriches every product from its retailer page and delivers
//! the re-assembled document to a file or a callback endpoint.

pub mod api;
pub mod app;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod pipeline;
