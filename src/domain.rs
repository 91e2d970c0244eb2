//! Domain module - catalog shapes, records, jobs and the capabilities the
//! pipeline depends on.
//!
//! Each module is its own file in the domain/ directory; commonly used items
//! are re-exported here.

pub mod catalog;
pub mod job;
pub mod offer;
pub mod services;

pub use catalog::{CatalogVariant, Role, SchemaDescriptor, UnknownCatalog};
pub use job::{Job, JobInput, JobMeta, JobReport};
pub use offer::{DecodedRecord, EnrichedRecord, Enrichment, Offer, Param, PriceListItem, YmlOffer};
pub use services::{EnrichError, Enricher, Sink, SinkError};
