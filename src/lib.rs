//! # hardware-pipeline
//!
//! Ingestion core for scraped hardware listings.
//!
//! Raw field maps from the extraction layer flow through a fixed chain of
//! stages: normalize, score, deduplicate, persist. A separate export generator
//! writes snapshots of the store to JSON, JSON Lines and CSV.
//!
//! ## Example
//!
//! ```rust,ignore
//! use hardware_pipeline::{Config, IngestPipeline, Pipeline, RawItem};
//!
//! let config = Config::load("pipeline.toml".as_ref())?;
//! hardware_pipeline::logging::init_logging(&config.logging);
//!
//! let pipeline = IngestPipeline::open(&config).await?;
//! let report = pipeline.process_batch(raw_items).await;
//! for raw in report.deferred_items() {
//!     requeue(raw);
//! }
//! pipeline.exporter(config.export.clone()).export_now().await?;
//! pipeline.close().await?;
//! ```

pub mod config;
pub mod dedup;
pub mod error;
pub mod export;
pub mod item;
pub mod logging;
pub mod normalizer;
pub mod pipeline;
pub mod scoring;
pub mod store;
mod util;

pub use config::Config;
pub use dedup::{CompositeKey, Decision, Deduplicator, KeyStrategy};
pub use error::PipelineError;
pub use export::{ExportGenerator, ExportScheduler, ExportSummary};
pub use item::{Availability, Category, Entity, Item, Price, PricePoint, RawItem};
pub use normalizer::Normalizer;
pub use pipeline::{BatchReport, Health, IngestPipeline, ItemOutcome, Pipeline};
pub use scoring::QualityScorer;
pub use store::{StoreReader, StoreWriter, WriteOutcome, WriteReceipt};
