//! The `Pipeline` trait and the hardware ingestion pipeline built on it.
//!
//! A pipeline receives raw field maps from the extraction layer and reports an
//! [`ItemOutcome`] for each one. [`IngestPipeline`] chains the stages
//! Normalizer, Quality Scorer, Deduplicator and Store Writer, and reconciles
//! the recoverable store errors itself:
//! - `DuplicateKey` on insert means another worker created the entity first;
//!   the item is applied as an update instead (`Merged`).
//! - `NotFound` on update is a consistency anomaly; it is logged and the item
//!   is retried once as an insert.
//!
//! Nothing here aborts a batch. Per-item problems show up as `Rejected` or
//! `Skipped`; store trouble shows up as `Deferred` or `Failed` and turns the
//! [`BatchReport`] health to `Degraded`.

use crate::config::{Config, ExportConfig};
use crate::dedup::{Decision, Deduplicator};
use crate::error::PipelineError;
use crate::export::{ExportGenerator, ExportScheduler};
use crate::item::{Item, RawItem};
use crate::normalizer::Normalizer;
use crate::scoring::QualityScorer;
use crate::store::{StoreReader, StoreWriter, WriteReceipt};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The `Pipeline` trait defines the contract for item processing pipelines.
#[async_trait]
pub trait Pipeline: Send + Sync + 'static {
    /// Returns the name of the pipeline.
    fn name(&self) -> &str;

    /// Processes a single raw item. Failures are reported in the outcome, so
    /// one bad item never affects its neighbours.
    async fn process_item(&self, item: RawItem) -> ItemOutcome;

    /// Called when ingestion is finished.
    async fn close(&self) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// What happened to one raw item.
#[derive(Debug)]
pub enum ItemOutcome {
    /// A new entity was created.
    Inserted { receipt: WriteReceipt, low_quality: bool },
    /// An existing entity was updated.
    Updated { receipt: WriteReceipt, low_quality: bool },
    /// The insert lost a race with another worker and was applied as an update.
    Merged { receipt: WriteReceipt, low_quality: bool },
    /// The item failed the input boundary precondition.
    Rejected { reason: PipelineError },
    /// The item could not be normalized.
    Skipped { source_url: String, reason: PipelineError },
    /// The store was busy for longer than the write timeout; `raw` can be
    /// requeued as-is.
    Deferred { raw: RawItem, reason: PipelineError },
    /// The store failed, or an anomaly could not be reconciled.
    Failed { source_url: String, reason: PipelineError },
}

impl ItemOutcome {
    /// The write receipt, for outcomes that reached the store.
    pub fn receipt(&self) -> Option<&WriteReceipt> {
        match self {
            ItemOutcome::Inserted { receipt, .. }
            | ItemOutcome::Updated { receipt, .. }
            | ItemOutcome::Merged { receipt, .. } => Some(receipt),
            _ => None,
        }
    }

    pub fn is_written(&self) -> bool {
        self.receipt().is_some()
    }

    fn is_low_quality(&self) -> bool {
        matches!(
            self,
            ItemOutcome::Inserted { low_quality: true, .. }
                | ItemOutcome::Updated { low_quality: true, .. }
                | ItemOutcome::Merged { low_quality: true, .. }
        )
    }
}

/// Overall store health observed during a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    /// At least one item was deferred or failed on the store.
    Degraded,
}

/// Outcomes of one batch, in completion order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<ItemOutcome>,
}

impl BatchReport {
    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn inserted(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Inserted { .. }))
    }

    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Updated { .. }))
    }

    pub fn merged(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Merged { .. }))
    }

    pub fn rejected(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Rejected { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Skipped { .. }))
    }

    pub fn deferred(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Deferred { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed { .. }))
    }

    /// Written items that scored below the quality threshold.
    pub fn low_quality(&self) -> usize {
        self.count(ItemOutcome::is_low_quality)
    }

    pub fn health(&self) -> Health {
        if self.deferred() > 0 || self.failed() > 0 {
            Health::Degraded
        } else {
            Health::Healthy
        }
    }

    /// Raw items that should be requeued.
    pub fn deferred_items(&self) -> Vec<RawItem> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                ItemOutcome::Deferred { raw, .. } => Some(raw.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Normalize, score, deduplicate and persist hardware listings.
pub struct IngestPipeline {
    normalizer: Normalizer,
    scorer: QualityScorer,
    dedup: Deduplicator,
    writer: StoreWriter,
    workers: usize,
}

impl IngestPipeline {
    /// Opens the store described by `config` and wires the stages around it.
    /// Must be called from within a Tokio runtime.
    pub async fn open(config: &Config) -> Result<Self, PipelineError> {
        config.validate()?;
        let writer = StoreWriter::open(&config.store).await?;
        Ok(Self::new(
            Normalizer::new(),
            QualityScorer::new(config.quality.min_score),
            writer,
            config.workers,
        ))
    }

    pub fn new(
        normalizer: Normalizer,
        scorer: QualityScorer,
        writer: StoreWriter,
        workers: usize,
    ) -> Self {
        let dedup = Deduplicator::new(writer.reader());
        Self::with_deduplicator(normalizer, scorer, dedup, writer, workers)
    }

    /// Like [`IngestPipeline::new`], with a custom deduplicator (for example
    /// one using a different key strategy).
    pub fn with_deduplicator(
        normalizer: Normalizer,
        scorer: QualityScorer,
        dedup: Deduplicator,
        writer: StoreWriter,
        workers: usize,
    ) -> Self {
        info!(
            "Initializing IngestPipeline (min score {}, {} workers)",
            scorer.min_score(),
            workers
        );
        IngestPipeline {
            normalizer,
            scorer,
            dedup,
            writer,
            workers: workers.max(1),
        }
    }

    pub fn reader(&self) -> StoreReader {
        self.writer.reader()
    }

    pub fn writer(&self) -> &StoreWriter {
        &self.writer
    }

    /// Export generator reading from this pipeline's store.
    pub fn exporter(&self, config: ExportConfig) -> ExportGenerator {
        ExportGenerator::new(self.reader(), config)
    }

    /// Starts the periodic exporter configured by `config.interval_secs`.
    /// Returns `None` when the interval is 0.
    pub fn start_scheduled_exports(
        &self,
        config: ExportConfig,
    ) -> Result<Option<ExportScheduler>, PipelineError> {
        let Some(interval) = config.interval() else {
            debug!("Periodic exports disabled");
            return Ok(None);
        };
        let scheduler = Arc::new(self.exporter(config)).spawn_periodic(interval)?;
        Ok(Some(scheduler))
    }

    /// Processes `items` with at most `workers` in flight at once.
    pub async fn process_batch(&self, items: Vec<RawItem>) -> BatchReport {
        info!(
            "Processing batch of {} items with {} workers",
            items.len(),
            self.workers
        );
        let outcomes: Vec<ItemOutcome> = stream::iter(items)
            .map(|raw| self.ingest(raw))
            .buffer_unordered(self.workers)
            .collect()
            .await;
        let report = BatchReport { outcomes };

        info!(
            "Batch done: {} inserted, {} updated, {} merged, {} rejected, {} skipped, {} deferred, {} failed ({} low quality)",
            report.inserted(),
            report.updated(),
            report.merged(),
            report.rejected(),
            report.skipped(),
            report.deferred(),
            report.failed(),
            report.low_quality()
        );
        if report.health() == Health::Degraded {
            warn!("Store health degraded during batch");
        }
        report
    }

    async fn ingest(&self, raw: RawItem) -> ItemOutcome {
        if let Err(reason) = raw.check_preconditions() {
            warn!("Rejecting raw item: {}", reason);
            return ItemOutcome::Rejected { reason };
        }
        let source_url = raw.source_url().unwrap_or_default().to_string();

        let mut item = match self.normalizer.normalize(&raw) {
            Ok(item) => item,
            Err(reason) => {
                warn!("Skipping item from {}: {}", source_url, reason);
                return ItemOutcome::Skipped { source_url, reason };
            }
        };
        self.scorer.apply(&mut item);

        let dedup = match self.dedup.decide(&item).await {
            Ok(dedup) => dedup,
            Err(reason) => return store_failure(raw, source_url, reason),
        };
        let key = dedup.identity_key;
        let low_quality = item.low_quality;

        let result = match dedup.decision {
            Decision::Insert => self.insert_or_merge(&key, &item).await,
            Decision::Update(_) => self.update_or_insert(&key, &item).await,
        };
        match result {
            Ok((kind, receipt)) => {
                self.dedup.remember(&key);
                debug!(
                    "{:?} {} after {} attempt(s)",
                    kind, receipt.identity_key, receipt.attempts
                );
                match kind {
                    Written::Inserted => ItemOutcome::Inserted { receipt, low_quality },
                    Written::Updated => ItemOutcome::Updated { receipt, low_quality },
                    Written::Merged => ItemOutcome::Merged { receipt, low_quality },
                }
            }
            Err(reason) => store_failure(raw, source_url, reason),
        }
    }

    async fn insert_or_merge(
        &self,
        key: &str,
        item: &Item,
    ) -> Result<(Written, WriteReceipt), PipelineError> {
        match self.writer.insert(key, item).await {
            Ok(receipt) => Ok((Written::Inserted, receipt)),
            Err(PipelineError::DuplicateKey(_)) => {
                debug!("Insert for {} lost a race, applying as update", key);
                let receipt = self.writer.update(key, item).await?;
                Ok((Written::Merged, receipt))
            }
            Err(e) => Err(e),
        }
    }

    async fn update_or_insert(
        &self,
        key: &str,
        item: &Item,
    ) -> Result<(Written, WriteReceipt), PipelineError> {
        match self.writer.update(key, item).await {
            Ok(receipt) => Ok((Written::Updated, receipt)),
            Err(PipelineError::NotFound(_)) => {
                warn!(
                    "Consistency anomaly: entity {} vanished before update, retrying as insert",
                    key
                );
                let receipt = self.writer.insert(key, item).await?;
                Ok((Written::Inserted, receipt))
            }
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Written {
    Inserted,
    Updated,
    Merged,
}

fn store_failure(raw: RawItem, source_url: String, reason: PipelineError) -> ItemOutcome {
    match reason {
        PipelineError::StoreTimeout { .. } => {
            warn!("Deferring item from {}: {}", source_url, reason);
            ItemOutcome::Deferred { raw, reason }
        }
        reason => {
            error!("Failed to store item from {}: {}", source_url, reason);
            ItemOutcome::Failed { source_url, reason }
        }
    }
}

#[async_trait]
impl Pipeline for IngestPipeline {
    fn name(&self) -> &str {
        "IngestPipeline"
    }

    async fn process_item(&self, item: RawItem) -> ItemOutcome {
        self.ingest(item).await
    }

    async fn close(&self) -> Result<(), PipelineError> {
        self.writer.close().await
    }
}
