//! Snapshot exports of the entity store.
//!
//! This module provides the `ExportGenerator`, which reads one consistent
//! snapshot of every entity and writes it out in the configured formats:
//! - `json`: a single pretty-printed array of entity snapshots, price history
//!   included.
//! - `jsonl`: one entity per line.
//! - `csv`: one row per entity. Headers are the sorted union of all row keys;
//!   the specification map is flattened into `spec_<key>` columns and list
//!   values are written as JSON strings within their cells.
//!
//! Each file is written to a temp file and renamed into place, so a reader
//! never observes a half-written export. Exports only take a read
//! transaction on the store and never hold up the writer.
//!
//! Exports run on demand through [`ExportGenerator::export_now`] or
//! periodically through the task started by
//! [`ExportGenerator::spawn_periodic`].

use crate::config::{ExportConfig, ExportFormat};
use crate::error::PipelineError;
use crate::item::Entity;
use crate::store::StoreReader;
use crate::util::write_atomically;
use chrono::Utc;
use csv::Writer;
use kanal::unbounded_async;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// What one export run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub entity_count: usize,
    pub files: Vec<PathBuf>,
}

/// Writes store snapshots to flat files.
pub struct ExportGenerator {
    reader: StoreReader,
    config: ExportConfig,
}

impl ExportGenerator {
    pub fn new(reader: StoreReader, config: ExportConfig) -> Self {
        info!(
            "Initializing ExportGenerator into {:?} with formats {:?}",
            config.dir, config.formats
        );
        ExportGenerator { reader, config }
    }

    fn output_path(&self, format: ExportFormat, stamp: Option<&str>) -> PathBuf {
        let file_name = match stamp {
            Some(stamp) => format!("{}_{}.{}", self.config.file_stem, stamp, format.extension()),
            None => format!("{}.{}", self.config.file_stem, format.extension()),
        };
        self.config.dir.join(file_name)
    }

    /// Snapshots the store and writes every configured format.
    pub async fn export_now(&self) -> Result<ExportSummary, PipelineError> {
        let entities = self.reader.snapshot().await?;
        let stamp = self
            .config
            .timestamped
            .then(|| Utc::now().format("%Y%m%d_%H%M%S").to_string());
        let targets: Vec<(ExportFormat, PathBuf)> = self
            .config
            .formats
            .iter()
            .map(|format| (*format, self.output_path(*format, stamp.as_deref())))
            .collect();

        let entity_count = entities.len();
        let files = tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>, PipelineError> {
            let mut written = Vec::with_capacity(targets.len());
            for (format, path) in targets {
                debug!("Writing {} entities as {:?} to {:?}", entities.len(), format, path);
                match format {
                    ExportFormat::Json => write_json(&path, &entities)?,
                    ExportFormat::Jsonl => write_jsonl(&path, &entities)?,
                    ExportFormat::Csv => write_csv(&path, &entities)?,
                }
                written.push(path);
            }
            Ok(written)
        })
        .await
        .map_err(|e| PipelineError::Io(std::io::Error::other(format!("export task failed: {}", e))))??;

        info!("Exported {} entities to {} file(s)", entity_count, files.len());
        Ok(ExportSummary {
            entity_count,
            files,
        })
    }

    /// Starts a background task that exports every `interval` until shut
    /// down. The first export happens one interval after the call.
    ///
    /// A zero interval is a configuration error.
    pub fn spawn_periodic(
        self: Arc<Self>,
        interval: Duration,
    ) -> Result<ExportScheduler, PipelineError> {
        if interval.is_zero() {
            return Err(PipelineError::Config(
                "export interval must be greater than zero".into(),
            ));
        }
        let (command_sender, command_receiver) = unbounded_async::<ExportCommand>();

        let handle = tokio::task::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            info!("Periodic export task started (every {:?})", interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.export_now().await {
                            error!("Periodic export failed: {}", e);
                        }
                    }
                    command = command_receiver.recv() => match command {
                        Ok(ExportCommand::ExportNow(responder)) => {
                            let result = self.export_now().await;
                            if responder.send(result).await.is_err() {
                                error!("Failed to send ExportNow response.");
                            }
                        }
                        Ok(ExportCommand::Shutdown(responder)) => {
                            info!("Periodic export task received shutdown command.");
                            let _ = responder.send(()).await;
                            break;
                        }
                        Err(_) => break,
                    },
                }
            }
            info!("Periodic export task finished.");
        });

        Ok(ExportScheduler {
            command_sender,
            handle,
        })
    }
}

const SCHEDULER_LIVENESS_CHECK: Duration = Duration::from_millis(100);

fn scheduler_stopped() -> PipelineError {
    error!("Export scheduler task is no longer running");
    PipelineError::Io(std::io::Error::other("export scheduler stopped"))
}

enum ExportCommand {
    ExportNow(kanal::AsyncSender<Result<ExportSummary, PipelineError>>),
    Shutdown(kanal::AsyncSender<()>),
}

/// Handle on a running periodic export task.
pub struct ExportScheduler {
    command_sender: kanal::AsyncSender<ExportCommand>,
    handle: JoinHandle<()>,
}

impl ExportScheduler {
    /// Runs an export immediately on the scheduler task.
    ///
    /// Fails instead of waiting forever if the task has stopped.
    pub async fn export_now(&self) -> Result<ExportSummary, PipelineError> {
        if self.handle.is_finished() {
            return Err(scheduler_stopped());
        }
        let (tx, rx) = kanal::unbounded_async();
        self.command_sender
            .send(ExportCommand::ExportNow(tx))
            .await
            .map_err(|e| PipelineError::Io(std::io::Error::other(format!("export scheduler is gone: {}", e))))?;

        // A queued command outlives a dead task, so its responder never drops.
        let response = rx.recv();
        tokio::pin!(response);
        let mut liveness = tokio::time::interval(SCHEDULER_LIVENESS_CHECK);
        loop {
            tokio::select! {
                biased;
                result = &mut response => {
                    return result.map_err(|e| {
                        PipelineError::Io(std::io::Error::other(format!("failed to receive export response: {}", e)))
                    })?;
                }
                _ = liveness.tick() => {
                    if self.handle.is_finished() {
                        return Err(scheduler_stopped());
                    }
                }
            }
        }
    }

    /// Stops the task, waiting for an in-progress export to finish.
    pub async fn shutdown(self) -> Result<(), PipelineError> {
        let (tx, rx) = kanal::unbounded_async();
        if self.command_sender.send(ExportCommand::Shutdown(tx)).await.is_ok() {
            let _ = rx.recv().await;
        }
        self.handle
            .await
            .map_err(|e| PipelineError::Io(std::io::Error::other(format!("export task panicked: {}", e))))
    }
}

fn write_json(path: &Path, entities: &[Entity]) -> Result<(), PipelineError> {
    write_atomically(path, |file| {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, entities)?;
        writer.flush()?;
        Ok(())
    })
}

fn write_jsonl(path: &Path, entities: &[Entity]) -> Result<(), PipelineError> {
    write_atomically(path, |file| {
        let mut writer = BufWriter::new(file);
        for entity in entities {
            serde_json::to_writer(&mut writer, entity)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    })
}

fn csv_row(entity: &Entity) -> BTreeMap<String, String> {
    let item = &entity.item;
    let mut row = BTreeMap::new();
    let mut put = |key: &str, value: String| {
        row.insert(key.to_string(), value);
    };
    put("identity_key", entity.identity_key.clone());
    put("name", item.name.clone());
    put("brand", item.brand.clone());
    put("model", item.model.clone().unwrap_or_default());
    put("category", item.category.to_string());
    put("price", item.price.as_ref().map(|p| p.to_string()).unwrap_or_default());
    put(
        "currency",
        item.price.as_ref().map(|p| p.currency.clone()).unwrap_or_default(),
    );
    put(
        "original_price",
        item.original_price.as_ref().map(|p| p.to_string()).unwrap_or_default(),
    );
    put(
        "discount_percentage",
        item.discount_percentage.map(|d| d.to_string()).unwrap_or_default(),
    );
    put("availability", item.availability.to_string());
    put("rating", item.rating.map(|r| r.to_string()).unwrap_or_default());
    put("review_count", item.review_count.map(|r| r.to_string()).unwrap_or_default());
    put("description", item.description.clone().unwrap_or_default());
    put("key_features", Value::from(item.key_features.clone()).to_string());
    put("tags", Value::from(item.tags.clone()).to_string());
    put("image_urls", Value::from(item.image_urls.clone()).to_string());
    put("source_url", item.source_url.clone());
    put("source_domain", item.source_domain.clone());
    put("spider_name", item.spider_name.clone().unwrap_or_default());
    put("crawl_id", item.crawl_id.clone().unwrap_or_default());
    put("scraped_at", item.scraped_at.to_string());
    put("quality_score", item.quality_score.to_string());
    put("low_quality", item.low_quality.to_string());
    put("first_seen", entity.first_seen.to_string());
    put("last_updated", entity.last_updated.to_string());
    put("update_count", entity.update_count.to_string());
    put("price_points", entity.price_history.len().to_string());
    for (key, value) in &item.specifications {
        row.insert(format!("spec_{}", key), value.clone());
    }
    row
}

fn write_csv(path: &Path, entities: &[Entity]) -> Result<(), PipelineError> {
    let rows: Vec<BTreeMap<String, String>> = entities.iter().map(csv_row).collect();
    let headers: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.keys().map(String::as_str))
        .collect();

    write_atomically(path, |file| {
        let mut writer = Writer::from_writer(file);
        writer.write_record(&headers)?;
        for row in &rows {
            let record: Vec<&str> = headers
                .iter()
                .map(|h| row.get(*h).map(String::as_str).unwrap_or_default())
                .collect();
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    })
}
