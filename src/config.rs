//! Static pipeline configuration.
//!
//! Loaded once at pipeline start from TOML; every section has defaults so a
//! partial file (or none at all) is valid.

use crate::error::PipelineError;
use crate::scoring::DEFAULT_MIN_SCORE;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for the ingestion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Maximum number of items processed concurrently by a batch
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_workers() -> usize {
    8
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            quality: QualityConfig::default(),
            store: StoreConfig::default(),
            export: ExportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, PipelineError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| PipelineError::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all fields, reporting every problem at once.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut errors: Vec<String> = Vec::new();

        if self.workers == 0 {
            errors.push("workers must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.quality.min_score) {
            errors.push("quality.min_score must be between 0.0 and 1.0".to_string());
        }
        if self.store.path.as_os_str().is_empty() {
            errors.push("store.path must not be empty".to_string());
        }
        if self.store.write_timeout_ms == 0 {
            errors.push("store.write_timeout_ms must be positive".to_string());
        }
        if self.store.initial_backoff_ms == 0 {
            errors.push("store.initial_backoff_ms must be positive".to_string());
        }
        if self.store.max_backoff_ms < self.store.initial_backoff_ms {
            errors.push("store.max_backoff_ms must be >= store.initial_backoff_ms".to_string());
        }
        if self.export.formats.is_empty() {
            errors.push("export.formats must name at least one format".to_string());
        }
        if self.export.file_stem.trim().is_empty() {
            errors.push("export.file_stem must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Config(errors.join("; ")))
        }
    }
}

/// Quality scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Items scoring below this are flagged `low_quality`
    #[serde(default = "default_min_score")]
    pub min_score: f64,
}

fn default_min_score() -> f64 {
    DEFAULT_MIN_SCORE
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
        }
    }
}

/// Flush guarantees for committed writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    /// No synchronous flush; the store is a re-creatable cache.
    Fast,
    /// Full synchronous flush on every commit.
    Safe,
}

impl Durability {
    /// Value for SQLite's `synchronous` pragma.
    pub fn synchronous_pragma(&self) -> &'static str {
        match self {
            Durability::Fast => "OFF",
            Durability::Safe => "FULL",
        }
    }
}

/// Durable store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_durability")]
    pub durability: Durability,
    /// Maximum time a write waits for exclusive access
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("hardware_data.db")
}

fn default_durability() -> Durability {
    Durability::Fast
}

fn default_write_timeout_ms() -> u64 {
    30_000
}

fn default_initial_backoff_ms() -> u64 {
    10
}

fn default_max_backoff_ms() -> u64 {
    500
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            durability: default_durability(),
            write_timeout_ms: default_write_timeout_ms(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl StoreConfig {
    /// Store at `path` with default settings.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Export file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Jsonl,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Csv => "csv",
        }
    }
}

/// Export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_export_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_file_stem")]
    pub file_stem: String,
    #[serde(default = "default_formats")]
    pub formats: Vec<ExportFormat>,
    /// Append `_YYYYmmdd_HHMMSS` to file names
    #[serde(default)]
    pub timestamped: bool,
    /// Periodic export interval; 0 disables the scheduler
    #[serde(default)]
    pub interval_secs: u64,
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("exports")
}

fn default_file_stem() -> String {
    "hardware".to_string()
}

fn default_formats() -> Vec<ExportFormat> {
    vec![ExportFormat::Json, ExportFormat::Csv]
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: default_export_dir(),
            file_stem: default_file_stem(),
            formats: default_formats(),
            timestamped: false,
            interval_secs: 0,
        }
    }
}

impl ExportConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Log severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.quality.min_score, 0.3);
        assert_eq!(config.store.durability, Durability::Fast);
        assert_eq!(config.store.write_timeout(), Duration::from_secs(30));
        assert_eq!(
            config.export.formats,
            vec![ExportFormat::Json, ExportFormat::Csv]
        );
        assert_eq!(config.export.interval(), None);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn parses_full_document() {
        let config = Config::from_toml(
            r#"
            workers = 4

            [quality]
            min_score = 0.5

            [store]
            path = "/var/lib/hw/store.db"
            durability = "safe"
            write_timeout_ms = 5000

            [export]
            dir = "/tmp/exports"
            formats = ["csv", "jsonl"]
            timestamped = true
            interval_secs = 600

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.workers, 4);
        assert_eq!(config.store.durability, Durability::Safe);
        assert_eq!(config.store.durability.synchronous_pragma(), "FULL");
        assert_eq!(config.store.write_timeout(), Duration::from_secs(5));
        assert_eq!(config.store.initial_backoff(), Duration::from_millis(10));
        assert_eq!(config.export.formats, vec![ExportFormat::Csv, ExportFormat::Jsonl]);
        assert_eq!(config.export.interval(), Some(Duration::from_secs(600)));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn validation_reports_every_problem() {
        let mut config = Config::default();
        config.workers = 0;
        config.quality.min_score = 1.5;
        config.export.formats.clear();
        let message = match config.validate() {
            Err(PipelineError::Config(message)) => message,
            other => panic!("expected config error, got {:?}", other),
        };
        assert!(message.contains("workers"));
        assert!(message.contains("min_score"));
        assert!(message.contains("export.formats"));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, "workers = 2\n").unwrap();
        assert_eq!(Config::load(&path).unwrap().workers, 2);
        assert!(Config::load(&dir.path().join("missing.toml")).is_err());
    }
}
