//! Durable entity store backed by SQLite.
//!
//! This module provides the `StoreWriter`, the only component allowed to
//! mutate the store, and the `StoreReader`, a cheap cloneable handle for
//! lookups and snapshots.
//!
//! Key points:
//! - All writes are funneled through one dedicated blocking thread that owns
//!   the write connection. Callers talk to it over a command channel and get
//!   their result back on a oneshot responder, so a cancelled caller never
//!   leaves a write half-applied.
//! - Each write runs in its own `BEGIN IMMEDIATE` transaction. The busy
//!   handler is disabled; contention (from another connection or process) is
//!   retried here with exponential backoff until the configured write timeout,
//!   then reported as `StoreTimeout`.
//! - The database runs in WAL mode so readers never block the writer and see
//!   a consistent committed state.

use crate::config::StoreConfig;
use crate::error::PipelineError;
use crate::item::{Availability, Category, Entity, Item, Price, PricePoint};
use crate::util::ensure_parent_dir;
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS entities (
    identity_key TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    brand TEXT NOT NULL,
    model TEXT,
    category TEXT NOT NULL,
    price_minor INTEGER,
    currency TEXT,
    availability TEXT NOT NULL,
    specifications TEXT NOT NULL,
    image_urls TEXT NOT NULL,
    rating REAL,
    source_url TEXT NOT NULL,
    scraped_at INTEGER NOT NULL,
    quality_score REAL NOT NULL,
    low_quality INTEGER NOT NULL,
    quality_issues TEXT NOT NULL,
    first_seen INTEGER NOT NULL,
    last_updated INTEGER NOT NULL,
    update_count INTEGER NOT NULL DEFAULT 0,
    original_price_minor INTEGER,
    discount_percentage REAL,
    review_count INTEGER,
    description TEXT,
    key_features TEXT NOT NULL,
    tags TEXT NOT NULL,
    source_domain TEXT NOT NULL,
    spider_name TEXT,
    crawl_id TEXT
);
CREATE TABLE IF NOT EXISTS price_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_key TEXT NOT NULL REFERENCES entities (identity_key),
    observed_at INTEGER NOT NULL,
    price_minor INTEGER NOT NULL,
    currency TEXT NOT NULL,
    availability TEXT NOT NULL,
    source_url TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_price_history_key ON price_history (identity_key, id);
CREATE INDEX IF NOT EXISTS idx_entities_category ON entities (category);
CREATE INDEX IF NOT EXISTS idx_entities_source_domain ON entities (source_domain);
";

const ENTITY_COLUMNS: &str = "identity_key, name, brand, model, category, price_minor, currency, \
     availability, specifications, image_urls, rating, source_url, scraped_at, quality_score, \
     low_quality, quality_issues, first_seen, last_updated, update_count, original_price_minor, \
     discount_percentage, review_count, description, key_features, tags, source_domain, \
     spider_name, crawl_id";

/// What a successful write did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    Updated { price_changed: bool },
    /// The observation predates the entity's last update. Only
    /// `update_count` moved; fields and price history are untouched.
    Stale,
}

/// Result of one applied write, including how many lock attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub identity_key: String,
    pub outcome: WriteOutcome,
    pub attempts: u32,
}

type Responder = oneshot::Sender<Result<WriteReceipt, PipelineError>>;

enum StoreCommand {
    Insert {
        key: String,
        item: Item,
        enqueued_at: Instant,
        responder: Responder,
    },
    Update {
        key: String,
        item: Item,
        enqueued_at: Instant,
        responder: Responder,
    },
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    timeout: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
}

/// Single writer for the entity store.
/// All database mutations are performed on a dedicated blocking thread.
pub struct StoreWriter {
    command_sender: mpsc::Sender<StoreCommand>,
    reader: StoreReader,
}

impl StoreWriter {
    /// Opens (creating if needed) the store described by `config` and starts
    /// the writer thread.
    pub async fn open(config: &StoreConfig) -> Result<Self, PipelineError> {
        ensure_parent_dir(&config.path)?;
        let path = config.path.clone();
        info!(
            "Opening entity store at {:?} (durability: {:?}, write timeout: {:?})",
            path,
            config.durability,
            config.write_timeout()
        );

        let setup = config.clone();
        let conn = tokio::task::spawn_blocking(move || open_write_connection(&setup))
            .await
            .map_err(|e| PipelineError::StoreUnavailable(format!("store setup task failed: {}", e)))??;

        let policy = RetryPolicy {
            timeout: config.write_timeout(),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
        };

        let (command_sender, mut command_receiver) = mpsc::channel::<StoreCommand>(100);
        let db_path = path.clone();

        tokio::task::spawn_blocking(move || {
            info!("Store writer thread started for {:?}", db_path);

            while let Some(command) = command_receiver.blocking_recv() {
                match command {
                    StoreCommand::Insert {
                        key,
                        item,
                        enqueued_at,
                        responder,
                    } => {
                        trace!("Processing Insert for {:?}", key);
                        let result = run_write(&conn, &key, enqueued_at, &policy, |conn| {
                            insert_entity_sync(conn, &key, &item).map(|_| WriteOutcome::Inserted)
                        });
                        if responder.send(result).is_err() {
                            warn!("Insert caller for {:?} went away before the response", key);
                        }
                    }
                    StoreCommand::Update {
                        key,
                        item,
                        enqueued_at,
                        responder,
                    } => {
                        trace!("Processing Update for {:?}", key);
                        let result = run_write(&conn, &key, enqueued_at, &policy, |conn| {
                            update_entity_sync(conn, &key, &item)
                        });
                        if responder.send(result).is_err() {
                            warn!("Update caller for {:?} went away before the response", key);
                        }
                    }
                    StoreCommand::Shutdown(responder) => {
                        debug!("Store writer received shutdown command.");
                        let _ = responder.send(());
                        break;
                    }
                }
            }

            if let Err((_, e)) = conn.close() {
                error!("Error closing store connection for {:?}: {}", db_path, e);
            }
            info!("Store writer thread for {:?} finished.", db_path);
        });

        Ok(StoreWriter {
            command_sender,
            reader: StoreReader::new(path, config.write_timeout()),
        })
    }

    /// Read handle on the same store.
    pub fn reader(&self) -> StoreReader {
        self.reader.clone()
    }

    async fn submit(
        &self,
        build: impl FnOnce(Responder) -> StoreCommand,
    ) -> Result<WriteReceipt, PipelineError> {
        let (tx, rx) = oneshot::channel();
        self.command_sender
            .send(build(tx))
            .await
            .map_err(|_| PipelineError::StoreUnavailable("store writer is closed".to_string()))?;
        rx.await.map_err(|_| {
            PipelineError::StoreUnavailable("store writer dropped the request".to_string())
        })?
    }

    /// Creates a new entity for `key`. Fails with `DuplicateKey` if it
    /// already exists; callers should retry as [`StoreWriter::update`].
    pub async fn insert(&self, key: &str, item: &Item) -> Result<WriteReceipt, PipelineError> {
        let enqueued_at = Instant::now();
        self.submit(|responder| StoreCommand::Insert {
            key: key.to_string(),
            item: item.clone(),
            enqueued_at,
            responder,
        })
        .await
    }

    /// Applies `item` to the existing entity for `key`. Fails with
    /// `NotFound` if there is none.
    pub async fn update(&self, key: &str, item: &Item) -> Result<WriteReceipt, PipelineError> {
        let enqueued_at = Instant::now();
        self.submit(|responder| StoreCommand::Update {
            key: key.to_string(),
            item: item.clone(),
            enqueued_at,
            responder,
        })
        .await
    }

    /// Stops the writer thread after all queued writes have been applied.
    pub async fn close(&self) -> Result<(), PipelineError> {
        debug!("Initiating store writer shutdown.");
        let (tx, rx) = oneshot::channel();
        self.command_sender
            .send(StoreCommand::Shutdown(tx))
            .await
            .map_err(|_| PipelineError::StoreUnavailable("store writer is closed".to_string()))?;
        rx.await.map_err(|e| {
            PipelineError::StoreUnavailable(format!("failed to receive shutdown response: {}", e))
        })?;
        info!("Store writer closed successfully.");
        Ok(())
    }
}

// Setup waits on SQLite's own busy handler; once the schema exists the
// handler is switched off and writes go through `acquire_write_lock`.
fn open_write_connection(config: &StoreConfig) -> Result<Connection, PipelineError> {
    let conn = Connection::open(&config.path)?;
    conn.busy_timeout(config.write_timeout())?;
    let journal_mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", config.durability.synchronous_pragma())?;
    conn.pragma_update(None, "foreign_keys", true)?;
    debug!("Store journal mode: {}", journal_mode);

    conn.execute_batch("BEGIN IMMEDIATE")?;
    finish_transaction(&conn, conn.execute_batch(SCHEMA_SQL).map_err(PipelineError::from))?;
    conn.busy_timeout(Duration::ZERO)?;
    trace!("Schema ready at {:?}", config.path);
    Ok(conn)
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn is_primary_key_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

// Takes the database write lock, backing off while another connection holds
// it. The deadline counts from when the command was enqueued.
fn acquire_write_lock(
    conn: &Connection,
    key: &str,
    enqueued_at: Instant,
    policy: &RetryPolicy,
) -> Result<u32, PipelineError> {
    let mut attempts = 0;
    let mut backoff = policy.initial_backoff;
    loop {
        attempts += 1;
        match conn.execute_batch("BEGIN IMMEDIATE") {
            Ok(()) => return Ok(attempts),
            Err(e) if is_busy(&e) => {
                let waited = enqueued_at.elapsed();
                if waited >= policy.timeout {
                    warn!(
                        "Store lock not acquired for {:?} after {} attempts ({:?})",
                        key, attempts, waited
                    );
                    return Err(PipelineError::StoreTimeout {
                        key: key.to_string(),
                        attempts,
                        waited,
                    });
                }
                let pause = backoff.min(policy.timeout - waited);
                trace!("Store busy for {:?}, attempt {}, retrying in {:?}", key, attempts, pause);
                std::thread::sleep(pause);
                backoff = (backoff * 2).min(policy.max_backoff);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

// Commits on success, rolls back on failure. Assumes a transaction is open.
fn finish_transaction<T>(
    conn: &Connection,
    result: Result<T, PipelineError>,
) -> Result<T, PipelineError> {
    match result {
        Ok(value) => match conn.execute_batch("COMMIT") {
            Ok(()) => Ok(value),
            Err(e) => {
                error!("Commit failed, rolling back: {}", e);
                if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                    error!("Rollback failed: {}", rollback_err);
                }
                Err(e.into())
            }
        },
        Err(e) => {
            if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                error!("Rollback failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}

fn run_write(
    conn: &Connection,
    key: &str,
    enqueued_at: Instant,
    policy: &RetryPolicy,
    apply: impl FnOnce(&Connection) -> Result<WriteOutcome, PipelineError>,
) -> Result<WriteReceipt, PipelineError> {
    let attempts = acquire_write_lock(conn, key, enqueued_at, policy)?;
    let outcome = finish_transaction(conn, apply(conn))?;
    debug!(
        "Committed {:?} for {:?} after {} lock attempt(s)",
        outcome, key, attempts
    );
    Ok(WriteReceipt {
        identity_key: key.to_string(),
        outcome,
        attempts,
    })
}

fn insert_entity_sync(conn: &Connection, key: &str, item: &Item) -> Result<(), PipelineError> {
    let sql = format!(
        "INSERT INTO entities ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
         ?16, ?17, ?18, 0, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)",
        ENTITY_COLUMNS
    );
    let inserted = conn.execute(
        &sql,
        params![
            key,
            item.name,
            item.brand,
            item.model,
            item.category.as_str(),
            item.price.as_ref().map(|p| p.minor_units),
            item.price.as_ref().map(|p| p.currency.as_str()),
            item.availability.as_str(),
            serde_json::to_string(&item.specifications)?,
            serde_json::to_string(&item.image_urls)?,
            item.rating,
            item.source_url,
            item.scraped_at,
            item.quality_score,
            item.low_quality,
            serde_json::to_string(&item.quality_issues)?,
            item.scraped_at,
            item.scraped_at,
            item.original_price.as_ref().map(|p| p.minor_units),
            item.discount_percentage,
            item.review_count,
            item.description,
            serde_json::to_string(&item.key_features)?,
            serde_json::to_string(&item.tags)?,
            item.source_domain,
            item.spider_name,
            item.crawl_id,
        ],
    );
    match inserted {
        Ok(_) => {}
        Err(e) if is_primary_key_violation(&e) => {
            debug!("Insert lost the race for {:?}", key);
            return Err(PipelineError::DuplicateKey(key.to_string()));
        }
        Err(e) => return Err(e.into()),
    }

    if let Some(price) = &item.price {
        append_price_point(conn, key, item, price)?;
    }
    Ok(())
}

fn update_entity_sync(
    conn: &Connection,
    key: &str,
    item: &Item,
) -> Result<WriteOutcome, PipelineError> {
    let last_updated: i64 = conn
        .query_row(
            "SELECT last_updated FROM entities WHERE identity_key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| PipelineError::NotFound(key.to_string()))?;

    // Batches complete out of order; an older observation must not roll the
    // entity back or put a point out of sequence in its history.
    if item.scraped_at < last_updated {
        debug!(
            "Observation of {:?} at {} predates last update at {}",
            key, item.scraped_at, last_updated
        );
        conn.execute(
            "UPDATE entities SET update_count = update_count + 1 WHERE identity_key = ?1",
            params![key],
        )?;
        return Ok(WriteOutcome::Stale);
    }

    let last_price: Option<(i64, String)> = conn
        .query_row(
            "SELECT price_minor, currency FROM price_history WHERE identity_key = ?1 ORDER BY id DESC LIMIT 1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let price_changed = match (&item.price, &last_price) {
        (Some(new), Some((minor, currency))) => new.minor_units != *minor || new.currency != *currency,
        (Some(_), None) => true,
        (None, _) => false,
    };

    // category, brand and model are part of the identity and never change;
    // the name is too when no model was recorded. The list price travels
    // with the price.
    conn.execute(
        "UPDATE entities SET
            name = CASE WHEN model IS NULL THEN name ELSE ?2 END,
            price_minor = COALESCE(?3, price_minor),
            currency = COALESCE(?4, currency),
            original_price_minor = CASE WHEN ?3 IS NULL THEN original_price_minor ELSE ?14 END,
            discount_percentage = CASE WHEN ?3 IS NULL THEN discount_percentage ELSE ?15 END,
            availability = ?5,
            specifications = ?6,
            image_urls = ?7,
            rating = COALESCE(?8, rating),
            source_url = ?9,
            scraped_at = ?10,
            quality_score = ?11,
            low_quality = ?12,
            quality_issues = ?13,
            review_count = COALESCE(?16, review_count),
            description = COALESCE(?17, description),
            key_features = CASE WHEN ?18 = '[]' THEN key_features ELSE ?18 END,
            tags = CASE WHEN ?19 = '[]' THEN tags ELSE ?19 END,
            source_domain = ?20,
            spider_name = COALESCE(?21, spider_name),
            crawl_id = COALESCE(?22, crawl_id),
            last_updated = MAX(last_updated, ?10),
            update_count = update_count + 1
         WHERE identity_key = ?1",
        params![
            key,
            item.name,
            item.price.as_ref().map(|p| p.minor_units),
            item.price.as_ref().map(|p| p.currency.as_str()),
            item.availability.as_str(),
            serde_json::to_string(&item.specifications)?,
            serde_json::to_string(&item.image_urls)?,
            item.rating,
            item.source_url,
            item.scraped_at,
            item.quality_score,
            item.low_quality,
            serde_json::to_string(&item.quality_issues)?,
            item.original_price.as_ref().map(|p| p.minor_units),
            item.discount_percentage,
            item.review_count,
            item.description,
            serde_json::to_string(&item.key_features)?,
            serde_json::to_string(&item.tags)?,
            item.source_domain,
            item.spider_name,
            item.crawl_id,
        ],
    )?;

    if price_changed {
        if let Some(price) = &item.price {
            append_price_point(conn, key, item, price)?;
        }
    }
    Ok(WriteOutcome::Updated { price_changed })
}

fn append_price_point(
    conn: &Connection,
    key: &str,
    item: &Item,
    price: &Price,
) -> Result<(), PipelineError> {
    trace!("Recording price {} {} for {:?}", price, price.currency, key);
    conn.execute(
        "INSERT INTO price_history (identity_key, observed_at, price_minor, currency, availability, source_url)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            key,
            item.scraped_at,
            price.minor_units,
            price.currency,
            item.availability.as_str(),
            item.source_url
        ],
    )?;
    Ok(())
}

/// Read-only access to the entity store.
///
/// Every operation opens its own query-only connection on a blocking thread,
/// so reads run concurrently with each other and with the writer.
#[derive(Debug, Clone)]
pub struct StoreReader {
    path: Arc<PathBuf>,
    busy_timeout: Duration,
}

impl StoreReader {
    fn new(path: PathBuf, busy_timeout: Duration) -> Self {
        StoreReader {
            path: Arc::new(path),
            busy_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(path: &Path, busy_timeout: Duration) -> Result<Connection, PipelineError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update(None, "query_only", true)?;
        Ok(conn)
    }

    async fn with_connection<T, F>(&self, f: F) -> Result<T, PipelineError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, PipelineError> + Send + 'static,
    {
        let path = Arc::clone(&self.path);
        let busy_timeout = self.busy_timeout;
        tokio::task::spawn_blocking(move || {
            let mut conn = Self::connect(&path, busy_timeout)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| PipelineError::StoreUnavailable(format!("store read task failed: {}", e)))?
    }

    pub async fn contains_key(&self, key: &str) -> Result<bool, PipelineError> {
        let key = key.to_string();
        self.with_connection(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM entities WHERE identity_key = ?1",
                    params![key],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    pub async fn count(&self) -> Result<usize, PipelineError> {
        self.with_connection(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?;
            Ok(n as usize)
        })
        .await
    }

    pub async fn get_entity(&self, key: &str) -> Result<Option<Entity>, PipelineError> {
        let key = key.to_string();
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            let entity = tx
                .query_row(
                    &format!("SELECT {} FROM entities WHERE identity_key = ?1", ENTITY_COLUMNS),
                    params![key],
                    entity_from_row,
                )
                .optional()?;
            let entity = match entity {
                Some(mut entity) => {
                    entity.price_history = load_price_history(&tx, Some(&key))?
                        .remove(&key)
                        .unwrap_or_default();
                    Some(entity)
                }
                None => None,
            };
            tx.finish()?;
            Ok(entity)
        })
        .await
    }

    /// All entities as of one committed state, ordered by identity key.
    pub async fn snapshot(&self) -> Result<Vec<Entity>, PipelineError> {
        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            let mut entities = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {} FROM entities ORDER BY identity_key",
                    ENTITY_COLUMNS
                ))?;
                let rows = stmt.query_map([], entity_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            };
            let mut histories = load_price_history(&tx, None)?;
            tx.finish()?;

            for entity in &mut entities {
                entity.price_history = histories.remove(&entity.identity_key).unwrap_or_default();
            }
            debug!("Snapshot read {} entities", entities.len());
            Ok(entities)
        })
        .await
    }
}

fn load_price_history(
    conn: &Connection,
    key: Option<&str>,
) -> Result<HashMap<String, Vec<PricePoint>>, PipelineError> {
    let mut stmt = conn.prepare(
        "SELECT identity_key, observed_at, price_minor, currency, availability, source_url
         FROM price_history
         WHERE ?1 IS NULL OR identity_key = ?1
         ORDER BY identity_key, id",
    )?;
    let rows = stmt.query_map(params![key], |row| {
        let key: String = row.get(0)?;
        let availability: String = row.get(4)?;
        Ok((
            key,
            PricePoint {
                observed_at: row.get(1)?,
                price: Price::new(row.get(2)?, row.get::<_, String>(3)?),
                availability: Availability::from_name(&availability),
                source_url: row.get(5)?,
            },
        ))
    })?;

    let mut histories: HashMap<String, Vec<PricePoint>> = HashMap::new();
    for row in rows {
        let (key, point) = row?;
        histories.entry(key).or_default().push(point);
    }
    Ok(histories)
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
    let category: String = row.get(4)?;
    let availability: String = row.get(7)?;
    let price_minor: Option<i64> = row.get(5)?;
    let currency: Option<String> = row.get(6)?;
    let original_minor: Option<i64> = row.get(19)?;
    let currency = currency.unwrap_or_default();
    let item = Item {
        name: row.get(1)?,
        brand: row.get(2)?,
        model: row.get(3)?,
        category: Category::from_name(&category),
        price: price_minor.map(|minor| Price::new(minor, currency.clone())),
        original_price: original_minor.map(|minor| Price::new(minor, currency.clone())),
        discount_percentage: row.get(20)?,
        availability: Availability::from_name(&availability),
        specifications: json_column(row, 8)?,
        image_urls: json_column(row, 9)?,
        rating: row.get(10)?,
        review_count: row.get(21)?,
        description: row.get(22)?,
        key_features: json_column(row, 23)?,
        tags: json_column(row, 24)?,
        source_url: row.get(11)?,
        source_domain: row.get(25)?,
        spider_name: row.get(26)?,
        crawl_id: row.get(27)?,
        scraped_at: row.get(12)?,
        quality_score: row.get(13)?,
        low_quality: row.get(14)?,
        quality_issues: json_column(row, 15)?,
    };
    Ok(Entity {
        identity_key: row.get(0)?,
        item,
        first_seen: row.get(16)?,
        last_updated: row.get(17)?,
        update_count: row.get(18)?,
        price_history: Vec::new(),
    })
}
