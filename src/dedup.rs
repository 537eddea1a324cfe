//! Deduplication against previously stored entities.
//!
//! This module provides the `Deduplicator`, which maps a scored [`Item`] to
//! the identity key of the physical product it describes and decides whether
//! the item creates a new entity or updates an existing one.
//!
//! The identity key is a heuristic: a composite of category, brand and model
//! (or the punctuation-stripped name when no model was scraped). Different
//! products can collapse onto one key and one product can split across two
//! keys when titles drift. Key derivation sits behind [`KeyStrategy`] so a
//! deployment can replace the rule without touching the rest of the pipeline.
//!
//! Matching is exact on the key. Keys confirmed to exist are remembered in a
//! concurrent hash set, which is safe because the pipeline never deletes
//! entities.

use crate::error::PipelineError;
use crate::item::Item;
use crate::store::StoreReader;
use dashmap::DashSet;
use seahash::SeaHasher;
use std::hash::Hasher;
use std::sync::Arc;
use tracing::{debug, info};

/// Derives the identity key for an item.
pub trait KeyStrategy: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn identity_key(&self, item: &Item) -> String;
}

/// Default key rule: `category|brand|model-or-name`, lower-cased.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompositeKey;

impl KeyStrategy for CompositeKey {
    fn name(&self) -> &str {
        "CompositeKey"
    }

    fn identity_key(&self, item: &Item) -> String {
        let brand = normalize_component(&item.brand, false);
        let product = match item.model.as_deref().map(|m| normalize_component(m, false)) {
            Some(model) if !model.is_empty() => model,
            _ => normalize_component(&item.name, true),
        };
        format!("{}|{}|{}", item.category.as_str().to_lowercase(), brand, product)
    }
}

fn normalize_component(value: &str, strip_punctuation: bool) -> String {
    let lower = value.to_lowercase();
    let cleaned: String = if strip_punctuation {
        lower
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect()
    } else {
        lower.replace('|', " ")
    };
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Outcome of deduplication for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Insert,
    Update(String),
}

/// A decision together with the key it was made for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deduplication {
    pub identity_key: String,
    pub decision: Decision,
}

/// Decides insert vs. update by exact identity-key lookup.
pub struct Deduplicator {
    strategy: Arc<dyn KeyStrategy>,
    reader: StoreReader,
    known_keys: DashSet<u64>,
}

impl Deduplicator {
    /// Creates a `Deduplicator` using the default [`CompositeKey`] rule.
    pub fn new(reader: StoreReader) -> Self {
        Self::with_strategy(reader, Arc::new(CompositeKey))
    }

    pub fn with_strategy(reader: StoreReader, strategy: Arc<dyn KeyStrategy>) -> Self {
        info!("Initializing Deduplicator with key strategy: {}", strategy.name());
        Deduplicator {
            strategy,
            reader,
            known_keys: DashSet::new(),
        }
    }

    pub fn identity_key(&self, item: &Item) -> String {
        self.strategy.identity_key(item)
    }

    fn hash_key(key: &str) -> u64 {
        let mut hasher = SeaHasher::new();
        hasher.write(key.as_bytes());
        hasher.finish()
    }

    /// Records that an entity exists for `key`, e.g. after a successful insert.
    pub fn remember(&self, key: &str) {
        self.known_keys.insert(Self::hash_key(key));
    }

    /// Number of keys currently cached as existing.
    pub fn known_len(&self) -> usize {
        self.known_keys.len()
    }

    /// Decides whether `item` creates a new entity or updates an existing one.
    /// Store read failures surface as `StoreUnavailable`.
    pub async fn decide(&self, item: &Item) -> Result<Deduplication, PipelineError> {
        let identity_key = self.identity_key(item);
        let hash = Self::hash_key(&identity_key);

        let exists = if self.known_keys.contains(&hash) {
            true
        } else {
            let found = self.reader.contains_key(&identity_key).await?;
            if found {
                self.known_keys.insert(hash);
            }
            found
        };

        let decision = if exists {
            debug!("Existing entity for key {:?}, updating", identity_key);
            Decision::Update(identity_key.clone())
        } else {
            debug!("No entity for key {:?}, inserting", identity_key);
            Decision::Insert
        };
        Ok(Deduplication {
            identity_key,
            decision,
        })
    }
}
