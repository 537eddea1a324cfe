//! Data model shared by the pipeline stages.
//!
//! A [`RawItem`] is what the extraction layer hands over: a loosely typed
//! JSON field map. The [`crate::normalizer`] turns it into an [`Item`], and
//! only `Item`s travel further. The store persists [`Entity`] records, one per
//! identity key, each carrying an append-only price history.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Hardware category of a listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "GPU")]
    Gpu,
    #[serde(rename = "CPU")]
    Cpu,
    #[serde(rename = "RAM")]
    Ram,
    Storage,
    Motherboard,
    #[default]
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Gpu => "GPU",
            Category::Cpu => "CPU",
            Category::Ram => "RAM",
            Category::Storage => "Storage",
            Category::Motherboard => "Motherboard",
            Category::Other => "Other",
        }
    }

    /// Inverse of [`Category::as_str`]; unknown names map to `Other`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "GPU" => Category::Gpu,
            "CPU" => Category::Cpu,
            "RAM" => Category::Ram,
            "Storage" => Category::Storage,
            "Motherboard" => Category::Motherboard,
            _ => Category::Other,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stock status of a listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    InStock,
    OutOfStock,
    PreOrder,
    #[default]
    Unknown,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::InStock => "InStock",
            Availability::OutOfStock => "OutOfStock",
            Availability::PreOrder => "PreOrder",
            Availability::Unknown => "Unknown",
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "InStock" => Availability::InStock,
            "OutOfStock" => Availability::OutOfStock,
            "PreOrder" => Availability::PreOrder,
            _ => Availability::Unknown,
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-negative amount in hundredths of the currency unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Price {
    pub minor_units: i64,
    pub currency: String,
}

impl Price {
    pub fn new(minor_units: i64, currency: impl Into<String>) -> Self {
        Price {
            minor_units,
            currency: currency.into(),
        }
    }

    pub fn as_f64(&self) -> f64 {
        self.minor_units as f64 / 100.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.minor_units / 100, self.minor_units % 100)
    }
}

/// One normalized product observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub brand: String,
    pub model: Option<String>,
    pub category: Category,
    pub price: Option<Price>,
    /// List price before any discount, in the currency of `price`.
    pub original_price: Option<Price>,
    /// Percent off `original_price`, two decimals.
    pub discount_percentage: Option<f64>,
    pub availability: Availability,
    pub specifications: BTreeMap<String, String>,
    pub image_urls: Vec<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    pub description: Option<String>,
    pub key_features: Vec<String>,
    pub tags: Vec<String>,
    pub source_url: String,
    /// Host of `source_url` unless the extractor supplied one.
    pub source_domain: String,
    pub spider_name: Option<String>,
    pub crawl_id: Option<String>,
    /// Epoch seconds.
    pub scraped_at: i64,
    pub quality_score: f64,
    pub low_quality: bool,
    pub quality_issues: Vec<String>,
}

/// A raw field map as produced by the extraction layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawItem {
    fields: Map<String, Value>,
}

impl RawItem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter, mostly useful in tests and adapters.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns the trimmed string value of `key`, treating empty strings and
    /// nulls as absent.
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.fields.get(key)? {
            Value::String(s) => {
                let t = s.trim();
                if t.is_empty() {
                    None
                } else {
                    Some(t)
                }
            }
            _ => None,
        }
    }

    /// Source URL of the scrape event, if populated.
    pub fn source_url(&self) -> Option<&str> {
        self.text("source_url")
    }

    /// Checks the input boundary contract before any normalization happens.
    pub fn check_preconditions(&self) -> Result<(), PipelineError> {
        match self.source_url() {
            Some(_) => Ok(()),
            None => Err(PipelineError::MissingSourceUrl),
        }
    }
}

impl From<Map<String, Value>> for RawItem {
    fn from(fields: Map<String, Value>) -> Self {
        RawItem { fields }
    }
}

/// One point in an entity's price history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub observed_at: i64,
    pub price: Price,
    pub availability: Availability,
    /// Page the price was observed on.
    pub source_url: String,
}

/// Persistent record for one physical product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub identity_key: String,
    #[serde(flatten)]
    pub item: Item,
    pub first_seen: i64,
    pub last_updated: i64,
    pub update_count: u32,
    pub price_history: Vec<PricePoint>,
}
