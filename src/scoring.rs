//! Quality scoring for normalized items.
//!
//! The score is a weighted sum over four field groups. Identity, commercial
//! and media groups are all-or-nothing; specification richness scales with
//! the number of specs up to five. Items under the configured minimum are
//! flagged, never dropped.

use crate::item::{Availability, Item};
use tracing::debug;

const IDENTITY_WEIGHT: f64 = 0.4;
const COMMERCIAL_WEIGHT: f64 = 0.3;
const SPEC_WEIGHT: f64 = 0.2;
const MEDIA_WEIGHT: f64 = 0.1;
const SPECS_FOR_FULL_CREDIT: f64 = 5.0;

pub const DEFAULT_MIN_SCORE: f64 = 0.3;

/// Attaches quality scores and flags to items.
#[derive(Debug, Clone)]
pub struct QualityScorer {
    min_score: f64,
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SCORE)
    }
}

impl QualityScorer {
    pub fn new(min_score: f64) -> Self {
        QualityScorer { min_score }
    }

    pub fn min_score(&self) -> f64 {
        self.min_score
    }

    /// Computes the score without touching the item.
    pub fn score(&self, item: &Item) -> f64 {
        let identity = !item.name.is_empty() && !item.brand.is_empty();
        let commercial = item.price.is_some() && item.availability != Availability::Unknown;
        let richness = (item.specifications.len() as f64 / SPECS_FOR_FULL_CREDIT).min(1.0);
        let media = !item.image_urls.is_empty();

        let mut score = richness * SPEC_WEIGHT;
        if identity {
            score += IDENTITY_WEIGHT;
        }
        if commercial {
            score += COMMERCIAL_WEIGHT;
        }
        if media {
            score += MEDIA_WEIGHT;
        }
        ((score * 10_000.0).round() / 10_000.0).clamp(0.0, 1.0)
    }

    /// Scores `item` in place, setting `quality_score`, `low_quality` and
    /// `quality_issues`.
    pub fn apply(&self, item: &mut Item) {
        item.quality_score = self.score(item);
        item.low_quality = item.quality_score < self.min_score;
        item.quality_issues = sanity_issues(item);
        if item.low_quality {
            debug!(
                "Low quality item {} (score {:.2} < {:.2}): {:?}",
                item.source_url, item.quality_score, self.min_score, item.quality_issues
            );
        }
    }
}

fn sanity_issues(item: &Item) -> Vec<String> {
    let mut issues = Vec::new();
    if item.name.is_empty() {
        issues.push("name is missing".to_string());
    } else if item.name.chars().count() < 3 {
        issues.push("name is too short".to_string());
    }
    if item.brand.is_empty() {
        issues.push("brand is missing".to_string());
    }
    match &item.price {
        None => issues.push("price is missing".to_string()),
        Some(p) if p.minor_units == 0 => issues.push("price is zero".to_string()),
        Some(_) => {}
    }
    if !(item.source_url.starts_with("http://") || item.source_url.starts_with("https://")) {
        issues.push("source_url is not an http(s) URL".to_string());
    }
    issues
}
