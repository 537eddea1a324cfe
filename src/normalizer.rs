//! Record normalizer.
//!
//! Turns the extraction layer's loosely typed [`RawItem`] field maps into
//! canonical [`Item`]s. Normalization is a pure transform: it never touches
//! the store, and a failure only affects the record being normalized.
//!
//! Handled here:
//! - Price strings: currency symbols, currency codes and thousands separators
//!   are stripped; the remainder must be a non-negative decimal.
//! - Category and availability text, mapped through fixed keyword tables.
//! - Specification maps: keys trimmed and lower-cased, empty values dropped.
//! - Ratings, review counts, image URL lists and scrape timestamps in their
//!   common shapes.
//! - List prices and discounts; a malformed list price is dropped rather than
//!   failing the item.

use crate::error::PipelineError;
use crate::item::{Availability, Category, Item, Price, RawItem};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, trace};
use url::Url;

const CATEGORY_KEYWORDS: &[(Category, &[&str])] = &[
    (
        Category::Gpu,
        &[
            "gpu",
            "graphics card",
            "video card",
            "geforce",
            "radeon",
            "rtx",
            "gtx",
        ],
    ),
    (Category::Cpu, &["cpu", "processor", "ryzen"]),
    (Category::Motherboard, &["motherboard", "mainboard"]),
    (Category::Storage, &["ssd", "hdd", "nvme", "storage", "hard drive"]),
    (Category::Ram, &["ram", "memory", "ddr"]),
];

// Checked in this order: "unavailable" must win over "available".
const AVAILABILITY_KEYWORDS: &[(Availability, &[&str])] = &[
    (
        Availability::OutOfStock,
        &["out of stock", "sold out", "unavailable", "not available"],
    ),
    (
        Availability::PreOrder,
        &["pre-order", "preorder", "pre order", "backorder", "back order"],
    ),
    (
        Availability::InStock,
        &["in stock", "available", "add to cart", "buy now"],
    ),
];

const CURRENCY_SYMBOLS: &[(char, &str)] = &[('$', "USD"), ('€', "EUR"), ('£', "GBP"), ('¥', "JPY")];
const CURRENCY_CODES: &[&str] = &["USD", "EUR", "GBP", "JPY", "CAD", "AUD", "US"];

/// Converts raw field maps into typed items.
#[derive(Debug, Clone)]
pub struct Normalizer {
    default_currency: String,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Normalizer {
            default_currency: "USD".to_string(),
        }
    }

    /// Uses `currency` when neither the raw item nor its price text names one.
    pub fn with_default_currency(currency: impl Into<String>) -> Self {
        Normalizer {
            default_currency: currency.into(),
        }
    }

    /// Normalizes one raw record. The quality fields are left at their zero
    /// values for the scorer to fill in.
    pub fn normalize(&self, raw: &RawItem) -> Result<Item, PipelineError> {
        raw.check_preconditions()?;
        let source_url = raw.source_url().unwrap_or_default().to_string();

        let name = raw.text("name").map(collapse_whitespace).unwrap_or_default();
        let brand = raw.text("brand").map(collapse_whitespace).unwrap_or_default();
        let model = raw.text("model").map(collapse_whitespace);

        let currency = raw.text("currency").map(|c| c.to_uppercase());
        let price = self.parse_money(raw.get("price"), currency.as_deref())?;
        // A bad list price only loses the discount, never the item.
        let original_price = match self.parse_money(raw.get("original_price"), currency.as_deref()) {
            Ok(original) => original.map(|o| match &price {
                Some(p) => Price::new(o.minor_units, p.currency.clone()),
                None => o,
            }),
            Err(e) => {
                debug!("Ignoring original_price from {}: {}", source_url, e);
                None
            }
        };
        let discount_percentage = discount(price.as_ref(), original_price.as_ref()).or_else(|| {
            raw.get("discount_percentage")
                .and_then(Value::as_f64)
                .filter(|d| (0.0..=100.0).contains(d))
        });

        // An unmatched hint is `Other`; the name is only consulted without one.
        let category = match raw.text("category") {
            Some(hint) => categorize(hint),
            None => categorize(&name),
        };

        let availability = match raw.text("availability").or_else(|| raw.text("availability_status")) {
            Some(text) => classify_availability(text),
            None => match raw.get("in_stock") {
                Some(Value::Bool(true)) => Availability::InStock,
                Some(Value::Bool(false)) => Availability::OutOfStock,
                _ => Availability::Unknown,
            },
        };

        let item = Item {
            name,
            brand,
            model,
            category,
            price,
            original_price,
            discount_percentage,
            availability,
            specifications: raw
                .get("specifications")
                .map(normalize_specifications)
                .unwrap_or_default(),
            image_urls: collect_image_urls(raw),
            rating: raw.get("rating").and_then(parse_rating),
            review_count: raw.get("review_count").and_then(parse_count),
            description: raw
                .text("description")
                .or_else(|| raw.text("short_description"))
                .map(collapse_whitespace),
            key_features: string_list(raw.get("key_features")),
            tags: string_list(raw.get("tags")),
            source_domain: raw
                .text("source_domain")
                .map(str::to_lowercase)
                .unwrap_or_else(|| domain_of(&source_url)),
            spider_name: raw.text("spider_name").map(str::to_string),
            crawl_id: raw.text("crawl_id").map(str::to_string),
            source_url,
            scraped_at: parse_timestamp(raw.get("scraped_timestamp")),
            quality_score: 0.0,
            low_quality: false,
            quality_issues: Vec::new(),
        };
        trace!("Normalized item from {}: {:?}", item.source_url, item);
        Ok(item)
    }

    fn parse_money(
        &self,
        value: Option<&Value>,
        currency: Option<&str>,
    ) -> Result<Option<Price>, PipelineError> {
        let parsed = match value {
            Some(value) => parse_price_value(value)?,
            None => return Ok(None),
        };
        Ok(parsed.map(|(minor_units, symbol_currency)| {
            let currency = currency
                .or(symbol_currency)
                .unwrap_or(self.default_currency.as_str());
            Price::new(minor_units, currency)
        }))
    }
}

fn discount(price: Option<&Price>, original: Option<&Price>) -> Option<f64> {
    let (price, original) = (price?, original?);
    if original.minor_units <= price.minor_units {
        return None;
    }
    let off = (original.minor_units - price.minor_units) as f64 / original.minor_units as f64;
    Some((off * 10_000.0).round() / 100.0)
}

fn domain_of(source_url: &str) -> String {
    Url::parse(source_url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_lowercase))
        .unwrap_or_default()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    let values: Vec<&str> = match value {
        Some(Value::Array(values)) => values.iter().filter_map(Value::as_str).collect(),
        Some(Value::String(s)) => vec![s.as_str()],
        _ => Vec::new(),
    };
    let mut list: Vec<String> = Vec::with_capacity(values.len());
    for entry in values.into_iter().map(collapse_whitespace) {
        if !entry.is_empty() && !list.contains(&entry) {
            list.push(entry);
        }
    }
    list
}

// "1,234 ratings" -> 1234
fn parse_count(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => {
            let digits: String = s
                .chars()
                .filter(|c| *c != ',')
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses a raw price value into minor units plus the currency implied by
/// its symbol, if any. Absent or blank prices yield `Ok(None)`.
pub fn parse_price_value(value: &Value) -> Result<Option<(i64, Option<&'static str>)>, PipelineError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => {
            let amount = n.as_f64().unwrap_or(-1.0);
            let minor = (amount * 100.0).round();
            if !amount.is_finite() || amount < 0.0 || minor >= i64::MAX as f64 {
                return Err(PipelineError::MalformedPrice { raw: n.to_string() });
            }
            Ok(Some((minor as i64, None)))
        }
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => parse_price(s).map(Some),
        other => Err(PipelineError::MalformedPrice {
            raw: other.to_string(),
        }),
    }
}

/// Parses price text such as `"$1,299.99"`, `"599.99 €"` or `"USD 40"`.
pub fn parse_price(text: &str) -> Result<(i64, Option<&'static str>), PipelineError> {
    let malformed = || PipelineError::MalformedPrice {
        raw: text.to_string(),
    };

    let mut currency = None;
    let mut residual = String::with_capacity(text.len());
    for c in text.chars() {
        if let Some((_, code)) = CURRENCY_SYMBOLS.iter().find(|(sym, _)| *sym == c) {
            currency.get_or_insert(*code);
        } else if c != ',' && !c.is_whitespace() {
            residual.push(c);
        }
    }

    let mut digits = residual.as_str();
    for code in CURRENCY_CODES {
        let stripped = strip_prefix_ignore_case(digits, code)
            .or_else(|| strip_suffix_ignore_case(digits, code));
        if let Some(rest) = stripped {
            digits = rest;
            currency.get_or_insert(if *code == "US" { "USD" } else { *code });
        }
    }

    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty())
        || !all_digits(int_part)
        || !all_digits(frac_part)
    {
        debug!("Rejecting price text {:?} (residual {:?})", text, digits);
        return Err(malformed());
    }

    let whole: i64 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| malformed())?
    };
    let frac_bytes = frac_part.as_bytes();
    let digit = |i: usize| frac_bytes.get(i).map(|b| (b - b'0') as i64).unwrap_or(0);
    let mut cents = digit(0) * 10 + digit(1);
    if digit(2) >= 5 {
        cents += 1;
    }

    let minor_units = whole
        .checked_mul(100)
        .and_then(|w| w.checked_add(cents))
        .ok_or_else(malformed)?;
    Ok((minor_units, currency))
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    let split = s.len().checked_sub(suffix.len())?;
    let tail = s.get(split..)?;
    tail.eq_ignore_ascii_case(suffix).then(|| &s[..split])
}

fn keyword_matches(text: &str, keyword: &str) -> bool {
    // Short keywords only match at the start of a word ("ddr5", not "ladder").
    if keyword.len() <= 3 {
        text.split(|c: char| !c.is_alphanumeric())
            .any(|word| word.starts_with(keyword))
    } else {
        text.contains(keyword)
    }
}

/// Maps free-text category hints (or product titles) to a [`Category`].
pub fn categorize(text: &str) -> Category {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return Category::Other;
    }
    for (category, keywords) in CATEGORY_KEYWORDS {
        if lower == category.as_str().to_lowercase() || keywords.contains(&lower.as_str()) {
            return *category;
        }
    }
    for (category, keywords) in CATEGORY_KEYWORDS {
        if keywords.iter().any(|k| keyword_matches(&lower, k)) {
            return *category;
        }
    }
    Category::Other
}

/// Maps availability text to an [`Availability`].
pub fn classify_availability(text: &str) -> Availability {
    let lower = text.to_lowercase();
    AVAILABILITY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(availability, _)| *availability)
        .unwrap_or(Availability::Unknown)
}

fn normalize_specifications(value: &Value) -> BTreeMap<String, String> {
    let mut specs = BTreeMap::new();
    if let Value::Object(map) = value {
        for (key, value) in map {
            let key = key.trim().to_lowercase();
            let value = match value {
                Value::String(s) => s.trim().to_string(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            if !key.is_empty() && !value.is_empty() {
                specs.insert(key, value);
            }
        }
    }
    specs
}

fn collect_image_urls(raw: &RawItem) -> Vec<String> {
    let mut urls: Vec<String> = match raw.get("image_urls") {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    };
    if let Some(primary) = raw.text("primary_image") {
        if !urls.iter().any(|u| u == primary) {
            urls.insert(0, primary.to_string());
        }
    }
    urls
}

fn parse_rating(value: &Value) -> Option<f64> {
    let rating = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            // First number in text like "4.5 out of 5 stars".
            let start = s.find(|c: char| c.is_ascii_digit())?;
            let number: String = s[start..]
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            number.trim_end_matches('.').parse().ok()?
        }
        _ => return None,
    };
    (0.0..=5.0).contains(&rating).then_some(rating)
}

fn parse_timestamp(value: Option<&Value>) -> i64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f.floor() as i64)),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f.floor() as i64))
                .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.timestamp()))
        }
        _ => None,
    };
    parsed.unwrap_or_else(|| {
        debug!("No usable scraped_timestamp, using current time");
        Utc::now().timestamp()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw() -> RawItem {
        RawItem::new()
            .with("source_url", "https://shop.example/p/rtx-4070")
            .with("scraped_timestamp", 1_700_000_000)
    }

    #[test]
    fn symbol_placement_does_not_change_price() {
        let expected = 59999;
        for text in ["$599.99", "599.99$", "$ 599.99", "599.99 $", "US$599.99", "599.99 USD"] {
            let (minor, currency) = parse_price(text).unwrap();
            assert_eq!(minor, expected, "price text {:?}", text);
            if text.contains('$') {
                assert_eq!(currency, Some("USD"));
            }
        }
        assert_eq!(parse_price("599.99 €").unwrap(), (59999, Some("EUR")));
    }

    #[test]
    fn thousands_separators_and_precision() {
        assert_eq!(parse_price("$1,299.99").unwrap().0, 129999);
        assert_eq!(parse_price("£40").unwrap(), (4000, Some("GBP")));
        assert_eq!(parse_price("40 eur").unwrap(), (4000, Some("EUR")));
        assert_eq!(parse_price(".5").unwrap().0, 50);
        assert_eq!(parse_price("10.005").unwrap().0, 1001);
        assert_eq!(parse_price("10.004").unwrap().0, 1000);
    }

    #[test]
    fn malformed_prices_are_rejected() {
        for text in ["call for price", "-5.00", "$", "1.2.3", "12a"] {
            assert!(
                matches!(parse_price(text), Err(PipelineError::MalformedPrice { .. })),
                "expected failure for {:?}",
                text
            );
        }
        assert!(parse_price_value(&json!(-1.5)).is_err());
        assert_eq!(parse_price_value(&json!(12.5)).unwrap(), Some((1250, None)));
        assert_eq!(parse_price_value(&json!("")).unwrap(), None);
    }

    #[test]
    fn categories_from_hints_and_titles() {
        assert_eq!(categorize("Graphics Card"), Category::Gpu);
        assert_eq!(categorize("gpu"), Category::Gpu);
        assert_eq!(categorize("Desktop Processors"), Category::Cpu);
        assert_eq!(categorize("DDR5 Memory Kit"), Category::Ram);
        assert_eq!(categorize("NVMe SSD"), Category::Storage);
        assert_eq!(categorize("ATX Motherboard"), Category::Motherboard);
        assert_eq!(categorize("RTX 4070 12GB GDDR6X"), Category::Gpu);
        assert_eq!(categorize("Office Chair"), Category::Other);
        assert_eq!(categorize(""), Category::Other);
    }

    #[test]
    fn availability_keyword_table() {
        assert_eq!(classify_availability("In Stock"), Availability::InStock);
        assert_eq!(classify_availability("Available now"), Availability::InStock);
        assert_eq!(classify_availability("Currently unavailable"), Availability::OutOfStock);
        assert_eq!(classify_availability("SOLD OUT"), Availability::OutOfStock);
        assert_eq!(classify_availability("Pre-order today"), Availability::PreOrder);
        assert_eq!(classify_availability("Ships in 3 weeks"), Availability::Unknown);
    }

    #[test]
    fn normalizes_full_record() {
        let item = Normalizer::new()
            .normalize(
                &raw()
                    .with("name", "  RTX   4070 ")
                    .with("brand", "NVIDIA")
                    .with("price", "$599.99")
                    .with("category", "Graphics Card")
                    .with("availability", "In Stock")
                    .with("rating", "4.5 out of 5 stars")
                    .with("image_urls", json!(["https://img.example/1.jpg", ""]))
                    .with(
                        "specifications",
                        json!({" Memory ": " 12 GB ", "Boost Clock": "2475 MHz", "Notes": "  "}),
                    ),
            )
            .unwrap();

        assert_eq!(item.name, "RTX 4070");
        assert_eq!(item.price, Some(Price::new(59999, "USD")));
        assert_eq!(item.category, Category::Gpu);
        assert_eq!(item.availability, Availability::InStock);
        assert_eq!(item.rating, Some(4.5));
        assert_eq!(item.image_urls, vec!["https://img.example/1.jpg".to_string()]);
        assert_eq!(item.specifications.len(), 2);
        assert_eq!(item.specifications["memory"], "12 GB");
        assert_eq!(item.specifications["boost clock"], "2475 MHz");
        assert_eq!(item.scraped_at, 1_700_000_000);
    }

    #[test]
    fn explicit_currency_overrides_symbol() {
        let item = Normalizer::new()
            .normalize(&raw().with("price", "$100").with("currency", "cad"))
            .unwrap();
        assert_eq!(item.price.unwrap().currency, "CAD");
    }

    #[test]
    fn falls_back_to_name_for_category_and_flag_for_stock() {
        let item = Normalizer::new()
            .normalize(
                &raw()
                    .with("name", "Samsung 990 PRO NVMe SSD 2TB")
                    .with("in_stock", false),
            )
            .unwrap();
        assert_eq!(item.category, Category::Storage);
        assert_eq!(item.availability, Availability::OutOfStock);
    }

    #[test]
    fn timestamps_in_several_shapes() {
        assert_eq!(parse_timestamp(Some(&json!(1700000000.9))), 1_700_000_000);
        assert_eq!(parse_timestamp(Some(&json!("1700000000"))), 1_700_000_000);
        assert_eq!(
            parse_timestamp(Some(&json!("2023-11-14T22:13:20Z"))),
            1_700_000_000
        );
        assert!(parse_timestamp(None) > 1_700_000_000);
    }

    #[test]
    fn out_of_range_rating_is_dropped() {
        assert_eq!(parse_rating(&json!(7.0)), None);
        assert_eq!(parse_rating(&json!("3 out of 5")), Some(3.0));
        assert_eq!(parse_rating(&json!("no reviews")), None);
    }

    #[test]
    fn malformed_price_fails_the_item() {
        let result = Normalizer::new().normalize(&raw().with("price", "free-ish"));
        assert!(matches!(result, Err(PipelineError::MalformedPrice { .. })));
    }

    #[test]
    fn unmatched_category_hint_is_other() {
        let item = Normalizer::new()
            .normalize(
                &raw()
                    .with("name", "RTX 4070 mounting bracket")
                    .with("category", "Accessories"),
            )
            .unwrap();
        assert_eq!(item.category, Category::Other);
    }

    #[test]
    fn oversized_numeric_price_is_malformed() {
        assert!(matches!(
            parse_price_value(&json!(1e20)),
            Err(PipelineError::MalformedPrice { .. })
        ));
        assert_eq!(
            parse_price_value(&json!(1_000_000.0)).unwrap(),
            Some((100_000_000, None))
        );
    }

    #[test]
    fn listing_metadata_is_carried() {
        let item = Normalizer::new()
            .normalize(
                &raw()
                    .with("name", "RTX 4070")
                    .with("price", "$549.99")
                    .with("original_price", "$599.99")
                    .with("review_count", "1,234 ratings")
                    .with("description", "  Ada   Lovelace\n architecture ")
                    .with("key_features", json!(["DLSS 3", " DLSS 3 ", "", "12GB GDDR6X"]))
                    .with("tags", "gaming")
                    .with("spider_name", "newegg")
                    .with("crawl_id", "8b0c"),
            )
            .unwrap();

        assert_eq!(item.original_price, Some(Price::new(59999, "USD")));
        assert_eq!(item.discount_percentage, Some(8.33));
        assert_eq!(item.review_count, Some(1234));
        assert_eq!(item.description.as_deref(), Some("Ada Lovelace architecture"));
        assert_eq!(item.key_features, vec!["DLSS 3".to_string(), "12GB GDDR6X".to_string()]);
        assert_eq!(item.tags, vec!["gaming".to_string()]);
        assert_eq!(item.source_domain, "shop.example");
        assert_eq!(item.spider_name.as_deref(), Some("newegg"));
        assert_eq!(item.crawl_id.as_deref(), Some("8b0c"));
    }

    #[test]
    fn bad_list_price_keeps_the_item() {
        let item = Normalizer::new()
            .normalize(
                &raw()
                    .with("price", "$10")
                    .with("original_price", "was a lot")
                    .with("discount_percentage", 15.0)
                    .with("source_domain", "Shop.Example"),
            )
            .unwrap();
        assert_eq!(item.original_price, None);
        assert_eq!(item.discount_percentage, Some(15.0));
        assert_eq!(item.source_domain, "shop.example");
    }
}
