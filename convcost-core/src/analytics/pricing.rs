//! Model rates and rate resolution
//!
//! A [`CostTable`] maps model keys to per-million-token rates and keeps its
//! entries in declaration order ("first entry" is a fallback step).
//! [`RateResolver`] walks an explicit list of [`RateLookup`] steps and
//! returns the first hit; both calculation modes share it.

use crate::error::{Error, Result};
use crate::types::Message;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Rates for one model, in dollars per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRates {
    pub input_cost_per_million_tokens: f64,
    pub output_cost_per_million_tokens: f64,
}

impl ModelRates {
    pub const fn new(input: f64, output: f64) -> Self {
        Self {
            input_cost_per_million_tokens: input,
            output_cost_per_million_tokens: output,
        }
    }
}

/// Dollars for `tokens` at `rate_per_million`.
pub fn cost_for(tokens: f64, rate_per_million: f64) -> f64 {
    tokens / 1_000_000.0 * rate_per_million
}

/// Built-in rates, in fallback order.
const BUILTIN_RATES: &[(&str, f64, f64)] = &[
    ("gpt-4o", 2.5, 10.0),
    ("research", 10.0, 40.0),
    ("o3", 10.0, 40.0),
    ("o1-pro", 150.0, 600.0),
    ("gpt-4-5", 75.0, 150.0),
    ("o1", 15.0, 60.0),
    ("o1-preview", 15.0, 60.0),
];

// ============================================
// Cost table
// ============================================

/// Ordered model → rates table.
#[derive(Debug, Clone, PartialEq)]
pub struct CostTable {
    entries: Vec<(String, ModelRates)>,
}

impl Default for CostTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CostTable {
    pub fn empty() -> Self {
        Self { entries: vec![] }
    }

    /// The built-in default rates.
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN_RATES
                .iter()
                .map(|&(name, input, output)| (name.to_string(), ModelRates::new(input, output)))
                .collect(),
        }
    }

    /// Insert or replace; a replaced key keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, rates: ModelRates) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = rates,
            None => self.entries.push((key, rates)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ModelRates> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, r)| r)
    }

    pub fn first(&self) -> Option<(&str, &ModelRates)> {
        self.entries.first().map(|(k, r)| (k.as_str(), r))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ModelRates)> {
        self.entries.iter().map(|(k, r)| (k.as_str(), r))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rejects negative or non-finite rates.
    pub fn validate(&self) -> Result<()> {
        for (key, rates) in &self.entries {
            for (field, value) in [
                ("input_cost_per_million_tokens", rates.input_cost_per_million_tokens),
                ("output_cost_per_million_tokens", rates.output_cost_per_million_tokens),
            ] {
                if !value.is_finite() || value < 0.0 {
                    return Err(Error::Config(format!(
                        "pricing.models.{}.{} must be a non-negative number, got {}",
                        key, field, value
                    )));
                }
            }
        }
        Ok(())
    }

    /// Load a standalone JSON cost file (`{"model": {rates}, ...}`).
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read cost file {:?}: {}", path, e))
        })?;
        let table: CostTable = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse cost file {:?}: {}", path, e)))?;
        table.validate()?;
        Ok(table)
    }
}

impl<'de> Deserialize<'de> for CostTable {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = CostTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of model name to rates")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<CostTable, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut table = CostTable::empty();
                while let Some((key, rates)) = map.next_entry::<String, ModelRates>()? {
                    table.insert(key, rates);
                }
                Ok(table)
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

impl Serialize for CostTable {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, rates) in &self.entries {
            map.serialize_entry(key, rates)?;
        }
        map.end()
    }
}

// ============================================
// Resolution
// ============================================

/// One step of the rate fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLookup {
    /// The message's own model slug (skipped when there is none)
    ExactSlug,
    /// A fixed key in the table
    Named(String),
    /// Whatever the table lists first
    FirstEntry,
    /// A key in the built-in table
    Builtin(String),
}

/// Which step produced the rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    ExactSlug,
    Named,
    FirstEntry,
    Builtin,
}

/// Rates plus the key they were found under.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRates {
    pub key: String,
    pub rates: ModelRates,
    pub source: RateSource,
}

/// Walks a [`RateLookup`] chain over a cost table.
#[derive(Debug, Clone)]
pub struct RateResolver {
    table: CostTable,
    chain: Vec<RateLookup>,
}

impl Default for RateResolver {
    fn default() -> Self {
        Self::new(
            CostTable::builtin(),
            vec![
                RateLookup::ExactSlug,
                RateLookup::Named("o3".to_string()),
                RateLookup::FirstEntry,
                RateLookup::Builtin("o3".to_string()),
            ],
        )
    }
}

impl RateResolver {
    pub fn new(table: CostTable, chain: Vec<RateLookup>) -> Self {
        Self { table, chain }
    }

    pub fn table(&self) -> &CostTable {
        &self.table
    }

    pub fn chain(&self) -> &[RateLookup] {
        &self.chain
    }

    /// First hit along the chain, or `None` for a configuration gap.
    pub fn resolve(&self, model_slug: Option<&str>) -> Option<ResolvedRates> {
        self.chain.iter().find_map(|step| match step {
            RateLookup::ExactSlug => {
                let slug = model_slug?;
                self.table.get(slug).map(|rates| ResolvedRates {
                    key: slug.to_string(),
                    rates: *rates,
                    source: RateSource::ExactSlug,
                })
            }
            RateLookup::Named(key) => self.table.get(key).map(|rates| ResolvedRates {
                key: key.clone(),
                rates: *rates,
                source: RateSource::Named,
            }),
            RateLookup::FirstEntry => self.table.first().map(|(key, rates)| ResolvedRates {
                key: key.to_string(),
                rates: *rates,
                source: RateSource::FirstEntry,
            }),
            RateLookup::Builtin(key) => {
                let builtin = BUILTIN_RATES.iter().find(|(name, _, _)| name == key)?;
                Some(ResolvedRates {
                    key: key.clone(),
                    rates: ModelRates::new(builtin.1, builtin.2),
                    source: RateSource::Builtin,
                })
            }
        })
    }

    /// Key reported when nothing resolves: the first named step, else the slug.
    pub fn attempted_key(&self, model_slug: Option<&str>) -> String {
        self.chain
            .iter()
            .find_map(|step| match step {
                RateLookup::Named(key) | RateLookup::Builtin(key) => Some(key.clone()),
                _ => None,
            })
            .or_else(|| model_slug.map(String::from))
            .unwrap_or_else(|| "unknown".to_string())
    }
}

// ============================================
// Model labels
// ============================================

/// Display label for the model behind a message.
///
/// Independent of which rates were charged.
pub fn model_label(message: &Message) -> String {
    let metadata = &message.metadata;
    if let Some(slug) = &metadata.model_slug {
        return slug.clone();
    }
    if let Some(default_slug) = &metadata.default_model_slug {
        return format!("{} (default)", default_slug);
    }
    if metadata.has_finish_details {
        return "Unknown API Model".to_string();
    }
    match message.recipient.as_deref() {
        Some(recipient) if !recipient.is_empty() && recipient != "all" => {
            format!("Tool: {}", recipient)
        }
        _ => "N/A".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Author, ContentBlock, MessageMetadata, Role};

    fn message(metadata: MessageMetadata, recipient: Option<&str>) -> Message {
        Message {
            author: Author {
                role: Role::Assistant,
                name: None,
            },
            content: ContentBlock::default(),
            metadata,
            recipient: recipient.map(String::from),
            end_turn: None,
            create_time: None,
        }
    }

    #[test]
    fn test_builtin_table_order() {
        let table = CostTable::builtin();
        let keys: Vec<&str> = table.keys().collect();
        assert_eq!(
            keys,
            vec!["gpt-4o", "research", "o3", "o1-pro", "gpt-4-5", "o1", "o1-preview"]
        );
        assert_eq!(table.get("o1-pro"), Some(&ModelRates::new(150.0, 600.0)));
    }

    #[test]
    fn test_resolver_chain() {
        let resolver = RateResolver::default();

        let exact = resolver.resolve(Some("gpt-4o")).unwrap();
        assert_eq!(exact.key, "gpt-4o");
        assert_eq!(exact.source, RateSource::ExactSlug);

        let fallback = resolver.resolve(Some("unknown-model")).unwrap();
        assert_eq!(fallback.key, "o3");
        assert_eq!(fallback.rates, ModelRates::new(10.0, 40.0));
        assert_eq!(fallback.source, RateSource::Named);

        let no_slug = resolver.resolve(None).unwrap();
        assert_eq!(no_slug.key, "o3");
    }

    #[test]
    fn test_resolver_first_entry_then_builtin() {
        let mut table = CostTable::empty();
        table.insert("cheap", ModelRates::new(1.0, 2.0));
        let chain = vec![
            RateLookup::ExactSlug,
            RateLookup::Named("o3".to_string()),
            RateLookup::FirstEntry,
            RateLookup::Builtin("o3".to_string()),
        ];

        let resolver = RateResolver::new(table, chain.clone());
        let resolved = resolver.resolve(Some("gpt-4o")).unwrap();
        assert_eq!(resolved.key, "cheap");
        assert_eq!(resolved.source, RateSource::FirstEntry);

        let resolver = RateResolver::new(CostTable::empty(), chain);
        let resolved = resolver.resolve(Some("gpt-4o")).unwrap();
        assert_eq!(resolved.source, RateSource::Builtin);
        assert_eq!(resolved.rates, ModelRates::new(10.0, 40.0));
    }

    #[test]
    fn test_resolver_gap() {
        let resolver = RateResolver::new(
            CostTable::empty(),
            vec![RateLookup::ExactSlug, RateLookup::Named("o3".to_string())],
        );
        assert!(resolver.resolve(Some("gpt-4o")).is_none());
        assert_eq!(resolver.attempted_key(Some("gpt-4o")), "o3");

        let resolver = RateResolver::new(CostTable::empty(), vec![RateLookup::ExactSlug]);
        assert_eq!(resolver.attempted_key(Some("gpt-4o")), "gpt-4o");
        assert_eq!(resolver.attempted_key(None), "unknown");
    }

    #[test]
    fn test_table_deserialize_keeps_order_and_validates() {
        let json = r#"{
            "zeta": {"input_cost_per_million_tokens": 1.0, "output_cost_per_million_tokens": 2.0},
            "alpha": {"input_cost_per_million_tokens": 3.0, "output_cost_per_million_tokens": 4.0}
        }"#;
        let table: CostTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.first().unwrap().0, "zeta");
        assert!(table.validate().is_ok());

        let bad: CostTable = serde_json::from_str(
            r#"{"x": {"input_cost_per_million_tokens": -1.0, "output_cost_per_million_tokens": 2.0}}"#,
        )
        .unwrap();
        assert!(bad.validate().is_err());

        let roundtrip = serde_json::to_string(&table).unwrap();
        assert!(roundtrip.find("zeta").unwrap() < roundtrip.find("alpha").unwrap());
    }

    #[test]
    fn test_cost_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("costs.json");
        std::fs::write(
            &path,
            r#"{"custom": {"input_cost_per_million_tokens": 5.0, "output_cost_per_million_tokens": 6.0}}"#,
        )
        .unwrap();
        let table = CostTable::from_json_file(&path).unwrap();
        assert_eq!(table.get("custom"), Some(&ModelRates::new(5.0, 6.0)));

        std::fs::write(&path, r#"{"custom": {"input_cost_per_million_tokens": 5.0}}"#).unwrap();
        assert!(matches!(
            CostTable::from_json_file(&path),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_model_label_chain() {
        let slug = MessageMetadata {
            model_slug: Some("gpt-4o".to_string()),
            default_model_slug: Some("o3".to_string()),
            has_finish_details: true,
        };
        assert_eq!(model_label(&message(slug, Some("python"))), "gpt-4o");

        let default_only = MessageMetadata {
            default_model_slug: Some("o3".to_string()),
            ..Default::default()
        };
        assert_eq!(model_label(&message(default_only, None)), "o3 (default)");

        let finish = MessageMetadata {
            has_finish_details: true,
            ..Default::default()
        };
        assert_eq!(model_label(&message(finish, Some("python"))), "Unknown API Model");

        assert_eq!(
            model_label(&message(MessageMetadata::default(), Some("python"))),
            "Tool: python"
        );
        assert_eq!(model_label(&message(MessageMetadata::default(), Some("all"))), "N/A");
        assert_eq!(model_label(&message(MessageMetadata::default(), None)), "N/A");
    }

    #[test]
    fn test_cost_for() {
        assert!((cost_for(1_000_000.0, 2.5) - 2.5).abs() < 1e-12);
        assert_eq!(cost_for(0.0, 40.0), 0.0);
    }
}
