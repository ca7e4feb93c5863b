//! Token counting
//!
//! [`TokenCounter`] is the seam between the accrual engine and a concrete
//! tokenizer. [`TiktokenCounter`] resolves a BPE encoding from the message's
//! model slug; [`WordCounter`] is a dependency-free approximation.
//!
//! Counting never fails from the caller's point of view: [`tokens_for`]
//! turns any tokenizer error into zero tokens for that fragment and logs it.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::OnceLock;
use tiktoken_rs::tokenizer::{get_tokenizer, Tokenizer};
use tiktoken_rs::CoreBPE;

/// Counts tokens in a text fragment.
pub trait TokenCounter: Send + Sync {
    /// Number of tokens in `text` under the scheme used for `model_slug`.
    fn count(&self, text: &str, model_slug: Option<&str>) -> Result<usize>;
}

/// Token count for one fragment; 0 for empty text or on tokenizer failure.
pub fn tokens_for(counter: &dyn TokenCounter, text: &str, model_slug: Option<&str>) -> u64 {
    if text.is_empty() {
        return 0;
    }
    match counter.count(text, model_slug) {
        Ok(n) => n as u64,
        Err(e) => {
            tracing::warn!(
                model = model_slug.unwrap_or("-"),
                error = %e,
                preview = %crate::format::truncate(text, 100),
                "Tokenizer failed, counting fragment as 0 tokens"
            );
            0
        }
    }
}

// ============================================
// Encodings
// ============================================

/// BPE encodings we can load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    #[default]
    Cl100kBase,
    O200kBase,
    P50kBase,
    R50kBase,
}

impl Encoding {
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Cl100kBase => "cl100k_base",
            Encoding::O200kBase => "o200k_base",
            Encoding::P50kBase => "p50k_base",
            Encoding::R50kBase => "r50k_base",
        }
    }

    /// Shared encoder, built on first use.
    fn bpe(self) -> Result<&'static CoreBPE> {
        static CL100K: OnceLock<std::result::Result<CoreBPE, String>> = OnceLock::new();
        static O200K: OnceLock<std::result::Result<CoreBPE, String>> = OnceLock::new();
        static P50K: OnceLock<std::result::Result<CoreBPE, String>> = OnceLock::new();
        static R50K: OnceLock<std::result::Result<CoreBPE, String>> = OnceLock::new();

        let cell = match self {
            Encoding::Cl100kBase => &CL100K,
            Encoding::O200kBase => &O200K,
            Encoding::P50kBase => &P50K,
            Encoding::R50kBase => &R50K,
        };
        cell.get_or_init(|| {
            tracing::debug!(encoding = self.name(), "Loading tokenizer encoding");
            let built = match self {
                Encoding::Cl100kBase => tiktoken_rs::cl100k_base(),
                Encoding::O200kBase => tiktoken_rs::o200k_base(),
                Encoding::P50kBase => tiktoken_rs::p50k_base(),
                Encoding::R50kBase => tiktoken_rs::r50k_base(),
            };
            built.map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(|e| Error::Tokenizer(format!("failed to load {}: {}", self.name(), e)))
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "cl100k_base" => Ok(Encoding::Cl100kBase),
            "o200k_base" => Ok(Encoding::O200kBase),
            "p50k_base" => Ok(Encoding::P50kBase),
            "r50k_base" => Ok(Encoding::R50kBase),
            _ => Err(format!("unknown encoding: {}", s)),
        }
    }
}

// ============================================
// Tiktoken
// ============================================

/// Tokenizer backed by tiktoken encodings.
///
/// Slug resolution: alias table, then tiktoken's model table, then the
/// default encoding. Reserved markers such as `<|endoftext|>` are encoded
/// as ordinary text.
#[derive(Debug, Clone)]
pub struct TiktokenCounter {
    default: Encoding,
    aliases: Vec<(String, String)>,
}

impl Default for TiktokenCounter {
    fn default() -> Self {
        Self::new(Encoding::default())
    }
}

impl TiktokenCounter {
    pub fn new(default: Encoding) -> Self {
        Self {
            default,
            aliases: vec![("o3".to_string(), "gpt-4o".to_string())],
        }
    }

    /// Tokenize `slug` as if it were `model`.
    pub fn with_alias(mut self, slug: impl Into<String>, model: impl Into<String>) -> Self {
        self.aliases.push((slug.into(), model.into()));
        self
    }

    pub fn encoding_for(&self, model_slug: Option<&str>) -> Encoding {
        let Some(slug) = model_slug.filter(|s| !s.is_empty()) else {
            return self.default;
        };
        let model = self
            .aliases
            .iter()
            .find(|(alias, _)| alias == slug)
            .map(|(_, target)| target.as_str())
            .unwrap_or(slug);

        match get_tokenizer(model) {
            Some(Tokenizer::O200kBase) => Encoding::O200kBase,
            Some(Tokenizer::Cl100kBase) => Encoding::Cl100kBase,
            Some(Tokenizer::P50kBase) => Encoding::P50kBase,
            Some(Tokenizer::R50kBase) => Encoding::R50kBase,
            _ => self.default,
        }
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str, model_slug: Option<&str>) -> Result<usize> {
        let encoding = self.encoding_for(model_slug);
        let bpe = encoding.bpe()?;
        catch_unwind(AssertUnwindSafe(|| bpe.encode_ordinary(text).len()))
            .map_err(|_| Error::Tokenizer(format!("{} encoder panicked", encoding)))
    }
}

// ============================================
// Word approximation
// ============================================

/// Counts whitespace-separated words. Model slug is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn count(&self, text: &str, _model_slug: Option<&str>) -> Result<usize> {
        Ok(text.split_whitespace().count())
    }
}

/// Which counter the engine builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterKind {
    #[default]
    Tiktoken,
    Words,
}

impl CounterKind {
    pub fn build(self, default_encoding: Encoding) -> Box<dyn TokenCounter> {
        match self {
            CounterKind::Tiktoken => Box::new(TiktokenCounter::new(default_encoding)),
            CounterKind::Words => Box::new(WordCounter),
        }
    }
}
