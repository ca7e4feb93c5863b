//! Analytics module for convcost
//!
//! Provides token and cost accounting for exported conversations:
//! - Tokenizer adapters behind the [`TokenCounter`] trait
//! - Content extraction and thread linearization
//! - The turn/cost [`AccrualEngine`] (detailed and simple modes)
//! - Report aggregation and export
//! - Conversation filters and browse queries
//!
//! See [`engine`] for the accrual rules and [`report`] for aggregation.

pub mod browse;
pub mod engine;
pub mod extract;
pub mod filter;
pub mod pricing;
pub mod report;
pub mod thread;
pub mod tokenizer;

// Engine exports
pub use engine::{
    AccrualEngine, AnalysisFailure, AnalysisResult, DetailedAnalysis, Outcome, SimpleAnalysis,
    TurnRecord,
};

// Building blocks
pub use extract::{ContentExtractor, Extraction};
pub use filter::Filters;
pub use pricing::{model_label, CostTable, ModelRates, RateLookup, RateResolver, RateSource};
pub use report::{build_report, Report, Summary};
pub use thread::{count_real_turns, linearize};
pub use tokenizer::{CounterKind, Encoding, TiktokenCounter, TokenCounter, WordCounter};
