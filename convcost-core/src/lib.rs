//! # convcost-core
//!
//! Core library for convcost - a token and cost analyzer for exported
//! chat conversations.
//!
//! This library provides:
//! - Domain types for conversations, message trees, and content
//! - Export loading and normalization
//! - Token counting, cost accrual, and report aggregation
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Pipeline
//!
//! Data flows through three stages:
//! - **Ingest:** export files on disk are parsed into normalized [`Conversation`]s
//! - **Analyze:** each conversation is linearized and costed into an `AnalysisResult`
//! - **Report:** results are folded into summaries, model and day breakdowns
//!
//! ## Example
//!
//! ```rust,no_run
//! use convcost_core::analytics::{build_report, Filters};
//! use convcost_core::{AccrualEngine, Config, ExportLoader};
//! use std::path::Path;
//!
//! let config = Config::load().expect("failed to load config");
//! let loaded = ExportLoader::new()
//!     .load(Path::new("conversations.json"))
//!     .expect("failed to load export");
//!
//! let engine = AccrualEngine::from_config(&config);
//! let results = engine.analyze_all(&loaded.conversations, config.analysis.mode);
//! let report = build_report(
//!     &results,
//!     config.analysis.mode,
//!     &Filters::default(),
//!     engine.resolver().table(),
//!     false,
//! );
//! println!("{}", report);
//! ```

// Re-export commonly used items at the crate root
pub use analytics::AccrualEngine;
pub use config::Config;
pub use error::{Error, Result};
pub use ingest::{ExportLoader, LoadResult};
pub use types::*;

// Public modules
pub mod analytics;
pub mod config;
pub mod error;
pub mod format;
pub mod ingest;
pub mod logging;
pub mod types;
