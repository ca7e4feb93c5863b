//! Parser trait abstraction
//!
//! Export formats implement [`ExportParser`] so the loader can stay
//! format-agnostic.
//!
//! Parse failures for individual conversation records are recorded as
//! warnings and skipped; only unreadable or non-JSON files are errors.

use crate::error::Result;
use crate::types::Conversation;
use std::path::Path;

/// Result of parsing one export file.
#[derive(Debug, Default)]
pub struct ParseResult {
    /// Conversations that normalized cleanly, in file order
    pub conversations: Vec<Conversation>,
    /// Warnings encountered during parsing (non-fatal)
    pub warnings: Vec<String>,
}

/// Context passed to a parser.
pub struct ParseContext<'a> {
    /// Path of the file being parsed, for messages
    pub path: &'a Path,
    /// Full file contents
    pub content: &'a str,
}

/// Trait implemented by all export parsers.
pub trait ExportParser: Send + Sync {
    /// Short format name used in logs and errors
    fn name(&self) -> &'static str;

    /// Glob patterns (relative to an export directory) this parser reads
    fn source_patterns(&self) -> Vec<&'static str>;

    /// Parse one file's contents.
    fn parse(&self, ctx: &ParseContext) -> Result<ParseResult>;
}
