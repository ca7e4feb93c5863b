//! Ingestion layer for export files
//!
//! Turns raw export files on disk into normalized [`Conversation`]s.
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │  Export Files   │ ──► │   ExportLoader   │ ──► │  Conversations  │
//! │ (*.json, dirs)  │     │                  │     │  (normalized)   │
//! └─────────────────┘     └──────────────────┘     └─────────────────┘
//!                               │
//!                               ▼
//!                    ┌──────────────────────┐
//!                    │  ExportParser        │
//!                    │  └─ ChatGptParser    │
//!                    └──────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use convcost_core::ingest::ExportLoader;
//! use std::path::Path;
//!
//! let loader = ExportLoader::new();
//! let result = loader.load(Path::new("conversations.json")).expect("load failed");
//! println!("Loaded {} conversations", result.conversations.len());
//! ```

mod parser;
pub mod parsers;

pub use parser::{ExportParser, ParseContext, ParseResult};

use crate::error::{Error, Result};
use crate::types::Conversation;
use std::path::{Path, PathBuf};

/// Result of loading an input path.
#[derive(Debug, Default)]
pub struct LoadResult {
    /// Number of files that parsed
    pub files_processed: usize,
    /// Conversations from every file, in file then record order
    pub conversations: Vec<Conversation>,
    /// Files that could not be read or parsed (file path → error message)
    pub errors: Vec<(PathBuf, String)>,
    /// Skipped records
    pub warnings: Vec<String>,
}

/// Loads export files through a parser.
pub struct ExportLoader {
    parser: Box<dyn ExportParser>,
}

impl Default for ExportLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportLoader {
    /// Create a loader for ChatGPT exports.
    pub fn new() -> Self {
        Self {
            parser: Box::new(parsers::ChatGptParser::new()),
        }
    }

    /// Create a loader with a custom parser.
    pub fn with_parser(parser: Box<dyn ExportParser>) -> Self {
        Self { parser }
    }

    /// Files to load for `input`: the file itself, or the directory's
    /// matching files in name order.
    pub fn discover_files(&self, input: &Path) -> Result<Vec<PathBuf>> {
        if input.is_file() {
            return Ok(vec![input.to_path_buf()]);
        }
        if !input.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("input not found: {}", input.display()),
            )));
        }

        let mut files = Vec::new();
        for pattern in self.parser.source_patterns() {
            let full_pattern = input.join(pattern);
            let pattern_str = full_pattern.to_string_lossy();

            let entries = glob::glob(&pattern_str).map_err(|e| Error::Parse {
                source_name: input.display().to_string(),
                message: format!("Invalid glob pattern: {}", e),
            })?;
            files.extend(entries.flatten().filter(|p| p.is_file()));
        }
        files.sort();
        files.dedup();

        tracing::info!(
            input = %input.display(),
            parser = self.parser.name(),
            count = files.len(),
            "Discovered export files"
        );
        Ok(files)
    }

    /// Load every export file under `input`.
    pub fn load(&self, input: &Path) -> Result<LoadResult> {
        self.load_with_progress(input, |_, _, _| {})
    }

    /// Load with a progress callback.
    ///
    /// The callback receives `(current_file_index, total_files, file_path)` before
    /// each file is processed.
    pub fn load_with_progress<F>(&self, input: &Path, mut on_progress: F) -> Result<LoadResult>
    where
        F: FnMut(usize, usize, &Path),
    {
        let files = self.discover_files(input)?;
        let total = files.len();
        let mut result = LoadResult::default();

        for (i, path) in files.iter().enumerate() {
            on_progress(i, total, path);

            match self.load_file(path) {
                Ok(parsed) => {
                    tracing::debug!(
                        path = %path.display(),
                        conversations = parsed.conversations.len(),
                        warnings = parsed.warnings.len(),
                        "Parsed export file"
                    );
                    result.files_processed += 1;
                    result.conversations.extend(parsed.conversations);
                    result.warnings.extend(parsed.warnings);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to load export file");
                    result.errors.push((path.clone(), e.to_string()));
                }
            }
        }

        Ok(result)
    }

    /// Parse a single file.
    pub fn load_file(&self, path: &Path) -> Result<ParseResult> {
        let content = std::fs::read_to_string(path)?;
        self.parser.parse(&ParseContext {
            path,
            content: &content,
        })
    }
}
