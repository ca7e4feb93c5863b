//! Export-format parsers
//!
//! Each supported export format has a parser module that implements
//! the [`ExportParser`](super::ExportParser) trait.
//!
//! | Format | Module |
//! |--------|--------|
//! | ChatGPT data export | [`chatgpt`] |

pub mod chatgpt;

pub use chatgpt::ChatGptParser;

use super::ExportParser;

/// Create all available parsers.
pub fn create_all_parsers() -> Vec<Box<dyn ExportParser>> {
    vec![Box::new(ChatGptParser::new())]
}

/// Get a parser by format name.
pub fn parser_for(name: &str) -> Option<Box<dyn ExportParser>> {
    create_all_parsers().into_iter().find(|p| p.name() == name)
}
