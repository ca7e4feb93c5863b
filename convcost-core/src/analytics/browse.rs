//! Query helpers behind the CLI's browse commands
//!
//! Ranking and lookup run over analysis results; inspection (model
//! details, transcripts) goes back to the normalized conversations.

use super::engine::AnalysisResult;
use super::pricing::model_label;
use super::thread::linearize;
use crate::error::{Error, Result};
use crate::format::truncate;
use crate::types::{ContentBlock, Conversation, Message, Role};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Samples kept by [`model_details`]
const MAX_SAMPLES: usize = 3;

/// Characters of content shown per sample
const SAMPLE_PREVIEW_CHARS: usize = 100;

/// Title characters kept in an exported conversation's file name
const EXPORT_TITLE_CHARS: usize = 50;

// ============================================
// Result queries
// ============================================

/// Valid results with the most turns, highest first. Ties keep input order.
pub fn most_turns(results: &[AnalysisResult], limit: usize) -> Vec<&AnalysisResult> {
    let mut valid: Vec<&AnalysisResult> = results.iter().filter(|r| !r.is_error()).collect();
    valid.sort_by(|a, b| b.real_turns_count().cmp(&a.real_turns_count()));
    valid.truncate(limit);
    valid
}

/// Results whose title contains `query`. Untitled results never match.
pub fn find_by_title<'a>(
    results: &'a [AnalysisResult],
    query: &str,
    case_sensitive: bool,
) -> Vec<&'a AnalysisResult> {
    let needle = if case_sensitive {
        query.to_string()
    } else {
        query.to_lowercase()
    };
    results
        .iter()
        .filter(|r| !r.title.is_empty())
        .filter(|r| {
            if case_sensitive {
                r.title.contains(&needle)
            } else {
                r.title.to_lowercase().contains(&needle)
            }
        })
        .collect()
}

/// Days with at least one conversation, ascending, with their counts.
pub fn conversation_dates(results: &[AnalysisResult]) -> Vec<(NaiveDate, usize)> {
    let mut days: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for day in results.iter().filter_map(AnalysisResult::created_on) {
        *days.entry(day).or_default() += 1;
    }
    days.into_iter().collect()
}

/// Results created on `date` (local time).
pub fn conversations_on(results: &[AnalysisResult], date: NaiveDate) -> Vec<&AnalysisResult> {
    results
        .iter()
        .filter(|r| r.created_on() == Some(date))
        .collect()
}

// ============================================
// Conversation inspection
// ============================================

/// Source conversation of a result, by export id.
pub fn find_conversation<'a>(conversations: &'a [Conversation], id: &str) -> Result<&'a Conversation> {
    conversations
        .iter()
        .find(|c| c.id.as_deref() == Some(id))
        .ok_or_else(|| Error::ConversationNotFound(id.to_string()))
}

/// Slug of the first assistant message on the thread that names one.
pub fn first_model_used(conversation: &Conversation) -> String {
    thread_messages(conversation)
        .filter(|msg| *msg.role() == Role::Assistant)
        .find_map(Message::model_slug)
        .unwrap_or("unknown")
        .to_string()
}

fn thread_messages(conversation: &Conversation) -> impl Iterator<Item = &Message> + '_ {
    linearize(&conversation.mapping)
        .into_iter()
        .filter_map(move |id| conversation.mapping.message(&id))
}

/// Text shown for a message in transcripts and samples.
pub fn display_text(message: &Message) -> String {
    let pieces: Vec<String> = match &message.content {
        ContentBlock::Text { parts } => parts.iter().filter(|p| !p.is_empty()).cloned().collect(),
        ContentBlock::Thoughts { thoughts } => thoughts
            .iter()
            .flat_map(|t| [t.summary.clone(), t.content.clone()])
            .filter(|s| !s.is_empty())
            .collect(),
        ContentBlock::UserEditableContext {
            user_profile,
            user_instructions,
        } => [user_profile, user_instructions]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect(),
        ContentBlock::Unknown { .. } => Vec::new(),
    };
    if pieces.is_empty() {
        "[No content]".to_string()
    } else {
        pieces.join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageSample {
    pub conversation: String,
    pub author: String,
    pub recipient: String,
    pub content_preview: String,
}

/// What the thread messages attributed to one model label look like.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelDetails {
    pub label: String,
    pub message_count: usize,
    pub recipients: BTreeMap<String, usize>,
    pub content_types: BTreeMap<String, usize>,
    pub roles: BTreeMap<String, usize>,
    pub samples: Vec<MessageSample>,
}

impl ModelDetails {
    /// Entries of a count map, most frequent first.
    pub fn ranked(counts: &BTreeMap<String, usize>) -> Vec<(&str, usize)> {
        let mut entries: Vec<(&str, usize)> = counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries
    }

    /// Share of this model's messages, in percent.
    pub fn share(&self, count: usize) -> f64 {
        if self.message_count == 0 {
            0.0
        } else {
            count as f64 / self.message_count as f64 * 100.0
        }
    }
}

/// Inspect thread messages whose display label equals `label`, such as
/// `"N/A"` or `"Tool: python"`.
pub fn model_details(conversations: &[Conversation], label: &str) -> ModelDetails {
    let mut details = ModelDetails {
        label: label.to_string(),
        ..Default::default()
    };

    for conversation in conversations {
        for message in thread_messages(conversation) {
            if model_label(message) != label {
                continue;
            }
            details.message_count += 1;

            let recipient = message
                .recipient
                .clone()
                .unwrap_or_else(|| "none".to_string());
            *details.recipients.entry(recipient.clone()).or_default() += 1;
            *details
                .content_types
                .entry(message.content.content_type().to_string())
                .or_default() += 1;
            *details
                .roles
                .entry(message.role().as_str().to_string())
                .or_default() += 1;

            if details.samples.len() < MAX_SAMPLES {
                details.samples.push(MessageSample {
                    conversation: conversation.title.clone(),
                    author: message.role().as_str().to_string(),
                    recipient,
                    content_preview: truncate(&display_text(message), SAMPLE_PREVIEW_CHARS),
                });
            }
        }
    }

    details
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    /// Author name, or the capitalized role
    pub speaker: String,
    pub role: Role,
    /// Model slug, assistant messages only
    pub model: Option<String>,
    pub text: String,
    /// 1-based number of the turn this message closes
    pub turn_end: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transcript {
    pub title: String,
    pub entries: Vec<TranscriptEntry>,
    pub total_turns: usize,
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// The thread as readable entries with turn boundaries marked.
pub fn transcript(conversation: &Conversation) -> Transcript {
    let mut total_turns = 0;
    let entries = thread_messages(conversation)
        .map(|message| {
            let role = message.role().clone();
            let turn_end = message.is_turn_end().then(|| {
                total_turns += 1;
                total_turns
            });
            TranscriptEntry {
                speaker: message
                    .author
                    .name
                    .clone()
                    .unwrap_or_else(|| capitalize(role.as_str())),
                model: if role == Role::Assistant {
                    message.model_slug().map(String::from)
                } else {
                    None
                },
                role,
                text: display_text(message),
                turn_end,
            }
        })
        .collect();

    Transcript {
        title: conversation.title.clone(),
        entries,
        total_turns,
    }
}

// ============================================
// Conversation export
// ============================================

/// File-name-safe form of a title: letters, digits, spaces, `-` and `_`
/// are kept, anything else becomes `_`.
pub fn sanitize_title(title: &str) -> String {
    let title = if title.trim().is_empty() { "untitled" } else { title };
    title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(EXPORT_TITLE_CHARS)
        .collect()
}

/// Write one normalized conversation as pretty JSON into `dir` (created if
/// missing), named after its title and the current time.
pub fn export_conversation(conversation: &Conversation, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!(
        "{}_{}.json",
        sanitize_title(&conversation.title),
        Local::now().format("%Y%m%d_%H%M%S")
    ));
    std::fs::write(&path, serde_json::to_string_pretty(conversation)?)?;

    tracing::info!(
        path = %path.display(),
        title = %conversation.title,
        "Exported conversation"
    );
    Ok(path)
}
