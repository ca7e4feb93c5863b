//! Conversation filters
//!
//! Filters run on normalized conversations before analysis. Dates are
//! compared in local time against the conversation's `create_time`.

use crate::error::{Error, Result};
use crate::types::Conversation;
use chrono::NaiveDate;
use serde::Serialize;

/// Active filters, also recorded in report metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Filters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Filters {
    /// Parse user-supplied filter values. Empty strings count as absent.
    pub fn parse(start: Option<&str>, end: Option<&str>, model: Option<&str>) -> Result<Self> {
        let start_date = non_empty(start).map(parse_filter_date).transpose()?;
        let end_date = non_empty(end).map(parse_filter_date).transpose()?;
        if let (Some(s), Some(e)) = (start_date, end_date) {
            if s > e {
                return Err(Error::InvalidFilter(format!(
                    "start date {} is after end date {}",
                    s, e
                )));
            }
        }
        Ok(Self {
            start_date,
            end_date,
            model: non_empty(model).map(String::from),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.start_date.is_none() && self.end_date.is_none() && self.model.is_none()
    }

    /// Date filter, then model filter.
    pub fn apply(&self, conversations: Vec<Conversation>) -> Vec<Conversation> {
        let before = conversations.len();
        let by_date = filter_by_date(conversations, self.start_date, self.end_date);
        let kept = filter_by_model(by_date, self.model.as_deref());
        if !self.is_empty() {
            tracing::info!(before, after = kept.len(), filters = ?self, "Applied filters");
        }
        kept
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_filter_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        Error::InvalidFilter(format!(
            "invalid date '{}', expected YYYY-MM-DD",
            value.trim()
        ))
    })
}

/// Keep conversations created within `[start, end]` (whole local days).
///
/// With either bound set, conversations without a creation time are dropped.
pub fn filter_by_date(
    conversations: Vec<Conversation>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Vec<Conversation> {
    if start.is_none() && end.is_none() {
        return conversations;
    }
    conversations
        .into_iter()
        .filter(|conv| match conv.created_on() {
            Some(day) => start.map_or(true, |s| day >= s) && end.map_or(true, |e| day <= e),
            None => false,
        })
        .collect()
}

/// Keep conversations with an assistant message from `model` anywhere in
/// the mapping, not only on the thread.
pub fn filter_by_model(conversations: Vec<Conversation>, model: Option<&str>) -> Vec<Conversation> {
    let Some(model) = model.filter(|m| !m.is_empty()) else {
        return conversations;
    };
    conversations
        .into_iter()
        .filter(|conv| {
            conv.assistant_messages()
                .any(|msg| msg.model_slug() == Some(model))
        })
        .collect()
}
