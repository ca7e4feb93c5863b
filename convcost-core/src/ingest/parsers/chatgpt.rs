//! ChatGPT data export parser
//!
//! Parses `conversations.json` from a ChatGPT data export: a JSON array of
//! conversation objects, each holding a `mapping` of node id to
//! `{parent, children, message}`.
//!
//! # Error Handling
//!
//! - **Malformed file**: not JSON, or neither an array nor an object, is an error.
//! - **Malformed records**: a conversation that does not fit the expected shape
//!   is skipped with a warning in [`ParseResult::warnings`].
//! - **Missing fields**: filled in via `#[serde(default)]`; the analytics layer
//!   decides what a missing mapping or message means.
//! - **Unknown content types**: kept as [`ContentBlock::Unknown`].

use crate::error::{Error, Result};
use crate::ingest::parser::{ExportParser, ParseContext, ParseResult};
use crate::types::{
    Author, ContentBlock, Conversation, Message, MessageMetadata, MessageNode, NodeArena, Role,
    Thought,
};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

/// Title used when an export record has none
pub const UNTITLED: &str = "N/A";

/// Parser for ChatGPT `conversations.json` exports.
pub struct ChatGptParser;

impl ChatGptParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ChatGptParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportParser for ChatGptParser {
    fn name(&self) -> &'static str {
        "chatgpt"
    }

    fn source_patterns(&self) -> Vec<&'static str> {
        vec!["*.json"]
    }

    fn parse(&self, ctx: &ParseContext) -> Result<ParseResult> {
        let source_name = ctx.path.display().to_string();
        let document: Value = serde_json::from_str(ctx.content).map_err(|e| Error::Parse {
            source_name: source_name.clone(),
            message: format!("invalid JSON: {}", e),
        })?;

        let records = match document {
            Value::Array(items) => items,
            obj @ Value::Object(_) => vec![obj],
            other => {
                return Err(Error::Parse {
                    source_name,
                    message: format!(
                        "expected an array of conversations, found {}",
                        json_kind(&other)
                    ),
                })
            }
        };

        let mut result = ParseResult::default();
        for (i, record) in records.into_iter().enumerate() {
            match serde_json::from_value::<RawConversation>(record) {
                Ok(raw) => result.conversations.push(raw.into_conversation()),
                Err(e) => {
                    tracing::warn!(
                        source = %source_name,
                        record = i,
                        error = %e,
                        "Skipping malformed conversation record"
                    );
                    result
                        .warnings
                        .push(format!("{}: record {}: {}", source_name, i, e));
                }
            }
        }

        Ok(result)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================
// Raw export records
// ============================================

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawConversation {
    id: Option<String>,
    conversation_id: Option<String>,
    title: Option<String>,
    create_time: Option<f64>,
    update_time: Option<f64>,
    mapping: Option<RawMapping>,
}

/// Node table in document order.
#[derive(Debug, Default)]
struct RawMapping(Vec<(String, RawNode)>);

impl<'de> Deserialize<'de> for RawMapping {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct MappingVisitor;

        impl<'de> Visitor<'de> for MappingVisitor {
            type Value = RawMapping;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of node id to node")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<RawMapping, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut nodes = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((id, node)) = map.next_entry::<String, RawNode>()? {
                    nodes.push((id, node));
                }
                Ok(RawMapping(nodes))
            }
        }

        deserializer.deserialize_map(MappingVisitor)
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawNode {
    parent: Option<String>,
    children: Option<Vec<String>>,
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawMessage {
    author: Option<RawAuthor>,
    content: Option<RawContent>,
    metadata: Option<serde_json::Map<String, Value>>,
    recipient: Option<String>,
    end_turn: Option<Value>,
    create_time: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawAuthor {
    role: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawContent {
    content_type: Option<String>,
    parts: Option<Vec<Value>>,
    thoughts: Option<Vec<RawThought>>,
    user_profile: Option<String>,
    user_instructions: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawThought {
    summary: Option<String>,
    content: Option<String>,
}

// ============================================
// Normalization
// ============================================

impl RawConversation {
    fn into_conversation(self) -> Conversation {
        let mapping = self
            .mapping
            .map(|m| {
                NodeArena::from_nodes(m.0.into_iter().map(|(id, node)| node.into_node(id)))
            })
            .unwrap_or_default();

        Conversation {
            id: self.conversation_id.or(self.id),
            title: self.title.unwrap_or_else(|| UNTITLED.to_string()),
            create_time: self.create_time,
            update_time: self.update_time,
            mapping,
        }
    }
}

impl RawNode {
    fn into_node(self, id: String) -> MessageNode {
        MessageNode {
            id,
            parent: self.parent.filter(|p| !p.is_empty()),
            children: self.children.unwrap_or_default(),
            message: self.message.map(RawMessage::into_message),
        }
    }
}

impl RawMessage {
    fn into_message(self) -> Message {
        let author = self
            .author
            .map(|a| Author {
                role: a.role.as_deref().map(Role::from).unwrap_or_default(),
                name: a.name,
            })
            .unwrap_or_default();

        let metadata = self
            .metadata
            .map(|m| MessageMetadata {
                model_slug: non_empty_str(&m, "model_slug"),
                default_model_slug: non_empty_str(&m, "default_model_slug"),
                has_finish_details: m.contains_key("finish_details"),
            })
            .unwrap_or_default();

        Message {
            author,
            content: self
                .content
                .map(RawContent::into_block)
                .unwrap_or_default(),
            metadata,
            recipient: self.recipient,
            end_turn: self.end_turn.as_ref().and_then(Value::as_bool),
            create_time: self.create_time,
        }
    }
}

impl RawContent {
    fn into_block(self) -> ContentBlock {
        match self.content_type.as_deref() {
            Some("text") => ContentBlock::Text {
                parts: self
                    .parts
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|p| match p {
                        Value::String(s) => Some(s),
                        _ => None,
                    })
                    .collect(),
            },
            Some("thoughts") => ContentBlock::Thoughts {
                thoughts: self
                    .thoughts
                    .unwrap_or_default()
                    .into_iter()
                    .map(|t| Thought {
                        summary: t.summary.unwrap_or_default(),
                        content: t.content.unwrap_or_default(),
                    })
                    .collect(),
            },
            Some("user_editable_context") => ContentBlock::UserEditableContext {
                user_profile: self.user_profile,
                user_instructions: self.user_instructions,
            },
            Some(other) => ContentBlock::Unknown {
                content_type: other.to_string(),
            },
            None => ContentBlock::default(),
        }
    }
}

fn non_empty_str(map: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}
