//! Core domain types for convcost
//!
//! These types are the normalized form of a chat export. Raw export records
//! are mapped into them once, at ingestion (see [`crate::ingest`]), so the
//! analytics layer never has to inspect loosely-typed JSON.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Conversation** | One exported chat, holding a tree of message nodes |
//! | **Node** | An entry in the conversation's mapping; may or may not carry a message |
//! | **Thread** | The first-child path through the tree, in chronological order |
//! | **Turn** | A user → assistant exchange, closed by a message with `end_turn = true` |
//! | **Thought** | Hidden reasoning content attached to an assistant message |

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Id of the placeholder node some exports use as the tree root.
pub const SYNTHETIC_ROOT_ID: &str = "client-created-root";

// ============================================
// Calculation Mode
// ============================================

/// How a conversation is costed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculationMode {
    /// Per assistant message, with history-based input and the turn discount
    #[default]
    Detailed,
    /// Flat per-role totals priced at the representative model's rates
    Simple,
}

impl CalculationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalculationMode::Detailed => "detailed",
            CalculationMode::Simple => "simple",
        }
    }
}

impl std::fmt::Display for CalculationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CalculationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "detailed" => Ok(CalculationMode::Detailed),
            "simple" => Ok(CalculationMode::Simple),
            _ => Err(format!("unknown calculation mode: {}", s)),
        }
    }
}

// ============================================
// Conversation
// ============================================

/// One exported conversation. Serializes to the export's shape, with
/// `mapping` keyed by node id in export order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversation {
    /// Export id (`conversation_id` or `id`), when present
    pub id: Option<String>,
    pub title: String,
    /// Unix seconds
    pub create_time: Option<f64>,
    /// Unix seconds
    pub update_time: Option<f64>,
    pub mapping: NodeArena,
}

impl Conversation {
    /// Creation time in the local timezone
    pub fn created_at(&self) -> Option<DateTime<Local>> {
        self.create_time.and_then(local_datetime)
    }

    /// Local calendar date of creation
    pub fn created_on(&self) -> Option<NaiveDate> {
        self.created_at().map(|dt| dt.date_naive())
    }

    /// Assistant messages anywhere in the mapping, thread or not
    pub fn assistant_messages(&self) -> impl Iterator<Item = &Message> {
        self.mapping
            .iter()
            .filter_map(|node| node.message.as_ref())
            .filter(|msg| msg.author.role == Role::Assistant)
    }
}

/// Converts unix seconds (possibly fractional) to a local datetime.
pub fn local_datetime(ts: f64) -> Option<DateTime<Local>> {
    if !ts.is_finite() {
        return None;
    }
    let secs = ts.floor();
    let nanos = ((ts - secs) * 1_000_000_000.0).round().min(999_999_999.0) as u32;
    Local.timestamp_opt(secs as i64, nanos).single()
}

// ============================================
// Message Tree
// ============================================

/// Arena of message nodes, in the export's key order, with an id index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeArena {
    nodes: Vec<MessageNode>,
    index: HashMap<String, usize>,
}

impl Serialize for NodeArena {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.nodes.iter().map(|node| (&node.id, node)))
    }
}

impl NodeArena {
    /// Builds an arena. A repeated id replaces the earlier node in place.
    pub fn from_nodes(nodes: impl IntoIterator<Item = MessageNode>) -> Self {
        let mut arena = NodeArena::default();
        for node in nodes {
            arena.insert(node);
        }
        arena
    }

    pub fn insert(&mut self, node: MessageNode) {
        match self.index.get(&node.id) {
            Some(&i) => self.nodes[i] = node,
            None => {
                self.index.insert(node.id.clone(), self.nodes.len());
                self.nodes.push(node);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&MessageNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Message carried by node `id`, if both exist
    pub fn message(&self, id: &str) -> Option<&Message> {
        self.get(id).and_then(|node| node.message.as_ref())
    }

    /// Nodes in export order
    pub fn iter(&self) -> impl Iterator<Item = &MessageNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A node in the conversation tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageNode {
    pub id: String,
    pub parent: Option<String>,
    /// `children[0]` is the accepted continuation
    pub children: Vec<String>,
    /// `None` for placeholder nodes
    pub message: Option<Message>,
}

impl MessageNode {
    pub fn first_child(&self) -> Option<&str> {
        self.children.first().map(String::as_str)
    }
}

// ============================================
// Messages
// ============================================

/// A single message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub author: Author,
    pub content: ContentBlock,
    pub metadata: MessageMetadata,
    pub recipient: Option<String>,
    pub end_turn: Option<bool>,
    /// Unix seconds
    pub create_time: Option<f64>,
}

impl Message {
    /// Only an explicit `true` closes a turn
    pub fn is_turn_end(&self) -> bool {
        self.end_turn == Some(true)
    }

    pub fn role(&self) -> &Role {
        &self.author.role
    }

    pub fn model_slug(&self) -> Option<&str> {
        self.metadata.model_slug.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Author {
    pub role: Role,
    pub name: Option<String>,
}

/// Who wrote a message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    /// Any other role name, kept verbatim
    Other(String),
}

impl Default for Role {
    fn default() -> Self {
        Role::Other("unknown".to_string())
    }
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::Other(name) => name,
        }
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        match s {
            "system" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            other => Role::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Role {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Message metadata relevant to costing
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MessageMetadata {
    pub model_slug: Option<String>,
    pub default_model_slug: Option<String>,
    /// Whether a `finish_details` key was present, even as null
    pub has_finish_details: bool,
}

/// Message body, one variant per export `content_type` we account for.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    /// `text`: string parts only
    Text { parts: Vec<String> },
    /// `thoughts`: hidden reasoning
    Thoughts { thoughts: Vec<Thought> },
    /// `user_editable_context`: custom instructions
    UserEditableContext {
        user_profile: Option<String>,
        user_instructions: Option<String>,
    },
    /// Anything else; contributes no tokens
    Unknown { content_type: String },
}

impl Default for ContentBlock {
    fn default() -> Self {
        ContentBlock::Unknown {
            content_type: "unknown".to_string(),
        }
    }
}

/// Written back with its `content_type` tag, as in the export.
impl Serialize for ContentBlock {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("content_type", self.content_type())?;
        match self {
            ContentBlock::Text { parts } => map.serialize_entry("parts", parts)?,
            ContentBlock::Thoughts { thoughts } => map.serialize_entry("thoughts", thoughts)?,
            ContentBlock::UserEditableContext {
                user_profile,
                user_instructions,
            } => {
                map.serialize_entry("user_profile", user_profile)?;
                map.serialize_entry("user_instructions", user_instructions)?;
            }
            ContentBlock::Unknown { .. } => {}
        }
        map.end()
    }
}

impl ContentBlock {
    /// The export's `content_type` string
    pub fn content_type(&self) -> &str {
        match self {
            ContentBlock::Text { .. } => "text",
            ContentBlock::Thoughts { .. } => "thoughts",
            ContentBlock::UserEditableContext { .. } => "user_editable_context",
            ContentBlock::Unknown { content_type } => content_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Thought {
    pub summary: String,
    pub content: String,
}
