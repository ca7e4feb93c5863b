//! Message content extraction
//!
//! Turns a message body into text fragments plus a token count. Thought
//! content is weighted by the configured multiplier and kept apart from
//! the plain (integral) tokens so callers can tell the two apart.

use super::tokenizer::{tokens_for, TokenCounter};
use crate::types::{ContentBlock, Message, MessageNode};

/// Text and token count extracted from one message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    /// Display fragments, in content order
    pub fragments: Vec<String>,
    /// Tokens counted as-is
    pub plain_tokens: u64,
    /// Thought content tokens, already multiplied
    pub weighted_thought_tokens: f64,
}

impl Extraction {
    pub fn total(&self) -> f64 {
        self.plain_tokens as f64 + self.weighted_thought_tokens
    }

    fn push(&mut self, fragment: String, tokens: u64) {
        self.fragments.push(fragment);
        self.plain_tokens += tokens;
    }
}

/// Extracts countable text from messages.
pub struct ContentExtractor<'a> {
    counter: &'a dyn TokenCounter,
    thought_multiplier: f64,
}

impl<'a> ContentExtractor<'a> {
    pub fn new(counter: &'a dyn TokenCounter, thought_multiplier: f64) -> Self {
        Self {
            counter,
            thought_multiplier,
        }
    }

    /// Placeholder nodes extract to nothing.
    pub fn extract(&self, node: &MessageNode, count_thoughts: bool) -> Extraction {
        node.message
            .as_ref()
            .map(|message| self.extract_message(message, count_thoughts))
            .unwrap_or_default()
    }

    pub fn extract_message(&self, message: &Message, count_thoughts: bool) -> Extraction {
        let slug = message.model_slug();
        let mut out = Extraction::default();

        match &message.content {
            ContentBlock::Text { parts } => {
                if !parts.is_empty() {
                    let text = parts.concat();
                    let tokens = tokens_for(self.counter, &text, slug);
                    out.push(text, tokens);
                }
            }
            ContentBlock::Thoughts { thoughts } if count_thoughts => {
                for thought in thoughts {
                    if !thought.summary.is_empty() {
                        let tokens = tokens_for(self.counter, &thought.summary, slug);
                        out.push(format!("[Thought Label]: {}", thought.summary), tokens);
                    }
                    if !thought.content.is_empty() {
                        let tokens = tokens_for(self.counter, &thought.content, slug);
                        out.weighted_thought_tokens += tokens as f64 * self.thought_multiplier;
                        out.fragments.push(format!(
                            "[Thought Content (x{})]: {}",
                            self.thought_multiplier, thought.content
                        ));
                    }
                }
            }
            ContentBlock::Thoughts { .. } => {}
            ContentBlock::UserEditableContext {
                user_profile,
                user_instructions,
            } => {
                if let Some(profile) = user_profile.as_deref().filter(|s| !s.is_empty()) {
                    let tokens = tokens_for(self.counter, profile, slug);
                    out.push(format!("[User Profile]: {}", profile), tokens);
                }
                if let Some(instructions) = user_instructions.as_deref().filter(|s| !s.is_empty())
                {
                    let tokens = tokens_for(self.counter, instructions, slug);
                    out.push(format!("[User Instructions]: {}", instructions), tokens);
                }
            }
            ContentBlock::Unknown { .. } => {}
        }

        out
    }
}
