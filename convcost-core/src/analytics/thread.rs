//! Thread linearization
//!
//! Reduces a conversation tree to the first-child path starting at its root.
//! Sibling branches (regenerations, edits) are not followed.

use crate::types::{MessageNode, NodeArena, SYNTHETIC_ROOT_ID};
use std::collections::HashSet;

/// Ids of message-bearing nodes along the first-child path, in order.
///
/// Returns an empty list when no root can be found. The walk stops at a
/// node without children, at a revisited node, or at an id missing from
/// the mapping.
pub fn linearize(mapping: &NodeArena) -> Vec<String> {
    let Some(root) = find_root(mapping) else {
        return vec![];
    };

    let mut visited: HashSet<&str> = HashSet::new();
    let start = if root == SYNTHETIC_ROOT_ID {
        visited.insert(root);
        match mapping.get(root).and_then(MessageNode::first_child) {
            Some(child) => child,
            None => return vec![],
        }
    } else {
        root
    };

    let mut ordered = Vec::new();
    let mut current = start;
    loop {
        if !visited.insert(current) {
            tracing::debug!(node = current, "Cycle in message tree, stopping walk");
            break;
        }
        let Some(node) = mapping.get(current) else {
            break;
        };
        if node.message.is_some() {
            ordered.push(current.to_string());
        }
        match node.first_child() {
            Some(next) => current = next,
            None => break,
        }
    }

    ordered
}

/// Root of the tree: the synthetic root if present, otherwise the first
/// parentless node, preferring ids that do not look generated.
pub fn find_root(mapping: &NodeArena) -> Option<&str> {
    if mapping.contains(SYNTHETIC_ROOT_ID) {
        return Some(SYNTHETIC_ROOT_ID);
    }

    let candidates: Vec<&str> = mapping
        .iter()
        .filter(|node| match node.parent.as_deref() {
            None | Some("") => true,
            Some(parent) => !mapping.contains(parent),
        })
        .map(|node| node.id.as_str())
        .collect();

    candidates
        .iter()
        .copied()
        .find(|id| !looks_generated(id))
        .or_else(|| candidates.first().copied())
}

/// 36 characters with exactly four dashes, like a UUID.
fn looks_generated(id: &str) -> bool {
    id.chars().count() == 36 && id.matches('-').count() == 4
}

/// Messages on the thread that close a turn.
pub fn count_real_turns(mapping: &NodeArena, thread: &[String]) -> usize {
    thread
        .iter()
        .filter_map(|id| mapping.message(id))
        .filter(|msg| msg.is_turn_end())
        .count()
}
