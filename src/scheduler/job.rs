//! Work item definitions for the scheduler.
//!
//! This module defines the values that travel through the shared queue:
//!
//! - `ItemId`: An opaque work identifier produced by a writer
//! - `QueueMessage`: A queue slot, either an item or the close sentinel

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a unit of work.
///
/// Writers yield these and readers receive them. Integer and string ids are
/// kept distinct, so `ItemId::Int(7)` and `ItemId::Str("7")` deduplicate
/// separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemId {
    /// Numeric identifier (database primary keys, offsets).
    Int(i64),
    /// Textual identifier (URLs, object keys, UUIDs).
    Str(String),
}

impl ItemId {
    /// Parses a raw line into an id: integers become `Int`, anything else `Str`.
    ///
    /// Surrounding whitespace is trimmed. Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(match trimmed.parse::<i64>() {
            Ok(n) => ItemId::Int(n),
            Err(_) => ItemId::Str(trimmed.to_string()),
        })
    }

    /// Returns the integer value if this is a numeric id.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ItemId::Int(n) => Some(*n),
            ItemId::Str(_) => None,
        }
    }

    /// Returns the string value if this is a textual id.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ItemId::Int(_) => None,
            ItemId::Str(s) => Some(s),
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Int(n) => write!(f, "{}", n),
            ItemId::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ItemId {
    fn from(value: i64) -> Self {
        ItemId::Int(value)
    }
}

impl From<i32> for ItemId {
    fn from(value: i32) -> Self {
        ItemId::Int(i64::from(value))
    }
}

impl From<u32> for ItemId {
    fn from(value: u32) -> Self {
        ItemId::Int(i64::from(value))
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        ItemId::Str(value.to_string())
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        ItemId::Str(value)
    }
}

/// A single slot in the shared queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueMessage {
    /// Work to dispatch to a reader.
    Item(ItemId),
    /// Instructs the worker that pops it to stop voluntarily.
    Close,
}

impl QueueMessage {
    /// Returns true for the close sentinel.
    pub fn is_close(&self) -> bool {
        matches!(self, QueueMessage::Close)
    }
}

impl From<ItemId> for QueueMessage {
    fn from(id: ItemId) -> Self {
        QueueMessage::Item(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric_and_text() {
        assert_eq!(ItemId::parse("42"), Some(ItemId::Int(42)));
        assert_eq!(ItemId::parse("  -3 \n"), Some(ItemId::Int(-3)));
        assert_eq!(
            ItemId::parse("https://example.com/a"),
            Some(ItemId::Str("https://example.com/a".to_string()))
        );
        assert_eq!(ItemId::parse("   "), None);
    }

    #[test]
    fn test_int_and_str_are_distinct() {
        assert_ne!(ItemId::from(7), ItemId::from("7"));
        assert_eq!(ItemId::from(7).to_string(), ItemId::from("7").to_string());
    }

    #[test]
    fn test_untagged_serialization() {
        let json = serde_json::to_string(&vec![ItemId::from(1), ItemId::from("a")])
            .expect("serialization should work");
        assert_eq!(json, r#"[1,"a"]"#);

        let parsed: Vec<ItemId> = serde_json::from_str(&json).expect("should parse back");
        assert_eq!(parsed, vec![ItemId::Int(1), ItemId::Str("a".to_string())]);
    }

    #[test]
    fn test_close_sentinel_cannot_collide_with_items() {
        assert!(QueueMessage::Close.is_close());
        assert!(!QueueMessage::from(ItemId::from("close")).is_close());
    }
}
