//! Defines the `Edge` type, recording how an operation's arguments bind.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A typed dependency between a predecessor and its successor.
///
/// A successor may reference the same predecessor in several positional
/// slots, so `Positional` carries a slot set rather than a single index.
/// One predecessor bound both positionally and by keyword produces two
/// parallel edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Edge {
    /// The predecessor's value fills these positional slots of the
    /// successor's operand list.
    Positional { slots: SmallVec<[u32; 2]> },
    /// The predecessor's value is bound under these keyword names.
    Keyword { keys: SmallVec<[String; 1]> },
}

impl Edge {
    pub fn positional(slot: u32) -> Self {
        let mut slots = SmallVec::new();
        slots.push(slot);
        Edge::Positional { slots }
    }

    pub fn keyword(key: impl Into<String>) -> Self {
        let mut keys = SmallVec::new();
        keys.push(key.into());
        Edge::Keyword { keys }
    }
}
