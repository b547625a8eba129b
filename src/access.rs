//! The accessibility lattice shared by all reachability queries.

use serde::{Deserialize, Serialize};

/// How reachable a location or section currently is.
///
/// The variants form a lattice ordered `None < Inspect < SequenceBreak <
/// Normal`; the derived `Ord` relies on the declaration order. Rule
/// evaluation joins clause results over this ordering.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessibilityLevel {
    /// Not reachable with the current items
    #[default]
    None,
    /// The check can be visited but not cleared
    Inspect,
    /// Reachable only through an accepted glitch
    SequenceBreak,
    /// Reachable in logic
    Normal,
}

impl std::fmt::Display for AccessibilityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "NONE",
            Self::Inspect => "INSPECT",
            Self::SequenceBreak => "SEQUENCE_BREAK",
            Self::Normal => "NORMAL",
        };
        write!(f, "{}", s)
    }
}
