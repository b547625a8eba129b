//! Error types for tracker-core.

use thiserror::Error;

/// Result type alias using tracker-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading declarations or tracker state.
///
/// All of these are non-fatal: a failed load leaves previously loaded data
/// intact, and evaluation itself never produces an error.
#[derive(Error, Debug)]
pub enum Error {
    /// A declaration blob had the wrong top-level shape
    #[error("failed to load {what}: {reason}")]
    Load { what: &'static str, reason: String },

    /// A rule atom did not match the normalized grammar
    #[error("invalid rule atom {atom:?}: {reason}")]
    Rule { atom: String, reason: String },

    /// A state document had an unrecognized shape
    #[error("invalid state document: {0}")]
    StateFormat(String),

    /// A state document was written by an incompatible format version
    #[error("unsupported state format version {found}")]
    StateVersion { found: u64 },

    /// A scripted predicate failed or is missing
    #[error("script predicate error: {0}")]
    Script(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a load error for the named declaration kind.
    pub fn load(what: &'static str, reason: impl Into<String>) -> Self {
        Self::Load {
            what,
            reason: reason.into(),
        }
    }

    /// Create a rule-atom error.
    pub fn rule(atom: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rule {
            atom: atom.into(),
            reason: reason.into(),
        }
    }

    /// Create a state-format error.
    pub fn state_format(reason: impl Into<String>) -> Self {
        Self::StateFormat(reason.into())
    }

    /// Create a script predicate error.
    pub fn script(reason: impl Into<String>) -> Self {
        Self::Script(reason.into())
    }
}
