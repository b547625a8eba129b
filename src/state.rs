//! The versioned document holding the mutable portion of tracker state.
//!
//! Everything a play session changes (per-item stage/count, per-section
//! cleared counts) round-trips through this document; declarations are
//! reloaded from the pack and are not part of it. Only `format_version = 1`
//! is accepted; a newer version fails with a distinct error so callers can
//! tell "unknown format" apart from "corrupt document".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// The only state format version this crate reads or writes.
pub const STATE_FORMAT_VERSION: u64 = 1;

/// Root of the state document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDocument {
    pub tracker: TrackerState,
}

/// The `tracker` object of the state document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerState {
    pub format_version: u64,
    /// State of declared items, keyed by item id
    #[serde(default)]
    pub json_items: BTreeMap<String, ItemState>,
    /// State of scripted items, keyed by item id
    #[serde(default)]
    pub lua_items: BTreeMap<String, ScriptedItemState>,
    /// Section state keyed by `location_id/section_name`
    #[serde(default)]
    pub sections: BTreeMap<String, SectionState>,
}

/// Mutable state of one declared item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemState {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub stage: usize,
    #[serde(default)]
    pub count: i32,
}

/// Mutable state of one scripted item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedItemState {
    #[serde(default)]
    pub state: i32,
}

/// Mutable state of one location section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionState {
    #[serde(default)]
    pub cleared: u32,
}

impl StateDocument {
    /// Parse and validate a state document.
    ///
    /// Shape and version are checked before deserializing, so a failed load
    /// cannot leave a caller with partially applied state.
    pub fn from_value(value: &Value) -> Result<Self> {
        let root = value
            .as_object()
            .ok_or_else(|| Error::state_format("state root is not an object"))?;
        let tracker = root
            .get("tracker")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::state_format("missing \"tracker\" object"))?;
        let version = tracker
            .get("format_version")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::state_format("missing or non-numeric format_version"))?;
        if version != STATE_FORMAT_VERSION {
            return Err(Error::StateVersion { found: version });
        }
        serde_json::from_value(value.clone()).map_err(Error::from)
    }

    /// Serialize to a JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
