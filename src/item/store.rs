//! Storage for declared and scripted items behind one id space.

use serde_json::Value;
use tracing::warn;

use super::{Item, ItemDescriptor};
use crate::error::{Error, Result};
use crate::state::ScriptedItemState;

/// A runtime-created item owned by the scripting collaborator.
///
/// Scripted items carry a host-managed code list and a single integer
/// state; they provide `max(state, 0)` for every code in that list.
#[derive(Debug, Clone)]
pub struct ScriptedItem {
    id: String,
    name: String,
    codes: Vec<String>,
    state: i32,
}

impl ScriptedItem {
    fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            codes: Vec::new(),
            state: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn state(&self) -> i32 {
        self.state
    }

    pub fn provides_code(&self, code: &str) -> i32 {
        if self.codes.iter().any(|c| c == code) {
            self.state.max(0)
        } else {
            0
        }
    }

    pub fn can_provide_code(&self, code: &str) -> bool {
        self.codes.iter().any(|c| c == code)
    }

    pub(crate) fn set_state(&mut self, state: i32) -> bool {
        if self.state == state {
            return false;
        }
        self.state = state;
        true
    }

    pub(crate) fn set_codes(&mut self, codes: Vec<String>) -> bool {
        if self.codes == codes {
            return false;
        }
        self.codes = codes;
        true
    }

    pub(crate) fn save_state(&self) -> ScriptedItemState {
        ScriptedItemState { state: self.state }
    }

    pub(crate) fn load_state(&mut self, state: &ScriptedItemState) -> bool {
        self.set_state(state.state)
    }
}

/// One entry of the item store: either a declared item or a scripted one.
#[derive(Debug, Clone)]
pub enum TrackerItem {
    Declared(Item),
    Scripted(ScriptedItem),
}

impl TrackerItem {
    pub fn id(&self) -> &str {
        match self {
            Self::Declared(item) => item.id(),
            Self::Scripted(item) => item.id(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Declared(item) => item.name(),
            Self::Scripted(item) => item.name(),
        }
    }

    pub fn provides_code(&self, code: &str) -> i32 {
        match self {
            Self::Declared(item) => item.provides_code(code),
            Self::Scripted(item) => item.provides_code(code),
        }
    }

    pub fn can_provide_code(&self, code: &str) -> bool {
        match self {
            Self::Declared(item) => item.can_provide_code(code),
            Self::Scripted(item) => item.can_provide_code(code),
        }
    }

    pub fn as_declared(&self) -> Option<&Item> {
        match self {
            Self::Declared(item) => Some(item),
            Self::Scripted(_) => None,
        }
    }

    pub fn as_scripted(&self) -> Option<&ScriptedItem> {
        match self {
            Self::Declared(_) => None,
            Self::Scripted(item) => Some(item),
        }
    }

    /// Whether the item reads as "on" for composite derivation.
    pub(crate) fn is_on(&self) -> bool {
        match self {
            Self::Declared(item) => item.enabled(),
            Self::Scripted(item) => item.state() != 0,
        }
    }

    pub(crate) fn set_on(&mut self, on: bool) -> bool {
        match self {
            Self::Declared(item) => item.set_enabled(on),
            Self::Scripted(item) => item.set_state(i32::from(on)),
        }
    }
}

/// Ordered storage for every item the tracker knows about.
///
/// Ids are assigned from a load-order counter and formatted as decimal
/// strings; lookup by id and by code traverses declared and scripted items
/// alike.
#[derive(Debug, Default)]
pub struct ItemStore {
    items: Vec<TrackerItem>,
    next_id: u64,
}

impl ItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load declared items from a JSON array of descriptors.
    ///
    /// A malformed descriptor is skipped with a warning; the rest of the
    /// blob still loads. Returns the ids of the items added.
    pub(crate) fn add_declared(&mut self, blob: &Value) -> Result<Vec<String>> {
        let list = blob
            .as_array()
            .ok_or_else(|| Error::load("items", "expected a JSON array"))?;
        let mut added = Vec::new();
        for entry in list {
            if !entry.is_object() {
                warn!("skipping item descriptor: not an object");
                continue;
            }
            match serde_json::from_value::<ItemDescriptor>(entry.clone()) {
                Ok(descriptor) => {
                    let id = self.next_id();
                    self.items
                        .push(TrackerItem::Declared(Item::from_descriptor(
                            id.clone(),
                            descriptor,
                        )));
                    added.push(id);
                }
                Err(err) => {
                    warn!(error = %err, "skipping malformed item descriptor");
                }
            }
        }
        Ok(added)
    }

    /// Create a scripted item and return its id.
    pub(crate) fn create_scripted(&mut self, name: &str) -> String {
        let id = self.next_id();
        self.items
            .push(TrackerItem::Scripted(ScriptedItem::new(
                id.clone(),
                name.to_owned(),
            )));
        id
    }

    fn next_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    pub fn get(&self, id: &str) -> Option<&TrackerItem> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut TrackerItem> {
        self.items.iter_mut().find(|item| item.id() == id)
    }

    /// The first item, in load order, that can ever provide `code`.
    pub fn find_first_providing(&self, code: &str) -> Option<&TrackerItem> {
        self.items.iter().find(|item| item.can_provide_code(code))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TrackerItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
