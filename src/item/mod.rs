//! Typed tracker items and their state machines.
//!
//! Items are declared as data: each descriptor names the codes it provides
//! and, for multi-step items, an ordered stage list. The variants differ in
//! how user actions mutate them and in how they answer `provides_code`.

mod store;

pub use store::{ItemStore, ScriptedItem, TrackerItem};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::ItemState;

/// How a user interaction mutates an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Left click: the item's main interaction
    Primary,
    /// Right click: the item's alternate interaction
    Secondary,
    Toggle,
    Increment,
    Decrement,
}

/// The declared item variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    /// On/off item
    #[default]
    Toggle,
    /// Multi-step item cycling through its stages
    Progressive,
    /// Independent on/off flag plus a stage cursor
    ProgressiveToggle,
    /// Counted item
    Consumable,
    /// Derived item whose stage is the two-bit mask of two referenced items
    CompositeToggle,
    /// Item layered over a base item; interactions fall through to the base
    ToggleBadged,
    /// Always present, never interactive
    Static,
}

/// One level of a multi-step item.
#[derive(Debug, Clone)]
pub struct Stage {
    codes: Vec<String>,
    secondary_codes: Vec<String>,
    inherit_codes: bool,
    img: String,
    disabled_img: String,
    img_mods: Vec<String>,
    disabled_img_mods: Vec<String>,
}

impl Stage {
    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn secondary_codes(&self) -> &[String] {
        &self.secondary_codes
    }

    /// Whether code lookup may keep descending below this stage.
    pub fn inherit_codes(&self) -> bool {
        self.inherit_codes
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.codes.iter().any(|c| c == code)
    }

    pub fn has_secondary_code(&self, code: &str) -> bool {
        self.secondary_codes.iter().any(|c| c == code)
    }

    pub fn image(&self) -> &str {
        &self.img
    }

    pub fn disabled_image(&self) -> &str {
        &self.disabled_img
    }

    pub fn image_mods(&self) -> &[String] {
        &self.img_mods
    }

    pub fn disabled_image_mods(&self) -> &[String] {
        &self.disabled_img_mods
    }

    fn from_descriptor(d: StageDescriptor) -> Self {
        Self {
            codes: d.codes.map(CodeList::into_vec).unwrap_or_default(),
            secondary_codes: d.secondary_codes.map(CodeList::into_vec).unwrap_or_default(),
            inherit_codes: d.inherit_codes,
            img: d.img,
            disabled_img: d.disabled_img,
            img_mods: d.img_mods.map(CodeList::into_vec).unwrap_or_default(),
            disabled_img_mods: d.disabled_img_mods.map(CodeList::into_vec).unwrap_or_default(),
        }
    }
}

/// A declared item.
#[derive(Debug, Clone)]
pub struct Item {
    id: String,
    name: String,
    item_type: ItemType,
    codes: Vec<String>,
    stages: Vec<Stage>,
    /// On/off flag (`stage1` in legacy packs)
    enabled: bool,
    /// Active stage index (`stage2` in legacy packs)
    stage: usize,
    count: i32,
    max_count: i32,
    allow_disabled: bool,
    base_item: String,
    item_left: String,
    item_right: String,
    loop_stages: bool,
    img: String,
    disabled_img: String,
    img_mods: Vec<String>,
    disabled_img_mods: Vec<String>,
    item_shop: Option<Value>,
    capturable: Option<Value>,
}

impl Item {
    pub(crate) fn from_descriptor(id: String, d: ItemDescriptor) -> Self {
        Self {
            id,
            name: d.name,
            item_type: d.item_type,
            codes: d.codes.map(CodeList::into_vec).unwrap_or_default(),
            stages: d.stages.into_iter().map(Stage::from_descriptor).collect(),
            enabled: false,
            stage: 0,
            count: d.count.max(0),
            max_count: d.max_count.max(0),
            allow_disabled: d.allow_disabled,
            base_item: d.base_item,
            item_left: d.item_left,
            item_right: d.item_right,
            loop_stages: d.loop_stages,
            img: d.img,
            disabled_img: d.disabled_img,
            img_mods: d.img_mods.map(CodeList::into_vec).unwrap_or_default(),
            disabled_img_mods: d.disabled_img_mods.map(CodeList::into_vec).unwrap_or_default(),
            item_shop: d.item_shop,
            capturable: d.capturable,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn item_type(&self) -> ItemType {
        self.item_type
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn active_stage(&self) -> usize {
        self.stage
    }

    pub fn count(&self) -> i32 {
        self.count
    }

    pub fn max_count(&self) -> i32 {
        self.max_count
    }

    /// Code of the base item a badged item layers over; empty otherwise.
    pub fn base_item(&self) -> &str {
        &self.base_item
    }

    /// Code of the left referent of a composite toggle; empty otherwise.
    pub fn item_left(&self) -> &str {
        &self.item_left
    }

    /// Code of the right referent of a composite toggle; empty otherwise.
    pub fn item_right(&self) -> &str {
        &self.item_right
    }

    pub fn image(&self) -> &str {
        if self.item_type != ItemType::Toggle {
            if let Some(stage) = self.stages.get(self.stage) {
                return stage.image();
            }
        }
        &self.img
    }

    pub fn disabled_image(&self) -> &str {
        if self.item_type != ItemType::Toggle {
            if let Some(stage) = self.stages.get(self.stage) {
                return stage.disabled_image();
            }
        }
        &self.disabled_img
    }

    pub fn item_shop(&self) -> Option<&Value> {
        self.item_shop.as_ref()
    }

    pub fn capturable(&self) -> Option<&Value> {
        self.capturable.as_ref()
    }

    /// How many of `code` this item currently provides.
    ///
    /// Staged items walk downward from the active stage and stop at the
    /// first stage that does not inherit; with `allow_disabled` set and the
    /// item off, nothing is provided at all.
    pub fn provides_code(&self, code: &str) -> i32 {
        if self.stage < self.stages.len() {
            if self.allow_disabled && !self.enabled {
                return 0;
            }
            for stage in self.stages[..=self.stage].iter().rev() {
                if stage.has_code(code) {
                    return 1;
                }
                if !stage.inherit_codes() {
                    break;
                }
            }
            return 0;
        }
        match self.item_type {
            ItemType::Consumable => {
                if self.has_base_code(code) {
                    self.count
                } else {
                    0
                }
            }
            ItemType::Static => i32::from(self.has_base_code(code)),
            _ => i32::from(self.enabled && self.has_base_code(code)),
        }
    }

    /// Whether this item can ever provide `code`, regardless of state.
    pub fn can_provide_code(&self, code: &str) -> bool {
        self.has_base_code(code) || self.stages.iter().any(|s| s.has_code(code))
    }

    fn has_base_code(&self, code: &str) -> bool {
        self.codes.iter().any(|c| c == code)
    }

    /// Apply a user action. Returns whether any state changed.
    pub(crate) fn change_state(&mut self, action: Action) -> bool {
        match self.item_type {
            ItemType::Toggle => match action {
                Action::Primary | Action::Toggle => {
                    self.enabled = !self.enabled;
                    true
                }
                _ => false,
            },
            ItemType::Progressive => match action {
                Action::Primary | Action::Increment => self.advance_stage(),
                Action::Secondary | Action::Decrement => self.retreat_stage(),
                Action::Toggle => false,
            },
            ItemType::ProgressiveToggle => match action {
                Action::Primary | Action::Toggle => {
                    self.enabled = !self.enabled;
                    true
                }
                Action::Secondary | Action::Increment => self.advance_stage(),
                Action::Decrement => self.retreat_stage(),
            },
            ItemType::Consumable => match action {
                Action::Primary | Action::Increment => {
                    if self.max_count > 0 && self.count >= self.max_count {
                        false
                    } else {
                        self.count += 1;
                        true
                    }
                }
                Action::Secondary | Action::Decrement => {
                    if self.count == 0 {
                        false
                    } else {
                        self.count -= 1;
                        true
                    }
                }
                Action::Toggle => false,
            },
            ItemType::ToggleBadged => match action {
                // Primary falls through to the base item (handled by the tracker)
                Action::Secondary | Action::Toggle => {
                    self.enabled = !self.enabled;
                    true
                }
                _ => false,
            },
            // derived or inert; user actions never land here
            ItemType::CompositeToggle | ItemType::Static => false,
        }
    }

    fn advance_stage(&mut self) -> bool {
        if self.stages.len() < 2 {
            return false;
        }
        let next = if self.loop_stages {
            (self.stage + 1) % self.stages.len()
        } else {
            (self.stage + 1).min(self.stages.len() - 1)
        };
        if next == self.stage {
            return false;
        }
        self.stage = next;
        true
    }

    fn retreat_stage(&mut self) -> bool {
        if self.stages.len() < 2 {
            return false;
        }
        let prev = if self.stage == 0 {
            if !self.loop_stages {
                return false;
            }
            self.stages.len() - 1
        } else {
            self.stage - 1
        };
        self.stage = prev;
        true
    }

    pub(crate) fn set_enabled(&mut self, on: bool) -> bool {
        if self.enabled == on {
            return false;
        }
        self.enabled = on;
        true
    }

    pub(crate) fn set_active_stage(&mut self, stage: usize) -> bool {
        if self.stage == stage {
            return false;
        }
        self.stage = stage;
        true
    }

    pub(crate) fn save_state(&self) -> ItemState {
        ItemState {
            enabled: self.enabled,
            stage: self.stage,
            count: self.count,
        }
    }

    /// Apply saved state. Returns whether anything changed.
    pub(crate) fn load_state(&mut self, state: &ItemState) -> bool {
        let stage = if self.stages.is_empty() {
            0
        } else {
            state.stage.min(self.stages.len() - 1)
        };
        let count = state.count.max(0);
        let changed = self.enabled != state.enabled || self.stage != stage || self.count != count;
        self.enabled = state.enabled;
        self.stage = stage;
        self.count = count;
        changed
    }
}

/// Descriptor fields accepted for one item declaration.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ItemDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub item_type: ItemType,
    #[serde(default)]
    pub codes: Option<CodeList>,
    #[serde(default)]
    pub stages: Vec<StageDescriptor>,
    #[serde(default)]
    pub count: i32,
    #[serde(default)]
    pub max_count: i32,
    #[serde(default)]
    pub allow_disabled: bool,
    #[serde(default)]
    pub base_item: String,
    #[serde(default)]
    pub item_left: String,
    #[serde(default)]
    pub item_right: String,
    #[serde(default = "default_true", rename = "loop")]
    pub loop_stages: bool,
    #[serde(default)]
    pub img: String,
    #[serde(default)]
    pub disabled_img: String,
    #[serde(default)]
    pub img_mods: Option<CodeList>,
    #[serde(default)]
    pub disabled_img_mods: Option<CodeList>,
    #[serde(default)]
    pub item_shop: Option<Value>,
    #[serde(default)]
    pub capturable: Option<Value>,
}

/// Stage descriptor fields.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StageDescriptor {
    #[serde(default)]
    pub codes: Option<CodeList>,
    #[serde(default)]
    pub secondary_codes: Option<CodeList>,
    #[serde(default = "default_true")]
    pub inherit_codes: bool,
    #[serde(default)]
    pub img: String,
    #[serde(default)]
    pub disabled_img: String,
    #[serde(default)]
    pub img_mods: Option<CodeList>,
    #[serde(default)]
    pub disabled_img_mods: Option<CodeList>,
}

fn default_true() -> bool {
    true
}

/// A code list may be declared as a JSON array or a comma-joined string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum CodeList {
    List(Vec<String>),
    Joined(String),
}

impl CodeList {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::List(list) => list,
            Self::Joined(joined) => joined
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }
}
