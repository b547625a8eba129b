//! # tracker-core
//!
//! The evaluation core of a progress tracker for non-linear games
//! (randomizers, metroidvanias). Logic is authored as data: items declare
//! the codes they provide, locations and sections declare rule expressions
//! over those codes and over other locations. The core evaluates that rule
//! graph, with cycle detection, counted requirements, glitch and
//! check-only markers, and scripted predicates, and keeps the derived
//! results consistent under a stream of item toggles.
//!
//! ## Core Components
//!
//! - **Items**: typed items (toggles, progressives, consumables, composite
//!   and badged variants) with code-provision semantics
//! - **Locations**: sections with access and visibility rule sets, linked
//!   into an arbitrary directed graph by `@`-references
//! - **Tracker**: the facade owning both stores, the provider-count and
//!   reachability caches, the bulk-update discipline and change events
//! - **State**: a versioned document capturing the mutable portion of the
//!   tracker for save/load
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use tracker_core::{AccessibilityLevel, Action, Tracker};
//!
//! let mut tracker = Tracker::new();
//! tracker.add_items(&json!([
//!     { "name": "Hookshot", "type": "toggle", "codes": "hookshot" }
//! ]))?;
//! tracker.add_locations(&json!([
//!     {
//!         "name": "Cavern",
//!         "sections": [{ "name": "Chest", "access_rules": [["hookshot"]] }]
//!     }
//! ]))?;
//!
//! assert_eq!(
//!     tracker.is_reachable_section("Cavern/Chest"),
//!     AccessibilityLevel::None
//! );
//! tracker.change_item_state("1", Action::Primary);
//! assert_eq!(
//!     tracker.is_reachable_section("Cavern/Chest"),
//!     AccessibilityLevel::Normal
//! );
//! # Ok::<(), tracker_core::Error>(())
//! ```

pub mod access;
pub mod error;
pub mod events;
pub mod item;
pub mod location;
pub mod rules;
pub mod script;
pub mod state;
pub mod tracker;

// Re-exports for convenience
pub use access::AccessibilityLevel;
pub use error::{Error, Result};
pub use events::Subscription;
pub use item::{Action, Item, ItemStore, ItemType, ScriptedItem, Stage, TrackerItem};
pub use location::{Location, LocationSection, LocationStore, MapLocation};
pub use rules::{Atom, ClauseDescriptor};
pub use script::{ScriptHost, ScriptValue};
pub use state::{
    ItemState, ScriptedItemState, SectionState, StateDocument, TrackerState, STATE_FORMAT_VERSION,
};
pub use tracker::{CodeTarget, Tracker};
