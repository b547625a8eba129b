//! The tracker: item and location stores, derived caches, and the
//! reactive change pipeline tying them together.
//!
//! Queries take `&self` and go through interior-mutable caches; mutations
//! take `&mut self`. Event handlers receive `(&Tracker, &str)` and can read
//! the tracker mid-fan-out but cannot mutate it, which is exactly the
//! serialization discipline the single-threaded cooperative model asks
//! callers to uphold.

mod eval;
mod proptest;

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::access::AccessibilityLevel;
use crate::error::{Error, Result};
use crate::events::{Observers, Subscription};
use crate::item::{Action, ItemStore, ItemType, TrackerItem};
use crate::location::{Location, LocationSection, LocationStore, MapLocation};
use crate::script::ScriptHost;
use crate::state::{StateDocument, TrackerState, STATE_FORMAT_VERSION};

/// What a code resolved to in `find_for_code`.
#[derive(Clone, Copy)]
pub enum CodeTarget<'a> {
    Item(&'a TrackerItem),
    Section(&'a Location, &'a LocationSection),
}

/// The evaluation core of the progress tracker.
pub struct Tracker {
    items: ItemStore,
    locations: LocationStore,
    maps: HashMap<String, Value>,
    layouts: HashMap<String, Value>,
    script: Option<Rc<dyn ScriptHost>>,

    /// code → provider count, cleared on every item change
    provider_cache: RefCell<HashMap<String, i32>>,
    /// `@`-atom → level, cleared on item changes outside bulk mode
    reachable_cache: RefCell<HashMap<String, AccessibilityLevel>>,
    /// Recursion stack published for the duration of a scripted-predicate
    /// call so the predicate can query back on the same evaluation
    active_parents: RefCell<Option<Vec<String>>>,

    bulk: Cell<bool>,
    bulk_updates: RefCell<Vec<String>>,

    state_changed: Observers<Tracker, str>,
    section_changed: Observers<Tracker, str>,
    layout_changed: Observers<Tracker, str>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    pub fn new() -> Self {
        Self {
            items: ItemStore::new(),
            locations: LocationStore::new(),
            maps: HashMap::new(),
            layouts: HashMap::new(),
            script: None,
            provider_cache: RefCell::new(HashMap::new()),
            reachable_cache: RefCell::new(HashMap::new()),
            active_parents: RefCell::new(None),
            bulk: Cell::new(false),
            bulk_updates: RefCell::new(Vec::new()),
            state_changed: Observers::new(),
            section_changed: Observers::new(),
            layout_changed: Observers::new(),
        }
    }

    /// Create a tracker wired to a scripting host for `$`-predicates.
    pub fn with_script_host(host: Rc<dyn ScriptHost>) -> Self {
        let mut tracker = Self::new();
        tracker.script = Some(host);
        tracker
    }

    // ==================== Declaration loading ====================

    /// Load item declarations from a JSON array of descriptors.
    pub fn add_items(&mut self, blob: &Value) -> Result<()> {
        if !blob.is_array() {
            return Err(Error::load("items", "expected a JSON array"));
        }
        self.invalidate_all();
        let added = self.items.add_declared(blob)?;
        for id in &added {
            self.init_composite(id);
        }
        self.emit_layout_changed("");
        Ok(())
    }

    /// Load location declarations from a JSON array of descriptors.
    pub fn add_locations(&mut self, blob: &Value) -> Result<()> {
        if !blob.is_array() {
            return Err(Error::load("locations", "expected a JSON array"));
        }
        self.invalidate_all();
        self.locations.add_locations(blob)?;
        self.emit_layout_changed("");
        Ok(())
    }

    /// Store map blobs (a JSON array of named objects) for the UI layer.
    pub fn add_maps(&mut self, blob: &Value) -> Result<()> {
        let list = blob
            .as_array()
            .ok_or_else(|| Error::load("maps", "expected a JSON array"))?;
        for entry in list {
            let Some(name) = entry.get("name").and_then(Value::as_str) else {
                warn!("skipping map without a name");
                continue;
            };
            self.maps.insert(name.to_owned(), entry.clone());
        }
        self.emit_layout_changed("");
        Ok(())
    }

    /// Store layout blobs (a JSON object keyed by layout name).
    ///
    /// Two legacy forms are normalized: a root object wrapping everything in
    /// `layouts`, and a bare broadcast layout (`type` + `content`) which is
    /// stored under `tracker_broadcast`.
    pub fn add_layouts(&mut self, blob: &Value) -> Result<()> {
        let root = blob
            .as_object()
            .ok_or_else(|| Error::load("layouts", "expected a JSON object"))?;
        let normalized = if let Some(layouts) = root.get("layouts").and_then(Value::as_object) {
            layouts.clone()
        } else if root.get("type").is_some_and(Value::is_string)
            && root
                .get("content")
                .is_some_and(|c| c.is_array() || c.is_object())
        {
            let mut wrapped = serde_json::Map::new();
            wrapped.insert("tracker_broadcast".to_owned(), blob.clone());
            wrapped
        } else {
            root.clone()
        };
        for (name, layout) in normalized {
            if !layout.is_object() {
                warn!(layout = %name, "skipping non-object layout");
                continue;
            }
            if self.layouts.contains_key(&name) {
                warn!(layout = %name, "replacing existing layout");
            }
            self.layouts.insert(name, layout);
        }
        self.emit_layout_changed("");
        Ok(())
    }

    // ==================== Scripted items ====================

    /// Create a scripted item and return its id.
    pub fn create_scripted_item(&mut self, name: &str) -> String {
        self.items.create_scripted(name)
    }

    /// Set a scripted item's integer state, running the change pipeline.
    pub fn set_scripted_state(&mut self, id: &str, state: i32) -> bool {
        let changed = match self.items.get_mut(id) {
            Some(TrackerItem::Scripted(item)) => item.set_state(state),
            _ => return false,
        };
        if changed {
            self.after_item_change(id);
        }
        changed
    }

    /// Replace a scripted item's code list.
    pub fn set_scripted_codes(&mut self, id: &str, codes: Vec<String>) -> bool {
        let changed = match self.items.get_mut(id) {
            Some(TrackerItem::Scripted(item)) => item.set_codes(codes),
            _ => return false,
        };
        if changed {
            self.after_item_change(id);
        }
        changed
    }

    // ==================== Queries ====================

    pub fn items(&self) -> std::slice::Iter<'_, TrackerItem> {
        self.items.iter()
    }

    pub fn locations(&self) -> std::slice::Iter<'_, Location> {
        self.locations.iter()
    }

    pub fn item(&self, id: &str) -> Option<&TrackerItem> {
        self.items.get(id)
    }

    /// The first item, in load order, that can ever provide `code`.
    pub fn item_by_code(&self, code: &str) -> Option<&TrackerItem> {
        self.items.find_first_providing(code)
    }

    pub fn location(&self, id: &str, partial: bool) -> Option<&Location> {
        self.locations.location(id, partial)
    }

    pub fn section(&self, path: &str) -> Option<(&Location, &LocationSection)> {
        self.locations.section(path)
    }

    pub fn map(&self, name: &str) -> Option<&Value> {
        self.maps.get(name)
    }

    pub fn map_names(&self) -> Vec<&str> {
        self.maps.keys().map(String::as_str).collect()
    }

    pub fn layout(&self, name: &str) -> Option<&Value> {
        self.layouts.get(name)
    }

    pub fn has_layout(&self, name: &str) -> bool {
        self.layouts.contains_key(name)
    }

    /// All placements on the named map, paired with their location ids.
    pub fn map_locations(&self, map_name: &str) -> Vec<(&str, &MapLocation)> {
        self.locations.map_locations(map_name)
    }

    /// Resolve a code to the entity it addresses: `@loc/section` paths go to
    /// sections, everything else to the first item that can provide it.
    pub fn find_for_code(&self, code: &str) -> Option<CodeTarget<'_>> {
        if let Some(path) = code.strip_prefix('@') {
            if let Some((location, section)) = self.locations.section(path) {
                return Some(CodeTarget::Section(location, section));
            }
        }
        if let Some(item) = self.items.find_first_providing(code) {
            return Some(CodeTarget::Item(item));
        }
        debug!(code = %code, "no object found for code");
        None
    }

    /// Total number of `code` currently provided across all items, or the
    /// scripted predicate's result for `$`-codes. Memoized until the next
    /// item change.
    pub fn provider_count(&self, code: &str) -> i32 {
        if let Some(&count) = self.provider_cache.borrow().get(code) {
            return count;
        }
        let count = if code.starts_with('$') {
            self.call_script_predicate(code)
        } else {
            self.items.iter().map(|item| item.provides_code(code)).sum()
        };
        self.provider_cache.borrow_mut().insert(code.to_owned(), count);
        count
    }

    fn call_script_predicate(&self, code: &str) -> i32 {
        let body = &code[1..];
        let mut segments = body.split('|');
        let name = segments.next().unwrap_or_default();
        let args: Vec<String> = segments.map(str::to_owned).collect();
        let Some(host) = self.script.clone() else {
            warn!(predicate = %code, "no script host for predicate");
            return 0;
        };
        match host.call(name, &args, self) {
            Ok(value) => value.as_count(),
            Err(err) => {
                warn!(predicate = %code, error = %err, "script predicate failed");
                0
            }
        }
    }

    // ==================== Mutations ====================

    /// Apply a user action to an item by id.
    ///
    /// Composite toggles delegate to their referenced items; items whose own
    /// state machine rejects the action fall through to their base item.
    /// Returns whether any state changed.
    pub fn change_item_state(&mut self, id: &str, action: Action) -> bool {
        let composite = match self.items.get(id) {
            Some(TrackerItem::Declared(item)) if item.item_type() == ItemType::CompositeToggle => {
                Some((item.item_left().to_owned(), item.item_right().to_owned()))
            }
            _ => None,
        };
        if let Some((left, right)) = composite {
            let code = match action {
                Action::Primary => left,
                Action::Secondary | Action::Toggle => right,
                _ => return false,
            };
            if code.is_empty() {
                return false;
            }
            let target = self
                .items
                .find_first_providing(&code)
                .map(|item| item.id().to_owned());
            return match target {
                Some(target_id) if target_id != id => {
                    self.change_item_state(&target_id, Action::Primary)
                }
                _ => false,
            };
        }

        let (changed, base_code) = match self.items.get_mut(id) {
            None => return false,
            Some(TrackerItem::Declared(item)) => {
                (item.change_state(action), item.base_item().to_owned())
            }
            // scripted items are mutated by their host, not by user actions
            Some(TrackerItem::Scripted(_)) => return false,
        };
        if changed {
            self.after_item_change(id);
            return true;
        }
        if !base_code.is_empty() {
            let base_id = self
                .items
                .find_first_providing(&base_code)
                .map(|item| item.id().to_owned());
            if let Some(base_id) = base_id {
                if base_id != id {
                    return self.change_item_state(&base_id, Action::Primary);
                }
            }
        }
        false
    }

    /// Mark one more check of a section as cleared.
    pub fn clear_section_check(&mut self, path: &str) -> bool {
        let full_path = match self.locations.section_mut(path) {
            Some(section) => {
                if !section.clear_one() {
                    return false;
                }
                section.full_path()
            }
            None => return false,
        };
        self.after_section_change(&full_path);
        true
    }

    /// Un-clear one check of a section.
    pub fn unclear_section_check(&mut self, path: &str) -> bool {
        let full_path = match self.locations.section_mut(path) {
            Some(section) => {
                if !section.unclear_one() {
                    return false;
                }
                section.full_path()
            }
            None => return false,
        };
        self.after_section_change(&full_path);
        true
    }

    // ==================== Bulk updates ====================

    /// Enter bulk mode: change events queue up and the reachability cache
    /// is preserved until `end_bulk`.
    pub fn begin_bulk(&mut self) {
        self.bulk.set(true);
    }

    /// Leave bulk mode: clear the reachability cache once and flush one
    /// event per mutated id, in first-mutation order.
    pub fn end_bulk(&mut self) {
        if !self.bulk.get() {
            return;
        }
        self.bulk.set(false);
        self.reachable_cache.borrow_mut().clear();
        let queued = std::mem::take(&mut *self.bulk_updates.borrow_mut());
        for id in queued {
            self.emit_state_changed(&id);
        }
    }

    pub fn in_bulk(&self) -> bool {
        self.bulk.get()
    }

    // ==================== State save/load ====================

    /// Serialize the mutable tracker state.
    pub fn save_state(&self) -> Value {
        let mut json_items = BTreeMap::new();
        let mut lua_items = BTreeMap::new();
        for item in self.items.iter() {
            match item {
                TrackerItem::Declared(item) => {
                    json_items.insert(item.id().to_owned(), item.save_state());
                }
                TrackerItem::Scripted(item) => {
                    lua_items.insert(item.id().to_owned(), item.save_state());
                }
            }
        }
        let mut sections = BTreeMap::new();
        for location in self.locations.iter() {
            for section in location.sections() {
                let path = format!("{}/{}", location.id(), section.name());
                if sections.insert(path.clone(), section.save_state()).is_some() {
                    warn!(section = %path, "duplicate section path in state");
                }
            }
        }
        StateDocument {
            tracker: TrackerState {
                format_version: STATE_FORMAT_VERSION,
                json_items,
                lua_items,
                sections,
            },
        }
        .to_value()
    }

    /// Apply a previously saved state document.
    ///
    /// The document is validated before anything mutates; unknown ids are
    /// ignored; one change event fires per touched item.
    pub fn load_state(&mut self, doc: &Value) -> Result<()> {
        let state = StateDocument::from_value(doc)?;
        self.invalidate_all();
        self.bulk_updates.borrow_mut().clear();
        self.begin_bulk();

        for (id, item_state) in &state.tracker.json_items {
            let changed = match self.items.get_mut(id) {
                Some(TrackerItem::Declared(item)) => item.load_state(item_state),
                _ => false,
            };
            if changed {
                self.after_item_change(id);
            }
        }
        for (id, item_state) in &state.tracker.lua_items {
            let changed = match self.items.get_mut(id) {
                Some(TrackerItem::Scripted(item)) => item.load_state(item_state),
                _ => false,
            };
            if changed {
                self.after_item_change(id);
            }
        }
        for (path, section_state) in &state.tracker.sections {
            let full_path = match self.locations.section_mut(path) {
                Some(section) => {
                    if !section.load_state(section_state) {
                        continue;
                    }
                    section.full_path()
                }
                None => continue,
            };
            self.after_section_change(&full_path);
        }

        self.end_bulk();
        Ok(())
    }

    // ==================== Events ====================

    pub fn subscribe_state_changed(
        &mut self,
        callback: Box<dyn Fn(&Tracker, &str)>,
    ) -> Subscription {
        self.state_changed.subscribe(callback)
    }

    pub fn unsubscribe_state_changed(&mut self, token: Subscription) -> bool {
        self.state_changed.unsubscribe(token)
    }

    pub fn subscribe_section_changed(
        &mut self,
        callback: Box<dyn Fn(&Tracker, &str)>,
    ) -> Subscription {
        self.section_changed.subscribe(callback)
    }

    pub fn unsubscribe_section_changed(&mut self, token: Subscription) -> bool {
        self.section_changed.unsubscribe(token)
    }

    pub fn subscribe_layout_changed(
        &mut self,
        callback: Box<dyn Fn(&Tracker, &str)>,
    ) -> Subscription {
        self.layout_changed.subscribe(callback)
    }

    pub fn unsubscribe_layout_changed(&mut self, token: Subscription) -> bool {
        self.layout_changed.unsubscribe(token)
    }

    // ==================== Change pipeline ====================

    fn invalidate_all(&self) {
        self.provider_cache.borrow_mut().clear();
        self.reachable_cache.borrow_mut().clear();
    }

    fn invalidate_for_item_change(&self) {
        self.provider_cache.borrow_mut().clear();
        if !self.bulk.get() {
            self.reachable_cache.borrow_mut().clear();
        }
    }

    /// Everything that has to happen after one item's state changed:
    /// caches drop, the event goes out (or queues), derived items follow.
    fn after_item_change(&mut self, id: &str) {
        self.invalidate_for_item_change();
        self.notify_item_changed(id);
        self.sync_composites(id);
        self.refire_badges(id);
    }

    fn notify_item_changed(&mut self, id: &str) {
        if self.bulk.get() {
            let mut queued = self.bulk_updates.borrow_mut();
            if !queued.iter().any(|queued_id| queued_id == id) {
                queued.push(id.to_owned());
            }
        } else {
            self.emit_state_changed(id);
        }
    }

    /// Derive the initial stage of a freshly loaded composite from its
    /// referenced items, without firing events.
    fn init_composite(&mut self, id: &str) {
        let Some((left, right)) = self.composite_links(id) else {
            return;
        };
        let mask = self.composite_mask(&left, &right);
        if let Some(TrackerItem::Declared(item)) = self.items.get_mut(id) {
            item.set_active_stage(mask);
        }
    }

    fn composite_links(&self, id: &str) -> Option<(String, String)> {
        match self.items.get(id) {
            Some(TrackerItem::Declared(item))
                if item.item_type() == ItemType::CompositeToggle =>
            {
                Some((item.item_left().to_owned(), item.item_right().to_owned()))
            }
            _ => None,
        }
    }

    fn composite_mask(&self, left: &str, right: &str) -> usize {
        let bit = |code: &str, bit: usize| -> usize {
            if code.is_empty() {
                return 0;
            }
            match self.items.find_first_providing(code) {
                Some(item) if item.is_on() => bit,
                _ => 0,
            }
        };
        bit(left, 1) | bit(right, 2)
    }

    fn code_owner(&self, code: &str) -> Option<String> {
        if code.is_empty() {
            return None;
        }
        self.items
            .find_first_providing(code)
            .map(|item| item.id().to_owned())
    }

    /// Keep composite toggles and their referenced items consistent after
    /// `changed_id` mutated, in either direction.
    fn sync_composites(&mut self, changed_id: &str) {
        let composites: Vec<(String, usize, String, String)> = self
            .items
            .iter()
            .filter_map(|entry| match entry {
                TrackerItem::Declared(item)
                    if item.item_type() == ItemType::CompositeToggle =>
                {
                    Some((
                        item.id().to_owned(),
                        item.active_stage(),
                        item.item_left().to_owned(),
                        item.item_right().to_owned(),
                    ))
                }
                _ => None,
            })
            .collect();

        for (composite_id, stage, left, right) in composites {
            if composite_id == changed_id {
                // push the stage bits down into the referenced items
                for (bit, code) in [(1usize, &left), (2usize, &right)] {
                    let Some(owner_id) = self.code_owner(code) else {
                        continue;
                    };
                    if owner_id == composite_id {
                        continue;
                    }
                    let desired = stage & bit != 0;
                    let changed = self
                        .items
                        .get_mut(&owner_id)
                        .map(|owner| owner.set_on(desired))
                        .unwrap_or(false);
                    if changed {
                        self.after_item_change(&owner_id);
                    }
                }
            } else {
                // recompute the composite when one of its referents changed
                let left_owner = self.code_owner(&left);
                let right_owner = self.code_owner(&right);
                let referenced = left_owner.as_deref() == Some(changed_id)
                    || right_owner.as_deref() == Some(changed_id);
                if !referenced {
                    continue;
                }
                let mask = self.composite_mask(&left, &right);
                if mask == stage {
                    continue;
                }
                if let Some(TrackerItem::Declared(item)) = self.items.get_mut(&composite_id) {
                    item.set_active_stage(mask);
                }
                self.after_item_change(&composite_id);
            }
        }
    }

    /// Re-fire change events for badged items layered over `changed_id`.
    fn refire_badges(&mut self, changed_id: &str) {
        let badges: Vec<(String, String)> = self
            .items
            .iter()
            .filter_map(|entry| match entry {
                TrackerItem::Declared(item) if !item.base_item().is_empty() => {
                    Some((item.id().to_owned(), item.base_item().to_owned()))
                }
                _ => None,
            })
            .collect();

        for (badge_id, base_code) in badges {
            if badge_id == changed_id {
                continue;
            }
            if self.code_owner(&base_code).as_deref() != Some(changed_id) {
                continue;
            }
            self.invalidate_for_item_change();
            self.notify_item_changed(&badge_id);
            self.refire_badges(&badge_id);
        }
    }

    fn after_section_change(&mut self, path: &str) {
        self.emit_section_changed(path);
        // sections whose rules ref the changed section re-fire too
        let dependents: Vec<String> = self
            .locations
            .iter()
            .flat_map(Location::sections)
            .filter(|section| {
                !section.rules_ref().is_empty()
                    && self
                        .locations
                        .section(section.rules_ref())
                        .is_some_and(|(_, target)| target.full_path() == path)
            })
            .map(LocationSection::full_path)
            .collect();
        for dependent in dependents {
            if dependent != path {
                self.emit_section_changed(&dependent);
            }
        }
    }

    fn emit_state_changed(&mut self, id: &str) {
        let entries = self.state_changed.begin_emit();
        for (_, callback) in &entries {
            callback(&*self, id);
        }
        self.state_changed.end_emit(entries);
    }

    fn emit_section_changed(&mut self, path: &str) {
        let entries = self.section_changed.begin_emit();
        for (_, callback) in &entries {
            callback(&*self, path);
        }
        self.section_changed.end_emit(entries);
    }

    fn emit_layout_changed(&mut self, name: &str) {
        let entries = self.layout_changed.begin_emit();
        for (_, callback) in &entries {
            callback(&*self, name);
        }
        self.layout_changed.end_emit(entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorded_events(tracker: &mut Tracker) -> Rc<RefCell<Vec<String>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        tracker.subscribe_state_changed(Box::new(move |_, id| {
            sink.borrow_mut().push(id.to_owned());
        }));
        events
    }

    #[test]
    fn test_provider_count_sums_over_all_items() {
        let mut tracker = Tracker::new();
        tracker
            .add_items(&json!([
                { "name": "Sword", "codes": "sword" },
                { "name": "Spare Sword", "codes": "sword" },
            ]))
            .unwrap();
        assert_eq!(tracker.provider_count("sword"), 0);
        tracker.change_item_state("1", Action::Primary);
        assert_eq!(tracker.provider_count("sword"), 1);
        tracker.change_item_state("2", Action::Primary);
        assert_eq!(tracker.provider_count("sword"), 2);
    }

    #[test]
    fn test_provider_count_is_memoized_until_a_change() {
        let mut tracker = Tracker::new();
        tracker
            .add_items(&json!([{ "name": "Sword", "codes": "sword" }]))
            .unwrap();
        assert_eq!(tracker.provider_count("sword"), 0);
        assert_eq!(tracker.provider_cache.borrow().get("sword"), Some(&0));
        tracker.change_item_state("1", Action::Primary);
        assert!(tracker.provider_cache.borrow().is_empty());
        assert_eq!(tracker.provider_count("sword"), 1);
    }

    #[test]
    fn test_find_for_code_prefers_sections_for_at_codes() {
        let mut tracker = Tracker::new();
        tracker
            .add_items(&json!([{ "name": "Sword", "codes": "sword" }]))
            .unwrap();
        tracker
            .add_locations(&json!([
                { "name": "Cave", "sections": [{ "name": "Chest" }] }
            ]))
            .unwrap();

        match tracker.find_for_code("@Cave/Chest") {
            Some(CodeTarget::Section(location, section)) => {
                assert_eq!(location.id(), "Cave");
                assert_eq!(section.name(), "Chest");
            }
            _ => panic!("expected a section"),
        }
        match tracker.find_for_code("sword") {
            Some(CodeTarget::Item(item)) => assert_eq!(item.name(), "Sword"),
            _ => panic!("expected an item"),
        }
        assert!(tracker.find_for_code("@Cave/Missing").is_none());
    }

    #[test]
    fn test_change_events_fire_in_mutation_order() {
        let mut tracker = Tracker::new();
        tracker
            .add_items(&json!([
                { "name": "Sword", "codes": "sword" },
                { "name": "Shield", "codes": "shield" },
            ]))
            .unwrap();
        let events = recorded_events(&mut tracker);

        tracker.change_item_state("2", Action::Primary);
        tracker.change_item_state("1", Action::Primary);
        assert_eq!(*events.borrow(), vec!["2".to_owned(), "1".to_owned()]);
    }

    #[test]
    fn test_handlers_can_read_the_tracker() {
        let mut tracker = Tracker::new();
        tracker
            .add_items(&json!([{ "name": "Sword", "codes": "sword" }]))
            .unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        tracker.subscribe_state_changed(Box::new(move |tracker, _| {
            // the cache was invalidated before this event fired
            sink.borrow_mut().push(tracker.provider_count("sword"));
        }));
        tracker.change_item_state("1", Action::Primary);
        tracker.change_item_state("1", Action::Primary);
        assert_eq!(*seen.borrow(), vec![1, 0]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let mut tracker = Tracker::new();
        tracker
            .add_items(&json!([{ "name": "Sword", "codes": "sword" }]))
            .unwrap();
        let events = Rc::new(RefCell::new(0u32));
        let sink = Rc::clone(&events);
        let token = tracker.subscribe_state_changed(Box::new(move |_, _| {
            *sink.borrow_mut() += 1;
        }));
        tracker.change_item_state("1", Action::Primary);
        assert!(tracker.unsubscribe_state_changed(token));
        tracker.change_item_state("1", Action::Primary);
        assert_eq!(*events.borrow(), 1);
    }

    #[test]
    fn test_bulk_coalesces_and_preserves_the_reachable_cache() {
        let mut tracker = Tracker::new();
        tracker
            .add_items(&json!([
                { "name": "Sword", "codes": "sword" },
                { "name": "Shield", "codes": "shield" },
                { "name": "Bow", "codes": "bow" },
            ]))
            .unwrap();
        tracker
            .add_locations(&json!([
                { "name": "Armory", "access_rules": [["sword"]] },
                {
                    "name": "Annex",
                    "sections": [{ "name": "Chest", "access_rules": [["@Armory"]] }]
                }
            ]))
            .unwrap();
        // populate the @-atom memo
        assert_eq!(
            tracker.is_reachable_section("Annex/Chest"),
            AccessibilityLevel::None
        );
        let events = recorded_events(&mut tracker);

        tracker.begin_bulk();
        tracker.change_item_state("1", Action::Primary);
        tracker.change_item_state("2", Action::Primary);
        tracker.change_item_state("1", Action::Primary);
        tracker.change_item_state("3", Action::Primary);
        assert!(events.borrow().is_empty());
        // the memoized @-atom is served stale during the bulk
        assert_eq!(
            tracker.is_reachable_section("Annex/Chest"),
            AccessibilityLevel::None
        );
        tracker.end_bulk();

        assert_eq!(
            *events.borrow(),
            vec!["1".to_owned(), "2".to_owned(), "3".to_owned()]
        );
        assert_eq!(
            tracker.is_reachable_section("Annex/Chest"),
            AccessibilityLevel::Normal
        );
    }

    #[test]
    fn test_composite_follows_its_parts() {
        let mut tracker = Tracker::new();
        tracker
            .add_items(&json!([
                { "name": "Left Glove", "codes": "glove1" },
                { "name": "Right Glove", "codes": "glove2" },
                {
                    "name": "Gloves",
                    "type": "composite_toggle",
                    "item_left": "glove1",
                    "item_right": "glove2",
                    "stages": [
                        { "codes": "gloves_none" },
                        { "codes": "gloves_left" },
                        { "codes": "gloves_right" },
                        { "codes": "gloves_both" }
                    ]
                }
            ]))
            .unwrap();
        let events = recorded_events(&mut tracker);

        tracker.change_item_state("1", Action::Primary);
        let composite = tracker.item("3").unwrap().as_declared().unwrap();
        assert_eq!(composite.active_stage(), 1);

        tracker.change_item_state("2", Action::Primary);
        let composite = tracker.item("3").unwrap().as_declared().unwrap();
        assert_eq!(composite.active_stage(), 3);
        assert_eq!(tracker.provider_count("gloves_both"), 1);

        // part event precedes the derived composite event
        assert_eq!(
            *events.borrow(),
            vec![
                "1".to_owned(),
                "3".to_owned(),
                "2".to_owned(),
                "3".to_owned()
            ]
        );
    }

    #[test]
    fn test_composite_actions_delegate_to_the_parts() {
        let mut tracker = Tracker::new();
        tracker
            .add_items(&json!([
                { "name": "Left Glove", "codes": "glove1" },
                { "name": "Right Glove", "codes": "glove2" },
                {
                    "name": "Gloves",
                    "type": "composite_toggle",
                    "item_left": "glove1",
                    "item_right": "glove2"
                }
            ]))
            .unwrap();

        assert!(tracker.change_item_state("3", Action::Primary));
        assert_eq!(tracker.provider_count("glove1"), 1);
        assert_eq!(tracker.provider_count("glove2"), 0);

        assert!(tracker.change_item_state("3", Action::Secondary));
        assert_eq!(tracker.provider_count("glove2"), 1);

        assert!(tracker.change_item_state("3", Action::Primary));
        assert_eq!(tracker.provider_count("glove1"), 0);
    }

    #[test]
    fn test_badge_refires_when_the_base_changes() {
        let mut tracker = Tracker::new();
        tracker
            .add_items(&json!([
                { "name": "Boss", "codes": "boss" },
                {
                    "name": "Boss Badge",
                    "type": "toggle_badged",
                    "codes": "boss_badge",
                    "base_item": "boss"
                }
            ]))
            .unwrap();
        let events = recorded_events(&mut tracker);

        // Primary on the badge falls through to the base item
        assert!(tracker.change_item_state("2", Action::Primary));
        assert!(tracker.item("1").unwrap().as_declared().unwrap().enabled());
        // base event first, then the badge re-fire
        assert_eq!(*events.borrow(), vec!["1".to_owned(), "2".to_owned()]);

        // Secondary flips the badge's own flag
        assert!(tracker.change_item_state("2", Action::Secondary));
        assert!(tracker.item("2").unwrap().as_declared().unwrap().enabled());
    }

    #[test]
    fn test_section_clearing_and_ref_fanout() {
        let mut tracker = Tracker::new();
        tracker
            .add_locations(&json!([
                {
                    "name": "Cave",
                    "sections": [{ "name": "Chest", "chest_count": 2 }]
                },
                {
                    "name": "Mirror",
                    "sections": [{ "name": "Chest", "ref": "Cave/Chest" }]
                }
            ]))
            .unwrap();
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        tracker.subscribe_section_changed(Box::new(move |_, path| {
            sink.borrow_mut().push(path.to_owned());
        }));

        assert!(tracker.clear_section_check("Cave/Chest"));
        assert_eq!(
            *events.borrow(),
            vec!["Cave/Chest".to_owned(), "Mirror/Chest".to_owned()]
        );
        assert!(tracker.clear_section_check("Cave/Chest"));
        assert!(!tracker.clear_section_check("Cave/Chest"));
        assert!(tracker.unclear_section_check("Cave/Chest"));
        assert!(!tracker.unclear_section_check("Missing/Chest"));
    }

    #[test]
    fn test_save_load_round_trip() {
        let items = json!([
            { "name": "Sword", "codes": "sword" },
            {
                "name": "Boots",
                "type": "progressive",
                "stages": [{ "codes": "boots1" }, { "codes": "boots2" }]
            },
            { "name": "Rupees", "type": "consumable", "codes": "rupee" }
        ]);
        let locations = json!([
            { "name": "Cave", "sections": [{ "name": "Chest", "chest_count": 3 }] }
        ]);

        let mut tracker = Tracker::new();
        tracker.add_items(&items).unwrap();
        tracker.add_locations(&locations).unwrap();
        let hint = tracker.create_scripted_item("Hint");
        tracker.set_scripted_codes(&hint, vec!["hint".to_owned()]);
        tracker.set_scripted_state(&hint, 2);

        tracker.change_item_state("1", Action::Primary);
        tracker.change_item_state("2", Action::Primary);
        for _ in 0..5 {
            tracker.change_item_state("3", Action::Increment);
        }
        tracker.clear_section_check("Cave/Chest");
        tracker.clear_section_check("Cave/Chest");

        let saved = tracker.save_state();

        let mut restored = Tracker::new();
        restored.add_items(&items).unwrap();
        restored.add_locations(&locations).unwrap();
        let hint = restored.create_scripted_item("Hint");
        restored.set_scripted_codes(&hint, vec!["hint".to_owned()]);
        restored.load_state(&saved).unwrap();

        assert_eq!(restored.provider_count("sword"), 1);
        assert_eq!(restored.provider_count("boots2"), 1);
        assert_eq!(restored.provider_count("rupee"), 5);
        assert_eq!(restored.provider_count("hint"), 2);
        let (_, section) = restored.section("Cave/Chest").unwrap();
        assert_eq!(section.cleared(), 2);
        assert_eq!(restored.save_state(), saved);
    }

    #[test]
    fn test_load_emits_one_event_per_touched_id() {
        let items = json!([
            { "name": "Sword", "codes": "sword" },
            { "name": "Shield", "codes": "shield" },
        ]);
        let mut tracker = Tracker::new();
        tracker.add_items(&items).unwrap();
        tracker.change_item_state("1", Action::Primary);
        let saved = tracker.save_state();

        let mut restored = Tracker::new();
        restored.add_items(&items).unwrap();
        let events = recorded_events(&mut restored);
        restored.load_state(&saved).unwrap();

        // only the sword differs from the freshly loaded state
        assert_eq!(*events.borrow(), vec!["1".to_owned()]);
        assert!(!restored.in_bulk());
    }

    #[test]
    fn test_load_ignores_unknown_ids() {
        let mut tracker = Tracker::new();
        tracker
            .add_items(&json!([{ "name": "Sword", "codes": "sword" }]))
            .unwrap();
        let doc = json!({
            "tracker": {
                "format_version": 1,
                "json_items": {
                    "1": { "enabled": true, "stage": 0, "count": 0 },
                    "99": { "enabled": true, "stage": 0, "count": 0 }
                },
                "sections": { "Ghost/Chest": { "cleared": 1 } }
            }
        });
        tracker.load_state(&doc).unwrap();
        assert_eq!(tracker.provider_count("sword"), 1);
    }

    #[test]
    fn test_bad_state_documents_leave_state_untouched() {
        let mut tracker = Tracker::new();
        tracker
            .add_items(&json!([{ "name": "Sword", "codes": "sword" }]))
            .unwrap();
        tracker.change_item_state("1", Action::Primary);

        assert!(matches!(
            tracker.load_state(&json!("nope")),
            Err(Error::StateFormat(_))
        ));
        assert!(matches!(
            tracker.load_state(&json!({ "tracker": { "format_version": 2 } })),
            Err(Error::StateVersion { found: 2 })
        ));
        assert_eq!(tracker.provider_count("sword"), 1);
    }

    #[test]
    fn test_bad_declaration_blobs_are_rejected_whole() {
        let mut tracker = Tracker::new();
        tracker
            .add_items(&json!([{ "name": "Sword", "codes": "sword" }]))
            .unwrap();
        assert!(tracker.add_items(&json!({})).is_err());
        assert!(tracker.add_locations(&json!("x")).is_err());
        assert!(tracker.add_maps(&json!(5)).is_err());
        assert!(tracker.add_layouts(&json!([])).is_err());
        // earlier data survives
        assert_eq!(tracker.items().count(), 1);
    }

    #[test]
    fn test_maps_and_layouts_are_stored_verbatim() {
        let mut tracker = Tracker::new();
        tracker
            .add_maps(&json!([
                { "name": "overworld", "img": "maps/ow.png", "scale": 2 },
                { "img": "nameless.png" }
            ]))
            .unwrap();
        assert!(tracker.map("overworld").is_some());
        assert_eq!(tracker.map_names(), vec!["overworld"]);

        tracker
            .add_layouts(&json!({ "tracker_default": { "type": "container" } }))
            .unwrap();
        assert!(tracker.has_layout("tracker_default"));
        assert_eq!(
            tracker.layout("tracker_default").unwrap()["type"],
            json!("container")
        );
    }

    #[test]
    fn test_legacy_layout_forms_are_normalized() {
        let mut tracker = Tracker::new();
        // legacy: everything wrapped in "layouts"
        tracker
            .add_layouts(&json!({
                "layouts": { "tracker_default": { "type": "container" } }
            }))
            .unwrap();
        assert!(tracker.has_layout("tracker_default"));
        assert!(!tracker.has_layout("layouts"));

        // legacy: a bare broadcast layout
        tracker
            .add_layouts(&json!({ "type": "container", "content": [] }))
            .unwrap();
        assert!(tracker.has_layout("tracker_broadcast"));
    }

    #[test]
    fn test_layout_changed_fires_on_declaration_loads() {
        let mut tracker = Tracker::new();
        let count = Rc::new(RefCell::new(0u32));
        let sink = Rc::clone(&count);
        tracker.subscribe_layout_changed(Box::new(move |_, _| {
            *sink.borrow_mut() += 1;
        }));
        tracker.add_items(&json!([])).unwrap();
        tracker.add_locations(&json!([])).unwrap();
        tracker.add_maps(&json!([])).unwrap();
        tracker.add_layouts(&json!({})).unwrap();
        assert_eq!(*count.borrow(), 4);
    }
}
