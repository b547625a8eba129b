//! Locations, their sections, and the location store.
//!
//! Location ids are slash-separated paths built from the declaration tree:
//! nested declarations prepend their parents' names. Sections hang off a
//! location, carry their own rule sets, and remember their parent id so the
//! full `location_id/section_name` path can be rebuilt anywhere.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};
use crate::rules::{parse_rule_sets, ClauseDescriptor};
use crate::state::SectionState;

/// Placement of a location on a named map. Opaque to the evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapLocation {
    map: String,
    x: i32,
    y: i32,
}

impl MapLocation {
    pub fn map(&self) -> &str {
        &self.map
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }
}

/// One checkable section of a location.
#[derive(Debug, Clone)]
pub struct LocationSection {
    name: String,
    parent_id: String,
    access_rules: Vec<Vec<String>>,
    visibility_rules: Vec<Vec<String>>,
    rules_ref: String,
    chest_count: u32,
    cleared: u32,
}

impl LocationSection {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the owning location.
    pub fn parent_id(&self) -> &str {
        &self.parent_id
    }

    /// The `location_id/section_name` path used in rules, caches and state.
    pub fn full_path(&self) -> String {
        format!("{}/{}", self.parent_id, self.name)
    }

    pub fn access_rules(&self) -> &[Vec<String>] {
        &self.access_rules
    }

    pub fn visibility_rules(&self) -> &[Vec<String>] {
        &self.visibility_rules
    }

    /// Path of another section whose rules replace this section's rules on
    /// evaluation; empty when the section carries its own rules.
    pub fn rules_ref(&self) -> &str {
        &self.rules_ref
    }

    /// Total number of checks in this section.
    pub fn chest_count(&self) -> u32 {
        self.chest_count
    }

    /// How many checks have been cleared.
    pub fn cleared(&self) -> u32 {
        self.cleared
    }

    pub(crate) fn clear_one(&mut self) -> bool {
        if self.cleared >= self.chest_count {
            return false;
        }
        self.cleared += 1;
        true
    }

    pub(crate) fn unclear_one(&mut self) -> bool {
        if self.cleared == 0 {
            return false;
        }
        self.cleared -= 1;
        true
    }

    pub(crate) fn save_state(&self) -> SectionState {
        SectionState {
            cleared: self.cleared,
        }
    }

    pub(crate) fn load_state(&mut self, state: &SectionState) -> bool {
        let cleared = state.cleared.min(self.chest_count);
        if self.cleared == cleared {
            return false;
        }
        self.cleared = cleared;
        true
    }
}

/// A named place with sections, rules, and map placements.
#[derive(Debug, Clone)]
pub struct Location {
    id: String,
    name: String,
    short_name: String,
    access_rules: Vec<Vec<String>>,
    visibility_rules: Vec<Vec<String>>,
    sections: Vec<LocationSection>,
    map_locations: Vec<MapLocation>,
}

impl Location {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn access_rules(&self) -> &[Vec<String>] {
        &self.access_rules
    }

    pub fn visibility_rules(&self) -> &[Vec<String>] {
        &self.visibility_rules
    }

    pub fn sections(&self) -> &[LocationSection] {
        &self.sections
    }

    pub fn map_locations(&self) -> &[MapLocation] {
        &self.map_locations
    }

    pub(crate) fn sections_mut(&mut self) -> &mut [LocationSection] {
        &mut self.sections
    }

    /// Union another declaration of the same location into this one.
    pub(crate) fn merge(&mut self, other: Location) {
        for mut section in other.sections {
            if self.sections.iter().any(|s| s.name() == section.name) {
                warn!(
                    location = %self.id,
                    section = %section.name,
                    "dropping duplicate section while merging location"
                );
                continue;
            }
            section.parent_id = self.id.clone();
            self.sections.push(section);
        }
        self.map_locations.extend(other.map_locations);
    }

    #[cfg(feature = "rename-duplicates")]
    pub(crate) fn set_id(&mut self, id: String) {
        for section in &mut self.sections {
            section.parent_id = id.clone();
        }
        self.id = id;
    }
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct LocationDescriptor {
    #[serde(default)]
    name: String,
    #[serde(default)]
    short_name: String,
    #[serde(default)]
    parent: String,
    #[serde(default)]
    access_rules: Vec<ClauseDescriptor>,
    #[serde(default)]
    visibility_rules: Vec<ClauseDescriptor>,
    #[serde(default)]
    children: Vec<Value>,
    #[serde(default)]
    sections: Vec<Value>,
    #[serde(default)]
    map_locations: Vec<MapLocationDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
struct SectionDescriptor {
    #[serde(default)]
    name: String,
    #[serde(default)]
    access_rules: Vec<ClauseDescriptor>,
    #[serde(default)]
    visibility_rules: Vec<ClauseDescriptor>,
    #[serde(default, rename = "ref")]
    rules_ref: String,
    #[serde(default = "default_chest_count")]
    chest_count: u32,
}

fn default_chest_count() -> u32 {
    1
}

/// Placements accept either `x`/`y` fields or a legacy `coords` pair.
#[derive(Debug, Clone, Deserialize)]
struct MapLocationDescriptor {
    map: String,
    #[serde(default)]
    x: i32,
    #[serde(default)]
    y: i32,
    #[serde(default)]
    coords: Option<[i32; 2]>,
}

impl MapLocationDescriptor {
    fn into_map_location(self) -> MapLocation {
        let (x, y) = match self.coords {
            Some([x, y]) => (x, y),
            None => (self.x, self.y),
        };
        MapLocation {
            map: self.map,
            x,
            y,
        }
    }
}

fn build_location(descriptor: LocationDescriptor, parent_path: &str) -> Result<(Location, Vec<Value>)> {
    let parent = if descriptor.parent.is_empty() {
        parent_path.to_owned()
    } else {
        descriptor.parent
    };
    let id = if parent.is_empty() {
        descriptor.name.clone()
    } else {
        format!("{}/{}", parent, descriptor.name)
    };

    let access_rules = parse_rule_sets(descriptor.access_rules)?;
    let visibility_rules = parse_rule_sets(descriptor.visibility_rules)?;

    let mut sections = Vec::with_capacity(descriptor.sections.len());
    for raw in descriptor.sections {
        let section: SectionDescriptor = match serde_json::from_value(raw) {
            Ok(section) => section,
            Err(err) => {
                warn!(location = %id, error = %err, "skipping malformed section descriptor");
                continue;
            }
        };
        let access_rules = match parse_rule_sets(section.access_rules) {
            Ok(rules) => rules,
            Err(err) => {
                warn!(location = %id, section = %section.name, error = %err, "skipping section");
                continue;
            }
        };
        let visibility_rules = match parse_rule_sets(section.visibility_rules) {
            Ok(rules) => rules,
            Err(err) => {
                warn!(location = %id, section = %section.name, error = %err, "skipping section");
                continue;
            }
        };
        sections.push(LocationSection {
            name: section.name,
            parent_id: id.clone(),
            access_rules,
            visibility_rules,
            rules_ref: section.rules_ref,
            chest_count: section.chest_count.max(1),
            cleared: 0,
        });
    }

    let location = Location {
        id,
        name: descriptor.name,
        short_name: descriptor.short_name,
        access_rules,
        visibility_rules,
        sections,
        map_locations: descriptor
            .map_locations
            .into_iter()
            .map(MapLocationDescriptor::into_map_location)
            .collect(),
    };
    Ok((location, descriptor.children))
}

fn flatten(blob: &[Value], parent_path: &str, out: &mut Vec<Location>) {
    for entry in blob {
        let descriptor: LocationDescriptor = match serde_json::from_value(entry.clone()) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!(error = %err, "skipping malformed location descriptor");
                continue;
            }
        };
        match build_location(descriptor, parent_path) {
            Ok((location, children)) => {
                let id = location.id.clone();
                out.push(location);
                flatten(&children, &id, out);
            }
            Err(err) => {
                warn!(error = %err, "skipping location with invalid rules");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Ordered storage for every location the tracker knows about.
#[derive(Debug, Default)]
pub struct LocationStore {
    locations: Vec<Location>,
}

impl LocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a tree of location descriptors.
    ///
    /// Duplicate ids are merged into the existing entry (or renamed with an
    /// `[n]` suffix when the `rename-duplicates` feature is enabled).
    pub(crate) fn add_locations(&mut self, blob: &Value) -> Result<()> {
        let list = blob
            .as_array()
            .ok_or_else(|| Error::load("locations", "expected a JSON array"))?;
        let mut incoming = Vec::new();
        flatten(list, "", &mut incoming);

        for location in incoming {
            #[cfg(not(feature = "rename-duplicates"))]
            {
                if let Some(existing) = self
                    .locations
                    .iter_mut()
                    .find(|l| l.id() == location.id())
                {
                    warn!(location = %location.id(), "merging duplicate location");
                    existing.merge(location);
                    continue;
                }
                self.locations.push(location);
            }
            #[cfg(feature = "rename-duplicates")]
            {
                let mut location = location;
                if self.locations.iter().any(|l| l.id() == location.id()) {
                    let renamed = self.unique_id(location.id());
                    warn!(
                        location = %location.id(),
                        renamed = %renamed,
                        "renaming duplicate location"
                    );
                    location.set_id(renamed);
                }
                self.locations.push(location);
            }
        }
        Ok(())
    }

    #[cfg(feature = "rename-duplicates")]
    fn unique_id(&self, base: &str) -> String {
        let mut n = 1;
        loop {
            let candidate = format!("{base}[{n}]");
            if !self.locations.iter().any(|l| l.id() == candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Look up a location by id.
    ///
    /// With `partial` set, a miss falls back to matching the display name
    /// (ids without `/`) or any id ending in `/id` (ids with `/`).
    pub fn location(&self, id: &str, partial: bool) -> Option<&Location> {
        self.location_index(id, partial).map(|i| &self.locations[i])
    }

    fn location_index(&self, id: &str, partial: bool) -> Option<usize> {
        if let Some(i) = self.locations.iter().position(|l| l.id() == id) {
            return Some(i);
        }
        if !partial {
            return None;
        }
        if !id.contains('/') {
            self.locations.iter().position(|l| l.name() == id)
        } else {
            let suffix = format!("/{id}");
            self.locations
                .iter()
                .position(|l| l.id().len() > suffix.len() && l.id().ends_with(&suffix))
        }
    }

    /// Resolve a `location_path/section_name` path, splitting at the last
    /// slash and resolving the location part with partial matching.
    pub fn section(&self, path: &str) -> Option<(&Location, &LocationSection)> {
        let pos = path.rfind('/')?;
        let (location_id, section_name) = (&path[..pos], &path[pos + 1..]);
        let location = self.location(location_id, true)?;
        let section = location
            .sections()
            .iter()
            .find(|s| s.name() == section_name)?;
        Some((location, section))
    }

    pub(crate) fn section_mut(&mut self, path: &str) -> Option<&mut LocationSection> {
        let pos = path.rfind('/')?;
        let (location_id, section_name) = (&path[..pos], &path[pos + 1..]);
        let location_index = self.location_index(location_id, true)?;
        let section_index = self.locations[location_index]
            .sections()
            .iter()
            .position(|s| s.name() == section_name)?;
        self.locations[location_index]
            .sections_mut()
            .get_mut(section_index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Location> {
        self.locations.iter()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// All placements on the named map, paired with their location ids.
    pub fn map_locations(&self, map_name: &str) -> Vec<(&str, &MapLocation)> {
        let mut placements = Vec::new();
        for location in &self.locations {
            for placement in location.map_locations() {
                if placement.map() == map_name {
                    placements.push((location.id(), placement));
                }
            }
        }
        placements
    }
}
