//! The rule evaluator: reachability and visibility over the rule graph.
//!
//! Rule sets are disjunctions of conjunctions. Each clause walks its atoms
//! left to right with a running level that starts at `Normal` and degrades;
//! clauses then join into the final level. `@`-atoms recurse into other
//! locations and sections, so every query threads an explicit recursion
//! stack: a reference already on the stack short-circuits to `None` and
//! records the target as a cycle witness.
//!
//! A sub-evaluation that returned through a cycle must not be memoized:
//! starting the same evaluation from a different root can legitimately
//! produce a different level. Only `@`-atoms whose sub-result carried no
//! surviving witnesses land in the reachability cache, and only for access
//! (non-visibility) queries. A positive result discards its witnesses on
//! the way up: circularity cannot cause a false positive.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use super::Tracker;
use crate::access::AccessibilityLevel;
use crate::location::{Location, LocationSection};
use crate::rules::Atom;

/// Level plus the cycle witnesses accumulated beneath it.
#[derive(Debug, Clone, Default)]
pub(crate) struct RuleOutcome {
    pub level: AccessibilityLevel,
    pub cycles: BTreeSet<String>,
}

impl RuleOutcome {
    fn normal() -> Self {
        Self {
            level: AccessibilityLevel::Normal,
            cycles: BTreeSet::new(),
        }
    }

    fn cycle(id: String) -> Self {
        Self {
            level: AccessibilityLevel::None,
            cycles: BTreeSet::from([id]),
        }
    }
}

impl Tracker {
    // ==================== Query surface ====================

    /// Current accessibility of a location, by id (partial matching).
    pub fn is_reachable_location(&self, id: &str) -> AccessibilityLevel {
        let Some(location) = self.locations.location(id, true) else {
            return AccessibilityLevel::None;
        };
        self.with_query_stack(|tracker, parents| {
            tracker.location_access(location, parents).level
        })
    }

    /// Current accessibility of a section, by `location_path/section_name`.
    pub fn is_reachable_section(&self, path: &str) -> AccessibilityLevel {
        let Some((_, section)) = self.locations.section(path) else {
            return AccessibilityLevel::None;
        };
        self.with_query_stack(|tracker, parents| {
            tracker.section_access(section, parents).level
        })
    }

    /// Whether a location is visible at all.
    pub fn is_visible_location(&self, id: &str) -> bool {
        let Some(location) = self.locations.location(id, true) else {
            return false;
        };
        self.with_query_stack(|tracker, parents| tracker.location_visible(location, parents))
    }

    /// Whether a section is visible at all.
    pub fn is_visible_section(&self, path: &str) -> bool {
        let Some((_, section)) = self.locations.section(path) else {
            return false;
        };
        self.with_query_stack(|tracker, parents| tracker.section_visible(section, parents))
    }

    /// Run a query on the published recursion stack if a scripted predicate
    /// is mid-call (so its re-entrant queries see the whole evaluation), or
    /// on a fresh stack otherwise.
    fn with_query_stack<R>(&self, query: impl FnOnce(&Self, &mut Vec<String>) -> R) -> R {
        let published = self.active_parents.borrow_mut().take();
        let resume = published.is_some();
        let mut parents = published.unwrap_or_default();
        let result = query(self, &mut parents);
        if resume {
            *self.active_parents.borrow_mut() = Some(parents);
        }
        result
    }

    // ==================== Cycle-guarded wrappers ====================

    fn location_access(&self, location: &Location, parents: &mut Vec<String>) -> RuleOutcome {
        if parents.iter().any(|p| p == location.id()) {
            debug!(location = %location.id(), "access rule recursion detected");
            return RuleOutcome::cycle(location.id().to_owned());
        }
        parents.push(location.id().to_owned());
        let mut outcome = self.eval_rule_sets(location.access_rules(), false, parents);
        if outcome.level == AccessibilityLevel::None {
            outcome.cycles.remove(location.id());
        } else {
            outcome.cycles.clear();
        }
        parents.pop();
        outcome
    }

    fn section_access(&self, section: &LocationSection, parents: &mut Vec<String>) -> RuleOutcome {
        let Some(real) = self.deref_section(section) else {
            return RuleOutcome::default();
        };
        let id = real.full_path();
        if parents.iter().any(|p| *p == id) {
            debug!(section = %id, "access rule recursion detected");
            return RuleOutcome::cycle(id);
        }
        parents.push(id.clone());
        let mut outcome = self.eval_rule_sets(real.access_rules(), false, parents);
        if outcome.level == AccessibilityLevel::None {
            outcome.cycles.remove(&id);
        } else {
            outcome.cycles.clear();
        }
        parents.pop();
        outcome
    }

    fn location_visible(&self, location: &Location, parents: &mut Vec<String>) -> bool {
        if parents.iter().any(|p| p == location.id()) {
            debug!(location = %location.id(), "visibility rule recursion detected");
            return false;
        }
        parents.push(location.id().to_owned());
        let outcome = self.eval_rule_sets(location.visibility_rules(), true, parents);
        parents.pop();
        outcome.level != AccessibilityLevel::None
    }

    fn section_visible(&self, section: &LocationSection, parents: &mut Vec<String>) -> bool {
        let Some(real) = self.deref_section(section) else {
            return false;
        };
        let id = real.full_path();
        if parents.iter().any(|p| *p == id) {
            debug!(section = %id, "visibility rule recursion detected");
            return false;
        }
        parents.push(id);
        let outcome = self.eval_rule_sets(real.visibility_rules(), true, parents);
        parents.pop();
        outcome.level != AccessibilityLevel::None
    }

    /// Follow a section's `ref` once; cycle ids and cache keys use the
    /// referenced section's own path.
    fn deref_section<'a>(&'a self, section: &'a LocationSection) -> Option<&'a LocationSection> {
        if section.rules_ref().is_empty() {
            return Some(section);
        }
        match self.locations.section(section.rules_ref()) {
            Some((_, target)) => Some(target),
            None => {
                warn!(
                    section = %section.full_path(),
                    target = %section.rules_ref(),
                    "section ref does not resolve"
                );
                None
            }
        }
    }

    // ==================== Clause evaluation ====================

    fn eval_rule_sets(
        &self,
        rules: &[Vec<String>],
        visibility: bool,
        parents: &mut Vec<String>,
    ) -> RuleOutcome {
        let mut result = RuleOutcome::default();
        if rules.is_empty() {
            return RuleOutcome::normal();
        }
        let mut glitched = false;
        let mut check_only_reachable = false;
        for clause in rules {
            // an empty clause is vacuously true
            if clause.is_empty() {
                return RuleOutcome::normal();
            }
            let mut level = AccessibilityLevel::Normal;
            let mut clause_check_only = false;
            let mut clause_cycles = BTreeSet::new();
            for raw in clause {
                if raw.is_empty() {
                    continue;
                }
                let atom = Atom::parse(raw);
                if atom.check_only {
                    clause_check_only = true;
                    if atom.text.is_empty() {
                        check_only_reachable = true;
                        continue;
                    }
                }
                if atom.is_reference() {
                    let sub = self.reference_level(&atom, visibility, parents, &mut clause_cycles);
                    combine_sub_level(sub, atom.optional, atom.check_only, &mut level);
                } else {
                    let count = self.provider_count_on_stack(&atom.text, parents);
                    if count >= atom.count {
                        continue;
                    }
                    if atom.optional {
                        level = AccessibilityLevel::SequenceBreak;
                    } else {
                        level = AccessibilityLevel::None;
                    }
                }
                if level == AccessibilityLevel::None {
                    break;
                }
            }
            result.cycles.extend(clause_cycles);
            if level == AccessibilityLevel::Normal && !clause_check_only {
                result.level = AccessibilityLevel::Normal;
                return result;
            }
            if level != AccessibilityLevel::None && clause_check_only {
                check_only_reachable = true;
            }
            if level == AccessibilityLevel::SequenceBreak && !clause_check_only {
                glitched = true;
            }
        }
        result.level = if glitched {
            AccessibilityLevel::SequenceBreak
        } else if check_only_reachable {
            AccessibilityLevel::Inspect
        } else {
            AccessibilityLevel::None
        };
        result
    }

    /// Evaluate one `@`-reference, consulting and populating the memo table.
    fn reference_level(
        &self,
        atom: &Atom,
        visibility: bool,
        parents: &mut Vec<String>,
        clause_cycles: &mut BTreeSet<String>,
    ) -> AccessibilityLevel {
        if let Some(&cached) = self.reachable_cache.borrow().get(&atom.text) {
            return cached;
        }
        let path = &atom.text[1..];
        let outcome = if let Some(location) = self.locations.location(path, true) {
            Some(if visibility {
                visibility_outcome(self.location_visible(location, parents))
            } else {
                self.location_access(location, parents)
            })
        } else if let Some((_, section)) = self.locations.section(path) {
            Some(if visibility {
                visibility_outcome(self.section_visible(section, parents))
            } else {
                self.section_access(section, parents)
            })
        } else {
            None
        };
        match outcome {
            Some(outcome) => {
                if !visibility && outcome.cycles.is_empty() {
                    self.reachable_cache
                        .borrow_mut()
                        .insert(atom.text.clone(), outcome.level);
                }
                let level = outcome.level;
                clause_cycles.extend(outcome.cycles);
                level
            }
            None => {
                warn!(reference = %atom.text, "rule references unknown location or section");
                AccessibilityLevel::None
            }
        }
    }

    /// Look up a provider count with the recursion stack published, so a
    /// scripted predicate can query reachability on the same evaluation.
    fn provider_count_on_stack(&self, code: &str, parents: &mut Vec<String>) -> i32 {
        *self.active_parents.borrow_mut() = Some(std::mem::take(parents));
        let count = self.provider_count(code);
        *parents = self
            .active_parents
            .borrow_mut()
            .take()
            .unwrap_or_default();
        count
    }
}

fn visibility_outcome(visible: bool) -> RuleOutcome {
    if visible {
        RuleOutcome::normal()
    } else {
        RuleOutcome::default()
    }
}

/// Fold one sub-result into the clause's running level.
fn combine_sub_level(
    sub: AccessibilityLevel,
    optional: bool,
    check_only: bool,
    level: &mut AccessibilityLevel,
) {
    let mut sub = sub;
    if !check_only && sub == AccessibilityLevel::Inspect {
        // inspection bleeds out only through a {...} atom
        sub = AccessibilityLevel::None;
    } else if optional && sub == AccessibilityLevel::None {
        sub = AccessibilityLevel::SequenceBreak;
    } else if sub == AccessibilityLevel::None {
        *level = AccessibilityLevel::None;
    }
    if sub == AccessibilityLevel::SequenceBreak && *level != AccessibilityLevel::None {
        *level = AccessibilityLevel::SequenceBreak;
    }
}
