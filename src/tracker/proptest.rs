//! Property-based tests for the tracker's core laws using proptest.
//!
//! These exercise the invariants that hold for arbitrary item sets and
//! rule shapes rather than hand-picked scenarios:
//!
//! - Provider counts are the sum of per-item provisions
//! - Stage code lookup follows the inheritance walk exactly
//! - Save/load round-trips every observable item state
//! - Adding providers never lowers any accessibility level
//! - Bulk updates coalesce to one event per mutated id

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::{json, Value};
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::item::Action;
    use crate::tracker::Tracker;

    const CODES: [&str; 4] = ["alpha", "beta", "gamma", "delta"];

    fn code() -> impl Strategy<Value = &'static str> {
        prop::sample::select(&CODES[..])
    }

    /// One randomly shaped item descriptor plus the actions that put it in
    /// a random state.
    fn item_setup() -> impl Strategy<Value = (Value, Vec<Action>)> {
        prop_oneof![
            // toggle, possibly switched on
            (code(), any::<bool>()).prop_map(|(c, on)| {
                let actions = if on { vec![Action::Primary] } else { vec![] };
                (json!({ "name": "t", "type": "toggle", "codes": c }), actions)
            }),
            // consumable with a random count
            (code(), 0u8..5).prop_map(|(c, n)| {
                (
                    json!({ "name": "c", "type": "consumable", "codes": c }),
                    vec![Action::Increment; n as usize],
                )
            }),
            // static provider
            code().prop_map(|c| {
                (json!({ "name": "s", "type": "static", "codes": c }), vec![])
            }),
            // two-stage progressive, possibly advanced
            (code(), code(), any::<bool>()).prop_map(|(c1, c2, advanced)| {
                let actions = if advanced { vec![Action::Primary] } else { vec![] };
                (
                    json!({
                        "name": "p",
                        "type": "progressive",
                        "stages": [{ "codes": c1 }, { "codes": c2 }]
                    }),
                    actions,
                )
            }),
        ]
    }

    fn tracker_from(setups: &[(Value, Vec<Action>)]) -> Tracker {
        let mut tracker = Tracker::new();
        let descriptors: Vec<Value> = setups.iter().map(|(d, _)| d.clone()).collect();
        tracker.add_items(&Value::Array(descriptors)).unwrap();
        for (index, (_, actions)) in setups.iter().enumerate() {
            let id = (index + 1).to_string();
            for action in actions {
                tracker.change_item_state(&id, *action);
            }
        }
        tracker
    }

    proptest! {
        /// provider_count(c) is the sum of provides(c) over every item.
        #[test]
        fn provider_counts_are_additive(setups in prop::collection::vec(item_setup(), 0..8)) {
            let tracker = tracker_from(&setups);
            for code in CODES {
                let expected: i32 = tracker.items().map(|i| i.provides_code(code)).sum();
                prop_assert_eq!(tracker.provider_count(code), expected);
            }
        }

        /// Stage lookup: provides(c) = 1 iff some stage j <= k carries c and
        /// every stage strictly between j and k inherits.
        #[test]
        fn stage_inheritance_walk(
            stage_codes in prop::collection::vec(code(), 1..5),
            inherits in prop::collection::vec(any::<bool>(), 1..5),
            active in 0usize..5,
            enabled in any::<bool>(),
            allow_disabled in any::<bool>(),
        ) {
            let stages: Vec<Value> = stage_codes
                .iter()
                .zip(inherits.iter().cycle())
                .map(|(c, inherit)| json!({ "codes": c, "inherit_codes": inherit }))
                .collect();
            let stage_count = stages.len();
            let active = active.min(stage_count - 1);

            let mut tracker = Tracker::new();
            tracker
                .add_items(&json!([{
                    "name": "p",
                    "type": "progressive_toggle",
                    "allow_disabled": allow_disabled,
                    "stages": stages
                }]))
                .unwrap();
            tracker
                .load_state(&json!({
                    "tracker": {
                        "format_version": 1,
                        "json_items": {
                            "1": { "enabled": enabled, "stage": active, "count": 0 }
                        }
                    }
                }))
                .unwrap();

            let inherit_at = |m: usize| inherits[m % inherits.len()];
            for code in CODES {
                let mut expected = 0;
                if !(allow_disabled && !enabled) {
                    for j in (0..=active).rev() {
                        if stage_codes[j] == code {
                            expected = 1;
                            break;
                        }
                        if !inherit_at(j) {
                            break;
                        }
                    }
                }
                let item = tracker.item("1").unwrap();
                prop_assert_eq!(
                    item.provides_code(code),
                    expected,
                    "stage walk mismatch for {} at stage {}",
                    code,
                    active
                );
            }
        }

        /// load(save(S)) reproduces every observable item state.
        #[test]
        fn state_round_trips(setups in prop::collection::vec(item_setup(), 0..8)) {
            let tracker = tracker_from(&setups);
            let saved = tracker.save_state();

            let restored = {
                let mut fresh = Tracker::new();
                let descriptors: Vec<Value> = setups.iter().map(|(d, _)| d.clone()).collect();
                fresh.add_items(&Value::Array(descriptors)).unwrap();
                fresh.load_state(&saved).unwrap();
                fresh
            };

            for code in CODES {
                prop_assert_eq!(restored.provider_count(code), tracker.provider_count(code));
            }
            prop_assert_eq!(restored.save_state(), saved);
        }

        /// Adding satisfied codes never lowers any accessibility level.
        #[test]
        fn reachability_is_monotone(
            clauses in prop::collection::vec(
                prop::collection::vec((code(), 0u8..4), 1..4),
                1..4,
            ),
            enable_order in Just((0..CODES.len()).collect::<Vec<usize>>()).prop_shuffle(),
        ) {
            let rules: Vec<Vec<String>> = clauses
                .iter()
                .map(|clause| {
                    clause
                        .iter()
                        .map(|(code, decoration)| match *decoration {
                            0 => (*code).to_owned(),
                            1 => format!("[{code}]"),
                            2 => format!("{{{code}}}"),
                            _ => format!("{code}:2"),
                        })
                        .collect()
                })
                .collect();

            let mut tracker = Tracker::new();
            let items: Vec<Value> = CODES
                .iter()
                .map(|c| json!({ "name": *c, "type": "consumable", "codes": *c }))
                .collect();
            tracker.add_items(&Value::Array(items)).unwrap();
            tracker
                .add_locations(&json!([{ "name": "Prop", "access_rules": rules }]))
                .unwrap();

            let mut last = tracker.is_reachable_location("Prop");
            for index in enable_order {
                let id = (index + 1).to_string();
                tracker.change_item_state(&id, Action::Increment);
                tracker.change_item_state(&id, Action::Increment);
                let level = tracker.is_reachable_location("Prop");
                prop_assert!(
                    level >= last,
                    "level dropped from {} to {} after adding {}",
                    last,
                    level,
                    CODES[index]
                );
                last = level;
            }
        }

        /// Bulk updates queue exactly one event per mutated id, in order.
        #[test]
        fn bulk_updates_coalesce(
            toggles in prop::collection::vec(0usize..4, 1..10),
        ) {
            let mut tracker = Tracker::new();
            let items: Vec<Value> = CODES
                .iter()
                .map(|c| json!({ "name": *c, "type": "consumable", "codes": *c }))
                .collect();
            tracker.add_items(&Value::Array(items)).unwrap();

            let events = Rc::new(RefCell::new(Vec::new()));
            let sink = Rc::clone(&events);
            tracker.subscribe_state_changed(Box::new(move |_, id| {
                sink.borrow_mut().push(id.to_owned());
            }));

            tracker.begin_bulk();
            let mut expected = Vec::new();
            for index in &toggles {
                let id = (index + 1).to_string();
                tracker.change_item_state(&id, Action::Increment);
                if !expected.contains(&id) {
                    expected.push(id);
                }
            }
            prop_assert!(events.borrow().is_empty());
            tracker.end_bulk();
            prop_assert_eq!(&*events.borrow(), &expected);
        }
    }
}
