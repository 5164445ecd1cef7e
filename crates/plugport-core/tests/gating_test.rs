//! Gating over every flag state, checked through the public store API.

use plugport_core::prelude::*;

const STATES: [Option<bool>; 3] = [Some(true), Some(false), None];

fn vector(assignments: &[(&str, Option<bool>)]) -> FeatureFlagVector {
    let mut vector = FeatureFlagVector::new();
    for (name, state) in assignments {
        if let Some(value) = state {
            vector.set(*name, *value);
        }
    }
    vector
}

#[test]
fn test_active_iff_required_true_and_disallowed_false() {
    for r1 in STATES {
        for r2 in STATES {
            for d1 in STATES {
                let store = PluginStore::new();
                store.register(
                    "p",
                    vec![Extension::new("x")
                        .with_required(["R1", "R2"])
                        .with_disallowed(["D1"])],
                );
                store.set_feature_flags(&vector(&[("R1", r1), ("R2", r2), ("D1", d1)]));

                let expected = r1 == Some(true) && r2 == Some(true) && d1 == Some(false);
                assert_eq!(
                    store.active_extensions().len() == 1,
                    expected,
                    "R1={r1:?} R2={r2:?} D1={d1:?}"
                );
            }
        }
    }
}

#[test]
fn test_unknown_flags_fail_closed() {
    let store = PluginStore::new();
    store.register(
        "p",
        vec![
            Extension::new("needs").with_required(["MISSING"]),
            Extension::new("forbids").with_disallowed(["MISSING"]),
        ],
    );
    assert!(store.active_extensions().is_empty());

    store.set_feature_flags(&FeatureFlagVector::new().with("MISSING", false));
    assert_eq!(store.active_extensions()[0].type_name(), "forbids");

    store.clear_feature_flag("MISSING");
    assert!(store.active_extensions().is_empty());
}

#[test]
fn test_flag_merge_keeps_unrelated_flags() {
    let store = PluginStore::new();
    store.set_feature_flags(&FeatureFlagVector::new().with("A", true).with("B", false));
    store.set_feature_flags(&FeatureFlagVector::new().with("C", true));

    let flags = store.feature_flags();
    assert_eq!(flags.get("A"), Some(true));
    assert_eq!(flags.get("B"), Some(false));
    assert_eq!(flags.get("C"), Some(true));
    assert_eq!(flags.get("D"), None);
}
