//! Registry behaviour: gating, replacement, idempotence and ordering.

use plugport_core::extension::kinds::{NAV_HREF, NAV_SECTION};
use plugport_core::prelude::*;
use serde_json::json;

fn nav(id: &str, required: &[&str], disallowed: &[&str]) -> Extension {
    Extension::new(NAV_HREF)
        .with_required(required.iter().copied())
        .with_disallowed(disallowed.iter().copied())
        .with_property("id", id)
        .with_property("title", id)
        .with_property("href", format!("/{id}"))
}

fn ids(store: &PluginStore) -> Vec<String> {
    store
        .get_typed::<NavHref>()
        .into_iter()
        .map(|(_, href)| href.id)
        .collect()
}

/// Home requires HOME; admin settings require ADMIN_USER and disallow
/// LEGACY. Links appear and disappear as flags change, without reloading.
#[test]
fn test_navigation_follows_flags() {
    let store = PluginStore::new();
    store.register(
        "core",
        vec![
            nav("home", &["HOME"], &[]),
            nav("settings", &["ADMIN_USER"], &["LEGACY"]),
            nav("help", &[], &[]),
        ],
    );

    assert_eq!(ids(&store), vec!["help"]);

    store.set_feature_flags(&FeatureFlagVector::new().with("HOME", true));
    assert_eq!(ids(&store), vec!["home", "help"]);

    store.set_feature_flags(&FeatureFlagVector::new().with("ADMIN_USER", true));
    assert_eq!(ids(&store), vec!["home", "help"], "LEGACY still unknown");

    store.set_feature_flags(&FeatureFlagVector::new().with("LEGACY", false));
    assert_eq!(ids(&store), vec!["home", "settings", "help"]);

    store.set_feature_flags(&FeatureFlagVector::new().with("HOME", false));
    assert_eq!(ids(&store), vec!["settings", "help"]);
}

#[test]
fn test_registering_twice_is_idempotent() {
    let store = PluginStore::new();
    let batch = || vec![nav("a", &[], &[]), nav("b", &[], &[])];

    store.register("p1", batch());
    let first = ids(&store);
    store.register("p1", batch());

    assert_eq!(ids(&store), first);
    assert_eq!(store.plugins().len(), 1);
    assert_eq!(store.plugin_info("p1").unwrap().extension_count, 2);
}

#[test]
fn test_reregistration_replaces_whole_set() {
    let store = PluginStore::new();
    store.register("p1", vec![nav("a", &[], &[]), nav("b", &[], &[])]);
    store.register("p2", vec![nav("z", &[], &[])]);

    store.register("p1", vec![nav("c", &[], &[])]);
    assert_eq!(ids(&store), vec!["c", "z"]);

    store.register("p1", Vec::new());
    assert_eq!(ids(&store), vec!["z"]);
}

#[test]
fn test_held_extensions_survive_replacement() {
    let store = PluginStore::new();
    store.register("p1", vec![nav("a", &[], &[])]);
    let held = store.active_extensions();

    store.register("p1", vec![nav("b", &[], &[])]);
    store.unregister("p1");

    assert_eq!(held[0].value("id"), Some(&json!("a")));
    assert_eq!(held[0].plugin_id(), "p1");
}

#[test]
fn test_identity_collisions_are_kept() {
    let store = PluginStore::new();
    store.register("p1", vec![nav("dup", &[], &[])]);
    store.register("p2", vec![nav("dup", &[], &[])]);

    let active = store.active_extensions();
    assert_eq!(active.len(), 2);
    assert_eq!(active[0].plugin_id(), "p1");
    assert_eq!(active[1].plugin_id(), "p2");
}

#[test]
fn test_predicates_narrow_queries() {
    let store = PluginStore::new();
    store.register(
        "p1",
        vec![
            nav("a", &[], &[]),
            Extension::new(NAV_SECTION)
                .with_property("id", "s")
                .with_property("title", "Section"),
            Extension::new("custom.widget").with_property("id", "w"),
        ],
    );

    assert_eq!(store.get_extensions(is_nav_href).len(), 1);
    assert_eq!(store.get_extensions(is_navigation).len(), 2);
    assert_eq!(store.get_extensions(of_type("custom.widget")).len(), 1);
    assert_eq!(store.get_typed::<NavSection>()[0].1.title, "Section");
}

#[tokio::test]
async fn test_subscribers_see_revisions() {
    let store = PluginStore::new();
    let mut rx = store.subscribe();

    let writer = store.clone();
    tokio::spawn(async move {
        writer.register("p1", vec![nav("a", &[], &[])]);
    });

    rx.changed().await.unwrap();
    assert!(*rx.borrow_and_update() >= 1);
    assert_eq!(store.active_extensions().len(), 1);
}
