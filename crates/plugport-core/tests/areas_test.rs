//! Capability areas driving extension gating.

use std::sync::Arc;
use std::time::Duration;

use plugport_core::diagnostics::MemorySink;
use plugport_core::extension::kinds::{AREA, NAV_HREF};
use plugport_core::prelude::*;
use serde_json::json;
use tokio::sync::watch;

fn link(id: &str, area: &str) -> Extension {
    Extension::new(NAV_HREF)
        .with_required([area])
        .with_property("id", id)
        .with_property("title", id)
        .with_property("href", format!("/{id}"))
}

fn areas() -> Vec<CapabilityArea> {
    vec![
        CapabilityArea::new("projects").requires("dashboard"),
        CapabilityArea::new("pipelines")
            .requires("data-science-pipelines")
            .relies_on("projects"),
    ]
}

fn nav_ids(store: &PluginStore) -> Vec<String> {
    store
        .get_typed::<NavHref>()
        .into_iter()
        .map(|(_, href)| href.id)
        .collect()
}

#[test]
fn test_areas_gate_navigation() {
    let store = PluginStore::new();
    store.register("core", vec![link("projects", "projects"), link("runs", "pipelines")]);
    let resolver = AreaResolver::new(areas(), ResolverOptions::default());

    resolver.apply(&BackendCapabilities::new().with("dashboard", true), &store);
    assert_eq!(nav_ids(&store), vec!["projects"]);

    resolver.apply(
        &BackendCapabilities::new()
            .with("dashboard", true)
            .with("data-science-pipelines", true),
        &store,
    );
    assert_eq!(nav_ids(&store), vec!["projects", "runs"]);

    resolver.apply(&BackendCapabilities::new().with("data-science-pipelines", true), &store);
    assert!(nav_ids(&store).is_empty());
}

#[test]
fn test_cycles_do_not_affect_unrelated_areas() {
    let sink = Arc::new(MemorySink::new());
    let store = PluginStore::new();
    store.register(
        "core",
        vec![link("loop", "a"), link("projects", "projects")],
    );

    let mut declared = areas();
    declared.push(CapabilityArea::new("a").relies_on("b"));
    declared.push(CapabilityArea::new("b").relies_on("a"));
    let resolver = AreaResolver::new(declared, ResolverOptions::default()).with_diagnostics(sink.clone());

    let report = resolver.apply(&BackendCapabilities::new().with("dashboard", true), &store);
    assert_eq!(report.cycles.len(), 1);
    assert_eq!(nav_ids(&store), vec!["projects"]);
    assert!(sink.snapshot()[0].message.contains("cycle"));
}

#[test]
fn test_areas_declared_by_plugins() {
    let store = PluginStore::new();
    store.register(
        "pipelines",
        vec![
            Extension::new(AREA)
                .with_property("id", "pipelines")
                .with_property("requiredComponents", json!(["data-science-pipelines"])),
            link("runs", "pipelines"),
        ],
    );

    let declared = areas_from_store(&store);
    assert_eq!(declared.len(), 1);
    assert_eq!(declared[0].required_backend_components, vec!["data-science-pipelines"]);

    AreaResolver::new(declared, ResolverOptions::default()).apply(
        &BackendCapabilities::new().with("data-science-pipelines", true),
        &store,
    );
    assert_eq!(nav_ids(&store), vec!["runs"]);
}

#[tokio::test]
async fn test_watch_reapplies_on_capability_change() {
    let store = PluginStore::new();
    store.register("core", vec![link("projects", "projects")]);
    let (tx, rx) = watch::channel(BackendCapabilities::new());
    let mut revisions = store.subscribe();

    let task = AreaResolver::new(areas(), ResolverOptions::default()).spawn_watch(rx, store.clone());
    revisions.changed().await.unwrap();
    assert!(nav_ids(&store).is_empty());

    tx.send(BackendCapabilities::new().with("dashboard", true)).unwrap();
    tokio::time::timeout(Duration::from_secs(1), revisions.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(nav_ids(&store), vec!["projects"]);

    drop(tx);
    tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
}
