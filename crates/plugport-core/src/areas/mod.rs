//! Capability-area resolution.
//!
//! A capability area is available when the backend components it needs are
//! present, its feature flags are on and every area it relies on is itself
//! available. Outside production, a dev flag can force an area on.
//!
//! The computed status of every area is written into the store's flag
//! vector under the area id, which is how extensions gate on areas.

mod graph;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::diagnostics::{Diagnostic, Severity, SharedSink, TracingSink};
use crate::error::CycleError;
use crate::extension::AreaDeclaration;
use crate::flags::FeatureFlagVector;
use crate::store::PluginStore;

/// Declared capability area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityArea {
    pub id: String,
    #[serde(default)]
    pub required_backend_components: Vec<String>,
    #[serde(default)]
    pub reliant_areas: Vec<String>,
    #[serde(default)]
    pub dev_only_flags: Vec<String>,
    #[serde(default)]
    pub feature_flags: Vec<String>,
}

impl CapabilityArea {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            required_backend_components: Vec::new(),
            reliant_areas: Vec::new(),
            dev_only_flags: Vec::new(),
            feature_flags: Vec::new(),
        }
    }

    pub fn requires(mut self, component: impl Into<String>) -> Self {
        self.required_backend_components.push(component.into());
        self
    }

    pub fn relies_on(mut self, area: impl Into<String>) -> Self {
        self.reliant_areas.push(area.into());
        self
    }

    pub fn dev_flag(mut self, flag: impl Into<String>) -> Self {
        self.dev_only_flags.push(flag.into());
        self
    }

    pub fn feature_flag(mut self, flag: impl Into<String>) -> Self {
        self.feature_flags.push(flag.into());
        self
    }
}

impl From<AreaDeclaration> for CapabilityArea {
    fn from(decl: AreaDeclaration) -> Self {
        Self {
            id: decl.id,
            required_backend_components: decl.required_components,
            reliant_areas: decl.reliant_areas,
            dev_only_flags: decl.dev_flags,
            feature_flags: decl.feature_flags,
        }
    }
}

/// Backend component id to installed/enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendCapabilities(BTreeMap<String, bool>);

impl BackendCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, component: impl Into<String>, present: bool) -> Self {
        self.set(component, present);
        self
    }

    pub fn set(&mut self, component: impl Into<String>, present: bool) {
        self.0.insert(component.into(), present);
    }

    /// Unlisted components count as absent.
    pub fn is_present(&self, component: &str) -> bool {
        self.0.get(component).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, bool)> for BackendCapabilities {
    fn from_iter<I: IntoIterator<Item = (K, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Inputs that do not come from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverOptions {
    /// Dev flags are ignored in production.
    pub production: bool,
    pub dev_flags: FeatureFlagVector,
    pub feature_flags: FeatureFlagVector,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            production: true,
            dev_flags: FeatureFlagVector::new(),
            feature_flags: FeatureFlagVector::new(),
        }
    }
}

/// Status of one area with the inputs that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AreaStatus {
    pub status: bool,
    pub required_components: BTreeMap<String, bool>,
    pub reliant_areas: BTreeMap<String, bool>,
    pub dev_flags: BTreeMap<String, bool>,
    pub feature_flags: BTreeMap<String, bool>,
    /// A dev flag turned the area on against its computed status.
    pub forced_by_dev_flag: bool,
    /// The area sits on a dependency cycle and is pinned off.
    pub in_cycle: bool,
}

/// Result of one resolution pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AreaReport {
    /// Per area, in declaration order.
    pub statuses: IndexMap<String, AreaStatus>,
    #[serde(skip)]
    pub cycles: Vec<CycleError>,
}

impl AreaReport {
    pub fn get(&self, area: &str) -> Option<&AreaStatus> {
        self.statuses.get(area)
    }

    pub fn is_available(&self, area: &str) -> bool {
        self.statuses.get(area).is_some_and(|s| s.status)
    }

    /// One flag per area, keyed by area id.
    pub fn to_flags(&self) -> FeatureFlagVector {
        self.statuses
            .iter()
            .map(|(id, status)| (id.clone(), status.status))
            .collect()
    }
}

/// Computes area availability from backend capabilities.
#[derive(Clone)]
pub struct AreaResolver {
    areas: IndexMap<String, CapabilityArea>,
    options: ResolverOptions,
    diagnostics: SharedSink,
}

impl AreaResolver {
    /// Duplicate ids keep their first declaration.
    pub fn new(areas: impl IntoIterator<Item = CapabilityArea>, options: ResolverOptions) -> Self {
        let mut declared = IndexMap::new();
        for area in areas {
            if declared.contains_key(&area.id) {
                warn!(area = %area.id, "Duplicate capability area ignored");
                continue;
            }
            declared.insert(area.id.clone(), area);
        }
        Self {
            areas: declared,
            options,
            diagnostics: Arc::new(TracingSink),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: SharedSink) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn areas(&self) -> impl Iterator<Item = &CapabilityArea> {
        self.areas.values()
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// Compute every area's status. Never fails: cycles and unknown
    /// dependencies resolve to `false` and are reported as diagnostics.
    pub fn resolve(&self, caps: &BackendCapabilities) -> AreaReport {
        let cycles = graph::find_cycles(&self.areas);
        for cycle in &cycles {
            self.diagnostics
                .emit(Diagnostic::host(Severity::Warning, cycle.to_string()));
        }

        let mut eval = Evaluation {
            areas: &self.areas,
            caps,
            options: &self.options,
            memo: HashMap::new(),
            statuses: HashMap::new(),
            cyclic: cycles.iter().flat_map(|c| c.areas.iter().cloned()).collect(),
            missing: Vec::new(),
        };
        for id in &eval.cyclic {
            eval.memo.insert(id.clone(), false);
        }
        for id in self.areas.keys() {
            eval.evaluate(id);
        }
        for id in self.areas.keys() {
            if !eval.statuses.contains_key(id.as_str()) {
                let status = eval.build(id);
                eval.statuses.insert(id.clone(), status);
            }
        }

        for (area, dependency) in &eval.missing {
            self.diagnostics.emit(Diagnostic::host(
                Severity::Warning,
                format!("Capability area {area} relies on undeclared area {dependency}"),
            ));
        }

        let mut statuses = eval.statuses;
        let statuses = self
            .areas
            .keys()
            .filter_map(|id| statuses.remove_entry(id.as_str()))
            .collect::<IndexMap<_, _>>();
        debug!(
            areas = statuses.len(),
            available = statuses.values().filter(|s| s.status).count(),
            "Capability areas resolved"
        );
        AreaReport { statuses, cycles }
    }

    /// Resolve and push the result into `store`'s flag vector.
    pub fn apply(&self, caps: &BackendCapabilities, store: &PluginStore) -> AreaReport {
        let report = self.resolve(caps);
        store.set_feature_flags(&report.to_flags());
        report
    }

    /// Re-apply whenever `feed` publishes new capabilities. The task ends
    /// when the feed's sender is dropped.
    pub fn spawn_watch(
        self,
        mut feed: watch::Receiver<BackendCapabilities>,
        store: PluginStore,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let caps = feed.borrow_and_update().clone();
                self.apply(&caps, &store);
                if feed.changed().await.is_err() {
                    debug!("Capability feed closed");
                    break;
                }
            }
        })
    }
}

/// Area declarations contributed by registered plugins.
pub fn areas_from_store(store: &PluginStore) -> Vec<CapabilityArea> {
    store
        .all_extensions()
        .iter()
        .filter_map(|ext| ext.narrow::<AreaDeclaration>())
        .map(CapabilityArea::from)
        .collect()
}

struct Evaluation<'a> {
    areas: &'a IndexMap<String, CapabilityArea>,
    caps: &'a BackendCapabilities,
    options: &'a ResolverOptions,
    memo: HashMap<String, bool>,
    statuses: HashMap<String, AreaStatus>,
    cyclic: HashSet<String>,
    missing: Vec<(String, String)>,
}

impl Evaluation<'_> {
    fn evaluate(&mut self, id: &str) -> bool {
        if let Some(status) = self.memo.get(id) {
            return *status;
        }
        let status = self.build(id);
        let value = status.status;
        self.memo.insert(id.to_string(), value);
        self.statuses.insert(id.to_string(), status);
        value
    }

    /// Cyclic areas are pre-seeded in `memo`, so recursion only follows
    /// acyclic edges.
    fn build(&mut self, id: &str) -> AreaStatus {
        let areas = self.areas;
        let Some(area) = areas.get(id) else {
            return AreaStatus::default();
        };

        let required_components: BTreeMap<String, bool> = area
            .required_backend_components
            .iter()
            .map(|c| (c.clone(), self.caps.is_present(c)))
            .collect();
        let feature_flags: BTreeMap<String, bool> = area
            .feature_flags
            .iter()
            .map(|f| (f.clone(), self.options.feature_flags.is_enabled(f)))
            .collect();
        let mut reliant_areas = BTreeMap::new();
        for dependency in &area.reliant_areas {
            let available = if areas.contains_key(dependency) {
                self.evaluate(dependency)
            } else {
                self.missing.push((id.to_string(), dependency.clone()));
                false
            };
            reliant_areas.insert(dependency.clone(), available);
        }
        let dev_flags: BTreeMap<String, bool> = area
            .dev_only_flags
            .iter()
            .map(|f| (f.clone(), self.options.dev_flags.is_enabled(f)))
            .collect();

        let computed = required_components.values().all(|v| *v)
            && feature_flags.values().all(|v| *v)
            && reliant_areas.values().all(|v| *v);
        let in_cycle = self.cyclic.contains(id);
        let forced = !self.options.production && dev_flags.values().any(|v| *v);
        let status = !in_cycle && (computed || forced);

        AreaStatus {
            status,
            required_components,
            reliant_areas,
            dev_flags,
            feature_flags,
            forced_by_dev_flag: status && !computed,
            in_cycle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;

    fn caps(present: &[&str]) -> BackendCapabilities {
        present.iter().map(|c| (*c, true)).collect()
    }

    #[test]
    fn test_component_and_reliance() {
        let resolver = AreaResolver::new(
            vec![
                CapabilityArea::new("projects").requires("dashboard"),
                CapabilityArea::new("pipelines")
                    .requires("pipelines-operator")
                    .relies_on("projects"),
            ],
            ResolverOptions::default(),
        );

        let report = resolver.resolve(&caps(&["dashboard"]));
        assert!(report.is_available("projects"));
        assert!(!report.is_available("pipelines"));
        let pipelines = report.get("pipelines").unwrap();
        assert_eq!(pipelines.required_components["pipelines-operator"], false);
        assert_eq!(pipelines.reliant_areas["projects"], true);

        let report = resolver.resolve(&caps(&["dashboard", "pipelines-operator"]));
        assert!(report.is_available("pipelines"));

        let report = resolver.resolve(&caps(&["pipelines-operator"]));
        assert!(!report.is_available("pipelines"));
    }

    #[test]
    fn test_feature_flags_gate_area() {
        let options = ResolverOptions {
            feature_flags: FeatureFlagVector::new().with("disableHome", false),
            ..ResolverOptions::default()
        };
        let resolver = AreaResolver::new(
            vec![
                CapabilityArea::new("home").feature_flag("enableHome"),
                CapabilityArea::new("other").feature_flag("disableHome"),
            ],
            options,
        );
        let report = resolver.resolve(&BackendCapabilities::new());
        assert!(!report.is_available("home"));
        assert!(!report.is_available("other"));
    }

    #[test]
    fn test_dev_flag_forces_outside_production() {
        let area = CapabilityArea::new("beta").requires("missing").dev_flag("devBeta");
        let dev = ResolverOptions {
            production: false,
            dev_flags: FeatureFlagVector::new().with("devBeta", true),
            ..ResolverOptions::default()
        };
        let report = AreaResolver::new(vec![area.clone()], dev.clone()).resolve(&caps(&[]));
        let beta = report.get("beta").unwrap();
        assert!(beta.status);
        assert!(beta.forced_by_dev_flag);

        let prod = ResolverOptions {
            production: true,
            ..dev
        };
        let report = AreaResolver::new(vec![area], prod).resolve(&caps(&[]));
        assert!(!report.is_available("beta"));
    }

    #[test]
    fn test_cycle_pins_members_false() {
        let sink = Arc::new(MemorySink::new());
        let resolver = AreaResolver::new(
            vec![
                CapabilityArea::new("a").relies_on("b"),
                CapabilityArea::new("b").relies_on("a"),
                CapabilityArea::new("c").relies_on("a"),
                CapabilityArea::new("d"),
                CapabilityArea::new("e").relies_on("e").dev_flag("force"),
            ],
            ResolverOptions {
                production: false,
                dev_flags: FeatureFlagVector::new().with("force", true),
                ..ResolverOptions::default()
            },
        )
        .with_diagnostics(sink.clone());

        let report = resolver.resolve(&BackendCapabilities::new());
        assert!(!report.is_available("a"));
        assert!(!report.is_available("b"));
        assert!(!report.is_available("c"));
        assert!(report.is_available("d"));
        assert!(!report.is_available("e"));
        assert!(report.get("a").unwrap().in_cycle);
        assert!(!report.get("c").unwrap().in_cycle);
        assert_eq!(report.cycles.len(), 2);
        assert_eq!(report.cycles[0].areas, vec!["a", "b"]);
        assert_eq!(sink.snapshot().len(), 2);
    }

    #[test]
    fn test_undeclared_dependency_is_false() {
        let sink = Arc::new(MemorySink::new());
        let resolver = AreaResolver::new(
            vec![CapabilityArea::new("a").relies_on("ghost")],
            ResolverOptions::default(),
        )
        .with_diagnostics(sink.clone());

        let report = resolver.resolve(&BackendCapabilities::new());
        assert!(!report.is_available("a"));
        assert!(sink.snapshot()[0].message.contains("ghost"));
    }

    #[test]
    fn test_to_flags_and_apply() {
        let store = PluginStore::new();
        let resolver = AreaResolver::new(
            vec![CapabilityArea::new("x").requires("c"), CapabilityArea::new("y")],
            ResolverOptions::default(),
        );
        let report = resolver.apply(&BackendCapabilities::new(), &store);

        let flags = report.to_flags();
        assert_eq!(flags.get("x"), Some(false));
        assert_eq!(flags.get("y"), Some(true));
        assert_eq!(store.feature_flags(), flags);
    }

    #[test]
    fn test_duplicate_area_keeps_first() {
        let resolver = AreaResolver::new(
            vec![
                CapabilityArea::new("x").requires("c"),
                CapabilityArea::new("x"),
                CapabilityArea::new("y"),
            ],
            ResolverOptions::default(),
        );
        assert_eq!(resolver.areas().count(), 2);

        let report = resolver.resolve(&BackendCapabilities::new());
        assert!(!report.is_available("x"));
        assert!(report.get("x").unwrap().required_components.contains_key("c"));
        assert!(report.is_available("y"));
    }

    #[test]
    fn test_report_serializes_in_declaration_order() {
        let resolver = AreaResolver::new(
            vec![CapabilityArea::new("zeta").requires("c"), CapabilityArea::new("alpha")],
            ResolverOptions::default(),
        );
        let report = resolver.resolve(&caps(&["c"]));

        let json = serde_json::to_value(&report).unwrap();
        let statuses = json["statuses"].as_object().unwrap();
        assert_eq!(statuses["zeta"]["status"], true);
        assert_eq!(statuses["zeta"]["required_components"]["c"], true);
        assert!(json.get("cycles").is_none());

        let text = serde_json::to_string(&report.statuses).unwrap();
        assert!(text.find("zeta").unwrap() < text.find("alpha").unwrap());
    }
}
