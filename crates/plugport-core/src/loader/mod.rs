//! Remote plugin loading.
//!
//! The loader fetches a bundle's manifest, binds the code references it
//! declares to lazy export fetches and registers the result in the store as
//! one atomic replacement. Loads of the same plugin id are serialized;
//! different ids load in parallel.

pub mod descriptor;
pub mod fetcher;
pub mod manifest;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::diagnostics::Diagnostic;
use crate::error::{CodeResolutionError, LoadFailure};
use crate::extension::{CodeRef, CodeRefSpec, Extension, LazyCodeRef};
use crate::store::{PluginStatus, PluginStore};

pub use descriptor::{ModuleId, RemoteDescriptor, SharedDependency, SharedScope};
pub use fetcher::{FileFetcher, HttpFetcher, ManifestFetcher, SchemeFetcher, StaticFetcher};
pub use manifest::{integrity_of, parse_manifest, verify_integrity, ParsedManifest};

/// How one load ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// `dropped` counts entries rejected by parsing or validation.
    Loaded { registered: usize, dropped: usize },
    Failed(LoadFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResult {
    pub plugin_id: String,
    pub outcome: LoadOutcome,
}

impl LoadResult {
    pub fn is_loaded(&self) -> bool {
        matches!(self.outcome, LoadOutcome::Loaded { .. })
    }

    pub fn failure(&self) -> Option<&LoadFailure> {
        match &self.outcome {
            LoadOutcome::Failed(failure) => Some(failure),
            LoadOutcome::Loaded { .. } => None,
        }
    }
}

type PluginLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

struct LoaderInner {
    store: PluginStore,
    fetcher: Arc<dyn ManifestFetcher>,
    shared: SharedScope,
    locks: PluginLocks,
}

/// Exclusive hold on one plugin id. The map entry is dropped with its last
/// holder.
struct PluginLock<'a> {
    locks: &'a PluginLocks,
    plugin_id: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for PluginLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        self.guard.take();
        let unshared = locks
            .get(self.plugin_id)
            .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) <= 2);
        if unshared {
            locks.remove(self.plugin_id);
        }
    }
}

/// Puts the previous status back if a load is dropped before it settles.
struct PendingLoad<'a> {
    store: &'a PluginStore,
    plugin_id: &'a str,
    previous: Option<Option<PluginStatus>>,
}

impl<'a> PendingLoad<'a> {
    fn start(store: &'a PluginStore, plugin_id: &'a str) -> Self {
        let previous = store.mark_pending(plugin_id);
        Self {
            store,
            plugin_id,
            previous: Some(previous),
        }
    }

    fn settle(mut self) {
        self.previous = None;
    }
}

impl Drop for PendingLoad<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.store.cancel_pending(self.plugin_id, previous);
        }
    }
}

/// Loads bundles into a [`PluginStore`]. Clones share state.
#[derive(Clone)]
pub struct RemotePluginLoader {
    inner: Arc<LoaderInner>,
}

impl RemotePluginLoader {
    pub fn new(store: PluginStore, fetcher: Arc<dyn ManifestFetcher>) -> Self {
        Self::with_shared_scope(store, fetcher, SharedScope::new())
    }

    pub fn with_shared_scope(
        store: PluginStore,
        fetcher: Arc<dyn ManifestFetcher>,
        shared: SharedScope,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                store,
                fetcher,
                shared,
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &PluginStore {
        &self.inner.store
    }

    /// Load or reload `plugin_id` from `descriptor`.
    ///
    /// Until the new manifest is registered, the plugin's previous extension
    /// set stays active. On failure the plugin contributes nothing. Dropping
    /// the returned future before it completes registers nothing and puts the
    /// plugin's previous status back.
    pub async fn load_plugin(&self, plugin_id: &str, descriptor: RemoteDescriptor) -> LoadResult {
        let _lock = self.lock_plugin(plugin_id).await;

        info!(plugin_id = %plugin_id, module = %descriptor.module, location = %descriptor.location, "Loading plugin");
        let store = &self.inner.store;
        let pending = PendingLoad::start(store, plugin_id);

        let descriptor = Arc::new(descriptor);
        let outcome = match self.fetch(&descriptor).await {
            Ok(parsed) => {
                for (index, error) in &parsed.rejected {
                    store.diagnostics().emit(Diagnostic::warning(
                        plugin_id,
                        format!("Dropped manifest entry #{index}: {error}"),
                    ));
                }
                let extensions = self.bind(&descriptor, parsed.extensions);
                let report =
                    store.register_loaded(plugin_id, extensions, Some(descriptor.module.clone()));
                LoadOutcome::Loaded {
                    registered: report.registered,
                    dropped: parsed.rejected.len() + report.dropped.len(),
                }
            }
            Err(failure) => {
                warn!(plugin_id = %plugin_id, error = %failure, "Plugin load failed");
                store.mark_failed(plugin_id, failure.to_string());
                store.diagnostics().emit(Diagnostic::error(
                    plugin_id,
                    format!("Failed to load {}: {failure}", descriptor.module),
                ));
                LoadOutcome::Failed(failure)
            }
        };
        pending.settle();

        LoadResult {
            plugin_id: plugin_id.to_string(),
            outcome,
        }
    }

    /// Load many plugins concurrently. Results keep the input order.
    pub async fn load_plugins<I>(&self, entries: I) -> Vec<LoadResult>
    where
        I: IntoIterator<Item = (String, RemoteDescriptor)>,
    {
        let loads = entries
            .into_iter()
            .map(|(plugin_id, descriptor)| async move {
                self.load_plugin(&plugin_id, descriptor).await
            });
        join_all(loads).await
    }

    /// Remove a plugin, waiting for any load of it in flight.
    pub async fn unload_plugin(&self, plugin_id: &str) -> bool {
        let _lock = self.lock_plugin(plugin_id).await;
        self.inner.store.unregister(plugin_id)
    }

    async fn lock_plugin<'a>(&'a self, plugin_id: &'a str) -> PluginLock<'a> {
        let lock = self
            .inner
            .locks
            .lock()
            .entry(plugin_id.to_string())
            .or_default()
            .clone();
        let mut held = PluginLock {
            locks: &self.inner.locks,
            plugin_id,
            lock,
            guard: None,
        };
        held.guard = Some(held.lock.clone().lock_owned().await);
        held
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.inner.locks.lock().len()
    }

    async fn fetch(&self, descriptor: &RemoteDescriptor) -> Result<ParsedManifest, LoadFailure> {
        self.inner.shared.negotiate(&descriptor.shared)?;
        let bytes = self.inner.fetcher.fetch_manifest(descriptor).await?;
        if let Some(expected) = &descriptor.module.integrity {
            verify_integrity(expected, &bytes)?;
        }
        parse_manifest(&bytes)
    }

    /// Point every declared code reference at the bundle's exports.
    /// References to the same export share one memo.
    fn bind(&self, descriptor: &Arc<RemoteDescriptor>, extensions: Vec<Extension>) -> Vec<Extension> {
        let mut bound: HashMap<CodeRefSpec, CodeRef> = HashMap::new();
        extensions
            .into_iter()
            .map(|extension| {
                extension.bind_code_refs(|spec| {
                    bound
                        .entry(spec.clone())
                        .or_insert_with(|| self.export_ref(descriptor, spec.clone()))
                        .clone()
                })
            })
            .collect()
    }

    fn export_ref(&self, descriptor: &Arc<RemoteDescriptor>, spec: CodeRefSpec) -> CodeRef {
        let fetcher = self.inner.fetcher.clone();
        let descriptor = descriptor.clone();
        let target = spec.clone();
        LazyCodeRef::from_spec(spec, move || {
            let fetcher = fetcher.clone();
            let descriptor = descriptor.clone();
            let target = target.clone();
            async move {
                fetcher
                    .fetch_export(&descriptor, &target)
                    .await
                    .map_err(|e| CodeResolutionError::factory(target.to_string(), e))
            }
        })
    }
}
