//! Central extension registry.
//!
//! The store holds every registered extension grouped by owning plugin,
//! together with the current feature-flag vector. Queries return only the
//! extensions whose flags are satisfied at the moment of the call.
//!
//! All state sits behind one lock and no operation suspends, so a query
//! always observes a complete snapshot: either the old or the new extension
//! set of a plugin, never a mix.

pub mod gating;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::diagnostics::{Diagnostic, SharedSink, TracingSink};
use crate::error::DeclarationError;
use crate::extension::{Extension, ExtensionKind, LoadedExtension};
use crate::flags::FeatureFlagVector;
use crate::loader::ModuleId;

pub use gating::is_active;

/// Lifecycle of one plugin in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum PluginStatus {
    /// A load is in flight. A previous extension set, if any, stays active.
    Pending,
    Loaded,
    /// The last load failed; the plugin contributes nothing.
    Failed(String),
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginStatus::Pending => f.write_str("pending"),
            PluginStatus::Loaded => f.write_str("loaded"),
            PluginStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Snapshot of one plugin's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    pub id: String,
    pub status: PluginStatus,
    /// Disabled plugins keep their declarations but contribute nothing.
    pub enabled: bool,
    pub extension_count: usize,
    pub module: Option<ModuleId>,
}

/// Outcome of one registration batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterReport {
    pub registered: usize,
    pub dropped: Vec<DroppedExtension>,
}

/// An entry left out of a batch because it failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedExtension {
    /// Position in the submitted batch.
    pub index: usize,
    pub error: DeclarationError,
}

struct PluginEntry {
    extensions: Arc<[LoadedExtension]>,
    status: PluginStatus,
    enabled: bool,
    module: Option<ModuleId>,
}

impl PluginEntry {
    fn empty(status: PluginStatus) -> Self {
        Self {
            extensions: Arc::from(Vec::new()),
            status,
            enabled: true,
            module: None,
        }
    }

    fn contributes(&self) -> bool {
        self.enabled && !matches!(self.status, PluginStatus::Failed(_))
    }
}

#[derive(Default)]
struct StoreState {
    plugins: IndexMap<String, PluginEntry>,
    flags: FeatureFlagVector,
    revision: u64,
}

struct StoreInner {
    state: RwLock<StoreState>,
    revision_tx: watch::Sender<u64>,
    diagnostics: SharedSink,
}

/// Handle to the extension registry. Clones share the same store.
#[derive(Clone)]
pub struct PluginStore {
    inner: Arc<StoreInner>,
}

impl PluginStore {
    /// Create a store reporting diagnostics through `tracing`.
    pub fn new() -> Self {
        Self::with_diagnostics(Arc::new(TracingSink))
    }

    pub fn with_diagnostics(diagnostics: SharedSink) -> Self {
        let (revision_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(StoreState::default()),
                revision_tx,
                diagnostics,
            }),
        }
    }

    /// Diagnostics sink shared with collaborators such as the loader.
    pub fn diagnostics(&self) -> &SharedSink {
        &self.inner.diagnostics
    }

    /// Replace the full extension list of `plugin_id`.
    ///
    /// Invalid entries are dropped with a diagnostic; the rest are
    /// registered. A plugin that registers again keeps its position.
    pub fn register(
        &self,
        plugin_id: &str,
        extensions: impl IntoIterator<Item = Extension>,
    ) -> RegisterReport {
        self.register_loaded(plugin_id, extensions, None)
    }

    pub(crate) fn register_loaded(
        &self,
        plugin_id: &str,
        extensions: impl IntoIterator<Item = Extension>,
        module: Option<ModuleId>,
    ) -> RegisterReport {
        let owner: Arc<str> = Arc::from(plugin_id);
        let mut accepted = Vec::new();
        let mut dropped = Vec::new();

        for (index, extension) in extensions.into_iter().enumerate() {
            match extension.validate() {
                Ok(()) => accepted.push(LoadedExtension::new(owner.clone(), extension)),
                Err(error) => {
                    self.inner.diagnostics.emit(Diagnostic::warning(
                        plugin_id,
                        format!("Dropped extension #{index}: {error}"),
                    ));
                    dropped.push(DroppedExtension { index, error });
                }
            }
        }

        let registered = accepted.len();
        let revision = {
            let mut state = self.inner.state.write();
            let entry = state
                .plugins
                .entry(plugin_id.to_string())
                .or_insert_with(|| PluginEntry::empty(PluginStatus::Loaded));
            entry.extensions = Arc::from(accepted);
            entry.status = PluginStatus::Loaded;
            if module.is_some() {
                entry.module = module;
            }
            Self::bump(&mut state)
        };
        self.publish(revision);

        info!(
            plugin_id = %plugin_id,
            registered,
            dropped = dropped.len(),
            "Plugin extensions registered"
        );
        RegisterReport {
            registered,
            dropped,
        }
    }

    /// Remove every contribution of `plugin_id`.
    pub fn unregister(&self, plugin_id: &str) -> bool {
        let revision = {
            let mut state = self.inner.state.write();
            if state.plugins.shift_remove(plugin_id).is_none() {
                return false;
            }
            Self::bump(&mut state)
        };
        self.publish(revision);
        info!(plugin_id = %plugin_id, "Plugin unregistered");
        true
    }

    /// Merge `update` into the current flags. Flags absent from the update
    /// keep their value, or stay unknown. Returns whether anything changed.
    pub fn set_feature_flags(&self, update: &FeatureFlagVector) -> bool {
        let revision = {
            let mut state = self.inner.state.write();
            if !state.flags.merge(update) {
                return false;
            }
            Self::bump(&mut state)
        };
        self.publish(revision);
        debug!(flags = update.len(), revision, "Feature flags updated");
        true
    }

    /// Return a flag to the unknown state.
    pub fn clear_feature_flag(&self, name: &str) -> Option<bool> {
        let (previous, revision) = {
            let mut state = self.inner.state.write();
            let previous = state.flags.forget(name)?;
            (previous, Self::bump(&mut state))
        };
        self.publish(revision);
        Some(previous)
    }

    pub fn feature_flags(&self) -> FeatureFlagVector {
        self.inner.state.read().flags.clone()
    }

    /// Active extensions matching `predicate`, in plugin registration order
    /// then declaration order.
    pub fn get_extensions<P>(&self, predicate: P) -> Vec<LoadedExtension>
    where
        P: Fn(&Extension) -> bool,
    {
        let state = self.inner.state.read();
        state
            .plugins
            .values()
            .filter(|entry| entry.contributes())
            .flat_map(|entry| entry.extensions.iter())
            .filter(|ext| predicate(ext) && is_active(ext.flags(), &state.flags))
            .cloned()
            .collect()
    }

    /// Every active extension.
    pub fn active_extensions(&self) -> Vec<LoadedExtension> {
        self.get_extensions(|_| true)
    }

    /// Active extensions of kind `K` with their typed view. Entries whose
    /// properties do not decode are skipped.
    pub fn get_typed<K: ExtensionKind>(&self) -> Vec<(LoadedExtension, K)> {
        self.get_extensions(K::matches)
            .into_iter()
            .filter_map(|ext| {
                let typed = K::from_extension(&ext)?;
                Some((ext, typed))
            })
            .collect()
    }

    /// Declarations of contributing plugins, ignoring flags.
    pub fn all_extensions(&self) -> Vec<LoadedExtension> {
        let state = self.inner.state.read();
        state
            .plugins
            .values()
            .filter(|entry| entry.contributes())
            .flat_map(|entry| entry.extensions.iter().cloned())
            .collect()
    }

    /// Enable or disable a registered plugin. Returns `false` for unknown ids.
    pub fn set_plugin_enabled(&self, plugin_id: &str, enabled: bool) -> bool {
        let revision = {
            let mut state = self.inner.state.write();
            let Some(entry) = state.plugins.get_mut(plugin_id) else {
                return false;
            };
            if entry.enabled == enabled {
                return true;
            }
            entry.enabled = enabled;
            Self::bump(&mut state)
        };
        self.publish(revision);
        info!(plugin_id = %plugin_id, enabled, "Plugin toggled");
        true
    }

    /// Record that a load of `plugin_id` started. Extensions already
    /// registered for it stay active until replaced.
    ///
    /// Returns the status the plugin had before, or `None` if it was unknown.
    pub fn mark_pending(&self, plugin_id: &str) -> Option<PluginStatus> {
        let mut state = self.inner.state.write();
        match state.plugins.get_mut(plugin_id) {
            Some(entry) => Some(std::mem::replace(&mut entry.status, PluginStatus::Pending)),
            None => {
                state
                    .plugins
                    .insert(plugin_id.to_string(), PluginEntry::empty(PluginStatus::Pending));
                None
            }
        }
    }

    /// Undo [`mark_pending`](Self::mark_pending) for a load that never
    /// finished. A plugin first seen by that load is forgotten again.
    pub fn cancel_pending(&self, plugin_id: &str, previous: Option<PluginStatus>) {
        let mut state = self.inner.state.write();
        let pending = state
            .plugins
            .get(plugin_id)
            .is_some_and(|entry| entry.status == PluginStatus::Pending);
        if !pending {
            return;
        }
        match previous {
            Some(status) => {
                if let Some(entry) = state.plugins.get_mut(plugin_id) {
                    entry.status = status;
                }
            }
            None => {
                state.plugins.shift_remove(plugin_id);
            }
        }
        debug!(plugin_id = %plugin_id, "Pending load cancelled");
    }

    /// Record a failed load. The plugin's extensions are removed.
    pub fn mark_failed(&self, plugin_id: &str, reason: impl Into<String>) {
        let revision = {
            let mut state = self.inner.state.write();
            let entry = state
                .plugins
                .entry(plugin_id.to_string())
                .or_insert_with(|| PluginEntry::empty(PluginStatus::Pending));
            entry.extensions = Arc::from(Vec::new());
            entry.status = PluginStatus::Failed(reason.into());
            Self::bump(&mut state)
        };
        self.publish(revision);
    }

    pub fn plugin_info(&self, plugin_id: &str) -> Option<PluginInfo> {
        let state = self.inner.state.read();
        state
            .plugins
            .get(plugin_id)
            .map(|entry| Self::info(plugin_id, entry))
    }

    /// Every known plugin in registration order.
    pub fn plugins(&self) -> Vec<PluginInfo> {
        let state = self.inner.state.read();
        state
            .plugins
            .iter()
            .map(|(id, entry)| Self::info(id, entry))
            .collect()
    }

    /// Revision counter, bumped by every mutation that can change query output.
    pub fn revision(&self) -> u64 {
        self.inner.state.read().revision
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision_tx.subscribe()
    }

    fn info(id: &str, entry: &PluginEntry) -> PluginInfo {
        PluginInfo {
            id: id.to_string(),
            status: entry.status.clone(),
            enabled: entry.enabled,
            extension_count: entry.extensions.len(),
            module: entry.module.clone(),
        }
    }

    fn bump(state: &mut StoreState) -> u64 {
        state.revision += 1;
        state.revision
    }

    fn publish(&self, revision: u64) {
        // Revisions only grow; a late publish never rolls the channel back.
        self.inner.revision_tx.send_if_modified(|current| {
            if revision > *current {
                *current = revision;
                true
            } else {
                false
            }
        });
    }
}

impl Default for PluginStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PluginStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("PluginStore")
            .field("plugins", &state.plugins.len())
            .field("flags", &state.flags)
            .field("revision", &state.revision)
            .finish()
    }
}
