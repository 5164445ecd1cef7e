//! Feature-flag vector.
//!
//! A flag is `true`, `false` or unknown. Unknown is the absence of an entry
//! and is never read as `false`: gating treats it as failing both checks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Flag name to known boolean value. Missing names are unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureFlagVector(BTreeMap<String, bool>);

impl FeatureFlagVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, name: impl Into<String>, value: bool) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: bool) {
        self.0.insert(name.into(), value);
    }

    /// `None` when the flag is unknown.
    pub fn get(&self, name: &str) -> Option<bool> {
        self.0.get(name).copied()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name) == Some(true)
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.get(name) == Some(false)
    }

    /// Return a flag to the unknown state.
    pub fn forget(&mut self, name: &str) -> Option<bool> {
        self.0.remove(name)
    }

    /// Merge `update` into `self`. Flags absent from the update keep their
    /// prior value. Returns whether anything changed.
    pub fn merge(&mut self, update: &FeatureFlagVector) -> bool {
        let mut changed = false;
        for (name, value) in &update.0 {
            if self.0.insert(name.clone(), *value) != Some(*value) {
                changed = true;
            }
        }
        changed
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<K: Into<String>> FromIterator<(K, bool)> for FeatureFlagVector {
    fn from_iter<I: IntoIterator<Item = (K, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<BTreeMap<String, bool>> for FeatureFlagVector {
    fn from(map: BTreeMap<String, bool>) -> Self {
        Self(map)
    }
}
