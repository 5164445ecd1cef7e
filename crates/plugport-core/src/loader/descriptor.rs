//! Remote bundle descriptors and shared-dependency negotiation.

use std::collections::BTreeMap;
use std::fmt;

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::error::LoadFailure;

/// Identity of a bundle build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleId {
    pub name: String,
    pub version: Version,
    /// `sha256:<hex>` digest of the manifest bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}

impl ModuleId {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            integrity: None,
        }
    }

    pub fn with_integrity(mut self, integrity: impl Into<String>) -> Self {
        self.integrity = Some(integrity.into());
        self
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// A host library the bundle expects to share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedDependency {
    pub name: String,
    pub version_req: VersionReq,
}

impl SharedDependency {
    pub fn new(name: impl Into<String>, version_req: VersionReq) -> Self {
        Self {
            name: name.into(),
            version_req,
        }
    }
}

/// Where a bundle lives and what it needs from the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDescriptor {
    pub module: ModuleId,
    /// Base URL, `file://` path or bare directory.
    pub location: String,
    #[serde(default)]
    pub shared: Vec<SharedDependency>,
}

impl RemoteDescriptor {
    pub fn new(module: ModuleId, location: impl Into<String>) -> Self {
        Self {
            module,
            location: location.into(),
            shared: Vec::new(),
        }
    }

    pub fn with_shared(mut self, dependency: SharedDependency) -> Self {
        self.shared.push(dependency);
        self
    }
}

/// Libraries the host provides to bundles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SharedScope(BTreeMap<String, Version>);

impl SharedScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provide(mut self, name: impl Into<String>, version: Version) -> Self {
        self.0.insert(name.into(), version);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Version> {
        self.0.get(name)
    }

    /// Check every requirement against the scope. The first unmet one fails.
    pub fn negotiate(&self, requirements: &[SharedDependency]) -> Result<(), LoadFailure> {
        for dependency in requirements {
            let Some(provided) = self.0.get(&dependency.name) else {
                return Err(LoadFailure::SharedDependency {
                    name: dependency.name.clone(),
                    reason: "not provided by host".to_string(),
                });
            };
            if !dependency.version_req.matches(provided) {
                return Err(LoadFailure::SharedDependency {
                    name: dependency.name.clone(),
                    reason: format!(
                        "host provides {provided}, bundle requires {}",
                        dependency.version_req
                    ),
                });
            }
        }
        Ok(())
    }
}
