//! Error types for the plugin runtime.
//!
//! Every failure here is local to one extension, one plugin or one code
//! reference. Callers recover from all of them; none is fatal to the host.

use thiserror::Error;

/// A malformed extension declaration. The entry is dropped, the batch continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeclarationError {
    #[error("Extension type is missing or empty")]
    MissingType,

    #[error("Invalid flags: {0}")]
    InvalidFlags(String),

    #[error("Malformed extension: {0}")]
    Malformed(String),
}

/// Transport-level failure while fetching a bundle or one of its exports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Export {0} escapes its bundle")]
    OutsideBundle(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => FetchError::Status {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => FetchError::Http(err.to_string()),
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Json(err.to_string())
    }
}

/// Why a plugin load failed. The plugin then contributes zero extensions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadFailure {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Shared dependency {name}: {reason}")]
    SharedDependency { name: String, reason: String },

    #[error("Integrity mismatch: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("Malformed export: {0}")]
    MalformedExport(String),
}

/// A dependency cycle between capability areas.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Capability area dependency cycle: {}", .areas.join(" -> "))]
pub struct CycleError {
    /// Areas on the cycle, in declaration order.
    pub areas: Vec<String>,
}

/// A lazy code reference could not be materialized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeResolutionError {
    #[error("Code reference {reference} failed: {message}")]
    Factory { reference: String, message: String },

    #[error("Code reference {0} is not bound to a loader")]
    Unbound(String),

    #[error("Property {property} of a {plugin_id} extension: {source}")]
    Property {
        plugin_id: String,
        property: String,
        #[source]
        source: Box<CodeResolutionError>,
    },
}

impl CodeResolutionError {
    /// Build a factory failure from any displayable error.
    pub fn factory(reference: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Factory {
            reference: reference.into(),
            message: message.to_string(),
        }
    }
}

/// Host configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_display() {
        let err = CycleError {
            areas: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "Capability area dependency cycle: a -> b");
    }

    #[test]
    fn test_fetch_error_wraps_into_load_failure() {
        let failure: LoadFailure = FetchError::NotFound("bundle".into()).into();
        assert_eq!(failure.to_string(), "Fetch failed: Not found: bundle");
    }
}
