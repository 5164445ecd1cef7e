//! Declarative extension runtime.
//!
//! Independently deployed bundles contribute typed extensions to a host.
//! The host gates them on a live feature-flag vector derived from backend
//! capabilities, and materializes their code references lazily.
//!
//! - [`extension`]: declaration model, typed kinds, lazy code references
//! - [`store`]: the extension registry and flag gating
//! - [`areas`]: capability-area resolution into flags
//! - [`loader`]: fetching and registering remote bundles
//! - [`diagnostics`]: recoverable faults reported to the host

pub mod areas;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod extension;
pub mod flags;
pub mod loader;
pub mod store;

pub use areas::{AreaReport, AreaResolver, BackendCapabilities, CapabilityArea, ResolverOptions};
pub use diagnostics::{Diagnostic, DiagnosticSink, MemorySink, Severity, TracingSink};
pub use error::{
    CodeResolutionError, ConfigError, CycleError, DeclarationError, FetchError, LoadFailure,
};
pub use extension::{Extension, LoadedExtension, ResolvedExtension};
pub use flags::FeatureFlagVector;
pub use loader::{LoadOutcome, LoadResult, RemoteDescriptor, RemotePluginLoader};
pub use store::{PluginInfo, PluginStatus, PluginStore};

/// Re-exports commonly used types.
pub mod prelude {
    // Declarations
    pub use crate::extension::{
        is_area, is_nav_href, is_nav_section, is_navigation, is_route, of_type, resolve_all,
        resolve_extension, CodeRef, CodeValue, Extension, ExtensionKind, LazyCodeRef,
        LoadedExtension, NavHref, NavSection, ResolvedExtension, Route,
    };

    // Registry
    pub use crate::flags::FeatureFlagVector;
    pub use crate::store::{PluginInfo, PluginStatus, PluginStore, RegisterReport};

    // Areas
    pub use crate::areas::{
        areas_from_store, AreaReport, AreaResolver, BackendCapabilities, CapabilityArea,
        ResolverOptions,
    };

    // Loading
    pub use crate::loader::{
        ManifestFetcher, ModuleId, RemoteDescriptor, RemotePluginLoader, SharedDependency,
        SharedScope,
    };

    // Diagnostics and errors
    pub use crate::diagnostics::{Diagnostic, DiagnosticSink, Severity};
    pub use crate::error::{CodeResolutionError, LoadFailure};
}
