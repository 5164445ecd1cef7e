//! Extension declaration model and lazy code references.
//!
//! - [`types`]: the tagged [`Extension`] record and its registered form
//! - [`kinds`]: typed views and tag predicates
//! - [`code_ref`]: memoized async code references
//! - [`resolve`]: materializing the code references of an extension

pub mod code_ref;
pub mod kinds;
pub mod resolve;
pub mod types;

pub use code_ref::{CodeRef, CodeRefSpec, CodeRefState, CodeValue, LazyCodeRef, CODE_REF_KEY};
pub use kinds::{
    is_area, is_nav_href, is_nav_section, is_navigation, is_route, matches_kind, of_type,
    AreaDeclaration, ExtensionKind, NavHref, NavSection, Route,
};
pub use resolve::{resolve_all, resolve_extension, ResolvedExtension, ResolvedProperty};
pub use types::{
    any_extension, Extension, ExtensionFlags, ExtensionPredicate, LoadedExtension, PropertyValue,
};
