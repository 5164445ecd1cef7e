//! Typed views over extension declarations.
//!
//! Each contribution type implements [`ExtensionKind`]. Narrowing compares
//! the tag first and only then decodes the plain properties with serde, so a
//! predicate check never touches property data.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::Extension;

/// Navigation link contributed to the host shell.
pub const NAV_HREF: &str = "app.navigation/href";
/// Navigation section grouping links.
pub const NAV_SECTION: &str = "app.navigation/section";
/// Routed page.
pub const ROUTE: &str = "app.route";
/// Capability area declaration.
pub const AREA: &str = "app.area";

/// A contribution type with a fixed tag and a typed property shape.
pub trait ExtensionKind: DeserializeOwned + Sized {
    const TYPE: &'static str;

    fn matches(extension: &Extension) -> bool {
        extension.is_type(Self::TYPE)
    }

    /// Decode the plain properties. Code references are left to the resolver.
    fn from_extension(extension: &Extension) -> Option<Self> {
        if !Self::matches(extension) {
            return None;
        }
        match serde_json::from_value(Value::Object(extension.data())) {
            Ok(kind) => Some(kind),
            Err(e) => {
                tracing::debug!(kind = Self::TYPE, error = %e, "Extension properties do not fit kind");
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavHref {
    pub id: String,
    pub title: String,
    pub href: String,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    /// Route pattern that keeps the link highlighted.
    #[serde(default)]
    pub path: Option<String>,
}

impl ExtensionKind for NavHref {
    const TYPE: &'static str = NAV_HREF;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavSection {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

impl ExtensionKind for NavSection {
    const TYPE: &'static str = NAV_SECTION;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub path: String,
}

impl ExtensionKind for Route {
    const TYPE: &'static str = ROUTE;
}

/// Capability area contributed by a plugin. Areas are not gated themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaDeclaration {
    pub id: String,
    #[serde(default)]
    pub required_components: Vec<String>,
    #[serde(default)]
    pub reliant_areas: Vec<String>,
    #[serde(default)]
    pub dev_flags: Vec<String>,
    #[serde(default)]
    pub feature_flags: Vec<String>,
}

impl ExtensionKind for AreaDeclaration {
    const TYPE: &'static str = AREA;
}

pub fn is_nav_href(extension: &Extension) -> bool {
    extension.is_type(NAV_HREF)
}

pub fn is_nav_section(extension: &Extension) -> bool {
    extension.is_type(NAV_SECTION)
}

/// Links and sections.
pub fn is_navigation(extension: &Extension) -> bool {
    is_nav_href(extension) || is_nav_section(extension)
}

pub fn is_route(extension: &Extension) -> bool {
    extension.is_type(ROUTE)
}

pub fn is_area(extension: &Extension) -> bool {
    extension.is_type(AREA)
}

/// Tag predicate for kinds with a Rust type, usable as `matches_kind::<NavHref>`.
pub fn matches_kind<K: ExtensionKind>(extension: &Extension) -> bool {
    K::matches(extension)
}

/// Predicate for an ad-hoc tag.
pub fn of_type(tag: impl Into<String>) -> impl Fn(&Extension) -> bool + Send + Sync + 'static {
    let tag = tag.into();
    move |extension: &Extension| extension.is_type(&tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::types::ExtensionPredicate;
    use serde_json::json;

    fn home_link() -> Extension {
        Extension::from_json(&json!({
            "type": "app.navigation/href",
            "flags": { "required": ["HOME"] },
            "properties": {
                "id": "home",
                "title": "Home",
                "href": "/",
                "group": "1_home",
                "iconRef": { "$codeRef": "icons.HomeIcon" }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_predicates_compare_tags() {
        let link = home_link();
        let predicates: [(ExtensionPredicate, bool); 5] = [
            (is_nav_href, true),
            (is_nav_section, false),
            (is_navigation, true),
            (is_route, false),
            (is_area, false),
        ];
        for (predicate, expected) in predicates {
            assert_eq!(predicate(&link), expected);
        }
        assert!(matches_kind::<NavHref>(&link));
        assert!(of_type("app.navigation/href")(&link));
        assert!(!of_type("app.navigation")(&link));
    }

    #[test]
    fn test_narrow_decodes_plain_properties() {
        let href = home_link().narrow::<NavHref>().unwrap();
        assert_eq!(href.id, "home");
        assert_eq!(href.group.as_deref(), Some("1_home"));
        assert_eq!(href.section, None);

        assert!(home_link().narrow::<NavSection>().is_none());
    }

    #[test]
    fn test_narrow_rejects_ill_shaped_data() {
        let ext = Extension::new(NAV_HREF).with_property("id", "x");
        assert!(ext.narrow::<NavHref>().is_none());
    }

    #[test]
    fn test_area_declaration_defaults() {
        let ext = Extension::new(AREA)
            .with_property("id", "ds-pipelines")
            .with_property("reliantAreas", json!(["ds-projects"]));
        let area = ext.narrow::<AreaDeclaration>().unwrap();
        assert_eq!(area.reliant_areas, vec!["ds-projects"]);
        assert!(area.required_components.is_empty());
        assert!(area.dev_flags.is_empty());
    }
}
