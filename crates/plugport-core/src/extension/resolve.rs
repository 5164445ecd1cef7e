//! Materializing the code references of an extension.

use futures::future::{join_all, try_join_all};
use indexmap::IndexMap;
use serde_json::Value;

use super::code_ref::CodeValue;
use super::kinds::ExtensionKind;
use super::types::{Extension, LoadedExtension, PropertyValue};
use crate::error::CodeResolutionError;

/// A property after resolution.
#[derive(Debug, Clone)]
pub enum ResolvedProperty {
    Value(Value),
    Code(CodeValue),
}

/// An extension whose direct code-reference properties are materialized.
#[derive(Debug, Clone)]
pub struct ResolvedExtension {
    source: LoadedExtension,
    properties: IndexMap<String, ResolvedProperty>,
}

impl ResolvedExtension {
    /// The registered declaration this was resolved from.
    pub fn source(&self) -> &LoadedExtension {
        &self.source
    }

    pub fn plugin_id(&self) -> &str {
        self.source.plugin_id()
    }

    pub fn type_name(&self) -> &str {
        self.source.type_name()
    }

    pub fn property(&self, name: &str) -> Option<&ResolvedProperty> {
        self.properties.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.properties.get(name)? {
            ResolvedProperty::Value(value) => Some(value),
            ResolvedProperty::Code(_) => None,
        }
    }

    pub fn code(&self, name: &str) -> Option<&CodeValue> {
        match self.properties.get(name)? {
            ResolvedProperty::Code(code) => Some(code),
            ResolvedProperty::Value(_) => None,
        }
    }

    pub fn narrow<K: ExtensionKind>(&self) -> Option<K> {
        K::from_extension(self.source.extension())
    }
}

/// Resolve every direct code-reference property of `extension` concurrently.
///
/// The first failure is returned tagged with the property name. References
/// that did succeed stay memoized on the declaration.
pub async fn resolve_extension(
    extension: &LoadedExtension,
) -> Result<ResolvedExtension, CodeResolutionError> {
    let plugin_id = extension.plugin_id();
    let pending = extension.code_refs().map(|(name, code)| async move {
        code.get()
            .await
            .map(|value| (name.to_string(), value))
            .map_err(|source| CodeResolutionError::Property {
                plugin_id: plugin_id.to_string(),
                property: name.to_string(),
                source: Box::new(source),
            })
    });
    let mut resolved: IndexMap<String, CodeValue> = try_join_all(pending).await?.into_iter().collect();

    let properties = extension
        .properties()
        .filter_map(|(name, value)| {
            let property = match value {
                PropertyValue::Value(v) => ResolvedProperty::Value(v.clone()),
                PropertyValue::Code(_) => ResolvedProperty::Code(resolved.swap_remove(name)?),
            };
            Some((name.to_string(), property))
        })
        .collect();

    Ok(ResolvedExtension {
        source: extension.clone(),
        properties,
    })
}

/// Resolve a batch. One failing extension does not hold back the others.
pub async fn resolve_all(
    extensions: &[LoadedExtension],
) -> (Vec<ResolvedExtension>, Vec<CodeResolutionError>) {
    let outcomes = join_all(extensions.iter().map(|extension| resolve_extension(extension))).await;
    let mut resolved = Vec::with_capacity(outcomes.len());
    let mut errors = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(extension) => resolved.push(extension),
            Err(e) => {
                tracing::warn!(error = %e, "Extension code resolution failed");
                errors.push(e);
            }
        }
    }
    (resolved, errors)
}

/// Declarations that still have an unresolved code reference.
pub fn has_unresolved_code(extension: &Extension) -> bool {
    extension.code_refs().any(|(_, code)| !code.is_resolved())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::code_ref::{CodeRefSpec, LazyCodeRef};
    use crate::extension::kinds::{NavHref, NAV_HREF};
    use serde_json::json;

    fn icon(name: &'static str) -> crate::extension::CodeRef {
        LazyCodeRef::new(name, move || async move { Ok(CodeValue::from_json(json!(name))) })
    }

    #[tokio::test]
    async fn test_resolve_extension_replaces_code_refs() {
        let ext = Extension::new(NAV_HREF)
            .with_property("id", "home")
            .with_property("title", "Home")
            .with_property("href", "/")
            .with_code_ref("iconRef", icon("HomeIcon"));
        let loaded = LoadedExtension::new("core", ext);
        assert!(has_unresolved_code(&loaded));

        let resolved = resolve_extension(&loaded).await.unwrap();
        assert_eq!(resolved.plugin_id(), "core");
        assert_eq!(resolved.value("id"), Some(&json!("home")));
        assert_eq!(resolved.code("iconRef").unwrap().as_json(), Some(&json!("HomeIcon")));
        assert_eq!(resolved.narrow::<NavHref>().unwrap().href, "/");
        assert!(!has_unresolved_code(&loaded));
    }

    #[tokio::test]
    async fn test_failure_names_the_property() {
        let ext = Extension::new("x")
            .with_code_ref("ok", icon("fine"))
            .with_code_ref("broken", LazyCodeRef::unbound(CodeRefSpec::new("m", "e")));
        let loaded = LoadedExtension::new("p1", ext);

        match resolve_extension(&loaded).await.unwrap_err() {
            CodeResolutionError::Property {
                plugin_id,
                property,
                source,
            } => {
                assert_eq!(plugin_id, "p1");
                assert_eq!(property, "broken");
                assert_eq!(*source, CodeResolutionError::Unbound("m.e".into()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_all_isolates_failures() {
        let good = LoadedExtension::new("p1", Extension::new("x").with_code_ref("c", icon("a")));
        let bad = LoadedExtension::new(
            "p2",
            Extension::new("x").with_code_ref("c", LazyCodeRef::unbound(CodeRefSpec::new("m", "e"))),
        );

        let (resolved, errors) = resolve_all(&[good, bad]).await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].plugin_id(), "p1");
        assert_eq!(errors.len(), 1);
    }
}
