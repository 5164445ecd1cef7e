//! Extension declarations.
//!
//! An [`Extension`] is an opaque tagged record: a `type` string, optional
//! gating flags and a property map. The registry never looks past the tag;
//! typed views live in [`super::kinds`].

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::code_ref::{CodeRef, CodeRefSpec, LazyCodeRef, CODE_REF_KEY};
use super::kinds::ExtensionKind;
use crate::error::DeclarationError;

/// Gating flags of one extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtensionFlags {
    /// Every flag here must be known and `true`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    /// Every flag here must be known and `false`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disallowed: Vec<String>,
}

impl ExtensionFlags {
    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.disallowed.is_empty()
    }
}

/// One property value: plain data or a deferred code reference.
#[derive(Clone)]
pub enum PropertyValue {
    Value(Value),
    Code(CodeRef),
}

impl fmt::Debug for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Value(value) => write!(f, "{value}"),
            PropertyValue::Code(code) => write!(f, "$codeRef({})", code.label()),
        }
    }
}

/// Extension predicate used to narrow registry queries.
pub type ExtensionPredicate = fn(&Extension) -> bool;

/// Predicate accepting every extension.
pub fn any_extension(_: &Extension) -> bool {
    true
}

/// A declared contribution.
#[derive(Clone, Debug)]
pub struct Extension {
    type_name: String,
    flags: ExtensionFlags,
    properties: IndexMap<String, PropertyValue>,
}

impl Extension {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            flags: ExtensionFlags::default(),
            properties: IndexMap::new(),
        }
    }

    pub fn with_required<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags.required.extend(flags.into_iter().map(Into::into));
        self
    }

    pub fn with_disallowed<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags.disallowed.extend(flags.into_iter().map(Into::into));
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties
            .insert(name.into(), PropertyValue::Value(value.into()));
        self
    }

    pub fn with_code_ref(mut self, name: impl Into<String>, code: CodeRef) -> Self {
        self.properties.insert(name.into(), PropertyValue::Code(code));
        self
    }

    /// Parse one manifest entry.
    ///
    /// Properties shaped `{"$codeRef": "module.export"}` become unbound code
    /// references; the loader binds them to the owning bundle.
    pub fn from_json(value: &Value) -> Result<Self, DeclarationError> {
        let object = value.as_object().ok_or_else(|| {
            DeclarationError::Malformed("extension must be a JSON object".to_string())
        })?;

        let type_name = match object.get("type") {
            None | Some(Value::Null) => return Err(DeclarationError::MissingType),
            Some(Value::String(tag)) => tag.clone(),
            Some(other) => {
                return Err(DeclarationError::Malformed(format!(
                    "type must be a string, got {other}"
                )))
            }
        };

        let flags = match object.get("flags") {
            None | Some(Value::Null) => ExtensionFlags::default(),
            Some(raw) => serde_json::from_value::<ExtensionFlags>(raw.clone())
                .map_err(|e| DeclarationError::InvalidFlags(e.to_string()))?,
        };

        let mut properties = IndexMap::new();
        match object.get("properties") {
            None | Some(Value::Null) => {}
            Some(Value::Object(raw)) => {
                for (name, raw_value) in raw {
                    properties.insert(name.clone(), parse_property(name, raw_value)?);
                }
            }
            Some(_) => {
                return Err(DeclarationError::Malformed(
                    "properties must be a JSON object".to_string(),
                ))
            }
        }

        Ok(Self {
            type_name,
            flags,
            properties,
        })
    }

    /// Serialize back to manifest form; code references keep their address.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("type".into(), Value::String(self.type_name.clone()));
        if !self.flags.is_empty() {
            object.insert(
                "flags".into(),
                serde_json::to_value(&self.flags).unwrap_or(Value::Null),
            );
        }
        let properties = self
            .properties
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    PropertyValue::Value(v) => v.clone(),
                    PropertyValue::Code(code) => {
                        let mut address = Map::new();
                        address.insert(CODE_REF_KEY.into(), Value::String(code.label().into()));
                        Value::Object(address)
                    }
                };
                (name.clone(), value)
            })
            .collect::<Map<_, _>>();
        object.insert("properties".into(), Value::Object(properties));
        Value::Object(object)
    }

    /// Structural checks applied at registration.
    pub fn validate(&self) -> Result<(), DeclarationError> {
        if self.type_name.trim().is_empty() {
            return Err(DeclarationError::MissingType);
        }
        let all_flags = self.flags.required.iter().chain(&self.flags.disallowed);
        if all_flags.into_iter().any(|f| f.trim().is_empty()) {
            return Err(DeclarationError::InvalidFlags(
                "flag names must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn is_type(&self, tag: &str) -> bool {
        self.type_name == tag
    }

    pub fn flags(&self) -> &ExtensionFlags {
        &self.flags
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// Plain data property.
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.properties.get(name)? {
            PropertyValue::Value(value) => Some(value),
            PropertyValue::Code(_) => None,
        }
    }

    pub fn code_ref(&self, name: &str) -> Option<&CodeRef> {
        match self.properties.get(name)? {
            PropertyValue::Code(code) => Some(code),
            PropertyValue::Value(_) => None,
        }
    }

    pub fn code_refs(&self) -> impl Iterator<Item = (&str, &CodeRef)> {
        self.properties.iter().filter_map(|(name, value)| match value {
            PropertyValue::Code(code) => Some((name.as_str(), code)),
            PropertyValue::Value(_) => None,
        })
    }

    /// Plain data properties as a JSON object, code references left out.
    pub fn data(&self) -> Map<String, Value> {
        self.properties
            .iter()
            .filter_map(|(name, value)| match value {
                PropertyValue::Value(v) => Some((name.clone(), v.clone())),
                PropertyValue::Code(_) => None,
            })
            .collect()
    }

    /// Typed view, `None` when the tag differs or the data does not fit.
    pub fn narrow<K: ExtensionKind>(&self) -> Option<K> {
        K::from_extension(self)
    }

    /// Replace every unbound code reference using `bind`.
    pub(crate) fn bind_code_refs(mut self, mut bind: impl FnMut(&CodeRefSpec) -> CodeRef) -> Self {
        for value in self.properties.values_mut() {
            if let PropertyValue::Code(code) = value {
                if code.is_bound() {
                    continue;
                }
                if let Some(spec) = code.spec() {
                    *code = bind(spec);
                }
            }
        }
        self
    }
}

fn parse_property(name: &str, raw: &Value) -> Result<PropertyValue, DeclarationError> {
    let Some(object) = raw.as_object() else {
        return Ok(PropertyValue::Value(raw.clone()));
    };
    match (object.len(), object.get(CODE_REF_KEY)) {
        (1, Some(Value::String(address))) => {
            let spec = CodeRefSpec::parse(address).ok_or_else(|| {
                DeclarationError::Malformed(format!(
                    "property {name} has an invalid code reference: {address:?}"
                ))
            })?;
            Ok(PropertyValue::Code(LazyCodeRef::unbound(spec)))
        }
        (_, Some(_)) => Err(DeclarationError::Malformed(format!(
            "property {name} has a malformed code reference"
        ))),
        _ => Ok(PropertyValue::Value(raw.clone())),
    }
}

/// An extension with its owning plugin, as stored in the registry.
///
/// Clones share the registered declaration.
#[derive(Clone)]
pub struct LoadedExtension {
    plugin_id: Arc<str>,
    extension: Arc<Extension>,
}

impl LoadedExtension {
    pub fn new(plugin_id: impl Into<Arc<str>>, extension: Extension) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            extension: Arc::new(extension),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn extension(&self) -> &Extension {
        &self.extension
    }

    /// Whether both handles refer to the same registered instance.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.extension, &b.extension)
    }
}

impl Deref for LoadedExtension {
    type Target = Extension;

    fn deref(&self) -> &Extension {
        &self.extension
    }
}

impl fmt::Debug for LoadedExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedExtension")
            .field("plugin_id", &self.plugin_id)
            .field("type", &self.extension.type_name)
            .field("flags", &self.extension.flags)
            .field("properties", &self.extension.properties)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_full_entry() {
        let ext = Extension::from_json(&json!({
            "type": "app.navigation/href",
            "flags": { "required": ["HOME"], "disallowed": ["LEGACY"] },
            "properties": {
                "id": "home",
                "href": "/",
                "iconRef": { "$codeRef": "icons.HomeIcon" }
            }
        }))
        .unwrap();

        assert_eq!(ext.type_name(), "app.navigation/href");
        assert_eq!(ext.flags().required, vec!["HOME"]);
        assert_eq!(ext.flags().disallowed, vec!["LEGACY"]);
        assert_eq!(ext.value("id"), Some(&json!("home")));
        let icon = ext.code_ref("iconRef").unwrap();
        assert_eq!(icon.label(), "icons.HomeIcon");
        assert!(!icon.is_bound());
        assert!(ext.value("iconRef").is_none());
        assert_eq!(ext.data().len(), 2);
    }

    #[test]
    fn test_from_json_rejects_bad_shapes() {
        assert_eq!(
            Extension::from_json(&json!({ "properties": {} })).unwrap_err(),
            DeclarationError::MissingType
        );
        assert!(matches!(
            Extension::from_json(&json!([1, 2])),
            Err(DeclarationError::Malformed(_))
        ));
        assert!(matches!(
            Extension::from_json(&json!({ "type": 3 })),
            Err(DeclarationError::Malformed(_))
        ));
        assert!(matches!(
            Extension::from_json(&json!({ "type": "x", "flags": { "required": "HOME" } })),
            Err(DeclarationError::InvalidFlags(_))
        ));
        assert!(matches!(
            Extension::from_json(&json!({ "type": "x", "flags": { "needed": [] } })),
            Err(DeclarationError::InvalidFlags(_))
        ));
        assert!(matches!(
            Extension::from_json(&json!({ "type": "x", "properties": { "c": { "$codeRef": 5 } } })),
            Err(DeclarationError::Malformed(_))
        ));
    }

    #[test]
    fn test_from_json_rejects_escaping_code_ref() {
        for address in ["x.../secret", "x./tmp/secret", "../x.y", "x.."] {
            let result = Extension::from_json(&json!({
                "type": "x",
                "properties": { "c": { "$codeRef": address } }
            }));
            assert!(
                matches!(result, Err(DeclarationError::Malformed(_))),
                "{address} should be rejected"
            );
        }
    }

    #[test]
    fn test_code_ref_lookalike_stays_data() {
        let ext = Extension::from_json(&json!({
            "type": "x",
            "properties": { "meta": { "label": "not code" } }
        }))
        .unwrap();
        assert!(ext.code_ref("meta").is_none());
        assert_eq!(ext.value("meta"), Some(&json!({ "label": "not code" })));
    }

    #[test]
    fn test_validate() {
        assert_eq!(
            Extension::new("  ").validate().unwrap_err(),
            DeclarationError::MissingType
        );
        assert!(matches!(
            Extension::new("x").with_required([""]).validate(),
            Err(DeclarationError::InvalidFlags(_))
        ));
        assert!(Extension::new("x").with_required(["a"]).validate().is_ok());
    }

    #[test]
    fn test_to_json_keeps_code_ref_address() {
        let source = json!({
            "type": "app.route",
            "properties": { "path": "/x", "component": { "$codeRef": "pages.X" } }
        });
        let ext = Extension::from_json(&source).unwrap();
        assert_eq!(ext.to_json(), source);
    }

    #[test]
    fn test_loaded_extension_identity() {
        let loaded = LoadedExtension::new("p1", Extension::new("x"));
        let copy = loaded.clone();
        let other = LoadedExtension::new("p1", Extension::new("x"));

        assert_eq!(loaded.plugin_id(), "p1");
        assert!(LoadedExtension::ptr_eq(&loaded, &copy));
        assert!(!LoadedExtension::ptr_eq(&loaded, &other));
    }
}
