//! Manifest parsing and integrity checks.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{DeclarationError, LoadFailure};
use crate::extension::Extension;

const SHA256_PREFIX: &str = "sha256:";

/// Extensions read from a manifest, with the entries that did not parse.
#[derive(Debug, Default)]
pub struct ParsedManifest {
    pub name: Option<String>,
    pub version: Option<String>,
    pub extensions: Vec<Extension>,
    /// Position in the manifest array and the reason it was rejected.
    pub rejected: Vec<(usize, DeclarationError)>,
}

/// Parse manifest bytes.
///
/// Accepts a bare array of extensions or an object with an `extensions`
/// array. Unparseable entries are collected in `rejected`, the rest kept.
pub fn parse_manifest(bytes: &[u8]) -> Result<ParsedManifest, LoadFailure> {
    let document: Value = serde_json::from_slice(bytes)
        .map_err(|e| LoadFailure::MalformedExport(format!("manifest is not valid JSON: {e}")))?;

    let (entries, name, version) = match document {
        Value::Array(entries) => (entries, None, None),
        Value::Object(mut object) => {
            let entries = match object.remove("extensions") {
                Some(Value::Array(entries)) => entries,
                _ => {
                    return Err(LoadFailure::MalformedExport(
                        "manifest object has no extensions array".to_string(),
                    ))
                }
            };
            let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);
            (entries, text(object.get("name")), text(object.get("version")))
        }
        _ => {
            return Err(LoadFailure::MalformedExport(
                "manifest must be an array or an object".to_string(),
            ))
        }
    };

    let mut parsed = ParsedManifest {
        name,
        version,
        ..ParsedManifest::default()
    };
    for (index, entry) in entries.iter().enumerate() {
        match Extension::from_json(entry) {
            Ok(extension) => parsed.extensions.push(extension),
            Err(e) => parsed.rejected.push((index, e)),
        }
    }
    Ok(parsed)
}

/// `sha256:<hex>` digest of `bytes`.
pub fn integrity_of(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{SHA256_PREFIX}{}", hex::encode(hasher.finalize()))
}

/// Compare `bytes` against an expected `sha256:<hex>` digest.
pub fn verify_integrity(expected: &str, bytes: &[u8]) -> Result<(), LoadFailure> {
    let actual = integrity_of(bytes);
    let matches = expected
        .strip_prefix(SHA256_PREFIX)
        .is_some_and(|digest| digest.eq_ignore_ascii_case(&actual[SHA256_PREFIX.len()..]));
    if matches {
        Ok(())
    } else {
        Err(LoadFailure::Integrity {
            expected: expected.to_string(),
            actual,
        })
    }
}
