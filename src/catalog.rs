//! Type Catalog - the API surface as data
//!
//! Descriptors are loaded once from a JSON manifest (hand-written or
//! machine-extracted from the target API) and never mutated afterwards,
//! so the catalog can be shared by reference across concurrent passes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::provenance::manifest_fingerprint;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Duplicate type in manifest: {0}")]
    DuplicateType(String),

    #[error("Manifest names target type '{0}' but does not declare it")]
    UnknownTarget(String),

    #[error("Failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A declared parameter or property type: a bare name, or `[Name]` for an
/// ordered collection of that element type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TypeRef {
    pub name: String,
    pub collection: bool,
}

impl TypeRef {
    pub fn scalar(name: &str) -> Self {
        Self { name: name.to_string(), collection: false }
    }

    pub fn collection_of(name: &str) -> Self {
        Self { name: name.to_string(), collection: true }
    }
}

impl TryFrom<String> for TypeRef {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("empty type reference".to_string());
        }
        if let Some(inner) = trimmed.strip_prefix('[') {
            let inner = inner
                .strip_suffix(']')
                .ok_or_else(|| format!("unterminated collection type: {trimmed}"))?;
            if inner.is_empty() {
                return Err("empty collection element type".to_string());
            }
            return Ok(TypeRef::collection_of(inner));
        }
        Ok(TypeRef::scalar(trimmed))
    }
}

impl From<TypeRef> for String {
    fn from(t: TypeRef) -> String {
        t.to_string()
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.collection {
            write!(f, "[{}]", self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// One parameter of a constructor or method. The name is matched
/// case-sensitively against attribute and child-element names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeRef,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstructorDescriptor {
    #[serde(default)]
    pub parameters: Vec<ParameterDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeRef,
}

/// Anything with an ordered parameter list the resolver can pick between.
pub trait Callable {
    fn parameters(&self) -> &[ParameterDescriptor];

    fn signature(&self) -> String {
        let params: Vec<String> = self
            .parameters()
            .iter()
            .map(|p| format!("{}: {}", p.name, p.ty))
            .collect();
        format!("({})", params.join(", "))
    }
}

impl<C: Callable + ?Sized> Callable for &C {
    fn parameters(&self) -> &[ParameterDescriptor] {
        (**self).parameters()
    }
}

impl Callable for ConstructorDescriptor {
    fn parameters(&self) -> &[ParameterDescriptor] {
        &self.parameters
    }
}

impl Callable for MethodDescriptor {
    fn parameters(&self) -> &[ParameterDescriptor] {
        &self.parameters
    }
}

/// One target type: either a constructible class (constructors, and for the
/// target object also methods and settable properties) or an enumeration
/// with an ordered member list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    #[serde(default)]
    pub constructors: Vec<ConstructorDescriptor>,
    #[serde(default)]
    pub properties: Vec<PropertyDescriptor>,
    #[serde(default)]
    pub methods: Vec<MethodDescriptor>,
    #[serde(default, rename = "enum")]
    pub is_enum: bool,
    #[serde(default)]
    pub members: Vec<String>,
}

impl TypeDescriptor {
    pub fn methods_named(&self, name: &str) -> Vec<&MethodDescriptor> {
        self.methods.iter().filter(|m| m.name == name).collect()
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// The on-disk description of the target API surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiManifest {
    pub api_version: String,
    /// Name of the type the interpreted operations act upon.
    pub target: String,
    pub types: Vec<TypeDescriptor>,
}

/// Immutable, name-keyed view over an [`ApiManifest`].
#[derive(Debug)]
pub struct TypeCatalog {
    types: HashMap<String, TypeDescriptor>,
    target: String,
    api_version: String,
    fingerprint: String,
}

impl TypeCatalog {
    pub fn from_manifest(manifest: ApiManifest) -> Result<Self, CatalogError> {
        let fingerprint = manifest_fingerprint(&manifest)?;

        let mut types = HashMap::with_capacity(manifest.types.len());
        for descriptor in manifest.types {
            let name = descriptor.name.clone();
            if types.insert(name.clone(), descriptor).is_some() {
                return Err(CatalogError::DuplicateType(name));
            }
        }

        if !types.contains_key(&manifest.target) {
            return Err(CatalogError::UnknownTarget(manifest.target));
        }

        Ok(Self {
            types,
            target: manifest.target,
            api_version: manifest.api_version,
            fingerprint,
        })
    }

    pub fn load_from_file(path: &Path) -> Result<Self, CatalogError> {
        let content = fs::read_to_string(path)?;
        let manifest: ApiManifest = serde_json::from_str(&content)?;
        Self::from_manifest(manifest)
    }

    /// The catalog's single query contract.
    pub fn describe(&self, type_name: &str) -> Result<&TypeDescriptor, CatalogError> {
        self.types
            .get(type_name)
            .ok_or_else(|| CatalogError::UnknownType(type_name.to_string()))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn target(&self) -> &TypeDescriptor {
        // Presence is checked in from_manifest.
        &self.types[&self.target]
    }

    pub fn target_name(&self) -> &str {
        &self.target
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// SHA-256 over the canonical JSON of the source manifest.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_manifest() -> ApiManifest {
        ApiManifest {
            api_version: "7.0".to_string(),
            target: "Image".to_string(),
            types: vec![TypeDescriptor {
                name: "Image".to_string(),
                constructors: vec![],
                properties: vec![],
                methods: vec![],
                is_enum: false,
                members: vec![],
            }],
        }
    }

    #[test]
    fn type_ref_round_trips_collection_syntax() {
        let t: TypeRef = "[PathArc]".to_string().try_into().unwrap();
        assert!(t.collection);
        assert_eq!(t.name, "PathArc");
        assert_eq!(t.to_string(), "[PathArc]");

        let s: TypeRef = "double".to_string().try_into().unwrap();
        assert!(!s.collection);
        assert_eq!(s.to_string(), "double");
    }

    #[test]
    fn type_ref_rejects_malformed_collection() {
        assert!(TypeRef::try_from("[PathArc".to_string()).is_err());
        assert!(TypeRef::try_from("[]".to_string()).is_err());
        assert!(TypeRef::try_from("".to_string()).is_err());
    }

    #[test]
    fn unknown_type_is_an_error() {
        let catalog = TypeCatalog::from_manifest(minimal_manifest()).unwrap();
        let err = catalog.describe("Nope").unwrap_err();
        assert!(matches!(err, CatalogError::UnknownType(name) if name == "Nope"));
    }

    #[test]
    fn manifest_must_declare_its_target() {
        let mut manifest = minimal_manifest();
        manifest.target = "Missing".to_string();
        let err = TypeCatalog::from_manifest(manifest).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownTarget(_)));
    }

    #[test]
    fn fingerprint_is_stable_for_identical_manifests() {
        let a = TypeCatalog::from_manifest(minimal_manifest()).unwrap();
        let b = TypeCatalog::from_manifest(minimal_manifest()).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
