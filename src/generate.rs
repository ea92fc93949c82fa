//! Binding Generator and builder registry.
//!
//! Generation is a pure data stage: it walks the catalog and emits a
//! serializable [`RegistryPlan`] mapping element names to dispatch entries.
//! Loading turns a plan back into an in-memory [`BuilderRegistry`] whose
//! builders reconstruct typed argument graphs from document elements. The
//! plan records the fingerprint of the manifest it was generated from, and
//! the loader refuses a plan generated from a different manifest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, warn};

use crate::catalog::{
    Callable, CatalogError, ParameterDescriptor, TypeCatalog, TypeRef,
};
use crate::coerce::{coerce, CoercionError, ParserSet, ScalarKind, Value};
use crate::document::DocumentElement;
use crate::resolve::{ArgumentDescriptor, ResolutionError, Resolver, TieBreak};
use crate::{ENGINE_VERSION, MIN_LOADER_VERSION};

/// Attribute reserved for binding an element's result into the execution
/// context; never treated as a constructor or method argument.
pub const VARIABLE_ATTRIBUTE: &str = "variable";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Type '{0}' has no constructors")]
    NoConstructors(String),

    #[error("Parameter '{parameter}' of '{owner}' has no builder strategy for declared type '{declared}'")]
    UnknownParameterKind {
        owner: String,
        parameter: String,
        declared: String,
    },
}

/// One type (or target member) the generator had to skip, reported to the
/// operator. Skipped names are absent from the plan; documents referencing
/// them fail with an unknown-element error at run time.
#[derive(Debug)]
pub struct GenerationFailure {
    pub name: String,
    pub error: GenerationError,
}

/// How an element name is executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Dispatch {
    /// Build an instance of the named type and optionally bind it.
    Construct { type_name: String },
    /// Invoke the named method on the target object.
    Call { method: String },
    /// Set the named property on the target object.
    Set { property: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanEntry {
    pub element: String,
    pub dispatch: Dispatch,
}

/// Serializable output of the generation stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryPlan {
    pub generator_version: String,
    pub min_loader_version: String,
    pub generated_at: DateTime<Utc>,
    pub manifest_fingerprint: String,
    pub target: String,
    pub entries: Vec<PlanEntry>,
}

/// How a parameter's declared type is materialized from a document element.
#[derive(Debug, Clone, PartialEq)]
enum Strategy {
    Scalar(ScalarKind),
    Nested(String),
    Collection(String),
}

fn strategy_for(
    ty: &TypeRef,
    catalog: &TypeCatalog,
    parsers: &ParserSet,
    owner: &str,
    parameter: &str,
) -> Result<Strategy, GenerationError> {
    let unknown = || GenerationError::UnknownParameterKind {
        owner: owner.to_string(),
        parameter: parameter.to_string(),
        declared: ty.to_string(),
    };

    if ty.collection {
        match catalog.describe(&ty.name) {
            Ok(d) if !d.is_enum => return Ok(Strategy::Collection(ty.name.clone())),
            _ => return Err(unknown()),
        }
    }

    match ty.name.as_str() {
        "int" => return Ok(Strategy::Scalar(ScalarKind::Integer)),
        "float" => return Ok(Strategy::Scalar(ScalarKind::Float)),
        "bool" => return Ok(Strategy::Scalar(ScalarKind::Boolean)),
        "string" => return Ok(Strategy::Scalar(ScalarKind::Text)),
        _ => {}
    }

    if let Ok(descriptor) = catalog.describe(&ty.name) {
        if descriptor.is_enum {
            return Ok(Strategy::Scalar(ScalarKind::Enum(ty.name.clone())));
        }
        if descriptor.constructors.is_empty() {
            return Err(unknown());
        }
        return Ok(Strategy::Nested(ty.name.clone()));
    }

    if parsers.contains(&ty.name) {
        return Ok(Strategy::Scalar(ScalarKind::Opaque(ty.name.clone())));
    }

    Err(unknown())
}

/// Walks the catalog and emits the dispatch plan plus the failures the
/// operator needs to act on.
pub struct Generator<'a> {
    catalog: &'a TypeCatalog,
    parsers: &'a ParserSet,
}

impl<'a> Generator<'a> {
    pub fn new(catalog: &'a TypeCatalog, parsers: &'a ParserSet) -> Self {
        Self { catalog, parsers }
    }

    pub fn generate(&self) -> (RegistryPlan, Vec<GenerationFailure>) {
        let mut entries = Vec::new();
        let mut failures = Vec::new();

        // Constructible types, in stable name order.
        for name in self.catalog.type_names() {
            if name == self.catalog.target_name() {
                continue;
            }
            // describe cannot fail for names the catalog itself returned
            let descriptor = match self.catalog.describe(name) {
                Ok(d) => d,
                Err(_) => continue,
            };
            if descriptor.is_enum {
                continue;
            }
            match self.check_constructible(name) {
                Ok(()) => entries.push(PlanEntry {
                    element: name.to_string(),
                    dispatch: Dispatch::Construct { type_name: name.to_string() },
                }),
                Err(error) => {
                    warn!(type_name = name, %error, "skipping type");
                    failures.push(GenerationFailure { name: name.to_string(), error });
                }
            }
        }

        // Target methods, one entry per distinct name.
        let target = self.catalog.target();
        let mut seen_methods = HashSet::new();
        for method in &target.methods {
            if !seen_methods.insert(method.name.clone()) {
                continue;
            }
            match self.check_parameters(&method.name, &method.parameters) {
                Ok(()) => entries.push(PlanEntry {
                    element: method.name.clone(),
                    dispatch: Dispatch::Call { method: method.name.clone() },
                }),
                Err(error) => {
                    warn!(method = %method.name, %error, "skipping method");
                    failures.push(GenerationFailure { name: method.name.clone(), error });
                }
            }
        }

        // Target properties become arity-1 setters.
        for property in &target.properties {
            let strategy = strategy_for(
                &property.ty,
                self.catalog,
                self.parsers,
                self.catalog.target_name(),
                &property.name,
            );
            match strategy {
                Ok(Strategy::Scalar(_)) => entries.push(PlanEntry {
                    element: property.name.clone(),
                    dispatch: Dispatch::Set { property: property.name.clone() },
                }),
                Ok(_) | Err(_) => {
                    let error = GenerationError::UnknownParameterKind {
                        owner: self.catalog.target_name().to_string(),
                        parameter: property.name.clone(),
                        declared: property.ty.to_string(),
                    };
                    warn!(property = %property.name, %error, "skipping property");
                    failures.push(GenerationFailure { name: property.name.clone(), error });
                }
            }
        }

        debug!(
            entries = entries.len(),
            failures = failures.len(),
            "generation complete"
        );

        let plan = RegistryPlan {
            generator_version: ENGINE_VERSION.to_string(),
            min_loader_version: MIN_LOADER_VERSION.to_string(),
            generated_at: Utc::now(),
            manifest_fingerprint: self.catalog.fingerprint().to_string(),
            target: self.catalog.target_name().to_string(),
            entries,
        };
        (plan, failures)
    }

    fn check_constructible(&self, type_name: &str) -> Result<(), GenerationError> {
        let descriptor = self
            .catalog
            .describe(type_name)
            .map_err(|_| GenerationError::NoConstructors(type_name.to_string()))?;
        if descriptor.constructors.is_empty() {
            return Err(GenerationError::NoConstructors(type_name.to_string()));
        }
        for constructor in &descriptor.constructors {
            self.check_parameters(type_name, &constructor.parameters)?;
        }
        Ok(())
    }

    fn check_parameters(
        &self,
        owner: &str,
        parameters: &[ParameterDescriptor],
    ) -> Result<(), GenerationError> {
        for parameter in parameters {
            strategy_for(&parameter.ty, self.catalog, self.parsers, owner, &parameter.name)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Plan was generated from a different manifest (plan fingerprint {plan}, catalog fingerprint {catalog})")]
    FingerprintMismatch { plan: String, catalog: String },

    #[error("Plan requires loader >= {required}, current is {current}")]
    LoaderTooOld { required: String, current: String },

    #[error("Invalid version string in plan: {0}")]
    InvalidVersion(String),

    #[error("Plan entry '{element}' references unknown {kind} '{name}'")]
    DanglingEntry {
        element: String,
        kind: &'static str,
        name: String,
    },
}

/// Errors a builder can raise while reconstructing an argument graph.
/// All of them are terminal for the current document.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Coercion(#[from] CoercionError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    // Guarded against at load time by the fingerprint check; only reachable
    // if catalog and plan drift apart within one process.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Element '{element}' is missing required attribute '{attribute}'")]
    MissingAttribute { element: String, attribute: String },
}

/// In-memory dispatch tables plus the generated builder functions.
///
/// Stateless with respect to documents: the same registry is safely shared
/// across any number of interpretation passes.
pub struct BuilderRegistry<'a> {
    catalog: &'a TypeCatalog,
    parsers: &'a ParserSet,
    resolver: Resolver<'a>,
    entries: HashMap<String, Dispatch>,
}

impl std::fmt::Debug for BuilderRegistry<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuilderRegistry")
            .field("catalog", &self.catalog)
            .field("resolver", &self.resolver)
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

impl<'a> BuilderRegistry<'a> {
    pub fn load(
        plan: &RegistryPlan,
        catalog: &'a TypeCatalog,
        parsers: &'a ParserSet,
        tie_break: TieBreak,
    ) -> Result<Self, LoadError> {
        if plan.manifest_fingerprint != catalog.fingerprint() {
            return Err(LoadError::FingerprintMismatch {
                plan: plan.manifest_fingerprint.clone(),
                catalog: catalog.fingerprint().to_string(),
            });
        }

        let current = semver::Version::parse(ENGINE_VERSION)
            .map_err(|e| LoadError::InvalidVersion(e.to_string()))?;
        let required = semver::Version::parse(&plan.min_loader_version)
            .map_err(|e| LoadError::InvalidVersion(e.to_string()))?;
        if current < required {
            return Err(LoadError::LoaderTooOld {
                required: plan.min_loader_version.clone(),
                current: ENGINE_VERSION.to_string(),
            });
        }

        let target = catalog.target();
        let mut entries = HashMap::with_capacity(plan.entries.len());
        for entry in &plan.entries {
            match &entry.dispatch {
                Dispatch::Construct { type_name } => {
                    if !catalog.contains(type_name) {
                        return Err(LoadError::DanglingEntry {
                            element: entry.element.clone(),
                            kind: "type",
                            name: type_name.clone(),
                        });
                    }
                }
                Dispatch::Call { method } => {
                    if target.methods_named(method).is_empty() {
                        return Err(LoadError::DanglingEntry {
                            element: entry.element.clone(),
                            kind: "method",
                            name: method.clone(),
                        });
                    }
                }
                Dispatch::Set { property } => {
                    if target.property(property).is_none() {
                        return Err(LoadError::DanglingEntry {
                            element: entry.element.clone(),
                            kind: "property",
                            name: property.clone(),
                        });
                    }
                }
            }
            entries.insert(entry.element.clone(), entry.dispatch.clone());
        }

        Ok(Self {
            catalog,
            parsers,
            resolver: Resolver::with_tie_break(catalog, tie_break),
            entries,
        })
    }

    pub fn lookup(&self, element_name: &str) -> Option<&Dispatch> {
        self.entries.get(element_name)
    }

    pub fn catalog(&self) -> &TypeCatalog {
        self.catalog
    }

    /// Single-instance builder: reconstruct one typed instance from an
    /// element whose attributes and named children carry the constructor
    /// arguments.
    pub fn build_instance(
        &self,
        type_name: &str,
        element: &DocumentElement,
        variables: &HashMap<String, Value>,
    ) -> Result<Value, BuildError> {
        let descriptor = self.catalog.describe(type_name)?;
        let provided = provided_arguments(element, &descriptor.constructors);
        let constructor =
            self.resolver
                .resolve(type_name, &element.name, &descriptor.constructors, &provided)?;
        let arguments = self.arguments_for(constructor.parameters(), element, variables)?;
        Ok(Value::Instance {
            type_name: type_name.to_string(),
            arguments,
        })
    }

    /// Collection builder: build every child of `element` in document order.
    /// Zero children yields an empty sequence, never a failure.
    pub fn build_collection(
        &self,
        element: &DocumentElement,
        variables: &HashMap<String, Value>,
    ) -> Result<Value, BuildError> {
        let mut items = Vec::with_capacity(element.children.len());
        for child in &element.children {
            items.push(self.build_instance(&child.name, child, variables)?);
        }
        Ok(Value::Sequence { items })
    }

    /// Resolve a method overload on the target and coerce its arguments.
    pub fn call_arguments(
        &self,
        method_name: &str,
        element: &DocumentElement,
        variables: &HashMap<String, Value>,
    ) -> Result<Vec<Value>, BuildError> {
        let target = self.catalog.target();
        let overloads = target.methods_named(method_name);
        let provided = provided_arguments(element, &overloads);
        let chosen =
            self.resolver
                .resolve(method_name, &element.name, &overloads, &provided)?;
        self.arguments_for(chosen.parameters(), element, variables)
    }

    /// Coerce the `value` attribute of a property-set element.
    pub fn property_value(
        &self,
        property_name: &str,
        element: &DocumentElement,
        variables: &HashMap<String, Value>,
    ) -> Result<Value, BuildError> {
        let target = self.catalog.target();
        let property = target.property(property_name).ok_or_else(|| {
            CatalogError::UnknownType(format!(
                "{}.{}",
                self.catalog.target_name(),
                property_name
            ))
        })?;
        let strategy = strategy_for(
            &property.ty,
            self.catalog,
            self.parsers,
            self.catalog.target_name(),
            property_name,
        )?;
        let text = element
            .attribute("value")
            .ok_or_else(|| BuildError::MissingAttribute {
                element: element.name.clone(),
                attribute: "value".to_string(),
            })?;
        match strategy {
            Strategy::Scalar(kind) => {
                self.resolve_token(text, &kind, variables, &element.name, "value")
            }
            // Non-scalar properties are rejected at generation time.
            _ => Err(BuildError::Generation(GenerationError::UnknownParameterKind {
                owner: self.catalog.target_name().to_string(),
                parameter: property_name.to_string(),
                declared: property.ty.to_string(),
            })),
        }
    }

    fn arguments_for(
        &self,
        parameters: &[ParameterDescriptor],
        element: &DocumentElement,
        variables: &HashMap<String, Value>,
    ) -> Result<Vec<Value>, BuildError> {
        let parameter_names: HashSet<&str> =
            parameters.iter().map(|p| p.name.as_str()).collect();
        let mut arguments = Vec::with_capacity(parameters.len());

        for (index, parameter) in parameters.iter().enumerate() {
            let strategy = strategy_for(
                &parameter.ty,
                self.catalog,
                self.parsers,
                &element.name,
                &parameter.name,
            )?;

            match strategy {
                Strategy::Scalar(kind) => {
                    // Absence of a required attribute is excluded by the
                    // resolver; anything missing here was optional.
                    let Some(text) = element.attribute(&parameter.name) else {
                        continue;
                    };
                    arguments.push(self.resolve_token(
                        text,
                        &kind,
                        variables,
                        &element.name,
                        &parameter.name,
                    )?);
                }
                Strategy::Nested(type_name) => {
                    // A nested slot is filled either by a literal child
                    // element or by a `{variable}` bound to an instance.
                    if let Some(text) = element.attribute(&parameter.name) {
                        arguments.push(self.resolve_instance_reference(
                            text,
                            &type_name,
                            variables,
                            &element.name,
                            &parameter.name,
                        )?);
                        continue;
                    }
                    let Some(child) = element.child(&parameter.name) else {
                        continue;
                    };
                    arguments.push(self.build_instance(&type_name, child, variables)?);
                }
                Strategy::Collection(_) => {
                    if let Some(container) = element.child(&parameter.name) {
                        arguments.push(self.build_collection(container, variables)?);
                    } else if index == parameters.len() - 1 {
                        // Trailing collection fed directly by the unnamed
                        // children of this element.
                        let rest: Vec<&DocumentElement> = element
                            .children
                            .iter()
                            .filter(|c| !parameter_names.contains(c.name.as_str()))
                            .collect();
                        if rest.is_empty() && parameter.optional {
                            continue;
                        }
                        let mut items = Vec::with_capacity(rest.len());
                        for child in rest {
                            items.push(self.build_instance(&child.name, child, variables)?);
                        }
                        arguments.push(Value::Sequence { items });
                    }
                }
            }
        }

        Ok(arguments)
    }

    fn resolve_instance_reference(
        &self,
        text: &str,
        expected_type: &str,
        variables: &HashMap<String, Value>,
        element: &str,
        attribute: &str,
    ) -> Result<Value, BuildError> {
        let Some(name) = variable_reference(text) else {
            // The resolver only routes references here; a literal token in
            // an instance slot never survives overload resolution.
            return Err(CoercionError::Parse {
                text: text.to_string(),
                kind: expected_type.to_string(),
                element: element.to_string(),
                attribute: attribute.to_string(),
            }
            .into());
        };
        let value = variables.get(name).ok_or_else(|| CoercionError::UnboundVariable {
            name: name.to_string(),
            element: element.to_string(),
            attribute: attribute.to_string(),
        })?;
        match value {
            Value::Instance { type_name, .. } if type_name == expected_type => Ok(value.clone()),
            _ => Err(CoercionError::VariableKindMismatch {
                name: name.to_string(),
                kind: expected_type.to_string(),
                element: element.to_string(),
                attribute: attribute.to_string(),
            }
            .into()),
        }
    }

    fn resolve_token(
        &self,
        text: &str,
        kind: &ScalarKind,
        variables: &HashMap<String, Value>,
        element: &str,
        attribute: &str,
    ) -> Result<Value, BuildError> {
        if let Some(name) = variable_reference(text) {
            let value = variables.get(name).ok_or_else(|| {
                CoercionError::UnboundVariable {
                    name: name.to_string(),
                    element: element.to_string(),
                    attribute: attribute.to_string(),
                }
            })?;
            if !value.satisfies(kind) {
                return Err(CoercionError::VariableKindMismatch {
                    name: name.to_string(),
                    kind: kind.to_string(),
                    element: element.to_string(),
                    attribute: attribute.to_string(),
                }
                .into());
            }
            return Ok(value.clone());
        }
        Ok(coerce(text, kind, self.catalog, self.parsers, element, attribute)?)
    }
}

/// `{name}` attribute values refer to execution-context variables.
fn variable_reference(text: &str) -> Option<&str> {
    let inner = text.strip_prefix('{')?.strip_suffix('}')?;
    if inner.is_empty() {
        None
    } else {
        Some(inner)
    }
}

/// Describe the arguments an element actually provides, using the union of
/// parameter names across all candidates to separate named children from
/// positional collection items.
fn provided_arguments<C: Callable>(
    element: &DocumentElement,
    candidates: &[C],
) -> Vec<ArgumentDescriptor> {
    let parameter_names: HashSet<&str> = candidates
        .iter()
        .flat_map(|c| c.parameters())
        .map(|p| p.name.as_str())
        .collect();

    let mut attribute_args: Vec<(&str, &str)> = element
        .attributes
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .filter(|(name, _)| *name != VARIABLE_ATTRIBUTE)
        .collect();
    attribute_args.sort_unstable_by_key(|(name, _)| *name);

    let mut provided: Vec<ArgumentDescriptor> = attribute_args
        .into_iter()
        .map(|(name, value)| {
            if variable_reference(value).is_some() {
                ArgumentDescriptor::reference(name)
            } else {
                ArgumentDescriptor::token(name)
            }
        })
        .collect();

    let mut seen_children = HashSet::new();
    let mut has_rest = false;
    for child in &element.children {
        if parameter_names.contains(child.name.as_str()) {
            if seen_children.insert(child.name.as_str()) {
                provided.push(ArgumentDescriptor::tree(&child.name));
            }
        } else {
            has_rest = true;
        }
    }
    if has_rest {
        provided.push(ArgumentDescriptor::rest());
    }

    provided
}
