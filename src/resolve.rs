//! Overload Resolver.
//!
//! Candidates are filtered by the set of argument names actually present and
//! by shape compatibility of every parameter; the first surviving candidate
//! in declaration order is selected. No scoring. The historical first-match
//! tie-break can be tightened to reject ambiguity via [`TieBreak::Strict`].

use thiserror::Error;

use crate::catalog::{Callable, ParameterDescriptor, TypeCatalog, TypeRef};

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static RESOLUTION_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_resolution_call_count() -> u32 {
    RESOLUTION_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_resolution_call_count() {
    RESOLUTION_CALL_COUNT.store(0, Ordering::SeqCst);
}

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error(
        "No overload of '{owner}' accepts arguments ({}) (element '{element}')",
        provided.join(", ")
    )]
    NoMatch {
        owner: String,
        provided: Vec<String>,
        element: String,
    },

    #[error("{count} overloads of '{owner}' accept the given arguments (element '{element}')")]
    Ambiguous {
        owner: String,
        count: usize,
        element: String,
    },
}

/// How the document supplied one argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentShape {
    /// An attribute: a leaf text token, coercible to any scalar kind.
    Token,
    /// An attribute holding a `{variable}` reference; the bound value may be
    /// a scalar or a constructed instance, so any non-collection slot fits.
    Reference,
    /// A named child element: a nested object or a named collection container.
    Tree,
    /// Children whose names match no parameter; only a trailing collection
    /// parameter can absorb them.
    Rest,
}

/// Name plus provided shape; the resolver never sees coerced values.
#[derive(Debug, Clone)]
pub struct ArgumentDescriptor {
    pub name: String,
    pub shape: ArgumentShape,
}

impl ArgumentDescriptor {
    pub fn token(name: &str) -> Self {
        Self { name: name.to_string(), shape: ArgumentShape::Token }
    }

    pub fn reference(name: &str) -> Self {
        Self { name: name.to_string(), shape: ArgumentShape::Reference }
    }

    pub fn tree(name: &str) -> Self {
        Self { name: name.to_string(), shape: ArgumentShape::Tree }
    }

    pub fn rest() -> Self {
        Self { name: String::new(), shape: ArgumentShape::Rest }
    }
}

/// Tie-break policy when more than one candidate survives filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// First syntactically-matching candidate in declaration order wins.
    /// Matches the historical behavior.
    #[default]
    FirstDeclared,
    /// More than one surviving candidate is an error.
    Strict,
}

/// Picks overloads; consults the catalog to classify parameter types.
#[derive(Debug)]
pub struct Resolver<'a> {
    catalog: &'a TypeCatalog,
    tie_break: TieBreak,
}

impl<'a> Resolver<'a> {
    pub fn new(catalog: &'a TypeCatalog) -> Self {
        Self { catalog, tie_break: TieBreak::FirstDeclared }
    }

    pub fn with_tie_break(catalog: &'a TypeCatalog, tie_break: TieBreak) -> Self {
        Self { catalog, tie_break }
    }

    /// Select the overload of `owner` matching the provided argument set.
    pub fn resolve<'c, C: Callable>(
        &self,
        owner: &str,
        element: &str,
        candidates: &'c [C],
        provided: &[ArgumentDescriptor],
    ) -> Result<&'c C, ResolutionError> {
        #[cfg(feature = "test-hooks")]
        RESOLUTION_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        let mut matches = candidates
            .iter()
            .filter(|c| self.accepts(c.parameters(), provided));

        let first = matches.next().ok_or_else(|| ResolutionError::NoMatch {
            owner: owner.to_string(),
            provided: provided
                .iter()
                .map(|a| match a.shape {
                    ArgumentShape::Rest => "<children>".to_string(),
                    _ => a.name.clone(),
                })
                .collect(),
            element: element.to_string(),
        })?;

        if self.tie_break == TieBreak::Strict {
            let remaining = matches.count();
            if remaining > 0 {
                return Err(ResolutionError::Ambiguous {
                    owner: owner.to_string(),
                    count: remaining + 1,
                    element: element.to_string(),
                });
            }
        }

        Ok(first)
    }

    fn accepts(&self, params: &[ParameterDescriptor], provided: &[ArgumentDescriptor]) -> bool {
        let named: Vec<&ArgumentDescriptor> = provided
            .iter()
            .filter(|a| a.shape != ArgumentShape::Rest)
            .collect();
        let has_rest = provided.iter().any(|a| a.shape == ArgumentShape::Rest);

        // Every provided argument must name a parameter of compatible shape.
        for arg in &named {
            match params.iter().find(|p| p.name == arg.name) {
                Some(param) => {
                    if !self.compatible(arg, param) {
                        return false;
                    }
                }
                None => return false,
            }
        }

        // Unnamed children can only feed a trailing collection parameter
        // that was not already provided by name.
        if has_rest {
            match params.last() {
                Some(last)
                    if last.ty.collection && !named.iter().any(|a| a.name == last.name) => {}
                _ => return false,
            }
        }

        // Every required parameter must be satisfied. A trailing collection
        // parameter is always satisfiable: with no matching children it is
        // built as an empty sequence, never a failure.
        for (index, param) in params.iter().enumerate() {
            if param.optional {
                continue;
            }
            let by_name = named.iter().any(|a| a.name == param.name);
            let by_trailing_collection = index == params.len() - 1 && param.ty.collection;
            if !by_name && !by_trailing_collection {
                return false;
            }
        }

        true
    }

    fn compatible(&self, arg: &ArgumentDescriptor, param: &ParameterDescriptor) -> bool {
        match arg.shape {
            // A text token can fill any non-collection scalar slot; whether
            // the token actually parses is coercion's concern.
            ArgumentShape::Token => !param.ty.collection && self.scalar_like(&param.ty),
            // A reference may hold a bound instance, so class slots fit too;
            // the builder checks the bound value's kind.
            ArgumentShape::Reference => !param.ty.collection,
            ArgumentShape::Tree => param.ty.collection || self.class_like(&param.ty),
            ArgumentShape::Rest => false,
        }
    }

    fn scalar_like(&self, ty: &TypeRef) -> bool {
        if is_builtin(&ty.name) {
            return true;
        }
        match self.catalog.describe(&ty.name) {
            Ok(descriptor) => descriptor.is_enum,
            // Not in the catalog: an opaque value type with its own parser.
            Err(_) => true,
        }
    }

    fn class_like(&self, ty: &TypeRef) -> bool {
        matches!(self.catalog.describe(&ty.name), Ok(d) if !d.is_enum)
    }
}

pub fn is_builtin(name: &str) -> bool {
    matches!(name, "int" | "float" | "bool" | "string")
}
