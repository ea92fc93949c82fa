//! Value Coercion - leaf text tokens to typed values.
//!
//! Opaque value types (colors, geometry, ...) are parsed by pluggable
//! [`ValueParser`] implementations supplied by the surrounding application;
//! the core only knows their type names. Every failure carries the offending
//! text, the target kind, and the originating element/attribute.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::catalog::TypeCatalog;

/// A fully typed value flowing between builders, the resolver, and the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Value {
    Integer { value: i64 },
    Float { value: f64 },
    Boolean { value: bool },
    Text { value: String },
    Enum { type_name: String, member: String },
    /// An opaque value type, stored with the canonical text its parser accepted.
    Opaque { type_name: String, text: String },
    /// A constructed instance: type plus coerced constructor arguments in
    /// declaration order.
    Instance { type_name: String, arguments: Vec<Value> },
    /// An ordered collection of built instances.
    Sequence { items: Vec<Value> },
}

impl Value {
    pub fn integer(v: i64) -> Self {
        Value::Integer { value: v }
    }

    pub fn float(v: f64) -> Self {
        Value::Float { value: v }
    }

    pub fn boolean(v: bool) -> Self {
        Value::Boolean { value: v }
    }

    pub fn text(v: &str) -> Self {
        Value::Text { value: v.to_string() }
    }

    /// Whether this value could have been produced by coercion to `kind`.
    /// Used to type-check `{variable}` references before substitution.
    pub fn satisfies(&self, kind: &ScalarKind) -> bool {
        match (self, kind) {
            (Value::Integer { .. }, ScalarKind::Integer) => true,
            (Value::Float { .. }, ScalarKind::Float) => true,
            // An integer binding may flow into a float slot.
            (Value::Integer { .. }, ScalarKind::Float) => true,
            (Value::Boolean { .. }, ScalarKind::Boolean) => true,
            (Value::Text { .. }, ScalarKind::Text) => true,
            (Value::Enum { type_name, .. }, ScalarKind::Enum(expected)) => type_name == expected,
            (Value::Opaque { type_name, .. }, ScalarKind::Opaque(expected)) => {
                type_name == expected
            }
            _ => false,
        }
    }
}

/// The closed set of leaf kinds coercion can target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarKind {
    Integer,
    Float,
    Boolean,
    Text,
    Enum(String),
    Opaque(String),
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarKind::Integer => f.write_str("int"),
            ScalarKind::Float => f.write_str("float"),
            ScalarKind::Boolean => f.write_str("bool"),
            ScalarKind::Text => f.write_str("string"),
            ScalarKind::Enum(name) => write!(f, "enum {name}"),
            ScalarKind::Opaque(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoercionError {
    #[error("Cannot parse '{text}' as {kind} (element '{element}', attribute '{attribute}')")]
    Parse {
        text: String,
        kind: String,
        element: String,
        attribute: String,
    },

    #[error(
        "'{member}' is not a member of enum {type_name}; valid members: {} (element '{element}', attribute '{attribute}')",
        valid.join(", ")
    )]
    UnknownEnumMember {
        member: String,
        type_name: String,
        valid: Vec<String>,
        element: String,
        attribute: String,
    },

    #[error(
        "Cannot parse '{text}' as {type_name}: {message} (element '{element}', attribute '{attribute}')"
    )]
    InvalidValue {
        text: String,
        type_name: String,
        message: String,
        element: String,
        attribute: String,
    },

    #[error("Unbound variable '{name}' (element '{element}', attribute '{attribute}')")]
    UnboundVariable {
        name: String,
        element: String,
        attribute: String,
    },

    #[error(
        "Variable '{name}' holds a value incompatible with {kind} (element '{element}', attribute '{attribute}')"
    )]
    VariableKindMismatch {
        name: String,
        kind: String,
        element: String,
        attribute: String,
    },
}

/// Application-supplied parser for one opaque value type.
pub trait ValueParser: Send + Sync {
    /// Type name this parser handles, as it appears in the manifest.
    fn type_name(&self) -> &str;

    /// Parse the token; the error string becomes part of the diagnostic.
    fn parse(&self, text: &str) -> Result<Value, String>;
}

/// Registry of opaque-type parsers, keyed by type name.
#[derive(Default)]
pub struct ParserSet {
    parsers: HashMap<String, Box<dyn ValueParser>>,
}

impl ParserSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, parser: Box<dyn ValueParser>) {
        self.parsers.insert(parser.type_name().to_string(), parser);
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.parsers.contains_key(type_name)
    }

    fn get(&self, type_name: &str) -> Option<&dyn ValueParser> {
        self.parsers.get(type_name).map(Box::as_ref)
    }
}

/// Convert a leaf text token into a typed value, or fail with full context.
pub fn coerce(
    text: &str,
    kind: &ScalarKind,
    catalog: &TypeCatalog,
    parsers: &ParserSet,
    element: &str,
    attribute: &str,
) -> Result<Value, CoercionError> {
    let parse_error = || CoercionError::Parse {
        text: text.to_string(),
        kind: kind.to_string(),
        element: element.to_string(),
        attribute: attribute.to_string(),
    };

    match kind {
        ScalarKind::Integer => text
            .trim()
            .parse::<i64>()
            .map(Value::integer)
            .map_err(|_| parse_error()),
        ScalarKind::Float => text
            .trim()
            .parse::<f64>()
            .map(Value::float)
            .map_err(|_| parse_error()),
        ScalarKind::Boolean => {
            let token = text.trim();
            if token.eq_ignore_ascii_case("true") {
                Ok(Value::boolean(true))
            } else if token.eq_ignore_ascii_case("false") {
                Ok(Value::boolean(false))
            } else {
                Err(parse_error())
            }
        }
        ScalarKind::Text => Ok(Value::text(text)),
        ScalarKind::Enum(type_name) => {
            let descriptor = catalog.describe(type_name).map_err(|_| parse_error())?;
            // Exact, case-sensitive member lookup.
            if descriptor.members.iter().any(|m| m == text) {
                Ok(Value::Enum {
                    type_name: type_name.clone(),
                    member: text.to_string(),
                })
            } else {
                Err(CoercionError::UnknownEnumMember {
                    member: text.to_string(),
                    type_name: type_name.clone(),
                    valid: descriptor.members.clone(),
                    element: element.to_string(),
                    attribute: attribute.to_string(),
                })
            }
        }
        ScalarKind::Opaque(type_name) => {
            let parser = parsers.get(type_name).ok_or_else(parse_error)?;
            parser.parse(text).map_err(|message| CoercionError::InvalidValue {
                text: text.to_string(),
                type_name: type_name.clone(),
                message,
                element: element.to_string(),
                attribute: attribute.to_string(),
            })
        }
    }
}
