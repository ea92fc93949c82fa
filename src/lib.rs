//! imgscript-core - Declarative Image Scripting Core
//!
//! # Contract
//! 1. The manifest is the API surface; the catalog never guesses.
//! 2. Generation is pure data: a plan, never emitted source.
//! 3. A plan only loads against the manifest it was generated from.
//! 4. Document order is execution order.
//! 5. Fail fast: no operation runs after the first error.
//! 6. Generation-time failures never reach run time.

pub mod catalog;
pub mod coerce;
pub mod document;
pub mod generate;
pub mod interpret;
pub mod provenance;
pub mod resolve;

pub use catalog::{ApiManifest, CatalogError, TypeCatalog, TypeDescriptor};
pub use coerce::{CoercionError, ParserSet, ScalarKind, Value, ValueParser};
pub use document::{parse_document, DocumentElement, DocumentError};
pub use generate::{
    BuildError, BuilderRegistry, Dispatch, GenerationError, GenerationFailure, Generator,
    LoadError, RegistryPlan,
};
pub use interpret::{
    ExecutionContext, Interpreter, InterpreterState, RunReport, ScriptError, TargetObject,
};
pub use provenance::{canonical_json, manifest_fingerprint};
pub use resolve::{ArgumentDescriptor, ResolutionError, Resolver, TieBreak};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const MIN_LOADER_VERSION: &str = "1.0.0";
