//! Document Interpreter.
//!
//! Walks a parsed document top-down and executes each element against the
//! target object, in document order, fail-fast: a partially applied
//! operation sequence on a mutated target is worse than stopping early, so
//! the first unrecoverable error ends the pass.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

use crate::coerce::Value;
use crate::document::DocumentElement;
use crate::generate::{BuildError, BuilderRegistry, Dispatch, VARIABLE_ATTRIBUTE};
use crate::ENGINE_VERSION;

/// Terminal error of one interpretation pass.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("Unknown element '{element}'")]
    UnknownElement { element: String },

    #[error("Operation '{operation}' failed: {message}")]
    TargetFailure { operation: String, message: String },
}

/// The opaque object the interpreted operations act upon. The core locates
/// and orders the calls; the implementation owns their semantics.
pub trait TargetObject {
    /// Apply a named operation with fully coerced arguments. A returned
    /// value, if any, can be bound into the execution context.
    fn apply(&mut self, operation: &str, arguments: &[Value]) -> Result<Option<Value>, String>;

    /// Set a named property.
    fn set(&mut self, property: &str, value: Value) -> Result<(), String>;
}

/// Per-pass state: variable bindings plus exclusive ownership of the target
/// handle for the duration of the pass.
pub struct ExecutionContext<'t> {
    variables: HashMap<String, Value>,
    target: &'t mut dyn TargetObject,
}

impl<'t> ExecutionContext<'t> {
    pub fn new(target: &'t mut dyn TargetObject) -> Self {
        Self::with_variables(target, HashMap::new())
    }

    /// Start the pass with caller-supplied bindings already visible.
    pub fn with_variables(
        target: &'t mut dyn TargetObject,
        variables: HashMap<String, Value>,
    ) -> Self {
        Self { variables, target }
    }

    /// Later writes shadow earlier ones.
    pub fn bind(&mut self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.variables
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpreterState {
    Idle,
    Validating,
    Executing,
    Completed,
    Failed,
}

/// Summary of a completed pass, serializable for callers that audit runs.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub pass_id: Uuid,
    pub engine_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub operations_applied: u32,
    pub variables_bound: u32,
}

/// Drives one document against one target. The registry it dispatches
/// through is shared and read-only; the interpreter itself is cheap and
/// single-use state.
pub struct Interpreter<'a> {
    registry: &'a BuilderRegistry<'a>,
    state: InterpreterState,
}

impl<'a> Interpreter<'a> {
    pub fn new(registry: &'a BuilderRegistry<'a>) -> Self {
        Self { registry, state: InterpreterState::Idle }
    }

    pub fn state(&self) -> InterpreterState {
        self.state
    }

    /// Execute the document's elements in order. The root element is the
    /// script wrapper; its children are the operation sequence.
    pub fn run(
        &mut self,
        document: &DocumentElement,
        target: &mut dyn TargetObject,
    ) -> Result<RunReport, ScriptError> {
        self.run_with_variables(document, target, HashMap::new())
    }

    /// Like [`run`](Self::run), but with caller-seeded variable bindings,
    /// for hosts that parameterize scripts from outside the document.
    pub fn run_with_variables(
        &mut self,
        document: &DocumentElement,
        target: &mut dyn TargetObject,
        variables: HashMap<String, Value>,
    ) -> Result<RunReport, ScriptError> {
        let started_at = Utc::now();
        let pass_id = Uuid::new_v4();

        self.state = InterpreterState::Validating;
        if let Err(e) = self.validate(document) {
            self.state = InterpreterState::Failed;
            error!(pass_id = %pass_id, %e, "document rejected");
            return Err(e);
        }

        self.state = InterpreterState::Executing;
        let mut context = ExecutionContext::with_variables(target, variables);
        let mut operations_applied = 0u32;

        for element in &document.children {
            match self.execute(element, &mut context) {
                Ok(applied) => {
                    if applied {
                        operations_applied += 1;
                    }
                }
                Err(e) => {
                    self.state = InterpreterState::Failed;
                    error!(pass_id = %pass_id, element = %element.name, %e, "pass failed");
                    return Err(e);
                }
            }
        }

        self.state = InterpreterState::Completed;
        let report = RunReport {
            pass_id,
            engine_version: ENGINE_VERSION.to_string(),
            started_at,
            finished_at: Utc::now(),
            operations_applied,
            variables_bound: context.variables.len() as u32,
        };
        debug!(pass_id = %pass_id, operations = operations_applied, "pass completed");
        Ok(report)
    }

    /// Structural pre-check: every top-level element must map to a known
    /// dispatch entry before anything is applied to the target.
    fn validate(&self, document: &DocumentElement) -> Result<(), ScriptError> {
        for element in &document.children {
            if self.registry.lookup(&element.name).is_none() {
                return Err(ScriptError::UnknownElement { element: element.name.clone() });
            }
        }
        Ok(())
    }

    /// Returns whether a target operation was applied (construction elements
    /// only bind variables).
    fn execute(
        &self,
        element: &DocumentElement,
        context: &mut ExecutionContext<'_>,
    ) -> Result<bool, ScriptError> {
        // Presence was checked during validation.
        let dispatch = self
            .registry
            .lookup(&element.name)
            .ok_or_else(|| ScriptError::UnknownElement { element: element.name.clone() })?
            .clone();

        debug!(element = %element.name, ?dispatch, "executing");

        match dispatch {
            Dispatch::Construct { type_name } => {
                let value =
                    self.registry
                        .build_instance(&type_name, element, context.variables())?;
                if let Some(name) = element.attribute(VARIABLE_ATTRIBUTE) {
                    context.bind(name, value);
                }
                Ok(false)
            }
            Dispatch::Call { method } => {
                let arguments =
                    self.registry
                        .call_arguments(&method, element, context.variables())?;
                let result = context
                    .target
                    .apply(&method, &arguments)
                    .map_err(|message| ScriptError::TargetFailure {
                        operation: method.clone(),
                        message,
                    })?;
                if let (Some(value), Some(name)) = (result, element.attribute(VARIABLE_ATTRIBUTE)) {
                    context.bind(name, value);
                }
                Ok(true)
            }
            Dispatch::Set { property } => {
                let value =
                    self.registry
                        .property_value(&property, element, context.variables())?;
                context
                    .target
                    .set(&property, value)
                    .map_err(|message| ScriptError::TargetFailure {
                        operation: property.clone(),
                        message,
                    })?;
                Ok(true)
            }
        }
    }
}
