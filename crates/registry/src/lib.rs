//! Operation registry: the catalog of everything the model may invoke
//!
//! Each entry declares a name, a description shown to the model, a typed
//! parameter schema, an approval flag for sensitive operations, and the
//! handler that performs the actual platform call. The catalog is built once
//! at startup and read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub mod schema;

pub use schema::{ParamKind, ParamSchema, ParamSpec};

/// Failure raised by an operation handler.
///
/// Handlers must not leak arbitrary errors across this boundary; anything
/// unexpected is wrapped into `Upstream` with the original message attached.
#[derive(Error, Debug)]
pub enum OperationError {
    #[error("invalid arguments: {0}")]
    Validation(String),

    #[error("upstream call failed: {0}")]
    Upstream(#[from] anyhow::Error),

    #[error("not found: {0}")]
    NotFound(String),
}

impl OperationError {
    pub fn upstream(message: impl Into<String>) -> Self {
        OperationError::Upstream(anyhow::anyhow!(message.into()))
    }

    /// Stable machine-readable kind, used when folding failures into a
    /// tool-result turn
    pub fn kind(&self) -> &'static str {
        match self {
            OperationError::Validation(_) => "validation_error",
            OperationError::Upstream(_) => "upstream_error",
            OperationError::NotFound(_) => "not_found",
        }
    }
}

/// Errors in catalog construction
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("duplicate operation name: {0}")]
    Duplicate(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// The side of an operation that touches the platform.
///
/// Handlers receive schema-validated arguments and return a JSON-serializable
/// result. Internal multi-step fan-out (resolve an id, then query with it) is
/// the handler's own business; the registry and executor treat it as opaque.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn call(&self, args: Value) -> std::result::Result<Value, OperationError>;
}

/// A named, schema-described, invocable action available to the model
pub struct Operation {
    name: String,
    description: String,
    schema: ParamSchema,
    requires_approval: bool,
    handler: Arc<dyn OperationHandler>,
}

impl Operation {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: ParamSchema,
        handler: Arc<dyn OperationHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            requires_approval: false,
            handler,
        }
    }

    /// Mark this operation as requiring human confirmation before execution
    pub fn with_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn schema(&self) -> &ParamSchema {
        &self.schema
    }

    pub fn requires_approval(&self) -> bool {
        self.requires_approval
    }

    pub fn handler(&self) -> Arc<dyn OperationHandler> {
        Arc::clone(&self.handler)
    }

    /// Handler-free advertisement of this operation
    pub fn spec(&self) -> OperationSpec {
        OperationSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.schema.to_json_schema(),
            requires_approval: self.requires_approval,
        }
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("requires_approval", &self.requires_approval)
            .finish_non_exhaustive()
    }
}

/// What `Registry::list` exposes: everything about an operation except its
/// handler
#[derive(Debug, Clone, Serialize)]
pub struct OperationSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub requires_approval: bool,
}

/// Operation catalog, keyed by name, iterated in registration order
#[derive(Default)]
pub struct Registry {
    operations: HashMap<String, Arc<Operation>>,
    order: Vec<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operation to the catalog.
    ///
    /// Duplicate names are a startup error, not a call-time surprise.
    pub fn register(&mut self, operation: Operation) -> Result<()> {
        let name = operation.name().to_string();
        if self.operations.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        debug!("registered operation: {}", name);
        self.order.push(name.clone());
        self.operations.insert(name, Arc::new(operation));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Operation>> {
        self.operations.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// Handler-free specs, in registration order
    pub fn list(&self) -> Vec<OperationSpec> {
        self.order
            .iter()
            .filter_map(|name| self.operations.get(name))
            .map(|op| op.spec())
            .collect()
    }

    /// Valid operation names, in registration order
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
