//! Platform client seam
//!
//! The engine never talks to a forge directly. Everything that has side
//! effects goes through [`PlatformClient`]; [`HandlerRegistry`] builds one
//! out of per-action-type handlers.

use crate::error::ActionError;
use crate::journal::ExecutedActionRecord;
use actionplan::{Action, ActionType, Catalog};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// What a successful `execute` returns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutput {
    /// Values later actions or humans may need (created ids, URLs)
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    /// Opaque data handed back to `rollback`
    #[serde(default)]
    pub rollback_data: Value,
}

impl ActionOutput {
    pub fn with_output(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.outputs.insert(key.to_string(), value.into());
        self
    }

    pub fn with_rollback_data(mut self, data: Value) -> Self {
        self.rollback_data = data;
        self
    }
}

/// How a compensating call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackOutcome {
    Removed,
    /// The resource was already gone; counts as success
    AlreadyAbsent,
}

/// The external collaborator that performs actions on the target platform.
///
/// Implementations are shared across worker threads.
pub trait PlatformClient: Send + Sync {
    /// Perform one action
    fn execute(&self, action: &Action) -> Result<ActionOutput, ActionError>;

    /// Undo a previously executed action
    fn rollback(&self, record: &ExecutedActionRecord) -> Result<RollbackOutcome, ActionError>;
}

/// Execute/rollback pair for one action type
pub trait ActionHandler: Send + Sync {
    /// Extra checks beyond the catalog's required parameters
    fn validate(&self, _action: &Action) -> Result<(), ActionError> {
        Ok(())
    }

    fn execute(&self, action: &Action) -> Result<ActionOutput, ActionError>;

    fn rollback(&self, record: &ExecutedActionRecord) -> Result<RollbackOutcome, ActionError> {
        Err(ActionError::Unsupported {
            action_type: record.action_type.to_string(),
        })
    }
}

/// Client assembled from handlers keyed by action type.
///
/// Types without a handler fail with [`ActionError::Unsupported`], which is
/// never retried.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<ActionType, Box<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the type
    pub fn register(&mut self, action_type: ActionType, handler: Box<dyn ActionHandler>) {
        self.handlers.insert(action_type, handler);
    }

    pub fn with(mut self, action_type: ActionType, handler: impl ActionHandler + 'static) -> Self {
        self.register(action_type, Box::new(handler));
        self
    }

    pub fn handles(&self, action_type: ActionType) -> bool {
        self.handlers.contains_key(&action_type)
    }

    /// Catalog types with no registered handler
    pub fn missing(&self) -> Vec<ActionType> {
        ActionType::ALL
            .into_iter()
            .filter(|t| !self.handles(*t))
            .collect()
    }

    fn handler(&self, action_type: ActionType) -> Result<&dyn ActionHandler, ActionError> {
        self.handlers
            .get(&action_type)
            .map(AsRef::as_ref)
            .ok_or_else(|| ActionError::Unsupported {
                action_type: action_type.to_string(),
            })
    }
}

impl PlatformClient for HandlerRegistry {
    fn execute(&self, action: &Action) -> Result<ActionOutput, ActionError> {
        let handler = self.handler(action.action_type)?;
        Catalog::validate(action).map_err(|e| ActionError::rejected(e.to_string()))?;
        handler.validate(action)?;
        handler.execute(action)
    }

    fn rollback(&self, record: &ExecutedActionRecord) -> Result<RollbackOutcome, ActionError> {
        self.handler(record.action_type)?.rollback(record)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.handlers.keys().map(|t| t.as_str()).collect();
        types.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &types)
            .finish()
    }
}
