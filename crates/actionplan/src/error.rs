//! Error types for plan compilation.
//!
//! A [`ValidationError`] means the source document must be corrected. A
//! [`CompilationError`] means the assembled plan violated one of its
//! structural invariants. Both abort before anything is executed.

use crate::catalog::Phase;
use depgraph::GraphError;
use thiserror::Error;

/// Malformed compiler input or an action that fails catalog validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is empty or absent
    #[error("{entity}: missing required field `{field}`")]
    MissingField {
        /// Entity the field belongs to, e.g. `issue 42`
        entity: String,
        /// Field name
        field: String,
    },

    /// Two entities of the same class share an id
    #[error("duplicate {class} id `{id}`")]
    DuplicateEntity {
        /// Entity class, e.g. `label`
        class: String,
        /// The repeated id
        id: String,
    },

    /// An entity points at an id that does not exist in the document
    #[error("{entity} references unknown {class} `{reference}`")]
    UnknownReference {
        /// Referencing entity
        entity: String,
        /// Class the reference was resolved against
        class: String,
        /// The dangling id
        reference: String,
    },

    /// The component selection names a component that does not exist
    #[error("unknown component `{name}`")]
    UnknownComponent {
        /// Component name as given
        name: String,
    },

    /// The component selection sets a sub-option the component does not have
    #[error("unknown option `{option}` for component `{component}`")]
    UnknownComponentOption {
        /// Component name
        component: String,
        /// Option name as given
        option: String,
    },

    /// A component that every plan needs was disabled
    #[error("component `{name}` cannot be disabled")]
    RequiredComponentDisabled {
        /// Component name
        name: String,
    },

    /// An action does not match its catalog descriptor
    #[error("action `{action_id}` is invalid: {reason}")]
    InvalidAction {
        /// Offending action
        action_id: String,
        /// What did not match
        reason: String,
    },
}

/// Structural violation in an assembled or loaded plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompilationError {
    /// Dependency edges form a cycle
    #[error("dependency cycle: {}", cycle_path.join(" -> "))]
    CycleDetected {
        /// Action ids on the cycle, closed on the first id
        cycle_path: Vec<String>,
    },

    /// Two actions share an id
    #[error("duplicate action id `{action_id}`")]
    DuplicateActionId {
        /// The repeated id
        action_id: String,
    },

    /// Two actions share an idempotency key
    #[error("idempotency key `{key}` shared by `{first}` and `{second}`")]
    DuplicateIdempotencyKey {
        /// The repeated key
        key: String,
        /// First action carrying the key
        first: String,
        /// Second action carrying the key
        second: String,
    },

    /// An action type string is not part of the catalog
    #[error("unknown action type `{action_type}`")]
    UnknownActionType {
        /// The type string as found
        action_type: String,
    },

    /// A dependency id does not name an action of the plan
    #[error("action `{action_id}` depends on unknown action `{dependency}`")]
    UnknownDependency {
        /// Dependent action
        action_id: String,
        /// Missing dependency
        dependency: String,
    },

    /// An edge points from a later phase back to an earlier one
    #[error("action `{to}` ({to_phase}) cannot depend on `{from}` ({from_phase})")]
    InvalidPhaseEdge {
        /// Dependency action
        from: String,
        /// Phase of the dependency
        from_phase: Phase,
        /// Dependent action
        to: String,
        /// Phase of the dependent
        to_phase: Phase,
    },

    /// The action list is not a valid topological order
    #[error("action `{action_id}` is listed before its dependency `{dependency}`")]
    OrderViolation {
        /// Action listed too early
        action_id: String,
        /// Dependency listed after it
        dependency: String,
    },

    /// An action failed catalog validation
    #[error("action `{action_id}` is invalid: {reason}")]
    InvalidAction {
        /// Offending action
        action_id: String,
        /// What did not match
        reason: String,
    },
}

impl From<GraphError> for CompilationError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::CycleDetected { cycle_path } => Self::CycleDetected { cycle_path },
            GraphError::UnknownNode { node } => Self::UnknownDependency {
                action_id: String::new(),
                dependency: node,
            },
        }
    }
}

/// Any failure produced by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Source document is malformed
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Plan violates a structural invariant
    #[error("compilation error: {0}")]
    Compilation(#[from] CompilationError),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
