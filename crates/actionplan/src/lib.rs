//! # Actionplan
//!
//! Compiles a normalized description of a source repository into an ordered,
//! idempotent plan of actions against a target forge.
//!
//! ## Core Concepts
//!
//! - **SourceDocument**: What exists in the source system (repository, issues,
//!   releases, webhooks, ...), each entity with a stable source id
//! - **ComponentSelection**: Which parts of the source to migrate
//! - **Catalog**: The closed set of action types, their phase, reversibility
//!   and required parameters
//! - **Plan**: Topologically ordered actions with idempotency keys, phase
//!   groups and statistics
//!
//! ## Example
//!
//! ```
//! use actionplan::{SourceDocument, compile};
//!
//! let doc = SourceDocument::from_json(r#"{
//!     "source_id": "gitlab:acme/widgets",
//!     "repository": {"name": "widgets", "clone_url": "https://git.example/widgets.git"},
//!     "issues": [{"id": "1", "title": "Crash on start"}]
//! }"#)?;
//!
//! let plan = compile(&doc, None)?;
//! assert_eq!(plan.actions[0].id, "create_repository:widgets");
//! assert_eq!(plan.statistics.total_actions, 3);
//! # Ok::<(), actionplan::Error>(())
//! ```
//!
//! Compilation is deterministic: the same document and selection always
//! produce the same action ids, order and idempotency keys.

pub mod catalog;
pub mod compiler;
pub mod error;
pub mod idempotency;
pub mod model;
pub mod source;

// Re-export main types at crate root
pub use catalog::{ActionDescriptor, ActionType, Catalog, Phase};
pub use compiler::{CompileOptions, PlanCompiler, action_id, compile};
pub use error::{CompilationError, Error, Result, ValidationError};
pub use idempotency::{canonical_json, idempotency_key, parameter_fingerprint};
pub use model::{Action, PLAN_VERSION, Plan, PlanStatistics};
pub use source::{ComponentOptions, ComponentSelection, SourceDocument, Visibility};
