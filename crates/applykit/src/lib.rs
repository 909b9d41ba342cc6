//! # Applykit
//!
//! Executes a compiled [`actionplan::Plan`] against a target platform and
//! undoes it on request.
//!
//! ## Core Concepts
//!
//! - **PlatformClient**: The side-effecting collaborator; one `execute` and
//!   one `rollback` per action type
//! - **ApplyEngine**: Dispatches ready actions to a bounded worker pool,
//!   retries transient failures and skips the dependents of failed actions
//! - **Journal**: Append-only JSON Lines log with a single writer; the basis
//!   for resume and rollback
//! - **RollbackCoordinator**: Replays a journal snapshot in reverse, calling
//!   compensating actions
//!
//! ## Example
//!
//! ```ignore
//! use applykit::{ApplyEngine, ApplyOptions, Journal, JournalSnapshot, NoInputs, NoProgress};
//!
//! let cursor = JournalSnapshot::load_run(&run_dir)?.resume_cursor();
//! let mut journal = Journal::open_in(&run_dir)?;
//! let options = ApplyOptions { jobs: 4, resume: cursor, ..Default::default() };
//! let report = ApplyEngine::new(&plan, client, options)
//!     .run(&mut journal, &mut NoInputs, &mut NoProgress)?;
//! report.save(&run_dir.join("apply-report.json"))?;
//! journal.archive()?;
//! ```
//!
//! ## Provider Traits
//!
//! - [`PlatformClient`] / [`ActionHandler`]: Performs and undoes actions
//! - [`InputResolver`]: Supplies human-provided parameters
//! - [`ApplyObserver`] / [`RollbackObserver`]: Receive progress updates

pub mod client;
pub mod error;
pub mod gate;
pub mod inputs;
pub mod journal;
pub mod retry;
pub mod rollback;
pub mod scheduler;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use client::{ActionHandler, ActionOutput, HandlerRegistry, PlatformClient, RollbackOutcome};
pub use error::{ActionError, Error, ErrorCategory, Result};
pub use gate::{CancelToken, RateGate};
pub use inputs::{InputResolver, NoInputs, StaticInputs};
pub use journal::{
    ARCHIVE_DIR, ExecutedActionRecord, JOURNAL_FILE, Journal, JournalSnapshot, REDACTED,
    RecordStatus,
};
pub use retry::{RetryPolicy, with_retry};
pub use rollback::{
    RollbackCoordinator, RollbackDetail, RollbackObserver, RollbackReport, RollbackState, Silent,
};
pub use scheduler::{
    ActionOutcome, ActionState, ApplyEngine, ApplyObserver, ApplyOptions, ApplyReport,
    DEPENDENCY_OUTPUTS, FollowUp, NoProgress, PhaseSummary, RunStatus,
};
