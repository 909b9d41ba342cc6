//! Side-effect free client for rehearsing a plan.

use actionplan::{Action, ActionType};
use applykit::{
    ActionError, ActionHandler, ActionOutput, ExecutedActionRecord, HandlerRegistry,
    RollbackOutcome,
};
use serde_json::json;

/// Accepts every action and reports a synthetic result
struct Rehearsal;

impl ActionHandler for Rehearsal {
    fn validate(&self, action: &Action) -> Result<(), ActionError> {
        let unresolved = action.unresolved_inputs();
        if unresolved.is_empty() {
            Ok(())
        } else {
            Err(ActionError::rejected(format!(
                "unresolved inputs: {}",
                unresolved.join(", ")
            )))
        }
    }

    fn execute(&self, action: &Action) -> Result<ActionOutput, ActionError> {
        log::info!("[dry-run] {}", action.description);
        Ok(ActionOutput::default()
            .with_output("dry_run", true)
            .with_rollback_data(json!({ "action_id": action.id })))
    }

    fn rollback(&self, record: &ExecutedActionRecord) -> Result<RollbackOutcome, ActionError> {
        log::info!("[dry-run] undo {}", record.action_id);
        Ok(RollbackOutcome::Removed)
    }
}

/// A registry with the rehearsal handler behind every catalog type
pub fn rehearsal_registry() -> HandlerRegistry {
    ActionType::ALL
        .into_iter()
        .fold(HandlerRegistry::new(), |registry, ty| {
            registry.with(ty, Rehearsal)
        })
}
