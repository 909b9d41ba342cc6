//! In-memory fakes shared by the engine's tests.

use crate::client::{ActionOutput, PlatformClient, RollbackOutcome};
use crate::error::ActionError;
use crate::journal::ExecutedActionRecord;
use actionplan::{Action, ActionType, Plan};
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Client that succeeds unless told otherwise and records what it saw
#[derive(Default)]
pub struct FakeClient {
    /// Scripted execute results per action id, consumed front to back
    scripts: Mutex<HashMap<String, VecDeque<Result<ActionOutput, ActionError>>>>,
    /// Scripted rollback results per action id
    rollbacks: Mutex<HashMap<String, Result<RollbackOutcome, ActionError>>>,
    pub executed: Mutex<Vec<String>>,
    pub rolled_back: Mutex<Vec<String>>,
    running: AtomicUsize,
    pub max_running: AtomicUsize,
    pub delay: Duration,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn script(&self, action_id: &str, result: Result<ActionOutput, ActionError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(action_id.to_string())
            .or_default()
            .push_back(result);
    }

    /// Make every execute of `action_id` fail with `error`
    pub fn always_fail(&self, action_id: &str, error: &ActionError) {
        for _ in 0..16 {
            self.script(action_id, Err(error.clone()));
        }
    }

    pub fn script_rollback(&self, action_id: &str, result: Result<RollbackOutcome, ActionError>) {
        self.rollbacks
            .lock()
            .unwrap()
            .insert(action_id.to_string(), result);
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn rolled_back(&self) -> Vec<String> {
        self.rolled_back.lock().unwrap().clone()
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

impl PlatformClient for FakeClient {
    fn execute(&self, action: &Action) -> Result<ActionOutput, ActionError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.executed.lock().unwrap().push(action.id.clone());

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&action.id)
            .and_then(VecDeque::pop_front);
        self.running.fetch_sub(1, Ordering::SeqCst);

        scripted.unwrap_or_else(|| {
            Ok(ActionOutput::default()
                .with_output("id", action.id.clone())
                .with_rollback_data(json!({"id": action.id})))
        })
    }

    fn rollback(&self, record: &ExecutedActionRecord) -> Result<RollbackOutcome, ActionError> {
        self.rolled_back
            .lock()
            .unwrap()
            .push(record.action_id.clone());
        self.rollbacks
            .lock()
            .unwrap()
            .get(&record.action_id)
            .cloned()
            .unwrap_or(Ok(RollbackOutcome::Removed))
    }
}

/// Build a catalog-valid action
pub fn action(action_type: ActionType, entity: &str, deps: &[&str]) -> Action {
    let parameters: Value = match action_type {
        ActionType::CreateRepository => json!({"name": entity, "visibility": "private"}),
        ActionType::PushContent => json!({"clone_url": "https://x/y.git", "default_branch": "main"}),
        ActionType::CreateLabel => json!({"name": entity, "color": "ededed"}),
        ActionType::CreateIssue => json!({"title": entity}),
        ActionType::SetSecret => json!({"name": entity, "value": null}),
        _ => json!({"name": entity}),
    };
    let user_input_fields = if action_type == ActionType::SetSecret {
        vec!["value".to_string()]
    } else {
        Vec::new()
    };
    Action {
        id: format!("{action_type}:{entity}"),
        action_type,
        idempotency_key: format!("key-{action_type}-{entity}"),
        description: format!("{action_type} {entity}"),
        phase: action_type.phase(),
        dependencies: deps.iter().map(ToString::to_string).collect(),
        parameters: serde_json::from_value(parameters).unwrap(),
        requires_user_input: !user_input_fields.is_empty(),
        user_input_fields,
        reversible: action_type.is_reversible(),
    }
}

pub fn plan(actions: Vec<Action>) -> Plan {
    Plan::from_actions("test:source", "run-test", Utc::now(), actions).unwrap()
}
