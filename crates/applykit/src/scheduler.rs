//! Apply engine - executes a plan with bounded concurrency
//!
//! The calling thread is the scheduler. It owns the ready queue, the action
//! states and the journal. Workers run on a rayon pool sized to the
//! concurrency limit; each one makes a single (retried) client call and
//! sends the result back over a channel. Nothing but the scheduler ever
//! writes the journal.
//!
//! Ready actions are dispatched in plan order. Completion order across
//! workers is not deterministic, so neither is the overall execution order
//! of independent actions.

use crate::client::{ActionOutput, PlatformClient};
use crate::error::{ActionError, Result};
use crate::gate::{CancelToken, RateGate};
use crate::inputs::{InputResolver, resolve_inputs};
use crate::journal::{ExecutedActionRecord, Journal, RecordStatus};
use crate::retry::{RetryCallback, RetryPolicy, with_retry};
use actionplan::{Action, ActionType, Phase, Plan};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

// ============================================================================
// States and report types
// ============================================================================

/// Lifecycle of one action within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Pending,
    Ready,
    Running,
    Done,
    Failed,
    SkippedDueToDependencyFailure,
    /// Required user input never arrived
    Blocked,
    /// Run was cancelled before the action was dispatched
    NotStarted,
}

impl ActionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Ready | Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::SkippedDueToDependencyFailure => "skipped_due_to_dependency_failure",
            Self::Blocked => "blocked",
            Self::NotStarted => "not_started",
        }
    }
}

/// Overall result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    /// A foundational action failed
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Per-action line of the apply report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action_id: String,
    pub action_type: ActionType,
    pub phase: Phase,
    pub state: ActionState,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Already done in an earlier run; not dispatched
    #[serde(default)]
    pub resumed: bool,
}

/// Pass/fail counts for one phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub done: usize,
    pub failed: usize,
    pub skipped: usize,
    pub blocked: usize,
    pub not_started: usize,
}

/// Something a human needs to look at after the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUp {
    pub action_id: String,
    pub reason: String,
}

/// Result of an apply run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub run_id: String,
    pub source_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One entry per plan action, in plan order
    pub outcomes: Vec<ActionOutcome>,
    pub phases: BTreeMap<Phase, PhaseSummary>,
    pub manual_follow_up: Vec<FollowUp>,
}

impl ApplyReport {
    /// Number of actions in a given state
    pub fn count(&self, state: ActionState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    pub fn outcome(&self, action_id: &str) -> Option<&ActionOutcome> {
        self.outcomes.iter().find(|o| o.action_id == action_id)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)? + "\n")?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

// ============================================================================
// Options and callbacks
// ============================================================================

/// Parameter under which a dispatched action receives the outputs of its
/// done dependencies, keyed by dependency action id
pub const DEPENDENCY_OUTPUTS: &str = "dependency_outputs";

/// Engine settings for one run
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Maximum actions running at once
    pub jobs: usize,
    pub retry: RetryPolicy,
    /// Idempotency keys already done in an earlier run
    pub resume: HashSet<String>,
    /// Outputs recorded by an earlier run, by action id
    pub prior_outputs: BTreeMap<String, BTreeMap<String, Value>>,
    pub cancel: CancelToken,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            retry: RetryPolicy::default(),
            resume: HashSet::new(),
            prior_outputs: BTreeMap::new(),
            cancel: CancelToken::new(),
        }
    }
}

/// Progress notifications, delivered on the scheduler thread
pub trait ApplyObserver: Send {
    fn on_start(&mut self, _total: usize, _resumed: usize) {}

    fn on_dispatch(&mut self, action: &Action);

    fn on_retry(&mut self, action_id: &str, attempt: u32, error: &ActionError, delay: Duration);

    fn on_complete(&mut self, outcome: &ActionOutcome);
}

/// No-op observer
pub struct NoProgress;

impl ApplyObserver for NoProgress {
    fn on_dispatch(&mut self, _action: &Action) {}
    fn on_retry(&mut self, _action_id: &str, _attempt: u32, _error: &ActionError, _delay: Duration) {
    }
    fn on_complete(&mut self, _outcome: &ActionOutcome) {}
}

// ============================================================================
// Engine
// ============================================================================

/// Message from a worker to the scheduler
enum WorkerEvent {
    Retry {
        idx: usize,
        attempt: u32,
        error: ActionError,
        delay: Duration,
    },
    Finished {
        idx: usize,
        result: std::result::Result<ActionOutput, ActionError>,
        attempts: u32,
        finished_at: DateTime<Utc>,
        elapsed: Duration,
    },
}

/// Forwards retry notifications from a worker to the scheduler
struct ChannelRetry {
    idx: usize,
    tx: Sender<WorkerEvent>,
}

impl RetryCallback for ChannelRetry {
    fn on_retry(&self, attempt: u32, _max_attempts: u32, error: &ActionError, delay: Duration) {
        let _ = self.tx.send(WorkerEvent::Retry {
            idx: self.idx,
            attempt,
            error: error.clone(),
            delay,
        });
    }
}

/// Executes one plan against one client
pub struct ApplyEngine<'a> {
    plan: &'a Plan,
    client: Arc<dyn PlatformClient>,
    options: ApplyOptions,
    gate: RateGate,
}

impl<'a> ApplyEngine<'a> {
    pub fn new(plan: &'a Plan, client: Arc<dyn PlatformClient>, options: ApplyOptions) -> Self {
        Self {
            plan,
            client,
            options,
            gate: RateGate::new(),
        }
    }

    /// Run the plan to completion, cancellation or the first journal error.
    ///
    /// Action failures never abort the run; they are reported per action.
    pub fn run(
        &self,
        journal: &mut Journal,
        resolver: &mut dyn InputResolver,
        observer: &mut dyn ApplyObserver,
    ) -> Result<ApplyReport> {
        self.plan.validate()?;
        let mut run = RunState::new(self.plan, &self.options.resume);
        run.outputs.clone_from(&self.options.prior_outputs);
        let jobs = self.options.jobs.max(1);
        let started_at = Utc::now();

        log::info!(
            "Applying plan {} ({} actions, {} already done, {} jobs)",
            self.plan.run_id,
            self.plan.actions.len(),
            run.resumed_count(),
            jobs
        );
        observer.on_start(self.plan.actions.len(), run.resumed_count());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .thread_name(|i| format!("apply-worker-{i}"))
            .build()?;
        let (tx, rx) = mpsc::channel::<WorkerEvent>();
        let mut in_flight = 0usize;

        loop {
            if !self.options.cancel.is_cancelled() {
                while in_flight < jobs && self.gate.is_open() {
                    let Some(idx) = run.ready.pop_first() else {
                        break;
                    };
                    if self.dispatch(idx, &mut run, resolver, observer, &pool, &tx) {
                        in_flight += 1;
                    }
                }
            }

            if in_flight == 0 {
                if run.ready.is_empty() || self.options.cancel.is_cancelled() {
                    break;
                }
                // Ready work is waiting on the rate gate
                if let Some(left) = self.gate.remaining() {
                    std::thread::sleep(left);
                }
                continue;
            }

            let event = match self.gate.remaining() {
                Some(left) => match rx.recv_timeout(left) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match rx.recv() {
                    Ok(event) => event,
                    Err(_) => break,
                },
            };

            match event {
                WorkerEvent::Retry {
                    idx,
                    attempt,
                    error,
                    delay,
                } => {
                    let action = &self.plan.actions[idx];
                    log::warn!(
                        "{} attempt {attempt} failed: {error}; retrying in {delay:?}",
                        action.id
                    );
                    observer.on_retry(&action.id, attempt, &error, delay);
                }
                WorkerEvent::Finished {
                    idx,
                    result,
                    attempts,
                    finished_at,
                    elapsed,
                } => {
                    in_flight -= 1;
                    self.complete(
                        idx,
                        result,
                        attempts,
                        finished_at,
                        elapsed,
                        &mut run,
                        journal,
                        observer,
                    )?;
                }
            }
        }

        let report = run.into_report(self.plan, started_at, self.options.cancel.is_cancelled());
        log::info!(
            "Run {} finished: {} ({} done, {} failed, {} skipped)",
            report.run_id,
            report.status.as_str(),
            report.count(ActionState::Done),
            report.count(ActionState::Failed),
            report.count(ActionState::SkippedDueToDependencyFailure)
        );
        Ok(report)
    }

    /// Hand one ready action to the pool. Returns false if it could not be
    /// dispatched (blocked on input).
    fn dispatch(
        &self,
        idx: usize,
        run: &mut RunState,
        resolver: &mut dyn InputResolver,
        observer: &mut dyn ApplyObserver,
        pool: &rayon::ThreadPool,
        tx: &Sender<WorkerEvent>,
    ) -> bool {
        let mut action = self.plan.actions[idx].clone();

        let missing = resolve_inputs(&mut action, resolver);
        if !missing.is_empty() {
            let error = format!("missing user input: {}", missing.join(", "));
            log::warn!("{} blocked: {error}", action.id);
            run.finish(idx, ActionState::Blocked, Some(error));
            observer.on_complete(&run.outcomes[idx]);
            self.skip_dependents(idx, run, observer);
            return false;
        }

        let upstream: Map<String, Value> = action
            .dependencies
            .iter()
            .filter_map(|dep| {
                let outputs = run.outputs.get(dep).filter(|o| !o.is_empty())?;
                let outputs: Map<String, Value> = outputs.clone().into_iter().collect();
                Some((dep.clone(), Value::Object(outputs)))
            })
            .collect();
        if !upstream.is_empty() {
            action
                .parameters
                .insert(DEPENDENCY_OUTPUTS.to_string(), Value::Object(upstream));
        }

        log::debug!("Dispatching {}", action.id);
        run.states[idx] = ActionState::Running;
        run.outcomes[idx].state = ActionState::Running;
        run.outcomes[idx].started_at = Some(Utc::now());
        observer.on_dispatch(&action);

        let client = Arc::clone(&self.client);
        let policy = self.options.retry.clone();
        let gate = self.gate.clone();
        let tx = tx.clone();
        run.executed.insert(idx, action.clone());

        pool.spawn(move || {
            let started = Instant::now();
            let callback = ChannelRetry { idx, tx: tx.clone() };
            let outcome = with_retry(&policy, &gate, Some(&callback), || client.execute(&action));
            let _ = tx.send(WorkerEvent::Finished {
                idx,
                result: outcome.result,
                attempts: outcome.attempts,
                finished_at: Utc::now(),
                elapsed: started.elapsed(),
            });
        });
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn complete(
        &self,
        idx: usize,
        result: std::result::Result<ActionOutput, ActionError>,
        attempts: u32,
        finished_at: DateTime<Utc>,
        elapsed: Duration,
        run: &mut RunState,
        journal: &mut Journal,
        observer: &mut dyn ApplyObserver,
    ) -> Result<()> {
        let action = run
            .executed
            .remove(&idx)
            .unwrap_or_else(|| self.plan.actions[idx].clone());

        let (state, mut record) = match result {
            Ok(output) => {
                let mut record =
                    ExecutedActionRecord::for_action(&self.plan.run_id, &action, RecordStatus::Done);
                run.outputs.insert(action.id.clone(), output.outputs.clone());
                record.outputs = output.outputs;
                record.rollback_data = output.rollback_data;
                (ActionState::Done, record)
            }
            Err(error) => {
                log::warn!("{} failed after {attempts} attempts: {error}", action.id);
                let mut record =
                    ExecutedActionRecord::for_action(&self.plan.run_id, &action, RecordStatus::Failed);
                record.error = Some(error.to_string());
                (ActionState::Failed, record)
            }
        };
        record.attempts = attempts;
        record.timestamp = finished_at;

        // Durable before any dependent is released
        journal.append(&record)?;

        let outcome = &mut run.outcomes[idx];
        outcome.attempts = attempts;
        outcome.finished_at = Some(finished_at);
        outcome.duration_ms = Some(elapsed.as_millis() as u64);
        run.finish(idx, state, record.error);
        observer.on_complete(&run.outcomes[idx]);

        match state {
            ActionState::Done => run.release_dependents(idx),
            _ => self.skip_dependents(idx, run, observer),
        }
        Ok(())
    }

    /// Mark every not-yet-started transitive dependent as skipped
    fn skip_dependents(&self, idx: usize, run: &mut RunState, observer: &mut dyn ApplyObserver) {
        let cause = &self.plan.actions[idx].id;
        let mut queue: VecDeque<usize> = run.dependents[idx].iter().copied().collect();
        let mut seen: HashSet<usize> = HashSet::new();

        while let Some(next) = queue.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            if matches!(run.states[next], ActionState::Pending | ActionState::Ready) {
                run.ready.remove(&next);
                run.finish(
                    next,
                    ActionState::SkippedDueToDependencyFailure,
                    Some(format!("dependency {cause} did not complete")),
                );
                log::debug!("Skipping {}", self.plan.actions[next].id);
                observer.on_complete(&run.outcomes[next]);
                queue.extend(run.dependents[next].iter().copied());
            }
        }
    }
}

/// Mutable bookkeeping owned by the scheduler thread
struct RunState {
    states: Vec<ActionState>,
    outcomes: Vec<ActionOutcome>,
    /// Unfinished dependency count per action
    waiting_on: Vec<usize>,
    dependents: Vec<Vec<usize>>,
    /// Ready actions by plan index, so dispatch follows plan order
    ready: BTreeSet<usize>,
    /// Actions in flight, with resolved inputs
    executed: HashMap<usize, Action>,
    /// Outputs of done actions, by action id
    outputs: BTreeMap<String, BTreeMap<String, Value>>,
}

impl RunState {
    fn new(plan: &Plan, resume: &HashSet<String>) -> Self {
        let index: HashMap<&str, usize> = plan
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id.as_str(), i))
            .collect();

        let n = plan.actions.len();
        let mut dependents = vec![Vec::new(); n];
        let mut states = vec![ActionState::Pending; n];
        let mut outcomes = Vec::with_capacity(n);

        for (i, action) in plan.actions.iter().enumerate() {
            for dep in &action.dependencies {
                if let Some(&d) = index.get(dep.as_str()) {
                    dependents[d].push(i);
                }
            }
            let resumed = resume.contains(&action.idempotency_key);
            if resumed {
                states[i] = ActionState::Done;
            }
            outcomes.push(ActionOutcome {
                action_id: action.id.clone(),
                action_type: action.action_type,
                phase: action.phase,
                state: states[i],
                attempts: 0,
                error: None,
                started_at: None,
                finished_at: None,
                duration_ms: None,
                resumed,
            });
        }

        let mut waiting_on = vec![0; n];
        let mut ready = BTreeSet::new();
        for (i, action) in plan.actions.iter().enumerate() {
            waiting_on[i] = action
                .dependencies
                .iter()
                .filter_map(|d| index.get(d.as_str()))
                .filter(|&&d| states[d] != ActionState::Done)
                .count();
            if states[i] == ActionState::Pending && waiting_on[i] == 0 {
                states[i] = ActionState::Ready;
                outcomes[i].state = ActionState::Ready;
                ready.insert(i);
            }
        }

        Self {
            states,
            outcomes,
            waiting_on,
            dependents,
            ready,
            executed: HashMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    fn resumed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.resumed).count()
    }

    fn finish(&mut self, idx: usize, state: ActionState, error: Option<String>) {
        self.states[idx] = state;
        self.outcomes[idx].state = state;
        if error.is_some() {
            self.outcomes[idx].error = error;
        }
    }

    fn release_dependents(&mut self, idx: usize) {
        for &next in &self.dependents[idx] {
            self.waiting_on[next] = self.waiting_on[next].saturating_sub(1);
            if self.waiting_on[next] == 0 && self.states[next] == ActionState::Pending {
                self.states[next] = ActionState::Ready;
                self.outcomes[next].state = ActionState::Ready;
                self.ready.insert(next);
            }
        }
    }

    fn into_report(mut self, plan: &Plan, started_at: DateTime<Utc>, cancelled: bool) -> ApplyReport {
        for (i, state) in self.states.iter_mut().enumerate() {
            if !state.is_terminal() {
                *state = ActionState::NotStarted;
                self.outcomes[i].state = ActionState::NotStarted;
            }
        }

        let mut phases: BTreeMap<Phase, PhaseSummary> = BTreeMap::new();
        let mut follow_up = Vec::new();
        for (outcome, action) in self.outcomes.iter().zip(&plan.actions) {
            let summary = phases.entry(outcome.phase).or_default();
            let reason = match outcome.state {
                ActionState::Done => {
                    summary.done += 1;
                    (!action.reversible)
                        .then(|| "done; cannot be rolled back automatically".to_string())
                }
                ActionState::Failed => {
                    summary.failed += 1;
                    Some(format!(
                        "failed: {}",
                        outcome.error.as_deref().unwrap_or("unknown error")
                    ))
                }
                ActionState::SkippedDueToDependencyFailure => {
                    summary.skipped += 1;
                    Some("skipped: a dependency did not complete".to_string())
                }
                ActionState::Blocked => {
                    summary.blocked += 1;
                    Some(
                        outcome
                            .error
                            .clone()
                            .unwrap_or_else(|| "blocked on user input".to_string()),
                    )
                }
                _ => {
                    summary.not_started += 1;
                    None
                }
            };
            if let Some(reason) = reason {
                follow_up.push(FollowUp {
                    action_id: outcome.action_id.clone(),
                    reason,
                });
            }
        }

        let foundational: HashSet<&str> = plan.foundational_actions().into_iter().collect();
        let state_of = |pred: fn(ActionState) -> bool| self.states.iter().any(|s| pred(*s));

        let status = if self
            .outcomes
            .iter()
            .any(|o| o.state == ActionState::Failed && foundational.contains(o.action_id.as_str()))
        {
            RunStatus::Failed
        } else if cancelled && state_of(|s| s == ActionState::NotStarted) {
            RunStatus::Cancelled
        } else if state_of(|s| {
            matches!(
                s,
                ActionState::Failed
                    | ActionState::SkippedDueToDependencyFailure
                    | ActionState::Blocked
                    | ActionState::NotStarted
            )
        }) {
            RunStatus::Partial
        } else {
            RunStatus::Success
        };

        ApplyReport {
            run_id: plan.run_id.clone(),
            source_id: plan.source_id.clone(),
            status,
            started_at,
            finished_at: Utc::now(),
            outcomes: self.outcomes,
            phases,
            manual_follow_up: follow_up,
        }
    }
}
