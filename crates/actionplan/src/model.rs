//! Plan data model
//!
//! A [`Plan`] is produced by the compiler and is immutable afterwards: the
//! apply engine and rollback coordinator only ever read it.

use crate::catalog::{ActionType, Catalog, Phase};
use crate::error::{CompilationError, Result};
use chrono::{DateTime, Utc};
use depgraph::DependencyGraph;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

/// Plan format version written by this crate
pub const PLAN_VERSION: &str = "1.0";

/// One atomic unit of planned work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Stable id, `{action_type}:{entity_id}`
    pub id: String,
    pub action_type: ActionType,
    /// Deterministic fingerprint of the action's effect
    pub idempotency_key: String,
    pub description: String,
    pub phase: Phase,
    /// Ids of actions that must be DONE before this one is dispatched
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub requires_user_input: bool,
    /// Parameters that must be supplied before dispatch
    #[serde(default)]
    pub user_input_fields: Vec<String>,
    pub reversible: bool,
}

impl Action {
    /// Get a string parameter
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).and_then(Value::as_str)
    }

    /// User input fields whose parameter is still missing or null
    pub fn unresolved_inputs(&self) -> Vec<&str> {
        self.user_input_fields
            .iter()
            .filter(|f| self.parameters.get(*f).is_none_or(Value::is_null))
            .map(String::as_str)
            .collect()
    }
}

/// Aggregate counts over a plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStatistics {
    pub total_actions: usize,
    pub actions_by_type: BTreeMap<ActionType, usize>,
    pub actions_by_phase: BTreeMap<Phase, usize>,
    pub actions_requiring_user_input: usize,
    pub total_dependencies: usize,
}

impl PlanStatistics {
    /// Compute statistics for an action list
    pub fn from_actions(actions: &[Action]) -> Self {
        let mut stats = Self {
            total_actions: actions.len(),
            ..Default::default()
        };
        for action in actions {
            *stats.actions_by_type.entry(action.action_type).or_default() += 1;
            *stats.actions_by_phase.entry(action.phase).or_default() += 1;
            if action.requires_user_input {
                stats.actions_requiring_user_input += 1;
            }
            stats.total_dependencies += action.dependencies.len();
        }
        stats
    }
}

/// A validated, topologically ordered action plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub version: String,
    pub source_id: String,
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    /// Actions in a valid topological order
    pub actions: Vec<Action>,
    /// Action ids grouped by phase, each list in plan order
    pub phases: BTreeMap<Phase, Vec<String>>,
    pub statistics: PlanStatistics,
}

impl Plan {
    /// Assemble a plan from already ordered actions, deriving phases and statistics
    pub(crate) fn assemble(
        source_id: String,
        run_id: String,
        generated_at: DateTime<Utc>,
        actions: Vec<Action>,
    ) -> Self {
        let mut phases: BTreeMap<Phase, Vec<String>> = BTreeMap::new();
        for action in &actions {
            phases.entry(action.phase).or_default().push(action.id.clone());
        }
        let statistics = PlanStatistics::from_actions(&actions);

        Self {
            version: PLAN_VERSION.to_string(),
            source_id,
            run_id,
            generated_at,
            actions,
            phases,
            statistics,
        }
    }

    /// Build a plan from actions already in dependency order, then validate it
    pub fn from_actions(
        source_id: impl Into<String>,
        run_id: impl Into<String>,
        generated_at: DateTime<Utc>,
        actions: Vec<Action>,
    ) -> std::result::Result<Self, CompilationError> {
        let plan = Self::assemble(source_id.into(), run_id.into(), generated_at, actions);
        plan.validate()?;
        Ok(plan)
    }

    /// Find an action by id
    pub fn action(&self, id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }

    /// Action ids that have no dependencies in the plan's earliest phase
    pub fn foundational_actions(&self) -> Vec<&str> {
        let Some(first) = self.actions.iter().map(|a| a.phase).min() else {
            return Vec::new();
        };
        self.actions
            .iter()
            .filter(|a| a.phase == first && a.dependencies.is_empty())
            .map(|a| a.id.as_str())
            .collect()
    }

    /// Hash over the ordered idempotency keys.
    ///
    /// Two plans with the same fingerprint describe the same work in the same
    /// order, regardless of run id or generation time.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for action in &self.actions {
            hasher.update(action.id.as_bytes());
            hasher.update(b"\0");
            hasher.update(action.idempotency_key.as_bytes());
            hasher.update(b"\n");
        }
        hasher.finalize().to_hex()[..32].to_string()
    }

    /// Build the dependency graph over this plan's actions
    pub fn dependency_graph(&self) -> std::result::Result<DependencyGraph<String>, CompilationError> {
        build_graph(&self.actions)
    }

    /// Re-check every structural invariant.
    ///
    /// Runs after compilation and again whenever a plan is loaded from disk.
    pub fn validate(&self) -> std::result::Result<(), CompilationError> {
        validate_actions(&self.actions)?;

        // The stored order must itself be topological
        let mut seen: HashSet<&str> = HashSet::new();
        for action in &self.actions {
            for dep in &action.dependencies {
                if !seen.contains(dep.as_str()) {
                    return Err(CompilationError::OrderViolation {
                        action_id: action.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            seen.insert(action.id.as_str());
        }

        Ok(())
    }

    /// Serialize as pretty JSON with stable key order
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a plan and validate it.
    ///
    /// Action type strings are checked before typed decoding so an unknown
    /// type surfaces as [`CompilationError::UnknownActionType`].
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(json)?;
        if let Some(actions) = raw.get("actions").and_then(Value::as_array) {
            for action in actions {
                if let Some(ty) = action.get("action_type").and_then(Value::as_str) {
                    ty.parse::<ActionType>()?;
                }
            }
        }

        let plan: Self = serde_json::from_value(raw)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Load and validate a plan file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Write the plan as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json_pretty()? + "\n")?;
        Ok(())
    }
}

/// Build a graph with one node per action and one edge per dependency
pub(crate) fn build_graph(
    actions: &[Action],
) -> std::result::Result<DependencyGraph<String>, CompilationError> {
    let mut graph = DependencyGraph::new();
    for action in actions {
        if !graph.add_node(action.id.clone()) {
            return Err(CompilationError::DuplicateActionId {
                action_id: action.id.clone(),
            });
        }
    }
    for action in actions {
        for dep in &action.dependencies {
            if !graph.contains(dep) {
                return Err(CompilationError::UnknownDependency {
                    action_id: action.id.clone(),
                    dependency: dep.clone(),
                });
            }
            graph.add_edge(dep, &action.id)?;
        }
    }
    Ok(graph)
}

/// Structural checks shared by the compiler and plan loading
pub(crate) fn validate_actions(actions: &[Action]) -> std::result::Result<(), CompilationError> {
    let mut keys: HashMap<&str, &str> = HashMap::new();
    for action in actions {
        if let Some(first) = keys.insert(&action.idempotency_key, &action.id) {
            return Err(CompilationError::DuplicateIdempotencyKey {
                key: action.idempotency_key.clone(),
                first: first.to_string(),
                second: action.id.clone(),
            });
        }

        Catalog::validate(action).map_err(|e| CompilationError::InvalidAction {
            action_id: action.id.clone(),
            reason: e.to_string(),
        })?;
    }

    let graph = build_graph(actions)?;

    let phases: HashMap<&str, Phase> = actions.iter().map(|a| (a.id.as_str(), a.phase)).collect();
    for action in actions {
        for dep in &action.dependencies {
            let dep_phase = phases[dep.as_str()];
            if dep_phase > action.phase {
                return Err(CompilationError::InvalidPhaseEdge {
                    from: dep.clone(),
                    from_phase: dep_phase,
                    to: action.id.clone(),
                    to_phase: action.phase,
                });
            }
        }
    }

    graph.detect_cycle()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;

    fn action(id: &str, ty: ActionType, deps: &[&str], params: Value) -> Action {
        Action {
            id: id.to_string(),
            action_type: ty,
            idempotency_key: format!("key-{id}"),
            description: id.to_string(),
            phase: ty.phase(),
            dependencies: deps.iter().map(ToString::to_string).collect(),
            parameters: serde_json::from_value(params).unwrap(),
            requires_user_input: false,
            user_input_fields: Vec::new(),
            reversible: ty.is_reversible(),
        }
    }

    fn sample_actions() -> Vec<Action> {
        vec![
            action(
                "create_repository:demo",
                ActionType::CreateRepository,
                &[],
                json!({"name": "demo", "visibility": "private"}),
            ),
            action(
                "create_label:bug",
                ActionType::CreateLabel,
                &["create_repository:demo"],
                json!({"name": "bug", "color": "ff0000"}),
            ),
        ]
    }

    fn sample_plan() -> Plan {
        Plan::assemble(
            "src".into(),
            "run-1".into(),
            Utc::now(),
            sample_actions(),
        )
    }

    #[test]
    fn test_assemble_derives_phases_and_statistics() {
        let plan = sample_plan();
        assert_eq!(plan.statistics.total_actions, 2);
        assert_eq!(plan.statistics.total_dependencies, 1);
        assert_eq!(plan.phases[&Phase::Setup], vec!["create_repository:demo"]);
        assert_eq!(
            plan.statistics.actions_by_type[&ActionType::CreateLabel],
            1
        );
        assert_eq!(plan.foundational_actions(), vec!["create_repository:demo"]);
    }

    #[test]
    fn test_validate_accepts_sample() {
        assert!(sample_plan().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_order_violation() {
        let mut plan = sample_plan();
        plan.actions.reverse();
        assert!(matches!(
            plan.validate(),
            Err(CompilationError::OrderViolation { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_backward_phase_edge() {
        let mut actions = sample_actions();
        actions[0].dependencies.push("create_label:bug".into());
        let err = validate_actions(&actions).unwrap_err();
        assert!(matches!(err, CompilationError::InvalidPhaseEdge { .. }));
    }

    #[test]
    fn test_validate_rejects_duplicate_key() {
        let mut actions = sample_actions();
        actions[1].idempotency_key = actions[0].idempotency_key.clone();
        assert!(matches!(
            validate_actions(&actions),
            Err(CompilationError::DuplicateIdempotencyKey { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_dependency() {
        let mut actions = sample_actions();
        actions[1].dependencies.push("create_issue:404".into());
        assert!(matches!(
            validate_actions(&actions),
            Err(CompilationError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_json_round_trip_keeps_order() {
        let plan = sample_plan();
        let json = plan.to_json_pretty().unwrap();
        let loaded = Plan::from_json(&json).unwrap();
        assert_eq!(loaded, plan);
        assert!(json.contains("\"setup\""));
    }

    #[test]
    fn test_from_json_unknown_action_type() {
        let mut value = serde_json::to_value(sample_plan()).unwrap();
        value["actions"][1]["action_type"] = json!("delete_everything");
        let err = Plan::from_json(&value.to_string()).unwrap_err();
        assert!(matches!(
            err,
            Error::Compilation(CompilationError::UnknownActionType { .. })
        ));
    }

    #[test]
    fn test_fingerprint_ignores_run_header() {
        let a = sample_plan();
        let mut b = sample_plan();
        b.run_id = "other".into();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("plan.json");
        let plan = sample_plan();
        plan.save(&path).unwrap();
        assert_eq!(Plan::load(&path).unwrap(), plan);
    }

    #[test]
    fn test_unresolved_inputs() {
        let mut a = action(
            "add_collaborator:ann",
            ActionType::AddCollaborator,
            &[],
            json!({"username": null, "permission": "push"}),
        );
        a.requires_user_input = true;
        a.user_input_fields = vec!["username".into()];
        assert_eq!(a.unresolved_inputs(), vec!["username"]);
        a.parameters.insert("username".into(), json!("ann-gh"));
        assert!(a.unresolved_inputs().is_empty());
    }
}
