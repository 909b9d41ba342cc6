//! Resolution of human-supplied parameters.

use actionplan::Action;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Supplies values for an action's `user_input_fields` before dispatch.
///
/// Returning `None` leaves the field unresolved and the action blocked.
pub trait InputResolver: Send {
    fn resolve(&mut self, action: &Action, field: &str) -> Option<Value>;
}

/// Resolver that never supplies anything
pub struct NoInputs;

impl InputResolver for NoInputs {
    fn resolve(&mut self, _action: &Action, _field: &str) -> Option<Value> {
        None
    }
}

/// Values keyed by action id, then field name.
///
/// Deserializes from `{"set_secret:TOKEN": {"value": "..."}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticInputs(pub BTreeMap<String, BTreeMap<String, Value>>);

impl StaticInputs {
    pub fn set(&mut self, action_id: &str, field: &str, value: impl Into<Value>) {
        self.0
            .entry(action_id.to_string())
            .or_default()
            .insert(field.to_string(), value.into());
    }
}

impl InputResolver for StaticInputs {
    fn resolve(&mut self, action: &Action, field: &str) -> Option<Value> {
        self.0
            .get(&action.id)
            .and_then(|fields| fields.get(field))
            .filter(|v| !v.is_null())
            .cloned()
    }
}

/// Fill every unresolved input of `action`.
///
/// Returns the names of fields that are still missing.
pub fn resolve_inputs(action: &mut Action, resolver: &mut dyn InputResolver) -> Vec<String> {
    let pending: Vec<String> = action
        .unresolved_inputs()
        .into_iter()
        .map(ToString::to_string)
        .collect();

    let mut missing = Vec::new();
    for field in pending {
        match resolver.resolve(action, &field) {
            Some(value) => {
                action.parameters.insert(field, value);
            }
            None => missing.push(field),
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use actionplan::ActionType;
    use serde_json::json;

    fn secret() -> Action {
        Action {
            id: "set_secret:TOKEN".into(),
            action_type: ActionType::SetSecret,
            idempotency_key: "k".into(),
            description: "secret".into(),
            phase: ActionType::SetSecret.phase(),
            dependencies: vec![],
            parameters: serde_json::from_value(json!({"name": "TOKEN", "value": null})).unwrap(),
            requires_user_input: true,
            user_input_fields: vec!["value".into()],
            reversible: true,
        }
    }

    #[test]
    fn test_no_inputs_leaves_missing() {
        let mut action = secret();
        assert_eq!(resolve_inputs(&mut action, &mut NoInputs), vec!["value"]);
    }

    #[test]
    fn test_static_inputs_fill_parameters() {
        let mut inputs: StaticInputs =
            serde_json::from_value(json!({"set_secret:TOKEN": {"value": "s3cr3t"}})).unwrap();
        let mut action = secret();
        assert!(resolve_inputs(&mut action, &mut inputs).is_empty());
        assert_eq!(action.param_str("value"), Some("s3cr3t"));
        assert!(action.unresolved_inputs().is_empty());
    }

    #[test]
    fn test_null_input_does_not_count() {
        let mut inputs = StaticInputs::default();
        inputs.set("set_secret:TOKEN", "value", Value::Null);
        let mut action = secret();
        assert_eq!(resolve_inputs(&mut action, &mut inputs), vec!["value"]);
    }
}
