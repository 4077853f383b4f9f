use crate::types::{Diagnostic, Dynamic};

#[derive(Debug, Clone)]
pub struct PlanModifyRequest {
    pub state: Dynamic,
    pub plan: Dynamic,
    pub config: Dynamic,
    pub attribute_path: String,
}

#[derive(Debug, Clone)]
pub struct PlanModifyResponse {
    pub plan_value: Dynamic,
    pub requires_replace: bool,
    pub diagnostics: Vec<Diagnostic>,
}

/// Trait for modifying terraform plan behavior
///
/// Plan modifiers run after the proposed new state has been computed and can:
/// - Modify the planned value
/// - Mark an attribute as requiring replacement
/// - Add warnings or errors to the plan
pub trait PlanModifier: Send + Sync {
    fn description(&self) -> String;

    fn modify_plan(&self, request: PlanModifyRequest) -> PlanModifyResponse;
}

/// Marks an attribute as requiring replacement when it changes
pub struct RequiresReplaceIfChanged;

impl PlanModifier for RequiresReplaceIfChanged {
    fn description(&self) -> String {
        "changing this attribute forces the resource to be replaced".to_string()
    }

    fn modify_plan(&self, request: PlanModifyRequest) -> PlanModifyResponse {
        let requires_replace = !matches!(
            (&request.state, &request.plan),
            (Dynamic::Null, Dynamic::Null) | (Dynamic::Unknown, _) | (_, Dynamic::Unknown)
        ) && !values_equal(&request.state, &request.plan);

        PlanModifyResponse {
            plan_value: request.plan,
            requires_replace,
            diagnostics: vec![],
        }
    }
}

/// Uses the current state value when the planned value is unknown
///
/// Keeps computed attributes such as `id` stable in plans that do not
/// recreate the resource.
pub struct UseStateForUnknown;

impl PlanModifier for UseStateForUnknown {
    fn description(&self) -> String {
        "once set, the value of this attribute in state will not change".to_string()
    }

    fn modify_plan(&self, request: PlanModifyRequest) -> PlanModifyResponse {
        let plan_value = match (&request.plan, &request.state) {
            (Dynamic::Unknown, Dynamic::Null) => request.plan,
            (Dynamic::Unknown, state) => state.clone(),
            _ => request.plan,
        };

        PlanModifyResponse {
            plan_value,
            requires_replace: false,
            diagnostics: vec![],
        }
    }
}

/// Compare two Dynamic values for equality
/// Numbers compare within f64 epsilon, maps ignore key order
pub fn values_equal(a: &Dynamic, b: &Dynamic) -> bool {
    match (a, b) {
        (Dynamic::Null, Dynamic::Null) => true,
        (Dynamic::Bool(a), Dynamic::Bool(b)) => a == b,
        (Dynamic::Number(a), Dynamic::Number(b)) => (a - b).abs() < f64::EPSILON,
        (Dynamic::String(a), Dynamic::String(b)) => a == b,
        (Dynamic::List(a), Dynamic::List(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
        }
        (Dynamic::Map(a), Dynamic::Map(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|v2| values_equal(v, v2)))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn request(state: Dynamic, plan: Dynamic) -> PlanModifyRequest {
        PlanModifyRequest {
            config: plan.clone(),
            state,
            plan,
            attribute_path: "source_dir".to_string(),
        }
    }

    fn triggers(value: &str) -> Dynamic {
        Dynamic::Map(BTreeMap::from([(
            "revision".to_string(),
            Dynamic::String(value.to_string()),
        )]))
    }

    #[test]
    fn requires_replace_if_changed_does_not_trigger_on_same_value() {
        let response = RequiresReplaceIfChanged.modify_plan(request(
            Dynamic::String("./config".to_string()),
            Dynamic::String("./config".to_string()),
        ));

        assert!(!response.requires_replace);
        assert!(response.diagnostics.is_empty());
    }

    #[test]
    fn requires_replace_if_changed_triggers_on_different_value() {
        let response = RequiresReplaceIfChanged.modify_plan(request(
            Dynamic::String("./config".to_string()),
            Dynamic::String("./other".to_string()),
        ));

        assert!(response.requires_replace);
    }

    #[test]
    fn requires_replace_if_changed_triggers_when_map_is_added_or_changed() {
        let added = RequiresReplaceIfChanged.modify_plan(request(Dynamic::Null, triggers("1")));
        assert!(added.requires_replace);

        let changed = RequiresReplaceIfChanged.modify_plan(request(triggers("1"), triggers("2")));
        assert!(changed.requires_replace);

        let same = RequiresReplaceIfChanged.modify_plan(request(triggers("1"), triggers("1")));
        assert!(!same.requires_replace);
    }

    #[test]
    fn requires_replace_if_changed_ignores_null_and_unknown() {
        let null = RequiresReplaceIfChanged.modify_plan(request(Dynamic::Null, Dynamic::Null));
        assert!(!null.requires_replace);

        let unknown = RequiresReplaceIfChanged.modify_plan(request(
            Dynamic::String("./config".to_string()),
            Dynamic::Unknown,
        ));
        assert!(!unknown.requires_replace);
    }

    #[test]
    fn use_state_for_unknown_preserves_state_when_unknown() {
        let response = UseStateForUnknown.modify_plan(request(
            Dynamic::String("3f2a".to_string()),
            Dynamic::Unknown,
        ));

        assert_eq!(response.plan_value, Dynamic::String("3f2a".to_string()));
        assert!(!response.requires_replace);
    }

    #[test]
    fn use_state_for_unknown_stays_unknown_without_state() {
        let response = UseStateForUnknown.modify_plan(request(Dynamic::Null, Dynamic::Unknown));

        assert!(response.plan_value.is_unknown());
    }

    #[test]
    fn values_equal_handles_all_types() {
        assert!(values_equal(&Dynamic::Number(300.0), &Dynamic::Number(300.0)));
        assert!(!values_equal(&Dynamic::Number(300.0), &Dynamic::Number(30.0)));
        assert!(!values_equal(&Dynamic::Bool(true), &Dynamic::Bool(false)));

        let list1 = Dynamic::List(vec!["-o".into(), "out.json".into()]);
        let list2 = Dynamic::List(vec!["-o".into(), "out.json".into()]);
        let list3 = Dynamic::List(vec!["out.json".into(), "-o".into()]);
        assert!(values_equal(&list1, &list2));
        assert!(!values_equal(&list1, &list3));

        assert!(values_equal(&triggers("a"), &triggers("a")));
        assert!(!values_equal(&triggers("a"), &triggers("b")));
        assert!(!values_equal(&Dynamic::Null, &triggers("a")));
    }
}
