//! The health validator and Error entity lifecycle.
//!
//! `evaluate_health` folds an entity against its own genus and
//! cross-references open Error entities pointing back at it, rather than
//! trusting a cached status flag.

use crate::errors::KernelError;
use crate::event::{FactType, Store};
use crate::kernel::Kernel;
use serde_json::Value as Json;
use tessella_domain::ResId;

/// One thing `evaluate_health` found wrong with an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthIssue {
    MissingRequiredAttribute { attribute: String },
    InvalidAttributeType { attribute: String, expected: String },
    InvalidStatus { status: String },
    UnacknowledgedError { error_id: ResId, message: String },
}

impl<S: Store> Kernel<S> {
    /// Folds `entity_id` and its genus, returning every issue found. An
    /// entity with no facts at all reports nothing — there is no genus to
    /// check it against — callers are expected to have already confirmed
    /// the entity exists.
    pub fn evaluate_health(&self, entity_id: ResId) -> Vec<HealthIssue> {
        let mut issues = Vec::new();
        let state = self.materialize_entity(entity_id, None);
        let Some(genus_id) = state.genus_id else {
            return issues;
        };
        let Ok(def) = self.get_genus_def(genus_id) else {
            return issues;
        };

        for (name, attr) in &def.attributes {
            match state.attributes.get(name) {
                None => {
                    if attr.required {
                        issues.push(HealthIssue::MissingRequiredAttribute { attribute: name.clone() });
                    }
                }
                Some(Json::Null) => {
                    if attr.required {
                        issues.push(HealthIssue::MissingRequiredAttribute { attribute: name.clone() });
                    }
                }
                Some(Json::String(s)) if s.is_empty() && attr.required => {
                    issues.push(HealthIssue::MissingRequiredAttribute { attribute: name.clone() });
                }
                Some(value) => {
                    if !attr.attr_type.matches(value) {
                        issues.push(HealthIssue::InvalidAttributeType { attribute: name.clone(), expected: attr.attr_type.as_str().to_string() });
                    }
                }
            }
        }

        if !def.states.is_empty() {
            if let Some(status) = &state.status {
                if !def.states.contains_key(status) {
                    issues.push(HealthIssue::InvalidStatus { status: status.clone() });
                }
            }
        }

        for (error_id, message) in self.open_errors_for(entity_id) {
            issues.push(HealthIssue::UnacknowledgedError { error_id, message });
        }

        issues
    }

    /// Every open Error entity whose `associated_res_id` points at `entity_id`
    /// — one per open Error entity whose `associated_res_id` names it.
    /// Scans the current branch's entities rather than maintaining a reverse
    /// index — error volume is expected to be small relative to the entity
    /// population this queries against.
    fn open_errors_for(&self, entity_id: ResId) -> Vec<(ResId, String)> {
        let Some(error_genus) = crate::constants::sentinel_id_for("error") else {
            return Vec::new();
        };
        let target = entity_id.to_string();
        self.store
            .distinct_entity_ids_for_branch(&self.current_branch)
            .into_iter()
            .filter_map(|id| {
                let state = self.materialize_entity(id, None);
                if state.genus_id != Some(error_genus) {
                    return None;
                }
                if state.status.as_deref() != Some("open") {
                    return None;
                }
                let points_here = state.attributes.get("associated_res_id").and_then(|v| v.as_str()) == Some(target.as_str());
                if !points_here {
                    return None;
                }
                let message = state.attributes.get("message").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                Some((id, message))
            })
            .collect()
    }

    /// Transitions an Error entity to `acknowledged` and stamps
    /// `acknowledged_at`. Goes through `transition_status`
    /// rather than a raw append, so an already-acknowledged or nonexistent
    /// error is rejected the same way any other invalid transition is.
    pub fn acknowledge_error(&mut self, error_id: ResId) -> Result<(), KernelError> {
        self.transition_status(error_id, "acknowledged")?;
        let branch = self.current_branch.clone();
        self.store.append(error_id, &branch, FactType::AttributeSet { key: "acknowledged_at".into(), value: Json::String(chrono::Utc::now().to_rfc3339()) }, None)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::InMemoryStore;
    use crate::genus::GenusSpec;
    use tessella_domain::AttributeType;

    fn new_kernel() -> Kernel<InMemoryStore> {
        Kernel::new(InMemoryStore::new()).unwrap()
    }

    #[test]
    fn missing_required_attribute_is_reported() {
        let mut kernel = new_kernel();
        let genus = kernel
            .define_entity_genus(GenusSpec { name: "invoice".into(), attributes: vec![("total".into(), AttributeType::Number, true, None)], ..Default::default() })
            .unwrap();
        let entity = kernel.create_entity(genus, None).unwrap();
        let issues = kernel.evaluate_health(entity);
        assert_eq!(issues, vec![HealthIssue::MissingRequiredAttribute { attribute: "total".into() }]);
    }

    #[test]
    fn satisfied_entity_reports_no_issues() {
        let mut kernel = new_kernel();
        let genus = kernel
            .define_entity_genus(GenusSpec { name: "invoice".into(), attributes: vec![("total".into(), AttributeType::Number, true, None)], ..Default::default() })
            .unwrap();
        let entity = kernel.create_entity(genus, None).unwrap();
        kernel.set_attribute(entity, "total", Json::from(42)).unwrap();
        assert!(kernel.evaluate_health(entity).is_empty());
    }

    #[test]
    fn open_error_pointing_at_entity_is_reported_until_acknowledged() {
        let mut kernel = new_kernel();
        let genus = kernel.define_entity_genus(GenusSpec { name: "invoice".into(), ..Default::default() }).unwrap();
        let entity = kernel.create_entity(genus, None).unwrap();

        let action = kernel.define_action_genus(GenusSpec { name: "flag_problem".into(), ..Default::default() }).unwrap();
        kernel
            .evolve_action_handler(
                action,
                vec![("subject".into(), "invoice".into(), None)],
                vec![],
                vec![crate::action::SideEffect::CreateError {
                    message: crate::action::Token::Literal(Json::String("bad total".into())),
                    severity: None,
                    res: Some("subject".into()),
                }],
            )
            .unwrap();
        let mut bindings = std::collections::BTreeMap::new();
        bindings.insert("subject".to_string(), entity);
        let result = kernel.execute_action(action, bindings, Default::default());
        assert!(matches!(result, crate::action::ActionOutcome::Ok { .. }));

        let issues = kernel.evaluate_health(entity);
        assert_eq!(issues.len(), 1);
        let error_id = match &issues[0] {
            HealthIssue::UnacknowledgedError { error_id, message } => {
                assert_eq!(message, "bad total");
                *error_id
            }
            other => panic!("expected UnacknowledgedError, got {other:?}"),
        };

        kernel.acknowledge_error(error_id).unwrap();
        assert!(kernel.evaluate_health(entity).is_empty());
    }
}
