//! Reducers: folding a fact stream into a point-in-time materialized state.
//!
//! One `match` per fact kind, building up a state struct by value. Each
//! materialized kind here (`EntityState`, `GenusDef`, `ActionDef`,
//! `ProcessDef`, `ProcessInstanceState`, `SerializationDef`) gets its own
//! fold function rather than one generic reducer, since the fact vocabulary
//! each one understands barely overlaps.

use crate::action::{ActionDef, ActionParameter, ActionResource, SideEffect};
use crate::event::{Fact, FactType};
use crate::process::{LaneDef, ProcessDef, ProcessInstanceState, ProcessStatus, StepDef, StepInstanceState, StepInstanceStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use tessella_domain::{AttributeDef, Cardinality, GenusDef, ResId, RoleDef, StateDef, TransitionDef};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalAnchor {
    pub start_year: i32,
    pub end_year: Option<i32>,
    pub precision: String,
    pub calendar_note: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureState {
    pub status: Option<String>,
    pub attributes: BTreeMap<String, Json>,
}

/// Materialized shape of an entity's fact stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityState {
    pub genus_id: Option<ResId>,
    pub status: Option<String>,
    pub attributes: BTreeMap<String, Json>,
    pub features: BTreeMap<String, FeatureState>,
    pub members: BTreeMap<String, Vec<String>>,
    pub temporal_anchor: Option<TemporalAnchor>,
}

/// Replays `facts` in order through `fold`, starting from `S::default()`.
/// Callers on a branch pass the parent-chain-prefixed fact list (see
/// `branch::collect_tessellae`); this function itself has no notion of
/// branches.
pub fn materialize<S, F>(facts: &[Fact], fold: F) -> S
where
    S: Default,
    F: Fn(S, &Fact) -> S,
{
    facts.iter().fold(S::default(), fold)
}

pub fn fold_entity(mut state: EntityState, fact: &Fact) -> EntityState {
    match &fact.fact_type {
        FactType::Created { genus_id } => EntityState { genus_id: Some(*genus_id), ..EntityState::default() },
        FactType::AttributeSet { key, value } => {
            state.attributes.insert(key.clone(), value.clone());
            state
        }
        FactType::AttributeRemoved { key } => {
            state.attributes.remove(key);
            state
        }
        FactType::StatusChanged { status } => {
            state.status = Some(status.clone());
            state
        }
        FactType::FeatureCreated { feature_id, .. } => {
            state.features.insert(feature_id.clone(), FeatureState::default());
            state
        }
        FactType::FeatureAttributeSet { feature_id, key, value } => {
            state.features.entry(feature_id.clone()).or_default().attributes.insert(key.clone(), value.clone());
            state
        }
        FactType::FeatureStatusChanged { feature_id, status } => {
            state.features.entry(feature_id.clone()).or_default().status = Some(status.clone());
            state
        }
        FactType::MemberAdded { role, entity_id } => {
            state.members.entry(role.clone()).or_default().push(entity_id.to_string());
            state
        }
        FactType::MemberRemoved { role, entity_id } => {
            if let Some(members) = state.members.get_mut(role) {
                members.retain(|m| m != &entity_id.to_string());
            }
            state
        }
        FactType::TemporalAnchorSet { start_year, end_year, precision, calendar_note } => {
            state.temporal_anchor =
                Some(TemporalAnchor { start_year: *start_year, end_year: *end_year, precision: precision.clone(), calendar_note: calendar_note.clone() });
            state
        }
        FactType::TemporalAnchorRemoved => {
            state.temporal_anchor = None;
            state
        }
        _ => state,
    }
}

pub fn fold_genus(mut state: GenusDef, fact: &Fact) -> GenusDef {
    match &fact.fact_type {
        FactType::GenusMetaSet { key, value } => {
            state.meta.insert(key.clone(), value.clone());
            state
        }
        FactType::GenusAttributeDefined { name, attr_type, required, default } => {
            state.attributes.insert(name.clone(), AttributeDef { attr_type: *attr_type, required: *required, default: default.clone() });
            state
        }
        FactType::GenusStateDefined { name, initial } => {
            state.states.insert(name.clone(), StateDef { initial: *initial });
            state
        }
        FactType::GenusTransitionDefined { from, to, name } => {
            state.transitions.push(TransitionDef { from: from.clone(), to: to.clone(), name: name.clone() });
            state
        }
        FactType::GenusRoleDefined { name, valid_member_genera, cardinality } => {
            state.roles.insert(name.clone(), RoleDef { valid_member_genera: valid_member_genera.clone(), cardinality: *cardinality });
            state
        }
        _ => state,
    }
}

pub fn fold_action(mut state: ActionDef, fact: &Fact) -> ActionDef {
    match &fact.fact_type {
        FactType::ActionResourceDefined { name, genus_name, required_status } => {
            state.resources.insert(name.clone(), ActionResource { name: name.clone(), genus_name: genus_name.clone(), required_status: required_status.clone() });
            state
        }
        FactType::ActionParameterDefined { name, param_type, required } => {
            state.parameters.insert(name.clone(), ActionParameter { name: name.clone(), param_type: *param_type, required: *required });
            state
        }
        FactType::ActionHandlerDefined { handler } => {
            state.handler = handler.clone();
            state
        }
        _ => state,
    }
}

pub fn fold_process_def(mut state: ProcessDef, fact: &Fact) -> ProcessDef {
    match &fact.fact_type {
        FactType::ProcessLaneDefined { lane } => {
            state.lanes.insert(lane.name.clone(), lane.clone());
            state
        }
        FactType::ProcessStepDefined { step } => {
            state.steps.insert(step.name.clone(), step.clone());
            state
        }
        FactType::ProcessTriggerDefined { trigger } => {
            state.triggers.push(trigger.clone());
            state
        }
        _ => state,
    }
}

pub fn fold_process_instance(mut state: ProcessInstanceState, fact: &Fact) -> ProcessInstanceState {
    match &fact.fact_type {
        FactType::ProcessStarted { context_res_id } => {
            state.status = ProcessStatus::Running;
            state.context_res_id = Some(*context_res_id);
            state
        }
        FactType::StepActivated { step_name } => {
            state.steps.entry(step_name.clone()).or_default().status = Some(StepInstanceStatus::Active);
            state
        }
        FactType::StepCompleted { step_name, result } => {
            let slot = state.steps.entry(step_name.clone()).or_default();
            slot.status = Some(StepInstanceStatus::Completed);
            slot.result = result.clone();
            state
        }
        FactType::StepFailed { step_name, error } => {
            // Only the step's own status moves to `Failed` here; the process
            // instance's status stays `Running` until a `process_failed` fact
            // is appended (by `advance_process` reaching its fixpoint), so
            // other still-active lanes get a chance to finish first.
            let slot = state.steps.entry(step_name.clone()).or_default();
            slot.status = Some(StepInstanceStatus::Failed);
            slot.error = Some(error.clone());
            state
        }
        FactType::StepSkipped { step_name } => {
            state.steps.entry(step_name.clone()).or_default().status = Some(StepInstanceStatus::Skipped);
            state
        }
        FactType::StepTaskCreated { step_name, task_id } => {
            state.steps.entry(step_name.clone()).or_default().task_id = Some(*task_id);
            state
        }
        FactType::StepActionExecuted { step_name, action_taken_id } => {
            state.steps.entry(step_name.clone()).or_default().action_taken_id = Some(action_taken_id.clone());
            state
        }
        FactType::GateEvaluated { step_name, passed } => {
            let slot = state.steps.entry(step_name.clone()).or_default();
            slot.status = Some(if *passed { StepInstanceStatus::Completed } else { StepInstanceStatus::Failed });
            state
        }
        FactType::ProcessCompleted => {
            state.status = ProcessStatus::Completed;
            state
        }
        FactType::ProcessFailed => {
            state.status = ProcessStatus::Failed;
            state
        }
        FactType::ProcessCancelled => {
            state.status = ProcessStatus::Cancelled;
            state
        }
        _ => state,
    }
}

#[derive(Debug, Clone, Default)]
pub struct SerializationDef {
    pub inputs: BTreeMap<String, Json>,
    pub outputs: BTreeMap<String, Json>,
    pub handler: Option<Json>,
}

pub fn fold_serialization(mut state: SerializationDef, fact: &Fact) -> SerializationDef {
    match &fact.fact_type {
        FactType::SerializationInputDefined { name, value } => {
            state.inputs.insert(name.clone(), value.clone());
            state
        }
        FactType::SerializationOutputDefined { name, value } => {
            state.outputs.insert(name.clone(), value.clone());
            state
        }
        FactType::SerializationHandlerDefined { handler } => {
            state.handler = Some(handler.clone());
            state
        }
        _ => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tessella_domain::ResId;

    fn fact(fact_type: FactType) -> Fact {
        Fact { id: 1, res_id: ResId::new(), branch_id: "main".into(), fact_type, created_at: Utc::now(), source: None }
    }

    #[test]
    fn entity_reducer_folds_attribute_and_status() {
        let facts = vec![
            fact(FactType::Created { genus_id: ResId::new() }),
            fact(FactType::AttributeSet { key: "title".into(), value: Json::String("Ada".into()) }),
            fact(FactType::StatusChanged { status: "active".into() }),
        ];
        let state: EntityState = materialize(&facts, fold_entity);
        assert_eq!(state.status.as_deref(), Some("active"));
        assert_eq!(state.attributes.get("title"), Some(&Json::String("Ada".into())));
    }

    #[test]
    fn created_fact_resets_state() {
        let facts = vec![
            fact(FactType::AttributeSet { key: "title".into(), value: Json::String("stale".into()) }),
            fact(FactType::Created { genus_id: ResId::new() }),
        ];
        let state: EntityState = materialize(&facts, fold_entity);
        assert!(state.attributes.is_empty());
    }

    #[test]
    fn genus_reducer_builds_state_machine() {
        let facts = vec![
            fact(FactType::GenusStateDefined { name: "draft".into(), initial: true }),
            fact(FactType::GenusStateDefined { name: "active".into(), initial: false }),
            fact(FactType::GenusTransitionDefined { from: "draft".into(), to: "active".into(), name: None }),
        ];
        let genus: GenusDef = materialize(&facts, fold_genus);
        assert_eq!(genus.initial_state(), Some("draft"));
        assert!(genus.has_transition("draft", "active"));
    }
}
