//! Fact types and the `Fact` envelope.
//!
//! Role in the kernel:
//! - Every mutation the kernel makes is the append of one `Fact` to an
//!   entity's stream. `FactType` is the tagged payload; reducers in
//!   `materializer` pattern-match on it.
//! - `Unknown` is the forward-compatibility escape hatch: a fact type this
//!   build of the kernel doesn't recognize still round-trips through
//!   storage and is passed through unchanged by every reducer.

use crate::action::SideEffect;
use crate::process::{LaneDef, StepDef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tessella_domain::{AttributeType, Cardinality, FactId, ResId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FactType {
    /// First fact of an entity's stream; resets materialized state.
    /// `genus_id` is structural, not user data — it is never redefined after
    /// creation, so reducers fold it once and every later `created` on the
    /// same stream (there shouldn't be one) would simply overwrite it.
    Created { genus_id: ResId },
    AttributeSet { key: String, value: Json },
    AttributeRemoved { key: String },
    StatusChanged { status: String },

    FeatureCreated { feature_id: String, genus_id: ResId },
    FeatureAttributeSet { feature_id: String, key: String, value: Json },
    FeatureStatusChanged { feature_id: String, status: String },

    MemberAdded { role: String, entity_id: ResId },
    MemberRemoved { role: String, entity_id: ResId },

    GenusMetaSet { key: String, value: Json },
    GenusAttributeDefined { name: String, attr_type: AttributeType, required: bool, default: Option<Json> },
    GenusStateDefined { name: String, initial: bool },
    GenusTransitionDefined { from: String, to: String, name: Option<String> },
    GenusRoleDefined { name: String, valid_member_genera: Vec<String>, cardinality: Cardinality },

    ActionResourceDefined { name: String, genus_name: String, required_status: Option<String> },
    ActionParameterDefined { name: String, param_type: AttributeType, required: bool },
    ActionHandlerDefined { handler: Vec<SideEffect> },

    ProcessLaneDefined { lane: LaneDef },
    ProcessStepDefined { step: StepDef },
    ProcessTriggerDefined { trigger: Json },

    SerializationInputDefined { name: String, value: Json },
    SerializationOutputDefined { name: String, value: Json },
    SerializationHandlerDefined { handler: Json },

    ProcessStarted { context_res_id: ResId },
    StepActivated { step_name: String },
    StepCompleted { step_name: String, result: Option<Json> },
    StepFailed { step_name: String, error: String },
    StepSkipped { step_name: String },
    StepTaskCreated { step_name: String, task_id: ResId },
    StepActionExecuted { step_name: String, action_taken_id: String },
    GateEvaluated { step_name: String, passed: bool },
    ProcessCompleted,
    ProcessFailed,
    ProcessCancelled,

    TemporalAnchorSet { start_year: i32, end_year: Option<i32>, precision: String, calendar_note: Option<String> },
    TemporalAnchorRemoved,

    /// Forward-compatibility catch-all for fact types this build does not
    /// recognize. Reducers pass it through unchanged.
    Unknown { r#type: String, data: Json },
}

impl FactType {
    /// Stable, lowercase name used for storage and diagnostics (mirrors the
    /// teacher's `event_type_for`/`kind_variant_name` split, collapsed into
    /// one function since the wire tag and the log label coincide here).
    pub fn type_tag(&self) -> String {
        match self {
            FactType::Created { .. } => "created".into(),
            FactType::AttributeSet { .. } => "attribute_set".into(),
            FactType::AttributeRemoved { .. } => "attribute_removed".into(),
            FactType::StatusChanged { .. } => "status_changed".into(),
            FactType::FeatureCreated { .. } => "feature_created".into(),
            FactType::FeatureAttributeSet { .. } => "feature_attribute_set".into(),
            FactType::FeatureStatusChanged { .. } => "feature_status_changed".into(),
            FactType::MemberAdded { .. } => "member_added".into(),
            FactType::MemberRemoved { .. } => "member_removed".into(),
            FactType::GenusMetaSet { .. } => "genus_meta_set".into(),
            FactType::GenusAttributeDefined { .. } => "genus_attribute_defined".into(),
            FactType::GenusStateDefined { .. } => "genus_state_defined".into(),
            FactType::GenusTransitionDefined { .. } => "genus_transition_defined".into(),
            FactType::GenusRoleDefined { .. } => "genus_role_defined".into(),
            FactType::ActionResourceDefined { .. } => "action_resource_defined".into(),
            FactType::ActionParameterDefined { .. } => "action_parameter_defined".into(),
            FactType::ActionHandlerDefined { .. } => "action_handler_defined".into(),
            FactType::ProcessLaneDefined { .. } => "process_lane_defined".into(),
            FactType::ProcessStepDefined { .. } => "process_step_defined".into(),
            FactType::ProcessTriggerDefined { .. } => "process_trigger_defined".into(),
            FactType::SerializationInputDefined { .. } => "serialization_input_defined".into(),
            FactType::SerializationOutputDefined { .. } => "serialization_output_defined".into(),
            FactType::SerializationHandlerDefined { .. } => "serialization_handler_defined".into(),
            FactType::ProcessStarted { .. } => "process_started".into(),
            FactType::StepActivated { .. } => "step_activated".into(),
            FactType::StepCompleted { .. } => "step_completed".into(),
            FactType::StepFailed { .. } => "step_failed".into(),
            FactType::StepSkipped { .. } => "step_skipped".into(),
            FactType::StepTaskCreated { .. } => "step_task_created".into(),
            FactType::StepActionExecuted { .. } => "step_action_executed".into(),
            FactType::GateEvaluated { .. } => "gate_evaluated".into(),
            FactType::ProcessCompleted => "process_completed".into(),
            FactType::ProcessFailed => "process_failed".into(),
            FactType::ProcessCancelled => "process_cancelled".into(),
            FactType::TemporalAnchorSet { .. } => "temporal_anchor_set".into(),
            FactType::TemporalAnchorRemoved => "temporal_anchor_removed".into(),
            FactType::Unknown { r#type, .. } => r#type.clone(),
        }
    }
}

/// An immutable, globally-ordered append to one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: FactId,
    pub res_id: ResId,
    pub branch_id: String,
    pub fact_type: FactType,
    pub created_at: DateTime<Utc>,
    pub source: Option<String>,
}
