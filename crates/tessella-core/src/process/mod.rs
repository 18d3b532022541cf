//! Process definitions and the lane/step scheduler.
//!
//! A process is a fixed set of named steps with a status machine per step,
//! and an engine that folds completed steps into newly-activated ones,
//! across multiple concurrent lanes, each walked independently in position
//! order, to a fixpoint per tick.

use crate::action::ActionOutcome;
use crate::errors::KernelError;
use crate::event::{FactType, Store};
use crate::kernel::Kernel;
use crate::materializer::{fold_process_def, fold_process_instance};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::{BTreeMap, HashSet};
use tessella_domain::{GenusKind, ResId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneDef {
    pub name: String,
    pub position: i32,
}

/// What a step does once activated. `Task` steps wait for an external
/// signal (`complete_task`); every other kind resolves synchronously within
/// the same `advance_process` tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Task,
    Action,
    Gate,
    Fetch,
    Branch,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Task => "task",
            StepKind::Action => "action",
            StepKind::Gate => "gate",
            StepKind::Fetch => "fetch",
            StepKind::Branch => "branch",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "task" => Some(StepKind::Task),
            "action" => Some(StepKind::Action),
            "gate" => Some(StepKind::Gate),
            "fetch" => Some(StepKind::Fetch),
            "branch" => Some(StepKind::Branch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
    pub name: String,
    pub lane: String,
    pub kind: StepKind,
    pub position: i32,
    /// For `task` steps: the task title created when the step activates.
    pub task_title: Option<String>,
    /// For `action` steps: which action genus to invoke.
    pub action_name: Option<String>,
    /// For `gate` steps: every step (in any lane) that must be `completed`
    /// or `skipped` before this gate auto-completes — blocking its lane
    /// until every named predecessor step is complete.
    pub gate_waits_on: Vec<String>,
    /// For `fetch` steps: the attribute name read off the process's context
    /// entity into the step's result.
    pub fetch_attribute: Option<String>,
    /// For `branch` steps: the boolean-valued context attribute the branch
    /// reads to decide whether to take its skip.
    pub branch_condition: Option<String>,
    /// For `branch` steps: when `branch_condition` is falsy, every step in
    /// this step's lane between it and `branch_target` (exclusive) is marked
    /// `skipped` instead of running.
    pub branch_target: Option<String>,
}

/// Materialized process definition (`process_reducer`'s output).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessDef {
    pub lanes: BTreeMap<String, LaneDef>,
    pub steps: BTreeMap<String, StepDef>,
    pub triggers: Vec<Json>,
}

impl ProcessDef {
    /// Steps of `lane`, in `position` order.
    pub fn steps_in(&self, lane: &str) -> Vec<&StepDef> {
        let mut steps: Vec<&StepDef> = self.steps.values().filter(|s| s.lane == lane).collect();
        steps.sort_by_key(|s| s.position);
        steps
    }

    /// Lanes, in `position` order.
    pub fn lanes_ordered(&self) -> Vec<&LaneDef> {
        let mut lanes: Vec<&LaneDef> = self.lanes.values().collect();
        lanes.sort_by_key(|l| l.position);
        lanes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepInstanceStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Skipped,
}

impl StepInstanceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepInstanceStatus::Completed | StepInstanceStatus::Skipped | StepInstanceStatus::Failed)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepInstanceState {
    pub status: Option<StepInstanceStatus>,
    pub task_id: Option<ResId>,
    pub action_taken_id: Option<String>,
    pub result: Option<Json>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl Default for ProcessStatus {
    fn default() -> Self {
        ProcessStatus::NotStarted
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessInstanceState {
    pub status: ProcessStatus,
    pub context_res_id: Option<ResId>,
    pub steps: BTreeMap<String, StepInstanceState>,
}

impl ProcessInstanceState {
    pub fn step_status(&self, name: &str) -> StepInstanceStatus {
        self.steps.get(name).and_then(|s| s.status).unwrap_or(StepInstanceStatus::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ProcessStatus::Completed | ProcessStatus::Failed | ProcessStatus::Cancelled)
    }
}

/// What `advance_process` wants the kernel to do next. Purely descriptive;
/// the kernel interprets each action, appends the corresponding fact(s), and
/// calls `advance_process` again — the scheduler decides, the kernel
/// records. Only `Gate` resolves with no runtime dependency, so it
/// is the only kind this pure function can chain past within one call;
/// every other kind stops that lane for this call and waits for the kernel
/// to resolve it and recurse.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleAction {
    ActivateStep { step: String },
    CreateTaskStep { step: String, title: String },
    RunActionStep { step: String, action_name: String },
    CompleteGate { step: String },
    RunFetchStep { step: String, attribute: String },
    RunBranchStep { step: String, condition: String, target: Option<String> },
    CompleteProcess,
    FailProcess,
}

/// Advances every lane as far as it can go given the current instance state.
///
/// Walks each lane from its earliest non-terminal step. A step whose status
/// is `Active` blocks its lane for this call (something external, a task or
/// the kernel resolving an action/fetch/branch, hasn't reported back yet). A
/// `Pending` step is dispatched: `Gate` resolves immediately against
/// `gate_waits_on` and the walk continues past it in the same call,
/// advancing past steps that need no external input; every other kind
/// emits one
/// dispatch action and stops that lane, because its outcome depends on data
/// (`Store` reads, action execution) this function has no access to — the
/// kernel resolves it, appends a fact, and calls this function again.
pub fn advance_process(def: &ProcessDef, state: &ProcessInstanceState) -> Vec<ScheduleAction> {
    if state.is_terminal() {
        return Vec::new();
    }
    let mut actions = Vec::new();
    let mut simulated = state.clone();
    for lane in def.lanes_ordered() {
        for step in def.steps_in(&lane.name) {
            match simulated.step_status(&step.name) {
                StepInstanceStatus::Completed | StepInstanceStatus::Skipped | StepInstanceStatus::Failed => continue,
                StepInstanceStatus::Active => break,
                StepInstanceStatus::Pending => {}
            }
            match step.kind {
                StepKind::Gate => {
                    let ready = step
                        .gate_waits_on
                        .iter()
                        .all(|p| matches!(simulated.step_status(p), StepInstanceStatus::Completed | StepInstanceStatus::Skipped));
                    if !ready {
                        break;
                    }
                    actions.push(ScheduleAction::ActivateStep { step: step.name.clone() });
                    actions.push(ScheduleAction::CompleteGate { step: step.name.clone() });
                    simulated.steps.entry(step.name.clone()).or_default().status = Some(StepInstanceStatus::Completed);
                }
                StepKind::Task => {
                    actions.push(ScheduleAction::ActivateStep { step: step.name.clone() });
                    actions.push(ScheduleAction::CreateTaskStep {
                        step: step.name.clone(),
                        title: step.task_title.clone().unwrap_or_else(|| step.name.clone()),
                    });
                    simulated.steps.entry(step.name.clone()).or_default().status = Some(StepInstanceStatus::Active);
                    break;
                }
                StepKind::Action => {
                    actions.push(ScheduleAction::ActivateStep { step: step.name.clone() });
                    actions.push(ScheduleAction::RunActionStep { step: step.name.clone(), action_name: step.action_name.clone().unwrap_or_default() });
                    simulated.steps.entry(step.name.clone()).or_default().status = Some(StepInstanceStatus::Active);
                    break;
                }
                StepKind::Fetch => {
                    actions.push(ScheduleAction::ActivateStep { step: step.name.clone() });
                    actions.push(ScheduleAction::RunFetchStep { step: step.name.clone(), attribute: step.fetch_attribute.clone().unwrap_or_default() });
                    simulated.steps.entry(step.name.clone()).or_default().status = Some(StepInstanceStatus::Active);
                    break;
                }
                StepKind::Branch => {
                    actions.push(ScheduleAction::ActivateStep { step: step.name.clone() });
                    actions.push(ScheduleAction::RunBranchStep {
                        step: step.name.clone(),
                        condition: step.branch_condition.clone().unwrap_or_default(),
                        target: step.branch_target.clone(),
                    });
                    simulated.steps.entry(step.name.clone()).or_default().status = Some(StepInstanceStatus::Active);
                    break;
                }
            }
        }
    }
    if actions.is_empty() && !def.steps.is_empty() {
        let all_terminal = def.steps.values().all(|s| simulated.step_status(&s.name).is_terminal());
        if all_terminal {
            let any_failed = def.steps.values().any(|s| simulated.step_status(&s.name) == StepInstanceStatus::Failed);
            let any_active = def.steps.values().any(|s| simulated.step_status(&s.name) == StepInstanceStatus::Active);
            if any_failed && !any_active {
                actions.push(ScheduleAction::FailProcess);
            } else if !any_failed {
                actions.push(ScheduleAction::CompleteProcess);
            }
        }
    }
    actions
}

/// Checks a lane/step addition against the process-definition rules,
/// against the union of `current`'s definition and the new pieces
/// being evolved in: at least one lane, at least one step, no duplicate
/// names, every step's lane defined, and every gate's `gate_waits_on` name
/// naming a real step.
fn validate_process_definition(current: &ProcessDef, new_lanes: &[LaneDef], new_steps: &[StepDef]) -> Result<(), KernelError> {
    let mut lane_names: HashSet<String> = current.lanes.keys().cloned().collect();
    for lane in new_lanes {
        if !lane_names.insert(lane.name.clone()) {
            return Err(KernelError::ValidationError(format!("duplicate lane name '{}'", lane.name)));
        }
    }
    let mut all_step_names: HashSet<String> = current.steps.keys().cloned().collect();
    for step in new_steps {
        if !all_step_names.insert(step.name.clone()) {
            return Err(KernelError::ValidationError(format!("duplicate step name '{}'", step.name)));
        }
    }
    if lane_names.is_empty() {
        return Err(KernelError::ValidationError("process definition requires at least one lane".into()));
    }
    if all_step_names.is_empty() {
        return Err(KernelError::ValidationError("process definition requires at least one step".into()));
    }
    for step in new_steps {
        if !lane_names.contains(&step.lane) {
            return Err(KernelError::ValidationError(format!("step '{}' references undefined lane '{}'", step.name, step.lane)));
        }
        if step.kind == StepKind::Gate {
            for dep in &step.gate_waits_on {
                if !all_step_names.contains(dep) {
                    return Err(KernelError::ValidationError(format!("gate step '{}' waits on undefined step '{}'", step.name, dep)));
                }
            }
        }
    }
    Ok(())
}

impl<S: Store> Kernel<S> {
    /// Materializes a process genus's lanes/steps/triggers by folding its own
    /// fact stream (mirrors `get_genus_def`/`get_action_def`).
    pub fn get_process_def(&self, process_genus_id: ResId) -> Result<ProcessDef, KernelError> {
        let facts = self.store.list(process_genus_id, &self.current_branch);
        if facts.is_empty() {
            return Err(KernelError::NotFound(format!("process genus {process_genus_id}")));
        }
        Ok(facts.iter().fold(ProcessDef::default(), |state, fact| fold_process_def(state, fact)))
    }

    /// Adds lanes/steps/triggers to a process genus, additively. Re-adding
    /// an already-defined lane or step name is a no-op; triggers are purely
    /// informational and always appended.
    pub fn evolve_process_definition(&mut self, process_genus_id: ResId, lanes: Vec<LaneDef>, steps: Vec<StepDef>, triggers: Vec<Json>) -> Result<(), KernelError> {
        let current = self.get_process_def(process_genus_id)?;
        validate_process_definition(&current, &lanes, &steps)?;
        let branch = self.current_branch.clone();
        for lane in lanes {
            if current.lanes.contains_key(&lane.name) {
                continue;
            }
            self.store.append(process_genus_id, &branch, FactType::ProcessLaneDefined { lane }, None)?;
        }
        for step in steps {
            if current.steps.contains_key(&step.name) {
                continue;
            }
            self.store.append(process_genus_id, &branch, FactType::ProcessStepDefined { step }, None)?;
        }
        for trigger in triggers {
            self.store.append(process_genus_id, &branch, FactType::ProcessTriggerDefined { trigger }, None)?;
        }
        Ok(())
    }

    /// Folds a process instance's own fact stream into its current state
    /// (branch-aware, like `materialize_entity`).
    pub fn process_instance_state(&self, instance_id: ResId) -> ProcessInstanceState {
        let facts = self.collect_tessellae(instance_id, &self.current_branch, None);
        facts.iter().fold(ProcessInstanceState::default(), |s, f| fold_process_instance(s, f))
    }

    /// Creates a new instance of `process_genus_id` against `context_res_id`
    /// and drives it to its first fixpoint.
    pub fn start_process(&mut self, process_genus_id: ResId, context_res_id: ResId) -> Result<ResId, KernelError> {
        let def = self.get_genus_def(process_genus_id)?;
        if def.kind() != GenusKind::Process {
            return Err(KernelError::SchemaViolation(format!("genus '{}' is not a process genus", def.name().unwrap_or_default())));
        }
        let branch = self.current_branch.clone();
        let instance_id = ResId::new();
        self.store.append(instance_id, &branch, FactType::Created { genus_id: process_genus_id }, None)?;
        self.store.append(instance_id, &branch, FactType::ProcessStarted { context_res_id }, None)?;
        self.drive_process(instance_id)?;
        Ok(instance_id)
    }

    /// Calls `advance_process` to a fixpoint, applying and recording each
    /// dispatched `ScheduleAction` in turn — if any step made progress,
    /// recurse.
    pub fn drive_process(&mut self, instance_id: ResId) -> Result<(), KernelError> {
        let genus_id = self.materialize_entity(instance_id, None).genus_id.ok_or_else(|| KernelError::NotFound(format!("process instance {instance_id}")))?;
        let def = self.get_process_def(genus_id)?;
        loop {
            let state = self.process_instance_state(instance_id);
            let actions = advance_process(&def, &state);
            if actions.is_empty() {
                break;
            }
            for action in actions {
                self.apply_schedule_action(instance_id, &def, action)?;
            }
        }
        Ok(())
    }

    fn apply_schedule_action(&mut self, instance_id: ResId, def: &ProcessDef, action: ScheduleAction) -> Result<(), KernelError> {
        let branch = self.current_branch.clone();
        match action {
            ScheduleAction::ActivateStep { step } => {
                self.store.append(instance_id, &branch, FactType::StepActivated { step_name: step }, None)?;
            }
            ScheduleAction::CreateTaskStep { step, title } => {
                let task_id = self.create_task_entity(&title, vec![instance_id])?;
                self.store.append(instance_id, &branch, FactType::StepTaskCreated { step_name: step, task_id }, None)?;
            }
            ScheduleAction::RunActionStep { step, action_name } => {
                let context_res_id = self.require_context(instance_id)?;
                let action_genus_id =
                    self.find_genus_by_name(GenusKind::Action, &action_name).ok_or_else(|| KernelError::NotFound(format!("action genus '{action_name}'")))?;
                let action_def = self.get_action_def(action_genus_id)?;
                let bindings = action_def.resources.keys().map(|name| (name.clone(), context_res_id)).collect::<BTreeMap<_, _>>();
                match self.execute_action(action_genus_id, bindings, BTreeMap::new()) {
                    ActionOutcome::Ok { action_taken, .. } => {
                        self.store.append(instance_id, &branch, FactType::StepActionExecuted { step_name: step.clone(), action_taken_id: action_taken.to_string() }, None)?;
                        self.store.append(instance_id, &branch, FactType::StepCompleted { step_name: step, result: None }, None)?;
                    }
                    ActionOutcome::Err { error } => {
                        self.store.append(instance_id, &branch, FactType::StepFailed { step_name: step, error }, None)?;
                    }
                }
            }
            ScheduleAction::CompleteGate { step } => {
                self.store.append(instance_id, &branch, FactType::GateEvaluated { step_name: step, passed: true }, None)?;
            }
            ScheduleAction::RunFetchStep { step, attribute } => {
                let context_res_id = self.require_context(instance_id)?;
                let value = self.materialize_entity(context_res_id, None).attributes.get(&attribute).cloned();
                self.store.append(instance_id, &branch, FactType::StepCompleted { step_name: step, result: value }, None)?;
            }
            ScheduleAction::RunBranchStep { step, condition, target } => {
                let context_res_id = self.require_context(instance_id)?;
                let passed = self.materialize_entity(context_res_id, None).attributes.get(&condition).and_then(|v| v.as_bool()).unwrap_or(false);
                self.store.append(instance_id, &branch, FactType::StepCompleted { step_name: step.clone(), result: Some(Json::Bool(passed)) }, None)?;
                if !passed {
                    if let (Some(target), Some(this_step)) = (&target, def.steps.get(&step)) {
                        if let Some(target_step) = def.steps.get(target) {
                            for s in def.steps_in(&this_step.lane) {
                                if s.position > this_step.position && s.position < target_step.position {
                                    self.store.append(instance_id, &branch, FactType::StepSkipped { step_name: s.name.clone() }, None)?;
                                }
                            }
                        }
                    }
                }
            }
            ScheduleAction::CompleteProcess => {
                self.store.append(instance_id, &branch, FactType::ProcessCompleted, None)?;
            }
            ScheduleAction::FailProcess => {
                self.store.append(instance_id, &branch, FactType::ProcessFailed, None)?;
            }
        }
        Ok(())
    }

    fn require_context(&self, instance_id: ResId) -> Result<ResId, KernelError> {
        self.process_instance_state(instance_id).context_res_id.ok_or_else(|| KernelError::SchemaViolation(format!("process instance {instance_id} has no context entity")))
    }

    /// Appends a task entity under the `task` sentinel, tagging it with the
    /// originating process instance in `context_res_ids`.
    fn create_task_entity(&mut self, title: &str, context_res_ids: Vec<ResId>) -> Result<ResId, KernelError> {
        let branch = self.current_branch.clone();
        let genus_id = crate::constants::sentinel_id_for("task").expect("task sentinel is always bootstrapped");
        let task_id = ResId::new();
        self.store.append(task_id, &branch, FactType::Created { genus_id }, None)?;
        self.store.append(task_id, &branch, FactType::AttributeSet { key: "title".into(), value: Json::String(title.to_string()) }, None)?;
        self.store.append(task_id, &branch, FactType::StatusChanged { status: "pending".into() }, None)?;
        let list = context_res_ids.iter().map(|id| Json::String(id.to_string())).collect();
        self.store.append(task_id, &branch, FactType::AttributeSet { key: "context_res_ids".into(), value: Json::Array(list) }, None)?;
        Ok(task_id)
    }

    /// Completes a task and runs the one structural coupling between the
    /// task and process subsystems: every process instance waiting on this
    /// task's step is advanced with the task's result.
    pub fn complete_task(&mut self, task_id: ResId, result: Option<Json>) -> Result<(), KernelError> {
        self.transition_status(task_id, "completed")?;
        if let Some(result) = &result {
            self.set_attribute(task_id, "result", result.clone())?;
        }
        self.task_completion_hook(task_id, result)
    }

    fn task_completion_hook(&mut self, task_id: ResId, result: Option<Json>) -> Result<(), KernelError> {
        let state = self.materialize_entity(task_id, None);
        let Some(Json::Array(context_ids)) = state.attributes.get("context_res_ids").cloned() else {
            return Ok(());
        };
        for context_id in context_ids {
            let Some(instance_id) = context_id.as_str().and_then(ResId::parse) else { continue };
            let Some(genus_id) = self.materialize_entity(instance_id, None).genus_id else { continue };
            let Ok(genus_def) = self.get_genus_def(genus_id) else { continue };
            if genus_def.kind() != GenusKind::Process {
                continue;
            }
            let instance_state = self.process_instance_state(instance_id);
            let Some(step_name) = instance_state.steps.iter().find(|(_, s)| s.task_id == Some(task_id)).map(|(name, _)| name.clone()) else { continue };
            let branch = self.current_branch.clone();
            self.store.append(instance_id, &branch, FactType::StepCompleted { step_name, result: result.clone() }, None)?;
            self.drive_process(instance_id)?;
        }
        Ok(())
    }

    /// Every task entity tagged with `instance_id` in its `context_res_ids`.
    pub fn list_tasks_for_process(&self, instance_id: ResId) -> Vec<ResId> {
        let Some(task_genus) = crate::constants::sentinel_id_for("task") else {
            return Vec::new();
        };
        let needle = instance_id.to_string();
        self.store
            .distinct_entity_ids_for_branch(&self.current_branch)
            .into_iter()
            .filter(|id| {
                let state = self.materialize_entity(*id, None);
                if state.genus_id != Some(task_genus) {
                    return false;
                }
                matches!(state.attributes.get("context_res_ids"), Some(Json::Array(ids)) if ids.iter().any(|v| v.as_str() == Some(needle.as_str())))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_def() -> ProcessDef {
        let mut steps = BTreeMap::new();
        steps.insert(
            "draft".into(),
            StepDef {
                name: "draft".into(),
                lane: "main".into(),
                kind: StepKind::Task,
                position: 0,
                task_title: Some("Write draft".into()),
                action_name: None,
                gate_waits_on: vec![],
                fetch_attribute: None,
                branch_condition: None,
                branch_target: None,
            },
        );
        steps.insert(
            "review".into(),
            StepDef {
                name: "review".into(),
                lane: "main".into(),
                kind: StepKind::Task,
                position: 1,
                task_title: Some("Review draft".into()),
                action_name: None,
                gate_waits_on: vec![],
                fetch_attribute: None,
                branch_condition: None,
                branch_target: None,
            },
        );
        let mut lanes = BTreeMap::new();
        lanes.insert("main".into(), LaneDef { name: "main".into(), position: 0 });
        ProcessDef { lanes, steps, triggers: vec![] }
    }

    #[test]
    fn entry_step_activates_first() {
        let def = linear_def();
        let state = ProcessInstanceState::default();
        let actions = advance_process(&def, &state);
        assert_eq!(
            actions,
            vec![
                ScheduleAction::ActivateStep { step: "draft".into() },
                ScheduleAction::CreateTaskStep { step: "draft".into(), title: "Write draft".into() }
            ]
        );
    }

    #[test]
    fn second_step_unlocks_after_first_completes() {
        let def = linear_def();
        let mut state = ProcessInstanceState::default();
        state.steps.insert("draft".into(), StepInstanceState { status: Some(StepInstanceStatus::Completed), ..Default::default() });
        let actions = advance_process(&def, &state);
        assert_eq!(
            actions,
            vec![
                ScheduleAction::ActivateStep { step: "review".into() },
                ScheduleAction::CreateTaskStep { step: "review".into(), title: "Review draft".into() }
            ]
        );
    }

    #[test]
    fn completes_process_once_every_step_is_terminal() {
        let def = linear_def();
        let mut state = ProcessInstanceState::default();
        state.steps.insert("draft".into(), StepInstanceState { status: Some(StepInstanceStatus::Completed), ..Default::default() });
        state.steps.insert("review".into(), StepInstanceState { status: Some(StepInstanceStatus::Completed), ..Default::default() });
        let actions = advance_process(&def, &state);
        assert_eq!(actions, vec![ScheduleAction::CompleteProcess]);
    }

    #[test]
    fn fails_process_once_a_step_fails_and_nothing_is_active() {
        let def = linear_def();
        let mut state = ProcessInstanceState::default();
        state.steps.insert("draft".into(), StepInstanceState { status: Some(StepInstanceStatus::Failed), ..Default::default() });
        state.steps.insert("review".into(), StepInstanceState { status: Some(StepInstanceStatus::Skipped), ..Default::default() });
        let actions = advance_process(&def, &state);
        assert_eq!(actions, vec![ScheduleAction::FailProcess]);
    }

    #[test]
    fn gate_waits_on_named_predecessor_across_lanes() {
        let mut steps = BTreeMap::new();
        steps.insert(
            "collect".into(),
            StepDef {
                name: "collect".into(),
                lane: "a".into(),
                kind: StepKind::Task,
                position: 0,
                task_title: Some("Collect".into()),
                action_name: None,
                gate_waits_on: vec![],
                fetch_attribute: None,
                branch_condition: None,
                branch_target: None,
            },
        );
        steps.insert(
            "join".into(),
            StepDef {
                name: "join".into(),
                lane: "b".into(),
                kind: StepKind::Gate,
                position: 0,
                task_title: None,
                action_name: None,
                gate_waits_on: vec!["collect".into()],
                fetch_attribute: None,
                branch_condition: None,
                branch_target: None,
            },
        );
        let mut lanes = BTreeMap::new();
        lanes.insert("a".into(), LaneDef { name: "a".into(), position: 0 });
        lanes.insert("b".into(), LaneDef { name: "b".into(), position: 1 });
        let def = ProcessDef { lanes, steps, triggers: vec![] };

        let mut state = ProcessInstanceState::default();
        let actions = advance_process(&def, &state);
        assert!(actions.iter().any(|a| matches!(a, ScheduleAction::CreateTaskStep { step, .. } if step == "collect")));
        assert!(!actions.iter().any(|a| matches!(a, ScheduleAction::CompleteGate { .. })));

        state.steps.insert("collect".into(), StepInstanceState { status: Some(StepInstanceStatus::Completed), ..Default::default() });
        let actions = advance_process(&def, &state);
        assert_eq!(actions, vec![ScheduleAction::ActivateStep { step: "join".into() }, ScheduleAction::CompleteGate { step: "join".into() }]);
    }

    use crate::event::InMemoryStore;
    use crate::genus::GenusSpec;
    use crate::kernel::Kernel;

    fn new_kernel() -> Kernel<InMemoryStore> {
        Kernel::new(InMemoryStore::new()).unwrap()
    }

    /// Scenario S5: a one-lane, one-task-step process creates a task,
    /// `list_tasks` finds it, and completing it drives the process to
    /// `completed` with the step's result recorded.
    #[test]
    fn start_process_creates_task_and_complete_task_drives_to_completion() {
        let mut kernel = new_kernel();
        let entity_genus = kernel.define_entity_genus(GenusSpec { name: "document".into(), ..Default::default() }).unwrap();
        let context = kernel.create_entity(entity_genus, None).unwrap();

        let review = kernel.define_process_genus(GenusSpec { name: "review".into(), ..Default::default() }).unwrap();
        kernel
            .evolve_process_definition(
                review,
                vec![LaneDef { name: "main".into(), position: 0 }],
                vec![StepDef {
                    name: "draft".into(),
                    lane: "main".into(),
                    kind: StepKind::Task,
                    position: 0,
                    task_title: Some("Write draft".into()),
                    action_name: None,
                    gate_waits_on: vec![],
                    fetch_attribute: None,
                    branch_condition: None,
                    branch_target: None,
                }],
                vec![],
            )
            .unwrap();

        let instance = kernel.start_process(review, context).unwrap();
        let tasks = kernel.list_tasks_for_process(instance);
        assert_eq!(tasks.len(), 1);

        kernel.complete_task(tasks[0], Some(Json::String("done".into()))).unwrap();

        let state = kernel.process_instance_state(instance);
        assert_eq!(state.status, ProcessStatus::Completed);
        assert_eq!(state.steps["draft"].status, Some(StepInstanceStatus::Completed));
        assert_eq!(state.steps["draft"].result, Some(Json::String("done".into())));
    }

    /// A lane whose action step fails must not fail the whole process while
    /// a sibling lane still has a pending task — the process stays
    /// `Running`, and only fails once every lane has reached a terminal
    /// step.
    #[test]
    fn process_waits_for_every_lane_before_failing() {
        use crate::action::SideEffect;

        let mut kernel = new_kernel();
        let document = kernel.define_entity_genus(GenusSpec { name: "document".into(), ..Default::default() }).unwrap();
        let context = kernel.create_entity(document, None).unwrap();

        let verify = kernel.define_action_genus(GenusSpec { name: "verify".into(), ..Default::default() }).unwrap();
        kernel
            .evolve_action_handler(verify, vec![("doc".into(), "document".into(), Some("ready".into()))], vec![], Vec::<SideEffect>::new())
            .unwrap();

        let process = kernel.define_process_genus(GenusSpec { name: "pipeline".into(), ..Default::default() }).unwrap();
        kernel
            .evolve_process_definition(
                process,
                vec![LaneDef { name: "a".into(), position: 0 }, LaneDef { name: "b".into(), position: 1 }],
                vec![
                    StepDef {
                        name: "verify_step".into(),
                        lane: "a".into(),
                        kind: StepKind::Action,
                        position: 0,
                        task_title: None,
                        action_name: Some("verify".into()),
                        gate_waits_on: vec![],
                        fetch_attribute: None,
                        branch_condition: None,
                        branch_target: None,
                    },
                    StepDef {
                        name: "draft".into(),
                        lane: "b".into(),
                        kind: StepKind::Task,
                        position: 0,
                        task_title: Some("Write draft".into()),
                        action_name: None,
                        gate_waits_on: vec![],
                        fetch_attribute: None,
                        branch_condition: None,
                        branch_target: None,
                    },
                ],
                vec![],
            )
            .unwrap();

        let instance = kernel.start_process(process, context).unwrap();

        // `verify_step`'s resource never satisfies the required status, so it
        // always fails — but `draft` is still pending in lane "b".
        let state = kernel.process_instance_state(instance);
        assert_eq!(state.steps["verify_step"].status, Some(StepInstanceStatus::Failed));
        assert_eq!(state.status, ProcessStatus::Running, "process must stay running while lane b's task is still pending");

        let tasks = kernel.list_tasks_for_process(instance);
        assert_eq!(tasks.len(), 1);
        kernel.complete_task(tasks[0], Some(Json::String("done".into()))).unwrap();

        let state = kernel.process_instance_state(instance);
        assert_eq!(state.status, ProcessStatus::Failed, "process must fail once every lane has reached a terminal step");
    }

    #[test]
    fn evolve_process_definition_rejects_gate_referencing_undefined_step() {
        let mut kernel = new_kernel();
        let process = kernel.define_process_genus(GenusSpec { name: "pipeline".into(), ..Default::default() }).unwrap();
        let result = kernel.evolve_process_definition(
            process,
            vec![LaneDef { name: "main".into(), position: 0 }],
            vec![StepDef {
                name: "join".into(),
                lane: "main".into(),
                kind: StepKind::Gate,
                position: 0,
                task_title: None,
                action_name: None,
                gate_waits_on: vec!["nonexistent".into()],
                fetch_attribute: None,
                branch_condition: None,
                branch_target: None,
            }],
            vec![],
        );
        assert!(result.is_err());
    }
}
