//! The `Store` trait and an in-memory reference implementation.
//!
//! `append` returns the assigned sequence number, `list` replays in append
//! order. `tessella-persistence::PgStore` implements the same trait against
//! Postgres.

use super::types::{Fact, FactType};
use crate::errors::KernelError;
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use std::collections::HashMap;
use tessella_domain::{FactId, ResId};

/// `input.type`: `Push` is an action invocation; `Pull` is
/// reserved for the not-yet-built sync/import path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Push,
    Pull,
}

/// One row of the `action_taken` audit table.
#[derive(Debug, Clone)]
pub struct ActionTakenRecord {
    pub id: u64,
    pub action_genus_id: ResId,
    pub input_id: u64,
    pub resources: Json,
    pub params: Json,
    pub tessellae_ids: Vec<FactId>,
    pub branch_id: String,
    pub created_at: DateTime<Utc>,
}

/// Durable fact log, keyed by entity and branch.
///
/// Single-threaded cooperative model: no method here is async and no
/// implementation may block on anything but I/O local to the call.
pub trait Store {
    /// Appends one fact to `res_id`'s stream on `branch_id`, returning the
    /// globally assigned fact id.
    fn append(&mut self, res_id: ResId, branch_id: &str, fact_type: FactType, source: Option<String>) -> Result<FactId, KernelError>;

    /// Like `append`, but the caller supplies the timestamp rather than
    /// having the store stamp "now" — used by `merge_branch` to preserve a
    /// copied fact's original `created_at` while still drawing a fresh id
    /// from the monotonic counter.
    fn append_with_timestamp(
        &mut self,
        res_id: ResId,
        branch_id: &str,
        fact_type: FactType,
        source: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<FactId, KernelError>;

    /// All facts for `res_id` on `branch_id`, in append order. Does not walk
    /// parent branches; branch-aware collection is `Kernel::collect_tessellae`.
    fn list(&self, res_id: ResId, branch_id: &str) -> Vec<Fact>;

    /// Every fact ever appended for `res_id`, across all branches, in global
    /// order. Used by merge to reassign fact ids.
    fn list_all_branches(&self, res_id: ResId) -> Vec<Fact>;

    /// Every distinct entity id that has at least one fact on `branch_id`.
    fn distinct_entity_ids_for_branch(&self, branch_id: &str) -> Vec<ResId>;

    /// Every distinct entity id that has at least one fact anywhere (used by
    /// branch lookup, which always resides on `"main"`).
    fn distinct_entity_ids_on(&self, branch_id: &str) -> Vec<ResId> {
        self.distinct_entity_ids_for_branch(branch_id)
    }

    /// The highest fact id assigned so far, across every entity and branch;
    /// the branch point for a branch created right now.
    fn max_fact_id(&self) -> FactId;

    /// Does any fact exist for `res_id` on `branch_id`?
    fn exists(&self, res_id: ResId, branch_id: &str) -> bool {
        !self.list(res_id, branch_id).is_empty()
    }

    /// Records one `input` audit row before an action's bindings are
    /// validated, returning its assigned id.
    fn record_input(&mut self, kind: InputKind, source: Option<String>, data: Json, branch_id: &str) -> u64;

    /// Records one `action_taken` audit row once every side effect has
    /// committed, returning its assigned id.
    #[allow(clippy::too_many_arguments)]
    fn record_action_taken(
        &mut self,
        action_genus_id: ResId,
        input_id: u64,
        resources: Json,
        params: Json,
        tessellae_ids: Vec<FactId>,
        branch_id: &str,
    ) -> u64;

    /// Records one `serialization_run` audit row once every `FileOp` in a
    /// serialization handler has been evaluated, returning its assigned
    /// id.
    #[allow(clippy::too_many_arguments)]
    fn record_serialization_run(
        &mut self,
        target_genus_id: ResId,
        direction: &str,
        entity_ids: Json,
        output_path: Option<String>,
        tessellae_created: Vec<FactId>,
        branch_id: &str,
    ) -> u64;
}

/// Reference `Store` used by unit and scenario tests. Not used in
/// production; `tessella-persistence::PgStore` is the durable backend.
#[derive(Default)]
pub struct InMemoryStore {
    next_id: FactId,
    facts: HashMap<ResId, Vec<Fact>>,
    next_input_id: u64,
    next_action_taken_id: u64,
    actions_taken: Vec<ActionTakenRecord>,
    next_serialization_run_id: u64,
    serialization_runs: Vec<SerializationRunRecord>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            facts: HashMap::new(),
            next_input_id: 1,
            next_action_taken_id: 1,
            actions_taken: Vec::new(),
            next_serialization_run_id: 1,
            serialization_runs: Vec::new(),
        }
    }

    /// Every `action_taken` row recorded so far, in id order. Exposed for
    /// tests and diagnostics; production code reads through `Kernel`.
    pub fn actions_taken(&self) -> &[ActionTakenRecord] {
        &self.actions_taken
    }

    /// Every `serialization_run` row recorded so far, in id order.
    pub fn serialization_runs(&self) -> &[SerializationRunRecord] {
        &self.serialization_runs
    }
}

/// One row of the `serialization_run` audit table.
#[derive(Debug, Clone)]
pub struct SerializationRunRecord {
    pub id: u64,
    pub target_genus_id: ResId,
    pub direction: String,
    pub entity_ids: Json,
    pub output_path: Option<String>,
    pub tessellae_created: Vec<FactId>,
    pub branch_id: String,
    pub created_at: DateTime<Utc>,
}

impl Store for InMemoryStore {
    fn append(&mut self, res_id: ResId, branch_id: &str, fact_type: FactType, source: Option<String>) -> Result<FactId, KernelError> {
        self.append_with_timestamp(res_id, branch_id, fact_type, source, chrono::Utc::now())
    }

    fn append_with_timestamp(
        &mut self,
        res_id: ResId,
        branch_id: &str,
        fact_type: FactType,
        source: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<FactId, KernelError> {
        let id = self.next_id;
        self.next_id += 1;
        let fact = Fact { id, res_id, branch_id: branch_id.to_string(), fact_type, created_at, source };
        self.facts.entry(res_id).or_default().push(fact);
        Ok(id)
    }

    fn list(&self, res_id: ResId, branch_id: &str) -> Vec<Fact> {
        self.facts.get(&res_id).map(|v| v.iter().filter(|f| f.branch_id == branch_id).cloned().collect()).unwrap_or_default()
    }

    fn list_all_branches(&self, res_id: ResId) -> Vec<Fact> {
        self.facts.get(&res_id).cloned().unwrap_or_default()
    }

    fn distinct_entity_ids_for_branch(&self, branch_id: &str) -> Vec<ResId> {
        self.facts.iter().filter(|(_, facts)| facts.iter().any(|f| f.branch_id == branch_id)).map(|(id, _)| *id).collect()
    }

    fn max_fact_id(&self) -> FactId {
        self.next_id.saturating_sub(1)
    }

    fn record_input(&mut self, _kind: InputKind, _source: Option<String>, _data: Json, _branch_id: &str) -> u64 {
        let id = self.next_input_id;
        self.next_input_id += 1;
        id
    }

    fn record_action_taken(
        &mut self,
        action_genus_id: ResId,
        input_id: u64,
        resources: Json,
        params: Json,
        tessellae_ids: Vec<FactId>,
        branch_id: &str,
    ) -> u64 {
        let id = self.next_action_taken_id;
        self.next_action_taken_id += 1;
        self.actions_taken.push(ActionTakenRecord {
            id,
            action_genus_id,
            input_id,
            resources,
            params,
            tessellae_ids,
            branch_id: branch_id.to_string(),
            created_at: chrono::Utc::now(),
        });
        id
    }

    fn record_serialization_run(
        &mut self,
        target_genus_id: ResId,
        direction: &str,
        entity_ids: Json,
        output_path: Option<String>,
        tessellae_created: Vec<FactId>,
        branch_id: &str,
    ) -> u64 {
        let id = self.next_serialization_run_id;
        self.next_serialization_run_id += 1;
        self.serialization_runs.push(SerializationRunRecord {
            id,
            target_genus_id,
            direction: direction.to_string(),
            entity_ids,
            output_path,
            tessellae_created,
            branch_id: branch_id.to_string(),
            created_at: chrono::Utc::now(),
        });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_increasing_ids() {
        let mut store = InMemoryStore::new();
        let res = ResId::new();
        let a = store.append(res, "main", FactType::Created { genus_id: ResId::new() }, None).unwrap();
        let b = store.append(res, "main", FactType::StatusChanged { status: "active".into() }, None).unwrap();
        assert!(b > a);
    }

    #[test]
    fn list_is_branch_scoped() {
        let mut store = InMemoryStore::new();
        let res = ResId::new();
        store.append(res, "main", FactType::Created { genus_id: ResId::new() }, None).unwrap();
        store.append(res, "feature/x", FactType::StatusChanged { status: "active".into() }, None).unwrap();
        assert_eq!(store.list(res, "main").len(), 1);
        assert_eq!(store.list(res, "feature/x").len(), 1);
        assert_eq!(store.list_all_branches(res).len(), 2);
    }
}
