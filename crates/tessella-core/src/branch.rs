//! Branch-aware materialization, conflict detection, and merge.
//!
//! A branch is a named divergent timeline anchored at a `branch_point`, and
//! merging replays the source branch's facts onto the target inside one
//! transaction. A branch is lightweight — an entity under the `branch`
//! sentinel genus — and materialization walks the parent chain to assemble
//! the fact set a branch would see rather than copying anything at creation
//! time.

use crate::constants::{sentinel_id_for, MAIN_BRANCH};
use crate::errors::KernelError;
use crate::event::{Fact, FactType, Store};
use crate::kernel::Kernel;
use crate::materializer::{fold_entity, EntityState};
use serde_json::Value as Json;
use tessella_domain::{FactId, ResId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchStatus {
    Active,
    Merged,
    Discarded,
}

impl BranchStatus {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "merged" => Some(Self::Merged),
            "discarded" => Some(Self::Discarded),
            _ => None,
        }
    }
}

/// Materialized shape of a branch entity.
#[derive(Debug, Clone)]
pub struct BranchInfo {
    pub res_id: ResId,
    pub name: String,
    pub parent: Option<String>,
    pub branch_point: FactId,
    pub status: BranchStatus,
}

impl<S: Store> Kernel<S> {
    /// Collects the fact set a branch would see at `up_to` (inclusive),
    /// walking the parent chain up to `"main"`. `"main"` itself has no
    /// parent and is the base case: plain per-branch facts, id-filtered.
    pub fn collect_tessellae(&self, res_id: ResId, branch: &str, up_to: Option<FactId>) -> Vec<Fact> {
        let mut facts = if branch == MAIN_BRANCH {
            self.store.list(res_id, MAIN_BRANCH)
        } else {
            let chain = self.branch_chain(branch);
            let earliest_point = chain.last().map(|b| b.branch_point).unwrap_or(0);
            let mut out: Vec<Fact> = self.store.list(res_id, MAIN_BRANCH).into_iter().filter(|f| f.id <= earliest_point).collect();
            for b in chain.iter().rev() {
                out.extend(self.store.list(res_id, &b.name));
            }
            out
        };
        if let Some(limit) = up_to {
            facts.retain(|f| f.id <= limit);
        }
        facts.sort_by_key(|f| f.id);
        facts
    }

    /// Materializes `res_id` on `branch` (defaults to the kernel's current
    /// branch), folding its branch-aware fact set through the default
    /// entity reducer.
    pub fn materialize_entity(&self, res_id: ResId, branch: Option<&str>) -> EntityState {
        let branch = branch.unwrap_or(&self.current_branch);
        let facts = self.collect_tessellae(res_id, branch, None);
        facts.iter().fold(EntityState::default(), |s, f| fold_entity(s, f))
    }

    /// The chain of ancestor branches from `branch` up to (but excluding)
    /// `"main"`, ordered nearest-first.
    fn branch_chain(&self, branch: &str) -> Vec<BranchInfo> {
        let mut chain = Vec::new();
        let mut current = branch.to_string();
        loop {
            let Some(info) = self.find_branch(&current) else { break };
            let parent = info.parent.clone();
            chain.push(info);
            match parent {
                Some(p) if p != MAIN_BRANCH => current = p,
                _ => break,
            }
        }
        chain
    }

    fn find_branch(&self, name: &str) -> Option<BranchInfo> {
        let branch_genus = sentinel_id_for("branch")?;
        for entity_id in self.store.distinct_entity_ids_on(MAIN_BRANCH) {
            let state = self.materialize_entity(entity_id, Some(MAIN_BRANCH));
            if state.genus_id != Some(branch_genus) {
                continue;
            }
            let Some(Json::String(entity_name)) = state.attributes.get("name") else { continue };
            if entity_name != name {
                continue;
            }
            let parent = state.attributes.get("parent").and_then(|v| v.as_str()).map(String::from);
            let branch_point = state.attributes.get("branch_point").and_then(|v| v.as_u64()).unwrap_or(0);
            let status = state.status.as_deref().and_then(BranchStatus::parse).unwrap_or(BranchStatus::Active);
            return Some(BranchInfo { res_id: entity_id, name: entity_name.clone(), parent, branch_point, status });
        }
        None
    }

    /// Creates a new branch off `parent` (defaults to `"main"`), anchored at
    /// the current max fact id.
    pub fn create_branch(&mut self, name: &str, parent: Option<&str>) -> Result<ResId, KernelError> {
        if self.find_branch(name).is_some() || name == MAIN_BRANCH {
            return Err(KernelError::SchemaViolation(format!("branch '{name}' already exists")));
        }
        let parent_name = parent.unwrap_or(MAIN_BRANCH).to_string();
        if parent_name != MAIN_BRANCH && self.find_branch(&parent_name).is_none() {
            return Err(KernelError::BranchUnknown(parent_name));
        }
        let branch_point = self.store.max_fact_id();
        let id = ResId::new();
        let branch_genus = sentinel_id_for("branch").expect("branch sentinel is always bootstrapped");
        self.store.append(id, MAIN_BRANCH, FactType::Created { genus_id: branch_genus }, None)?;
        self.store.append(id, MAIN_BRANCH, FactType::AttributeSet { key: "name".into(), value: Json::String(name.to_string()) }, None)?;
        self.store.append(id, MAIN_BRANCH, FactType::AttributeSet { key: "parent".into(), value: Json::String(parent_name) }, None)?;
        self.store.append(id, MAIN_BRANCH, FactType::AttributeSet { key: "branch_point".into(), value: Json::from(branch_point) }, None)?;
        self.store.append(id, MAIN_BRANCH, FactType::StatusChanged { status: "active".into() }, None)?;
        Ok(id)
    }

    /// Changes the kernel's session-level current branch. All subsequent
    /// operations on this kernel default to it.
    pub fn switch_branch(&mut self, name: &str) -> Result<(), KernelError> {
        if name != MAIN_BRANCH {
            let info = self.find_branch(name).ok_or_else(|| KernelError::BranchUnknown(name.to_string()))?;
            if info.status != BranchStatus::Active {
                return Err(KernelError::BranchInactive(name.to_string()));
            }
        }
        self.current_branch = name.to_string();
        Ok(())
    }

    /// One entry per entity that has facts on both `source` (with id greater
    /// than `source`'s branch point) and `target` with an id greater than
    /// that same branch point — i.e. both sides mutated the same entity
    /// after the branch diverged.
    pub fn detect_conflicts(&self, source: &str, target: &str) -> Result<Vec<MergeConflict>, KernelError> {
        let source_info = self.find_branch(source).ok_or_else(|| KernelError::BranchUnknown(source.to_string()))?;
        let mut conflicts = Vec::new();
        for entity_id in self.store.distinct_entity_ids_for_branch(source) {
            let source_facts = self.store.list(entity_id, source);
            if source_facts.is_empty() {
                continue;
            }
            let target_facts_after = self.collect_tessellae(entity_id, target, None).into_iter().filter(|f| f.id > source_info.branch_point).count();
            if target_facts_after > 0 {
                conflicts.push(MergeConflict {
                    res_id: entity_id,
                    source_state: self.materialize_entity(entity_id, Some(source)),
                    target_state: self.materialize_entity(entity_id, Some(target)),
                });
            }
        }
        Ok(conflicts)
    }

    /// Copies every fact on `source` onto `target` in id order, tagging the
    /// source, preserving original timestamps, and reassigning fact ids via
    /// the normal monotonic counter. This reassignment means
    /// `materialize(..., up_to)` on `target` after merge cannot recover the
    /// pre-merge point-in-time state by id — an accepted tradeoff.
    pub fn merge_branch(&mut self, source: &str, target: Option<&str>, force: bool) -> Result<MergeOutcome, KernelError> {
        let target = target.unwrap_or(MAIN_BRANCH).to_string();
        if !force {
            let conflicts = self.detect_conflicts(source, &target)?;
            if !conflicts.is_empty() {
                return Ok(MergeOutcome::Conflicted { conflicts });
            }
        }
        let mut entities = self.store.distinct_entity_ids_for_branch(source);
        entities.sort();
        let mut all_source_facts: Vec<Fact> = entities.iter().flat_map(|id| self.store.list(*id, source)).collect();
        all_source_facts.sort_by_key(|f| f.id);

        let source_tag = format!("merge:{source}");
        let mut copied = 0usize;
        for fact in &all_source_facts {
            self.store.append_with_timestamp(fact.res_id, &target, fact.fact_type.clone(), Some(source_tag.clone()), fact.created_at)?;
            copied += 1;
        }

        for entity_id in &entities {
            self.rebuild_relationship_index_for(*entity_id, &target);
        }

        if let Some(branch_entity) = self.find_branch(source) {
            self.store.append(branch_entity.res_id, MAIN_BRANCH, FactType::StatusChanged { status: "merged".into() }, None)?;
        }

        Ok(MergeOutcome::Merged { tessellae_copied: copied })
    }

    /// Tombstones the source branch's index rows for `entity_id` then
    /// re-derives the relationship-member index for `target` from the
    /// merged fact stream.
    fn rebuild_relationship_index_for(&mut self, entity_id: ResId, target: &str) {
        self.relationship_index.clear_relationship(entity_id, target);
        let state = self.materialize_entity(entity_id, Some(target));
        for (role, members) in &state.members {
            for member in members {
                if let Some(member_id) = ResId::parse(member) {
                    self.relationship_index.add(member_id, entity_id, role, target);
                }
            }
        }
    }

    /// Transitions the source branch entity to `discarded`. Irreversible.
    pub fn discard_branch(&mut self, name: &str) -> Result<(), KernelError> {
        let info = self.find_branch(name).ok_or_else(|| KernelError::BranchUnknown(name.to_string()))?;
        self.store.append(info.res_id, MAIN_BRANCH, FactType::StatusChanged { status: "discarded".into() }, None)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MergeConflict {
    pub res_id: ResId,
    pub source_state: EntityState,
    pub target_state: EntityState,
}

#[derive(Debug, Clone)]
pub enum MergeOutcome {
    Merged { tessellae_copied: usize },
    Conflicted { conflicts: Vec<MergeConflict> },
}

impl MergeOutcome {
    pub fn merged(&self) -> bool {
        matches!(self, MergeOutcome::Merged { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::InMemoryStore;
    use crate::genus::GenusSpec;

    fn new_kernel() -> Kernel<InMemoryStore> {
        Kernel::new(InMemoryStore::new()).unwrap()
    }

    #[test]
    fn branch_facts_do_not_leak_into_main() {
        let mut kernel = new_kernel();
        let genus = kernel.define_entity_genus(GenusSpec { name: "server".into(), ..Default::default() }).unwrap();
        let e = kernel.create_entity(genus, None).unwrap();
        kernel.create_branch("b1", None).unwrap();
        kernel.switch_branch("b1").unwrap();
        kernel.set_attribute(e, "tag", Json::String("on-branch".into())).unwrap();
        assert!(kernel.materialize_entity(e, Some(MAIN_BRANCH)).attributes.get("tag").is_none());
        assert_eq!(kernel.materialize_entity(e, Some("b1")).attributes.get("tag"), Some(&Json::String("on-branch".into())));
    }

    #[test]
    fn detect_conflicts_flags_entities_mutated_on_both_sides() {
        let mut kernel = new_kernel();
        let genus = kernel.define_entity_genus(GenusSpec { name: "server".into(), ..Default::default() }).unwrap();
        let e = kernel.create_entity(genus, None).unwrap();
        kernel.create_branch("b1", None).unwrap();
        kernel.switch_branch("b1").unwrap();
        kernel.set_attribute(e, "ip", Json::String("10.0.0.9".into())).unwrap();
        kernel.switch_branch(MAIN_BRANCH).unwrap();
        kernel.set_attribute(e, "tag", Json::String("prod".into())).unwrap();
        let conflicts = kernel.detect_conflicts("b1", MAIN_BRANCH).unwrap();
        assert_eq!(conflicts.len(), 1);
    }

    #[test]
    fn merge_combines_both_sides_last_write_wins_per_key() {
        let mut kernel = new_kernel();
        let genus = kernel.define_entity_genus(GenusSpec { name: "server".into(), ..Default::default() }).unwrap();
        let e = kernel.create_entity(genus, None).unwrap();
        kernel.create_branch("b1", None).unwrap();
        kernel.switch_branch("b1").unwrap();
        kernel.set_attribute(e, "ip", Json::String("10.0.0.9".into())).unwrap();
        kernel.switch_branch(MAIN_BRANCH).unwrap();
        kernel.set_attribute(e, "tag", Json::String("prod".into())).unwrap();
        let outcome = kernel.merge_branch("b1", Some(MAIN_BRANCH), true).unwrap();
        assert!(outcome.merged());
        let state = kernel.materialize_entity(e, Some(MAIN_BRANCH));
        assert_eq!(state.attributes.get("ip"), Some(&Json::String("10.0.0.9".into())));
        assert_eq!(state.attributes.get("tag"), Some(&Json::String("prod".into())));
    }
}
