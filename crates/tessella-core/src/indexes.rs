//! Derived, in-memory indexes the kernel keeps alongside the fact log
//! None of these are authoritative: every
//! entry can be rebuilt by replaying facts, and `Kernel::new` does exactly
//! that rather than trusting a snapshot.

use std::collections::BTreeMap;
use tessella_domain::{GenusKind, ResId};

/// Case-insensitive `(kind, name) -> genus id` lookup, maintained as genus
/// definitions are created; name matching is case-insensitive at
/// definition time.
#[derive(Debug, Default, Clone)]
pub struct GenusIndex {
    by_kind_and_name: BTreeMap<(GenusKind, String), ResId>,
}

impl GenusIndex {
    fn key(kind: GenusKind, name: &str) -> (GenusKind, String) {
        (kind, name.to_lowercase())
    }

    pub fn insert(&mut self, kind: GenusKind, name: &str, id: ResId) {
        self.by_kind_and_name.insert(Self::key(kind, name), id);
    }

    pub fn get(&self, kind: GenusKind, name: &str) -> Option<ResId> {
        self.by_kind_and_name.get(&Self::key(kind, name)).copied()
    }

    pub fn contains(&self, kind: GenusKind, name: &str) -> bool {
        self.by_kind_and_name.contains_key(&Self::key(kind, name))
    }
}

/// Reverse lookup from a member entity to every relationship it belongs to,
/// by role and branch, keyed by `(relationship_id, role, entity_id,
/// branch_id)`. Branch-scoped so facts on branch `b` never leak a
/// membership into `"main"`'s view of the same entity. Rebuilt by merge
/// when relationship fact ids are reassigned onto the target branch.
#[derive(Debug, Default, Clone)]
pub struct RelationshipMemberIndex {
    by_entity: BTreeMap<(ResId, String), Vec<(ResId, String)>>,
}

impl RelationshipMemberIndex {
    pub fn add(&mut self, entity_id: ResId, relationship_id: ResId, role: &str, branch_id: &str) {
        let entry = self.by_entity.entry((entity_id, branch_id.to_string())).or_default();
        if !entry.iter().any(|(r, role_name)| *r == relationship_id && role_name == role) {
            entry.push((relationship_id, role.to_string()));
        }
    }

    pub fn remove(&mut self, entity_id: ResId, relationship_id: ResId, role: &str, branch_id: &str) {
        if let Some(entry) = self.by_entity.get_mut(&(entity_id, branch_id.to_string())) {
            entry.retain(|(r, role_name)| !(*r == relationship_id && role_name == role));
        }
    }

    pub fn relationships_for(&self, entity_id: ResId, branch_id: &str) -> &[(ResId, String)] {
        self.by_entity.get(&(entity_id, branch_id.to_string())).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn clear_relationship(&mut self, relationship_id: ResId, branch_id: &str) {
        for (key, entries) in self.by_entity.iter_mut() {
            if key.1 == branch_id {
                entries.retain(|(r, _)| *r != relationship_id);
            }
        }
    }
}
