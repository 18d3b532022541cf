//! Typed entity, feature, and relationship operations.
//!
//! Every operation here validates its input against a schema (the genus)
//! before appending facts — validate, then commit.

use crate::errors::KernelError;
use crate::event::{FactType, Store};
use crate::kernel::Kernel;
use serde_json::Value as Json;
use std::collections::{BTreeMap, VecDeque};
use tessella_domain::{Cardinality, GenusDef, ResId};

impl<S: Store> Kernel<S> {
    /// Creates an entity of `genus_id` on `branch` (defaults to the
    /// kernel's current branch). Appends `created`, then a `status_changed`
    /// to the genus's initial state if one is defined.
    pub fn create_entity(&mut self, genus_id: ResId, branch: Option<&str>) -> Result<ResId, KernelError> {
        let def = self.get_genus_def(genus_id)?;
        self.reject_deprecated_or_archived(&def)?;
        let branch = branch.unwrap_or(&self.current_branch).to_string();
        let id = ResId::new();
        self.store.append(id, &branch, FactType::Created { genus_id }, None)?;
        if let Some(initial) = def.initial_state() {
            self.store.append(id, &branch, FactType::StatusChanged { status: initial.to_string() }, None)?;
        }
        Ok(id)
    }

    pub(crate) fn reject_deprecated_or_archived(&self, def: &GenusDef) -> Result<(), KernelError> {
        if def.deprecated() {
            return Err(KernelError::GenusDeprecated(def.name().unwrap_or_default().to_string()));
        }
        if let Some(taxonomy_id) = def.taxonomy_id().and_then(ResId::parse) {
            if Some(taxonomy_id) != crate::constants::sentinel_id_for("taxonomy") {
                let state = self.materialize_entity(taxonomy_id, None);
                if state.status.as_deref() == Some("archived") {
                    return Err(KernelError::TaxonomyArchived(taxonomy_id.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Looks up `entity_id`'s own genus, recorded on its `created` fact —
    /// every entity belongs to exactly one genus, fixed at creation.
    /// Entities materialized with no facts at all have no genus.
    fn genus_of(&self, entity_id: ResId) -> Result<ResId, KernelError> {
        self.materialize_entity(entity_id, None).genus_id.ok_or_else(|| KernelError::NotFound(format!("entity {entity_id}")))
    }

    pub fn set_attribute(&mut self, entity_id: ResId, key: &str, value: Json) -> Result<(), KernelError> {
        let def = self.get_genus_def(self.genus_of(entity_id)?)?;
        let attr = def.attributes.get(key).ok_or_else(|| KernelError::UnknownAttribute(key.to_string()))?;
        if !attr.attr_type.matches(&value) {
            return Err(KernelError::TypeMismatch { attribute: key.to_string(), expected: attr.attr_type.as_str().to_string(), actual: value_kind(&value).to_string() });
        }
        self.store.append(entity_id, &self.current_branch.clone(), FactType::AttributeSet { key: key.to_string(), value }, None)?;
        Ok(())
    }

    pub fn remove_attribute(&mut self, entity_id: ResId, key: &str) -> Result<(), KernelError> {
        self.store.append(entity_id, &self.current_branch.clone(), FactType::AttributeRemoved { key: key.to_string() }, None)?;
        Ok(())
    }

    /// Transitions `entity_id` to `target`, requiring a transition from its
    /// current status to exist on its own genus. On failure
    /// the error names the valid next states from the current one.
    pub fn transition_status(&mut self, entity_id: ResId, target: &str) -> Result<(), KernelError> {
        let def = self.get_genus_def(self.genus_of(entity_id)?)?;
        let state = self.materialize_entity(entity_id, None);
        let current = state.status.ok_or_else(|| KernelError::InvalidTransition { from: "<none>".into(), to: target.into(), valid_targets: String::new() })?;
        if !def.states.contains_key(target) {
            return Err(KernelError::SchemaViolation(format!("undefined state '{target}'")));
        }
        if !def.has_transition(&current, target) {
            let valid: Vec<&str> = def.transitions_from(&current).collect();
            return Err(KernelError::InvalidTransition { from: current, to: target.into(), valid_targets: valid.join(", ") });
        }
        self.store.append(entity_id, &self.current_branch.clone(), FactType::StatusChanged { status: target.to_string() }, None)?;
        Ok(())
    }

    /// Breadth-first search over the transition graph from `from` to `to`;
    /// a read-only helper the engine never invokes itself — nothing here
    /// auto-walks a multi-step path.
    pub fn find_transition_path(def: &GenusDef, from: &str, to: &str) -> Option<Vec<String>> {
        if from == to {
            return Some(vec![from.to_string()]);
        }
        let mut visited = std::collections::HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(vec![from.to_string()]);
        visited.insert(from.to_string());
        while let Some(path) = queue.pop_front() {
            let last = path.last().unwrap().clone();
            for next in def.transitions_from(&last) {
                if next == to {
                    let mut full = path.clone();
                    full.push(next.to_string());
                    return Some(full);
                }
                if visited.insert(next.to_string()) {
                    let mut extended = path.clone();
                    extended.push(next.to_string());
                    queue.push_back(extended);
                }
            }
        }
        None
    }

    /// Creates a feature sub-entity inside `parent`'s own fact stream.
    /// `feature_genus_def.meta["parent_genus_name"]` must match
    /// `parent_genus_name` (the parent entity's own genus name).
    pub fn create_feature(
        &mut self,
        parent: ResId,
        parent_genus_name: &str,
        feature_genus_id: ResId,
        attributes: BTreeMap<String, Json>,
    ) -> Result<String, KernelError> {
        let def = self.get_genus_def(feature_genus_id)?;
        if let Some(expected) = def.meta.get("parent_genus_name").and_then(|v| v.as_str()) {
            if !expected.eq_ignore_ascii_case(parent_genus_name) {
                return Err(KernelError::SchemaViolation(format!("feature genus expects parent '{expected}', got '{parent_genus_name}'")));
            }
        }
        for key in attributes.keys() {
            if !def.attributes.contains_key(key) {
                return Err(KernelError::UnknownAttribute(key.clone()));
            }
        }
        for (name, attr) in &def.attributes {
            if attr.required && !attributes.contains_key(name) && attr.default.is_none() {
                return Err(KernelError::SchemaViolation(format!("missing required feature attribute '{name}'")));
            }
        }
        let feature_id = ResId::new().to_string();
        let branch = self.current_branch.clone();
        self.store.append(parent, &branch, FactType::FeatureCreated { feature_id: feature_id.clone(), genus_id: feature_genus_id }, None)?;
        if let Some(initial) = def.initial_state() {
            self.store.append(parent, &branch, FactType::FeatureStatusChanged { feature_id: feature_id.clone(), status: initial.to_string() }, None)?;
        }
        for (key, value) in attributes {
            self.store.append(parent, &branch, FactType::FeatureAttributeSet { feature_id: feature_id.clone(), key, value }, None)?;
        }
        Ok(feature_id)
    }

    /// Requires the parent's current status to be in
    /// `editable_parent_statuses` when that meta key is present.
    fn check_editable(&self, parent: ResId, feature_genus_id: ResId) -> Result<(), KernelError> {
        let def = self.get_genus_def(feature_genus_id)?;
        if let Some(Json::Array(allowed)) = def.meta.get("editable_parent_statuses") {
            let parent_status = self.materialize_entity(parent, None).status;
            let ok = parent_status.as_deref().map(|s| allowed.iter().any(|v| v.as_str() == Some(s))).unwrap_or(false);
            if !ok {
                return Err(KernelError::SchemaViolation("parent is not in an editable status for this feature".into()));
            }
        }
        Ok(())
    }

    pub fn set_feature_attribute(
        &mut self,
        parent: ResId,
        feature_id: &str,
        feature_genus_id: ResId,
        key: &str,
        value: Json,
    ) -> Result<(), KernelError> {
        self.check_editable(parent, feature_genus_id)?;
        let def = self.get_genus_def(feature_genus_id)?;
        let attr = def.attributes.get(key).ok_or_else(|| KernelError::UnknownAttribute(key.to_string()))?;
        if !attr.attr_type.matches(&value) {
            return Err(KernelError::TypeMismatch { attribute: key.to_string(), expected: attr.attr_type.as_str().to_string(), actual: value_kind(&value).to_string() });
        }
        let branch = self.current_branch.clone();
        self.store.append(parent, &branch, FactType::FeatureAttributeSet { feature_id: feature_id.to_string(), key: key.to_string(), value }, None)?;
        Ok(())
    }

    pub fn transition_feature_status(
        &mut self,
        parent: ResId,
        feature_id: &str,
        feature_genus_id: ResId,
        target: &str,
    ) -> Result<(), KernelError> {
        self.check_editable(parent, feature_genus_id)?;
        let def = self.get_genus_def(feature_genus_id)?;
        let state = self.materialize_entity(parent, None);
        let current = state.features.get(feature_id).and_then(|f| f.status.clone());
        let current = current.ok_or_else(|| KernelError::InvalidTransition { from: "<none>".into(), to: target.into(), valid_targets: String::new() })?;
        if !def.has_transition(&current, target) {
            let valid: Vec<&str> = def.transitions_from(&current).collect();
            return Err(KernelError::InvalidTransition { from: current, to: target.into(), valid_targets: valid.join(", ") });
        }
        let branch = self.current_branch.clone();
        self.store.append(parent, &branch, FactType::FeatureStatusChanged { feature_id: feature_id.to_string(), status: target.to_string() }, None)?;
        Ok(())
    }

    /// Creates a relationship entity with an initial membership map,
    /// validating every role's cardinality and member genus against the
    /// relationship genus.
    pub fn create_relationship(
        &mut self,
        genus_id: ResId,
        members: BTreeMap<String, Vec<ResId>>,
        attributes: BTreeMap<String, Json>,
    ) -> Result<ResId, KernelError> {
        let def = self.get_genus_def(genus_id)?;
        self.reject_deprecated_or_archived(&def)?;
        for (role, role_def) in &def.roles {
            let count = members.get(role).map(|v| v.len()).unwrap_or(0);
            if !role_def.cardinality.allows(count) {
                return Err(KernelError::CardinalityViolation { role: role.clone(), reason: format!("{count} members does not satisfy {role_def:?}") });
            }
        }
        for role in members.keys() {
            if !def.roles.contains_key(role) {
                return Err(KernelError::SchemaViolation(format!("undefined role '{role}'")));
            }
        }
        for (role, entity_ids) in &members {
            let role_def = &def.roles[role];
            for entity_id in entity_ids {
                self.validate_member_genus(*entity_id, role, role_def)?;
            }
        }
        for (name, attr) in &def.attributes {
            if attr.required && !attributes.contains_key(name) && attr.default.is_none() {
                return Err(KernelError::SchemaViolation(format!("missing required attribute '{name}'")));
            }
        }

        let id = ResId::new();
        let branch = self.current_branch.clone();
        self.store.append(id, &branch, FactType::Created { genus_id }, None)?;
        if let Some(initial) = def.initial_state() {
            self.store.append(id, &branch, FactType::StatusChanged { status: initial.to_string() }, None)?;
        }
        for (key, value) in attributes {
            self.store.append(id, &branch, FactType::AttributeSet { key, value }, None)?;
        }
        for (role, entity_ids) in members {
            for entity_id in entity_ids {
                self.store.append(id, &branch, FactType::MemberAdded { role: role.clone(), entity_id }, None)?;
                self.relationship_index.add(entity_id, id, &role, &branch);
            }
        }
        Ok(id)
    }

    /// Requires `entity_id`'s own genus name to appear (case-insensitively)
    /// in `role_def.valid_member_genera`, unless that list is empty — an
    /// empty list means the role imposes no genus restriction.
    fn validate_member_genus(&self, entity_id: ResId, role: &str, role_def: &tessella_domain::RoleDef) -> Result<(), KernelError> {
        if role_def.valid_member_genera.is_empty() {
            return Ok(());
        }
        let member_genus_id = self.genus_of(entity_id)?;
        let member_genus_def = self.get_genus_def(member_genus_id)?;
        let member_genus_name = member_genus_def.name().unwrap_or_default();
        let allowed = role_def.valid_member_genera.iter().any(|g| g.eq_ignore_ascii_case(member_genus_name));
        if !allowed {
            return Err(KernelError::CardinalityViolation {
                role: role.to_string(),
                reason: format!("genus '{member_genus_name}' is not a valid member of role '{role}' (expects one of {:?})", role_def.valid_member_genera),
            });
        }
        Ok(())
    }

    pub fn add_member(&mut self, relationship_id: ResId, role: &str, entity_id: ResId) -> Result<(), KernelError> {
        let def = self.get_genus_def(self.genus_of(relationship_id)?)?;
        let role_def = def.roles.get(role).ok_or_else(|| KernelError::SchemaViolation(format!("undefined role '{role}'")))?;
        self.validate_member_genus(entity_id, role, role_def)?;
        let state = self.materialize_entity(relationship_id, None);
        let count = state.members.get(role).map(|v| v.len()).unwrap_or(0);
        if !role_def.cardinality.allows(count + 1) {
            return Err(KernelError::CardinalityViolation { role: role.to_string(), reason: format!("adding would make {} members", count + 1) });
        }
        let branch = self.current_branch.clone();
        self.store.append(relationship_id, &branch, FactType::MemberAdded { role: role.to_string(), entity_id }, None)?;
        self.relationship_index.add(entity_id, relationship_id, role, &branch);
        Ok(())
    }

    pub fn remove_member(&mut self, relationship_id: ResId, role: &str, entity_id: ResId) -> Result<(), KernelError> {
        let def = self.get_genus_def(self.genus_of(relationship_id)?)?;
        let role_def = def.roles.get(role).ok_or_else(|| KernelError::SchemaViolation(format!("undefined role '{role}'")))?;
        let state = self.materialize_entity(relationship_id, None);
        let count = state.members.get(role).map(|v| v.len()).unwrap_or(0);
        if role_def.cardinality.forbids_removal_from(count) {
            return Err(KernelError::CardinalityViolation { role: role.to_string(), reason: format!("removing would leave {} members", count.saturating_sub(1)) });
        }
        let branch = self.current_branch.clone();
        self.store.append(relationship_id, &branch, FactType::MemberRemoved { role: role.to_string(), entity_id }, None)?;
        self.relationship_index.remove(entity_id, relationship_id, role, &branch);
        Ok(())
    }

    /// Every relationship `entity_id` belongs to on the current branch, by
    /// role — served from the denormalized index rather than a fold.
    pub fn relationships_for(&self, entity_id: ResId) -> &[(ResId, String)] {
        self.relationship_index.relationships_for(entity_id, &self.current_branch)
    }
}

fn value_kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "text",
        Json::Array(_) => "array",
        Json::Object(_) => "filetree",
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

    fn server_genus(kernel: &mut Kernel<InMemoryStore>) -> ResId {
        kernel
            .define_entity_genus(GenusSpec {
                name: "server".into(),
                attributes: vec![("ip".into(), AttributeType::Text, true, None)],
                states: vec![("provisioning".into(), true), ("active".into(), false)],
                transitions: vec![("provisioning".into(), "active".into(), None)],
                ..Default::default()
            })
            .unwrap()
    }

    #[test]
    fn create_entity_starts_in_initial_state() {
        let mut kernel = new_kernel();
        let genus = server_genus(&mut kernel);
        let e = kernel.create_entity(genus, None).unwrap();
        assert_eq!(kernel.materialize_entity(e, None).status.as_deref(), Some("provisioning"));
        assert_eq!(kernel.materialize_entity(e, None).genus_id, Some(genus));
    }

    #[test]
    fn set_attribute_rejects_type_mismatch() {
        let mut kernel = new_kernel();
        let genus = server_genus(&mut kernel);
        let e = kernel.create_entity(genus, None).unwrap();
        let result = kernel.set_attribute(e, "ip", Json::from(42));
        assert!(result.is_err());
    }

    #[test]
    fn set_attribute_rejects_unknown_key() {
        let mut kernel = new_kernel();
        let genus = server_genus(&mut kernel);
        let e = kernel.create_entity(genus, None).unwrap();
        assert!(kernel.set_attribute(e, "nope", Json::from(1)).is_err());
    }

    #[test]
    fn transition_status_follows_genus_graph() {
        let mut kernel = new_kernel();
        let genus = server_genus(&mut kernel);
        let e = kernel.create_entity(genus, None).unwrap();
        kernel.set_attribute(e, "ip", Json::String("10.0.0.1".into())).unwrap();
        kernel.transition_status(e, "active").unwrap();
        assert_eq!(kernel.materialize_entity(e, None).status.as_deref(), Some("active"));
        let err = kernel.transition_status(e, "provisioning").unwrap_err();
        assert!(matches!(err, KernelError::InvalidTransition { .. }));
    }

    #[test]
    fn find_transition_path_bfs() {
        let mut kernel = new_kernel();
        let genus = kernel
            .define_entity_genus(GenusSpec {
                name: "ticket".into(),
                states: vec![("open".into(), true), ("triaged".into(), false), ("closed".into(), false)],
                transitions: vec![("open".into(), "triaged".into(), None), ("triaged".into(), "closed".into(), None)],
                ..Default::default()
            })
            .unwrap();
        let def = kernel.get_genus_def(genus).unwrap();
        let path = Kernel::<InMemoryStore>::find_transition_path(&def, "open", "closed").unwrap();
        assert_eq!(path, vec!["open".to_string(), "triaged".to_string(), "closed".to_string()]);
    }

    #[test]
    fn relationship_cardinality_enforced_on_create_and_remove() {
        let mut kernel = new_kernel();
        let person = kernel.define_entity_genus(GenusSpec { name: "person".into(), ..Default::default() }).unwrap();
        let rel = kernel
            .define_relationship_genus(GenusSpec {
                name: "employment".into(),
                roles: vec![("employee".into(), vec!["person".into()], Cardinality::One)],
                ..Default::default()
            })
            .unwrap();
        let alice = kernel.create_entity(person, None).unwrap();
        let mut members = BTreeMap::new();
        members.insert("employee".to_string(), vec![alice]);
        let r = kernel.create_relationship(rel, members, BTreeMap::new()).unwrap();
        let err = kernel.remove_member(r, "employee", alice).unwrap_err();
        assert!(matches!(err, KernelError::CardinalityViolation { .. }));
    }
}
