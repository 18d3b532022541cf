//! The genus registry: defining, evolving, and looking up schema.
//!
//! A genus's shape is derived from its event stream on demand rather than
//! from a separate schema table — it is the fold of its own fact stream
//! (`materializer::fold_genus`); `GenusIndex` only caches the name-to-id
//! lookup, never the shape itself.

use crate::errors::KernelError;
use crate::event::{FactType, Store};
use crate::hashing::hash_value;
use crate::kernel::Kernel;
use crate::materializer::fold_genus;
use serde_json::Value as Json;
use tessella_domain::{validate_attributes, validate_state_machine, AttributeDef, AttributeType, Cardinality, GenusDef, GenusKind, RoleDef, StateDef, TransitionDef};

/// Deterministic fingerprint of a genus's shape, independent of
/// fact-append order. Covers attributes, states,
/// transitions, and roles only; `meta` (name, kind, deprecated) is identity,
/// not shape, so it is excluded.
pub fn definition_hash(def: &GenusDef) -> String {
    let shape = serde_json::json!({
        "attributes": def.attributes,
        "states": def.states,
        "transitions": def.transitions,
        "roles": def.roles,
    });
    hash_value(&shape)
}

/// Everything needed to define a new genus in one call. Optional pieces
/// (`states`/`transitions`/`roles`) are empty unless the genus needs a state
/// machine or, for relationship genera, role cardinalities.
#[derive(Debug, Clone, Default)]
pub struct GenusSpec {
    pub name: String,
    pub attributes: Vec<(String, AttributeType, bool, Option<Json>)>,
    pub states: Vec<(String, bool)>,
    pub transitions: Vec<(String, String, Option<String>)>,
    pub roles: Vec<(String, Vec<String>, Cardinality)>,
}

impl<S: Store> Kernel<S> {
    fn define_genus(&mut self, kind: GenusKind, spec: GenusSpec) -> Result<tessella_domain::ResId, KernelError> {
        if self.genus_index.contains(kind, &spec.name) {
            return Err(KernelError::SchemaViolation(format!("genus '{}' already defined for kind {}", spec.name, kind.as_str())));
        }
        let mut attrs = std::collections::BTreeMap::new();
        for (name, attr_type, required, default) in &spec.attributes {
            attrs.insert(name.clone(), AttributeDef { attr_type: *attr_type, required: *required, default: default.clone() });
        }
        validate_attributes(&attrs)?;
        let mut states = std::collections::BTreeMap::new();
        for (name, initial) in &spec.states {
            states.insert(name.clone(), StateDef { initial: *initial });
        }
        let transitions: Vec<TransitionDef> = spec.transitions.iter().map(|(f, t, n)| TransitionDef { from: f.clone(), to: t.clone(), name: n.clone() }).collect();
        validate_state_machine(&states, &transitions)?;

        let id = tessella_domain::ResId::new();
        self.store.append(id, &self.current_branch.clone(), FactType::Created { genus_id: crate::constants::meta_genus_id() }, None)?;
        self.store.append(id, &self.current_branch.clone(), FactType::GenusMetaSet { key: "name".into(), value: Json::String(spec.name.clone()) }, None)?;
        self.store.append(id, &self.current_branch.clone(), FactType::GenusMetaSet { key: "kind".into(), value: Json::String(kind.as_str().into()) }, None)?;
        for (name, attr_type, required, default) in spec.attributes {
            self.store.append(id, &self.current_branch.clone(), FactType::GenusAttributeDefined { name, attr_type, required, default }, None)?;
        }
        for (name, initial) in spec.states {
            self.store.append(id, &self.current_branch.clone(), FactType::GenusStateDefined { name, initial }, None)?;
        }
        for (from, to, name) in spec.transitions {
            self.store.append(id, &self.current_branch.clone(), FactType::GenusTransitionDefined { from, to, name }, None)?;
        }
        for (name, valid_member_genera, cardinality) in spec.roles {
            self.store.append(id, &self.current_branch.clone(), FactType::GenusRoleDefined { name, valid_member_genera, cardinality }, None)?;
        }
        self.genus_index.insert(kind, &spec.name, id);
        Ok(id)
    }

    pub fn define_entity_genus(&mut self, spec: GenusSpec) -> Result<tessella_domain::ResId, KernelError> {
        self.define_genus(GenusKind::Entity, spec)
    }

    pub fn define_feature_genus(&mut self, spec: GenusSpec) -> Result<tessella_domain::ResId, KernelError> {
        self.define_genus(GenusKind::Feature, spec)
    }

    pub fn define_relationship_genus(&mut self, spec: GenusSpec) -> Result<tessella_domain::ResId, KernelError> {
        if spec.roles.is_empty() {
            return Err(KernelError::SchemaViolation("relationship genus requires at least one role".into()));
        }
        self.define_genus(GenusKind::Relationship, spec)
    }

    pub fn define_action_genus(&mut self, spec: GenusSpec) -> Result<tessella_domain::ResId, KernelError> {
        self.define_genus(GenusKind::Action, spec)
    }

    pub fn define_process_genus(&mut self, spec: GenusSpec) -> Result<tessella_domain::ResId, KernelError> {
        self.define_genus(GenusKind::Process, spec)
    }

    pub fn define_serialization_genus(&mut self, spec: GenusSpec) -> Result<tessella_domain::ResId, KernelError> {
        self.define_genus(GenusKind::Serialization, spec)
    }

    /// Materializes a genus's current shape by folding its fact stream.
    pub fn get_genus_def(&self, genus_id: tessella_domain::ResId) -> Result<GenusDef, KernelError> {
        let facts = self.store.list(genus_id, &self.current_branch);
        if facts.is_empty() {
            return Err(KernelError::NotFound(format!("genus {genus_id}")));
        }
        Ok(facts.iter().fold(GenusDef::default(), |state, fact| fold_genus(state, fact)))
    }

    pub fn find_genus_by_name(&self, kind: GenusKind, name: &str) -> Option<tessella_domain::ResId> {
        self.genus_index.get(kind, name)
    }

    /// Convenience wrapper over [`definition_hash`] for an already-resolved
    /// genus id.
    pub fn genus_definition_hash(&self, genus_id: tessella_domain::ResId) -> Result<String, KernelError> {
        self.get_genus_def(genus_id).map(|def| definition_hash(&def))
    }

    /// Additive-only evolution: every new attribute/state/
    /// transition/role is appended; nothing already defined may be removed
    /// or redefined, and re-adding an unchanged definition is a no-op.
    pub fn evolve_genus(&mut self, genus_id: tessella_domain::ResId, addition: GenusSpec) -> Result<(), KernelError> {
        let current = self.get_genus_def(genus_id)?;
        if current.deprecated() {
            return Err(KernelError::GenusDeprecated(current.name().unwrap_or_default().to_string()));
        }
        let branch = self.current_branch.clone();
        for (name, attr_type, required, default) in addition.attributes {
            if current.attributes.contains_key(&name) {
                continue;
            }
            self.store.append(genus_id, &branch, FactType::GenusAttributeDefined { name, attr_type, required, default }, None)?;
        }
        for (name, initial) in addition.states {
            if current.states.contains_key(&name) {
                continue;
            }
            self.store.append(genus_id, &branch, FactType::GenusStateDefined { name, initial }, None)?;
        }
        for (from, to, name) in addition.transitions {
            if current.has_transition(&from, &to) {
                continue;
            }
            self.store.append(genus_id, &branch, FactType::GenusTransitionDefined { from, to, name }, None)?;
        }
        for (name, valid_member_genera, cardinality) in addition.roles {
            match current.roles.get(&name) {
                None => {
                    self.store.append(genus_id, &branch, FactType::GenusRoleDefined { name, valid_member_genera, cardinality }, None)?;
                }
                Some(existing) => {
                    // merge `valid_member_genera` as a case-insensitive
                    // union and re-append only when the set or cardinality changes.
                    let mut seen: std::collections::HashSet<String> = existing.valid_member_genera.iter().map(|g| g.to_lowercase()).collect();
                    let mut merged = existing.valid_member_genera.clone();
                    for g in &valid_member_genera {
                        if seen.insert(g.to_lowercase()) {
                            merged.push(g.clone());
                        }
                    }
                    let changed = merged.len() != existing.valid_member_genera.len() || cardinality != existing.cardinality;
                    if changed {
                        self.store.append(genus_id, &branch, FactType::GenusRoleDefined { name, valid_member_genera: merged, cardinality }, None)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Toggles `meta.deprecated`. Sentinel genera reject
    /// deprecation outright — `meta`, `task`, `branch`, and the rest exist so
    /// every other genus has one to point at; deprecating one would orphan
    /// whatever still references it.
    pub fn deprecate_genus(&mut self, genus_id: tessella_domain::ResId) -> Result<(), KernelError> {
        if crate::constants::SENTINEL_NAMES.iter().any(|name| crate::constants::sentinel_id_for(name) == Some(genus_id)) {
            return Err(KernelError::SentinelProtected(genus_id.to_string()));
        }
        let branch = self.current_branch.clone();
        self.store.append(genus_id, &branch, FactType::GenusMetaSet { key: "deprecated".into(), value: Json::Bool(true) }, None)?;
        Ok(())
    }

    pub fn restore_genus(&mut self, genus_id: tessella_domain::ResId) -> Result<(), KernelError> {
        let branch = self.current_branch.clone();
        self.store.append(genus_id, &branch, FactType::GenusMetaSet { key: "deprecated".into(), value: Json::Bool(false) }, None)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::InMemoryStore;
    use tessella_domain::AttributeType;

    fn new_kernel() -> Kernel<InMemoryStore> {
        Kernel::new(InMemoryStore::new()).unwrap()
    }

    #[test]
    fn definition_hash_is_stable_across_reconstruction() {
        let mut kernel = new_kernel();
        let spec = GenusSpec { name: "document".into(), attributes: vec![("title".into(), AttributeType::Text, true, None)], ..Default::default() };
        let id = kernel.define_entity_genus(spec).unwrap();
        let first = kernel.genus_definition_hash(id).unwrap();
        let second = kernel.genus_definition_hash(id).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn define_entity_genus_indexes_by_name() {
        let mut kernel = new_kernel();
        let spec = GenusSpec { name: "document".into(), attributes: vec![("title".into(), AttributeType::Text, true, None)], ..Default::default() };
        let id = kernel.define_entity_genus(spec).unwrap();
        assert_eq!(kernel.find_genus_by_name(GenusKind::Entity, "Document"), Some(id));
    }

    #[test]
    fn defining_duplicate_name_for_same_kind_fails() {
        let mut kernel = new_kernel();
        kernel.define_entity_genus(GenusSpec { name: "document".into(), ..Default::default() }).unwrap();
        let result = kernel.define_entity_genus(GenusSpec { name: "DOCUMENT".into(), ..Default::default() });
        assert!(result.is_err());
    }

    #[test]
    fn evolve_genus_is_additive_and_idempotent() {
        let mut kernel = new_kernel();
        let id = kernel.define_entity_genus(GenusSpec { name: "document".into(), ..Default::default() }).unwrap();
        kernel.evolve_genus(id, GenusSpec { attributes: vec![("title".into(), AttributeType::Text, true, None)], ..Default::default() }).unwrap();
        kernel.evolve_genus(id, GenusSpec { attributes: vec![("title".into(), AttributeType::Number, false, None)], ..Default::default() }).unwrap();
        let def = kernel.get_genus_def(id).unwrap();
        assert_eq!(def.attributes["title"].attr_type, AttributeType::Text);
        assert_eq!(def.attributes.len(), 1);
    }

    #[test]
    fn evolve_genus_attribute_match_is_case_sensitive() {
        let mut kernel = new_kernel();
        let id = kernel.define_entity_genus(GenusSpec { name: "document".into(), ..Default::default() }).unwrap();
        kernel.evolve_genus(id, GenusSpec { attributes: vec![("ip".into(), AttributeType::Text, true, None)], ..Default::default() }).unwrap();
        kernel.evolve_genus(id, GenusSpec { attributes: vec![("IP".into(), AttributeType::Text, true, None)], ..Default::default() }).unwrap();
        let def = kernel.get_genus_def(id).unwrap();
        assert_eq!(def.attributes.len(), 2, "differently-cased attribute names must be treated as distinct");
        assert!(def.attributes.contains_key("ip"));
        assert!(def.attributes.contains_key("IP"));
    }

    #[test]
    fn sentinel_genus_rejects_deprecation() {
        let mut kernel = new_kernel();
        let task_genus = crate::constants::sentinel_id_for("task").unwrap();
        let result = kernel.deprecate_genus(task_genus);
        assert!(matches!(result, Err(KernelError::SentinelProtected(_))));
    }

    #[test]
    fn deprecated_genus_rejects_further_evolution() {
        let mut kernel = new_kernel();
        let id = kernel.define_entity_genus(GenusSpec { name: "document".into(), ..Default::default() }).unwrap();
        kernel.deprecate_genus(id).unwrap();
        let result = kernel.evolve_genus(id, GenusSpec { attributes: vec![("title".into(), AttributeType::Text, true, None)], ..Default::default() });
        assert!(result.is_err());
    }
}
