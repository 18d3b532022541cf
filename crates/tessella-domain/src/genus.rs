//! Materialized genus shape and the validation predicates that are pure
//! functions of that shape.
//!
//! `GenusDef` is the *read* side: what `genus_reducer` folds a genus's fact
//! stream into. It is shared between `tessella-core`'s registry (which
//! produces it) and every typed operation that consults it (which only
//! reads it), so it lives here rather than in `tessella-core` to keep the
//! dependency direction one-way.

use crate::error::ValidationError;
use crate::value::AttributeType;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;

/// `meta.kind`, reified as an enum at the boundary. Absence of `meta.kind`
/// means `Entity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenusKind {
    Entity,
    Feature,
    Relationship,
    Action,
    Process,
    Serialization,
}

impl GenusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenusKind::Entity => "entity",
            GenusKind::Feature => "feature",
            GenusKind::Relationship => "relationship",
            GenusKind::Action => "action",
            GenusKind::Process => "process",
            GenusKind::Serialization => "serialization",
        }
    }

    /// Parses `meta.kind`; `None`/unknown strings fall back to `Entity`.
    pub fn from_meta(raw: Option<&str>) -> Self {
        match raw {
            Some("feature") => GenusKind::Feature,
            Some("relationship") => GenusKind::Relationship,
            Some("action") => GenusKind::Action,
            Some("process") => GenusKind::Process,
            Some("serialization") => GenusKind::Serialization,
            _ => GenusKind::Entity,
        }
    }
}

/// Role cardinality on a relationship genus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    OneOrMore,
    ZeroOrMore,
}

impl Cardinality {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "one" => Some(Cardinality::One),
            "one_or_more" => Some(Cardinality::OneOrMore),
            "zero_or_more" => Some(Cardinality::ZeroOrMore),
            _ => None,
        }
    }

    /// Is `count` members a legal population for this cardinality?
    pub fn allows(&self, count: usize) -> bool {
        match self {
            Cardinality::One => count == 1,
            Cardinality::OneOrMore => count >= 1,
            Cardinality::ZeroOrMore => true,
        }
    }

    /// Would removing one member (bringing the count to `count - 1`) violate
    /// the floor?
    pub fn forbids_removal_from(&self, count: usize) -> bool {
        match self {
            Cardinality::One | Cardinality::OneOrMore => count <= 1,
            Cardinality::ZeroOrMore => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDef {
    pub attr_type: AttributeType,
    pub required: bool,
    pub default: Option<Json>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDef {
    pub initial: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionDef {
    pub from: String,
    pub to: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleDef {
    pub valid_member_genera: Vec<String>,
    pub cardinality: Cardinality,
}

/// The fully materialized genus, as `get_genus_def` returns it.
///
/// Field order in `attributes`/`states` uses `BTreeMap` for deterministic
/// iteration (name lookups are already case-sensitive-exact here; the
/// registry does the case-insensitive resolution before handing back a
/// `GenusDef`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenusDef {
    pub attributes: BTreeMap<String, AttributeDef>,
    pub states: BTreeMap<String, StateDef>,
    pub transitions: Vec<TransitionDef>,
    pub roles: BTreeMap<String, RoleDef>,
    pub meta: BTreeMap<String, Json>,
}

impl GenusDef {
    pub fn kind(&self) -> GenusKind {
        GenusKind::from_meta(self.meta.get("kind").and_then(|v| v.as_str()))
    }

    pub fn name(&self) -> Option<&str> {
        self.meta.get("name").and_then(|v| v.as_str())
    }

    pub fn deprecated(&self) -> bool {
        self.meta.get("deprecated").and_then(|v| v.as_bool()).unwrap_or(false)
    }

    pub fn taxonomy_id(&self) -> Option<&str> {
        self.meta.get("taxonomy_id").and_then(|v| v.as_str())
    }

    /// The single state flagged `initial: true`, if any states are defined.
    pub fn initial_state(&self) -> Option<&str> {
        self.states.iter().find(|(_, s)| s.initial).map(|(name, _)| name.as_str())
    }

    /// Every `to` state reachable directly from `from`.
    pub fn transitions_from<'a>(&'a self, from: &'a str) -> impl Iterator<Item = &'a str> {
        self.transitions.iter().filter(move |t| t.from == from).map(|t| t.to.as_str())
    }

    pub fn has_transition(&self, from: &str, to: &str) -> bool {
        self.transitions.iter().any(|t| t.from == from && t.to == to)
    }
}

/// Rejects duplicate attribute names (case-insensitive) and unknown types.
///
/// `AttributeType` is already a closed enum parsed at the fact boundary, so
/// "unknown type" only matters for callers constructing definitions from raw
/// strings (e.g. import paths); this still validates duplicate names for any
/// attribute map.
pub fn validate_attributes(attributes: &BTreeMap<String, AttributeDef>) -> Result<(), ValidationError> {
    let mut seen = std::collections::HashSet::new();
    for name in attributes.keys() {
        let folded = name.to_lowercase();
        if !seen.insert(folded) {
            return Err(ValidationError::DuplicateAttribute(name.clone()));
        }
    }
    Ok(())
}

/// Requires exactly one initial state (when any states are defined) and that
/// every transition endpoint names a defined state.
pub fn validate_state_machine(states: &BTreeMap<String, StateDef>, transitions: &[TransitionDef]) -> Result<(), ValidationError> {
    if !states.is_empty() {
        let initial_count = states.values().filter(|s| s.initial).count();
        if initial_count != 1 {
            return Err(ValidationError::InitialStateCount(initial_count));
        }
    }
    for t in transitions {
        if !states.contains_key(&t.from) {
            return Err(ValidationError::UndefinedTransitionEndpoint(t.from.clone()));
        }
        if !states.contains_key(&t.to) {
            return Err(ValidationError::UndefinedTransitionEndpoint(t.to.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(t: AttributeType) -> AttributeDef {
        AttributeDef { attr_type: t, required: false, default: None }
    }

    #[test]
    fn rejects_case_insensitive_duplicate_attributes() {
        let mut attrs = BTreeMap::new();
        attrs.insert("IP".to_string(), attr(AttributeType::Text));
        attrs.insert("ip".to_string(), attr(AttributeType::Text));
        assert!(validate_attributes(&attrs).is_err());
    }

    #[test]
    fn requires_exactly_one_initial_state() {
        let mut states = BTreeMap::new();
        states.insert("provisioning".to_string(), StateDef { initial: true });
        states.insert("active".to_string(), StateDef { initial: true });
        assert!(validate_state_machine(&states, &[]).is_err());
    }

    #[test]
    fn rejects_transition_to_undefined_state() {
        let mut states = BTreeMap::new();
        states.insert("provisioning".to_string(), StateDef { initial: true });
        let transitions = vec![TransitionDef { from: "provisioning".into(), to: "active".into(), name: None }];
        assert!(validate_state_machine(&states, &transitions).is_err());
    }

    #[test]
    fn cardinality_floors() {
        assert!(Cardinality::One.forbids_removal_from(1));
        assert!(!Cardinality::ZeroOrMore.forbids_removal_from(1));
        assert!(Cardinality::OneOrMore.forbids_removal_from(1));
        assert!(!Cardinality::OneOrMore.forbids_removal_from(2));
    }
}
