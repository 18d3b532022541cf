//! `Kernel`: the single entry point every operation in this crate hangs off
//! of, pairing an event `Store` with a "repository" side that is the set of
//! reducers in `materializer`, invoked on demand rather than cached, since
//! the single-threaded cooperative model this engine assumes makes a
//! persistent read cache unnecessary.

use crate::constants::{sentinel_id, MAIN_BRANCH};
use crate::errors::KernelError;
use crate::event::{FactType, Store};
use crate::indexes::{GenusIndex, RelationshipMemberIndex};
use tessella_domain::{GenusKind, ResId};

/// Owns the fact log and the kernel's session state: current branch and
/// current workspace. Every public operation (`ops`, `action`, `process`,
/// `branch`, `health`, `genus`) is implemented as an `impl<S: Store>
/// Kernel<S>` block in its own module.
pub struct Kernel<S: Store> {
    pub store: S,
    pub current_branch: String,
    pub current_workspace: Option<ResId>,
    pub(crate) genus_index: GenusIndex,
    pub(crate) relationship_index: RelationshipMemberIndex,
}

impl<S: Store> Kernel<S> {
    /// Wraps `store` and bootstraps the sentinel genera if they are not
    /// already present. Idempotent: calling this against a store that
    /// already has sentinels is a no-op save for rebuilding the in-memory
    /// indexes.
    pub fn new(mut store: S) -> Result<Self, KernelError> {
        let bootstrapped = store.exists(sentinel_id(0), MAIN_BRANCH);
        if !bootstrapped {
            bootstrap_sentinels(&mut store)?;
        }
        let mut kernel = Kernel { store, current_branch: MAIN_BRANCH.to_string(), current_workspace: None, genus_index: GenusIndex::default(), relationship_index: RelationshipMemberIndex::default() };
        kernel.rebuild_indexes();
        Ok(kernel)
    }

    /// Replays every sentinel's fact stream to repopulate `genus_index`.
    /// Non-sentinel genera are indexed incrementally as they are defined, so
    /// this only needs to seed the fixed sentinel set at construction.
    fn rebuild_indexes(&mut self) {
        use crate::constants::SENTINEL_NAMES;
        for (i, name) in SENTINEL_NAMES.iter().enumerate() {
            let id = sentinel_id(i);
            if self.store.exists(id, MAIN_BRANCH) {
                self.genus_index.insert(GenusKind::Entity, name, id);
            }
        }
    }
}

/// Appends the minimal fact stream for each sentinel genus: a `created` fact
/// followed by a `genus_meta_set` naming it. Sentinels carry no attributes or
/// states of their own; they exist so every genus, including the ones that
/// describe genera, has a genus.
fn bootstrap_sentinels<S: Store>(store: &mut S) -> Result<(), KernelError> {
    use crate::constants::{meta_genus_id, SENTINEL_NAMES};
    let meta = meta_genus_id();
    for (i, name) in SENTINEL_NAMES.iter().enumerate() {
        let id = sentinel_id(i);
        store.append(id, MAIN_BRANCH, FactType::Created { genus_id: meta }, Some("bootstrap".into()))?;
        store.append(id, MAIN_BRANCH, FactType::GenusMetaSet { key: "name".into(), value: serde_json::Value::String(name.to_string()) }, Some("bootstrap".into()))?;
        store.append(id, MAIN_BRANCH, FactType::GenusMetaSet { key: "kind".into(), value: serde_json::Value::String("entity".into()) }, Some("bootstrap".into()))?;

        // `error` and `task` sentinels carry their own tiny state machines so
        // `transition_status`/`acknowledge_error` validate against them like
        // any user-defined genus, instead of every caller bypassing
        // validation with a raw append.
        match *name {
            "error" => {
                store.append(id, MAIN_BRANCH, FactType::GenusStateDefined { name: "open".into(), initial: true }, Some("bootstrap".into()))?;
                store.append(id, MAIN_BRANCH, FactType::GenusStateDefined { name: "acknowledged".into(), initial: false }, Some("bootstrap".into()))?;
                store.append(id, MAIN_BRANCH, FactType::GenusTransitionDefined { from: "open".into(), to: "acknowledged".into(), name: None }, Some("bootstrap".into()))?;
            }
            "task" => {
                store.append(id, MAIN_BRANCH, FactType::GenusStateDefined { name: "pending".into(), initial: true }, Some("bootstrap".into()))?;
                store.append(id, MAIN_BRANCH, FactType::GenusStateDefined { name: "completed".into(), initial: false }, Some("bootstrap".into()))?;
                store.append(id, MAIN_BRANCH, FactType::GenusStateDefined { name: "failed".into(), initial: false }, Some("bootstrap".into()))?;
                store.append(id, MAIN_BRANCH, FactType::GenusTransitionDefined { from: "pending".into(), to: "completed".into(), name: None }, Some("bootstrap".into()))?;
                store.append(id, MAIN_BRANCH, FactType::GenusTransitionDefined { from: "pending".into(), to: "failed".into(), name: None }, Some("bootstrap".into()))?;
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::InMemoryStore;

    #[test]
    fn new_bootstraps_sentinels_exactly_once() {
        let kernel = Kernel::new(InMemoryStore::new()).unwrap();
        assert!(kernel.store.exists(sentinel_id(0), MAIN_BRANCH));
        let facts = kernel.store.list(sentinel_id(0), MAIN_BRANCH);
        assert_eq!(facts.len(), 3);
    }

    #[test]
    fn bootstrap_is_idempotent_across_reconstruction() {
        let kernel = Kernel::new(InMemoryStore::new()).unwrap();
        let store = kernel.store;
        let kernel2 = Kernel::new(store).unwrap();
        let facts = kernel2.store.list(sentinel_id(0), MAIN_BRANCH);
        assert_eq!(facts.len(), 3);
    }
}
