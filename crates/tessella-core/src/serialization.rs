//! The serialization genus: declares named inputs/outputs and a `FileOp`
//! handler for import/export. Mirrors `action`'s resource/parameter/handler
//! shape, but the handler itself is opaque `Json` here rather than a typed
//! `Vec` — the `FileOp` vocabulary that interprets it, and the evaluator
//! that walks it against a live filesystem, live in `tessella-adapters`.
//! This module only owns definition and storage, the same split
//! `action`'s `get_action_def`/`evolve_action_handler` draw for resources and
//! parameters.

use crate::errors::KernelError;
use crate::event::{FactType, Store};
use crate::kernel::Kernel;
use crate::materializer::{fold_serialization, SerializationDef};
use serde_json::Value as Json;
use tessella_domain::ResId;

impl<S: Store> Kernel<S> {
    /// Materializes a serialization genus's declared inputs, outputs, and
    /// handler by folding its own fact stream.
    pub fn get_serialization_def(&self, genus_id: ResId) -> Result<SerializationDef, KernelError> {
        let facts = self.store.list(genus_id, &self.current_branch);
        if facts.is_empty() {
            return Err(KernelError::NotFound(format!("serialization genus {genus_id}")));
        }
        Ok(facts.iter().fold(SerializationDef::default(), |state, fact| fold_serialization(state, fact)))
    }

    /// Defines or extends a serialization genus's inputs, outputs, and
    /// handler, additively like `evolve_action_handler`: a name already
    /// declared is left alone, and the handler itself is set once.
    pub fn evolve_serialization_handler(&mut self, genus_id: ResId, inputs: Vec<(String, Json)>, outputs: Vec<(String, Json)>, handler: Option<Json>) -> Result<(), KernelError> {
        let current = self.get_serialization_def(genus_id)?;
        let branch = self.current_branch.clone();
        for (name, value) in inputs {
            if current.inputs.contains_key(&name) {
                continue;
            }
            self.store.append(genus_id, &branch, FactType::SerializationInputDefined { name, value }, None)?;
        }
        for (name, value) in outputs {
            if current.outputs.contains_key(&name) {
                continue;
            }
            self.store.append(genus_id, &branch, FactType::SerializationOutputDefined { name, value }, None)?;
        }
        if current.handler.is_none() {
            if let Some(handler) = handler {
                self.store.append(genus_id, &branch, FactType::SerializationHandlerDefined { handler }, None)?;
            }
        }
        Ok(())
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
    fn evolve_serialization_handler_is_additive() {
        let mut kernel = new_kernel();
        let genus = kernel.define_serialization_genus(GenusSpec { name: "invoice_export".into(), ..Default::default() }).unwrap();
        kernel
            .evolve_serialization_handler(genus, vec![("output_dir".into(), Json::String("/tmp".into()))], vec![], Some(serde_json::json!([{"type": "write_file", "path": "$input.output_dir", "content": "$entity.total"}])))
            .unwrap();
        let def = kernel.get_serialization_def(genus).unwrap();
        assert_eq!(def.inputs.get("output_dir"), Some(&Json::String("/tmp".into())));
        assert!(def.handler.is_some());

        kernel.evolve_serialization_handler(genus, vec![("output_dir".into(), Json::String("/elsewhere".into()))], vec![("summary".into(), Json::Null)], None).unwrap();
        let def2 = kernel.get_serialization_def(genus).unwrap();
        assert_eq!(def2.inputs.get("output_dir"), Some(&Json::String("/tmp".into())), "already-declared input is not overwritten");
        assert!(def2.outputs.contains_key("summary"));
    }
}
