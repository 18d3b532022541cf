//! `FileOp`: the typed vocabulary a serialization genus's handler is made
//! of, plus the evaluator that walks it against a host-supplied
//! `FileSystem`.
//!
//! Token substitution mirrors `tessella_core::action::Token` exactly
//! (`$input.<name>`, `$entity.<attr>`, `$output.<name>`, `$now`,
//! whole-string vs. embedded): the same distinction that lets a parameter's
//! native JSON type survive a handler matters here too, e.g. a `filetree`
//! attribute value handed straight to `WriteFile::content` rather than
//! stringified.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use tessella_core::event::Store;
use tessella_core::{Kernel, KernelError};
use tessella_domain::ResId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("malformed FileOp handler: {0}")]
    MalformedHandler(String),
    #[error("unresolved token: {0}")]
    UnresolvedToken(String),
    #[error("filesystem error: {0}")]
    FileSystem(String),
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

/// A value as written in a serialization handler, before resolution.
/// Identical split to `tessella_core::action::Token`: a string that is
/// exactly one placeholder preserves that placeholder's native JSON type
/// (`Whole`); a string containing a placeholder among other text (`Template`)
/// has every placeholder coerced to its string form before interpolation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum Token {
    Literal(Json),
    Whole(String),
    Template(String),
}

impl Token {
    fn parse(raw: &Json) -> Token {
        match raw {
            Json::String(s) if s.contains('$') => {
                if is_whole_placeholder(s) {
                    Token::Whole(s.clone())
                } else {
                    Token::Template(s.clone())
                }
            }
            other => Token::Literal(other.clone()),
        }
    }
}

/// True when `raw` is exactly one `$input.x` / `$entity.x` / `$output.x` /
/// `$now` placeholder with no surrounding text.
fn is_whole_placeholder(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed != raw || !trimmed.starts_with('$') {
        return false;
    }
    trimmed[1..].chars().all(|c| c.is_alphanumeric() || c == '.' || c == '_')
}

/// The typed operations a serialization handler may contain. Parsed from
/// the opaque `Json` array stored on `SerializationDef::handler`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileOp {
    WriteFile { path: Json, content: Json },
    AppendFile { path: Json, content: Json },
    CreateDir { path: Json },
    DeleteFile { path: Json },
    /// Reads a file and binds its content to a named output slot, available
    /// to later ops (and to the caller) as `$output.<into>`.
    ReadFile { path: Json, into: String },
}

impl FileOp {
    /// Parses a handler's opaque `Json` array into typed ops, failing
    /// closed on anything the vocabulary doesn't recognize: the evaluator
    /// interprets the handler, it does not improvise.
    pub fn parse_handler(handler: &Json) -> Result<Vec<FileOp>, AdapterError> {
        let array = handler.as_array().ok_or_else(|| AdapterError::MalformedHandler("handler is not an array".into()))?;
        array
            .iter()
            .map(|op| serde_json::from_value(op.clone()).map_err(|e| AdapterError::MalformedHandler(e.to_string())))
            .collect()
    }
}

/// The real filesystem access a serialization run needs. The host
/// application implements this; `tessella-adapters` only ever calls through
/// it — the filesystem reader/writer itself lives outside this crate.
pub trait FileSystem {
    fn write(&mut self, path: &str, content: &str) -> std::io::Result<()>;
    fn append(&mut self, path: &str, content: &str) -> std::io::Result<()>;
    fn create_dir(&mut self, path: &str) -> std::io::Result<()>;
    fn delete(&mut self, path: &str) -> std::io::Result<()>;
    fn read(&mut self, path: &str) -> std::io::Result<String>;
}

/// Everything a handler's tokens may resolve against: the serialization
/// genus's declared named inputs, the subject entity's attribute values
/// (`$entity.<attr>`), and outputs produced by earlier ops in the same run
/// (`$output.<name>`).
#[derive(Debug, Clone, Default)]
pub struct SerializationContext {
    pub inputs: BTreeMap<String, Json>,
    pub entity_attributes: BTreeMap<String, Json>,
    pub outputs: BTreeMap<String, Json>,
}

impl SerializationContext {
    fn resolve(&self, token: &Token) -> Result<Json, AdapterError> {
        match token {
            Token::Literal(v) => Ok(v.clone()),
            Token::Whole(raw) => self.resolve_placeholder(raw),
            Token::Template(raw) => {
                let mut out = String::new();
                let mut rest = raw.as_str();
                while let Some(start) = rest.find('$') {
                    out.push_str(&rest[..start]);
                    let candidate = &rest[start..];
                    let end = candidate[1..].find(|c: char| !(c.is_alphanumeric() || c == '.' || c == '_')).map(|i| i + 1).unwrap_or(candidate.len());
                    let placeholder = &candidate[..end];
                    out.push_str(&value_to_string(&self.resolve_placeholder(placeholder)?));
                    rest = &candidate[end..];
                }
                out.push_str(rest);
                Ok(Json::String(out))
            }
        }
    }

    fn resolve_path(&self, token: &Token) -> Result<String, AdapterError> {
        Ok(value_to_string(&self.resolve(token)?))
    }

    /// Resolves a single `$...` placeholder to its native JSON value.
    fn resolve_placeholder(&self, raw: &str) -> Result<Json, AdapterError> {
        let body = raw.strip_prefix('$').unwrap_or(raw);
        if body == "now" {
            return Ok(Json::String(Utc::now().to_rfc3339()));
        }
        if let Some(name) = body.strip_prefix("input.") {
            return self.inputs.get(name).cloned().ok_or_else(|| AdapterError::UnresolvedToken(raw.to_string()));
        }
        if let Some(name) = body.strip_prefix("entity.") {
            return self.entity_attributes.get(name).cloned().ok_or_else(|| AdapterError::UnresolvedToken(raw.to_string()));
        }
        if let Some(name) = body.strip_prefix("output.") {
            return self.outputs.get(name).cloned().ok_or_else(|| AdapterError::UnresolvedToken(raw.to_string()));
        }
        Err(AdapterError::UnresolvedToken(raw.to_string()))
    }
}

fn value_to_string(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Evaluates `ops` in order against `fs`, threading `ctx.outputs` forward so
/// later ops can reference earlier ones' results.
pub fn evaluate_file_ops(ops: &[FileOp], ctx: &mut SerializationContext, fs: &mut impl FileSystem) -> Result<(), AdapterError> {
    for op in ops {
        match op {
            FileOp::WriteFile { path, content } => {
                let path = ctx.resolve_path(&Token::parse(path))?;
                let content = ctx.resolve(&Token::parse(content))?;
                fs.write(&path, &value_to_string(&content)).map_err(|e| AdapterError::FileSystem(e.to_string()))?;
            }
            FileOp::AppendFile { path, content } => {
                let path = ctx.resolve_path(&Token::parse(path))?;
                let content = ctx.resolve(&Token::parse(content))?;
                fs.append(&path, &value_to_string(&content)).map_err(|e| AdapterError::FileSystem(e.to_string()))?;
            }
            FileOp::CreateDir { path } => {
                let path = ctx.resolve_path(&Token::parse(path))?;
                fs.create_dir(&path).map_err(|e| AdapterError::FileSystem(e.to_string()))?;
            }
            FileOp::DeleteFile { path } => {
                let path = ctx.resolve_path(&Token::parse(path))?;
                fs.delete(&path).map_err(|e| AdapterError::FileSystem(e.to_string()))?;
            }
            FileOp::ReadFile { path, into } => {
                let path = ctx.resolve_path(&Token::parse(path))?;
                let content = fs.read(&path).map_err(|e| AdapterError::FileSystem(e.to_string()))?;
                ctx.outputs.insert(into.clone(), Json::String(content));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SerializationOutcome {
    pub run_id: u64,
    pub outputs: BTreeMap<String, Json>,
}

/// Runs a serialization genus's handler for one entity end to end: folds
/// the genus's declared inputs and the entity's current attributes into a
/// `SerializationContext`, evaluates the handler against `fs`, optionally
/// writes any read outputs back onto the entity as attributes (`import`
/// direction only, via `attribute_targets`), and records the
/// `serialization_run` audit row.
pub fn run_serialization<S: Store>(
    kernel: &mut Kernel<S>,
    genus_id: ResId,
    entity_id: ResId,
    direction: &str,
    fs: &mut impl FileSystem,
    attribute_targets: &BTreeMap<String, String>,
) -> Result<SerializationOutcome, AdapterError> {
    let def = kernel.get_serialization_def(genus_id)?;
    let handler = def.handler.as_ref().ok_or_else(|| AdapterError::MalformedHandler("serialization genus has no handler".into()))?;
    let ops = FileOp::parse_handler(handler)?;

    let entity_state = kernel.materialize_entity(entity_id, None);
    let mut ctx = SerializationContext { inputs: def.inputs.clone(), entity_attributes: entity_state.attributes.clone(), outputs: BTreeMap::new() };
    evaluate_file_ops(&ops, &mut ctx, fs)?;

    let mut tessellae_created = Vec::new();
    if direction == "import" {
        for (output_name, attribute_key) in attribute_targets {
            if let Some(value) = ctx.outputs.get(output_name) {
                kernel.set_attribute(entity_id, attribute_key, value.clone())?;
                tessellae_created.push(kernel.store.max_fact_id());
            }
        }
    }

    let entity_ids = serde_json::json!([entity_id.to_string()]);
    let output_path = ctx.outputs.values().find_map(|v| v.as_str().map(str::to_string));
    let branch = kernel.current_branch.clone();
    let run_id = kernel.store.record_serialization_run(genus_id, direction, entity_ids, output_path, tessellae_created, &branch);

    Ok(SerializationOutcome { run_id, outputs: ctx.outputs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tessella_core::event::InMemoryStore;
    use tessella_core::GenusSpec;

    #[derive(Default)]
    struct MemFs {
        files: HashMap<String, String>,
    }

    impl FileSystem for MemFs {
        fn write(&mut self, path: &str, content: &str) -> std::io::Result<()> {
            self.files.insert(path.to_string(), content.to_string());
            Ok(())
        }
        fn append(&mut self, path: &str, content: &str) -> std::io::Result<()> {
            self.files.entry(path.to_string()).or_default().push_str(content);
            Ok(())
        }
        fn create_dir(&mut self, _path: &str) -> std::io::Result<()> {
            Ok(())
        }
        fn delete(&mut self, path: &str) -> std::io::Result<()> {
            self.files.remove(path);
            Ok(())
        }
        fn read(&mut self, path: &str) -> std::io::Result<String> {
            self.files.get(path).cloned().ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string()))
        }
    }

    fn new_kernel() -> Kernel<InMemoryStore> {
        Kernel::new(InMemoryStore::new()).unwrap()
    }

    #[test]
    fn export_writes_entity_attribute_to_configured_path() {
        let mut kernel = new_kernel();
        let server = kernel.define_entity_genus(GenusSpec { name: "server".into(), attributes: vec![("ip".into(), tessella_domain::AttributeType::Text, true, None)], ..Default::default() }).unwrap();
        let serialization = kernel.define_serialization_genus(GenusSpec { name: "export_server".into(), ..Default::default() }).unwrap();
        kernel
            .evolve_serialization_handler(
                serialization,
                vec![("output_dir".into(), Json::String("/tmp/out.txt".into()))],
                vec![],
                Some(serde_json::json!([{"type": "write_file", "path": "$input.output_dir", "content": "$entity.ip"}])),
            )
            .unwrap();
        let entity = kernel.create_entity(server, None).unwrap();
        kernel.set_attribute(entity, "ip", Json::String("10.0.0.1".into())).unwrap();

        let mut fs = MemFs::default();
        let outcome = run_serialization(&mut kernel, serialization, entity, "export", &mut fs, &BTreeMap::new()).unwrap();
        assert_eq!(fs.files.get("/tmp/out.txt"), Some(&"10.0.0.1".to_string()));
        assert!(outcome.outputs.is_empty());
    }

    #[test]
    fn import_reads_file_and_sets_attribute() {
        let mut kernel = new_kernel();
        let server = kernel.define_entity_genus(GenusSpec { name: "server".into(), attributes: vec![("ip".into(), tessella_domain::AttributeType::Text, true, None)], ..Default::default() }).unwrap();
        let serialization = kernel.define_serialization_genus(GenusSpec { name: "import_server".into(), ..Default::default() }).unwrap();
        kernel
            .evolve_serialization_handler(
                serialization,
                vec![("input_path".into(), Json::String("/tmp/in.txt".into()))],
                vec![],
                Some(serde_json::json!([{"type": "read_file", "path": "$input.input_path", "into": "ip_value"}])),
            )
            .unwrap();
        let entity = kernel.create_entity(server, None).unwrap();

        let mut fs = MemFs::default();
        fs.files.insert("/tmp/in.txt".to_string(), "10.0.0.9".to_string());
        let mut targets = BTreeMap::new();
        targets.insert("ip_value".to_string(), "ip".to_string());
        run_serialization(&mut kernel, serialization, entity, "import", &mut fs, &targets).unwrap();

        let state = kernel.materialize_entity(entity, None);
        assert_eq!(state.attributes.get("ip"), Some(&Json::String("10.0.0.9".into())));
    }

    #[test]
    fn unresolved_token_errors() {
        let ctx = SerializationContext::default();
        let result = ctx.resolve(&Token::Whole("$input.missing".into()));
        assert!(result.is_err());
    }
}
