//! The action DSL: declarative side effects with token substitution, and
//! `Kernel::execute_action`, the one operation in this crate that captures
//! its own errors instead of propagating them.
//!
//! An action handler resolves a fixed list of `SideEffect`s against a
//! `SubstitutionContext` built from the invocation's parameters and resolved
//! resources. The distinction between whole-string and embedded substitution
//! is modeled directly by `Token::Whole` vs `Token::Template`.

use crate::errors::KernelError;
use crate::event::{FactType, InputKind, Store};
use crate::hashing::hash_value;
use crate::kernel::Kernel;
use crate::materializer::fold_action;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use tessella_domain::{AttributeType, FactId, GenusKind, ResId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResource {
    pub name: String,
    pub genus_name: String,
    pub required_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionParameter {
    pub name: String,
    pub param_type: AttributeType,
    pub required: bool,
}

/// A value as written in a handler definition, before resolution.
///
/// `$res.<name>.id`, `$param.<name>`, and `$now` are the only recognized
/// placeholders. A string equal to exactly one placeholder is
/// a `Whole` substitution and preserves the placeholder's native JSON type;
/// any other string is a `Template` and every placeholder within it is
/// coerced to its string form before interpolation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Token {
    Literal(Json),
    Whole(String),
    Template(String),
}

impl Token {
    /// Classifies a raw handler-definition string into `Whole` or
    /// `Template`, or passes non-placeholder text through as a literal.
    pub fn parse(raw: &str) -> Token {
        if !raw.contains('$') {
            return Token::Literal(Json::String(raw.to_string()));
        }
        if is_whole_placeholder(raw) {
            Token::Whole(raw.to_string())
        } else {
            Token::Template(raw.to_string())
        }
    }
}

/// True when `raw` is exactly one `$param.x` / `$res.x.id` / `$now`
/// placeholder with no surrounding text.
fn is_whole_placeholder(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed != raw || !trimmed.starts_with('$') {
        return false;
    }
    trimmed[1..].chars().all(|c| c.is_alphanumeric() || c == '.' || c == '_')
}

pub struct SubstitutionContext {
    pub params: BTreeMap<String, Json>,
    pub resources: BTreeMap<String, ResId>,
    pub now: DateTime<Utc>,
}

impl SubstitutionContext {
    /// Resolves a single `$...` placeholder to its native JSON value.
    fn resolve_placeholder(&self, placeholder: &str) -> Result<Json, KernelError> {
        let body = placeholder.strip_prefix('$').unwrap_or(placeholder);
        if body == "now" {
            return Ok(Json::String(self.now.to_rfc3339()));
        }
        if let Some(name) = body.strip_prefix("param.") {
            return self.params.get(name).cloned().ok_or_else(|| KernelError::NotFound(format!("parameter '{name}'")));
        }
        if let Some(rest) = body.strip_prefix("res.") {
            let (name, field) = rest.split_once('.').ok_or_else(|| KernelError::SchemaViolation(format!("malformed token '{placeholder}'")))?;
            let res_id = self.resources.get(name).ok_or_else(|| KernelError::NotFound(format!("resource '{name}'")))?;
            return match field {
                "id" => Ok(Json::String(res_id.to_string())),
                other => Err(KernelError::SchemaViolation(format!("unknown resource field '{other}'"))),
            };
        }
        Err(KernelError::SchemaViolation(format!("unrecognized token '{placeholder}'")))
    }

    pub fn resolve(&self, token: &Token) -> Result<Json, KernelError> {
        match token {
            Token::Literal(v) => Ok(v.clone()),
            Token::Whole(raw) => self.resolve_placeholder(raw.trim()),
            Token::Template(raw) => {
                let mut out = String::new();
                let mut rest = raw.as_str();
                while let Some(start) = rest.find('$') {
                    out.push_str(&rest[..start]);
                    let candidate = &rest[start..];
                    let end = candidate[1..].find(|c: char| !(c.is_alphanumeric() || c == '.' || c == '_')).map(|i| i + 1).unwrap_or(candidate.len());
                    let placeholder = &candidate[..end];
                    out.push_str(&json_to_string(&self.resolve_placeholder(placeholder)?));
                    rest = &candidate[end..];
                }
                out.push_str(rest);
                Ok(Json::String(out))
            }
        }
    }

    pub fn resolve_string(&self, token: &Token) -> Result<String, KernelError> {
        expect_string(self.resolve(token)?)
    }

    pub fn resource(&self, name: &str) -> Result<ResId, KernelError> {
        self.resources.get(name).copied().ok_or_else(|| KernelError::NotFound(format!("resource '{name}'")))
    }
}

fn json_to_string(v: &Json) -> String {
    match v {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn expect_string(v: Json) -> Result<String, KernelError> {
    match v {
        Json::String(s) => Ok(s),
        other => Ok(json_to_string(&other)),
    }
}

/// One declarative mutation an action handler performs, referencing
/// resources and parameters by name rather than concrete ids. A tagged
/// variant so a handler definition serializes as plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SideEffect {
    SetAttribute { res: String, key: String, value: Token },
    TransitionStatus { res: String, target: Token },
    CreateRes { genus_name: String, attributes: Option<BTreeMap<String, Token>> },
    CreateLog { message: Token, severity: Option<Token>, res: Option<String> },
    CreateError { message: Token, severity: Option<Token>, res: Option<String> },
    CreateTask {
        title: Token,
        description: Option<Token>,
        res: Option<String>,
        priority: Option<Token>,
        target_agent_type: Option<Token>,
        context_res_ids: Option<Vec<String>>,
    },
}

/// `SideEffect` with every bound resource name and token resolved — what
/// `Kernel::execute_action` actually applies. Resources not yet created by
/// an earlier `CreateRes` effect in the same handler stay as plain names
/// resolved at apply time, so `genus_name`/entity lookups still happen
/// inside the kernel rather than here.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedEffect {
    SetAttribute { res: ResId, key: String, value: Json },
    TransitionStatus { res: ResId, target: String },
    CreateRes { genus_name: String, attributes: BTreeMap<String, Json> },
    CreateLog { message: String, severity: Option<String>, res: Option<ResId> },
    CreateError { message: String, severity: Option<String>, res: Option<ResId> },
    CreateTask { title: String, description: Option<String>, res: Option<ResId>, priority: Option<String>, target_agent_type: Option<String>, context_res_ids: Vec<ResId> },
}

/// Resolves an entire handler, in order, against one invocation context.
pub fn resolve_effects(handler: &[SideEffect], ctx: &SubstitutionContext) -> Result<Vec<ResolvedEffect>, KernelError> {
    handler.iter().map(|effect| resolve_effect(effect, ctx)).collect()
}

fn resolve_effect(effect: &SideEffect, ctx: &SubstitutionContext) -> Result<ResolvedEffect, KernelError> {
    Ok(match effect {
        SideEffect::SetAttribute { res, key, value } => ResolvedEffect::SetAttribute { res: ctx.resource(res)?, key: key.clone(), value: ctx.resolve(value)? },
        SideEffect::TransitionStatus { res, target } => ResolvedEffect::TransitionStatus { res: ctx.resource(res)?, target: ctx.resolve_string(target)? },
        SideEffect::CreateRes { genus_name, attributes } => {
            let mut resolved = BTreeMap::new();
            for (key, token) in attributes.iter().flatten() {
                resolved.insert(key.clone(), ctx.resolve(token)?);
            }
            ResolvedEffect::CreateRes { genus_name: genus_name.clone(), attributes: resolved }
        }
        SideEffect::CreateLog { message, severity, res } => ResolvedEffect::CreateLog {
            message: ctx.resolve_string(message)?,
            severity: severity.as_ref().map(|t| ctx.resolve_string(t)).transpose()?,
            res: res.as_deref().map(|n| ctx.resource(n)).transpose()?,
        },
        SideEffect::CreateError { message, severity, res } => ResolvedEffect::CreateError {
            message: ctx.resolve_string(message)?,
            severity: severity.as_ref().map(|t| ctx.resolve_string(t)).transpose()?,
            res: res.as_deref().map(|n| ctx.resource(n)).transpose()?,
        },
        SideEffect::CreateTask { title, description, res, priority, target_agent_type, context_res_ids } => ResolvedEffect::CreateTask {
            title: ctx.resolve_string(title)?,
            description: description.as_ref().map(|t| ctx.resolve_string(t)).transpose()?,
            res: res.as_deref().map(|n| ctx.resource(n)).transpose()?,
            priority: priority.as_ref().map(|t| ctx.resolve_string(t)).transpose()?,
            target_agent_type: target_agent_type.as_ref().map(|t| ctx.resolve_string(t)).transpose()?,
            context_res_ids: context_res_ids.iter().flatten().map(|n| ctx.resource(n)).collect::<Result<Vec<_>, _>>()?,
        },
    })
}

/// Checks a handler against its own declared resources and parameters
/// before any fact is appended: every `$res.X.id` resolves to
/// a declared resource; every `$param.X` resolves to a declared parameter").
/// Does not check genus/type compatibility — that is judged at invocation
/// time, against the actual bindings, by `execute_action`.
pub fn validate_action_handler(resources: &[(String, String, Option<String>)], parameters: &[(String, AttributeType, bool)], handler: &[SideEffect]) -> Result<(), KernelError> {
    let known_resources: std::collections::HashSet<&str> = resources.iter().map(|(n, _, _)| n.as_str()).collect();
    let known_params: std::collections::HashSet<&str> = parameters.iter().map(|(n, _, _)| n.as_str()).collect();

    let check_res_name = |name: &str| -> Result<(), KernelError> {
        if known_resources.contains(name) {
            Ok(())
        } else {
            Err(KernelError::SchemaViolation(format!("handler references undeclared resource '{name}'")))
        }
    };
    let check_token = |token: &Token| -> Result<(), KernelError> {
        for placeholder in placeholders_in(token) {
            let body = placeholder.trim_start_matches('$');
            if body == "now" {
                continue;
            } else if let Some(rest) = body.strip_prefix("res.") {
                let name = rest.split('.').next().unwrap_or(rest);
                check_res_name(name)?;
            } else if let Some(name) = body.strip_prefix("param.") {
                if !known_params.contains(name) {
                    return Err(KernelError::SchemaViolation(format!("handler references undeclared parameter '{name}'")));
                }
            } else {
                return Err(KernelError::SchemaViolation(format!("handler references unrecognized token '{placeholder}'")));
            }
        }
        Ok(())
    };

    for effect in handler {
        match effect {
            SideEffect::SetAttribute { res, value, .. } => {
                check_res_name(res)?;
                check_token(value)?;
            }
            SideEffect::TransitionStatus { res, target } => {
                check_res_name(res)?;
                check_token(target)?;
            }
            SideEffect::CreateRes { attributes, .. } => {
                for token in attributes.iter().flatten().map(|(_, t)| t) {
                    check_token(token)?;
                }
            }
            SideEffect::CreateLog { message, severity, res } | SideEffect::CreateError { message, severity, res } => {
                check_token(message)?;
                if let Some(severity) = severity {
                    check_token(severity)?;
                }
                if let Some(res) = res {
                    check_res_name(res)?;
                }
            }
            SideEffect::CreateTask { title, description, res, priority, target_agent_type, context_res_ids } => {
                check_token(title)?;
                if let Some(description) = description {
                    check_token(description)?;
                }
                if let Some(priority) = priority {
                    check_token(priority)?;
                }
                if let Some(target_agent_type) = target_agent_type {
                    check_token(target_agent_type)?;
                }
                if let Some(res) = res {
                    check_res_name(res)?;
                }
                for name in context_res_ids.iter().flatten() {
                    check_res_name(name)?;
                }
            }
        }
    }
    Ok(())
}

/// Every `$...` placeholder contained in `token`, whole or embedded.
fn placeholders_in(token: &Token) -> Vec<String> {
    let raw = match token {
        Token::Literal(_) => return Vec::new(),
        Token::Whole(raw) | Token::Template(raw) => raw.as_str(),
    };
    let mut found = Vec::new();
    let mut rest = raw;
    while let Some(start) = rest.find('$') {
        let candidate = &rest[start..];
        let end = candidate[1..].find(|c: char| !(c.is_alphanumeric() || c == '.' || c == '_')).map(|i| i + 1).unwrap_or(candidate.len());
        found.push(candidate[..end].to_string());
        rest = &candidate[end..];
    }
    found
}

/// Materialized action definition (`fold_action`'s output).
#[derive(Debug, Clone, Default)]
pub struct ActionDef {
    pub resources: BTreeMap<String, ActionResource>,
    pub parameters: BTreeMap<String, ActionParameter>,
    pub handler: Vec<SideEffect>,
}

/// Outcome of `Kernel::execute_action`: errors are captured and returned
/// rather than propagated, via a capture-and-return channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Ok { action_taken: u64, tessellae: Vec<FactId>, params_hash: String },
    Err { error: String },
}

impl<S: Store> Kernel<S> {
    /// Materializes an action's resources/parameters/handler by folding its
    /// own fact stream (mirrors `get_genus_def`, but into `ActionDef` instead
    /// of `GenusDef` since an action handler's shape isn't part of the
    /// generic genus record).
    pub fn get_action_def(&self, action_genus_id: ResId) -> Result<ActionDef, KernelError> {
        let facts = self.store.list(action_genus_id, &self.current_branch);
        if facts.is_empty() {
            return Err(KernelError::NotFound(format!("action genus {action_genus_id}")));
        }
        Ok(facts.iter().fold(ActionDef::default(), |state, fact| fold_action(state, fact)))
    }

    /// Defines or extends an action's resources, parameters, and handler
    /// A handler is appended only once per action —
    /// re-evolving a resource/parameter list is additive like genus
    /// evolution, but the handler itself is whole-sale replaced since it has
    /// no meaningful partial-merge semantics.
    pub fn evolve_action_handler(
        &mut self,
        action_genus_id: ResId,
        resources: Vec<(String, String, Option<String>)>,
        parameters: Vec<(String, AttributeType, bool)>,
        handler: Vec<SideEffect>,
    ) -> Result<(), KernelError> {
        let current = self.get_action_def(action_genus_id)?;
        validate_action_handler(&resources, &parameters, &handler)?;
        let branch = self.current_branch.clone();
        for (name, genus_name, required_status) in resources {
            if current.resources.contains_key(&name) {
                continue;
            }
            self.store.append(action_genus_id, &branch, FactType::ActionResourceDefined { name, genus_name, required_status }, None)?;
        }
        for (name, param_type, required) in parameters {
            if current.parameters.contains_key(&name) {
                continue;
            }
            self.store.append(action_genus_id, &branch, FactType::ActionParameterDefined { name, param_type, required }, None)?;
        }
        if !handler.is_empty() && current.handler.is_empty() {
            self.store.append(action_genus_id, &branch, FactType::ActionHandlerDefined { handler }, None)?;
        }
        Ok(())
    }

    /// Runs one action invocation to completion, never raising to the
    /// caller. `resource_bindings` maps each declared
    /// resource name to the entity bound to it; `params` maps each declared
    /// parameter name to its argument value.
    pub fn execute_action(&mut self, action_genus_id: ResId, resource_bindings: BTreeMap<String, ResId>, params: BTreeMap<String, Json>) -> ActionOutcome {
        match self.execute_action_inner(action_genus_id, &resource_bindings, &params) {
            Ok(outcome) => outcome,
            Err(e) => ActionOutcome::Err { error: e.to_string() },
        }
    }

    fn execute_action_inner(&mut self, action_genus_id: ResId, resource_bindings: &BTreeMap<String, ResId>, params: &BTreeMap<String, Json>) -> Result<ActionOutcome, KernelError> {
        let branch = self.current_branch.clone();
        let resources_json = serde_json::to_value(resource_bindings.iter().map(|(k, v)| (k.clone(), v.to_string())).collect::<BTreeMap<_, _>>()).unwrap_or(Json::Null);
        let params_json = serde_json::to_value(params).unwrap_or(Json::Null);
        let input_id = self.store.record_input(InputKind::Push, None, Json::Object(
            [("action_genus_id".to_string(), Json::String(action_genus_id.to_string())), ("resources".to_string(), resources_json.clone()), ("params".to_string(), params_json.clone())]
                .into_iter()
                .collect(),
        ), &branch);

        let def = self.get_action_def(action_genus_id)?;

        let mut bound_resources = BTreeMap::new();
        for (name, resource) in &def.resources {
            let entity_id = *resource_bindings.get(name).ok_or_else(|| KernelError::NotFound(format!("resource binding '{name}'")))?;
            let entity_genus = self.materialize_entity(entity_id, None).genus_id.ok_or_else(|| KernelError::NotFound(format!("entity {entity_id}")))?;
            let entity_genus_def = self.get_genus_def(entity_genus)?;
            let actual_name = entity_genus_def.name().unwrap_or_default();
            if !actual_name.eq_ignore_ascii_case(&resource.genus_name) {
                return Err(KernelError::SchemaViolation(format!("resource '{name}' expects genus '{}', got '{actual_name}'", resource.genus_name)));
            }
            if let Some(required) = &resource.required_status {
                let status = self.materialize_entity(entity_id, None).status;
                if status.as_deref() != Some(required.as_str()) {
                    return Err(KernelError::SchemaViolation(format!("resource '{name}' requires status '{required}', found {status:?}")));
                }
            }
            bound_resources.insert(name.clone(), entity_id);
        }

        for (name, parameter) in &def.parameters {
            let value = params.get(name);
            if parameter.required && value.is_none() {
                return Err(KernelError::SchemaViolation(format!("missing required parameter '{name}'")));
            }
            if let Some(value) = value {
                if !parameter.param_type.matches(value) {
                    return Err(KernelError::TypeMismatch { attribute: name.clone(), expected: parameter.param_type.as_str().to_string(), actual: value.to_string() });
                }
            }
        }

        let ctx = SubstitutionContext { params: params.clone(), resources: bound_resources, now: Utc::now() };
        let effects = resolve_effects(&def.handler, &ctx)?;

        // Validate the entire batch against a simulated view of the affected
        // entities before appending anything, so a later effect's failure
        // can never leave an earlier effect's fact committed
        // step 6: "any validation error within an effect aborts the
        // transaction"). Nothing here touches the store.
        self.simulate_effects(&effects)?;

        let mut tessellae = Vec::new();
        for effect in &effects {
            tessellae.extend(self.apply_effect(effect)?);
        }

        let params_hash = hash_value(&params_json);
        let action_taken_id = self.store.record_action_taken(action_genus_id, input_id, resources_json, params_json, tessellae.clone(), &branch);
        Ok(ActionOutcome::Ok { action_taken: action_taken_id, tessellae, params_hash })
    }

    /// Dry-runs every effect in order against a simulated copy of whatever
    /// state it reads, so that multi-effect handlers (e.g. set an attribute
    /// then transition status) are checked as a whole before the first fact
    /// is appended. Only `TransitionStatus` carries cross-effect state
    /// within one handler (a later transition may depend on a status an
    /// earlier effect in the same handler just set); everything else
    /// validates against genus definitions that no effect in this handler
    /// can change.
    fn simulate_effects(&self, effects: &[ResolvedEffect]) -> Result<(), KernelError> {
        let mut simulated_status: BTreeMap<ResId, String> = BTreeMap::new();
        for effect in effects {
            match effect {
                ResolvedEffect::SetAttribute { res, key, value } => {
                    let genus_id = self.materialize_entity(*res, None).genus_id.ok_or_else(|| KernelError::NotFound(format!("entity {res}")))?;
                    let def = self.get_genus_def(genus_id)?;
                    let attr = def.attributes.get(key).ok_or_else(|| KernelError::UnknownAttribute(key.clone()))?;
                    if !attr.attr_type.matches(value) {
                        return Err(KernelError::TypeMismatch { attribute: key.clone(), expected: attr.attr_type.as_str().to_string(), actual: value.to_string() });
                    }
                }
                ResolvedEffect::TransitionStatus { res, target } => {
                    let genus_id = self.materialize_entity(*res, None).genus_id.ok_or_else(|| KernelError::NotFound(format!("entity {res}")))?;
                    let def = self.get_genus_def(genus_id)?;
                    let current = match simulated_status.get(res) {
                        Some(s) => s.clone(),
                        None => self
                            .materialize_entity(*res, None)
                            .status
                            .ok_or_else(|| KernelError::InvalidTransition { from: "<none>".into(), to: target.clone(), valid_targets: String::new() })?,
                    };
                    if !def.states.contains_key(target) {
                        return Err(KernelError::SchemaViolation(format!("undefined state '{target}'")));
                    }
                    if !def.has_transition(&current, target) {
                        let valid: Vec<&str> = def.transitions_from(&current).collect();
                        return Err(KernelError::InvalidTransition { from: current, to: target.clone(), valid_targets: valid.join(", ") });
                    }
                    simulated_status.insert(*res, target.clone());
                }
                ResolvedEffect::CreateRes { genus_name, attributes } => {
                    let genus_id = self.find_genus_by_name(GenusKind::Entity, genus_name).ok_or_else(|| KernelError::NotFound(format!("genus '{genus_name}'")))?;
                    let def = self.get_genus_def(genus_id)?;
                    self.reject_deprecated_or_archived(&def)?;
                    for (key, value) in attributes {
                        let attr = def.attributes.get(key).ok_or_else(|| KernelError::UnknownAttribute(key.clone()))?;
                        if !attr.attr_type.matches(value) {
                            return Err(KernelError::TypeMismatch { attribute: key.clone(), expected: attr.attr_type.as_str().to_string(), actual: value.to_string() });
                        }
                    }
                }
                ResolvedEffect::CreateLog { .. } | ResolvedEffect::CreateError { .. } | ResolvedEffect::CreateTask { .. } => {}
            }
        }
        Ok(())
    }

    fn apply_effect(&mut self, effect: &ResolvedEffect) -> Result<Vec<FactId>, KernelError> {
        match effect {
            ResolvedEffect::SetAttribute { res, key, value } => {
                self.set_attribute(*res, key, value.clone())?;
                Ok(vec![self.store.max_fact_id()])
            }
            ResolvedEffect::TransitionStatus { res, target } => {
                self.transition_status(*res, target)?;
                Ok(vec![self.store.max_fact_id()])
            }
            ResolvedEffect::CreateRes { genus_name, attributes } => {
                let genus_id = self.find_genus_by_name(GenusKind::Entity, genus_name).ok_or_else(|| KernelError::NotFound(format!("genus '{genus_name}'")))?;
                let entity_id = self.create_entity(genus_id, None)?;
                let mut ids = vec![self.store.max_fact_id()];
                for (key, value) in attributes {
                    self.set_attribute(entity_id, key, value.clone())?;
                    ids.push(self.store.max_fact_id());
                }
                Ok(ids)
            }
            ResolvedEffect::CreateLog { message, severity, res } => self.create_audit_entity("log", message, severity.as_deref(), *res),
            ResolvedEffect::CreateError { message, severity, res } => self.create_audit_entity("error", message, severity.as_deref(), *res),
            ResolvedEffect::CreateTask { title, description, res, priority, target_agent_type, context_res_ids } => {
                let branch = self.current_branch.clone();
                let genus_id = crate::constants::sentinel_id_for("task").expect("task sentinel is always bootstrapped");
                let task_id = ResId::new();
                let mut ids = Vec::new();
                ids.push(self.store.append(task_id, &branch, FactType::Created { genus_id }, None)?);
                ids.push(self.store.append(task_id, &branch, FactType::AttributeSet { key: "title".into(), value: Json::String(title.clone()) }, None)?);
                ids.push(self.store.append(task_id, &branch, FactType::StatusChanged { status: "pending".into() }, None)?);
                if let Some(description) = description {
                    ids.push(self.store.append(task_id, &branch, FactType::AttributeSet { key: "description".into(), value: Json::String(description.clone()) }, None)?);
                }
                if let Some(priority) = priority {
                    ids.push(self.store.append(task_id, &branch, FactType::AttributeSet { key: "priority".into(), value: Json::String(priority.clone()) }, None)?);
                }
                if let Some(target_agent_type) = target_agent_type {
                    ids.push(self.store.append(task_id, &branch, FactType::AttributeSet { key: "target_agent_type".into(), value: Json::String(target_agent_type.clone()) }, None)?);
                }
                if let Some(res) = res {
                    ids.push(self.store.append(task_id, &branch, FactType::AttributeSet { key: "res".into(), value: Json::String(res.to_string()) }, None)?);
                }
                if !context_res_ids.is_empty() {
                    let list = context_res_ids.iter().map(|id| Json::String(id.to_string())).collect();
                    ids.push(self.store.append(task_id, &branch, FactType::AttributeSet { key: "context_res_ids".into(), value: Json::Array(list) }, None)?);
                }
                Ok(ids)
            }
        }
    }

    /// Shared body of `create_log`/`create_error`: both append a new entity
    /// under their sentinel genus with a `message` attribute and, if given,
    /// a `severity` attribute and a pointer back to the subject entity. Error
    /// entities point back via `associated_res_id` (read by
    /// `evaluate_health`'s `unacknowledged_error` scan); logs use `res`.
    fn create_audit_entity(&mut self, sentinel_name: &str, message: &str, severity: Option<&str>, subject: Option<ResId>) -> Result<Vec<FactId>, KernelError> {
        let branch = self.current_branch.clone();
        let genus_id = crate::constants::sentinel_id_for(sentinel_name).expect("sentinel is always bootstrapped");
        let subject_key = if sentinel_name == "error" { "associated_res_id" } else { "res" };
        let entity_id = ResId::new();
        let mut ids = Vec::new();
        ids.push(self.store.append(entity_id, &branch, FactType::Created { genus_id }, None)?);
        ids.push(self.store.append(entity_id, &branch, FactType::AttributeSet { key: "message".into(), value: Json::String(message.to_string()) }, None)?);
        ids.push(self.store.append(entity_id, &branch, FactType::StatusChanged { status: "open".into() }, None)?);
        if let Some(severity) = severity {
            ids.push(self.store.append(entity_id, &branch, FactType::AttributeSet { key: "severity".into(), value: Json::String(severity.to_string()) }, None)?);
        }
        if let Some(subject) = subject {
            ids.push(self.store.append(entity_id, &branch, FactType::AttributeSet { key: subject_key.into(), value: Json::String(subject.to_string()) }, None)?);
        }
        Ok(ids)
    }
}
