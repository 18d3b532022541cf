//! End-to-end coverage of attribute/replay, transition, action, branch
//! merge, process, and genus-evolution behavior, run against an in-memory
//! store.

use std::collections::BTreeMap;

use serde_json::json;
use tessella_core::action::{SideEffect, Token};
use tessella_core::event::InMemoryStore;
use tessella_core::process::{LaneDef, StepDef, StepKind};
use tessella_core::{ActionOutcome, GenusSpec, Kernel, MergeOutcome};
use tessella_domain::AttributeType;

fn server_genus<S: tessella_core::event::Store>(kernel: &mut Kernel<S>) -> tessella_domain::ResId {
    kernel
        .define_entity_genus(GenusSpec {
            name: "server".into(),
            attributes: vec![("ip".into(), AttributeType::Text, true, None)],
            states: vec![("provisioning".into(), true), ("active".into(), false)],
            transitions: vec![("provisioning".into(), "active".into(), None)],
            ..Default::default()
        })
        .expect("define server genus")
}

#[test]
fn attribute_set_and_replay() {
    let mut kernel = Kernel::new(InMemoryStore::new()).expect("kernel");
    let server = server_genus(&mut kernel);
    let entity = kernel.create_entity(server, None).expect("create entity");

    kernel.set_attribute(entity, "ip", json!("10.0.0.1")).expect("set ip");
    let first = kernel.materialize_entity(entity, None);
    assert_eq!(first.attributes.get("ip"), Some(&json!("10.0.0.1")));

    // Replaying the same fact stream from scratch must reproduce identical state.
    let replayed = kernel.materialize_entity(entity, None);
    assert_eq!(first.attributes, replayed.attributes);
    assert_eq!(first.status, replayed.status);
}

#[test]
fn invalid_transition_rejected() {
    let mut kernel = Kernel::new(InMemoryStore::new()).expect("kernel");
    let server = server_genus(&mut kernel);
    let entity = kernel.create_entity(server, None).expect("create entity");

    kernel.transition_status(entity, "active").expect("forward transition succeeds");
    let err = kernel.transition_status(entity, "provisioning");
    assert!(err.is_err(), "backward transition must be rejected");
    assert!(matches!(err.unwrap_err(), tessella_core::KernelError::InvalidTransition { .. }));
}

#[test]
fn action_with_tokens() {
    let mut kernel = Kernel::new(InMemoryStore::new()).expect("kernel");
    let server = server_genus(&mut kernel);
    let assign_ip = kernel.define_action_genus(GenusSpec { name: "assign_ip".into(), ..Default::default() }).expect("define action genus");
    kernel
        .evolve_action_handler(
            assign_ip,
            vec![("srv".into(), "server".into(), Some("provisioning".into()))],
            vec![("ip".into(), AttributeType::Text, true)],
            vec![
                SideEffect::SetAttribute { res: "srv".into(), key: "ip".into(), value: Token::parse("$param.ip") },
                SideEffect::TransitionStatus { res: "srv".into(), target: Token::parse("active") },
            ],
        )
        .expect("define handler");

    let entity = kernel.create_entity(server, None).expect("create entity");
    let mut bindings = BTreeMap::new();
    bindings.insert("srv".to_string(), entity);
    let mut params = BTreeMap::new();
    params.insert("ip".to_string(), json!("10.0.0.2"));

    let outcome = kernel.execute_action(assign_ip, bindings, params);
    match outcome {
        ActionOutcome::Ok { tessellae, .. } => assert_eq!(tessellae.len(), 2),
        ActionOutcome::Err { error } => panic!("expected success, got {error}"),
    }
    let state = kernel.materialize_entity(entity, None);
    assert_eq!(state.status.as_deref(), Some("active"));
    assert_eq!(state.attributes.get("ip"), Some(&json!("10.0.0.2")));
}

#[test]
fn action_rejects_wrong_required_status() {
    let mut kernel = Kernel::new(InMemoryStore::new()).expect("kernel");
    let server = server_genus(&mut kernel);
    let assign_ip = kernel.define_action_genus(GenusSpec { name: "assign_ip".into(), ..Default::default() }).expect("define action genus");
    kernel
        .evolve_action_handler(
            assign_ip,
            vec![("srv".into(), "server".into(), Some("active".into()))],
            vec![],
            vec![SideEffect::TransitionStatus { res: "srv".into(), target: Token::parse("active") }],
        )
        .expect("define handler");

    let entity = kernel.create_entity(server, None).expect("create entity");
    let mut bindings = BTreeMap::new();
    bindings.insert("srv".to_string(), entity);

    match kernel.execute_action(assign_ip, bindings, BTreeMap::new()) {
        ActionOutcome::Err { .. } => {}
        ActionOutcome::Ok { .. } => panic!("resource is in the wrong status, action must not succeed"),
    }
}

#[test]
fn branch_divergence_and_merge() {
    let mut kernel = Kernel::new(InMemoryStore::new()).expect("kernel");
    let server = kernel
        .define_entity_genus(GenusSpec {
            name: "server".into(),
            attributes: vec![("ip".into(), AttributeType::Text, false, None), ("tag".into(), AttributeType::Text, false, None)],
            states: vec![("provisioning".into(), true)],
            ..Default::default()
        })
        .expect("define server genus");
    let entity = kernel.create_entity(server, None).expect("create entity");

    kernel.create_branch("b1", None).expect("create branch");
    kernel.switch_branch("b1").expect("switch to b1");
    kernel.set_attribute(entity, "ip", json!("10.0.0.9")).expect("set ip on b1");
    kernel.switch_branch("main").expect("switch to main");
    kernel.set_attribute(entity, "tag", json!("prod")).expect("set tag on main");

    let conflicts = kernel.detect_conflicts("b1", "main").expect("detect conflicts");
    assert_eq!(conflicts.len(), 1, "diverging attributes on the same entity must conflict");

    match kernel.merge_branch("b1", Some("main"), true).expect("merge") {
        MergeOutcome::Merged { tessellae_copied } => assert!(tessellae_copied >= 1),
        MergeOutcome::Conflicted { .. } => panic!("forced merge must not report conflicts"),
    }

    let merged = kernel.materialize_entity(entity, Some("main"));
    assert_eq!(merged.attributes.get("ip"), Some(&json!("10.0.0.9")));
    assert_eq!(merged.attributes.get("tag"), Some(&json!("prod")));
}

#[test]
fn unforced_merge_reports_conflicts_without_mutating() {
    let mut kernel = Kernel::new(InMemoryStore::new()).expect("kernel");
    let server = kernel
        .define_entity_genus(GenusSpec { name: "server".into(), attributes: vec![("ip".into(), AttributeType::Text, false, None)], states: vec![("provisioning".into(), true)], ..Default::default() })
        .expect("define server genus");
    let entity = kernel.create_entity(server, None).expect("create entity");
    kernel.create_branch("b1", None).expect("create branch");
    kernel.switch_branch("b1").expect("switch to b1");
    kernel.set_attribute(entity, "ip", json!("1.1.1.1")).expect("set ip on b1");
    kernel.switch_branch("main").expect("switch to main");
    kernel.set_attribute(entity, "ip", json!("2.2.2.2")).expect("set ip on main");

    match kernel.merge_branch("b1", Some("main"), false).expect("merge attempt") {
        MergeOutcome::Conflicted { conflicts } => assert_eq!(conflicts.len(), 1),
        MergeOutcome::Merged { .. } => panic!("unforced merge over a conflict must not succeed"),
    }
    let main_state = kernel.materialize_entity(entity, Some("main"));
    assert_eq!(main_state.attributes.get("ip"), Some(&json!("2.2.2.2")), "main must be untouched by a rejected merge");
}

#[test]
fn process_and_task_completion() {
    let mut kernel = Kernel::new(InMemoryStore::new()).expect("kernel");
    let article = kernel.define_entity_genus(GenusSpec { name: "article".into(), ..Default::default() }).expect("define article genus");
    let entity = kernel.create_entity(article, None).expect("create entity");

    let review = kernel.define_process_genus(GenusSpec { name: "review".into(), ..Default::default() }).expect("define process genus");
    kernel
        .evolve_process_definition(
            review,
            vec![LaneDef { name: "main".into(), position: 0 }],
            vec![StepDef {
                name: "draft".into(),
                lane: "main".into(),
                kind: StepKind::Task,
                position: 0,
                task_title: Some("Write draft".into()),
                action_name: None,
                gate_waits_on: vec![],
                fetch_attribute: None,
                branch_condition: None,
                branch_target: None,
            }],
            vec![],
        )
        .expect("define process steps");

    let instance = kernel.start_process(review, entity).expect("start process");
    let tasks = kernel.list_tasks_for_process(instance);
    assert_eq!(tasks.len(), 1, "starting the process must create exactly one pending task");
    assert!(!kernel.process_instance_state(instance).is_terminal());

    kernel.complete_task(tasks[0], Some(json!("done"))).expect("complete task");
    assert!(kernel.process_instance_state(instance).is_terminal(), "completing the only task must auto-advance the process to completion");
}

#[test]
fn additive_evolution() {
    let mut kernel = Kernel::new(InMemoryStore::new()).expect("kernel");
    let article = kernel
        .define_entity_genus(GenusSpec { name: "article".into(), attributes: vec![("title".into(), AttributeType::Text, true, None)], ..Default::default() })
        .expect("define article genus");

    kernel
        .evolve_genus(
            article,
            GenusSpec {
                attributes: vec![("title".into(), AttributeType::Text, true, None), ("body".into(), AttributeType::Text, true, None)],
                ..Default::default()
            },
        )
        .expect("evolve genus additively");

    let def = kernel.get_genus_def(article).expect("genus def");
    assert_eq!(def.attributes.len(), 2);
    assert!(def.attributes.contains_key("title"), "original attribute must survive evolution");
    assert!(def.attributes.contains_key("body"), "new attribute must be added");

    // Re-applying the same evolution must be a no-op, not a duplicate fact.
    kernel
        .evolve_genus(article, GenusSpec { attributes: vec![("body".into(), AttributeType::Text, true, None)], ..Default::default() })
        .expect("idempotent re-evolution");
    let def_again = kernel.get_genus_def(article).expect("genus def");
    assert_eq!(def_again.attributes.len(), 2, "re-declaring an existing attribute must not duplicate it");
}
