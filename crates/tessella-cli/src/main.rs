//! tessella-cli: a demonstration binary wiring an in-memory kernel and
//! running a handful of attribute/transition/action/branch/process
//! scenarios as smoke output.
//!
//! A thin binary that builds and runs something real against the library,
//! prints what happened, and asserts the invariants each scenario promises
//! rather than silently trusting them.

use serde_json::json;
use tessella_core::action::{SideEffect, Token};
use tessella_core::event::InMemoryStore;
use tessella_core::genus::GenusSpec;
use tessella_core::process::{LaneDef, StepDef, StepKind};
use tessella_core::{ActionOutcome, Kernel};
use tessella_domain::{AttributeType, Cardinality};

fn main() {
    env_logger::init();
    println!("tessella-cli");
    println!("============");

    scenario_attribute_and_transition();
    scenario_action_with_tokens();
    scenario_branch_and_merge();
    scenario_process_and_task();
    scenario_additive_evolution();

    println!("\nall scenarios completed");
}

/// Defines a `Server` genus, creates an entity, sets an attribute,
/// transitions it, then confirms the invalid-transition rejection.
fn scenario_attribute_and_transition() {
    println!("\n-- attribute set and replay --");
    let mut kernel = Kernel::new(InMemoryStore::new()).expect("kernel");

    let server = kernel
        .define_entity_genus(GenusSpec {
            name: "server".into(),
            attributes: vec![("ip".into(), AttributeType::Text, true, None)],
            states: vec![("provisioning".into(), true), ("active".into(), false)],
            transitions: vec![("provisioning".into(), "active".into(), None)],
            ..Default::default()
        })
        .expect("define server genus");

    let e1 = kernel.create_entity(server, None).expect("create entity");
    let state = kernel.materialize_entity(e1, None);
    assert_eq!(state.status.as_deref(), Some("provisioning"));
    println!("e1 created: status={:?}", state.status);

    kernel.set_attribute(e1, "ip", json!("10.0.0.1")).expect("set ip");
    kernel.transition_status(e1, "active").expect("transition to active");
    let state = kernel.materialize_entity(e1, None);
    assert_eq!(state.status.as_deref(), Some("active"));
    assert_eq!(state.attributes.get("ip"), Some(&json!("10.0.0.1")));
    println!("e1 after set+transition: status={:?} ip={:?}", state.status, state.attributes.get("ip"));

    let rejection = kernel.transition_status(e1, "provisioning");
    assert!(rejection.is_err());
    println!("reverse transition correctly rejected: {}", rejection.unwrap_err());
}

/// An action assigning an ip and transitioning status in one call.
fn scenario_action_with_tokens() {
    println!("\n-- action with tokens --");
    let mut kernel = Kernel::new(InMemoryStore::new()).expect("kernel");

    let server = kernel
        .define_entity_genus(GenusSpec {
            name: "server".into(),
            attributes: vec![("ip".into(), AttributeType::Text, true, None)],
            states: vec![("provisioning".into(), true), ("active".into(), false)],
            transitions: vec![("provisioning".into(), "active".into(), None)],
            ..Default::default()
        })
        .expect("define server genus");

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

    let e2 = kernel.create_entity(server, None).expect("create entity");
    let mut bindings = std::collections::BTreeMap::new();
    bindings.insert("srv".to_string(), e2);
    let mut params = std::collections::BTreeMap::new();
    params.insert("ip".to_string(), json!("10.0.0.2"));

    match kernel.execute_action(assign_ip, bindings, params) {
        ActionOutcome::Ok { tessellae, .. } => println!("action produced {} facts", tessellae.len()),
        ActionOutcome::Err { error } => panic!("expected success, got {error}"),
    }
    let state = kernel.materialize_entity(e2, None);
    assert_eq!(state.status.as_deref(), Some("active"));
    assert_eq!(state.attributes.get("ip"), Some(&json!("10.0.0.2")));
    println!("e2 after action: status={:?} ip={:?}", state.status, state.attributes.get("ip"));
}

/// Branch divergence, conflict detection, and forced merge.
fn scenario_branch_and_merge() {
    println!("\n-- branch divergence and merge --");
    let mut kernel = Kernel::new(InMemoryStore::new()).expect("kernel");

    let server = kernel
        .define_entity_genus(GenusSpec {
            name: "server".into(),
            attributes: vec![("ip".into(), AttributeType::Text, false, None), ("tag".into(), AttributeType::Text, false, None)],
            states: vec![("provisioning".into(), true)],
            ..Default::default()
        })
        .expect("define server genus");
    let e1 = kernel.create_entity(server, None).expect("create entity");

    kernel.create_branch("b1", None).expect("create branch");
    kernel.switch_branch("b1").expect("switch to b1");
    kernel.set_attribute(e1, "ip", json!("10.0.0.9")).expect("set ip on b1");
    kernel.switch_branch("main").expect("switch to main");
    kernel.set_attribute(e1, "tag", json!("prod")).expect("set tag on main");

    let conflicts = kernel.detect_conflicts("b1", "main").expect("detect conflicts");
    assert_eq!(conflicts.len(), 1);
    println!("detected {} conflict(s) on entity {}", conflicts.len(), conflicts[0].res_id);

    let outcome = kernel.merge_branch("b1", Some("main"), true).expect("merge");
    match &outcome {
        tessella_core::MergeOutcome::Merged { tessellae_copied } => {
            assert!(*tessellae_copied >= 1);
            println!("merged: {tessellae_copied} facts copied onto main");
        }
        tessella_core::MergeOutcome::Conflicted { .. } => panic!("forced merge should not report conflicts"),
    }

    let state = kernel.materialize_entity(e1, Some("main"));
    assert_eq!(state.attributes.get("ip"), Some(&json!("10.0.0.9")));
    assert_eq!(state.attributes.get("tag"), Some(&json!("prod")));
    println!("main after merge: ip={:?} tag={:?}", state.attributes.get("ip"), state.attributes.get("tag"));
}

/// A one-lane, one-step process that waits on a task and auto-advances
/// to completion when that task is completed.
fn scenario_process_and_task() {
    println!("\n-- process + task completion --");
    let mut kernel = Kernel::new(InMemoryStore::new()).expect("kernel");

    let article = kernel.define_entity_genus(GenusSpec { name: "article".into(), ..Default::default() }).expect("define article genus");
    let e1 = kernel.create_entity(article, None).expect("create article");

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

    let instance = kernel.start_process(review, e1).expect("start process");
    let tasks = kernel.list_tasks_for_process(instance);
    assert_eq!(tasks.len(), 1);
    println!("process instance {instance} created 1 pending task");

    kernel.complete_task(tasks[0], Some(json!("done"))).expect("complete task");
    let instance_state = kernel.process_instance_state(instance);
    assert!(instance_state.is_terminal());
    println!("process instance status: {:?}", instance_state.status);
}

/// Evolving a genus only appends the genuinely new attribute.
fn scenario_additive_evolution() {
    println!("\n-- additive evolution --");
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
        .expect("evolve genus");

    let def = kernel.get_genus_def(article).expect("genus def");
    assert_eq!(def.attributes.len(), 2);
    assert!(def.attributes.contains_key("body"));
    println!("genus now has {} attributes: {:?}", def.attributes.len(), def.attributes.keys().collect::<Vec<_>>());

    // Roles and relationships get a quick showing too: an "authored_by"
    // relationship between an article and an author, one-or-more
    // cardinality.
    let author = kernel.define_entity_genus(GenusSpec { name: "author".into(), ..Default::default() }).expect("define author genus");
    let authored_by = kernel
        .define_relationship_genus(GenusSpec { name: "authored_by".into(), roles: vec![("author".into(), vec!["author".into()], Cardinality::OneOrMore)], ..Default::default() })
        .expect("define relationship genus");
    let article_entity = kernel.create_entity(article, None).expect("create article entity");
    let author_entity = kernel.create_entity(author, None).expect("create author entity");
    let mut members = std::collections::BTreeMap::new();
    members.insert("author".to_string(), vec![author_entity]);
    kernel.create_relationship(authored_by, members, std::collections::BTreeMap::new()).expect("create relationship");
    println!("relationship authored_by linked article {article_entity} to author {author_entity}");
}
