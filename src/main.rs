//! A richer walkthrough of the tessella engine than `tessella-cli`'s
//! scenario smoke test: one continuous story spanning genus definition,
//! entity/feature/relationship lifecycle, an action, a process, and a
//! branch-and-merge, all against a single in-memory kernel.

use std::collections::BTreeMap;

use tessella::{ActionOutcome, AttributeType, Cardinality, GenusSpec, Kernel, MergeOutcome};
use tessella_core::action::{SideEffect, Token};
use tessella_core::event::InMemoryStore;
use tessella_core::process::{LaneDef, StepDef, StepKind};
use serde_json::json;

fn main() {
    env_logger::init();

    let mut kernel = Kernel::new(InMemoryStore::new()).expect("kernel boots and bootstraps sentinels");
    println!("kernel opened on branch '{}'", kernel.current_branch);

    // --- genus definitions -------------------------------------------------
    let project = kernel
        .define_entity_genus(GenusSpec {
            name: "project".into(),
            attributes: vec![("title".into(), AttributeType::Text, true, None)],
            states: vec![("planning".into(), true), ("active".into(), false), ("done".into(), false)],
            transitions: vec![("planning".into(), "active".into(), None), ("active".into(), "done".into(), None)],
            ..Default::default()
        })
        .expect("define project genus");

    let milestone = kernel
        .define_feature_genus(GenusSpec {
            name: "milestone".into(),
            attributes: vec![("label".into(), AttributeType::Text, true, None)],
            states: vec![("open".into(), true), ("closed".into(), false)],
            transitions: vec![("open".into(), "closed".into(), None)],
            ..Default::default()
        })
        .expect("define milestone feature genus");

    let contributor = kernel.define_entity_genus(GenusSpec { name: "contributor".into(), ..Default::default() }).expect("define contributor genus");

    let staffed_by = kernel
        .define_relationship_genus(GenusSpec {
            name: "staffed_by".into(),
            roles: vec![("contributor".into(), vec!["contributor".into()], Cardinality::OneOrMore)],
            ..Default::default()
        })
        .expect("define staffed_by relationship genus");

    // --- entity + feature + relationship lifecycle --------------------------
    let proj = kernel.create_entity(project, None).expect("create project");
    kernel.set_attribute(proj, "title", json!("tessella rollout")).expect("set title");

    let milestone_id = kernel
        .create_feature(proj, "project", milestone, BTreeMap::from([("label".to_string(), json!("kickoff"))]))
        .expect("create milestone feature");
    println!("project {proj} has milestone feature {milestone_id}");

    let alice = kernel.create_entity(contributor, None).expect("create contributor");
    let mut members = BTreeMap::new();
    members.insert("contributor".to_string(), vec![alice]);
    let staffing = kernel.create_relationship(staffed_by, members, BTreeMap::new()).expect("staff project");
    println!("relationship {staffing} staffs contributor {alice} onto project {proj}");

    kernel.transition_feature_status(proj, &milestone_id, milestone, "closed").expect("close milestone");
    kernel.transition_status(proj, "active").expect("advance project to active");

    let state = kernel.materialize_entity(proj, None);
    assert_eq!(state.status.as_deref(), Some("active"));
    assert_eq!(state.features.get(&milestone_id).and_then(|f| f.status.clone()).as_deref(), Some("closed"));
    println!("project status={:?}, milestone status={:?}", state.status, state.features.get(&milestone_id).and_then(|f| f.status.clone()));

    // --- an action wrapping attribute set + transition in one call ---------
    let rename_and_finish = kernel
        .define_action_genus(GenusSpec { name: "rename_and_finish".into(), ..Default::default() })
        .expect("define action genus");
    kernel
        .evolve_action_handler(
            rename_and_finish,
            vec![("project".into(), "project".into(), Some("active".into()))],
            vec![("title".into(), AttributeType::Text, true)],
            vec![
                SideEffect::SetAttribute { res: "project".into(), key: "title".into(), value: Token::parse("$param.title") },
                SideEffect::TransitionStatus { res: "project".into(), target: Token::parse("done") },
            ],
        )
        .expect("define action handler");

    let mut bindings = BTreeMap::new();
    bindings.insert("project".to_string(), proj);
    let mut params = BTreeMap::new();
    params.insert("title".to_string(), json!("tessella rollout (shipped)"));
    match kernel.execute_action(rename_and_finish, bindings, params) {
        ActionOutcome::Ok { tessellae, .. } => println!("action committed {} facts", tessellae.len()),
        ActionOutcome::Err { error } => panic!("expected the action to succeed, got {error}"),
    }

    // --- a process with one task step, driven to completion -----------------
    let rollout = kernel.define_process_genus(GenusSpec { name: "rollout".into(), ..Default::default() }).expect("define process genus");
    kernel
        .evolve_process_definition(
            rollout,
            vec![LaneDef { name: "main".into(), position: 0 }],
            vec![StepDef {
                name: "announce".into(),
                lane: "main".into(),
                kind: StepKind::Task,
                position: 0,
                task_title: Some("Announce rollout".into()),
                action_name: None,
                gate_waits_on: vec![],
                fetch_attribute: None,
                branch_condition: None,
                branch_target: None,
            }],
            vec![],
        )
        .expect("define rollout process steps");
    let instance = kernel.start_process(rollout, proj).expect("start rollout process");
    let tasks = kernel.list_tasks_for_process(instance);
    kernel.complete_task(tasks[0], Some(json!("announced"))).expect("complete announce task");
    let instance_state = kernel.process_instance_state(instance);
    assert!(instance_state.is_terminal());
    println!("rollout process instance {instance} finished with status {:?}", instance_state.status);

    // --- branch, diverge, and merge ------------------------------------------
    kernel.create_branch("experiment", None).expect("create experiment branch");
    kernel.switch_branch("experiment").expect("switch to experiment");
    let experiment_contributor = kernel.create_entity(contributor, None).expect("create contributor on branch");
    kernel.switch_branch("main").expect("switch back to main");

    let conflicts = kernel.detect_conflicts("experiment", "main").expect("detect conflicts");
    println!("experiment vs main conflicts before merge: {}", conflicts.len());
    match kernel.merge_branch("experiment", Some("main"), false).expect("merge experiment into main") {
        MergeOutcome::Merged { tessellae_copied } => println!("merged experiment into main: {tessellae_copied} facts copied"),
        MergeOutcome::Conflicted { conflicts } => panic!("unexpected conflicts on a non-overlapping branch: {conflicts:?}"),
    }
    let merged_state = kernel.materialize_entity(experiment_contributor, Some("main"));
    assert_eq!(merged_state.genus_id, Some(contributor));
    println!("contributor {experiment_contributor} from the experiment branch is now visible on main");

    println!("\ntessella demo finished");

    #[cfg(feature = "pg_demo")]
    run_pg_demo();
}

/// Opens a kernel on a real Postgres-backed store instead of the in-memory
/// one, to show `tessella-persistence` wired in place of `InMemoryStore`.
/// Needs `DATABASE_URL` set and migrated; gated behind `--features pg_demo`
/// so the default build has no Postgres dependency.
#[cfg(feature = "pg_demo")]
fn run_pg_demo() {
    use tessella_persistence::{build_dev_pool_from_env, PgStore, PoolProvider};

    println!("\n-- pg_demo: persisting through tessella-persistence --");
    let pool = build_dev_pool_from_env().expect("DATABASE_URL set and reachable");
    let store = PgStore::new(PoolProvider { pool });
    let mut kernel = Kernel::new(store).expect("kernel boots against Postgres");

    let note = kernel
        .define_entity_genus(GenusSpec { name: "note".into(), attributes: vec![("body".into(), AttributeType::Text, true, None)], ..Default::default() })
        .expect("define note genus");
    let entity = kernel.create_entity(note, None).expect("create note entity");
    kernel.set_attribute(entity, "body", json!("persisted via pg_demo")).expect("set body");
    let state = kernel.materialize_entity(entity, None);
    println!("note {entity} persisted with body {:?}", state.attributes.get("body"));
}
