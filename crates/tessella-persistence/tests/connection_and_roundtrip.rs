//! Requires a live `DATABASE_URL`; skipped otherwise since there is no
//! database available in this environment.

use diesel::connection::SimpleConnection;
use tessella_core::event::Store;
use tessella_core::FactType;
use tessella_domain::ResId;

#[test]
fn create_pool_from_env() {
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("DATABASE_URL not set: skipping");
        return;
    }
    let cfg = tessella_persistence::DbConfig::from_env();
    let pool = tessella_persistence::build_pool(&cfg.url, cfg.min_connections, cfg.max_connections).expect("pool");
    let mut conn = pool.get().expect("conn");
    conn.batch_execute("SELECT 1;").expect("select 1");
}

#[test]
fn append_and_list_round_trips_through_postgres() {
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("DATABASE_URL not set: skipping");
        return;
    }
    let pool = tessella_persistence::build_dev_pool_from_env().expect("pool");
    let mut store = tessella_persistence::PgStore::new(tessella_persistence::PoolProvider { pool });

    let res_id = ResId::new();
    let genus_id = ResId::new();
    store.append(res_id, "main", FactType::Created { genus_id }, None).expect("append created");
    store.append(res_id, "main", FactType::StatusChanged { status: "active".into() }, None).expect("append status");

    let facts = store.list(res_id, "main");
    assert_eq!(facts.len(), 2);
    assert!(matches!(facts[0].fact_type, FactType::Created { .. }));
    assert!(matches!(facts[1].fact_type, FactType::StatusChanged { .. }));
}
