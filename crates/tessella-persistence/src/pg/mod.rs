//! Postgres (Diesel) implementation of `tessella_core::Store`.
//!
//! An append-only table ordered by a `BIGSERIAL` global sequence, a thin
//! `ConnectionProvider` trait so tests can swap in a fake pool, and
//! `with_retry`/`is_retryable` around the handful of transient Postgres
//! failures worth a bounded retry. There is exactly one fact table
//! (`tessellae`) rather than a fact table plus a side table per concern —
//! every mutation is modeled as one append, including relationship
//! membership and process progression, so there is nothing else to shard
//! rows across.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use log::{debug, warn};
use serde_json::Value as Json;

use tessella_core::event::{ActionTakenRecord, InputKind, Store};
use tessella_core::errors::KernelError;
use tessella_core::{Fact, FactType};
use tessella_domain::{FactId, ResId};

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::{actions_taken, inputs, serialization_runs, tessellae};

pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Abstracts obtaining a pooled connection, so unit tests can swap in a fake
/// provider without standing up r2d2.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError>;
}

pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError> {
        self.pool.get().map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

#[derive(Queryable, Debug)]
struct TessellaRow {
    id: i64,
    res_id: String,
    branch_id: String,
    fact_type: String,
    payload: Json,
    source: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = tessellae)]
struct NewTessellaRow<'a> {
    res_id: &'a str,
    branch_id: &'a str,
    fact_type: &'a str,
    payload: &'a Json,
    source: Option<&'a str>,
    created_at: DateTime<Utc>,
}

#[derive(Queryable, Debug)]
struct InputRow {
    id: i64,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = inputs)]
struct NewInputRow<'a> {
    kind: &'a str,
    source: Option<&'a str>,
    data: &'a Json,
    branch_id: &'a str,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = actions_taken)]
struct NewActionTakenRow<'a> {
    action_genus_id: &'a str,
    input_id: i64,
    resources: &'a Json,
    params: &'a Json,
    tessellae_ids: Json,
    branch_id: &'a str,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = serialization_runs)]
struct NewSerializationRunRow<'a> {
    target_genus_id: &'a str,
    direction: &'a str,
    entity_ids: &'a Json,
    output_path: Option<&'a str>,
    tessellae_created: Json,
    branch_id: &'a str,
}

/// Is this error worth retrying with a short backoff? Serialization
/// conflicts and pool/connection hiccups are, constraint violations and
/// not-found are not.
fn is_retryable(e: &PersistenceError) -> bool {
    match e {
        PersistenceError::SerializationConflict => true,
        PersistenceError::TransientIo(_) => true,
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("deadlock detected")
                || m.contains("could not serialize access due to concurrent update")
                || m.contains("terminating connection due to administrator command")
                || m.contains("connection closed")
                || m.contains("connection refused")
                || m.contains("timeout")
        }
        _ => false,
    }
}

fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
where
    F: FnMut() -> Result<T, PersistenceError>,
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * (attempts + 1);
                warn!("retryable persistence error (attempt {}): {e}; sleeping {delay_ms}ms", attempts + 1);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms as u64));
                attempts += 1;
            }
            r => return r,
        }
    }
}

fn row_to_fact(row: TessellaRow) -> Option<Fact> {
    let fact_type: FactType = serde_json::from_value(row.payload).ok()?;
    let res_id = ResId::parse(&row.res_id)?;
    Some(Fact { id: row.id as FactId, res_id, branch_id: row.branch_id, fact_type, created_at: row.created_at, source: row.source })
}

/// Durable fact log backed by Postgres. Every `tessella_core::Store` method
/// is a thin query against the `tessellae`/`inputs`/`actions_taken` tables;
/// there is no in-process cache, so every call round-trips the pool.
pub struct PgStore<P: ConnectionProvider> {
    provider: P,
}

impl<P: ConnectionProvider> PgStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: ConnectionProvider> Store for PgStore<P> {
    fn append(&mut self, res_id: ResId, branch_id: &str, fact_type: FactType, source: Option<String>) -> Result<FactId, KernelError> {
        self.append_with_timestamp(res_id, branch_id, fact_type, source, Utc::now())
    }

    fn append_with_timestamp(
        &mut self,
        res_id: ResId,
        branch_id: &str,
        fact_type: FactType,
        source: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<FactId, KernelError> {
        let res_id_text = res_id.to_string();
        let tag = fact_type.type_tag();
        let payload = serde_json::to_value(&fact_type).map_err(|e| KernelError::Storage(format!("serialize fact: {e}")))?;
        debug!("append res_id={res_id_text} branch_id={branch_id} fact_type={tag}");
        let id: i64 = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(tessellae::table)
                .values(NewTessellaRow { res_id: &res_id_text, branch_id, fact_type: &tag, payload: &payload, source: source.as_deref(), created_at })
                .returning(tessellae::id)
                .get_result(&mut conn)
                .map_err(PersistenceError::from)
        })
        .map_err(KernelError::from)?;
        Ok(id as FactId)
    }

    fn list(&self, res_id: ResId, branch_id: &str) -> Vec<Fact> {
        let res_id_text = res_id.to_string();
        let rows: Vec<TessellaRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            tessellae::table
                .filter(tessellae::res_id.eq(&res_id_text))
                .filter(tessellae::branch_id.eq(branch_id))
                .order(tessellae::id.asc())
                .load(&mut conn)
                .map_err(PersistenceError::from)
        })
        .unwrap_or_default();
        rows.into_iter().filter_map(row_to_fact).collect()
    }

    fn list_all_branches(&self, res_id: ResId) -> Vec<Fact> {
        let res_id_text = res_id.to_string();
        let rows: Vec<TessellaRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            tessellae::table.filter(tessellae::res_id.eq(&res_id_text)).order(tessellae::id.asc()).load(&mut conn).map_err(PersistenceError::from)
        })
        .unwrap_or_default();
        rows.into_iter().filter_map(row_to_fact).collect()
    }

    fn distinct_entity_ids_for_branch(&self, branch_id: &str) -> Vec<ResId> {
        let ids: Vec<String> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            tessellae::table.filter(tessellae::branch_id.eq(branch_id)).select(tessellae::res_id).distinct().load(&mut conn).map_err(PersistenceError::from)
        })
        .unwrap_or_default();
        ids.iter().filter_map(|s| ResId::parse(s)).collect()
    }

    fn max_fact_id(&self) -> FactId {
        let max: Option<i64> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            tessellae::table.select(diesel::dsl::max(tessellae::id)).first(&mut conn).map_err(PersistenceError::from)
        })
        .unwrap_or(None);
        max.unwrap_or(0) as FactId
    }

    fn record_input(&mut self, kind: InputKind, source: Option<String>, data: Json, branch_id: &str) -> u64 {
        let kind_tag = match kind {
            InputKind::Push => "push",
            InputKind::Pull => "pull",
        };
        let id: i64 = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(inputs::table)
                .values(NewInputRow { kind: kind_tag, source: source.as_deref(), data: &data, branch_id })
                .returning(inputs::id)
                .get_result(&mut conn)
                .map_err(PersistenceError::from)
        })
        .expect("insert input row");
        id as u64
    }

    fn record_action_taken(
        &mut self,
        action_genus_id: ResId,
        input_id: u64,
        resources: Json,
        params: Json,
        tessellae_ids: Vec<FactId>,
        branch_id: &str,
    ) -> u64 {
        let action_genus_id_text = action_genus_id.to_string();
        let tessellae_ids_json = serde_json::to_value(&tessellae_ids).expect("serialize tessellae_ids");
        let id: i64 = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(actions_taken::table)
                .values(NewActionTakenRow {
                    action_genus_id: &action_genus_id_text,
                    input_id: input_id as i64,
                    resources: &resources,
                    params: &params,
                    tessellae_ids: tessellae_ids_json.clone(),
                    branch_id,
                })
                .returning(actions_taken::id)
                .get_result(&mut conn)
                .map_err(PersistenceError::from)
        })
        .expect("insert action_taken row");
        id as u64
    }

    fn record_serialization_run(
        &mut self,
        target_genus_id: ResId,
        direction: &str,
        entity_ids: Json,
        output_path: Option<String>,
        tessellae_created: Vec<FactId>,
        branch_id: &str,
    ) -> u64 {
        let target_genus_id_text = target_genus_id.to_string();
        let tessellae_created_json = serde_json::to_value(&tessellae_created).expect("serialize tessellae_created");
        let id: i64 = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(serialization_runs::table)
                .values(NewSerializationRunRow {
                    target_genus_id: &target_genus_id_text,
                    direction,
                    entity_ids: &entity_ids,
                    output_path: output_path.as_deref(),
                    tessellae_created: tessellae_created_json.clone(),
                    branch_id,
                })
                .returning(serialization_runs::id)
                .get_result(&mut conn)
                .map_err(PersistenceError::from)
        })
        .expect("insert serialization_run row");
        id as u64
    }
}

impl<P: ConnectionProvider> PgStore<P> {
    /// Reads back `action_taken` rows for diagnostics and the audit API;
    /// `InputRow` is unused beyond confirming the join target exists.
    pub fn action_taken_count(&self) -> i64 {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            actions_taken::table.count().get_result(&mut conn).map_err(PersistenceError::from)
        })
        .unwrap_or(0)
    }

    #[allow(dead_code)]
    fn assert_input_exists(&self, input_id: i64) -> bool {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            inputs::table.find(input_id).first::<InputRow>(&mut conn).map(|_| true).or(Ok(false))
        })
        .unwrap_or(false)
    }
}

/// Builds a migrated r2d2 pool from an explicit URL and pool bounds.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = min_size.max(1);
    let validated_max = max_size.max(1).max(validated_min);
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder()
        .min_idle(Some(validated_min))
        .max_size(validated_max)
        .build(manager)
        .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get().map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Development convenience: load `.env`, read `DbConfig::from_env`, build and
/// migrate a pool.
pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = crate::config::DbConfig::from_env();
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}
