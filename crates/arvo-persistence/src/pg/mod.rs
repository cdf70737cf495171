//! Postgres (Diesel) implementation of `arvo_core::memory::MemoryStore`.
//!
//! Durability parity with the in-memory backend: `read`/`write` round-trip
//! the same `Record` enum (serialized whole into a `JSONB` column), and
//! every write is additionally appended to `orchestration_event_log` in the
//! same transaction, giving an audit trail without a second round trip.
//! Locking is a row in `orchestration_locks`, acquired with
//! `ON CONFLICT DO NOTHING` rather than a database advisory lock, so
//! ownership is visible to plain `SELECT`s.

use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use log::{debug, warn};
use serde_json::Value;

use arvo_core::memory::{LockOutcome, MemoryStore, Record};
use arvo_model::errors::ViolationError;

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::{orchestration_event_log, orchestration_locks, orchestration_records};

pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Abstracted connection acquisition, so a `PgMemoryStore` can be
/// constructed over a fake provider in unit tests without a live pool.
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
#[allow(dead_code)]
struct RecordRow {
    subject: String,
    parent_subject: Option<String>,
    record: Value,
    version: i64,
}

#[derive(Insertable, AsChangeset)]
#[diesel(table_name = orchestration_records)]
struct NewRecordRow<'a> {
    subject: &'a str,
    parent_subject: Option<&'a str>,
    record: &'a Value,
    version: i64,
}

#[derive(Insertable)]
#[diesel(table_name = orchestration_event_log)]
struct NewEventLogRow<'a> {
    subject: &'a str,
    record: &'a Value,
}

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

/// Up to 3 attempts, 15/30/45ms backoff, matching the persistence layer's
/// other retryable operations.
fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
where
    F: FnMut() -> Result<T, PersistenceError>,
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * (attempts + 1);
                warn!("retryable persistence error (attempt {}): {e} -> sleeping {delay_ms}ms", attempts + 1);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

fn parent_subject_of(record: &Record) -> Option<String> {
    match record {
        Record::Normal { parent_subject, .. } => parent_subject.clone(),
        Record::Failure { .. } => None,
    }
}

/// Postgres-backed `MemoryStore`. Generic over `ConnectionProvider` so tests
/// can substitute a stub; production code reaches for `PoolProvider`. Held
/// behind an `Arc` so each async method can move a cheap clone into
/// `spawn_blocking` (Diesel connections are not `Send` across an `.await`).
pub struct PgMemoryStore<P: ConnectionProvider> {
    provider: Arc<P>,
}

impl<P: ConnectionProvider> PgMemoryStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider: Arc::new(provider) }
    }
}

#[async_trait]
impl<P: ConnectionProvider> MemoryStore for PgMemoryStore<P> {
    async fn read(&self, subject: &str) -> Result<Option<Record>, ViolationError> {
        let subject = subject.to_string();
        let provider = Arc::clone(&self.provider);
        tokio::task::spawn_blocking(move || read_blocking(provider.as_ref(), &subject))
            .await
            .map_err(|e| ViolationError::transaction(arvo_model::errors::ViolationKind::ReadFailure(e.to_string())))?
            .map_err(ViolationError::from)
    }

    async fn write(&self, subject: &str, new_record: Record, _prev: Option<&Record>) -> Result<(), ViolationError> {
        let subject = subject.to_string();
        let provider = Arc::clone(&self.provider);
        tokio::task::spawn_blocking(move || write_blocking(provider.as_ref(), &subject, new_record))
            .await
            .map_err(|e| ViolationError::transaction(arvo_model::errors::ViolationKind::WriteFailure(e.to_string())))?
            .map_err(ViolationError::from)
    }

    async fn lock(&self, subject: &str) -> Result<LockOutcome, ViolationError> {
        let subject = subject.to_string();
        let provider = Arc::clone(&self.provider);
        tokio::task::spawn_blocking(move || lock_blocking(provider.as_ref(), &subject))
            .await
            .map_err(|e| ViolationError::transaction(arvo_model::errors::ViolationKind::LockFailure(e.to_string())))?
            .map_err(ViolationError::from)
    }

    async fn unlock(&self, subject: &str) {
        let subject = subject.to_string();
        let provider = Arc::clone(&self.provider);
        let _ = tokio::task::spawn_blocking(move || unlock_blocking(provider.as_ref(), &subject)).await;
    }
}

fn read_blocking<P: ConnectionProvider>(provider: &P, subject: &str) -> Result<Option<Record>, PersistenceError> {
    with_retry(|| {
        let mut conn = provider.connection()?;
        let row: Option<RecordRow> = orchestration_records::table
            .filter(orchestration_records::subject.eq(subject))
            .select((orchestration_records::subject, orchestration_records::parent_subject, orchestration_records::record, orchestration_records::version))
            .first(&mut conn)
            .optional()
            .map_err(PersistenceError::from)?;
        match row {
            Some(r) => serde_json::from_value(r.record).map(Some).map_err(|e| PersistenceError::Unknown(format!("deser record: {e}"))),
            None => Ok(None),
        }
    })
}

fn write_blocking<P: ConnectionProvider>(provider: &P, subject: &str, new_record: Record) -> Result<(), PersistenceError> {
    with_retry(|| {
        let mut conn = provider.connection()?;
        let payload = serde_json::to_value(&new_record).map_err(|e| PersistenceError::Unknown(format!("ser record: {e}")))?;
        let parent = parent_subject_of(&new_record);
        conn.build_transaction()
            .read_write()
            .run(|tx_conn| {
                let existing_version: Option<i64> =
                    orchestration_records::table.filter(orchestration_records::subject.eq(subject)).select(orchestration_records::version).first(tx_conn).optional()?;
                let next_version = existing_version.unwrap_or(0) + 1;

                diesel::insert_into(orchestration_records::table)
                    .values(NewRecordRow { subject, parent_subject: parent.as_deref(), record: &payload, version: next_version })
                    .on_conflict(orchestration_records::subject)
                    .do_update()
                    .set((orchestration_records::record.eq(&payload), orchestration_records::parent_subject.eq(parent.as_deref()), orchestration_records::version.eq(next_version), orchestration_records::updated_at.eq(diesel::dsl::now)))
                    .execute(tx_conn)?;

                diesel::insert_into(orchestration_event_log::table).values(NewEventLogRow { subject, record: &payload }).execute(tx_conn)?;

                Ok::<(), diesel::result::Error>(())
            })
            .map_err(PersistenceError::from)
    })
}

fn lock_blocking<P: ConnectionProvider>(provider: &P, subject: &str) -> Result<LockOutcome, PersistenceError> {
    with_retry(|| {
        let mut conn = provider.connection()?;
        let inserted = diesel::insert_into(orchestration_locks::table)
            .values((orchestration_locks::subject.eq(subject),))
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .map_err(PersistenceError::from)?;
        Ok(if inserted == 1 { LockOutcome::Acquired } else { LockOutcome::AlreadyAcquired })
    })
}

fn unlock_blocking<P: ConnectionProvider>(provider: &P, subject: &str) -> Result<(), PersistenceError> {
    with_retry(|| {
        let mut conn = provider.connection()?;
        diesel::delete(orchestration_locks::table.filter(orchestration_locks::subject.eq(subject))).execute(&mut conn).map_err(PersistenceError::from)?;
        Ok(())
    })
}

/// Builds an r2d2 pool and runs pending migrations on first checkout.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = min_size.max(1);
    let validated_max = max_size.max(1);
    let final_min = validated_min.min(validated_max);
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(final_min)).max_size(validated_max).build(manager).map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get().map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Loads `.env`, reads `DbConfig`, and returns an already-migrated pool.
pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = crate::config::DbConfig::from_env();
    debug!("building dev pool min={} max={}", cfg.min_connections, cfg.max_connections);
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}
