//! Exercises `PgMemoryStore` against a live database. Skips entirely
//! without `DATABASE_URL`, matching the rest of this crate's test suite.

mod test_support;

use std::collections::HashMap;

use arvo_core::memory::{LockOutcome, MemoryStore, Record};
use arvo_persistence::pg::{PgMemoryStore, PoolProvider};
use serde_json::json;

#[tokio::test]
async fn write_then_read_round_trips_and_locking_is_exclusive() {
    let Some(pool) = test_support::TEST_POOL.clone() else {
        eprintln!("skip (no DATABASE_URL)");
        return;
    };
    let store = PgMemoryStore::new(PoolProvider { pool });

    let subject = format!("test-subject-{}", uuid::Uuid::new_v4());
    let record = Record::Normal {
        subject: subject.clone(),
        parent_subject: None,
        init_event_id: "e1".into(),
        status: "active".into(),
        value: "arvo.orc.inc".into(),
        state: json!({"count": 1}),
        events: Default::default(),
        machine_definition: "hash123".into(),
        expected: HashMap::new(),
    };

    store.write(&subject, record, None).await.unwrap();
    let read_back = store.read(&subject).await.unwrap().unwrap();
    assert_eq!(read_back.subject(), subject);
    assert!(!read_back.is_failure());

    assert_eq!(store.lock(&subject).await.unwrap(), LockOutcome::Acquired);
    assert_eq!(store.lock(&subject).await.unwrap(), LockOutcome::AlreadyAcquired);
    store.unlock(&subject).await;
    assert_eq!(store.lock(&subject).await.unwrap(), LockOutcome::Acquired);
    store.unlock(&subject).await;
}
