//! The sync resource layer (C4, spec §4.3): wraps a `MemoryStore` with
//! subject-format validation, the optional-locking short-circuit, and
//! Transaction-violation error mapping. Grounded on
//! `chem-core::engine::core::FlowEngine::load_or_init`'s pattern of
//! wrapping a lower-layer operation and translating its failure into the
//! crate's own error type.

use std::sync::Arc;

use arvo_model::errors::{ViolationError, ViolationKind};
use arvo_model::subject;

use crate::memory::{LockOutcome, MemoryStore, Record};

/// Wraps a `MemoryStore`, adding the behavior every caller of C3 needs:
/// subject validation and the locking opt-out from §4.3/§5 ("an
/// orchestrator may be constructed without locking when ... ≤1 non-error
/// emit type").
pub struct SyncResource {
    store: Arc<dyn MemoryStore>,
    requires_resource_locking: bool,
}

impl SyncResource {
    pub fn new(store: Arc<dyn MemoryStore>, requires_resource_locking: bool) -> Self {
        Self { store, requires_resource_locking }
    }

    /// Validates `subject` decodes through the codec; fails with
    /// `Transaction(INVALID_SUBJECT)` otherwise (spec §4.3(a)).
    pub fn validate_subject(&self, subject: &str) -> Result<(), ViolationError> {
        subject::decode(subject).map(|_| ())
    }

    pub async fn read(&self, subject: &str) -> Result<Option<Record>, ViolationError> {
        self.validate_subject(subject)?;
        self.store
            .read(subject)
            .await
            .map_err(|_| ViolationError::transaction(ViolationKind::ReadFailure(subject.to_string())))
    }

    pub async fn write(&self, subject: &str, new_record: Record, prev: Option<&Record>) -> Result<(), ViolationError> {
        self.validate_subject(subject)?;
        self.store
            .write(subject, new_record, prev)
            .await
            .map_err(|_| ViolationError::transaction(ViolationKind::WriteFailure(subject.to_string())))
    }

    /// Acquires the subject lock, or no-ops and reports `Acquired` when
    /// `requires_resource_locking` is false. `AlreadyAcquired` is treated as
    /// idempotent re-entry (Open Question 2, pinned in SPEC_FULL.md §5).
    pub async fn lock(&self, subject: &str) -> Result<(), ViolationError> {
        self.validate_subject(subject)?;
        if !self.requires_resource_locking {
            return Ok(());
        }
        match self.store.lock(subject).await {
            Ok(LockOutcome::Acquired) | Ok(LockOutcome::AlreadyAcquired) => Ok(()),
            Ok(LockOutcome::NotAcquired) => Err(ViolationError::transaction(ViolationKind::LockUnacquired(subject.to_string()))),
            Err(_) => Err(ViolationError::transaction(ViolationKind::LockFailure(subject.to_string()))),
        }
    }

    /// Never fails (spec §4.3: "`unlock(subject)` — never throws"). No-ops
    /// under the locking opt-out, mirroring `lock`.
    pub async fn unlock(&self, subject: &str) {
        if !self.requires_resource_locking {
            return;
        }
        self.store.unlock(subject).await;
    }

    pub fn requires_resource_locking(&self) -> bool {
        self.requires_resource_locking
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryMemoryStore;
    use arvo_model::subject::SubjectFields;

    fn valid_subject() -> String {
        subject::encode(&SubjectFields::new("arvo.orc.inc", "1.0.0", "arvo.orc.inc"))
    }

    #[tokio::test]
    async fn invalid_subject_is_transaction_violation() {
        let resource = SyncResource::new(Arc::new(InMemoryMemoryStore::new()), true);
        let err = resource.read("not a valid subject !!!").await.unwrap_err();
        assert_eq!(err.category, arvo_model::errors::ViolationCategory::Transaction);
    }

    #[tokio::test]
    async fn locking_opt_out_always_acquires() {
        let resource = SyncResource::new(Arc::new(InMemoryMemoryStore::new()), false);
        let subj = valid_subject();
        resource.lock(&subj).await.unwrap();
        // A second lock call would NOT_ACQUIRE on a real backend, but the
        // opt-out never calls into the backend at all.
        resource.lock(&subj).await.unwrap();
    }

    #[tokio::test]
    async fn lock_then_unlock_then_lock_reacquires_with_locking_enabled() {
        let resource = SyncResource::new(Arc::new(InMemoryMemoryStore::new()), true);
        let subj = valid_subject();
        resource.lock(&subj).await.unwrap();
        resource.unlock(&subj).await;
        resource.lock(&subj).await.unwrap();
    }

    #[tokio::test]
    async fn repeat_lock_is_idempotent_not_a_violation() {
        let resource = SyncResource::new(Arc::new(InMemoryMemoryStore::new()), true);
        let subj = valid_subject();
        resource.lock(&subj).await.unwrap();
        resource.lock(&subj).await.unwrap();
    }
}
