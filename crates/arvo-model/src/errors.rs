//! The violation taxonomy (spec §4.2): the four bug-class errors that are
//! always surfaced synchronously to the caller and never emitted as
//! workflow events. Distinct from a workflow's own system errors, which are
//! ordinary `serde_json::Value` payloads carried on `sys.<type>.error`
//! events built by `arvo-core`/`arvo-handlers`.

use thiserror::Error;

/// One of the four violation kinds from §4.2, each carrying the detail
/// needed to explain the failure to an operator.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum ViolationKind {
    #[error("unknown machine version: {0}")]
    UnknownMachineVersion(String),

    #[error("duplicate contract uri: {0}")]
    DuplicateContractUri(String),

    #[error("service contract uri equals self contract uri: {0}")]
    CircularSelfAsService(String),

    #[error("duplicate handler registration for event type: {0}")]
    DuplicateHandlerRegistration(String),

    #[error("router source mismatch: expected {expected}, got {actual}")]
    RouterSourceMismatch { expected: String, actual: String },

    #[error("event payload failed schema validation: {0}")]
    SchemaValidation(String),

    #[error("dataschema uri mismatch: expected {expected}, got {actual}")]
    DataschemaUriMismatch { expected: String, actual: String },

    #[error("dataschema version mismatch: expected {expected}, got {actual}")]
    DataschemaVersionMismatch { expected: String, actual: String },

    #[error("event type is neither self accept type nor any service emit type: {0}")]
    ContractUnresolved(String),

    #[error("invalid parentSubject$$: {0}")]
    InvalidParentSubject(String),

    #[error("reserved field name misuse: {0}")]
    ReservedNameMisuse(String),

    #[error("non-Error value thrown by handler: {0}")]
    NonErrorThrown(String),

    #[error("read failed for subject {0}")]
    ReadFailure(String),

    #[error("write failed for subject {0}")]
    WriteFailure(String),

    #[error("lock failed for subject {0}")]
    LockFailure(String),

    #[error("lock not acquired for subject {0}")]
    LockUnacquired(String),

    #[error("invalid subject: {0}")]
    InvalidSubject(String),
}

/// The outer classification from §4.2 — every `ViolationKind` belongs to
/// exactly one of these four buckets, and a `ViolationError` carries both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ViolationCategory {
    Config,
    Contract,
    Execution,
    Transaction,
}

impl std::fmt::Display for ViolationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ViolationCategory::Config => "Config",
            ViolationCategory::Contract => "Contract",
            ViolationCategory::Execution => "Execution",
            ViolationCategory::Transaction => "Transaction",
        };
        f.write_str(s)
    }
}

/// A bug-class failure, surfaced synchronously to the caller. Never
/// converted into a workflow event — see `arvo-handlers::orchestrator` for
/// the boundary between this type and system-error events.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
#[error("{category}: {kind}")]
pub struct ViolationError {
    pub category: ViolationCategory,
    pub kind: ViolationKind,
}

impl ViolationError {
    pub fn config(kind: ViolationKind) -> Self {
        Self { category: ViolationCategory::Config, kind }
    }

    pub fn contract(kind: ViolationKind) -> Self {
        Self { category: ViolationCategory::Contract, kind }
    }

    pub fn execution(kind: ViolationKind) -> Self {
        Self { category: ViolationCategory::Execution, kind }
    }

    pub fn transaction(kind: ViolationKind) -> Self {
        Self { category: ViolationCategory::Transaction, kind }
    }

    pub fn is_transaction(&self) -> bool {
        matches!(self.category, ViolationCategory::Transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_category_and_kind() {
        let err = ViolationError::transaction(ViolationKind::LockUnacquired("S0".into()));
        let rendered = err.to_string();
        assert!(rendered.starts_with("Transaction:"));
        assert!(rendered.contains("S0"));
    }

    #[test]
    fn category_predicate() {
        let err = ViolationError::config(ViolationKind::UnknownMachineVersion("9.9.9".into()));
        assert!(!err.is_transaction());
    }
}
