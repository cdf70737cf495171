//! The subject codec (spec §3/§4.1): a bijective encoding of a workflow
//! instance's coordinates into one URL-safe opaque string.
//!
//! Grounded on `chem-core::hashing::canonical_json` — fields are
//! canonicalized to JSON with stable key ordering (via `BTreeMap`) before
//! being base64url-encoded, which is what makes `decode(encode(x)) == x`
//! provable independent of serde_json's own key-order guarantees.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::errors::{ViolationError, ViolationKind};

/// The fields making up one workflow instance's coordinates (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectFields {
    pub orchestrator_name: String,
    pub orchestrator_version: String,
    pub initiator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl SubjectFields {
    pub fn new(orchestrator_name: impl Into<String>, orchestrator_version: impl Into<String>, initiator: impl Into<String>) -> Self {
        Self {
            orchestrator_name: orchestrator_name.into(),
            orchestrator_version: orchestrator_version.into(),
            initiator: initiator.into(),
            domain: None,
            meta: BTreeMap::new(),
        }
    }

    pub fn with_domain(mut self, domain: Option<String>) -> Self {
        self.domain = domain;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Convenience accessor for the well-known `redirectto` meta key used
    /// by completion routing (§4.7 step 1).
    pub fn redirectto(&self) -> Option<&str> {
        self.meta.get("redirectto").map(String::as_str)
    }
}

/// Canonicalizes `fields` to JSON (via `BTreeMap`, hence deterministic key
/// order) and base64url-encodes the bytes. Deterministic: equal fields
/// always produce the equal encoded string.
pub fn encode(fields: &SubjectFields) -> String {
    let canonical = crate::hashing::to_canonical_json(fields).expect("SubjectFields always serializes");
    URL_SAFE_NO_PAD.encode(canonical.as_bytes())
}

/// Reverses `encode`. Fails with an `InvalidSubject` violation on malformed
/// base64 or a payload that doesn't decode to `SubjectFields`.
pub fn decode(subject: &str) -> Result<SubjectFields, ViolationError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(subject.as_bytes())
        .map_err(|e| ViolationError::transaction(ViolationKind::InvalidSubject(e.to_string())))?;
    serde_json::from_slice(&bytes).map_err(|e| ViolationError::transaction(ViolationKind::InvalidSubject(e.to_string())))
}
