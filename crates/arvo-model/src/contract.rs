//! Contracts (spec §3/§4.1): named, versioned descriptions of one event
//! interface. A `Contract` is immutable after construction — the same
//! invariant the teacher enforces on `FlowDefinition`/`ArtifactSpec`.

use std::collections::BTreeMap;

use jsonschema::Validator;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ViolationError, ViolationKind};

/// The JSON Schema document describing one event's payload shape.
pub type Schema = Value;

/// One version's accept/emit/error schema set (spec §3: "for each version a
/// tuple `{ accepts, emits, systemError }`").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionSpec {
    pub accepts: Schema,
    pub emits: BTreeMap<String, Schema>,
    pub system_error: Schema,
    /// Present only on orchestrator contracts: the terminal event type and
    /// its init payload shape.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orchestrator: Option<OrchestratorVersionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorVersionSpec {
    pub complete_event_type: String,
    pub init: Schema,
}

/// A named, versioned event interface. `uri` is the stable identity used
/// for the uniqueness/anti-recursion invariants in §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub uri: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub domain: Option<String>,
    pub versions: BTreeMap<String, VersionSpec>,
}

impl Contract {
    pub fn new(uri: impl Into<String>, event_type: impl Into<String>, domain: Option<String>) -> Self {
        Self { uri: uri.into(), event_type: event_type.into(), domain, versions: BTreeMap::new() }
    }

    pub fn with_version(mut self, version: impl Into<String>, spec: VersionSpec) -> Self {
        self.versions.insert(version.into(), spec);
        self
    }

    /// Whether this contract declares the orchestrator metadata for at
    /// least one version (spec §6: "a self-contract must declare
    /// `completeEventType`").
    pub fn is_orchestrator_contract(&self) -> bool {
        self.versions.values().any(|v| v.orchestrator.is_some())
    }

    /// Resolves one version into the flattened view operations consult
    /// (`version(v)` in §4.1).
    pub fn version(&self, version: &str) -> Option<VersionedContract<'_>> {
        self.versions.get(version).map(|spec| VersionedContract {
            uri: &self.uri,
            event_type: &self.event_type,
            domain: self.domain.as_deref(),
            version,
            spec,
        })
    }
}

/// A single resolved version of a `Contract` — the flattened view that
/// `arvo-core`/`arvo-handlers` actually operate against.
#[derive(Debug, Clone, Copy)]
pub struct VersionedContract<'a> {
    pub uri: &'a str,
    pub event_type: &'a str,
    pub domain: Option<&'a str>,
    pub version: &'a str,
    spec: &'a VersionSpec,
}

impl<'a> VersionedContract<'a> {
    pub fn accepts(&self) -> &'a Schema {
        &self.spec.accepts
    }

    pub fn emits(&self, event_type: &str) -> Option<&'a Schema> {
        self.spec.emits.get(event_type)
    }

    pub fn system_error(&self) -> &'a Schema {
        &self.spec.system_error
    }

    pub fn complete_event_type(&self) -> Option<&'a str> {
        self.spec.orchestrator.as_ref().map(|o| o.complete_event_type.as_str())
    }

    pub fn init_schema(&self) -> Option<&'a Schema> {
        self.spec.orchestrator.as_ref().map(|o| &o.init)
    }

    pub fn dataschema(&self) -> String {
        crate::event::format_dataschema(self.uri, self.version)
    }
}

/// Validates `data` against `schema`, returning a `Contract` violation
/// naming the first schema error on failure. Grounded on
/// `chem-core::model::typed_artifact::ArtifactSpec::validate`'s
/// decode-then-validate pipeline, generalized to runtime JSON Schema
/// documents via `jsonschema` (the validator is recompiled per call since
/// contracts here are data, not types known at compile time).
pub fn validate_against_schema(schema: &Schema, data: &Value) -> Result<(), ViolationError> {
    let compiled = Validator::new(schema)
        .map_err(|e| ViolationError::contract(ViolationKind::SchemaValidation(e.to_string())))?;
    if let Err(err) = compiled.validate(data) {
        return Err(ViolationError::contract(ViolationKind::SchemaValidation(err.to_string())));
    }
    Ok(())
}

/// Checks the uniqueness/anti-recursion invariant from §3: service-contract
/// URIs must be pairwise distinct, and none may equal the self-contract's
/// URI.
pub fn check_contract_uniqueness(self_contract: &Contract, service_contracts: &[Contract]) -> Result<(), ViolationError> {
    let mut seen = std::collections::HashSet::new();
    for svc in service_contracts {
        if svc.uri == self_contract.uri {
            return Err(ViolationError::config(ViolationKind::CircularSelfAsService(svc.uri.clone())));
        }
        if !seen.insert(svc.uri.as_str()) {
            return Err(ViolationError::config(ViolationKind::DuplicateContractUri(svc.uri.clone())));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_contract(uri: &str) -> Contract {
        Contract::new(uri, "arvo.orc.inc", None).with_version(
            "1.0.0",
            VersionSpec {
                accepts: json!({"type": "object"}),
                emits: BTreeMap::new(),
                system_error: json!({"type": "object"}),
                orchestrator: None,
            },
        )
    }

    #[test]
    fn uniqueness_rejects_self_as_service() {
        let self_contract = sample_contract("#/inc/v1");
        let services = vec![sample_contract("#/inc/v1")];
        let err = check_contract_uniqueness(&self_contract, &services).unwrap_err();
        assert_eq!(err.kind, ViolationKind::CircularSelfAsService("#/inc/v1".into()));
    }

    #[test]
    fn uniqueness_rejects_duplicate_service_uris() {
        let self_contract = sample_contract("#/self/v1");
        let services = vec![sample_contract("#/svc/v1"), sample_contract("#/svc/v1")];
        let err = check_contract_uniqueness(&self_contract, &services).unwrap_err();
        assert_eq!(err.kind, ViolationKind::DuplicateContractUri("#/svc/v1".into()));
    }

    #[test]
    fn schema_validation_rejects_bad_payload() {
        let schema = json!({"type": "object", "required": ["key"], "properties": {"key": {"type": "string"}}});
        assert!(validate_against_schema(&schema, &json!({})).is_err());
        assert!(validate_against_schema(&schema, &json!({"key": "k"})).is_ok());
    }
}
