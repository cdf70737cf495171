//! The input validator (C12, spec §4.11): matches an event to its
//! contract and verifies `dataschema` plus payload shape.
//!
//! Grounded on `chem-core::model::typed_artifact::ArtifactSpec::from_artifact`'s
//! kind/version/decode/validate pipeline, generalized into the tagged
//! `ValidationOutcome` union called for in spec §9 ("validation result ->
//! tagged union").

use arvo_model::contract::{validate_against_schema, Contract};
use arvo_model::event::{Event, ANY_VERSION};

/// The tagged result of validating one event (spec §9).
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Valid { resolved_uri: String, contract_type: ContractRole },
    ContractUnresolved,
    Invalid { message: String },
    InvalidData { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractRole {
    SelfContract,
    Service,
}

/// Runs the six-step procedure from §4.11.
pub fn validate(event: &Event, self_contract: &Contract, service_contracts: &[Contract]) -> ValidationOutcome {
    let Some(parsed) = event.parsed_dataschema() else {
        return ValidationOutcome::Invalid { message: "missing or unparsable dataschema".to_string() };
    };

    let (resolved, role) = match resolve_contract(event, self_contract, service_contracts) {
        Some(found) => found,
        None => return ValidationOutcome::ContractUnresolved,
    };

    if parsed.uri != resolved.uri {
        return ValidationOutcome::Invalid { message: format!("dataschema uri {} does not match contract uri {}", parsed.uri, resolved.uri) };
    }

    let version_key = if parsed.version == ANY_VERSION {
        resolved.versions.keys().next_back().cloned()
    } else {
        resolved.versions.contains_key(&parsed.version).then(|| parsed.version.clone())
    };
    let Some(version_key) = version_key else {
        return ValidationOutcome::Invalid { message: format!("unknown contract version: {}", parsed.version) };
    };
    let versioned = resolved.version(&version_key).expect("version_key was just confirmed present");

    let schema = match role {
        ContractRole::SelfContract => versioned.accepts().clone(),
        ContractRole::Service => {
            if let Some(schema) = versioned.emits(&event.event_type) {
                schema.clone()
            } else {
                versioned.system_error().clone()
            }
        }
    };

    match validate_against_schema(&schema, &event.data) {
        Ok(()) => ValidationOutcome::Valid { resolved_uri: resolved.uri.clone(), contract_type: role },
        Err(err) => ValidationOutcome::InvalidData { message: err.to_string() },
    }
}

fn resolve_contract<'a>(event: &Event, self_contract: &'a Contract, service_contracts: &'a [Contract]) -> Option<(&'a Contract, ContractRole)> {
    if event.event_type == self_contract.event_type {
        return Some((self_contract, ContractRole::SelfContract));
    }
    for service in service_contracts {
        let system_error_type = format!("sys.{}.error", service.event_type);
        let declares_type = service.versions.values().any(|v| v.emits.contains_key(&event.event_type));
        if declares_type || event.event_type == system_error_type {
            return Some((service, ContractRole::Service));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use arvo_model::contract::VersionSpec;
    use arvo_model::event::format_dataschema;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn contract() -> Contract {
        Contract::new("#/inc/v1", "arvo.orc.inc", None).with_version(
            "1.0.0",
            VersionSpec {
                accepts: json!({"type": "object", "required": ["key"], "properties": {"key": {"type": "string"}}}),
                emits: BTreeMap::new(),
                system_error: json!({"type": "object"}),
                orchestrator: None,
            },
        )
    }

    #[test]
    fn missing_dataschema_is_invalid() {
        let event = Event::builder("arvo.orc.inc", "S0", json!({})).build();
        assert_eq!(validate(&event, &contract(), &[]), ValidationOutcome::Invalid { message: "missing or unparsable dataschema".to_string() });
    }

    #[test]
    fn unresolved_type_is_contract_unresolved() {
        let event = Event::builder("com.unknown", "S0", json!({}))
            .dataschema(format_dataschema("#/inc/v1", "1.0.0"))
            .build();
        assert_eq!(validate(&event, &contract(), &[]), ValidationOutcome::ContractUnresolved);
    }

    #[test]
    fn valid_event_passes() {
        let event = Event::builder("arvo.orc.inc", "S0", json!({"key": "k"}))
            .dataschema(format_dataschema("#/inc/v1", "1.0.0"))
            .build();
        let outcome = validate(&event, &contract(), &[]);
        assert!(matches!(outcome, ValidationOutcome::Valid { .. }));
    }

    #[test]
    fn bad_payload_is_invalid_data() {
        let event = Event::builder("arvo.orc.inc", "S0", json!({}))
            .dataschema(format_dataschema("#/inc/v1", "1.0.0"))
            .build();
        assert!(matches!(validate(&event, &contract(), &[]), ValidationOutcome::InvalidData { .. }));
    }

    #[test]
    fn uri_mismatch_is_invalid() {
        let event = Event::builder("arvo.orc.inc", "S0", json!({"key": "k"}))
            .dataschema(format_dataschema("#/other/v1", "1.0.0"))
            .build();
        assert!(matches!(validate(&event, &contract(), &[]), ValidationOutcome::Invalid { .. }));
    }
}
