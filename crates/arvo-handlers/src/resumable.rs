//! The resumable handler (C10, spec §4.9): an imperative twin of the
//! orchestrator, driven by a user-supplied function instead of a state
//! machine, with explicit response-event correlation.
//!
//! Grounded on `chem-adapters::steps::policy_demo::PolicyDemoStep` (a
//! handler producing both an output and side-channel signals —
//! `StepRunResultTyped::SuccessWithSignals`), generalized to the
//! init-call/response-call/`collectedEvents` semantics of §4.9.

use std::collections::HashMap;

use arvo_core::builder::{self, BuildContext};
use arvo_core::domain::DomainToken;
use arvo_core::hashing::hash_str;
use arvo_core::memory::{EventCounts, Record};
use arvo_core::engine::RawEmit;
use arvo_core::resource::SyncResource;
use arvo_model::contract::{check_contract_uniqueness, Contract, VersionedContract};
use arvo_model::errors::{ViolationError, ViolationKind};
use arvo_model::event::Event;
use arvo_model::subject;
use serde_json::Value;

use crate::validator::{self, ValidationOutcome};

/// Status of a resumable instance (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumableStatus {
    Active,
    Done,
    Failure,
}

/// Input handed to the user-supplied handler function (spec §4.9).
pub struct HandlerInput<'a> {
    pub context: &'a Value,
    pub collected_events: &'a HashMap<String, Vec<Value>>,
    pub input: Option<&'a Value>,
    pub service: Option<&'a Value>,
    pub domain: Option<&'a str>,
}

/// What the handler function returns for one call (spec §4.9).
#[derive(Debug, Clone, Default)]
pub struct HandlerOutput {
    pub context: Option<Value>,
    pub output: Option<Value>,
    pub services: Vec<RawEmit>,
}

/// The user-supplied imperative logic, one function per contract version.
/// Narrower than `MachineLogic` — there is no snapshot/hydrate split, only
/// a plain function of `(context, collectedEvents, input|service)`.
pub trait ResumableLogic: Send + Sync {
    fn handle(&self, call: &HandlerInput<'_>) -> Result<HandlerOutput, ViolationError>;
}

pub struct ResumableHandler {
    self_contract: Contract,
    self_version: String,
    services: Vec<(Contract, String)>,
    logic: Box<dyn ResumableLogic>,
    resource: SyncResource,
    orchestrator_source: String,
    default_execution_units: f64,
}

impl ResumableHandler {
    pub fn new(
        self_contract: Contract,
        self_version: impl Into<String>,
        services: Vec<(Contract, String)>,
        logic: Box<dyn ResumableLogic>,
        resource: SyncResource,
        default_execution_units: f64,
    ) -> Result<Self, ViolationError> {
        let service_contracts: Vec<Contract> = services.iter().map(|(c, _)| c.clone()).collect();
        check_contract_uniqueness(&self_contract, &service_contracts)?;
        let orchestrator_source = self_contract.event_type.clone();
        Ok(Self { self_contract, self_version: self_version.into(), services, logic, resource, orchestrator_source, default_execution_units })
    }

    pub async fn execute(&self, event: &Event) -> Result<Vec<Event>, ViolationError> {
        let result = self.execute_locked(event).await;
        self.resource.unlock(&event.subject).await;
        result
    }

    async fn execute_locked(&self, event: &Event) -> Result<Vec<Event>, ViolationError> {
        self.resource.validate_subject(&event.subject)?;
        self.resource.lock(&event.subject).await?;

        let existing = self.resource.read(&event.subject).await?;

        if let Some(Record::Normal { status, .. }) = &existing {
            if status == "done" {
                return Ok(vec![]);
            }
        }
        if let Some(Record::Failure { .. }) = existing {
            return Ok(vec![]);
        }

        let service_contracts: Vec<Contract> = self.services.iter().map(|(c, _)| c.clone()).collect();
        match validator::validate(event, &self.self_contract, &service_contracts) {
            ValidationOutcome::Valid { .. } => {}
            ValidationOutcome::ContractUnresolved => return Err(ViolationError::config(ViolationKind::ContractUnresolved(event.event_type.clone()))),
            ValidationOutcome::Invalid { message } | ValidationOutcome::InvalidData { message } => {
                return Err(ViolationError::contract(ViolationKind::SchemaValidation(message)))
            }
        }

        let is_init_call = event.event_type == self.orchestrator_source;

        let (mut context, init_event_id, mut expected, prev_counts) = match &existing {
            Some(Record::Normal { state, init_event_id, expected, events, .. }) => (state.clone(), init_event_id.clone(), expected.clone(), events.clone()),
            Some(Record::Failure { .. }) => unreachable!("handled above"),
            None => (Value::Null, event.id.clone(), HashMap::new(), EventCounts::default()),
        };

        if !is_init_call {
            if let Some(parentid) = &event.parentid {
                if let Some(bucket) = expected.get_mut(parentid) {
                    let as_value = serde_json::to_value(event).unwrap_or(Value::Null);
                    bucket.push(as_value);
                }
            }
        }

        let collected_events = reshape_expected(&expected);

        let call = HandlerInput {
            context: &context,
            collected_events: &collected_events,
            input: is_init_call.then_some(&event.data),
            service: (!is_init_call).then_some(&event.data),
            domain: event.domain.as_deref(),
        };

        let output = self.logic.handle(&call)?;

        if let Some(new_context) = &output.context {
            context = new_context.clone();
        }

        let self_version = self.self_contract.version(&self.self_version).expect("self_version validated at construction");
        let service_versions: Vec<VersionedContract<'_>> = self
            .services
            .iter()
            .map(|(c, v)| c.version(v).expect("service version configured at construction"))
            .collect();

        let build_ctx = BuildContext {
            self_contract: self_version,
            service_contracts: &service_versions,
            source_event: event,
            init_event_id: &init_event_id,
            current_subject: &event.subject,
            parent_subject: None,
            orchestrator_source: &self.orchestrator_source,
            default_execution_units: self.default_execution_units,
        };

        let mut emitted = Vec::new();
        // Re-reset expected per fresh emittable (spec §4.9: "state.events.expected
        // is reset to { newEventId: [] } for each fresh emittable").
        let mut new_expected: HashMap<String, Vec<Value>> = HashMap::new();
        for raw in &output.services {
            let events = builder::build(raw, &build_ctx)?;
            for ev in &events {
                new_expected.insert(ev.id.clone(), Vec::new());
            }
            emitted.extend(events);
        }

        let status = if output.output.is_some() { ResumableStatus::Done } else { ResumableStatus::Active };
        let record = Record::Normal {
            subject: event.subject.clone(),
            parent_subject: None,
            init_event_id: init_event_id.clone(),
            status: match status {
                ResumableStatus::Active => "active".to_string(),
                ResumableStatus::Done => "done".to_string(),
                ResumableStatus::Failure => "failure".to_string(),
            },
            value: event.event_type.clone(),
            state: context,
            events: EventCounts { consumed: prev_counts.consumed + 1, produced: prev_counts.produced + emitted.len() as u64 },
            machine_definition: hash_str(&self.orchestrator_source),
            expected: new_expected,
        };
        self.resource.write(&event.subject, record, existing.as_ref()).await?;

        Ok(emitted)
    }
}

/// Reshapes `state.events.expected` (keyed by produced-event-id, each value
/// a list of full response-event JSON) into `{ eventType -> [events...] }`
/// for the handler (spec §4.9: "collectedEvents is reshaped from
/// expected").
fn reshape_expected(expected: &HashMap<String, Vec<Value>>) -> HashMap<String, Vec<Value>> {
    let mut out: HashMap<String, Vec<Value>> = HashMap::new();
    for responses in expected.values() {
        for response in responses {
            let event_type = response.get("type").and_then(|t| t.as_str()).unwrap_or("unknown").to_string();
            out.entry(event_type).or_default().push(response.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use arvo_core::memory::InMemoryMemoryStore;
    use arvo_model::contract::VersionSpec;
    use arvo_model::event::format_dataschema;
    use arvo_model::subject::SubjectFields;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    struct EchoLogic;
    impl ResumableLogic for EchoLogic {
        fn handle(&self, call: &HandlerInput<'_>) -> Result<HandlerOutput, ViolationError> {
            if let Some(input) = call.input {
                return Ok(HandlerOutput { context: Some(input.clone()), output: None, services: vec![RawEmit::new("com.value.read", json!({"key": "k"}))] });
            }
            Ok(HandlerOutput { context: None, output: Some(json!({"done": true})), services: vec![] })
        }
    }

    fn self_contract() -> Contract {
        Contract::new("#/resumable/v1", "arvo.res.echo", None).with_version(
            "1.0.0",
            VersionSpec { accepts: json!({"type": "object"}), emits: BTreeMap::new(), system_error: json!({}), orchestrator: None },
        )
    }

    fn service_contract() -> Contract {
        Contract::new("#/value/v1", "com.value.read", None).with_version(
            "1.0.0",
            VersionSpec {
                accepts: json!({"type": "object"}),
                emits: BTreeMap::from([("evt.value.read.success".to_string(), json!({}))]),
                system_error: json!({}),
                orchestrator: None,
            },
        )
    }

    #[tokio::test]
    async fn init_call_emits_service_and_stays_active() {
        let resource = SyncResource::new(Arc::new(InMemoryMemoryStore::new()), true);
        let handler = ResumableHandler::new(
            self_contract(),
            "1.0.0",
            vec![(service_contract(), "1.0.0".to_string())],
            Box::new(EchoLogic),
            resource,
            0.0,
        )
        .unwrap();

        let subject = subject::encode(&SubjectFields::new("arvo.res.echo", "1.0.0", "arvo.res.echo"));
        let event = Event::builder("arvo.res.echo", subject, json!({"key": "k"}))
            .dataschema(format_dataschema("#/resumable/v1", "1.0.0"))
            .build();
        let events = handler.execute(&event).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "com.value.read");
    }

    #[tokio::test]
    async fn done_status_ignores_further_events() {
        let resource = SyncResource::new(Arc::new(InMemoryMemoryStore::new()), true);
        let subject = subject::encode(&SubjectFields::new("arvo.res.echo", "1.0.0", "arvo.res.echo"));
        let record = Record::Normal {
            subject: subject.clone(),
            parent_subject: None,
            init_event_id: "e1".into(),
            status: "done".into(),
            value: "arvo.res.echo".into(),
            state: json!({}),
            events: EventCounts::default(),
            machine_definition: "hash".into(),
            expected: HashMap::new(),
        };
        resource.write(&subject, record, None).await.unwrap();

        let handler = ResumableHandler::new(self_contract(), "1.0.0", vec![], Box::new(EchoLogic), resource, 0.0).unwrap();
        let event = Event::builder("evt.value.read.success", subject, json!({"value": 1})).build();
        let events = handler.execute(&event).await.unwrap();
        assert!(events.is_empty());
    }
}
