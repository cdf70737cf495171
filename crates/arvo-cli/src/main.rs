//! arvo-cli: a small demo binary wiring an in-memory orchestration run.
//!
//! Reproduces spec.md's S1/S2 scenarios end to end: a root orchestration
//! calls out to a service, the service's response event is fed back in,
//! and the orchestration reaches its final output. For more advanced
//! usage (a Postgres-backed store, resumable handlers, routers) see the
//! library crates this binary wires together.

use std::collections::BTreeMap;
use std::sync::Arc;

use arvo_core::domain::DomainToken;
use arvo_core::engine::{EngineFailure, MachineStatus, RawEmit, Snapshot, StepOutcome};
use arvo_core::memory::InMemoryMemoryStore;
use arvo_core::registry::MachineRegistry;
use arvo_core::resource::SyncResource;
use arvo_core::MachineLogic;
use arvo_handlers::{Orchestrator, ServiceBinding};
use arvo_model::contract::{Contract, OrchestratorVersionSpec, VersionSpec};
use arvo_model::event::{format_dataschema, Event};
use arvo_model::subject::{self, SubjectFields};
use serde_json::json;

const SELF_URI: &str = "#/inc/v1";
const SELF_TYPE: &str = "arvo.orc.inc";
const SERVICE_URI: &str = "#/value/v1";
const SERVICE_TYPE: &str = "com.value.read";

/// Reads a key's value via a service call, then sums it with a modifier
/// carried on the init event.
struct IncrementMachine;

impl MachineLogic for IncrementMachine {
    fn source(&self) -> &str {
        SELF_TYPE
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn step(&self, previous_snapshot: Option<&Snapshot>, event: &Event) -> Result<StepOutcome, EngineFailure> {
        let count = previous_snapshot.and_then(|s| s.get("count")).and_then(|c| c.as_i64()).unwrap_or(0);
        if event.event_type == SELF_TYPE {
            let key = event.data.get("key").cloned().unwrap_or(json!(""));
            return Ok(StepOutcome {
                state: json!({"count": count}),
                status: MachineStatus::Active,
                raw_emits: vec![RawEmit::new(SERVICE_TYPE, json!({"key": key}))],
                final_output: None,
            });
        }
        let value = event.data.get("value").and_then(|v| v.as_i64()).unwrap_or(0);
        let modifier = event.data.get("modifier").and_then(|m| m.as_i64()).unwrap_or(0);
        let new_count = count + value + modifier;
        Ok(StepOutcome { state: json!({"count": new_count}), status: MachineStatus::Done, raw_emits: vec![], final_output: Some(json!({"final": new_count})) })
    }
}

fn self_contract() -> Contract {
    Contract::new(SELF_URI, SELF_TYPE, None).with_version(
        "1.0.0",
        VersionSpec {
            accepts: json!({"type": "object"}),
            emits: BTreeMap::from([(format!("{SELF_TYPE}.done"), json!({"type": "object"}))]),
            system_error: json!({"type": "object"}),
            orchestrator: Some(OrchestratorVersionSpec { complete_event_type: format!("{SELF_TYPE}.done"), init: json!({}) }),
        },
    )
}

fn service_contract() -> Contract {
    Contract::new(SERVICE_URI, SERVICE_TYPE, None).with_version(
        "1.0.0",
        VersionSpec {
            accepts: json!({"type": "object"}),
            emits: BTreeMap::from([("evt.value.read.success".to_string(), json!({"type": "object"}))]),
            system_error: json!({"type": "object"}),
            orchestrator: None,
        },
    )
}

#[tokio::main]
async fn main() {
    env_logger::init();

    println!("arvo-cli — orchestration run demo");
    println!("==================================");

    let registry = MachineRegistry::new(vec![Arc::new(IncrementMachine)]).expect("registry construction");
    let resource = SyncResource::new(Arc::new(InMemoryMemoryStore::new()), true);
    let orchestrator = Orchestrator::new(
        self_contract(),
        "1.0.0",
        vec![ServiceBinding { contract: service_contract(), target_version: "1.0.0".to_string() }],
        registry,
        resource,
        0.0,
        Some(vec![DomainToken::Local]),
        Arc::new(arvo_telemetry::NoopTracer),
    )
    .expect("orchestrator construction");

    let subject = subject::encode(&SubjectFields::new(SELF_TYPE, "1.0.0", SELF_TYPE));
    let init_event = Event::builder(SELF_TYPE, subject.clone(), json!({"key": "k", "modifier": 2}))
        .id("initId")
        .dataschema(format_dataschema(SELF_URI, "1.0.0"))
        .build();

    let service_calls = match orchestrator.execute(&init_event).await {
        Ok(events) => events,
        Err(err) => {
            println!("orchestration failed: {err}");
            return;
        }
    };
    println!("init event -> {} service call(s)", service_calls.len());
    for call in &service_calls {
        println!("  {} -> {} data={}", call.event_type, call.to, call.data);
    }

    let Some(service_call) = service_calls.first() else {
        println!("no service call emitted, stopping");
        return;
    };

    let response = Event::builder("evt.value.read.success", subject, json!({"value": 5}))
        .parentid(service_call.id.clone())
        .dataschema(format_dataschema(SERVICE_URI, "1.0.0"))
        .build();

    match orchestrator.execute(&response).await {
        Ok(events) => {
            println!("response event -> {} completion event(s)", events.len());
            for done in &events {
                println!("  {} -> {} data={}", done.event_type, done.to, done.data);
            }
        }
        Err(err) => println!("orchestration failed: {err}"),
    }
}
