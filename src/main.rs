//! arvo-demo: a tour of the runtime's four handler shapes against one
//! in-memory (or, with `--features pg_demo`, Postgres-backed) store.
//!
//! Wires up, in order: the C9 orchestrator (state-machine, spec.md's S1/S2
//! scenarios), the C10 resumable handler (imperative twin), and the C11
//! stateless handler behind a router. Each section prints the events its
//! run produced. See `arvo-cli` for a narrower, orchestrator-only demo.

use std::collections::BTreeMap;
use std::sync::Arc;

use arvo_core::domain::DomainToken;
use arvo_core::engine::{EngineFailure, MachineStatus, RawEmit, Snapshot, StepOutcome, SystemErrorPayload};
use arvo_core::memory::{InMemoryMemoryStore, MemoryStore};
use arvo_core::registry::MachineRegistry;
use arvo_core::resource::SyncResource;
use arvo_core::MachineLogic;
use arvo_handlers::{EventHandler, HandlerInput, HandlerOutput, Orchestrator, ResumableHandler, ResumableLogic, Router, ServiceBinding, StatelessHandler, StatelessLogic, StatelessOutput};
use arvo_model::contract::{Contract, OrchestratorVersionSpec, VersionSpec};
use arvo_model::event::{format_dataschema, Event};
use arvo_model::subject::{self, SubjectFields};
use async_trait::async_trait;
use serde_json::{json, Value};

const SELF_URI: &str = "#/inc/v1";
const SELF_TYPE: &str = "arvo.orc.inc";
const SERVICE_URI: &str = "#/value/v1";
const SERVICE_TYPE: &str = "com.value.read";

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
        let new_count = count + value;
        Ok(StepOutcome { state: json!({"count": new_count}), status: MachineStatus::Done, raw_emits: vec![], final_output: Some(json!({"final": new_count})) })
    }
}

fn orchestrator_self_contract() -> Contract {
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

fn value_service_contract() -> Contract {
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

async fn run_orchestrator_section(store: Arc<dyn MemoryStore>) {
    println!("\n-- orchestrator (C9) --");
    let registry = MachineRegistry::new(vec![Arc::new(IncrementMachine)]).expect("registry construction");
    let resource = SyncResource::new(store, true);
    let orchestrator = Orchestrator::new(
        orchestrator_self_contract(),
        "1.0.0",
        vec![ServiceBinding { contract: value_service_contract(), target_version: "1.0.0".to_string() }],
        registry,
        resource,
        0.0,
        Some(vec![DomainToken::Local]),
        Arc::new(arvo_telemetry::NoopTracer),
    )
    .expect("orchestrator construction");

    let subject = subject::encode(&SubjectFields::new(SELF_TYPE, "1.0.0", SELF_TYPE));
    let init_event = Event::builder(SELF_TYPE, subject.clone(), json!({"key": "k"}))
        .id("initId")
        .dataschema(format_dataschema(SELF_URI, "1.0.0"))
        .build();

    let service_calls = orchestrator.execute(&init_event).await.expect("init step");
    for call in &service_calls {
        println!("  {} -> {} data={}", call.event_type, call.to, call.data);
    }
    let Some(service_call) = service_calls.first() else { return };

    let response = Event::builder("evt.value.read.success", subject, json!({"value": 7}))
        .parentid(service_call.id.clone())
        .dataschema(format_dataschema(SERVICE_URI, "1.0.0"))
        .build();
    let done = orchestrator.execute(&response).await.expect("completion step");
    for ev in &done {
        println!("  {} -> {} data={}", ev.event_type, ev.to, ev.data);
    }
}

struct EchoResumableLogic;

impl ResumableLogic for EchoResumableLogic {
    fn handle(&self, call: &HandlerInput<'_>) -> Result<HandlerOutput, arvo_model::errors::ViolationError> {
        if let Some(input) = call.input {
            let key = input.get("key").cloned().unwrap_or(json!(""));
            return Ok(HandlerOutput { context: Some(input.clone()), output: None, services: vec![RawEmit::new(SERVICE_TYPE, json!({"key": key}))] });
        }
        let responses = call.collected_events.get("evt.value.read.success").cloned().unwrap_or_default();
        let sum: i64 = responses.iter().filter_map(|r| r.get("data")?.get("value")?.as_i64()).sum();
        Ok(HandlerOutput { context: None, output: Some(json!({"sum": sum})), services: vec![] })
    }
}

fn resumable_self_contract() -> Contract {
    Contract::new("#/resumable/v1", "arvo.res.sum", None).with_version(
        "1.0.0",
        VersionSpec { accepts: json!({"type": "object"}), emits: BTreeMap::new(), system_error: json!({}), orchestrator: None },
    )
}

async fn run_resumable_section(store: Arc<dyn MemoryStore>) {
    println!("\n-- resumable handler (C10) --");
    let resource = SyncResource::new(store, true);
    let handler = ResumableHandler::new(
        resumable_self_contract(),
        "1.0.0",
        vec![(value_service_contract(), "1.0.0".to_string())],
        Box::new(EchoResumableLogic),
        resource,
        0.0,
    )
    .expect("resumable handler construction");

    let subject = subject::encode(&SubjectFields::new("arvo.res.sum", "1.0.0", "arvo.res.sum"));
    let init_event = Event::builder("arvo.res.sum", subject.clone(), json!({"key": "k"}))
        .dataschema(format_dataschema("#/resumable/v1", "1.0.0"))
        .build();
    let service_calls = handler.execute(&init_event).await.expect("init step");
    for call in &service_calls {
        println!("  {} -> {} data={}", call.event_type, call.to, call.data);
    }
    let Some(service_call) = service_calls.first() else { return };

    let response = Event::builder("evt.value.read.success", subject, json!({"value": 11}))
        .parentid(service_call.id.clone())
        .dataschema(format_dataschema(SERVICE_URI, "1.0.0"))
        .build();
    let done = handler.execute(&response).await.expect("collect step");
    println!("  (completed, {} further event(s))", done.len());
}

struct DoubleLogic;

#[async_trait]
impl StatelessLogic for DoubleLogic {
    async fn handle(&self, input: &Value) -> Result<StatelessOutput, SystemErrorPayload> {
        let n = input.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
        Ok(StatelessOutput { emits: vec![RawEmit::new("evt.doubled", json!({"n": n * 2}))] })
    }
}

fn double_contract() -> Contract {
    Contract::new("#/double/v1", "com.double", None).with_version(
        "1.0.0",
        VersionSpec {
            accepts: json!({"type": "object"}),
            emits: BTreeMap::from([("evt.doubled".to_string(), json!({"type": "object"}))]),
            system_error: json!({}),
            orchestrator: None,
        },
    )
}

async fn run_stateless_section() {
    println!("\n-- stateless handler + router (C11) --");
    let handler: Box<dyn EventHandler> = Box::new(StatelessHandler::new(double_contract(), "1.0.0", Box::new(DoubleLogic), 1.0, Arc::new(arvo_telemetry::NoopTracer)));
    let router = Router::new("com.router", 0.5, vec![("com.double".to_string(), handler)]).expect("router construction");

    let event = Event::builder("com.double", "S0", json!({"n": 21})).to("com.router").build();
    let emitted = router.execute(&event).await.expect("router dispatch");
    for ev in &emitted {
        println!("  {} -> {} data={} executionunits={:?}", ev.event_type, ev.to, ev.data, ev.executionunits);
    }
}

#[cfg(feature = "pg_demo")]
async fn build_store() -> Arc<dyn MemoryStore> {
    match arvo_persistence::build_dev_pool_from_env() {
        Ok(pool) => {
            println!("connected to Postgres, using PgMemoryStore");
            Arc::new(arvo_persistence::PgMemoryStore::new(arvo_persistence::PoolProvider { pool }))
        }
        Err(err) => {
            println!("could not reach Postgres ({err}), falling back to InMemoryMemoryStore");
            Arc::new(InMemoryMemoryStore::new())
        }
    }
}

#[cfg(not(feature = "pg_demo"))]
async fn build_store() -> Arc<dyn MemoryStore> {
    Arc::new(InMemoryMemoryStore::new())
}

#[tokio::main]
async fn main() {
    env_logger::init();
    println!("arvo-runtime demo");
    println!("=================");

    run_orchestrator_section(build_store().await).await;
    run_resumable_section(build_store().await).await;
    run_stateless_section().await;
}
