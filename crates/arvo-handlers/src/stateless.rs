//! The stateless handler and router (C11, spec §4.10).
//!
//! Grounded on `chem-core::step::typed::TypedStep`'s blanket adapter to the
//! engine's neutral `StepDefinition` interface (bridge a narrow
//! user-supplied function to a uniform dispatchable shape) and
//! `chem-adapters::steps::{acquire,compute}` for the per-contract
//! function-handler texture.

use std::collections::HashMap;
use std::sync::Arc;

use arvo_core::domain::{self, DomainContext};
use arvo_core::engine::{RawEmit, SystemErrorPayload};
use arvo_model::contract::{validate_against_schema, Contract};
use arvo_model::errors::{ViolationError, ViolationKind};
use arvo_model::event::Event;
use arvo_telemetry::{Span, TraceContext, Tracer};
use async_trait::async_trait;
use serde_json::Value;

/// Common capability every handler the router can dispatch to exposes
/// (spec §9: "event handler capability set ... single interface").
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn execute(&self, event: &Event) -> Result<Vec<Event>, ViolationError>;
}

/// What a stateless handler's user function returns for one call.
#[derive(Debug, Clone, Default)]
pub struct StatelessOutput {
    pub emits: Vec<RawEmit>,
}

/// The user-supplied async function for one contract version. Returning
/// `Err` here means "ordinary exception" (§4.10: "other exceptions ->
/// `sys.<type>.error` events"), not a violation — violations are reserved
/// for schema mismatches, which the handler wraps around this call.
#[async_trait]
pub trait StatelessLogic: Send + Sync {
    async fn handle(&self, input: &Value) -> Result<StatelessOutput, SystemErrorPayload>;
}

pub struct StatelessHandler {
    contract: Contract,
    version: String,
    logic: Box<dyn StatelessLogic>,
    default_execution_units: f64,
    tracer: Arc<dyn Tracer>,
}

impl StatelessHandler {
    pub fn new(contract: Contract, version: impl Into<String>, logic: Box<dyn StatelessLogic>, default_execution_units: f64, tracer: Arc<dyn Tracer>) -> Self {
        Self { contract, version: version.into(), logic, default_execution_units, tracer }
    }

    pub fn source(&self) -> &str {
        &self.contract.event_type
    }
}

#[async_trait]
impl EventHandler for StatelessHandler {
    /// Opens a span around the call and threads its context onto every
    /// emitted event (spec §4.7's traceparent/tracestate propagation),
    /// rather than passing the inbound event's headers straight through.
    async fn execute(&self, event: &Event) -> Result<Vec<Event>, ViolationError> {
        let parent = TraceContext { traceparent: event.traceparent.clone(), tracestate: event.tracestate.clone() };
        let span = self.tracer.start_span(&self.contract.event_type, Some(&parent));
        let mut event = event.clone();
        event.traceparent = span.context().traceparent.clone();
        event.tracestate = span.context().tracestate.clone();
        let event = &event;

        let versioned = self
            .contract
            .version(&self.version)
            .ok_or_else(|| ViolationError::config(ViolationKind::UnknownMachineVersion(self.version.clone())))?;

        validate_against_schema(versioned.accepts(), &event.data)?;

        let output = match self.logic.handle(&event.data).await {
            Ok(output) => output,
            Err(payload) => {
                let error_value = serde_json::to_value(&payload).unwrap_or(Value::Null);
                let event_type = format!("sys.{}.error", self.contract.event_type);
                return Ok(vec![Event::builder(event_type, event.subject.clone(), error_value)
                    .source(self.contract.event_type.clone())
                    .parentid(event.id.clone())
                    .executionunits(self.default_execution_units)
                    .build()]);
            }
        };

        let mut assembled = Vec::new();
        for raw in &output.emits {
            if let Some(schema) = versioned.emits(&raw.event_type) {
                validate_against_schema(schema, &raw.data)?;
            }
            let domain_ctx = DomainContext { self_contract_domain: versioned.domain.map(str::to_string), event_contract_domain: None, triggering_event_domain: event.domain.clone() };
            let resolved_domains = domain::resolve_many(&raw.domain, &domain_ctx);
            for resolved_domain in resolved_domains {
                let mut builder = Event::builder(raw.event_type.clone(), event.subject.clone(), raw.data.clone())
                    .source(self.contract.event_type.clone())
                    .parentid(event.id.clone())
                    .domain(resolved_domain)
                    .executionunits(raw.executionunits.unwrap_or(self.default_execution_units))
                    .redirectto(raw.redirectto.clone().unwrap_or_else(|| self.contract.event_type.clone()));
                if let Some(to) = &raw.to {
                    builder = builder.to(to.clone());
                }
                assembled.push(builder.build());
            }
        }

        Ok(assembled)
    }
}

/// Fan-in router by event type (spec §4.10's second half).
pub struct Router {
    source: String,
    handlers: HashMap<String, Box<dyn EventHandler>>,
    executionunits: f64,
}

impl Router {
    pub fn new(source: impl Into<String>, executionunits: f64, bindings: Vec<(String, Box<dyn EventHandler>)>) -> Result<Self, ViolationError> {
        let mut handlers = HashMap::new();
        for (event_type, handler) in bindings {
            if handlers.insert(event_type.clone(), handler).is_some() {
                return Err(ViolationError::config(ViolationKind::DuplicateHandlerRegistration(event_type)));
            }
        }
        Ok(Self { source: source.into(), handlers, executionunits })
    }
}

#[async_trait]
impl EventHandler for Router {
    async fn execute(&self, event: &Event) -> Result<Vec<Event>, ViolationError> {
        if event.to != self.source {
            return Err(ViolationError::config(ViolationKind::RouterSourceMismatch { expected: self.source.clone(), actual: event.to.clone() }));
        }
        let handler = self
            .handlers
            .get(&event.event_type)
            .ok_or_else(|| ViolationError::config(ViolationKind::ContractUnresolved(event.event_type.clone())))?;

        let mut events = handler.execute(event).await?;
        for ev in &mut events {
            ev.executionunits = Some(ev.executionunits.unwrap_or(0.0) + self.executionunits);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arvo_model::contract::VersionSpec;
    use serde_json::json;
    use std::collections::BTreeMap;

    struct Double;
    #[async_trait]
    impl StatelessLogic for Double {
        async fn handle(&self, input: &Value) -> Result<StatelessOutput, SystemErrorPayload> {
            let n = input.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(StatelessOutput { emits: vec![RawEmit::new("evt.doubled", json!({"n": n * 2}))] })
        }
    }

    fn contract() -> Contract {
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

    #[tokio::test]
    async fn stateless_handler_emits_and_defaults_to_to_type() {
        let handler = StatelessHandler::new(contract(), "1.0.0", Box::new(Double), 0.0, Arc::new(arvo_telemetry::NoopTracer));
        let event = Event::builder("com.double", "S0", json!({"n": 3})).build();
        let emitted = handler.execute(&event).await.unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].to, "evt.doubled");
        assert_eq!(emitted[0].data, json!({"n": 6}));
    }

    #[tokio::test]
    async fn router_dispatches_by_type_and_adds_executionunits() {
        let handler: Box<dyn EventHandler> = Box::new(StatelessHandler::new(contract(), "1.0.0", Box::new(Double), 1.0, Arc::new(arvo_telemetry::NoopTracer)));
        let router = Router::new("com.router", 2.0, vec![("com.double".to_string(), handler)]).unwrap();
        let event = Event::builder("com.double", "S0", json!({"n": 3})).to("com.router").build();
        let emitted = router.execute(&event).await.unwrap();
        assert_eq!(emitted[0].executionunits, Some(3.0));
    }

    #[tokio::test]
    async fn router_rejects_mismatched_to() {
        let handler: Box<dyn EventHandler> = Box::new(StatelessHandler::new(contract(), "1.0.0", Box::new(Double), 1.0, Arc::new(arvo_telemetry::NoopTracer)));
        let router = Router::new("com.router", 0.0, vec![("com.double".to_string(), handler)]).unwrap();
        let event = Event::builder("com.double", "S0", json!({"n": 3})).to("com.other").build();
        assert!(router.execute(&event).await.is_err());
    }

    #[test]
    fn duplicate_handler_registration_is_config_violation() {
        let h1: Box<dyn EventHandler> = Box::new(StatelessHandler::new(contract(), "1.0.0", Box::new(Double), 0.0, Arc::new(arvo_telemetry::NoopTracer)));
        let h2: Box<dyn EventHandler> = Box::new(StatelessHandler::new(contract(), "1.0.0", Box::new(Double), 0.0, Arc::new(arvo_telemetry::NoopTracer)));
        let result = Router::new("com.router", 0.0, vec![("com.double".to_string(), h1), ("com.double".to_string(), h2)]);
        assert!(result.is_err());
    }
}
