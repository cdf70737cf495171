//! The machine execution engine (C7, spec §4.6): runs exactly one
//! synchronous step of a state machine from `(snapshot, event, machine)` to
//! `(new snapshot, status, raw emits, final output?)`.
//!
//! Grounded 1:1 on `chem-core::engine::core::FlowEngine::next_with`
//! (hydrate-from-snapshot-or-init, invoke one step, collect a structured
//! outcome) and `chem-core::step::run_result::StepRunResult` (a tagged
//! result enum mapped onto this crate's `(state, status, emits,
//! final_output)` tuple). The engine performs no I/O — `MachineLogic::step`
//! is a plain synchronous function, matching spec §4.6's "pure transform
//! modulo snapshot deserialization."

use std::collections::HashMap;

use arvo_model::errors::ViolationError;
use arvo_model::event::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::DomainToken;

/// Opaque machine state, serialized the same way between steps (spec §3:
/// "state (opaque machine snapshot)").
pub type Snapshot = Value;

/// Whether the machine reached a terminal state on this step (spec §4.6
/// step 3(c)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineStatus {
    Active,
    Done,
}

/// The raw shape a machine's enqueue action produces, pre-validation (spec
/// §4.6: "Raw emitted event shape (pre-validation)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEmit {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default)]
    pub domain: Vec<DomainToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataschema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirectto: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accesscontrol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executionunits: Option<f64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty", rename = "__extensions")]
    pub extensions: HashMap<String, Value>,
    /// Handler-supplied id override (`__id`); honored only on the
    /// completion-event path (Open Question 3, pinned in SPEC_FULL.md §5).
    #[serde(skip_serializing_if = "Option::is_none", rename = "__id")]
    pub id_override: Option<String>,
    /// `parentSubject$$`: present when this raw emit initiates a child
    /// orchestration.
    #[serde(skip_serializing_if = "Option::is_none", rename = "parentSubject$$")]
    pub parent_subject: Option<String>,
}

impl RawEmit {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            to: None,
            domain: Vec::new(),
            dataschema: None,
            redirectto: None,
            accesscontrol: None,
            executionunits: None,
            extensions: HashMap::new(),
            id_override: None,
            parent_subject: None,
        }
    }
}

/// The result of one synchronous step (spec §4.6 step 4).
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub state: Snapshot,
    pub status: MachineStatus,
    pub raw_emits: Vec<RawEmit>,
    pub final_output: Option<Value>,
}

/// An opaque system-level error (spec §4.2: "Every other failure is a
/// system error"). Carries the standard arvo error shape (message, name,
/// stack) that `arvo-handlers` turns into a `sys.<type>.error` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemErrorPayload {
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl SystemErrorPayload {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), message: message.into(), stack: None }
    }
}

/// Why a step failed to produce an outcome — either a bug-class violation
/// (thrown to the caller) or an ordinary workflow-level failure (absorbed
/// into the persisted record and converted into system-error events).
/// This is the Rust encoding of spec §4.8's "any violation ... thrown" vs.
/// "any non-violation exception ... converted" split — `MachineLogic::step`
/// returns this instead of a single error type so the two paths are
/// distinguishable at the type level rather than by inspecting a caught
/// exception.
#[derive(Debug, Clone)]
pub enum EngineFailure {
    Violation(ViolationError),
    SystemError(SystemErrorPayload),
}

impl From<ViolationError> for EngineFailure {
    fn from(err: ViolationError) -> Self {
        EngineFailure::Violation(err)
    }
}

/// The opaque actor logic the engine drives — analogous to
/// `chem-core::step::definition::StepDefinition`, generalized from "one
/// pipeline step" to "one state machine." Implementations may not declare
/// actors, delays, `invoke`, or `after` (spec §4.6's synchronous
/// constraint); this trait's signature makes that true by construction —
/// there is no async entry point and no scheduler handle to invoke one.
pub trait MachineLogic: Send + Sync {
    /// The one accepted event type (the machine registry's `source`).
    fn source(&self) -> &str;

    fn version(&self) -> &str;

    /// Runs one step. `previous_snapshot` is `None` only on the very first
    /// event for a subject (spec §4.6 step 1: "create a fresh actor ...
    /// using the init event's payload as input").
    fn step(&self, previous_snapshot: Option<&Snapshot>, event: &Event) -> Result<StepOutcome, EngineFailure>;
}

/// Runs one step of `machine`. Currently a thin pass-through — kept as its
/// own function (rather than calling `MachineLogic::step` directly from
/// callers) so `arvo-handlers::orchestrator` has one seam to instrument
/// with telemetry/logging without reaching into `MachineLogic` itself,
/// mirroring how `FlowEngine::next_with` wraps `StepDefinition::run`.
pub fn run_step(machine: &dyn MachineLogic, previous_snapshot: Option<&Snapshot>, event: &Event) -> Result<StepOutcome, EngineFailure> {
    machine.step(previous_snapshot, event)
}
