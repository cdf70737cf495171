//! The machine registry (C6, spec §4.5): an ordered collection of machines
//! sharing one `source`, resolved by the orchestrator's version at runtime.
//!
//! Grounded on `chem-core::repo::types::FlowDefinition`/
//! `build_flow_definition` (a collection validated once at construction,
//! never re-checked per call) and `chem-core::engine::mod`'s re-export
//! surface for how the engine layer exposes its registry-shaped collection.

use std::collections::HashMap;
use std::sync::Arc;

use arvo_model::errors::{ViolationError, ViolationKind};
use arvo_model::event::Event;
use arvo_model::subject;

use crate::engine::MachineLogic;

/// Holds every version of one orchestrator's machine. Construction
/// enforces the invariants from §4.5: identical `source` across all
/// machines, unique versions, and at least one machine.
pub struct MachineRegistry {
    source: String,
    by_version: HashMap<String, Arc<dyn MachineLogic>>,
}

impl MachineRegistry {
    pub fn new(machines: Vec<Arc<dyn MachineLogic>>) -> Result<Self, ViolationError> {
        let first = machines
            .first()
            .ok_or_else(|| ViolationError::config(ViolationKind::UnknownMachineVersion("<no machines registered>".into())))?;
        let source = first.source().to_string();

        let mut by_version = HashMap::new();
        for machine in machines {
            if machine.source() != source {
                return Err(ViolationError::config(ViolationKind::UnknownMachineVersion(format!(
                    "machine source mismatch: expected {source}, got {}",
                    machine.source()
                ))));
            }
            let version = machine.version().to_string();
            if by_version.insert(version.clone(), machine).is_some() {
                return Err(ViolationError::config(ViolationKind::UnknownMachineVersion(format!(
                    "duplicate machine version: {version}"
                ))));
            }
        }

        Ok(Self { source, by_version })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parses `event.subject` and looks up the machine matching
    /// `orchestrator.version` (spec §4.5: `resolve(event)`).
    pub fn resolve(&self, event: &Event) -> Result<Arc<dyn MachineLogic>, ViolationError> {
        let fields = subject::decode(&event.subject)?;
        self.by_version
            .get(&fields.orchestrator_version)
            .cloned()
            .ok_or_else(|| ViolationError::config(ViolationKind::UnknownMachineVersion(fields.orchestrator_version)))
    }
}
