//! The engine layer: memory/lock abstraction, the sync resource wrapper,
//! domain resolution, the machine registry, the execution engine, and the
//! emittable event builder (C3–C8).

pub mod builder;
pub mod domain;
pub mod engine;
pub mod hashing;
pub mod memory;
pub mod registry;
pub mod resource;

pub use builder::{build, BuildContext};
pub use domain::{resolve, resolve_many, DomainContext, DomainToken};
pub use engine::{run_step, EngineFailure, MachineLogic, MachineStatus, RawEmit, Snapshot, StepOutcome, SystemErrorPayload};
pub use memory::{InMemoryMemoryStore, LockOutcome, MemoryStore, Record, SharedMemoryStore};
pub use registry::MachineRegistry;
pub use resource::SyncResource;
