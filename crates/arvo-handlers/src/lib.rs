//! The handler layer: the input validator, the orchestrator, the resumable
//! handler, and the stateless handler/router (C9–C12).

pub mod orchestrator;
pub mod resumable;
pub mod stateless;
pub mod validator;

pub use orchestrator::{Orchestrator, ServiceBinding};
pub use resumable::{HandlerInput, HandlerOutput, ResumableHandler, ResumableLogic, ResumableStatus};
pub use stateless::{EventHandler, Router, StatelessHandler, StatelessLogic, StatelessOutput};
pub use validator::{validate, ContractRole, ValidationOutcome};
