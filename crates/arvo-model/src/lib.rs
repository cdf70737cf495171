//! Value types shared by every layer of the orchestration runtime: the
//! event, its contract, the subject codec, and the violation taxonomy.

pub mod contract;
pub mod errors;
pub mod event;
pub mod hashing;
pub mod subject;

pub use contract::{check_contract_uniqueness, validate_against_schema, Contract, Schema, VersionSpec, VersionedContract};
pub use errors::{ViolationCategory, ViolationError, ViolationKind};
pub use event::{format_dataschema, Event, EventBuilder, ParsedDataschema, ANY_VERSION};
pub use subject::{decode as decode_subject, encode as encode_subject, SubjectFields};
