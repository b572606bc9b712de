pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod splitter;

pub use domain::file_set::{FileSet, DEFAULT_FILE_NAME};
pub use domain::operation::{Operation, RunResult};
pub use domain::specification::{InfrastructureSpec, RequiredField};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{SessionEvent, SessionFlow, SessionPhase};
pub use splitter::split_document;
