use thiserror::Error;

use crate::domain::specification::{join_fields, RequiredField};
use crate::flows::FlowTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid operation: {name}. Valid operations are {}", crate::domain::operation::Operation::allowed_names())]
    UnknownOperation { name: String },
    #[error("invalid file name `{name}`: {reason}")]
    InvalidFileName { name: String, reason: String },
    #[error("specification is missing required fields: {}", join_fields(.missing))]
    IncompleteSpecification { missing: Vec<RequiredField> },
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{0}")]
    InvalidInput(String),
    #[error("Agent not initialized")]
    NotInitialized,
    #[error("No Terraform code has been generated yet")]
    NoGeneratedCode,
    #[error("No infrastructure specification has been generated yet")]
    NoSpecification,
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error("provisioning failure: {0}")]
    Provisioning(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Conflict { .. } => "The session is not ready for this request.",
            Self::ServiceUnavailable { .. } => {
                "A required service is unavailable. Check configuration and try again."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    /// Detailed message surfaced in the response envelope.
    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::Conflict { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::FlowTransition(error)) => {
                Self::Internal { message: error.to_string(), correlation_id }
            }
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id }
            }
            ApplicationError::InvalidInput(message) => Self::BadRequest { message, correlation_id },
            error @ (ApplicationError::NotInitialized
            | ApplicationError::NoGeneratedCode
            | ApplicationError::NoSpecification) => {
                Self::Conflict { message: error.to_string(), correlation_id }
            }
            ApplicationError::Configuration(message) | ApplicationError::Upstream(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Provisioning(message) => Self::Internal { message, correlation_id },
        }
    }
}
