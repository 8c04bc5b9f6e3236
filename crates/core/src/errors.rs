use thiserror::Error;

use crate::domain::identity::UserId;
use crate::domain::machine::{BorrowStatus, MachineId, MachineStatus};
use crate::domain::ticket::{OperationType, TicketCategory, TicketId};
use crate::flows::TicketTransitionError;
use crate::ports::{DirectoryError, DispatchError};
use crate::store::StoreError;

fn borrow_label(value: &Option<BorrowStatus>) -> &'static str {
    BorrowStatus::label(*value)
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(
        "machine `{machine_id}` (status `{status}`, borrow status `{}`) is not eligible for `{operation}`",
        borrow_label(.borrow_status)
    )]
    IneligibleMachine {
        machine_id: MachineId,
        operation: OperationType,
        status: MachineStatus,
        borrow_status: Option<BorrowStatus>,
    },
    #[error("unknown operation type `{0}`")]
    UnknownOperation(String),
    #[error("unknown ticket category `{0}`")]
    UnknownCategory(String),
    #[error("operation `{operation}` does not belong to `{category}` tickets")]
    OperationCategoryMismatch { category: TicketCategory, operation: OperationType },
    #[error(transparent)]
    TicketTransition(#[from] TicketTransitionError),
    #[error("machine `{0}` does not exist")]
    MachineNotFound(MachineId),
    #[error("location `{0}` does not exist")]
    LocationNotFound(String),
    #[error("machine `{0}` appears more than once on the ticket")]
    DuplicateMachine(MachineId),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("`{actor}` may not {action}: {reason}")]
    PermissionDenied { actor: UserId, action: &'static str, reason: String },
    #[error("ticket `{0}` does not exist")]
    TicketNotFound(TicketId),
    #[error("concurrent modification: {0}")]
    Conflict(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict { .. } => Self::Conflict(value.to_string()),
            other => Self::Persistence(other.to_string()),
        }
    }
}

impl From<TicketTransitionError> for ApplicationError {
    fn from(value: TicketTransitionError) -> Self {
        Self::Domain(DomainError::TicketTransition(value))
    }
}

impl From<DirectoryError> for ApplicationError {
    fn from(value: DirectoryError) -> Self {
        Self::Integration(value.to_string())
    }
}

impl From<DispatchError> for ApplicationError {
    fn from(value: DispatchError) -> Self {
        Self::Integration(value.to_string())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
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
            Self::Forbidden { .. } => "You are not allowed to perform this action.",
            Self::NotFound { .. } => "The requested ticket could not be found.",
            Self::Conflict { .. } => {
                "The ticket or its machines changed while processing. Reload and retry."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::Forbidden { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
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
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
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
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id }
            }
            error @ ApplicationError::PermissionDenied { .. } => {
                Self::Forbidden { message: error.to_string(), correlation_id }
            }
            error @ ApplicationError::TicketNotFound(_) => {
                Self::NotFound { message: error.to_string(), correlation_id }
            }
            ApplicationError::Conflict(message) => Self::Conflict { message, correlation_id },
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
