use thiserror::Error;

use crate::domain::request::{RequestId, RequestStatus};
use crate::domain::user::UserId;

/// Failure reported by a persistence port.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("stored data could not be decoded: {0}")]
    Decode(String),
    #[error("duplicate record: {0}")]
    Duplicate(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("invalid `{field}`: {message}")]
    Validation { field: &'static str, message: String },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("user {actor} is not allowed to {action}")]
    Forbidden { actor: UserId, action: &'static str },
    #[error("request {request} is already {status}")]
    AlreadyDecided { request: RequestId, status: RequestStatus },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("dependency failure: {0}")]
    Dependency(String),
}

impl WorkflowError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation { field, message: message.into() }
    }

    pub fn request_not_found(id: RequestId) -> Self {
        Self::NotFound { entity: "request", id: id.0 }
    }

    pub fn user_not_found(id: UserId) -> Self {
        Self::NotFound { entity: "user", id: id.0 }
    }

    pub fn forbidden(actor: UserId, action: &'static str) -> Self {
        Self::Forbidden { actor, action }
    }

    /// Error kind name as used in logs and API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Forbidden { .. } => "forbidden",
            Self::AlreadyDecided { .. } | Self::Conflict(_) => "conflict",
            Self::Dependency(_) => "dependency",
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let message = self.to_string();
        match self {
            Self::Validation { field, .. } => {
                InterfaceError::BadRequest { field: Some(field), message, correlation_id }
            }
            Self::NotFound { .. } => InterfaceError::NotFound { message, correlation_id },
            Self::Forbidden { .. } => InterfaceError::Forbidden { message, correlation_id },
            Self::AlreadyDecided { .. } | Self::Conflict(_) => {
                InterfaceError::Conflict { message, correlation_id }
            }
            Self::Dependency(_) => InterfaceError::ServiceUnavailable { message, correlation_id },
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Duplicate(message) => Self::Conflict(message),
            other => Self::Dependency(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { field: Option<&'static str>, message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested item does not exist.",
            Self::Forbidden { .. } => "You are not allowed to perform this action.",
            Self::Conflict { .. } => {
                "The item changed in the meantime. Reload it and review its current state."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. } => correlation_id,
        }
    }
}
