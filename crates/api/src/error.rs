//! Service error taxonomy.
//!
//! `DomainError` and `DispatchError` are folded into the categories callers
//! act on. Only `Conflict` and `Internal` are worth retrying.

use thiserror::Error;

use warden_auth::AuthzError;
use warden_core::DomainError;
use warden_infra::command_dispatcher::DispatchError;
use warden_infra::consistency::ConsistencyError;
use warden_infra::event_store::EventStoreError;
use warden_infra::idp_registry::RegistryError;
use warden_infra::projections::ProjectionError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Carries nothing about the target so denials never reveal existence.
    #[error("permission denied")]
    PermissionDenied,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found")]
    NotFound,

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::PermissionDenied => "permission_denied",
            ServiceError::InvalidArgument(_) => "invalid_argument",
            ServiceError::NotFound => "not_found",
            ServiceError::FailedPrecondition(_) => "failed_precondition",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::DeadlineExceeded => "deadline_exceeded",
            ServiceError::Internal(_) => "internal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Conflict(_) | ServiceError::Internal(_))
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ServiceError::InvalidArgument(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ServiceError::Internal(msg.into())
    }
}

impl From<AuthzError> for ServiceError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::PermissionDenied(_) => ServiceError::PermissionDenied,
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidArgument(msg) | DomainError::InvalidId(msg) => {
                ServiceError::InvalidArgument(msg)
            }
            DomainError::NotFound => ServiceError::NotFound,
            DomainError::FailedPrecondition(msg) => ServiceError::FailedPrecondition(msg),
            DomainError::Conflict(msg) => ServiceError::Conflict(msg),
            DomainError::InvariantViolation(msg) => ServiceError::Internal(msg),
        }
    }
}

impl From<DispatchError> for ServiceError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Concurrency(msg) => ServiceError::Conflict(msg),
            DispatchError::InvalidArgument(msg) => ServiceError::InvalidArgument(msg),
            DispatchError::NotFound => ServiceError::NotFound,
            DispatchError::FailedPrecondition(msg) => ServiceError::FailedPrecondition(msg),
            DispatchError::DeadlineExceeded => ServiceError::DeadlineExceeded,
            // The change is durable; only delivery to read views failed.
            DispatchError::Publish(msg) => ServiceError::Internal(format!("event publication failed: {msg}")),
            other @ (DispatchError::InstanceIsolation(_)
            | DispatchError::InvariantViolation(_)
            | DispatchError::Deserialize(_)
            | DispatchError::Store(_)) => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<EventStoreError> for ServiceError {
    fn from(value: EventStoreError) -> Self {
        DispatchError::from(value).into()
    }
}

impl From<ProjectionError> for ServiceError {
    fn from(value: ProjectionError) -> Self {
        ServiceError::Internal(value.to_string())
    }
}

impl From<RegistryError> for ServiceError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::UnknownProvider(_) => ServiceError::NotFound,
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl<O: core::fmt::Debug> From<ConsistencyError<O>> for ServiceError {
    fn from(value: ConsistencyError<O>) -> Self {
        match value {
            ConsistencyError::Timeout { attempts, waited, .. } => ServiceError::Internal(format!(
                "read view did not catch up after {attempts} attempts in {waited:?}"
            )),
        }
    }
}
