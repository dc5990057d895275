use std::time::{Duration, Instant};

use warden_auth::Caller;
use warden_core::{InstanceId, OrgId};

use crate::error::ServiceError;

/// Per-operation context: who is calling and until when.
///
/// Built once per request by the authentication middleware and passed
/// explicitly to every service operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    caller: Caller,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(caller: Caller) -> Self {
        Self {
            caller,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn caller(&self) -> &Caller {
        &self.caller
    }

    pub fn instance_id(&self) -> InstanceId {
        self.caller.instance_id
    }

    pub fn org_id(&self) -> OrgId {
        self.caller.org_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` without a deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn check_deadline(&self) -> Result<(), ServiceError> {
        match self.remaining() {
            Some(left) if left.is_zero() => Err(ServiceError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}
