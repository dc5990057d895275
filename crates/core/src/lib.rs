//! `warden-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the grant and
//! settings aggregates (no infrastructure concerns).

pub mod aggregate;
pub mod details;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use details::{ChangeDetails, ListDetails, ResourceOwner};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, InstanceId, OrgId, ProjectGrantId, ProjectId, UserId};
