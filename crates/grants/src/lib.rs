//! User grants domain module (event-sourced).
//!
//! A user grant assigns role keys on a project to a user, either directly or
//! through a project grant. Deterministic domain logic only: project and
//! project grant lookups are resolved before a command reaches the aggregate.

pub mod user_grant;

pub use user_grant::{
    AddUserGrant, DeactivateUserGrant, GrantScope, ReactivateUserGrant, RemoveUserGrant,
    UpdateUserGrant, UserGrant, UserGrantAdded, UserGrantChanged, UserGrantCommand,
    UserGrantDeactivated, UserGrantEvent, UserGrantId, UserGrantReactivated, UserGrantRemoved,
    UserGrantState, normalize_role_keys, AGGREGATE_TYPE,
};
