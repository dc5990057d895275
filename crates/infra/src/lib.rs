//! Infrastructure layer: event store, dispatch, read models, workers, config.
//!
//! Everything here is synchronous and in-memory; durable backends slot in
//! behind the [`event_store::EventStore`], [`read_model::InstanceStore`],
//! [`directory::ProjectDirectory`] and [`idp_registry::ProviderRegistry`]
//! traits.

pub mod command_dispatcher;
pub mod config;
pub mod consistency;
pub mod directory;
pub mod event_store;
pub mod idp_registry;
pub mod projections;
pub mod read_model;
pub mod workers;

#[cfg(test)]
mod integration_tests;
