//! `warden-events`: event contracts and distribution mechanics.
//!
//! Committed changes leave the command side as [`EventEnvelope`]s and reach
//! the read side through an [`EventBus`]. Nothing here knows about grants or
//! settings.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;
pub mod scoped;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use scoped::InstanceScoped;
