//! Background workers driving the read side.

pub mod projection_worker;

pub use projection_worker::{ProjectionWorker, WorkerHandle};
