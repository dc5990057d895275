//! Process-wide tracing setup shared by binaries and black-box tests.

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Initialize tracing with the `info` default filter.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    tracing::init_with_default("info");
}
