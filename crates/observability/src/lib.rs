//! Process-wide tracing setup shared by the worker and API binaries.

/// Initialize tracing for the process.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    tracing::init(LogFormat::from_env());
}

pub use tracing::LogFormat;

/// Subscriber construction (filter, output format).
pub mod tracing;
