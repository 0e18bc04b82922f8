//! Process-wide tracing setup shared by binaries.

pub mod tracing;

pub use self::tracing::OutputFormat;

/// Initialize process-wide logging with the given output format.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init(format: OutputFormat) {
    let _ = self::tracing::init(format);
}
