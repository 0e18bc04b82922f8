//! Schools and students: the owners invoices are billed against.
//!
//! Both are plain entities (no event history). Their ids double as the cache
//! prefixes under which account statements are versioned.

pub mod school;
pub mod student;

pub use school::School;
pub use student::Student;

use bursar_core::{DomainError, DomainResult};

/// Names are trimmed and must be non-empty.
pub(crate) fn normalize_name(kind: &str, name: &str) -> DomainResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(format!("{kind} name must not be empty")));
    }
    Ok(trimmed.to_string())
}
