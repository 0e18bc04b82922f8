//! Domain error model.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::money::Currency;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A monetary amount was negative (or an operation would make it so).
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Two monetary values in different currencies were combined or compared.
    #[error("currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch { expected: Currency, found: Currency },

    /// A payment would take the paid total above the invoice total.
    #[error("payment amount {requested} exceeds due amount {due}")]
    PaymentExceedsDueAmount { requested: Decimal, due: Decimal },

    /// The aggregate cannot move to the requested state.
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// The operation is not allowed given the current state of related entities.
    #[error("operation not allowed: {0}")]
    OperationNotAllowed(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested entity does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Coarse classification of domain failures.
///
/// Callers map these onto their own surfaces (HTTP status codes, retry policy).
/// None of them is ever retried automatically except `Conflict`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input; surfaced immediately.
    Validation,
    /// An expected business rule rejected the operation.
    BusinessRule,
    /// A lookup failed.
    NotFound,
    /// Concurrent modification detected.
    Conflict,
    /// Storage or transport failure outside the domain. Never produced by
    /// [`DomainError`]; outer layers use it for their own errors.
    Infrastructure,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::InvalidAmount(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn not_allowed(msg: impl Into<String>) -> Self {
        Self::OperationNotAllowed(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Validation(_)
            | DomainError::InvalidAmount(_)
            | DomainError::CurrencyMismatch { .. }
            | DomainError::InvalidId(_) => ErrorKind::Validation,
            DomainError::PaymentExceedsDueAmount { .. }
            | DomainError::InvalidStateTransition(_)
            | DomainError::OperationNotAllowed(_)
            | DomainError::InvariantViolation(_) => ErrorKind::BusinessRule,
            DomainError::NotFound { .. } => ErrorKind::NotFound,
            DomainError::Conflict(_) => ErrorKind::Conflict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn payment_rejections_are_business_rules_not_validation() {
        let err = DomainError::PaymentExceedsDueAmount {
            requested: dec!(0.01),
            due: dec!(0.00),
        };
        assert_eq!(err.kind(), ErrorKind::BusinessRule);
        assert_eq!(err.to_string(), "payment amount 0.01 exceeds due amount 0.00");
    }

    #[test]
    fn currency_mismatch_is_validation() {
        let err = DomainError::CurrencyMismatch {
            expected: Currency::Usd,
            found: Currency::Eur,
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "currency mismatch: expected USD, found EUR");
    }

    #[test]
    fn not_found_names_the_entity() {
        let err = DomainError::not_found("invoice", "abc");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "invoice abc not found");
    }
}
