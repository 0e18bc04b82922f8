//! Errors surfaced by the application handlers.

use thiserror::Error;

use bursar_core::{DomainError, ErrorKind};

use crate::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl HandlerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandlerError::Domain(e) => e.kind(),
            HandlerError::Ledger(e) => e.kind(),
        }
    }
}

pub type HandlerResult<T> = Result<T, HandlerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_underlying_error() {
        let not_found: HandlerError = DomainError::not_found("school", "x").into();
        assert_eq!(not_found.kind(), ErrorKind::NotFound);

        let conflict: HandlerError = LedgerError::Conflict("stale".into()).into();
        assert_eq!(conflict.kind(), ErrorKind::Conflict);

        let backend: HandlerError = LedgerError::Backend("pool closed".into()).into();
        assert_eq!(backend.kind(), ErrorKind::Infrastructure);
    }
}
