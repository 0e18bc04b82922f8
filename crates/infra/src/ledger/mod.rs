//! Ledger store boundary: schools, students, invoices and statement rows.
//!
//! The ledger is the strict half of the system. Unlike the cache, every failure
//! here is reported to the caller.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use bursar_core::{DomainError, DomainResult, ErrorKind, InvoiceId, SchoolId, StudentId};
use bursar_invoicing::{Invoice, InvoiceBalance};
use bursar_schools::{School, Student};

use crate::statements::StatementOwner;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryLedger;
pub use postgres::PostgresLedger;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The stored revision no longer matches the one the write was based on.
    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    /// The write breaks a referential rule (missing parent, dependents present).
    #[error(transparent)]
    Rejected(#[from] DomainError),

    /// A stored row could not be turned back into a domain value.
    #[error("corrupt ledger row: {0}")]
    Corrupt(String),

    #[error("ledger backend error: {0}")]
    Backend(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Conflict(_) => ErrorKind::Conflict,
            LedgerError::Rejected(e) => e.kind(),
            LedgerError::Corrupt(_) | LedgerError::Backend(_) => ErrorKind::Infrastructure,
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Limit/offset window over a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl Page {
    /// `limit` must be within `1..=100` (default 10); `offset` defaults to 0.
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> DomainResult<Self> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(DomainError::validation(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT} (got {limit})"
            )));
        }
        Ok(Self {
            limit,
            offset: offset.unwrap_or(0),
        })
    }

    pub(crate) fn slice<T: Clone>(&self, items: &[T]) -> Vec<T> {
        items
            .iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, total: u64, page: Page) -> Self {
        Self {
            items,
            total,
            limit: page.limit,
            offset: page.offset,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StudentFilter {
    pub school_id: Option<SchoolId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvoiceFilter {
    pub student_id: Option<StudentId>,
    pub school_id: Option<SchoolId>,
}

#[async_trait]
pub trait SchoolRepository: Send + Sync {
    /// Insert or update (rename) a school.
    async fn save(&self, school: &School) -> LedgerResult<()>;

    async fn get_by_id(&self, id: SchoolId) -> LedgerResult<Option<School>>;

    /// Remove a school. Returns `false` if it did not exist; fails with
    /// `OperationNotAllowed` while students are still enrolled.
    async fn delete(&self, id: SchoolId) -> LedgerResult<bool>;

    /// Newest first.
    async fn list(&self, page: Page) -> LedgerResult<Paginated<School>>;
}

#[async_trait]
pub trait StudentRepository: Send + Sync {
    /// Insert or update a student; the school must exist.
    async fn save(&self, student: &Student) -> LedgerResult<()>;

    async fn get_by_id(&self, id: StudentId) -> LedgerResult<Option<Student>>;

    /// Remove a student. Returns `false` if it did not exist; fails with
    /// `OperationNotAllowed` while the student still has invoices.
    async fn delete(&self, id: StudentId) -> LedgerResult<bool>;

    /// Newest first.
    async fn list(&self, filter: StudentFilter, page: Page) -> LedgerResult<Paginated<Student>>;
}

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    /// Upsert the invoice root and append payments not yet stored.
    ///
    /// The write only succeeds if the stored revision still equals
    /// `invoice.version()` (`0` meaning "not stored yet"); otherwise it fails with
    /// `LedgerError::Conflict`. Returns the new revision.
    async fn save(&self, invoice: &Invoice) -> LedgerResult<u64>;

    async fn get_by_id(&self, id: InvoiceId) -> LedgerResult<Option<Invoice>>;

    /// Remove an invoice and its payments. Returns `false` if it did not exist.
    async fn delete(&self, id: InvoiceId) -> LedgerResult<bool>;

    /// Newest first.
    async fn list(&self, filter: InvoiceFilter, page: Page) -> LedgerResult<Paginated<Invoice>>;
}

/// Read side used to compute account statements.
#[async_trait]
pub trait StatementSource: Send + Sync {
    async fn owner_exists(&self, owner: StatementOwner) -> LedgerResult<bool>;

    /// One row per invoice of `owner`, newest first.
    async fn invoice_balances(&self, owner: StatementOwner) -> LedgerResult<Vec<InvoiceBalance>>;
}

/// All ledger capabilities, usually backed by one store.
#[derive(Clone)]
pub struct Ledger {
    pub schools: Arc<dyn SchoolRepository>,
    pub students: Arc<dyn StudentRepository>,
    pub invoices: Arc<dyn InvoiceRepository>,
    pub statements: Arc<dyn StatementSource>,
}

impl Ledger {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: SchoolRepository + StudentRepository + InvoiceRepository + StatementSource + 'static,
    {
        Self {
            schools: store.clone(),
            students: store.clone(),
            invoices: store.clone(),
            statements: store,
        }
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_defaults_and_bounds() {
        assert_eq!(Page::new(None, None).unwrap(), Page { limit: 10, offset: 0 });
        assert_eq!(Page::new(Some(100), Some(20)).unwrap().limit, 100);
        assert!(matches!(Page::new(Some(0), None), Err(DomainError::Validation(_))));
        assert!(matches!(Page::new(Some(101), None), Err(DomainError::Validation(_))));
    }

    #[test]
    fn page_slices_window() {
        let page = Page { limit: 2, offset: 1 };
        assert_eq!(page.slice(&[1, 2, 3, 4]), vec![2, 3]);
        assert!(Page { limit: 2, offset: 9 }.slice(&[1, 2]).is_empty());
    }

    #[test]
    fn ledger_error_kinds() {
        assert_eq!(LedgerError::Conflict("x".into()).kind(), ErrorKind::Conflict);
        assert_eq!(
            LedgerError::Rejected(DomainError::not_allowed("has students")).kind(),
            ErrorKind::BusinessRule
        );
        assert_eq!(LedgerError::Corrupt("x".into()).kind(), ErrorKind::Infrastructure);
    }
}
