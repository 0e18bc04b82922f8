use std::fmt;

use bursar_core::{DomainError, InvoiceId, SchoolId, StudentId};
use bursar_invoicing::{AccountStatement, Invoice};
use bursar_schools::{School, Student};

use crate::error::HandlerResult;
use crate::ledger::{InvoiceFilter, Ledger, Page, Paginated, StudentFilter};
use crate::statements::{StatementAggregator, StatementOwner};

/// Read path. Listings go straight to the ledger; statements go through the
/// cached aggregator.
#[derive(Clone)]
pub struct QueryHandlers {
    ledger: Ledger,
    statements: StatementAggregator,
}

impl fmt::Debug for QueryHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryHandlers").finish_non_exhaustive()
    }
}

impl QueryHandlers {
    pub fn new(ledger: Ledger, statements: StatementAggregator) -> Self {
        Self { ledger, statements }
    }

    pub async fn list_schools(&self, page: Page) -> HandlerResult<Paginated<School>> {
        Ok(self.ledger.schools.list(page).await?)
    }

    pub async fn list_students(
        &self,
        school_id: Option<SchoolId>,
        page: Page,
    ) -> HandlerResult<Paginated<Student>> {
        Ok(self
            .ledger
            .students
            .list(StudentFilter { school_id }, page)
            .await?)
    }

    pub async fn list_invoices(
        &self,
        student_id: Option<StudentId>,
        page: Page,
    ) -> HandlerResult<Paginated<Invoice>> {
        let filter = InvoiceFilter {
            student_id,
            school_id: None,
        };
        Ok(self.ledger.invoices.list(filter, page).await?)
    }

    pub async fn get_invoice(&self, id: InvoiceId) -> HandlerResult<Invoice> {
        self.ledger
            .invoices
            .get_by_id(id)
            .await?
            .ok_or_else(|| DomainError::not_found("invoice", id).into())
    }

    pub async fn student_statement(&self, id: StudentId) -> HandlerResult<AccountStatement> {
        self.statements
            .get_statement(StatementOwner::Student(id))
            .await
    }

    pub async fn school_statement(&self, id: SchoolId) -> HandlerResult<AccountStatement> {
        self.statements
            .get_statement(StatementOwner::School(id))
            .await
    }
}
