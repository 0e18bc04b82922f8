use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use bursar_core::{Currency, DomainError, InvoiceId, Money, SchoolId, StudentId};
use bursar_invoicing::{Invoice, Payment};
use bursar_schools::{School, Student};

use crate::cache::CacheService;
use crate::error::HandlerResult;
use crate::ledger::{Ledger, LedgerError};
use crate::statements::StatementOwner;

/// Write path. Every mutation that changes what a statement would show bumps
/// the affected owners' cache versions, after the ledger write has succeeded.
#[derive(Clone)]
pub struct CommandHandlers {
    ledger: Ledger,
    cache: Arc<dyn CacheService>,
    payment_retry_attempts: u32,
}

impl fmt::Debug for CommandHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandHandlers")
            .field("payment_retry_attempts", &self.payment_retry_attempts)
            .finish_non_exhaustive()
    }
}

impl CommandHandlers {
    pub fn new(ledger: Ledger, cache: Arc<dyn CacheService>, payment_retry_attempts: u32) -> Self {
        Self {
            ledger,
            cache,
            payment_retry_attempts: payment_retry_attempts.max(1),
        }
    }

    async fn invalidate(&self, owners: &[StatementOwner]) {
        for owner in owners {
            self.cache.increment_version(&owner.prefix()).await;
        }
    }

    async fn load_school(&self, id: SchoolId) -> HandlerResult<School> {
        self.ledger
            .schools
            .get_by_id(id)
            .await?
            .ok_or_else(|| DomainError::not_found("school", id).into())
    }

    async fn load_student(&self, id: StudentId) -> HandlerResult<Student> {
        self.ledger
            .students
            .get_by_id(id)
            .await?
            .ok_or_else(|| DomainError::not_found("student", id).into())
    }

    async fn load_invoice(&self, id: InvoiceId) -> HandlerResult<Invoice> {
        self.ledger
            .invoices
            .get_by_id(id)
            .await?
            .ok_or_else(|| DomainError::not_found("invoice", id).into())
    }

    pub async fn create_school(&self, name: &str) -> HandlerResult<School> {
        let school = School::create(name)?;
        self.ledger.schools.save(&school).await?;
        info!(school_id = %school.id_typed(), "school created");
        Ok(school)
    }

    pub async fn rename_school(&self, id: SchoolId, name: &str) -> HandlerResult<School> {
        let mut school = self.load_school(id).await?;
        school.rename(name)?;
        self.ledger.schools.save(&school).await?;
        Ok(school)
    }

    pub async fn delete_school(&self, id: SchoolId) -> HandlerResult<()> {
        self.load_school(id).await?;
        if !self.ledger.schools.delete(id).await? {
            return Err(DomainError::not_found("school", id).into());
        }
        self.invalidate(&[StatementOwner::School(id)]).await;
        info!(school_id = %id, "school deleted");
        Ok(())
    }

    pub async fn enroll_student(&self, name: &str, school_id: SchoolId) -> HandlerResult<Student> {
        self.load_school(school_id).await?;
        let student = Student::enroll(name, school_id)?;
        self.ledger.students.save(&student).await?;
        self.invalidate(&[StatementOwner::School(school_id)]).await;
        info!(student_id = %student.id_typed(), %school_id, "student enrolled");
        Ok(student)
    }

    pub async fn rename_student(&self, id: StudentId, name: &str) -> HandlerResult<Student> {
        let mut student = self.load_student(id).await?;
        student.rename(name)?;
        self.ledger.students.save(&student).await?;
        Ok(student)
    }

    pub async fn delete_student(&self, id: StudentId) -> HandlerResult<()> {
        let student = self.load_student(id).await?;
        if !self.ledger.students.delete(id).await? {
            return Err(DomainError::not_found("student", id).into());
        }
        self.invalidate(&[
            StatementOwner::Student(id),
            StatementOwner::School(student.school_id()),
        ])
        .await;
        info!(student_id = %id, "student deleted");
        Ok(())
    }

    /// Issue an invoice to a student; the school is taken from the student.
    pub async fn create_invoice(
        &self,
        student_id: StudentId,
        amount: Money,
        due_date: NaiveDate,
    ) -> HandlerResult<Invoice> {
        let student = self.load_student(student_id).await?;
        let mut invoice = Invoice::issue(student_id, student.school_id(), amount, due_date);
        let version = self.ledger.invoices.save(&invoice).await?;
        invoice.mark_saved(version);

        self.invalidate(&[
            StatementOwner::Student(student_id),
            StatementOwner::School(student.school_id()),
        ])
        .await;
        info!(invoice_id = %invoice.id_typed(), %student_id, %amount, "invoice issued");
        Ok(invoice)
    }

    /// Apply a payment to an invoice.
    ///
    /// The amount is taken in the invoice's currency unless `currency` says
    /// otherwise, in which case it must match. Concurrent payments on the same
    /// invoice are serialized by the ledger's revision check: a stale save is
    /// retried against a fresh load, so the overpayment rule always sees every
    /// committed payment.
    #[instrument(skip(self, invoice_id), fields(invoice_id = %invoice_id))]
    pub async fn register_payment(
        &self,
        invoice_id: InvoiceId,
        amount: Decimal,
        currency: Option<Currency>,
    ) -> HandlerResult<(Invoice, Payment)> {
        let mut attempt = 1;
        loop {
            let mut invoice = self.load_invoice(invoice_id).await?;
            let money = Money::new(amount, currency.unwrap_or(invoice.amount().currency()))?;
            let payment = invoice.register_payment(money)?;

            match self.ledger.invoices.save(&invoice).await {
                Ok(version) => {
                    invoice.mark_saved(version);
                    self.invalidate(&[
                        StatementOwner::Student(invoice.student_id()),
                        StatementOwner::School(invoice.school_id()),
                    ])
                    .await;
                    info!(
                        payment_id = %payment.id_typed(),
                        amount = %payment.amount(),
                        status = %invoice.status(),
                        "payment registered"
                    );
                    return Ok((invoice, payment));
                }
                Err(LedgerError::Conflict(reason)) if attempt < self.payment_retry_attempts => {
                    debug!(attempt, %reason, "concurrent invoice write, retrying payment");
                    attempt += 1;
                }
                Err(e) => {
                    if matches!(e, LedgerError::Conflict(_)) {
                        warn!(attempts = attempt, "payment retries exhausted");
                    }
                    return Err(e.into());
                }
            }
        }
    }

    pub async fn delete_invoice(&self, id: InvoiceId) -> HandlerResult<()> {
        let invoice = self.load_invoice(id).await?;
        if !self.ledger.invoices.delete(id).await? {
            return Err(DomainError::not_found("invoice", id).into());
        }
        self.invalidate(&[
            StatementOwner::Student(invoice.student_id()),
            StatementOwner::School(invoice.school_id()),
        ])
        .await;
        info!(invoice_id = %id, "invoice deleted");
        Ok(())
    }
}
