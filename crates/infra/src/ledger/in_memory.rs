use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use bursar_core::{AggregateRoot, DomainError, ExpectedVersion, InvoiceId, SchoolId, StudentId};
use bursar_invoicing::{Invoice, InvoiceBalance};
use bursar_schools::{School, Student};

use super::{
    InvoiceFilter, InvoiceRepository, LedgerError, LedgerResult, Page, Paginated,
    SchoolRepository, StatementSource, StudentFilter, StudentRepository,
};
use crate::statements::StatementOwner;

#[derive(Debug, Default)]
struct LedgerState {
    schools: HashMap<SchoolId, School>,
    students: HashMap<StudentId, Student>,
    invoices: HashMap<InvoiceId, Invoice>,
}

/// In-memory ledger for tests/dev.
///
/// One lock guards all tables, so each write (including the version check) is
/// atomic with respect to every other ledger operation.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    inner: RwLock<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, LedgerState>> {
        self.inner
            .read()
            .map_err(|_| LedgerError::Backend("in-memory ledger lock poisoned".into()))
    }

    fn write(&self) -> LedgerResult<RwLockWriteGuard<'_, LedgerState>> {
        self.inner
            .write()
            .map_err(|_| LedgerError::Backend("in-memory ledger lock poisoned".into()))
    }
}

fn paginate<T: Clone>(
    mut items: Vec<T>,
    page: Page,
    newest_first: impl Fn(&T, &T) -> std::cmp::Ordering,
) -> Paginated<T> {
    items.sort_by(newest_first);
    let total = items.len() as u64;
    Paginated::new(page.slice(&items), total, page)
}

#[async_trait]
impl SchoolRepository for InMemoryLedger {
    async fn save(&self, school: &School) -> LedgerResult<()> {
        let mut state = self.write()?;
        state.schools.insert(school.id_typed(), school.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: SchoolId) -> LedgerResult<Option<School>> {
        Ok(self.read()?.schools.get(&id).cloned())
    }

    async fn delete(&self, id: SchoolId) -> LedgerResult<bool> {
        let mut state = self.write()?;
        if !state.schools.contains_key(&id) {
            return Ok(false);
        }
        if state.students.values().any(|s| s.school_id() == id) {
            return Err(DomainError::not_allowed(format!(
                "school {id} still has enrolled students"
            ))
            .into());
        }
        state.schools.remove(&id);
        Ok(true)
    }

    async fn list(&self, page: Page) -> LedgerResult<Paginated<School>> {
        let schools: Vec<School> = self.read()?.schools.values().cloned().collect();
        Ok(paginate(schools, page, |a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id_typed().cmp(&a.id_typed()))
        }))
    }
}

#[async_trait]
impl StudentRepository for InMemoryLedger {
    async fn save(&self, student: &Student) -> LedgerResult<()> {
        let mut state = self.write()?;
        if !state.schools.contains_key(&student.school_id()) {
            return Err(DomainError::not_found("school", student.school_id()).into());
        }
        state.students.insert(student.id_typed(), student.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: StudentId) -> LedgerResult<Option<Student>> {
        Ok(self.read()?.students.get(&id).cloned())
    }

    async fn delete(&self, id: StudentId) -> LedgerResult<bool> {
        let mut state = self.write()?;
        if !state.students.contains_key(&id) {
            return Ok(false);
        }
        if state.invoices.values().any(|i| i.student_id() == id) {
            return Err(DomainError::not_allowed(format!("student {id} still has invoices")).into());
        }
        state.students.remove(&id);
        Ok(true)
    }

    async fn list(&self, filter: StudentFilter, page: Page) -> LedgerResult<Paginated<Student>> {
        let students: Vec<Student> = self
            .read()?
            .students
            .values()
            .filter(|s| filter.school_id.is_none_or(|id| s.school_id() == id))
            .cloned()
            .collect();
        Ok(paginate(students, page, |a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id_typed().cmp(&a.id_typed()))
        }))
    }
}

#[async_trait]
impl InvoiceRepository for InMemoryLedger {
    async fn save(&self, invoice: &Invoice) -> LedgerResult<u64> {
        let mut state = self.write()?;
        let id = invoice.id_typed();
        let expected = ExpectedVersion::Exact(invoice.version());

        let stored_version = match state.invoices.get(&id) {
            Some(existing) => {
                if !expected.matches(existing.version()) {
                    return Err(LedgerError::Conflict(format!(
                        "invoice {id}: expected {expected:?}, found revision {}",
                        existing.version()
                    )));
                }
                // Payments are append-only: the stored list must be a prefix.
                let stored = existing.payments();
                let incoming = invoice.payments();
                if incoming.len() < stored.len()
                    || stored
                        .iter()
                        .zip(incoming)
                        .any(|(a, b)| a.id_typed() != b.id_typed())
                {
                    return Err(DomainError::invariant(format!(
                        "invoice {id}: stored payments cannot be removed or replaced"
                    ))
                    .into());
                }
                existing.version()
            }
            None => {
                if !expected.matches(0) {
                    return Err(LedgerError::Conflict(format!(
                        "invoice {id}: expected {expected:?}, but it no longer exists"
                    )));
                }
                let student = state
                    .students
                    .get(&invoice.student_id())
                    .ok_or_else(|| DomainError::not_found("student", invoice.student_id()))?;
                if student.school_id() != invoice.school_id() {
                    return Err(DomainError::validation(format!(
                        "student {} is not enrolled at school {}",
                        invoice.student_id(),
                        invoice.school_id()
                    ))
                    .into());
                }
                0
            }
        };

        let next = stored_version + 1;
        let mut stored = invoice.clone();
        stored.mark_saved(next);
        state.invoices.insert(id, stored);
        Ok(next)
    }

    async fn get_by_id(&self, id: InvoiceId) -> LedgerResult<Option<Invoice>> {
        Ok(self.read()?.invoices.get(&id).cloned())
    }

    async fn delete(&self, id: InvoiceId) -> LedgerResult<bool> {
        Ok(self.write()?.invoices.remove(&id).is_some())
    }

    async fn list(&self, filter: InvoiceFilter, page: Page) -> LedgerResult<Paginated<Invoice>> {
        let invoices: Vec<Invoice> = self
            .read()?
            .invoices
            .values()
            .filter(|i| filter.student_id.is_none_or(|id| i.student_id() == id))
            .filter(|i| filter.school_id.is_none_or(|id| i.school_id() == id))
            .cloned()
            .collect();
        Ok(paginate(invoices, page, |a, b| {
            b.issued_at()
                .cmp(&a.issued_at())
                .then_with(|| b.id_typed().cmp(&a.id_typed()))
        }))
    }
}

#[async_trait]
impl StatementSource for InMemoryLedger {
    async fn owner_exists(&self, owner: StatementOwner) -> LedgerResult<bool> {
        let state = self.read()?;
        Ok(match owner {
            StatementOwner::Student(id) => state.students.contains_key(&id),
            StatementOwner::School(id) => state.schools.contains_key(&id),
        })
    }

    async fn invoice_balances(&self, owner: StatementOwner) -> LedgerResult<Vec<InvoiceBalance>> {
        let state = self.read()?;
        let mut invoices: Vec<&Invoice> = state
            .invoices
            .values()
            .filter(|i| match owner {
                StatementOwner::Student(id) => i.student_id() == id,
                StatementOwner::School(id) => i.school_id() == id,
            })
            .collect();
        invoices.sort_by(|a, b| b.issued_at().cmp(&a.issued_at()));
        Ok(invoices.into_iter().map(InvoiceBalance::from_invoice).collect())
    }
}
