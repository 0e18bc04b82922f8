//! Postgres-backed ledger.
//!
//! Amounts are stored as `NUMERIC(12,2)` and mapped through `rust_decimal`, so no
//! value ever passes through a float.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | LedgerError |
//! |------------|----------------------|-------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `Rejected` (missing parent / dependents present) |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed, Io, ... | N/A | `Backend` |
//!
//! ## Optimistic Concurrency
//!
//! `invoices.version` is the aggregate revision. An update only applies
//! `WHERE version = <revision the caller loaded>`; zero affected rows means another
//! writer got there first and the save fails with `Conflict`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row};
use tracing::instrument;
use uuid::Uuid;

use bursar_core::{
    AggregateRoot, Currency, DomainError, InvoiceId, Money, PaymentId, SchoolId, StudentId,
};
use bursar_invoicing::{Invoice, InvoiceBalance, InvoiceParts, InvoiceStatus, Payment};
use bursar_schools::{School, Student};

use super::{
    InvoiceFilter, InvoiceRepository, LedgerError, LedgerResult, Page, Paginated,
    SchoolRepository, StatementSource, StudentFilter, StudentRepository,
};
use crate::statements::StatementOwner;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS schools (
        id          UUID PRIMARY KEY,
        name        TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS students (
        id          UUID PRIMARY KEY,
        school_id   UUID NOT NULL REFERENCES schools (id) ON DELETE RESTRICT,
        name        TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS students_school_id_idx ON students (school_id)",
    r#"
    CREATE TABLE IF NOT EXISTS invoices (
        id          UUID PRIMARY KEY,
        student_id  UUID NOT NULL REFERENCES students (id) ON DELETE RESTRICT,
        school_id   UUID NOT NULL REFERENCES schools (id) ON DELETE RESTRICT,
        amount      NUMERIC(12, 2) NOT NULL CHECK (amount >= 0),
        currency    TEXT NOT NULL,
        status      TEXT NOT NULL,
        due_date    DATE NOT NULL,
        issued_at   TIMESTAMPTZ NOT NULL,
        version     BIGINT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS invoices_student_id_idx ON invoices (student_id)",
    "CREATE INDEX IF NOT EXISTS invoices_school_id_idx ON invoices (school_id)",
    r#"
    CREATE TABLE IF NOT EXISTS payments (
        seq         BIGSERIAL,
        id          UUID PRIMARY KEY,
        invoice_id  UUID NOT NULL REFERENCES invoices (id) ON DELETE CASCADE,
        amount      NUMERIC(12, 2) NOT NULL CHECK (amount > 0),
        currency    TEXT NOT NULL,
        paid_at     TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS payments_invoice_id_idx ON payments (invoice_id)",
];

#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: Arc<PgPool>,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> LedgerResult<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> LedgerResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(())
    }

    async fn load_payments(&self, invoice_ids: &[Uuid]) -> LedgerResult<HashMap<Uuid, Vec<Payment>>> {
        let rows = sqlx::query(
            r#"
            SELECT id, invoice_id, amount, currency, paid_at
            FROM payments
            WHERE invoice_id = ANY($1)
            ORDER BY seq ASC
            "#,
        )
        .bind(invoice_ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_payments", e))?;

        let mut by_invoice: HashMap<Uuid, Vec<Payment>> = HashMap::new();
        for row in &rows {
            let invoice_id: Uuid = column(row, "invoice_id")?;
            let amount = money(column(row, "amount")?, column(row, "currency")?)?;
            by_invoice.entry(invoice_id).or_default().push(Payment::restore(
                PaymentId::from_uuid(column(row, "id")?),
                InvoiceId::from_uuid(invoice_id),
                amount,
                column(row, "paid_at")?,
            ));
        }
        Ok(by_invoice)
    }

    async fn hydrate_invoices(&self, rows: &[PgRow]) -> LedgerResult<Vec<Invoice>> {
        let ids = rows
            .iter()
            .map(|row| column::<Uuid>(row, "id"))
            .collect::<LedgerResult<Vec<_>>>()?;
        let mut payments = self.load_payments(&ids).await?;

        rows.iter()
            .map(|row| {
                let id: Uuid = column(row, "id")?;
                let version: i64 = column(row, "version")?;
                Invoice::restore(InvoiceParts {
                    id: InvoiceId::from_uuid(id),
                    student_id: StudentId::from_uuid(column(row, "student_id")?),
                    school_id: SchoolId::from_uuid(column(row, "school_id")?),
                    amount: money(column(row, "amount")?, column(row, "currency")?)?,
                    due_date: column(row, "due_date")?,
                    issued_at: column(row, "issued_at")?,
                    payments: payments.remove(&id).unwrap_or_default(),
                    version: version as u64,
                })
                .map_err(|e| LedgerError::Corrupt(format!("invoice {id}: {e}")))
            })
            .collect()
    }
}

#[async_trait]
impl SchoolRepository for PostgresLedger {
    #[instrument(skip(self, school), fields(school_id = %school.id_typed()), err)]
    async fn save(&self, school: &School) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO schools (id, name, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(school.id_typed().as_uuid())
        .bind(school.name())
        .bind(school.created_at())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_school", e))?;
        Ok(())
    }

    async fn get_by_id(&self, id: SchoolId) -> LedgerResult<Option<School>> {
        let row = sqlx::query("SELECT id, name, created_at FROM schools WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_school", e))?;
        row.as_ref().map(school_from_row).transpose()
    }

    #[instrument(skip(self), fields(school_id = %id), err)]
    async fn delete(&self, id: SchoolId) -> LedgerResult<bool> {
        let result = sqlx::query("DELETE FROM schools WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    DomainError::not_allowed(format!("school {id} still has enrolled students")).into()
                } else {
                    map_sqlx_error("delete_school", e)
                }
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, page: Page) -> LedgerResult<Paginated<School>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schools")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_schools", e))?;

        let rows = sqlx::query(
            r#"
            SELECT id, name, created_at
            FROM schools
            ORDER BY created_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_schools", e))?;

        let items = rows.iter().map(school_from_row).collect::<LedgerResult<_>>()?;
        Ok(Paginated::new(items, total as u64, page))
    }
}

#[async_trait]
impl StudentRepository for PostgresLedger {
    #[instrument(skip(self, student), fields(student_id = %student.id_typed()), err)]
    async fn save(&self, student: &Student) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO students (id, school_id, name, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(student.id_typed().as_uuid())
        .bind(student.school_id().as_uuid())
        .bind(student.name())
        .bind(student.created_at())
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                DomainError::not_found("school", student.school_id()).into()
            } else {
                map_sqlx_error("save_student", e)
            }
        })?;
        Ok(())
    }

    async fn get_by_id(&self, id: StudentId) -> LedgerResult<Option<Student>> {
        let row = sqlx::query("SELECT id, school_id, name, created_at FROM students WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_student", e))?;
        row.as_ref().map(student_from_row).transpose()
    }

    #[instrument(skip(self), fields(student_id = %id), err)]
    async fn delete(&self, id: StudentId) -> LedgerResult<bool> {
        let result = sqlx::query("DELETE FROM students WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    DomainError::not_allowed(format!("student {id} still has invoices")).into()
                } else {
                    map_sqlx_error("delete_student", e)
                }
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, filter: StudentFilter, page: Page) -> LedgerResult<Paginated<Student>> {
        let school_id: Option<Uuid> = filter.school_id.map(Uuid::from);

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM students WHERE ($1::uuid IS NULL OR school_id = $1)",
        )
        .bind(school_id)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_students", e))?;

        let rows = sqlx::query(
            r#"
            SELECT id, school_id, name, created_at
            FROM students
            WHERE ($1::uuid IS NULL OR school_id = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(school_id)
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_students", e))?;

        let items = rows.iter().map(student_from_row).collect::<LedgerResult<_>>()?;
        Ok(Paginated::new(items, total as u64, page))
    }
}

#[async_trait]
impl InvoiceRepository for PostgresLedger {
    #[instrument(
        skip(self, invoice),
        fields(invoice_id = %invoice.id_typed(), expected_version = invoice.version()),
        err
    )]
    async fn save(&self, invoice: &Invoice) -> LedgerResult<u64> {
        let id = *invoice.id_typed().as_uuid();
        let current = invoice.version();
        let next = current + 1;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        if current == 0 {
            // Insert only if the student exists and belongs to the invoice's school.
            let inserted = sqlx::query(
                r#"
                INSERT INTO invoices (
                    id, student_id, school_id, amount, currency, status, due_date, issued_at, version
                )
                SELECT $1, s.id, s.school_id, $4, $5, $6, $7, $8, $9
                FROM students s
                WHERE s.id = $2 AND s.school_id = $3
                "#,
            )
            .bind(id)
            .bind(invoice.student_id().as_uuid())
            .bind(invoice.school_id().as_uuid())
            .bind(invoice.amount().amount())
            .bind(invoice.amount().currency().code())
            .bind(invoice.status().as_str())
            .bind(invoice.due_date())
            .bind(invoice.issued_at())
            .bind(next as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_invoice", e))?;

            if inserted.rows_affected() == 0 {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(DomainError::not_found("student", invoice.student_id()).into());
            }
        } else {
            let updated = sqlx::query(
                "UPDATE invoices SET status = $2, version = $3 WHERE id = $1 AND version = $4",
            )
            .bind(id)
            .bind(invoice.status().as_str())
            .bind(next as i64)
            .bind(current as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_invoice", e))?;

            if updated.rows_affected() == 0 {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(LedgerError::Conflict(format!(
                    "invoice {id} is no longer at revision {current}"
                )));
            }
        }

        // Payments are append-only; rows already stored are left untouched.
        for payment in invoice.payments() {
            sqlx::query(
                r#"
                INSERT INTO payments (id, invoice_id, amount, currency, paid_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(payment.id_typed().as_uuid())
            .bind(id)
            .bind(payment.amount().amount())
            .bind(payment.amount().currency().code())
            .bind(payment.paid_at())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_payment", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(next)
    }

    async fn get_by_id(&self, id: InvoiceId) -> LedgerResult<Option<Invoice>> {
        let rows = sqlx::query(
            r#"
            SELECT id, student_id, school_id, amount, currency, due_date, issued_at, version
            FROM invoices
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_invoice", e))?;

        Ok(self.hydrate_invoices(&rows).await?.into_iter().next())
    }

    #[instrument(skip(self), fields(invoice_id = %id), err)]
    async fn delete(&self, id: InvoiceId) -> LedgerResult<bool> {
        let result = sqlx::query("DELETE FROM invoices WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_invoice", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, filter: InvoiceFilter, page: Page) -> LedgerResult<Paginated<Invoice>> {
        let student_id: Option<Uuid> = filter.student_id.map(Uuid::from);
        let school_id: Option<Uuid> = filter.school_id.map(Uuid::from);

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM invoices
            WHERE ($1::uuid IS NULL OR student_id = $1)
                AND ($2::uuid IS NULL OR school_id = $2)
            "#,
        )
        .bind(student_id)
        .bind(school_id)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_invoices", e))?;

        let rows = sqlx::query(
            r#"
            SELECT id, student_id, school_id, amount, currency, due_date, issued_at, version
            FROM invoices
            WHERE ($1::uuid IS NULL OR student_id = $1)
                AND ($2::uuid IS NULL OR school_id = $2)
            ORDER BY issued_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(student_id)
        .bind(school_id)
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_invoices", e))?;

        let items = self.hydrate_invoices(&rows).await?;
        Ok(Paginated::new(items, total as u64, page))
    }
}

#[async_trait]
impl StatementSource for PostgresLedger {
    async fn owner_exists(&self, owner: StatementOwner) -> LedgerResult<bool> {
        let sql = match owner {
            StatementOwner::Student(_) => "SELECT EXISTS (SELECT 1 FROM students WHERE id = $1)",
            StatementOwner::School(_) => "SELECT EXISTS (SELECT 1 FROM schools WHERE id = $1)",
        };
        sqlx::query_scalar(sql)
            .bind(owner.uuid())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("owner_exists", e))
    }

    #[instrument(skip(self, owner), fields(owner = %owner), err)]
    async fn invoice_balances(&self, owner: StatementOwner) -> LedgerResult<Vec<InvoiceBalance>> {
        let (student_id, school_id) = match owner {
            StatementOwner::Student(id) => (Some(Uuid::from(id)), None),
            StatementOwner::School(id) => (None, Some(Uuid::from(id))),
        };

        let rows = sqlx::query(
            r#"
            SELECT
                i.id,
                i.amount,
                i.currency,
                i.issued_at,
                i.due_date,
                COALESCE(SUM(p.amount), 0) AS paid
            FROM invoices i
            LEFT JOIN payments p ON p.invoice_id = i.id
            WHERE ($1::uuid IS NULL OR i.student_id = $1)
                AND ($2::uuid IS NULL OR i.school_id = $2)
            GROUP BY i.id
            ORDER BY i.issued_at DESC, i.id DESC
            "#,
        )
        .bind(student_id)
        .bind(school_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("invoice_balances", e))?;

        rows.iter().map(balance_from_row).collect()
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> LedgerResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| LedgerError::Corrupt(format!("column {name}: {e}")))
}

fn money(amount: Decimal, currency: String) -> LedgerResult<Money> {
    let currency: Currency = currency
        .parse()
        .map_err(|e: DomainError| LedgerError::Corrupt(e.to_string()))?;
    Money::new(amount, currency).map_err(|e| LedgerError::Corrupt(e.to_string()))
}

fn school_from_row(row: &PgRow) -> LedgerResult<School> {
    Ok(School::restore(
        SchoolId::from_uuid(column(row, "id")?),
        column(row, "name")?,
        column(row, "created_at")?,
    ))
}

fn student_from_row(row: &PgRow) -> LedgerResult<Student> {
    Ok(Student::restore(
        StudentId::from_uuid(column(row, "id")?),
        SchoolId::from_uuid(column(row, "school_id")?),
        column(row, "name")?,
        column(row, "created_at")?,
    ))
}

fn balance_from_row(row: &PgRow) -> LedgerResult<InvoiceBalance> {
    let id: Uuid = column(row, "id")?;
    let currency: String = column(row, "currency")?;
    let total = money(column(row, "amount")?, currency.clone())?;
    let paid = money(column(row, "paid")?, currency)?;
    let status = InvoiceStatus::derive(&paid, &total)
        .map_err(|e| LedgerError::Corrupt(format!("invoice {id}: {e}")))?;
    let issued_at: DateTime<Utc> = column(row, "issued_at")?;
    let due_date: NaiveDate = column(row, "due_date")?;

    Ok(InvoiceBalance {
        invoice_id: InvoiceId::from_uuid(id),
        amount_total: total,
        amount_paid: paid,
        status,
        issued_at,
        due_date,
    })
}

/// Map SQLx errors to `LedgerError` (see the module docs for the table).
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => LedgerError::Conflict(msg),
                Some("23503") => LedgerError::Rejected(DomainError::not_allowed(msg)),
                _ => LedgerError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            LedgerError::Backend(format!("connection pool closed in {operation}"))
        }
        other => LedgerError::Backend(format!("{operation}: {other}")),
    }
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23503";
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use bursar_core::ErrorKind;
    use rust_decimal_macros::dec;

    #[test]
    fn pool_errors_are_infrastructure() {
        let err = map_sqlx_error("list_schools", sqlx::Error::PoolClosed);
        assert!(matches!(err, LedgerError::Backend(_)));
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert!(!is_foreign_key_violation(&sqlx::Error::PoolClosed));
    }

    #[test]
    fn stored_money_is_validated() {
        assert_eq!(
            money(dec!(12.50), "GBP".into()).unwrap(),
            Money::new(dec!(12.5), Currency::Gbp).unwrap()
        );
        assert!(matches!(money(dec!(1), "XYZ".into()), Err(LedgerError::Corrupt(_))));
        assert!(matches!(money(dec!(-1), "USD".into()), Err(LedgerError::Corrupt(_))));
    }

    #[test]
    fn schema_creates_every_table() {
        for table in ["schools", "students", "invoices", "payments"] {
            assert!(
                SCHEMA
                    .iter()
                    .any(|s| s.contains(&format!("CREATE TABLE IF NOT EXISTS {table}"))),
                "missing table {table}"
            );
        }
    }
}
