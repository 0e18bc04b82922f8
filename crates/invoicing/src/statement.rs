//! Account statements: per-invoice balances plus totals for an owner.
//!
//! Totals are only ever summed within one currency. A statement whose invoices
//! disagree on currency reports `currency = "MIXED"` and no combined `total_due`;
//! the per-currency breakdown is always present.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bursar_core::{Currency, DomainError, DomainResult, InvoiceId, Money};

use crate::invoice::{Invoice, InvoiceStatus};

/// Ledger row for one invoice: its total and everything paid against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceBalance {
    pub invoice_id: InvoiceId,
    pub amount_total: Money,
    pub amount_paid: Money,
    pub status: InvoiceStatus,
    pub issued_at: DateTime<Utc>,
    pub due_date: NaiveDate,
}

impl InvoiceBalance {
    pub fn from_invoice(invoice: &Invoice) -> Self {
        Self {
            invoice_id: invoice.id_typed(),
            amount_total: invoice.amount(),
            amount_paid: invoice.amount_paid(),
            status: invoice.status(),
            issued_at: invoice.issued_at(),
            due_date: invoice.due_date(),
        }
    }
}

/// One invoice as it appears on a statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementLine {
    pub id: InvoiceId,
    pub amount_total: Decimal,
    pub amount_paid: Decimal,
    pub amount_due: Decimal,
    pub currency: Currency,
    pub status: InvoiceStatus,
    pub issued_at: DateTime<Utc>,
    pub due_date: NaiveDate,
}

/// Amount still due in a single currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyTotal {
    pub currency: Currency,
    pub total_due: Decimal,
}

/// Statement currency: one shared code, or `MIXED`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum StatementCurrency {
    Single(Currency),
    Mixed,
}

const MIXED: &str = "MIXED";

impl From<StatementCurrency> for String {
    fn from(value: StatementCurrency) -> Self {
        match value {
            StatementCurrency::Single(c) => c.code().to_string(),
            StatementCurrency::Mixed => MIXED.to_string(),
        }
    }
}

impl TryFrom<String> for StatementCurrency {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == MIXED {
            return Ok(StatementCurrency::Mixed);
        }
        Ok(StatementCurrency::Single(value.parse()?))
    }
}

/// Computed account statement for a student or a school.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatement {
    pub entity_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub invoices: Vec<StatementLine>,
    /// Sum of `amount_due`; `None` when invoices span several currencies.
    pub total_due: Option<Decimal>,
    /// `None` when there are no invoices.
    pub currency: Option<StatementCurrency>,
    pub totals_by_currency: Vec<CurrencyTotal>,
}

impl AccountStatement {
    /// Build a statement from ledger rows.
    ///
    /// `amount_due = amount_total - amount_paid` per invoice, in that invoice's
    /// currency. Line status is the effective status as of `generated_at`.
    pub fn compute(
        entity_id: Uuid,
        rows: &[InvoiceBalance],
        generated_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let today = generated_at.date_naive();
        let mut invoices = Vec::with_capacity(rows.len());
        let mut totals: Vec<Money> = Vec::new();

        for row in rows {
            let due = row.amount_total.checked_sub(&row.amount_paid).map_err(|e| {
                DomainError::invariant(format!("invoice {}: {e}", row.invoice_id))
            })?;

            match totals.iter_mut().find(|t| t.currency() == due.currency()) {
                Some(t) => *t = t.checked_add(&due)?,
                None => totals.push(due),
            }

            let status = if row.status != InvoiceStatus::Paid && row.due_date < today {
                InvoiceStatus::Overdue
            } else {
                row.status
            };

            invoices.push(StatementLine {
                id: row.invoice_id,
                amount_total: row.amount_total.amount(),
                amount_paid: row.amount_paid.amount(),
                amount_due: due.amount(),
                currency: row.amount_total.currency(),
                status,
                issued_at: row.issued_at,
                due_date: row.due_date,
            });
        }

        totals.sort_by_key(|t| t.currency());

        let (currency, total_due) = match totals.as_slice() {
            [] => (None, Some(Money::zero(Currency::Usd).amount())),
            [single] => (
                Some(StatementCurrency::Single(single.currency())),
                Some(single.amount()),
            ),
            _ => (Some(StatementCurrency::Mixed), None),
        };

        Ok(Self {
            entity_id,
            generated_at,
            invoices,
            total_due,
            currency,
            totals_by_currency: totals
                .into_iter()
                .map(|t| CurrencyTotal {
                    currency: t.currency(),
                    total_due: t.amount(),
                })
                .collect(),
        })
    }
}
