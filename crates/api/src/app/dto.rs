use core::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use bursar_core::{Currency, DomainError, InvoiceId, PaymentId, SchoolId, StudentId};
use bursar_invoicing::{Invoice, InvoiceStatus, Payment};
use bursar_schools::{School, Student};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct NameRequest {
    pub name: String,
}

/// OAuth2 password-style form: `username=<email>&password=<password>`.
#[derive(Deserialize)]
pub struct TokenRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct EnrollStudentRequest {
    pub name: String,
    pub school_id: String,
}

/// Monetary amount as sent by clients: `"40.00"` or `40`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Text(String),
    Number(serde_json::Number),
}

impl AmountInput {
    pub fn to_decimal(&self) -> Result<Decimal, DomainError> {
        let raw = match self {
            AmountInput::Text(s) => s.trim().to_string(),
            AmountInput::Number(n) => n.to_string(),
        };
        Decimal::from_str(&raw)
            .or_else(|_| Decimal::from_scientific(&raw))
            .map_err(|_| DomainError::invalid_amount(format!("'{raw}' is not a decimal amount")))
    }
}

#[derive(Debug, Deserialize)]
pub struct IssueInvoiceRequest {
    pub student_id: String,
    pub amount: AmountInput,
    pub currency: Currency,
    pub due_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct RegisterPaymentRequest {
    pub amount: AmountInput,
    /// Defaults to the invoice currency.
    pub currency: Option<Currency>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessPaymentRequest {
    pub invoice_id: String,
    pub amount: AmountInput,
    pub currency: Option<Currency>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub school_id: Option<String>,
    pub student_id: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    /// Seconds until the token expires.
    pub expires_in: i64,
}

#[derive(Debug, Serialize)]
pub struct SchoolResponse {
    pub id: SchoolId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<&School> for SchoolResponse {
    fn from(s: &School) -> Self {
        Self {
            id: s.id_typed(),
            name: s.name().to_string(),
            created_at: s.created_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StudentResponse {
    pub id: StudentId,
    pub school_id: SchoolId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Student> for StudentResponse {
    fn from(s: &Student) -> Self {
        Self {
            id: s.id_typed(),
            school_id: s.school_id(),
            name: s.name().to_string(),
            created_at: s.created_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub id: PaymentId,
    pub invoice_id: InvoiceId,
    pub amount: Decimal,
    pub currency: Currency,
    pub paid_at: DateTime<Utc>,
}

impl From<&Payment> for PaymentResponse {
    fn from(p: &Payment) -> Self {
        Self {
            id: p.id_typed(),
            invoice_id: p.invoice_id(),
            amount: p.amount().amount(),
            currency: p.amount().currency(),
            paid_at: p.paid_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    pub id: InvoiceId,
    pub student_id: StudentId,
    pub school_id: SchoolId,
    pub amount_total: Decimal,
    pub amount_paid: Decimal,
    pub amount_due: Decimal,
    pub currency: Currency,
    /// Effective status: `OVERDUE` once the due date has passed unpaid.
    pub status: InvoiceStatus,
    pub issued_at: DateTime<Utc>,
    pub due_date: NaiveDate,
    pub payments: Vec<PaymentResponse>,
}

impl From<&Invoice> for InvoiceResponse {
    fn from(i: &Invoice) -> Self {
        Self {
            id: i.id_typed(),
            student_id: i.student_id(),
            school_id: i.school_id(),
            amount_total: i.amount().amount(),
            amount_paid: i.amount_paid().amount(),
            amount_due: i.amount_due().amount(),
            currency: i.amount().currency(),
            status: i.effective_status(Utc::now().date_naive()),
            issued_at: i.issued_at(),
            due_date: i.due_date(),
            payments: i.payments().iter().map(PaymentResponse::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentReceipt {
    pub payment: PaymentResponse,
    pub invoice: InvoiceResponse,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn amounts_accept_strings_and_numbers() {
        let text: AmountInput = serde_json::from_str(r#""40.50""#).unwrap();
        assert_eq!(text.to_decimal().unwrap(), dec!(40.50));

        let number: AmountInput = serde_json::from_str("0.01").unwrap();
        assert_eq!(number.to_decimal().unwrap(), dec!(0.01));

        let bad: AmountInput = serde_json::from_str(r#""forty""#).unwrap();
        assert!(matches!(bad.to_decimal(), Err(DomainError::InvalidAmount(_))));
    }
}
