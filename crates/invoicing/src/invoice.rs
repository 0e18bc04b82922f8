use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use bursar_core::{
    AggregateRoot, DomainError, DomainResult, Entity, InvoiceId, Money, PaymentId, SchoolId,
    StudentId,
};

/// Invoice status lifecycle.
///
/// `Pending`, `PartiallyPaid` and `Paid` are a pure function of the paid total (see
/// [`InvoiceStatus::derive`]). `Overdue` is never stored: it is a read-time view
/// produced by [`Invoice::effective_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Pending,
    PartiallyPaid,
    Paid,
    Overdue,
}

impl InvoiceStatus {
    /// Status implied by `paid` against `total` (both in the invoice currency).
    pub fn derive(paid: &Money, total: &Money) -> DomainResult<Self> {
        if paid.is_zero() {
            Ok(InvoiceStatus::Pending)
        } else if paid.lt(total)? {
            Ok(InvoiceStatus::PartiallyPaid)
        } else {
            Ok(InvoiceStatus::Paid)
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "PENDING",
            InvoiceStatus::PartiallyPaid => "PARTIALLY_PAID",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Overdue => "OVERDUE",
        }
    }
}

impl core::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for InvoiceStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(InvoiceStatus::Pending),
            "PARTIALLY_PAID" => Ok(InvoiceStatus::PartiallyPaid),
            "PAID" => Ok(InvoiceStatus::Paid),
            "OVERDUE" => Ok(InvoiceStatus::Overdue),
            other => Err(DomainError::validation(format!("unknown invoice status '{other}'"))),
        }
    }
}

/// A payment applied to exactly one invoice. Immutable once created.
///
/// New payments only come into existence through [`Invoice::register_payment`];
/// [`Payment::restore`] exists for rehydrating persisted rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    id: PaymentId,
    invoice_id: InvoiceId,
    amount: Money,
    paid_at: DateTime<Utc>,
}

impl Payment {
    fn new(invoice_id: InvoiceId, amount: Money) -> Self {
        Self {
            id: PaymentId::new(),
            invoice_id,
            amount,
            paid_at: Utc::now(),
        }
    }

    pub fn restore(
        id: PaymentId,
        invoice_id: InvoiceId,
        amount: Money,
        paid_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            invoice_id,
            amount,
            paid_at,
        }
    }

    pub fn id_typed(&self) -> PaymentId {
        self.id
    }

    pub fn invoice_id(&self) -> InvoiceId {
        self.invoice_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn paid_at(&self) -> DateTime<Utc> {
        self.paid_at
    }
}

impl Entity for Payment {
    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Persisted parts of an invoice, used to rehydrate the aggregate.
#[derive(Debug, Clone)]
pub struct InvoiceParts {
    pub id: InvoiceId,
    pub student_id: StudentId,
    pub school_id: SchoolId,
    pub amount: Money,
    pub due_date: NaiveDate,
    pub issued_at: DateTime<Utc>,
    pub payments: Vec<Payment>,
    pub version: u64,
}

/// Totals re-derived from the full payment list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Settlement {
    paid: Money,
    due: Money,
    status: InvoiceStatus,
}

impl Settlement {
    fn compute(total: &Money, payments: &[Payment]) -> DomainResult<Self> {
        let paid = Money::sum(total.currency(), payments.iter().map(|p| &p.amount))?;
        if paid.amount() > total.amount() {
            return Err(DomainError::invariant(format!(
                "payments ({paid}) exceed invoice total ({total})"
            )));
        }
        let due = total.checked_sub(&paid)?;
        let status = InvoiceStatus::derive(&paid, total)?;
        Ok(Self { paid, due, status })
    }
}

/// Aggregate root: Invoice.
///
/// The only way to add a payment. Status and totals are always recomputed from the
/// complete payment list, so replaying the same payments yields the same state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    student_id: StudentId,
    school_id: SchoolId,
    amount: Money,
    due_date: NaiveDate,
    issued_at: DateTime<Utc>,
    payments: Vec<Payment>,
    settlement: Settlement,
    version: u64,
}

impl Invoice {
    /// Issue a new invoice: `Pending`, no payments, `issued_at = now`.
    pub fn issue(
        student_id: StudentId,
        school_id: SchoolId,
        amount: Money,
        due_date: NaiveDate,
    ) -> Self {
        let currency = amount.currency();
        Self {
            id: InvoiceId::new(),
            student_id,
            school_id,
            amount,
            due_date,
            issued_at: Utc::now(),
            payments: Vec::new(),
            settlement: Settlement {
                paid: Money::zero(currency),
                due: amount,
                status: InvoiceStatus::Pending,
            },
            version: 0,
        }
    }

    /// Rehydrate from persisted parts, re-deriving status from the payments.
    pub fn restore(parts: InvoiceParts) -> DomainResult<Self> {
        for p in &parts.payments {
            if p.invoice_id != parts.id {
                return Err(DomainError::invariant(format!(
                    "payment {} belongs to invoice {}, not {}",
                    p.id, p.invoice_id, parts.id
                )));
            }
            parts.amount.ensure_same_currency(&p.amount)?;
        }
        let settlement = Settlement::compute(&parts.amount, &parts.payments)?;

        Ok(Self {
            id: parts.id,
            student_id: parts.student_id,
            school_id: parts.school_id,
            amount: parts.amount,
            due_date: parts.due_date,
            issued_at: parts.issued_at,
            payments: parts.payments,
            settlement,
            version: parts.version,
        })
    }

    /// Apply a payment.
    ///
    /// Fails with `CurrencyMismatch` if the currency differs from the invoice,
    /// `Validation` for a zero amount, and `PaymentExceedsDueAmount` if it is larger
    /// than what is still due. On failure the invoice is left untouched.
    ///
    /// Rejecting a zero amount is a deliberate restriction: a recorded payment
    /// must move money.
    pub fn register_payment(&mut self, amount: Money) -> DomainResult<Payment> {
        self.amount.ensure_same_currency(&amount)?;

        if amount.is_zero() {
            return Err(DomainError::validation("payment amount must be positive"));
        }

        let due = self.settlement.due;
        if amount.amount() > due.amount() {
            return Err(DomainError::PaymentExceedsDueAmount {
                requested: amount.amount(),
                due: due.amount(),
            });
        }

        let payment = Payment::new(self.id, amount);
        let mut payments = self.payments.clone();
        payments.push(payment.clone());

        self.settlement = Settlement::compute(&self.amount, &payments)?;
        self.payments = payments;
        Ok(payment)
    }

    /// Record the revision assigned by a successful store write.
    pub fn mark_saved(&mut self, version: u64) {
        self.version = version;
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn student_id(&self) -> StudentId {
        self.student_id
    }

    pub fn school_id(&self) -> SchoolId {
        self.school_id
    }

    /// Total owed.
    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn due_date(&self) -> NaiveDate {
        self.due_date
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Stored status (never `Overdue`).
    pub fn status(&self) -> InvoiceStatus {
        self.settlement.status
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn amount_paid(&self) -> Money {
        self.settlement.paid
    }

    pub fn amount_due(&self) -> Money {
        self.settlement.due
    }

    /// Not fully paid and past its due date as of `today`.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status() != InvoiceStatus::Paid && self.due_date < today
    }

    /// Status as presented to readers: `Overdue` when [`Invoice::is_overdue`].
    pub fn effective_status(&self, today: NaiveDate) -> InvoiceStatus {
        if self.is_overdue(today) {
            InvoiceStatus::Overdue
        } else {
            self.status()
        }
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bursar_core::Currency;
    use chrono::Days;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn usd(amount: Decimal) -> Money {
        Money::new(amount, Currency::Usd).unwrap()
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    fn test_invoice(total: Decimal) -> Invoice {
        Invoice::issue(
            StudentId::new(),
            SchoolId::new(),
            usd(total),
            today() + Days::new(30),
        )
    }

    #[test]
    fn issue_starts_pending_with_nothing_paid() {
        let invoice = test_invoice(dec!(100.00));
        assert_eq!(invoice.status(), InvoiceStatus::Pending);
        assert_eq!(invoice.amount_due(), usd(dec!(100)));
        assert!(invoice.amount_paid().is_zero());
        assert!(invoice.payments().is_empty());
        assert_eq!(invoice.version(), 0);
    }

    #[test]
    fn partial_then_full_payment() {
        let mut invoice = test_invoice(dec!(100.00));

        let p1 = invoice.register_payment(usd(dec!(40))).unwrap();
        assert_eq!(p1.invoice_id(), invoice.id_typed());
        assert_eq!(invoice.status(), InvoiceStatus::PartiallyPaid);
        assert_eq!(invoice.amount_due(), usd(dec!(60)));

        invoice.register_payment(usd(dec!(60))).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Paid);
        assert_eq!(invoice.amount_paid(), invoice.amount());
        assert!(invoice.amount_due().is_zero());
        assert_eq!(invoice.payments().len(), 2);
    }

    #[test]
    fn cannot_overpay_invoice() {
        let mut invoice = test_invoice(dec!(100.00));
        invoice.register_payment(usd(dec!(100))).unwrap();

        let err = invoice.register_payment(usd(dec!(0.01))).unwrap_err();
        assert_eq!(
            err,
            DomainError::PaymentExceedsDueAmount {
                requested: dec!(0.01),
                due: dec!(0.00),
            }
        );
        assert_eq!(invoice.payments().len(), 1);
        assert_eq!(invoice.status(), InvoiceStatus::Paid);
    }

    #[test]
    fn currency_mismatch_never_appends() {
        let mut invoice = test_invoice(dec!(100.00));
        let eur = Money::new(dec!(10), Currency::Eur).unwrap();

        let err = invoice.register_payment(eur).unwrap_err();
        assert!(matches!(err, DomainError::CurrencyMismatch { .. }));
        assert!(invoice.payments().is_empty());
        assert_eq!(invoice.status(), InvoiceStatus::Pending);
    }

    #[test]
    fn zero_payment_is_rejected() {
        let mut invoice = test_invoice(dec!(100.00));
        let err = invoice.register_payment(usd(dec!(0))).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert!(invoice.payments().is_empty());
    }

    #[test]
    fn overdue_is_a_read_time_view() {
        let mut invoice = Invoice::issue(
            StudentId::new(),
            SchoolId::new(),
            usd(dec!(50)),
            today() - Days::new(1),
        );
        assert!(invoice.is_overdue(today()));
        assert_eq!(invoice.status(), InvoiceStatus::Pending);
        assert_eq!(invoice.effective_status(today()), InvoiceStatus::Overdue);

        invoice.register_payment(usd(dec!(50))).unwrap();
        assert!(!invoice.is_overdue(today()));
        assert_eq!(invoice.effective_status(today()), InvoiceStatus::Paid);
    }

    #[test]
    fn due_today_is_not_overdue() {
        let invoice = Invoice::issue(StudentId::new(), SchoolId::new(), usd(dec!(5)), today());
        assert!(!invoice.is_overdue(today()));
    }

    #[test]
    fn restore_rederives_status_and_rejects_inconsistent_parts() {
        let mut original = test_invoice(dec!(100.00));
        original.register_payment(usd(dec!(30))).unwrap();

        let parts = InvoiceParts {
            id: original.id_typed(),
            student_id: original.student_id(),
            school_id: original.school_id(),
            amount: original.amount(),
            due_date: original.due_date(),
            issued_at: original.issued_at(),
            payments: original.payments().to_vec(),
            version: 4,
        };
        let restored = Invoice::restore(parts.clone()).unwrap();
        assert_eq!(restored.status(), InvoiceStatus::PartiallyPaid);
        assert_eq!(restored.version(), 4);

        let mut foreign = parts.clone();
        foreign.payments.push(Payment::restore(
            PaymentId::new(),
            InvoiceId::new(),
            usd(dec!(1)),
            Utc::now(),
        ));
        assert!(matches!(
            Invoice::restore(foreign).unwrap_err(),
            DomainError::InvariantViolation(_)
        ));

        let mut overpaid = parts;
        overpaid.payments.push(Payment::restore(
            PaymentId::new(),
            original.id_typed(),
            usd(dec!(80)),
            Utc::now(),
        ));
        assert!(matches!(
            Invoice::restore(overpaid).unwrap_err(),
            DomainError::InvariantViolation(_)
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever payments are attempted, the paid total never exceeds
        /// the invoice total, rejected payments never append, and the observed status
        /// always equals the status re-derived from the full payment list.
        #[test]
        fn payments_never_overpay_and_status_is_derived(
            total_cents in 1i64..1_000_000,
            attempts in prop::collection::vec(0i64..600_000, 1..20)
        ) {
            let mut invoice = test_invoice(Decimal::new(total_cents, 2));

            for cents in attempts {
                let before = invoice.payments().len();
                let result = invoice.register_payment(usd(Decimal::new(cents, 2)));
                if result.is_err() {
                    prop_assert_eq!(invoice.payments().len(), before);
                }

                prop_assert!(invoice.amount_paid().le(&invoice.amount()).unwrap());

                let rederived = InvoiceStatus::derive(&invoice.amount_paid(), &invoice.amount()).unwrap();
                prop_assert_eq!(invoice.status(), rederived);

                let replayed = Invoice::restore(InvoiceParts {
                    id: invoice.id_typed(),
                    student_id: invoice.student_id(),
                    school_id: invoice.school_id(),
                    amount: invoice.amount(),
                    due_date: invoice.due_date(),
                    issued_at: invoice.issued_at(),
                    payments: invoice.payments().to_vec(),
                    version: 0,
                }).unwrap();
                prop_assert_eq!(replayed.status(), invoice.status());
            }
        }
    }
}
