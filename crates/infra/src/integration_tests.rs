//! Integration tests for the full billing pipeline.
//!
//! Tests: Command → Ledger → Version bump → Statement (cache miss/hit)
//!
//! Verifies:
//! - Statements track payments exactly, through the cache
//! - A dead cache never changes an answer, it only trips the breaker
//! - Concurrent payments on one invoice can never overpay it

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use bursar_core::{Currency, DomainError, ErrorKind, Money};
    use bursar_invoicing::{InvoiceStatus, StatementCurrency};

    use crate::cache::versioned::test_support::UnreachableCacheBackend;
    use crate::cache::{CacheService, InMemoryCacheBackend, VersionedCache};
    use crate::error::HandlerError;
    use crate::handlers::{CommandHandlers, QueryHandlers, build};
    use crate::ledger::{InMemoryLedger, Ledger};
    use crate::resilience::{CircuitBreakerConfig, CircuitState};

    fn test_breaker() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
        }
    }

    fn test_due_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2031, 9, 1).unwrap()
    }

    fn setup_with(cache: Arc<dyn CacheService>) -> (CommandHandlers, QueryHandlers) {
        build(Ledger::from_store(Arc::new(InMemoryLedger::new())), cache, 5)
    }

    fn setup() -> (CommandHandlers, QueryHandlers) {
        setup_with(Arc::new(VersionedCache::new(
            InMemoryCacheBackend::new(),
            test_breaker(),
            Duration::from_secs(3600),
        )))
    }

    fn usd(amount: Decimal) -> Money {
        Money::new(amount, Currency::Usd).unwrap()
    }

    #[tokio::test]
    async fn pay_in_full_then_reject_overpayment() {
        let (commands, queries) = setup();
        let school = commands.create_school("Riverside").await.unwrap();
        let student = commands.enroll_student("Ada", school.id_typed()).await.unwrap();
        let invoice = commands
            .create_invoice(student.id_typed(), usd(dec!(100)), test_due_date())
            .await
            .unwrap();

        let statement = queries.student_statement(student.id_typed()).await.unwrap();
        assert_eq!(statement.total_due, Some(dec!(100.00)));
        assert_eq!(statement.invoices[0].status, InvoiceStatus::Pending);

        let (after_first, _) = commands
            .register_payment(invoice.id_typed(), dec!(40), None)
            .await
            .unwrap();
        assert_eq!(after_first.status(), InvoiceStatus::PartiallyPaid);
        let statement = queries.student_statement(student.id_typed()).await.unwrap();
        assert_eq!(statement.total_due, Some(dec!(60.00)));
        assert_eq!(statement.invoices[0].amount_paid, dec!(40.00));

        let (after_second, _) = commands
            .register_payment(invoice.id_typed(), dec!(60), None)
            .await
            .unwrap();
        assert_eq!(after_second.status(), InvoiceStatus::Paid);
        assert!(after_second.amount_due().is_zero());

        let err = commands
            .register_payment(invoice.id_typed(), dec!(0.01), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HandlerError::Domain(DomainError::PaymentExceedsDueAmount { .. })
        ));
        assert_eq!(err.kind(), ErrorKind::BusinessRule);

        let statement = queries.student_statement(student.id_typed()).await.unwrap();
        assert_eq!(statement.total_due, Some(dec!(0.00)));
        assert_eq!(statement.invoices[0].status, InvoiceStatus::Paid);
        assert_eq!(
            statement.currency,
            Some(StatementCurrency::Single(Currency::Usd))
        );

        let school_statement = queries.school_statement(school.id_typed()).await.unwrap();
        assert_eq!(school_statement.entity_id, *school.id_typed().as_uuid());
        assert_eq!(school_statement.invoices, statement.invoices);
        assert_eq!(school_statement.total_due, statement.total_due);
    }

    #[tokio::test]
    async fn statement_is_refreshed_after_payment() {
        let (commands, queries) = setup();
        let school = commands.create_school("Hillcrest").await.unwrap();
        let student = commands.enroll_student("Bo", school.id_typed()).await.unwrap();
        let invoice = commands
            .create_invoice(student.id_typed(), usd(dec!(80)), test_due_date())
            .await
            .unwrap();

        // Two reads at the same version: the second is a cache hit.
        let first = queries.school_statement(school.id_typed()).await.unwrap();
        let cached = queries.school_statement(school.id_typed()).await.unwrap();
        assert_eq!(first, cached);
        assert_eq!(cached.total_due, Some(dec!(80.00)));

        commands
            .register_payment(invoice.id_typed(), dec!(30), None)
            .await
            .unwrap();
        let fresh = queries.school_statement(school.id_typed()).await.unwrap();
        assert_eq!(fresh.total_due, Some(dec!(50.00)));
        assert!(fresh.generated_at >= cached.generated_at);

        commands.delete_invoice(invoice.id_typed()).await.unwrap();
        let emptied = queries.school_statement(school.id_typed()).await.unwrap();
        assert!(emptied.invoices.is_empty());
        assert_eq!(emptied.total_due, Some(Decimal::ZERO));
        assert_eq!(emptied.currency, None);
    }

    #[tokio::test]
    async fn unreachable_cache_never_changes_answers() {
        let backend = Arc::new(UnreachableCacheBackend::default());
        let cache = Arc::new(VersionedCache::new(
            backend.clone(),
            test_breaker(),
            Duration::from_secs(3600),
        ));
        let (commands, queries) = setup_with(cache.clone());

        let school = commands.create_school("Lakeside").await.unwrap();
        let student = commands.enroll_student("Cy", school.id_typed()).await.unwrap();
        let invoice = commands
            .create_invoice(student.id_typed(), usd(dec!(100)), test_due_date())
            .await
            .unwrap();
        assert_eq!(cache.breaker().state(), CircuitState::Open);
        let calls_when_opened = backend.calls();

        for (payment, expected_due) in [(dec!(25), dec!(75.00)), (dec!(75), dec!(0.00))] {
            commands
                .register_payment(invoice.id_typed(), payment, None)
                .await
                .unwrap();
            let statement = queries.student_statement(student.id_typed()).await.unwrap();
            assert_eq!(statement.total_due, Some(expected_due));
        }

        // While open, nothing reaches the backend.
        assert_eq!(backend.calls(), calls_when_opened);
    }

    #[tokio::test]
    async fn mixed_currencies_are_never_summed() {
        let (commands, queries) = setup();
        let school = commands.create_school("Westfield").await.unwrap();
        let student = commands.enroll_student("Di", school.id_typed()).await.unwrap();
        commands
            .create_invoice(student.id_typed(), usd(dec!(10)), test_due_date())
            .await
            .unwrap();
        commands
            .create_invoice(
                student.id_typed(),
                Money::new(dec!(20), Currency::Eur).unwrap(),
                test_due_date(),
            )
            .await
            .unwrap();

        let statement = queries.student_statement(student.id_typed()).await.unwrap();
        assert_eq!(statement.total_due, None);
        assert_eq!(statement.currency, Some(StatementCurrency::Mixed));
        assert_eq!(statement.totals_by_currency.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_payments_never_overpay() {
        let (commands, queries) = setup();
        let school = commands.create_school("Eastgate").await.unwrap();
        let student = commands.enroll_student("Ed", school.id_typed()).await.unwrap();
        let invoice = commands
            .create_invoice(student.id_typed(), usd(dec!(100)), test_due_date())
            .await
            .unwrap();

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let commands = commands.clone();
                let id = invoice.id_typed();
                tokio::spawn(async move { commands.register_payment(id, dec!(10), None).await })
            })
            .collect();

        let mut accepted = 0u32;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(e) => assert!(
                    matches!(e.kind(), ErrorKind::BusinessRule | ErrorKind::Conflict),
                    "unexpected error: {e}"
                ),
            }
        }

        let stored = queries.get_invoice(invoice.id_typed()).await.unwrap();
        assert!(accepted <= 10);
        assert_eq!(stored.payments().len(), accepted as usize);
        assert_eq!(stored.amount_paid(), usd(Decimal::from(accepted * 10)));
        assert!(stored.amount_paid().le(&stored.amount()).unwrap());
    }
}
