//! Statement aggregator: read-through, version-keyed statement cache.
//!
//! Read protocol for an owner with cache prefix `p`:
//!
//! 1. `v = get_version(p)` (0 on any cache failure)
//! 2. probe `p:statement:v<v>`; a hit that deserializes is returned as-is
//! 3. otherwise check the owner exists, recompute from the ledger, and store the
//!    result under the same key for [`STATEMENT_TTL`]
//!
//! Writers never delete cached statements: they bump the version, which makes
//! every older key unreachable.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use bursar_core::{DomainError, SchoolId, StudentId};
use bursar_invoicing::AccountStatement;

use crate::cache::{CacheService, statement_key};
use crate::error::HandlerResult;
use crate::ledger::StatementSource;

/// Lifetime of a cached statement.
pub const STATEMENT_TTL: Duration = Duration::from_secs(60);

/// Entity a statement is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementOwner {
    Student(StudentId),
    School(SchoolId),
}

impl StatementOwner {
    pub fn entity(&self) -> &'static str {
        match self {
            StatementOwner::Student(_) => "student",
            StatementOwner::School(_) => "school",
        }
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            StatementOwner::Student(id) => *id.as_uuid(),
            StatementOwner::School(id) => *id.as_uuid(),
        }
    }

    /// Cache prefix: `student:<uuid>` or `school:<uuid>`.
    pub fn prefix(&self) -> String {
        format!("{}:{}", self.entity(), self.uuid())
    }
}

impl fmt::Display for StatementOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity(), self.uuid())
    }
}

#[derive(Clone)]
pub struct StatementAggregator {
    source: Arc<dyn StatementSource>,
    cache: Arc<dyn CacheService>,
}

impl fmt::Debug for StatementAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementAggregator").finish_non_exhaustive()
    }
}

impl StatementAggregator {
    pub fn new(source: Arc<dyn StatementSource>, cache: Arc<dyn CacheService>) -> Self {
        Self { source, cache }
    }

    /// Account statement for `owner`; `NotFound` if the owner does not exist.
    #[instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn get_statement(&self, owner: StatementOwner) -> HandlerResult<AccountStatement> {
        let prefix = owner.prefix();
        let version = self.cache.get_version(&prefix).await;
        let key = statement_key(&prefix, version);

        if let Some(raw) = self.cache.get(&key).await {
            match serde_json::from_str::<AccountStatement>(&raw) {
                Ok(statement) => {
                    debug!(%key, "statement cache hit");
                    return Ok(statement);
                }
                Err(e) => debug!(%key, error = %e, "unreadable cached statement, recomputing"),
            }
        }

        if !self.source.owner_exists(owner).await? {
            return Err(DomainError::not_found(owner.entity(), owner.uuid()).into());
        }

        let rows = self.source.invoice_balances(owner).await?;
        let statement = AccountStatement::compute(owner.uuid(), &rows, Utc::now())?;

        match serde_json::to_string(&statement) {
            Ok(payload) => self.cache.set(&key, &payload, STATEMENT_TTL).await,
            Err(e) => warn!(%key, error = %e, "failed to serialize statement for caching"),
        }

        Ok(statement)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bursar_core::{Currency, InvoiceId, Money};
    use bursar_invoicing::{InvoiceBalance, InvoiceStatus, StatementCurrency};
    use rust_decimal_macros::dec;

    use super::*;
    use crate::cache::{InMemoryCacheBackend, VersionedCache};
    use crate::error::HandlerError;
    use crate::ledger::LedgerResult;
    use crate::resilience::CircuitBreakerConfig;

    /// Fixed rows for one known student, counting reads.
    struct FixedSource {
        student: StudentId,
        rows: std::sync::Mutex<Vec<InvoiceBalance>>,
        reads: AtomicUsize,
    }

    impl FixedSource {
        fn new(student: StudentId) -> Self {
            Self {
                student,
                rows: std::sync::Mutex::new(Vec::new()),
                reads: AtomicUsize::new(0),
            }
        }

        fn push(&self, total: rust_decimal::Decimal, paid: rust_decimal::Decimal) {
            let total = Money::new(total, Currency::Usd).unwrap();
            let paid = Money::new(paid, Currency::Usd).unwrap();
            self.rows.lock().unwrap().push(InvoiceBalance {
                invoice_id: InvoiceId::new(),
                amount_total: total,
                amount_paid: paid,
                status: InvoiceStatus::derive(&paid, &total).unwrap(),
                issued_at: Utc::now(),
                due_date: Utc::now().date_naive() + chrono::Days::new(30),
            });
        }
    }

    #[async_trait]
    impl StatementSource for FixedSource {
        async fn owner_exists(&self, owner: StatementOwner) -> LedgerResult<bool> {
            Ok(owner == StatementOwner::Student(self.student))
        }

        async fn invoice_balances(&self, _owner: StatementOwner) -> LedgerResult<Vec<InvoiceBalance>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.lock().unwrap().clone())
        }
    }

    fn setup() -> (Arc<FixedSource>, Arc<VersionedCache<InMemoryCacheBackend>>, StatementAggregator, StudentId) {
        let student = StudentId::new();
        let source = Arc::new(FixedSource::new(student));
        let cache = Arc::new(VersionedCache::new(
            InMemoryCacheBackend::new(),
            CircuitBreakerConfig::default(),
            Duration::from_secs(3600),
        ));
        let aggregator = StatementAggregator::new(source.clone(), cache.clone());
        (source, cache, aggregator, student)
    }

    #[tokio::test]
    async fn second_read_is_served_from_cache() {
        let (source, _cache, aggregator, student) = setup();
        source.push(dec!(100), dec!(40));
        let owner = StatementOwner::Student(student);

        let first = aggregator.get_statement(owner).await.unwrap();
        let second = aggregator.get_statement(owner).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.total_due, Some(dec!(60.00)));
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn version_bump_forces_recompute() {
        let (source, cache, aggregator, student) = setup();
        source.push(dec!(100), dec!(0));
        let owner = StatementOwner::Student(student);

        let before = aggregator.get_statement(owner).await.unwrap();
        assert_eq!(before.total_due, Some(dec!(100.00)));

        source.push(dec!(50), dec!(0));
        // Without a bump the stale statement is still served.
        let stale = aggregator.get_statement(owner).await.unwrap();
        assert_eq!(stale.total_due, Some(dec!(100.00)));

        cache.increment_version(&owner.prefix()).await;
        let fresh = aggregator.get_statement(owner).await.unwrap();
        assert_eq!(fresh.total_due, Some(dec!(150.00)));
        assert_eq!(fresh.currency, Some(StatementCurrency::Single(Currency::Usd)));
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unreadable_cache_entry_is_a_miss() {
        let (source, cache, aggregator, student) = setup();
        source.push(dec!(10), dec!(0));
        let owner = StatementOwner::Student(student);

        cache
            .set(&statement_key(&owner.prefix(), 0), "{not json", STATEMENT_TTL)
            .await;
        let statement = aggregator.get_statement(owner).await.unwrap();
        assert_eq!(statement.total_due, Some(dec!(10.00)));
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);

        // The recomputed statement replaced the garbage.
        aggregator.get_statement(owner).await.unwrap();
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_owner_is_not_found() {
        let (_source, _cache, aggregator, _student) = setup();
        let err = aggregator
            .get_statement(StatementOwner::School(SchoolId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Domain(DomainError::NotFound { entity: "school", .. })));
    }

    #[test]
    fn prefixes_match_key_format() {
        let id = StudentId::new();
        assert_eq!(StatementOwner::Student(id).prefix(), format!("student:{id}"));
        let id = SchoolId::new();
        assert_eq!(StatementOwner::School(id).prefix(), format!("school:{id}"));
    }
}
