//! Application handlers: the write path (`CommandHandlers`) and the read path
//! (`QueryHandlers`), each a plain struct over injected collaborators.

mod commands;
mod queries;

pub use commands::CommandHandlers;
pub use queries::QueryHandlers;

use std::sync::Arc;

use crate::cache::CacheService;
use crate::ledger::Ledger;
use crate::statements::StatementAggregator;

/// Default number of attempts `register_payment` makes before surfacing a conflict.
pub const DEFAULT_PAYMENT_RETRY_ATTEMPTS: u32 = 5;

/// Build both handler sets over the same ledger and cache.
pub fn build(
    ledger: Ledger,
    cache: Arc<dyn CacheService>,
    payment_retry_attempts: u32,
) -> (CommandHandlers, QueryHandlers) {
    let statements = StatementAggregator::new(ledger.statements.clone(), cache.clone());
    (
        CommandHandlers::new(ledger.clone(), cache, payment_retry_attempts),
        QueryHandlers::new(ledger, statements),
    )
}
