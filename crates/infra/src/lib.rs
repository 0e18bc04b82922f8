//! Infrastructure layer: configuration, resilience, cache, ledger stores and the
//! application handlers that tie them together.

pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod resilience;
pub mod statements;

#[cfg(test)]
mod integration_tests;

pub use error::{HandlerError, HandlerResult};
pub use handlers::{CommandHandlers, QueryHandlers};
