//! Invoicing domain module.
//!
//! Invoices, the payments registered against them, and account statements.
//! Pure domain logic: no IO, no HTTP, no storage.

pub mod invoice;
pub mod statement;

pub use invoice::{Invoice, InvoiceParts, InvoiceStatus, Payment};
pub use statement::{
    AccountStatement, CurrencyTotal, InvoiceBalance, StatementCurrency, StatementLine,
};
