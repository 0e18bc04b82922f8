use axum::{routing::post, Router};

use bursar_infra::ledger::Page;

use crate::app::{dto, errors};

pub mod auth;
pub mod invoices;
pub mod schools;
pub mod students;
pub mod system;

/// Router for all billing endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/schools", schools::router())
        .nest("/students", students::router())
        .nest("/invoices", invoices::router())
        .route("/payments", post(invoices::process_payment))
}

/// Page window from `limit`/`offset` query parameters; out-of-range limits answer 400.
pub(crate) fn page(query: &dto::ListQuery) -> Result<Page, axum::response::Response> {
    Page::new(query.limit, query.offset).map_err(|e| errors::handler_error_to_response(e.into()))
}
