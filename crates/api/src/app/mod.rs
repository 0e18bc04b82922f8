//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring (ledger, cache, handlers, auth)
//! - `middleware.rs`: bearer-token gate in front of billing writes
//! - `routes/`: HTTP routes + handlers (one file per resource)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use tower::ServiceBuilder;

use bursar_infra::config::Settings;

pub mod dto;
pub mod errors;
pub mod middleware;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(settings: &Settings) -> anyhow::Result<Router> {
    let services = services::build_services(settings).await?;
    Ok(router(services))
}

/// Router over already-wired services.
pub fn router(services: services::AppServices) -> Router {
    let auth_state = middleware::AuthState {
        jwt: services.auth.tokens.clone(),
    };

    // Billing routes: reads are public, writes need an admin token.
    let billing = routes::router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::admin_gate,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/token", post(routes::auth::issue_token))
        .merge(billing)
        .layer(ServiceBuilder::new().layer(Extension(Arc::new(services))))
}
