use std::sync::Arc;

use axum::{extract::Extension, Form, Json};
use axum::response::IntoResponse;
use chrono::Utc;

use bursar_auth::AuthError;

use crate::app::middleware::unauthorized;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// `POST /token`: exchange form-encoded credentials for a bearer token.
pub async fn issue_token(
    Extension(services): Extension<Arc<AppServices>>,
    Form(body): Form<dto::TokenRequest>,
) -> axum::response::Response {
    let user = match services.auth.users.authenticate(&body.username, &body.password) {
        Ok(user) => user,
        Err(AuthError::InvalidCredentials) => return unauthorized("incorrect username or password"),
        Err(e) => {
            tracing::error!(error = %e, "credential check failed");
            return errors::json_error(
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal server error",
            );
        }
    };

    match services.auth.tokens.issue(user.email(), user.role(), Utc::now()) {
        Ok(access_token) => {
            tracing::info!(user = %user.email(), role = %user.role(), "token issued");
            Json(dto::TokenResponse {
                access_token,
                token_type: "bearer",
                expires_in: services.auth.tokens.ttl().num_seconds(),
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "token signing failed");
            errors::json_error(
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal server error",
            )
        }
    }
}
