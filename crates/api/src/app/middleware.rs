//! Bearer-token gate for the billing routes.
//!
//! Reads stay public. Every other method needs a valid token whose role is
//! `admin`: a missing or invalid token answers 401, a valid token with another
//! role answers 403.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use bursar_auth::{require_role, JwtValidator, Principal, Role};

use crate::app::errors::json_error;

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
}

pub async fn admin_gate(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    if is_read(req.method()) {
        return next.run(req).await;
    }

    let Some(token) = extract_bearer(req.headers()) else {
        return unauthorized("missing bearer token");
    };
    let principal = match state.jwt.validate(token, Utc::now()) {
        Ok(claims) => Principal::from(claims),
        Err(e) => return unauthorized(&e.to_string()),
    };
    if let Err(e) = require_role(&principal, Role::Admin) {
        tracing::info!(subject = %principal.subject, role = %principal.role, "write refused");
        return json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    req.extensions_mut().insert(principal);
    next.run(req).await
}

fn is_read(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let token = headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")?
        .trim();
    (!token.is_empty()).then_some(token)
}

pub(crate) fn unauthorized(message: &str) -> Response {
    let mut resp = json_error(StatusCode::UNAUTHORIZED, "unauthorized", message);
    resp.headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_is_extracted_from_authorization() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(extract_bearer(&headers), Some("abc.def"));
    }

    #[test]
    fn unauthorized_answers_advertise_bearer() {
        let resp = unauthorized("missing bearer token");
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }
}
