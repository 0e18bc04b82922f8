use core::str::FromStr;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use bursar_core::{DomainError, ErrorKind};
use bursar_infra::HandlerError;
use bursar_infra::ledger::LedgerError;

pub fn handler_error_to_response(err: HandlerError) -> axum::response::Response {
    let status = match err.kind() {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::BusinessRule => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Infrastructure => {
            tracing::error!(error = %err, "request failed");
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal server error",
            );
        }
    };
    json_error(status, error_code(&err), err.to_string())
}

fn error_code(err: &HandlerError) -> &'static str {
    let domain = match err {
        HandlerError::Domain(e) | HandlerError::Ledger(LedgerError::Rejected(e)) => e,
        HandlerError::Ledger(LedgerError::Conflict(_)) => return "conflict",
        HandlerError::Ledger(_) => return "internal_error",
    };
    match domain {
        DomainError::Validation(_) => "validation_error",
        DomainError::InvalidAmount(_) => "invalid_amount",
        DomainError::CurrencyMismatch { .. } => "currency_mismatch",
        DomainError::InvalidId(_) => "invalid_id",
        DomainError::PaymentExceedsDueAmount { .. } => "payment_exceeds_due_amount",
        DomainError::InvalidStateTransition(_) => "invalid_state_transition",
        DomainError::OperationNotAllowed(_) => "operation_not_allowed",
        DomainError::InvariantViolation(_) => "invariant_violation",
        DomainError::NotFound { .. } => "not_found",
        DomainError::Conflict(_) => "conflict",
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path or query id, answering 400 on failure.
pub fn parse_id<T>(raw: &str) -> Result<T, axum::response::Response>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse()
        .map_err(|e: DomainError| json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_kind() {
        let cases: Vec<(HandlerError, StatusCode)> = vec![
            (DomainError::validation("blank").into(), StatusCode::BAD_REQUEST),
            (DomainError::not_found("school", "x").into(), StatusCode::NOT_FOUND),
            (
                DomainError::not_allowed("has students").into(),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (LedgerError::Conflict("stale".into()).into(), StatusCode::CONFLICT),
            (
                LedgerError::Backend("pool closed".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(handler_error_to_response(err).status(), status);
        }
    }

    #[test]
    fn rejected_writes_use_the_domain_code() {
        let err: HandlerError = LedgerError::Rejected(DomainError::not_allowed("x")).into();
        assert_eq!(error_code(&err), "operation_not_allowed");
    }
}
