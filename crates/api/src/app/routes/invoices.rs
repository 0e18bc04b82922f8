use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use bursar_core::{InvoiceId, Money, StudentId};

use crate::app::routes::page;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(issue_invoice).get(list_invoices))
        .route("/:id", get(get_invoice).delete(delete_invoice))
        .route("/:id/payments", post(register_invoice_payment))
}

pub async fn issue_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::IssueInvoiceRequest>,
) -> axum::response::Response {
    let student_id: StudentId = match errors::parse_id(&body.student_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let amount = match body
        .amount
        .to_decimal()
        .and_then(|amount| Money::new(amount, body.currency))
    {
        Ok(m) => m,
        Err(e) => return errors::handler_error_to_response(e.into()),
    };

    match services
        .commands
        .create_invoice(student_id, amount, body.due_date)
        .await
    {
        Ok(invoice) => {
            (StatusCode::CREATED, Json(dto::InvoiceResponse::from(&invoice))).into_response()
        }
        Err(e) => errors::handler_error_to_response(e),
    }
}

pub async fn list_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListQuery>,
) -> axum::response::Response {
    let page = match page(&query) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let student_id: Option<StudentId> =
        match query.student_id.as_deref().map(errors::parse_id::<StudentId>).transpose() {
            Ok(v) => v,
            Err(resp) => return resp,
        };
    match services.queries.list_invoices(student_id, page).await {
        Ok(invoices) => Json(invoices.map(|i| dto::InvoiceResponse::from(&i))).into_response(),
        Err(e) => errors::handler_error_to_response(e),
    }
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: InvoiceId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.queries.get_invoice(id).await {
        Ok(invoice) => Json(dto::InvoiceResponse::from(&invoice)).into_response(),
        Err(e) => errors::handler_error_to_response(e),
    }
}

pub async fn delete_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: InvoiceId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.commands.delete_invoice(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::handler_error_to_response(e),
    }
}

pub async fn register_invoice_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::RegisterPaymentRequest>,
) -> axum::response::Response {
    register_payment(&services, &id, body).await
}

/// `POST /payments`: the invoice is named in the body instead of the path.
pub async fn process_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::ProcessPaymentRequest>,
) -> axum::response::Response {
    let dto::ProcessPaymentRequest {
        invoice_id,
        amount,
        currency,
    } = body;
    register_payment(
        &services,
        &invoice_id,
        dto::RegisterPaymentRequest { amount, currency },
    )
    .await
}

async fn register_payment(
    services: &AppServices,
    invoice_id: &str,
    body: dto::RegisterPaymentRequest,
) -> axum::response::Response {
    let id: InvoiceId = match errors::parse_id(invoice_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let amount = match body.amount.to_decimal() {
        Ok(a) => a,
        Err(e) => return errors::handler_error_to_response(e.into()),
    };

    match services.commands.register_payment(id, amount, body.currency).await {
        Ok((invoice, payment)) => (
            StatusCode::CREATED,
            Json(dto::PaymentReceipt {
                payment: dto::PaymentResponse::from(&payment),
                invoice: dto::InvoiceResponse::from(&invoice),
            }),
        )
            .into_response(),
        Err(e) => errors::handler_error_to_response(e),
    }
}
