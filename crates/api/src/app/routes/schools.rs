use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};

use bursar_core::SchoolId;

use crate::app::routes::page;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_schools).post(create_school))
        .route("/:id", patch(rename_school).delete(delete_school))
        .route("/:id/statement", get(school_statement))
        .route("/:id/account-statement", get(school_statement))
}

pub async fn create_school(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::NameRequest>,
) -> axum::response::Response {
    match services.commands.create_school(&body.name).await {
        Ok(school) => (StatusCode::CREATED, Json(dto::SchoolResponse::from(&school))).into_response(),
        Err(e) => errors::handler_error_to_response(e),
    }
}

pub async fn list_schools(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListQuery>,
) -> axum::response::Response {
    let page = match page(&query) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match services.queries.list_schools(page).await {
        Ok(schools) => Json(schools.map(|s| dto::SchoolResponse::from(&s))).into_response(),
        Err(e) => errors::handler_error_to_response(e),
    }
}

pub async fn rename_school(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::NameRequest>,
) -> axum::response::Response {
    let id: SchoolId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.commands.rename_school(id, &body.name).await {
        Ok(school) => Json(dto::SchoolResponse::from(&school)).into_response(),
        Err(e) => errors::handler_error_to_response(e),
    }
}

pub async fn delete_school(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: SchoolId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.commands.delete_school(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::handler_error_to_response(e),
    }
}

pub async fn school_statement(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: SchoolId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.queries.school_statement(id).await {
        Ok(statement) => Json(statement).into_response(),
        Err(e) => errors::handler_error_to_response(e),
    }
}
