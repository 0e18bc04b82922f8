use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};

use bursar_core::{SchoolId, StudentId};

use crate::app::routes::page;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_students).post(enroll_student))
        .route("/:id", patch(rename_student).delete(delete_student))
        .route("/:id/statement", get(student_statement))
        .route("/:id/account-statement", get(student_statement))
}

pub async fn enroll_student(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::EnrollStudentRequest>,
) -> axum::response::Response {
    let school_id: SchoolId = match errors::parse_id(&body.school_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.commands.enroll_student(&body.name, school_id).await {
        Ok(student) => {
            (StatusCode::CREATED, Json(dto::StudentResponse::from(&student))).into_response()
        }
        Err(e) => errors::handler_error_to_response(e),
    }
}

pub async fn list_students(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListQuery>,
) -> axum::response::Response {
    let page = match page(&query) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let school_id: Option<SchoolId> = match query.school_id.as_deref().map(errors::parse_id::<SchoolId>).transpose() {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.queries.list_students(school_id, page).await {
        Ok(students) => Json(students.map(|s| dto::StudentResponse::from(&s))).into_response(),
        Err(e) => errors::handler_error_to_response(e),
    }
}

pub async fn rename_student(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::NameRequest>,
) -> axum::response::Response {
    let id: StudentId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.commands.rename_student(id, &body.name).await {
        Ok(student) => Json(dto::StudentResponse::from(&student)).into_response(),
        Err(e) => errors::handler_error_to_response(e),
    }
}

pub async fn delete_student(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: StudentId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.commands.delete_student(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::handler_error_to_response(e),
    }
}

pub async fn student_statement(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: StudentId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.queries.student_statement(id).await {
        Ok(statement) => Json(statement).into_response(),
        Err(e) => errors::handler_error_to_response(e),
    }
}
