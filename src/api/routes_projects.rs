//! Projects: CRUD, pre-delete check, class-project inspections.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::response::{created, ok, ok_with_message, parse_id, ApiResult};
use super::AppState;
use crate::model::ProjectInput;

pub(super) async fn handler_api_projects_list(State(state): State<Arc<AppState>>) -> ApiResult {
    ok(state.engine.list_projects())
}

pub(super) async fn handler_api_project_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_id("project", &id)?;
    ok(state.engine.get_project(&id)?)
}

pub(super) async fn handler_api_projects_create(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ProjectInput>, JsonRejection>,
) -> ApiResult {
    let Json(input) = body?;
    created(state.engine.create_project(input).await?)
}

pub(super) async fn handler_api_project_update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<ProjectInput>, JsonRejection>,
) -> ApiResult {
    let id = parse_id("project", &id)?;
    let Json(input) = body?;
    ok(state.engine.update_project(&id, input).await?)
}

pub(super) async fn handler_api_project_check_bookings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_id("project", &id)?;
    ok(state.engine.project_bookings(&id).await?)
}

/// DELETE /api/projects/{id}: cascades or refuses depending on the
/// configured policy.
pub(super) async fn handler_api_project_delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_id("project", &id)?;
    let deleted = state.engine.delete_project(&id).await?;
    ok_with_message(
        Some(json!({ "deletedBookings": deleted })),
        "Project deleted successfully",
    )
}

#[derive(Deserialize)]
pub(super) struct CompletedPayload {
    completed: bool,
}

pub(super) async fn handler_api_project_inspection_completed(
    State(state): State<Arc<AppState>>,
    Path((id, key)): Path<(String, String)>,
    body: Result<Json<CompletedPayload>, JsonRejection>,
) -> ApiResult {
    let id = parse_id("project", &id)?;
    let Json(payload) = body?;
    ok(state
        .engine
        .set_inspection_completed(&id, &key, payload.completed)
        .await?)
}
