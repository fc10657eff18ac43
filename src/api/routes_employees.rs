use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use std::sync::Arc;

use super::response::{created, ok, ok_with_message, parse_id, ApiResult};
use super::AppState;
use crate::model::EmployeeInput;

pub(super) async fn handler_api_employees_list(State(state): State<Arc<AppState>>) -> ApiResult {
    ok(state.engine.list_employees())
}

pub(super) async fn handler_api_employee_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_id("employee", &id)?;
    ok(state.engine.get_employee(&id)?)
}

pub(super) async fn handler_api_employees_create(
    State(state): State<Arc<AppState>>,
    body: Result<Json<EmployeeInput>, JsonRejection>,
) -> ApiResult {
    let Json(input) = body?;
    created(state.engine.create_employee(input).await?)
}

pub(super) async fn handler_api_employee_update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<EmployeeInput>, JsonRejection>,
) -> ApiResult {
    let id = parse_id("employee", &id)?;
    let Json(input) = body?;
    ok(state.engine.update_employee(&id, input).await?)
}

pub(super) async fn handler_api_employee_delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_id("employee", &id)?;
    state.engine.delete_employee(&id).await?;
    ok_with_message::<()>(None, "Employee deleted successfully")
}
