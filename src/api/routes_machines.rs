//! Machine registry: CRUD, pre-delete check, and bulk display order.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use ulid::Ulid;

use super::response::{created, ok, ok_with_message, parse_id, ApiResult};
use super::AppState;
use crate::model::MachineInput;

pub(super) async fn handler_api_machines_list(State(state): State<Arc<AppState>>) -> ApiResult {
    ok(state.engine.list_machines().await)
}

pub(super) async fn handler_api_machine_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_id("machine", &id)?;
    ok(state.engine.get_machine(&id).await?)
}

pub(super) async fn handler_api_machines_create(
    State(state): State<Arc<AppState>>,
    body: Result<Json<MachineInput>, JsonRejection>,
) -> ApiResult {
    let Json(input) = body?;
    created(state.engine.create_machine(input).await?)
}

pub(super) async fn handler_api_machine_update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<MachineInput>, JsonRejection>,
) -> ApiResult {
    let id = parse_id("machine", &id)?;
    let Json(input) = body?;
    ok(state.engine.update_machine(&id, input).await?)
}

/// GET /api/machines/{id}/check-bookings: what a delete would take along.
pub(super) async fn handler_api_machine_check_bookings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_id("machine", &id)?;
    ok(state.engine.machine_bookings(&id).await?)
}

pub(super) async fn handler_api_machine_delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_id("machine", &id)?;
    let deleted = state.engine.delete_machine(&id).await?;
    ok_with_message(
        Some(json!({ "deletedBookings": deleted })),
        "Machine deleted successfully",
    )
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct MachineOrder {
    machine_id: Ulid,
    order: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ReorderPayload {
    machine_orders: Vec<MachineOrder>,
}

/// POST /api/machines/order: all listed machines or none.
pub(super) async fn handler_api_machines_order(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ReorderPayload>, JsonRejection>,
) -> ApiResult {
    let Json(payload) = body?;
    let orders = payload
        .machine_orders
        .into_iter()
        .map(|o| (o.machine_id, o.order))
        .collect();
    let updated = state.engine.reorder_machines(orders).await?;
    ok_with_message(Some(json!({ "updated": updated })), "Machine order updated")
}
