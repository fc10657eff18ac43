//! Booking lifecycle endpoints plus the on-demand status reconcile.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use std::sync::Arc;

use super::response::{created, ok, ok_with_message, ApiResult};
use super::AppState;
use crate::model::BookingInput;

pub(super) async fn handler_api_bookings_list(State(state): State<Arc<AppState>>) -> ApiResult {
    ok(state.engine.list_bookings().await)
}

pub(super) async fn handler_api_booking_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    ok(state.engine.get_booking(&id).await?)
}

pub(super) async fn handler_api_bookings_create(
    State(state): State<Arc<AppState>>,
    body: Result<Json<BookingInput>, JsonRejection>,
) -> ApiResult {
    let Json(input) = body?;
    created(state.engine.create_booking(input).await?)
}

pub(super) async fn handler_api_booking_update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<BookingInput>, JsonRejection>,
) -> ApiResult {
    let Json(patch) = body?;
    ok(state.engine.update_booking(&id, patch).await?)
}

pub(super) async fn handler_api_booking_delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    state.engine.delete_booking(&id).await?;
    ok_with_message::<()>(None, "Booking deleted successfully")
}

/// POST /api/bookings/update-machine-statuses: run a full pass now.
/// Waits for a scheduled pass already in flight rather than skipping.
pub(super) async fn handler_api_update_machine_statuses(State(state): State<Arc<AppState>>) -> ApiResult {
    let report = state.engine.reconcile_all().await;
    let message = format!("Updated {} machine status(es)", report.changes.len());
    ok_with_message(Some(report), message)
}
