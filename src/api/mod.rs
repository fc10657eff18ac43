//! # HTTP API
//!
//! JSON over HTTP under `/api`, one envelope for every answer:
//! `{ "success": bool, "data"?: ..., "message"?: string }`.
//!
//! | Prefix | Module |
//! |--------|--------|
//! | `/api/machines` | [`routes_machines`] |
//! | `/api/employees` | [`routes_employees`] |
//! | `/api/projects` | [`routes_projects`] |
//! | `/api/bookings` | [`routes_bookings`] |
//! | `/api/health` | [`routes_health`] |
//!
//! Handlers parse ids and bodies, call the [`Engine`], and map
//! [`EngineError`](crate::engine::EngineError) through [`ApiError`].

mod response;
mod routes_bookings;
mod routes_employees;
mod routes_health;
mod routes_machines;
mod routes_projects;

pub use response::{ApiError, Envelope};

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use crate::limits::MAX_REQUEST_BODY_BYTES;

pub struct AppState {
    pub engine: Arc<Engine>,
}

pub fn build_router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/api/health", get(routes_health::handler_api_health))
        // Machines
        .route(
            "/api/machines",
            get(routes_machines::handler_api_machines_list)
                .post(routes_machines::handler_api_machines_create),
        )
        .route(
            "/api/machines/order",
            post(routes_machines::handler_api_machines_order),
        )
        .route(
            "/api/machines/{id}",
            get(routes_machines::handler_api_machine_get)
                .put(routes_machines::handler_api_machine_update)
                .delete(routes_machines::handler_api_machine_delete),
        )
        .route(
            "/api/machines/{id}/check-bookings",
            get(routes_machines::handler_api_machine_check_bookings),
        )
        // Employees
        .route(
            "/api/employees",
            get(routes_employees::handler_api_employees_list)
                .post(routes_employees::handler_api_employees_create),
        )
        .route(
            "/api/employees/{id}",
            get(routes_employees::handler_api_employee_get)
                .put(routes_employees::handler_api_employee_update)
                .delete(routes_employees::handler_api_employee_delete),
        )
        // Projects
        .route(
            "/api/projects",
            get(routes_projects::handler_api_projects_list)
                .post(routes_projects::handler_api_projects_create),
        )
        .route(
            "/api/projects/{id}",
            get(routes_projects::handler_api_project_get)
                .put(routes_projects::handler_api_project_update)
                .delete(routes_projects::handler_api_project_delete),
        )
        .route(
            "/api/projects/{id}/check-bookings",
            get(routes_projects::handler_api_project_check_bookings),
        )
        .route(
            "/api/projects/{id}/inspections/{key}/completed",
            put(routes_projects::handler_api_project_inspection_completed),
        )
        // Bookings
        .route(
            "/api/bookings",
            get(routes_bookings::handler_api_bookings_list)
                .post(routes_bookings::handler_api_bookings_create),
        )
        .route(
            "/api/bookings/update-machine-statuses",
            post(routes_bookings::handler_api_update_machine_statuses),
        )
        .route(
            "/api/bookings/{id}",
            get(routes_bookings::handler_api_booking_get)
                .put(routes_bookings::handler_api_booking_update)
                .delete(routes_bookings::handler_api_booking_delete),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .with_state(state)
}
