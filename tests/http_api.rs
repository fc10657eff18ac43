//! HTTP tests for the `/api` router.
//!
//! Requests go through `tower::ServiceExt::oneshot` against the router with
//! no TCP listener. Every test gets its own engine on a fresh WAL file and a
//! manual clock, so machine status is deterministic.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use shopfloor::api::{build_router, AppState};
use shopfloor::clock::ManualClock;
use shopfloor::engine::Engine;
use shopfloor::model::{Ms, ProjectDeletePolicy};

const H: Ms = 3_600_000;
const DAY: Ms = 1_767_225_600_000; // 2026-01-01T00:00:00Z

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("shopfloor_test_http");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn app_with(name: &str, policy: ProjectDeletePolicy) -> (Router, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(DAY));
    let engine = Engine::new(test_wal_path(name), clock.clone())
        .unwrap()
        .with_project_delete_policy(policy);
    let state = Arc::new(AppState {
        engine: Arc::new(engine),
    });
    (build_router(state, Duration::from_secs(30)), clock)
}

fn app(name: &str) -> (Router, Arc<ManualClock>) {
    app_with(name, ProjectDeletePolicy::Cascade)
}

/// Send a request and return the status code and parsed JSON body.
async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().uri(uri).method(method);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(json!(null));
    (status, json)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, "GET", uri, None).await
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, "POST", uri, Some(body)).await
}

async fn put_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, "PUT", uri, Some(body)).await
}

async fn delete(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, "DELETE", uri, None).await
}

async fn create_machine(app: &Router, name: &str) -> Value {
    let (status, json) = post_json(app, "/api/machines", json!({ "name": name })).await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    json["data"].clone()
}

async fn create_project(app: &Router, name: &str) -> Value {
    let (status, json) = post_json(
        app,
        "/api/projects",
        json!({
            "name": name,
            "customer": "Nordic Steel",
            "startDate": DAY,
            "deadline": DAY + 14 * 24 * H,
            "price": 4200.0,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    json["data"].clone()
}

fn booking_body(id: &str, machine: &Value, project: &Value, start: Ms, end: Ms) -> Value {
    json!({
        "bookingId": id,
        "startTime": start,
        "endTime": end,
        "machineId": machine["id"],
        "projectId": project["id"],
    })
}

// == Envelope and health =====================================================

#[tokio::test]
async fn health_returns_envelope() {
    let (app, _) = app("health.wal");
    let (status, json) = get(&app, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["status"], "ok");
    assert!(json.get("message").is_none());
}

#[tokio::test]
async fn malformed_json_is_400_envelope() {
    let (app, _) = app("malformed.wal");
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/machines")
                .method("POST")
                .header("content-type", "application/json")
                .body(Body::from("{ not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["success"], false);
    assert!(json["message"].is_string());
}

#[tokio::test]
async fn malformed_body_fields_are_400() {
    let (app, _) = app("bad_body_fields.wal");
    let machine = create_machine(&app, "Lathe").await;
    let project = create_project(&app, "Gearbox").await;

    let mut bad_machine_id = booking_body("B-1", &machine, &project, DAY, DAY + H);
    bad_machine_id["machineId"] = json!("not-a-ulid");
    let (status, json) = post_json(&app, "/api/bookings", bad_machine_id).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{json}");
    assert_eq!(json["success"], false);
    assert!(json["message"].as_str().unwrap().contains("machineId"));

    let mut bad_start = booking_body("B-2", &machine, &project, DAY, DAY + H);
    bad_start["startTime"] = json!("yesterday");
    let (status, json) = post_json(&app, "/api/bookings", bad_start).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{json}");
    assert_eq!(json["success"], false);

    let (status, _) = get(&app, "/api/bookings").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn missing_content_type_is_400() {
    let (app, _) = app("no_content_type.wal");
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/machines")
                .method("POST")
                .body(Body::from(r#"{"name":"Lathe"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn malformed_path_id_is_400() {
    let (app, _) = app("bad_id.wal");
    let (status, json) = get(&app, "/api/machines/not-a-ulid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn unknown_ids_are_404() {
    let (app, _) = app("unknown.wal");
    let ghost = ulid::Ulid::new().to_string();
    for uri in [
        format!("/api/machines/{ghost}"),
        format!("/api/employees/{ghost}"),
        format!("/api/projects/{ghost}"),
        "/api/bookings/B-404".to_string(),
    ] {
        let (status, json) = get(&app, &uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(json["success"], false);
    }
}

#[tokio::test]
async fn cors_headers_present() {
    let (app, _) = app("cors.wal");
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .header("origin", "http://example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("access-control-allow-origin").is_some());
}

#[tokio::test]
async fn body_limit_enforced() {
    let (app, _) = app("body_limit.wal");
    let large_body = "x".repeat(2 * 1024 * 1024);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/machines")
                .method("POST")
                .header("content-type", "application/json")
                .body(Body::from(large_body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

// == Machines ================================================================

#[tokio::test]
async fn machine_crud_and_order() {
    let (app, _) = app("machines.wal");
    let a = create_machine(&app, "Lathe").await;
    let b = create_machine(&app, "Press").await;
    assert_eq!(a["status"], "Available");
    assert!(a["code"].as_str().unwrap().starts_with('M'));

    let (status, _) = post_json(&app, "/api/machines", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = put_json(
        &app,
        &format!("/api/machines/{}", a["id"].as_str().unwrap()),
        json!({ "name": "CNC lathe" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["name"], "CNC lathe");

    let (status, json) = post_json(
        &app,
        "/api/machines/order",
        json!({ "machineOrders": [
            { "machineId": a["id"], "order": 2 },
            { "machineId": b["id"], "order": 1 },
        ]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{json}");

    let (_, json) = get(&app, "/api/machines").await;
    let names: Vec<&str> = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["Press", "CNC lathe"]);
}

#[tokio::test]
async fn reorder_with_unknown_machine_changes_nothing() {
    let (app, _) = app("reorder_unknown.wal");
    let a = create_machine(&app, "Lathe").await;
    let (status, _) = post_json(
        &app,
        "/api/machines/order",
        json!({ "machineOrders": [
            { "machineId": a["id"], "order": 9 },
            { "machineId": ulid::Ulid::new().to_string(), "order": 1 },
        ]}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, json) = get(&app, &format!("/api/machines/{}", a["id"].as_str().unwrap())).await;
    assert_eq!(json["data"]["order"], 0);
}

#[tokio::test]
async fn machine_delete_reports_cascade() {
    let (app, _) = app("machine_delete.wal");
    let m = create_machine(&app, "Saw").await;
    let p = create_project(&app, "Gate").await;
    for (i, hour) in [8, 10, 12].into_iter().enumerate() {
        let (status, _) = post_json(
            &app,
            "/api/bookings",
            booking_body(&format!("B{i}"), &m, &p, DAY + hour * H, DAY + (hour + 1) * H),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let id = m["id"].as_str().unwrap();
    let (status, json) = get(&app, &format!("/api/machines/{id}/check-bookings")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["count"], 3);
    assert_eq!(json["data"]["bookings"][0]["bookingId"], "B0");

    let (status, json) = delete(&app, &format!("/api/machines/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["deletedBookings"], 3);
    let (_, json) = get(&app, "/api/bookings").await;
    assert_eq!(json["data"], json!([]));
}

// == Bookings ================================================================

#[tokio::test]
async fn booking_conflict_is_400_with_conflicts() {
    let (app, _) = app("booking_conflict.wal");
    let m = create_machine(&app, "Press").await;
    let p = create_project(&app, "Gate").await;

    let (status, json) = post_json(
        &app,
        "/api/bookings",
        booking_body("A", &m, &p, DAY + 14 * H, DAY + 15 * H),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["machine"]["id"], m["id"]);
    assert_eq!(json["data"]["project"]["name"], "Gate");
    assert_eq!(json["data"]["status"], "Planned");

    let (status, json) = post_json(
        &app,
        "/api/bookings",
        booking_body("B", &m, &p, DAY + 14 * H + H / 2, DAY + 14 * H + 3 * H / 4),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert_eq!(
        json["data"],
        json!([{ "bookingId": "A", "startTime": DAY + 14 * H, "endTime": DAY + 15 * H }])
    );
}

#[tokio::test]
async fn booking_validation_errors() {
    let (app, _) = app("booking_validation.wal");
    let m = create_machine(&app, "Press").await;
    let p = create_project(&app, "Gate").await;

    let (status, json) = post_json(
        &app,
        "/api/bookings",
        booking_body("A", &m, &p, DAY + 2 * H, DAY + H),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["data"]["field"], "endTime");

    let (status, json) = post_json(
        &app,
        "/api/bookings",
        json!({
            "bookingId": "A",
            "startTime": DAY,
            "endTime": DAY + H,
            "machineId": m["id"],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["data"]["field"], "projectId");

    let (status, json) = post_json(
        &app,
        "/api/bookings",
        json!({
            "bookingId": "svc",
            "startTime": DAY,
            "endTime": DAY + H,
            "machineId": m["id"],
            "maintenanceType": "general",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["project"], Value::Null);
    assert_eq!(json["data"]["maintenanceType"], "general");
}

#[tokio::test]
async fn booking_update_and_delete_drive_status() {
    let (app, clock) = app("booking_status.wal");
    let m = create_machine(&app, "Press").await;
    let p = create_project(&app, "Gate").await;
    clock.set(DAY + 10 * H + H / 2);

    let (status, json) = post_json(
        &app,
        "/api/bookings",
        booking_body("A", &m, &p, DAY + 10 * H, DAY + 11 * H),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["machine"]["status"], "Occupied");

    let (status, json) = put_json(&app, "/api/bookings/A", json!({ "status": "Cancelled" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "Cancelled");
    assert_eq!(json["data"]["machine"]["status"], "Available");

    let (status, _) = delete(&app, "/api/bookings/A").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = delete(&app, "/api/bookings/A").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_machine_statuses_endpoint() {
    let (app, clock) = app("status_endpoint.wal");
    let m = create_machine(&app, "Press").await;
    let p = create_project(&app, "Gate").await;
    post_json(
        &app,
        "/api/bookings",
        booking_body("A", &m, &p, DAY + 10 * H, DAY + 11 * H),
    )
    .await;

    clock.set(DAY + 10 * H);
    let (status, json) = post_json(&app, "/api/bookings/update-machine-statuses", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["changes"][0]["to"], "Occupied");
    assert_eq!(json["data"]["failed"], 0);

    let (_, json) = post_json(&app, "/api/bookings/update-machine-statuses", json!({})).await;
    assert_eq!(json["data"]["changes"], json!([]));
}

// == Employees and projects ==================================================

#[tokio::test]
async fn employee_delete_blocked_with_references() {
    let (app, _) = app("employee_block.wal");
    let m = create_machine(&app, "Press").await;
    let (status, json) = post_json(
        &app,
        "/api/employees",
        json!({ "employeeNumber": "100", "name": "Kim", "skills": ["TIG"] }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let employee = json["data"].clone();

    let (status, _) = post_json(
        &app,
        "/api/employees",
        json!({ "employeeNumber": "100", "name": "Sam" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    post_json(
        &app,
        "/api/bookings",
        json!({
            "bookingId": "svc",
            "startTime": DAY,
            "endTime": DAY + H,
            "machineId": m["id"],
            "maintenanceType": "general",
            "employeeIds": [employee["id"]],
        }),
    )
    .await;

    let uri = format!("/api/employees/{}", employee["id"].as_str().unwrap());
    let (status, json) = delete(&app, &uri).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["data"]["count"], 1);
    assert_eq!(json["data"]["bookings"], json!(["svc"]));

    delete(&app, "/api/bookings/svc").await;
    let (status, _) = delete(&app, &uri).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn project_delete_cascade_and_block() {
    let (app, _) = app("project_cascade.wal");
    let m = create_machine(&app, "Press").await;
    let p = create_project(&app, "Gate").await;
    post_json(&app, "/api/bookings", booking_body("A", &m, &p, DAY, DAY + H)).await;
    let uri = format!("/api/projects/{}", p["id"].as_str().unwrap());

    let (_, json) = get(&app, &format!("{uri}/check-bookings")).await;
    assert_eq!(json["data"]["count"], 1);
    let (status, json) = delete(&app, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["deletedBookings"], 1);

    let (app, _) = app_with("project_block.wal", ProjectDeletePolicy::Block);
    let m = create_machine(&app, "Press").await;
    let p = create_project(&app, "Gate").await;
    post_json(&app, "/api/bookings", booking_body("A", &m, &p, DAY, DAY + H)).await;
    let uri = format!("/api/projects/{}", p["id"].as_str().unwrap());
    let (status, json) = delete(&app, &uri).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["data"]["bookings"], json!(["A"]));
}

#[tokio::test]
async fn class_project_inspection_completed() {
    let (app, _) = app("inspections.wal");
    let (status, json) = post_json(
        &app,
        "/api/projects",
        json!({
            "name": "Pressure vessel",
            "customer": "Offshore AS",
            "startDate": DAY,
            "deadline": DAY + 60 * 24 * H,
            "price": 0,
            "isClassProject": true,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    assert_eq!(json["data"]["inspections"]["ndt"]["completed"], false);

    let id = json["data"]["id"].as_str().unwrap().to_string();
    let (status, json) = put_json(
        &app,
        &format!("/api/projects/{id}/inspections/ndt/completed"),
        json!({ "completed": true }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["inspections"]["ndt"]["completed"], true);

    let (status, _) = put_json(
        &app,
        &format!("/api/projects/{id}/inspections/paint/completed"),
        json!({ "completed": true }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
