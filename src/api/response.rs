//! The single JSON envelope every endpoint answers with, and the mapping
//! from engine errors onto it.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tracing::error;
use ulid::Ulid;

use crate::engine::EngineError;

/// `{ "success": bool, "data"?: T, "message"?: string }`
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub type ApiResult = Result<Response, ApiError>;

fn respond<T: Serialize>(status: StatusCode, data: Option<T>, message: Option<String>) -> Response {
    let body = Envelope {
        success: status.is_success(),
        data,
        message,
    };
    (status, Json(body)).into_response()
}

pub fn ok<T: Serialize>(data: T) -> ApiResult {
    Ok(respond(StatusCode::OK, Some(data), None))
}

pub fn created<T: Serialize>(data: T) -> ApiResult {
    Ok(respond(StatusCode::CREATED, Some(data), None))
}

pub fn ok_with_message<T: Serialize>(data: Option<T>, message: impl Into<String>) -> ApiResult {
    Ok(respond(StatusCode::OK, data, Some(message.into())))
}

/// An error already shaped for the wire.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    data: Option<serde_json::Value>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            data: None,
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let message = e.to_string();
        match e {
            EngineError::Validation { field, .. } => Self {
                status: StatusCode::BAD_REQUEST,
                message,
                data: Some(json!({ "field": field })),
            },
            EngineError::Conflict(conflicts) => Self {
                status: StatusCode::BAD_REQUEST,
                message,
                data: Some(json!(conflicts)),
            },
            EngineError::NotFound { .. } => Self {
                status: StatusCode::NOT_FOUND,
                message,
                data: None,
            },
            EngineError::ReferencedBy { bookings, .. } => Self {
                status: StatusCode::BAD_REQUEST,
                message,
                data: Some(json!({ "count": bookings.len(), "bookings": bookings })),
            },
            EngineError::AlreadyExists { .. } | EngineError::LimitExceeded(_) => {
                Self::bad_request(message)
            }
            EngineError::Storage(detail) => {
                error!(error = %detail, "storage failure while serving request");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "Server Error".into(),
                    data: None,
                }
            }
        }
    }
}

/// Every body rejection is a client error with axum's own description:
/// bad syntax, wrong field types, malformed ids, missing content type.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        respond(self.status, self.data, Some(self.message))
    }
}

/// Parse a path id; malformed ids are a 400, not a 404.
pub fn parse_id(entity: &str, raw: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw).map_err(|_| ApiError::bad_request(format!("invalid {entity} id: {raw}")))
}
