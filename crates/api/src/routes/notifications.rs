//! Notification submission and query routes.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use uuid::Uuid;

use courier_common::config::DispatchMode;
use courier_common::error::AppError;
use courier_common::types::{DeliveryStatus, NotificationRecord, NotificationRequest};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", post(create_notification))
        .route("/notifications/{id}", get(get_notification))
        .route("/users/{user_id}/notifications", get(list_user_notifications))
}

/// Response for a deferred submission (202).
#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub message: &'static str,
    pub task_id: Uuid,
    pub record: NotificationRecord,
}

/// Response for a blocking submission (201).
#[derive(Debug, Serialize)]
pub struct SettledResponse {
    pub message: &'static str,
    pub data: NotificationRecord,
}

#[derive(Debug, Serialize)]
pub struct NotificationList {
    pub notifications: Vec<NotificationRecord>,
}

/// POST /notifications — Validate and hand a notification to the dispatch engine.
///
/// The body is parsed leniently: an empty body or `null` is treated as `{}`
/// so the caller gets the list of missing fields rather than a parse error.
async fn create_notification(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, AppError> {
    let request = parse_request(&body)?;
    let ticket = state.engine.submit(request).await?;

    let response = match ticket.mode {
        DispatchMode::Deferred => (
            StatusCode::ACCEPTED,
            Json(QueuedResponse {
                message: "Notification queued",
                task_id: ticket.task_id,
                record: ticket.record,
            }),
        )
            .into_response(),
        DispatchMode::Blocking => {
            // The engine only hands back terminal records in blocking mode;
            // an interrupted dispatch has already surfaced as 503.
            let message = if ticket.record.status == DeliveryStatus::Sent {
                "Notification sent"
            } else {
                "Notification failed"
            };
            (
                StatusCode::CREATED,
                Json(SettledResponse {
                    message,
                    data: ticket.record,
                }),
            )
                .into_response()
        }
    };

    Ok(response)
}

/// GET /notifications/:id — Fetch a single notification record.
async fn get_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<NotificationRecord>, AppError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| AppError::Validation(format!("Invalid notification id '{}'", id)))?;
    let record = state.engine.get_by_id(id)?;
    Ok(Json(record))
}

/// GET /users/:user_id/notifications — List a user's notifications, oldest first.
async fn list_user_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<NotificationList> {
    Json(NotificationList {
        notifications: state.engine.get_by_user(&user_id),
    })
}

fn parse_request(body: &[u8]) -> Result<NotificationRequest, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(NotificationRequest::default());
    }

    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("Invalid JSON body: {}", e)))?;

    if value.is_null() {
        return Ok(NotificationRequest::default());
    }

    serde_json::from_value(value)
        .map_err(|e| AppError::Validation(format!("Invalid request body: {}", e)))
}
