use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use uuid::Uuid;

use sparrow_types::api::{
    Claims, NotificationsPage, PageQuery, Pagination, UnreadCountResponse,
};

use crate::AppState;
use crate::error::ApiError;
use crate::views::{notification_response, page_window};

const LIMIT_MAX: u32 = 50;

pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (page, limit, offset) = page_window(&query, LIMIT_MAX)?;
    let me = claims.sub.to_string();

    let rows = state.db.list_notifications(&me, limit, offset)?;
    let total = state.db.count_notifications(&me)?;

    Ok(Json(NotificationsPage {
        notifications: rows.into_iter().map(notification_response).collect(),
        pagination: Pagination::new(page, limit, total.max(0) as u64),
    }))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let count = state
        .db
        .unread_notification_count(&claims.sub.to_string())?;
    Ok(Json(UnreadCountResponse {
        unread_count: count.max(0) as u64,
    }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(notification_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let marked = state
        .db
        .mark_notification_read(&notification_id.to_string(), &claims.sub.to_string())?;
    if !marked {
        return Err(ApiError::not_found("notification not found"));
    }
    Ok(Json(serde_json::json!({ "read": true })))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .mark_all_notifications_read(&claims.sub.to_string())?;
    Ok(Json(serde_json::json!({ "read": true })))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(notification_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .delete_notification(&notification_id.to_string(), &claims.sub.to_string())?;
    if !deleted {
        return Err(ApiError::not_found("notification not found"));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}
