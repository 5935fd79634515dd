use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{EditHistory, EditHistoryListResponse, HistoryQuery, ReplayRequest, TaskAccepted};
use crate::services::replay;
use crate::web::{AppState, UserContext};

fn page_params(params: &HistoryQuery) -> (u32, u32) {
    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(20).clamp(1, 100);
    (page, page_size)
}

fn list_response(
    items: Vec<EditHistory>,
    total: i64,
    page: u32,
    page_size: u32,
) -> EditHistoryListResponse {
    let consumed = i64::from((page - 1) * page_size) + items.len() as i64;
    let has_more = consumed < total;
    EditHistoryListResponse {
        items,
        total,
        page,
        page_size,
        has_more,
    }
}

pub async fn list_edit_history(
    Query(params): Query<HistoryQuery>,
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<EditHistoryListResponse>, AppError> {
    let (page, page_size) = page_params(&params);
    let (items, total) = state
        .database
        .list_edit_history(user.user_id, page, page_size)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;

    Ok(Json(list_response(items, total, page, page_size)))
}

pub async fn list_edit_history_for_image(
    Path(image_id): Path<Uuid>,
    Query(params): Query<HistoryQuery>,
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<EditHistoryListResponse>, AppError> {
    let (page, page_size) = page_params(&params);
    let (items, total) = state
        .database
        .list_edit_history_for_image(image_id, user.user_id, page, page_size)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;

    Ok(Json(list_response(items, total, page, page_size)))
}

pub async fn get_edit_history(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<EditHistory>, AppError> {
    let history = state
        .database
        .get_edit_history(id, user.user_id)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .ok_or_else(|| AppError::not_found("edit_history", id))?;

    Ok(Json(history))
}

pub async fn delete_edit_history(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    user: UserContext,
) -> Result<StatusCode, AppError> {
    let deleted = state
        .database
        .delete_edit_history(id, user.user_id)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .ok_or_else(|| AppError::not_found("edit_history", id))?;

    // The row owned its mask object; schedule the object deletion off the
    // request path.
    if let Some(mask_object_name) = deleted {
        let storage = state.storage.clone();
        tokio::spawn(async move {
            if let Err(e) = storage.delete_object(&mask_object_name).await {
                tracing::warn!("Failed to delete mask object {}: {}", mask_object_name, e);
            }
        });
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn replay_edit(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    user: UserContext,
    Json(request): Json<ReplayRequest>,
) -> Result<Json<TaskAccepted>, AppError> {
    let accepted = replay::replay_edit(
        &state.database,
        &state.queue,
        &state.storage,
        user.user_id,
        id,
        request.target_image_id,
    )
    .await?;
    Ok(Json(accepted))
}
