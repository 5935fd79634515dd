use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{InpaintRequest, InpaintTaskStatusResponse, TaskAccepted};
use crate::services::{reconciler, submission};
use crate::web::{AppState, UserContext};

pub async fn inpaint_image(
    State(state): State<AppState>,
    user: UserContext,
    Json(request): Json<InpaintRequest>,
) -> Result<(StatusCode, Json<TaskAccepted>), AppError> {
    let original_image = state
        .database
        .get_image(request.original_image_id, user.user_id)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .ok_or_else(|| AppError::not_found("image", request.original_image_id))?;

    let accepted = submission::submit_inpaint(
        &state.database,
        &state.queue,
        user.user_id,
        &request,
        &original_image.url,
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

pub async fn get_inpaint_task_status(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<InpaintTaskStatusResponse>, AppError> {
    let task = state
        .database
        .get_inpaint_task(id)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .ok_or_else(|| AppError::not_found("task", id))?;

    if task.user_id != user.user_id {
        return Err(AppError::not_found("task", id));
    }

    let task = reconciler::reconcile_inpaint(&state.database, &state.queue, task).await?;

    let original_image_url = state
        .database
        .get_image(task.original_image_id, user.user_id)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .map(|image| image.url);

    Ok(Json(reconciler::inpaint_status_response(
        &task,
        original_image_url,
    )))
}
