use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::TaskStatusResponse;
use crate::services::reconciler;
use crate::web::{AppState, UserContext};

pub async fn get_task_status(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<TaskStatusResponse>, AppError> {
    let task = state
        .database
        .get_generation_task(id)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .ok_or_else(|| AppError::not_found("task", id))?;

    // Tasks are exclusively owned; foreign ids look absent.
    if task.user_id != user.user_id {
        return Err(AppError::not_found("task", id));
    }

    let task = reconciler::reconcile_generation(&state.database, &state.queue, task).await?;
    Ok(Json(reconciler::generation_status_response(&task)))
}
