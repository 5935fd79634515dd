//! Background removal and replacement endpoints. Jobs are queue-only;
//! when a poll first observes a completed edit, the status handler
//! materializes the gallery image and its history row.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    BackgroundMaskRequest, BackgroundRemoveRequest, BackgroundReplaceColorRequest,
    BackgroundReplaceImageRequest, BackgroundTaskStatusResponse, EditType, QueueState,
    TaskAccepted, TaskKind, TaskResult, TaskStatus,
};
use crate::services::submission;
use crate::web::{AppState, UserContext};

async fn image_url(state: &AppState, image_id: Uuid, user_id: Uuid) -> Result<String, AppError> {
    state
        .database
        .get_image(image_id, user_id)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .map(|image| image.url)
        .ok_or_else(|| AppError::not_found("image", image_id))
}

pub async fn remove_background(
    State(state): State<AppState>,
    user: UserContext,
    Json(request): Json<BackgroundRemoveRequest>,
) -> Result<(StatusCode, Json<TaskAccepted>), AppError> {
    let url = image_url(&state, request.image_id, user.user_id).await?;

    let accepted = submission::submit_ephemeral(
        &state.queue,
        TaskKind::RemoveBackground,
        serde_json::json!({
            "image_id": request.image_id,
            "image_url": url,
            "alpha_matting": request.alpha_matting,
            "user_id": user.user_id,
        }),
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

pub async fn replace_background_with_image(
    State(state): State<AppState>,
    user: UserContext,
    Json(request): Json<BackgroundReplaceImageRequest>,
) -> Result<(StatusCode, Json<TaskAccepted>), AppError> {
    let url = image_url(&state, request.image_id, user.user_id).await?;
    let background_url = image_url(&state, request.background_image_id, user.user_id).await?;

    let accepted = submission::submit_ephemeral(
        &state.queue,
        TaskKind::ReplaceBackground,
        serde_json::json!({
            "image_id": request.image_id,
            "image_url": url,
            "background_url": background_url,
            "alpha_matting": request.alpha_matting,
            "user_id": user.user_id,
        }),
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

pub async fn replace_background_with_color(
    State(state): State<AppState>,
    user: UserContext,
    Json(request): Json<BackgroundReplaceColorRequest>,
) -> Result<(StatusCode, Json<TaskAccepted>), AppError> {
    submission::validate_color(&request.color)?;
    let url = image_url(&state, request.image_id, user.user_id).await?;

    let accepted = submission::submit_ephemeral(
        &state.queue,
        TaskKind::ReplaceBackgroundColor,
        serde_json::json!({
            "image_id": request.image_id,
            "image_url": url,
            "color": request.color,
            "alpha_matting": request.alpha_matting,
            "user_id": user.user_id,
        }),
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

pub async fn get_foreground_mask(
    State(state): State<AppState>,
    user: UserContext,
    Json(request): Json<BackgroundMaskRequest>,
) -> Result<(StatusCode, Json<TaskAccepted>), AppError> {
    let url = image_url(&state, request.image_id, user.user_id).await?;

    let accepted = submission::submit_ephemeral(
        &state.queue,
        TaskKind::GetBackgroundMask,
        serde_json::json!({
            "image_id": request.image_id,
            "image_url": url,
            "user_id": user.user_id,
        }),
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// Owner check without a task row: artifact keys are deterministic and
/// embed the submitting user.
pub(crate) fn owns_artifact(user_id: Uuid, object_name: &str) -> bool {
    object_name.starts_with(&format!("images/{user_id}/"))
}

pub(crate) async fn materialize_edit(
    state: &AppState,
    user_id: Uuid,
    task_id: Uuid,
    result: &TaskResult,
    edit_type: EditType,
) -> Result<(), AppError> {
    if result.status != TaskStatus::Completed {
        return Ok(());
    }
    let (Some(artifact), Some(original_image_id)) = (&result.image, result.original_image_id)
    else {
        return Ok(());
    };
    if !owns_artifact(user_id, &artifact.object_name) {
        return Ok(());
    }

    state
        .database
        .materialize_ephemeral_edit(
            user_id,
            task_id,
            artifact,
            original_image_id,
            edit_type,
            result.style.as_deref(),
            serde_json::json!({ "style": result.style }),
        )
        .await
        .map_err(|e| AppError::internal(e.to_string()))
}

pub async fn get_background_task_status(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<BackgroundTaskStatusResponse>, AppError> {
    let response = match state.queue.state(id).await? {
        QueueState::Ready(result) => {
            materialize_edit(&state, user.user_id, id, &result, EditType::Background).await?;
            BackgroundTaskStatusResponse {
                task_id: id,
                status: result.status.as_str().to_string(),
                image: result.image,
                mask_url: result.mask_url,
                mask_base64: result.mask_base64,
                error: result.error,
            }
        }
        QueueState::Started => BackgroundTaskStatusResponse {
            task_id: id,
            status: "processing".to_string(),
            image: None,
            mask_url: None,
            mask_base64: None,
            error: None,
        },
        QueueState::Pending => BackgroundTaskStatusResponse {
            task_id: id,
            status: "pending".to_string(),
            image: None,
            mask_url: None,
            mask_base64: None,
            error: None,
        },
    };
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owns_artifact_checks_key_prefix() {
        let user = Uuid::new_v4();
        let key = format!("images/{user}/task/artifact.png");
        assert!(owns_artifact(user, &key));
        assert!(!owns_artifact(Uuid::new_v4(), &key));
        assert!(!owns_artifact(user, "masks/other/task/artifact.png"));
    }
}
