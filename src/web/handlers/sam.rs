//! Segmentation endpoints. These jobs are queue-only: the task id is the
//! handle and the result backend is the source of truth for status.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    QueueState, SamAutoRequest, SamBoxRequest, SamPointRequest, SamTaskStatusResponse,
    TaskAccepted, TaskKind,
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

pub async fn segment_by_point(
    State(state): State<AppState>,
    user: UserContext,
    Json(request): Json<SamPointRequest>,
) -> Result<(StatusCode, Json<TaskAccepted>), AppError> {
    if request.point_coords.is_empty() || request.point_coords.len() != request.point_labels.len()
    {
        return Err(AppError::validation(
            "point_coords",
            "mismatch",
            "point_coords and point_labels must be non-empty and equal length",
        ));
    }
    let url = image_url(&state, request.image_id, user.user_id).await?;

    let accepted = submission::submit_ephemeral(
        &state.queue,
        TaskKind::SegmentPoint,
        serde_json::json!({
            "image_url": url,
            "point_coords": request.point_coords,
            "point_labels": request.point_labels,
            "user_id": user.user_id,
        }),
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

pub async fn segment_by_box(
    State(state): State<AppState>,
    user: UserContext,
    Json(request): Json<SamBoxRequest>,
) -> Result<(StatusCode, Json<TaskAccepted>), AppError> {
    if request.box_coords.len() != 4 {
        return Err(AppError::validation(
            "box",
            "invalid",
            "box must be [x1, y1, x2, y2]",
        ));
    }
    let url = image_url(&state, request.image_id, user.user_id).await?;

    let accepted = submission::submit_ephemeral(
        &state.queue,
        TaskKind::SegmentBox,
        serde_json::json!({
            "image_url": url,
            "box": request.box_coords,
            "user_id": user.user_id,
        }),
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

pub async fn segment_auto(
    State(state): State<AppState>,
    user: UserContext,
    Json(request): Json<SamAutoRequest>,
) -> Result<(StatusCode, Json<TaskAccepted>), AppError> {
    let url = image_url(&state, request.image_id, user.user_id).await?;

    let accepted = submission::submit_ephemeral(
        &state.queue,
        TaskKind::SegmentAuto,
        serde_json::json!({
            "image_url": url,
            "user_id": user.user_id,
        }),
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

pub async fn get_sam_task_status(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    _user: UserContext,
) -> Result<Json<SamTaskStatusResponse>, AppError> {
    let response = match state.queue.state(id).await? {
        QueueState::Ready(result) => SamTaskStatusResponse {
            task_id: id,
            status: result.status.as_str().to_string(),
            mask_url: result.mask_url,
            mask_base64: result.mask_base64,
            masks: result.masks,
            error: result.error,
        },
        QueueState::Started => SamTaskStatusResponse {
            task_id: id,
            status: "processing".to_string(),
            mask_url: None,
            mask_base64: None,
            masks: Vec::new(),
            error: None,
        },
        QueueState::Pending => SamTaskStatusResponse {
            task_id: id,
            status: "pending".to_string(),
            mask_url: None,
            mask_base64: None,
            masks: Vec::new(),
            error: None,
        },
    };
    Ok(Json(response))
}
