use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::errors::AppError;
use crate::models::{ImageGenerateRequest, TaskAccepted};
use crate::services::submission;
use crate::web::{AppState, UserContext};

pub async fn generate_image(
    State(state): State<AppState>,
    user: UserContext,
    Json(request): Json<ImageGenerateRequest>,
) -> Result<(StatusCode, Json<TaskAccepted>), AppError> {
    let accepted =
        submission::submit_generation(&state.database, &state.queue, user.user_id, &request)
            .await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}
