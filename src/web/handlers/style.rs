use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    EditType, QueueState, StyleApplyRequest, StylePreset, StylePresetsResponse,
    StyleTaskStatusResponse, TaskAccepted, TaskKind,
};
use crate::services::submission;
use crate::web::handlers::background::materialize_edit;
use crate::web::{AppState, UserContext};

fn style_presets() -> &'static Vec<StylePreset> {
    static PRESETS: OnceLock<Vec<StylePreset>> = OnceLock::new();
    PRESETS.get_or_init(|| {
        let presets = [
            ("oil_painting", "Oil Painting", "Classic oil painting with thick brush strokes and rich texture"),
            ("watercolor", "Watercolor", "Soft washes of color with a translucent feel"),
            ("anime", "Anime", "Japanese animation style with crisp outlines and vivid colors"),
            ("manga", "Manga", "Black-and-white comic style with screentone shading"),
            ("sketch", "Sketch", "Detailed pencil line work"),
            ("pop_art", "Pop Art", "Bold colors and halftone effects"),
            ("impressionist", "Impressionist", "Loose brushwork focused on light and color"),
            ("cyberpunk", "Cyberpunk", "Neon lighting and a futuristic mood"),
            ("vintage", "Vintage", "Sepia tones and film grain"),
            ("minimalist", "Minimalist", "Simple, clean shapes and flat color"),
            ("fantasy", "Fantasy", "Magical, dreamlike atmosphere"),
            ("gothic", "Gothic", "Dark, mysterious tones"),
        ];
        presets
            .iter()
            .map(|(id, name, description)| StylePreset {
                id: (*id).to_string(),
                name: (*name).to_string(),
                description: (*description).to_string(),
            })
            .collect()
    })
}

fn is_valid_style(style: &str) -> bool {
    style_presets().iter().any(|preset| preset.id == style)
}

pub async fn get_style_presets() -> Json<StylePresetsResponse> {
    Json(StylePresetsResponse {
        styles: style_presets().clone(),
    })
}

pub async fn apply_style(
    State(state): State<AppState>,
    user: UserContext,
    Json(request): Json<StyleApplyRequest>,
) -> Result<(StatusCode, Json<TaskAccepted>), AppError> {
    if !is_valid_style(&request.style) {
        return Err(AppError::validation(
            "style",
            "unknown_preset",
            format!("Invalid style: {}", request.style),
        ));
    }
    if let Some(strength) = request.strength {
        if !(0.0..=1.0).contains(&strength) {
            return Err(AppError::validation(
                "strength",
                "out_of_range",
                "strength must be between 0.0 and 1.0",
            ));
        }
    }

    let image = state
        .database
        .get_image(request.image_id, user.user_id)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .ok_or_else(|| AppError::not_found("image", request.image_id))?;

    let accepted = submission::submit_ephemeral(
        &state.queue,
        TaskKind::ApplyStyle,
        serde_json::json!({
            "image_id": request.image_id,
            "image_url": image.url,
            "style": request.style,
            "prompt": request.prompt,
            "strength": request.strength,
            "seed": request.seed,
            "user_id": user.user_id,
        }),
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

pub async fn get_style_task_status(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<StyleTaskStatusResponse>, AppError> {
    let response = match state.queue.state(id).await? {
        QueueState::Ready(result) => {
            materialize_edit(&state, user.user_id, id, &result, EditType::Style).await?;
            StyleTaskStatusResponse {
                task_id: id,
                status: result.status.as_str().to_string(),
                style: result.style,
                image: result.image,
                error: result.error,
            }
        }
        QueueState::Started => StyleTaskStatusResponse {
            task_id: id,
            status: "processing".to_string(),
            style: None,
            image: None,
            error: None,
        },
        QueueState::Pending => StyleTaskStatusResponse {
            task_id: id,
            status: "pending".to_string(),
            style: None,
            image: None,
            error: None,
        },
    };
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_catalog() {
        assert_eq!(style_presets().len(), 12);
        assert!(is_valid_style("oil_painting"));
        assert!(is_valid_style("cyberpunk"));
        assert!(!is_valid_style("vaporwave"));
    }
}
