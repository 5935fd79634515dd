//! Replays a historical edit against a new target image.
//!
//! The stored mask bytes are fetched verbatim from object storage and
//! re-injected as a base64 data URL; every tunable parameter comes from
//! the history row, so the new submission reproduces the original edit
//! exactly, just on a different image.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use uuid::Uuid;

use crate::database::Database;
use crate::errors::AppError;
use crate::models::{
    requests::{default_guidance_scale, default_inference_steps, default_strength},
    EditHistory, InpaintRequest, TaskAccepted,
};
use crate::queue::TaskQueue;
use crate::services::submission;
use crate::storage::ObjectStore;

/// Parameters a replay inherits from its history row.
#[derive(Debug, PartialEq)]
pub struct ReplayParameters {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub strength: f64,
    pub guidance_scale: f64,
    pub num_inference_steps: i32,
    pub seed: Option<i64>,
}

pub fn replay_parameters(history: &EditHistory) -> ReplayParameters {
    let metadata = &history.edit_metadata;
    ReplayParameters {
        prompt: history.prompt.clone().unwrap_or_default(),
        negative_prompt: history.negative_prompt.clone(),
        strength: history.strength.unwrap_or_else(default_strength),
        guidance_scale: metadata
            .get("guidance_scale")
            .and_then(|v| v.as_f64())
            .unwrap_or_else(default_guidance_scale),
        num_inference_steps: metadata
            .get("num_inference_steps")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
            .unwrap_or_else(default_inference_steps),
        seed: metadata.get("seed").and_then(|v| v.as_i64()),
    }
}

pub async fn replay_edit(
    db: &Database,
    queue: &TaskQueue,
    storage: &ObjectStore,
    user_id: Uuid,
    history_id: Uuid,
    target_image_id: Uuid,
) -> Result<TaskAccepted, AppError> {
    let history = db
        .get_edit_history(history_id, user_id)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .ok_or_else(|| AppError::not_found("edit_history", history_id))?;

    let Some(mask_object_name) = history.mask_object_name.clone() else {
        return Err(AppError::validation(
            "mask",
            "missing",
            "No mask available for this edit",
        ));
    };

    let target_image = db
        .get_image(target_image_id, user_id)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .ok_or_else(|| AppError::not_found("image", target_image_id))?;

    let mask_bytes = storage.get_object(&mask_object_name).await?;
    let mask_data = format!("data:image/png;base64,{}", BASE64.encode(&mask_bytes));

    let params = replay_parameters(&history);
    let request = InpaintRequest {
        original_image_id: target_image_id,
        mask_data,
        prompt: params.prompt,
        negative_prompt: params.negative_prompt,
        strength: params.strength,
        guidance_scale: params.guidance_scale,
        num_inference_steps: params.num_inference_steps,
        seed: params.seed,
    };

    tracing::info!(
        history_id = %history_id,
        target_image_id = %target_image_id,
        "Replaying edit"
    );

    submission::submit_inpaint(db, queue, user_id, &request, &target_image.url).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EditType;
    use chrono::Utc;

    fn history_with_metadata(metadata: serde_json::Value) -> EditHistory {
        EditHistory {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            original_image_id: Uuid::new_v4(),
            edited_image_id: Uuid::new_v4(),
            inpaint_task_id: None,
            edit_type: EditType::Inpaint,
            prompt: Some("replace sky".to_string()),
            negative_prompt: Some("clouds".to_string()),
            strength: Some(0.7),
            mask_object_name: Some("masks/u/t/m.png".to_string()),
            original_thumbnail_url: None,
            edited_thumbnail_url: None,
            edit_metadata: metadata,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_parameters_come_from_history() {
        let history = history_with_metadata(serde_json::json!({
            "guidance_scale": 9.0,
            "num_inference_steps": 50,
            "seed": 1234,
        }));
        let params = replay_parameters(&history);
        assert_eq!(
            params,
            ReplayParameters {
                prompt: "replace sky".to_string(),
                negative_prompt: Some("clouds".to_string()),
                strength: 0.7,
                guidance_scale: 9.0,
                num_inference_steps: 50,
                seed: Some(1234),
            }
        );
    }

    #[test]
    fn test_missing_metadata_falls_back_to_defaults() {
        let history = history_with_metadata(serde_json::json!({}));
        let params = replay_parameters(&history);
        assert_eq!(params.guidance_scale, 7.5);
        assert_eq!(params.num_inference_steps, 30);
        assert_eq!(params.seed, None);
    }

    #[test]
    fn test_parameters_stable_across_targets() {
        // Replay fidelity: the target image does not influence parameters.
        let history = history_with_metadata(serde_json::json!({ "seed": 7 }));
        let first = replay_parameters(&history);
        let second = replay_parameters(&history);
        assert_eq!(first, second);
    }
}
