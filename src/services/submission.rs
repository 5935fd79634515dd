//! Request validation and the persist-then-enqueue submission path.
//!
//! Submissions never block on the worker: the row is created `pending`,
//! the payload lands on the lane with the task id as idempotency key, and
//! the caller gets the 202 envelope with an estimate.

use chrono::Utc;
use uuid::Uuid;

use crate::database::Database;
use crate::errors::AppError;
use crate::models::{
    ImageGenerateRequest, InpaintRequest, InpaintTask, TaskAccepted, TaskKind, TaskStatus,
};
use crate::queue::TaskQueue;
use crate::services::estimate;

const MAX_PROMPT_LEN: usize = 2000;
const MAX_NEGATIVE_PROMPT_LEN: usize = 1000;
const MAX_SEED: i64 = 1 << 31;

pub fn validate_generate(request: &ImageGenerateRequest) -> Result<(), AppError> {
    validate_prompt(&request.prompt, request.negative_prompt.as_deref())?;
    validate_dimension("width", request.width)?;
    validate_dimension("height", request.height)?;
    if !(1..=4).contains(&request.num_images) {
        return Err(AppError::validation(
            "num_images",
            "out_of_range",
            "num_images must be between 1 and 4",
        ));
    }
    validate_seed(request.seed)?;
    Ok(())
}

pub fn validate_inpaint(request: &InpaintRequest) -> Result<(), AppError> {
    validate_prompt(&request.prompt, request.negative_prompt.as_deref())?;
    if request.mask_data.trim().is_empty() {
        return Err(AppError::validation(
            "mask_data",
            "required",
            "mask_data must be a base64 encoded image",
        ));
    }
    if !(0.0..=1.0).contains(&request.strength) {
        return Err(AppError::validation(
            "strength",
            "out_of_range",
            "strength must be between 0.0 and 1.0",
        ));
    }
    if !(1.0..=20.0).contains(&request.guidance_scale) {
        return Err(AppError::validation(
            "guidance_scale",
            "out_of_range",
            "guidance_scale must be between 1.0 and 20.0",
        ));
    }
    if !(10..=100).contains(&request.num_inference_steps) {
        return Err(AppError::validation(
            "num_inference_steps",
            "out_of_range",
            "num_inference_steps must be between 10 and 100",
        ));
    }
    validate_seed(request.seed)?;
    Ok(())
}

pub fn validate_color(color: &[i32]) -> Result<(), AppError> {
    if color.len() != 3 || !color.iter().all(|c| (0..=255).contains(c)) {
        return Err(AppError::validation(
            "color",
            "invalid_rgb",
            "Color must be [r, g, b] with values 0-255",
        ));
    }
    Ok(())
}

fn validate_prompt(prompt: &str, negative_prompt: Option<&str>) -> Result<(), AppError> {
    if prompt.is_empty() || prompt.chars().count() > MAX_PROMPT_LEN {
        return Err(AppError::validation(
            "prompt",
            "length",
            format!("prompt must be 1-{MAX_PROMPT_LEN} characters"),
        ));
    }
    if let Some(negative) = negative_prompt {
        if negative.chars().count() > MAX_NEGATIVE_PROMPT_LEN {
            return Err(AppError::validation(
                "negative_prompt",
                "length",
                format!("negative_prompt must be at most {MAX_NEGATIVE_PROMPT_LEN} characters"),
            ));
        }
    }
    Ok(())
}

fn validate_dimension(field: &str, value: i32) -> Result<(), AppError> {
    if !(256..=2048).contains(&value) {
        return Err(AppError::validation(
            field,
            "out_of_range",
            format!("{field} must be between 256 and 2048"),
        ));
    }
    if value % 8 != 0 {
        return Err(AppError::validation(
            field,
            "not_multiple_of_8",
            format!("{field} must be a multiple of 8"),
        ));
    }
    Ok(())
}

fn validate_seed(seed: Option<i64>) -> Result<(), AppError> {
    if let Some(seed) = seed {
        if !(0..MAX_SEED).contains(&seed) {
            return Err(AppError::validation(
                "seed",
                "out_of_range",
                "seed must be in [0, 2^31)",
            ));
        }
    }
    Ok(())
}

pub async fn submit_generation(
    db: &Database,
    queue: &TaskQueue,
    user_id: Uuid,
    request: &ImageGenerateRequest,
) -> Result<TaskAccepted, AppError> {
    validate_generate(request)?;

    let task_id = Uuid::new_v4();
    let pipeline_observed = db
        .generation_pipeline_observed()
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;

    db.create_generation_task(task_id, user_id, request)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;

    let payload = serde_json::json!({
        "task_id": task_id,
        "prompt": request.prompt,
        "negative_prompt": request.negative_prompt.clone().unwrap_or_default(),
        "width": request.width,
        "height": request.height,
        "num_images": request.num_images,
        "seed": request.seed,
        "user_id": user_id,
    });
    let handle = queue
        .enqueue(TaskKind::GenerateImage, task_id, &payload)
        .await?;
    db.set_generation_queue_task(task_id, &handle)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;

    tracing::info!(task_id = %task_id, user_id = %user_id, "Accepted generation task");

    Ok(TaskAccepted {
        task_id,
        status: "pending".to_string(),
        estimated_time: estimate::generation_estimate(
            request.width,
            request.height,
            request.num_images,
            pipeline_observed,
        ),
    })
}

pub async fn submit_inpaint(
    db: &Database,
    queue: &TaskQueue,
    user_id: Uuid,
    request: &InpaintRequest,
    original_image_url: &str,
) -> Result<TaskAccepted, AppError> {
    validate_inpaint(request)?;

    let task_id = Uuid::new_v4();
    let task = InpaintTask {
        id: task_id,
        user_id,
        queue_task_id: None,
        status: TaskStatus::Pending,
        error: None,
        original_image_id: request.original_image_id,
        prompt: request.prompt.clone(),
        negative_prompt: request.negative_prompt.clone(),
        strength: request.strength,
        guidance_scale: request.guidance_scale,
        num_inference_steps: request.num_inference_steps,
        seed: request.seed,
        mask_object_name: None,
        result: None,
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
    };
    db.create_inpaint_task(&task)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;

    let payload = serde_json::json!({
        "task_id": task_id,
        "original_image_url": original_image_url,
        "mask_data": request.mask_data,
        "prompt": request.prompt,
        "negative_prompt": request.negative_prompt.clone().unwrap_or_default(),
        "strength": request.strength,
        "guidance_scale": request.guidance_scale,
        "num_inference_steps": request.num_inference_steps,
        "seed": request.seed,
        "user_id": user_id,
    });
    let handle = queue
        .enqueue(TaskKind::InpaintImage, task_id, &payload)
        .await?;
    db.set_inpaint_queue_task(task_id, &handle)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;

    tracing::info!(task_id = %task_id, user_id = %user_id, "Accepted inpaint task");

    Ok(TaskAccepted {
        task_id,
        status: "pending".to_string(),
        estimated_time: estimate::kind_estimate(TaskKind::InpaintImage),
    })
}

/// Segmentation, background and style jobs have no durable row; the
/// queue entry itself is the unit of tracking.
pub async fn submit_ephemeral(
    queue: &TaskQueue,
    kind: TaskKind,
    payload: serde_json::Value,
) -> Result<TaskAccepted, AppError> {
    let task_id = Uuid::new_v4();
    let mut payload = payload;
    if let Some(object) = payload.as_object_mut() {
        object.insert("task_id".to_string(), serde_json::json!(task_id));
    }
    queue.enqueue(kind, task_id, &payload).await?;

    tracing::info!(task_id = %task_id, kind = kind.as_str(), "Accepted task");

    Ok(TaskAccepted {
        task_id,
        status: "pending".to_string(),
        estimated_time: estimate::kind_estimate(kind),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate_request() -> ImageGenerateRequest {
        ImageGenerateRequest {
            prompt: "a cat".to_string(),
            negative_prompt: None,
            width: 1024,
            height: 1024,
            num_images: 1,
            seed: None,
        }
    }

    fn inpaint_request() -> InpaintRequest {
        InpaintRequest {
            original_image_id: Uuid::new_v4(),
            mask_data: "data:image/png;base64,iVBORw0KGgo=".to_string(),
            prompt: "replace sky".to_string(),
            negative_prompt: None,
            strength: 0.85,
            guidance_scale: 7.5,
            num_inference_steps: 30,
            seed: None,
        }
    }

    #[test]
    fn test_generate_validation_accepts_defaults() {
        assert!(validate_generate(&generate_request()).is_ok());
    }

    #[test]
    fn test_generate_validation_rejects_bad_dimensions() {
        let mut request = generate_request();
        request.width = 255;
        assert!(validate_generate(&request).is_err());

        request.width = 1000; // in range but not a multiple of 8
        assert!(validate_generate(&request).is_err());

        request.width = 4096;
        assert!(validate_generate(&request).is_err());

        request.width = 256;
        assert!(validate_generate(&request).is_ok());
    }

    #[test]
    fn test_generate_validation_rejects_bad_prompt_and_counts() {
        let mut request = generate_request();
        request.prompt = String::new();
        assert!(validate_generate(&request).is_err());

        let mut request = generate_request();
        request.prompt = "x".repeat(2001);
        assert!(validate_generate(&request).is_err());

        let mut request = generate_request();
        request.num_images = 5;
        assert!(validate_generate(&request).is_err());
        request.num_images = 0;
        assert!(validate_generate(&request).is_err());
    }

    #[test]
    fn test_seed_bounds() {
        let mut request = generate_request();
        request.seed = Some(-1);
        assert!(validate_generate(&request).is_err());
        request.seed = Some(1 << 31);
        assert!(validate_generate(&request).is_err());
        request.seed = Some((1 << 31) - 1);
        assert!(validate_generate(&request).is_ok());
    }

    #[test]
    fn test_inpaint_validation_bounds() {
        assert!(validate_inpaint(&inpaint_request()).is_ok());

        let mut request = inpaint_request();
        request.strength = 1.2;
        assert!(validate_inpaint(&request).is_err());

        let mut request = inpaint_request();
        request.guidance_scale = 0.5;
        assert!(validate_inpaint(&request).is_err());

        let mut request = inpaint_request();
        request.num_inference_steps = 5;
        assert!(validate_inpaint(&request).is_err());

        let mut request = inpaint_request();
        request.mask_data = "  ".to_string();
        assert!(validate_inpaint(&request).is_err());
    }

    #[test]
    fn test_color_validation() {
        assert!(validate_color(&[255, 0, 128]).is_ok());
        assert!(validate_color(&[255, 0]).is_err());
        assert!(validate_color(&[255, 0, 300]).is_err());
        assert!(validate_color(&[-1, 0, 0]).is_err());
    }
}
