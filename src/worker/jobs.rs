//! Concrete job handlers, one per task kind.
//!
//! Every handler follows the same arc: resolve inputs (fetching images
//! through the in-cluster URL), run the pipeline, upload artifacts under
//! deterministic keys, release the GPU memory pool, and return the
//! structured result. Errors bubble to the dispatcher, which owns retry
//! and the failure-as-result conversion.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::artifacts;
use super::pipelines::{Pipeline, PipelineSet};
use crate::models::{MaskInfo, TaskKind, TaskResult};
use crate::storage::ObjectStore;

/// Turbo-class generation defaults.
const DEFAULT_INFERENCE_STEPS: i32 = 8;
const DEFAULT_GUIDANCE_SCALE: f64 = 3.5;

pub struct JobContext {
    pub storage: ObjectStore,
    pub pipelines: PipelineSet,
    pub http: reqwest::Client,
}

impl JobContext {
    /// Fetch an artifact, rewriting browser URLs onto the in-cluster
    /// endpoint first.
    async fn fetch_image(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let internal = self.storage.to_internal_url(url);
        let response = self.http.get(&internal).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn release_memory(&self, pipeline: &dyn Pipeline) {
        if let Err(e) = pipeline.cleanup().await {
            warn!(pipeline = pipeline.name(), "GPU memory release failed: {}", e);
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateArgs {
    task_id: Uuid,
    prompt: String,
    #[serde(default)]
    negative_prompt: String,
    width: i32,
    height: i32,
    num_images: i32,
    seed: Option<i64>,
    user_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct InpaintArgs {
    task_id: Uuid,
    original_image_url: String,
    mask_data: String,
    prompt: String,
    #[serde(default)]
    negative_prompt: String,
    strength: f64,
    guidance_scale: f64,
    num_inference_steps: i32,
    seed: Option<i64>,
    user_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct SegmentPointArgs {
    task_id: Uuid,
    image_url: String,
    point_coords: Vec<[i32; 2]>,
    point_labels: Vec<i32>,
    user_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct SegmentBoxArgs {
    task_id: Uuid,
    image_url: String,
    #[serde(rename = "box")]
    box_coords: Vec<i32>,
    user_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct SegmentAutoArgs {
    task_id: Uuid,
    image_url: String,
    user_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct BackgroundArgs {
    task_id: Uuid,
    image_id: Option<Uuid>,
    image_url: String,
    #[serde(default)]
    background_url: Option<String>,
    #[serde(default)]
    color: Option<Vec<i32>>,
    #[serde(default = "default_true")]
    alpha_matting: bool,
    user_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct StyleArgs {
    task_id: Uuid,
    image_id: Option<Uuid>,
    image_url: String,
    style: String,
    #[serde(default)]
    prompt: String,
    strength: Option<f64>,
    seed: Option<i64>,
    user_id: Uuid,
}

fn default_true() -> bool {
    true
}

pub async fn run_job(
    ctx: &JobContext,
    kind: TaskKind,
    payload: &serde_json::Value,
) -> anyhow::Result<TaskResult> {
    match kind {
        TaskKind::GenerateImage => generate_image(ctx, payload).await,
        TaskKind::InpaintImage => inpaint_image(ctx, payload).await,
        TaskKind::SegmentPoint => segment_point(ctx, payload).await,
        TaskKind::SegmentBox => segment_box(ctx, payload).await,
        TaskKind::SegmentAuto => segment_auto(ctx, payload).await,
        TaskKind::RemoveBackground
        | TaskKind::ReplaceBackground
        | TaskKind::ReplaceBackgroundColor => background_edit(ctx, kind, payload).await,
        TaskKind::GetBackgroundMask => background_mask(ctx, payload).await,
        TaskKind::ApplyStyle => apply_style(ctx, payload).await,
    }
}

async fn generate_image(
    ctx: &JobContext,
    payload: &serde_json::Value,
) -> anyhow::Result<TaskResult> {
    let args: GenerateArgs = serde_json::from_value(payload.clone())?;
    info!(task_id = %args.task_id, "Starting image generation");

    let (prompt, was_translated) = ctx.pipelines.translate(&args.prompt).await;
    let negative_prompt = if args.negative_prompt.is_empty() {
        String::new()
    } else {
        ctx.pipelines.translate(&args.negative_prompt).await.0
    };

    // The model requires multiples of 8.
    let width = args.width / 8 * 8;
    let height = args.height / 8 * 8;

    let pipeline = ctx.pipelines.generate().await?;
    let images = pipeline
        .invoke(
            "text_to_image",
            serde_json::json!({
                "prompt": prompt,
                "negative_prompt": negative_prompt,
                "width": width,
                "height": height,
                "num_images": args.num_images,
                "num_inference_steps": DEFAULT_INFERENCE_STEPS,
                "guidance_scale": DEFAULT_GUIDANCE_SCALE,
                "seed": args.seed,
            }),
        )
        .await?;

    let mut uploaded = Vec::with_capacity(images.len());
    for (idx, bytes) in images.into_iter().enumerate() {
        let artifact =
            artifacts::upload_image(&ctx.storage, args.user_id, args.task_id, bytes, args.seed)
                .await?;
        info!(task_id = %args.task_id, "Uploaded image {}: {}", idx + 1, artifact.object_name);
        uploaded.push(artifact);
    }

    ctx.release_memory(pipeline).await;

    let mut result = TaskResult::completed(args.task_id);
    result.images = uploaded;
    if was_translated {
        result.original_prompt = Some(args.prompt);
        result.translated_prompt = Some(prompt);
        result.was_translated = Some(true);
    }
    Ok(result)
}

async fn inpaint_image(
    ctx: &JobContext,
    payload: &serde_json::Value,
) -> anyhow::Result<TaskResult> {
    let args: InpaintArgs = serde_json::from_value(payload.clone())?;
    info!(task_id = %args.task_id, "Starting inpainting");

    let (prompt, was_translated) = ctx.pipelines.translate(&args.prompt).await;
    let negative_prompt = if args.negative_prompt.is_empty() {
        String::new()
    } else {
        ctx.pipelines.translate(&args.negative_prompt).await.0
    };

    let original = ctx.fetch_image(&args.original_image_url).await?;
    let mask = artifacts::decode_data_url(&args.mask_data)?;
    let processed_mask = artifacts::normalize_mask(&mask)?;

    let pipeline = ctx.pipelines.inpaint().await?;
    let images = pipeline
        .invoke(
            "inpaint",
            serde_json::json!({
                "prompt": prompt,
                "negative_prompt": negative_prompt,
                "image": BASE64.encode(&original),
                "mask": BASE64.encode(&processed_mask),
                "strength": args.strength,
                "guidance_scale": args.guidance_scale,
                "num_inference_steps": args.num_inference_steps,
                "seed": args.seed,
            }),
        )
        .await?;

    let mut uploaded = Vec::with_capacity(images.len());
    for bytes in images {
        uploaded.push(
            artifacts::upload_image(&ctx.storage, args.user_id, args.task_id, bytes, args.seed)
                .await?,
        );
    }

    // The processed mask is kept so the edit can be replayed later.
    let (mask_object_name, _mask_url) =
        artifacts::upload_mask(&ctx.storage, args.user_id, args.task_id, processed_mask).await?;

    ctx.release_memory(pipeline).await;

    let mut result = TaskResult::completed(args.task_id);
    result.images = uploaded;
    result.mask_object_name = Some(mask_object_name);
    if was_translated {
        result.original_prompt = Some(args.prompt);
        result.translated_prompt = Some(prompt);
        result.was_translated = Some(true);
    }
    Ok(result)
}

async fn segment_point(
    ctx: &JobContext,
    payload: &serde_json::Value,
) -> anyhow::Result<TaskResult> {
    let args: SegmentPointArgs = serde_json::from_value(payload.clone())?;
    info!(task_id = %args.task_id, "Starting point segmentation");

    let image = ctx.fetch_image(&args.image_url).await?;
    let pipeline = ctx.pipelines.sam().await?;
    let masks = pipeline
        .invoke(
            "segment_point",
            serde_json::json!({
                "image": BASE64.encode(&image),
                "point_coords": args.point_coords,
                "point_labels": args.point_labels,
            }),
        )
        .await?;

    let result = single_mask_result(ctx, args.task_id, args.user_id, masks).await?;
    ctx.release_memory(pipeline).await;
    Ok(result)
}

async fn segment_box(ctx: &JobContext, payload: &serde_json::Value) -> anyhow::Result<TaskResult> {
    let args: SegmentBoxArgs = serde_json::from_value(payload.clone())?;
    info!(task_id = %args.task_id, "Starting box segmentation");

    let image = ctx.fetch_image(&args.image_url).await?;
    let pipeline = ctx.pipelines.sam().await?;
    let masks = pipeline
        .invoke(
            "segment_box",
            serde_json::json!({
                "image": BASE64.encode(&image),
                "box": args.box_coords,
            }),
        )
        .await?;

    let result = single_mask_result(ctx, args.task_id, args.user_id, masks).await?;
    ctx.release_memory(pipeline).await;
    Ok(result)
}

async fn segment_auto(ctx: &JobContext, payload: &serde_json::Value) -> anyhow::Result<TaskResult> {
    let args: SegmentAutoArgs = serde_json::from_value(payload.clone())?;
    info!(task_id = %args.task_id, "Starting auto segmentation");

    let image = ctx.fetch_image(&args.image_url).await?;
    let pipeline = ctx.pipelines.sam().await?;
    let mask_images = pipeline
        .invoke(
            "segment_auto",
            serde_json::json!({ "image": BASE64.encode(&image) }),
        )
        .await?;

    let mut masks = Vec::with_capacity(mask_images.len());
    for bytes in mask_images {
        let encoded = artifacts::encode_data_url(&bytes);
        let (object_name, url) =
            artifacts::upload_mask(&ctx.storage, args.user_id, args.task_id, bytes).await?;
        let id = mask_id_from_key(&object_name);
        masks.push(MaskInfo {
            id,
            url,
            base64: encoded,
        });
    }

    ctx.release_memory(pipeline).await;

    let mut result = TaskResult::completed(args.task_id);
    result.masks = masks;
    Ok(result)
}

async fn background_edit(
    ctx: &JobContext,
    kind: TaskKind,
    payload: &serde_json::Value,
) -> anyhow::Result<TaskResult> {
    let args: BackgroundArgs = serde_json::from_value(payload.clone())?;
    info!(task_id = %args.task_id, kind = kind.as_str(), "Starting background edit");

    let image = ctx.fetch_image(&args.image_url).await?;
    let mut params = serde_json::json!({
        "image": BASE64.encode(&image),
        "alpha_matting": args.alpha_matting,
    });
    let operation = match kind {
        TaskKind::ReplaceBackground => {
            let background_url = args
                .background_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("replace_background requires background_url"))?;
            let background = ctx.fetch_image(background_url).await?;
            params["background"] = serde_json::json!(BASE64.encode(&background));
            "replace_background"
        }
        TaskKind::ReplaceBackgroundColor => {
            let color = args
                .color
                .clone()
                .ok_or_else(|| anyhow::anyhow!("replace_background_color requires color"))?;
            params["color"] = serde_json::json!(color);
            "replace_background_color"
        }
        _ => "remove_background",
    };

    let pipeline = ctx.pipelines.background().await?;
    let images = pipeline.invoke(operation, params).await?;
    let bytes = images
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("background pipeline returned no image"))?;

    let artifact =
        artifacts::upload_image(&ctx.storage, args.user_id, args.task_id, bytes, None).await?;
    ctx.release_memory(pipeline).await;

    let mut result = TaskResult::completed(args.task_id);
    result.image = Some(artifact);
    result.original_image_id = args.image_id;
    Ok(result)
}

async fn background_mask(
    ctx: &JobContext,
    payload: &serde_json::Value,
) -> anyhow::Result<TaskResult> {
    let args: BackgroundArgs = serde_json::from_value(payload.clone())?;
    info!(task_id = %args.task_id, "Extracting foreground mask");

    let image = ctx.fetch_image(&args.image_url).await?;
    let pipeline = ctx.pipelines.background().await?;
    let masks = pipeline
        .invoke(
            "foreground_mask",
            serde_json::json!({ "image": BASE64.encode(&image) }),
        )
        .await?;

    let result = single_mask_result(ctx, args.task_id, args.user_id, masks).await?;
    ctx.release_memory(pipeline).await;
    Ok(result)
}

async fn apply_style(ctx: &JobContext, payload: &serde_json::Value) -> anyhow::Result<TaskResult> {
    let args: StyleArgs = serde_json::from_value(payload.clone())?;
    info!(task_id = %args.task_id, style = %args.style, "Starting style transfer");

    let image = ctx.fetch_image(&args.image_url).await?;

    let pipeline = ctx.pipelines.style().await?;
    let images = pipeline
        .invoke(
            "style_transfer",
            serde_json::json!({
                "image": BASE64.encode(&image),
                "style": args.style,
                "prompt": args.prompt,
                "strength": args.strength,
                "seed": args.seed,
            }),
        )
        .await?;
    let bytes = images
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("style pipeline returned no image"))?;

    let artifact =
        artifacts::upload_image(&ctx.storage, args.user_id, args.task_id, bytes, args.seed)
            .await?;
    ctx.release_memory(pipeline).await;

    let mut result = TaskResult::completed(args.task_id);
    result.image = Some(artifact);
    result.style = Some(args.style);
    result.original_image_id = args.image_id;
    Ok(result)
}

async fn single_mask_result(
    ctx: &JobContext,
    task_id: Uuid,
    user_id: Uuid,
    masks: Vec<Vec<u8>>,
) -> anyhow::Result<TaskResult> {
    let bytes = masks
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("pipeline returned no mask"))?;

    let encoded = artifacts::encode_data_url(&bytes);
    let (_object_name, url) = artifacts::upload_mask(&ctx.storage, user_id, task_id, bytes).await?;

    let mut result = TaskResult::completed(task_id);
    result.mask_url = Some(url);
    result.mask_base64 = Some(encoded);
    Ok(result)
}

fn mask_id_from_key(object_name: &str) -> Uuid {
    object_name
        .rsplit('/')
        .next()
        .and_then(|file| file.strip_suffix(".png"))
        .and_then(|id| Uuid::parse_str(id).ok())
        .unwrap_or_else(Uuid::new_v4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_id_from_key() {
        let id = Uuid::new_v4();
        let key = format!("masks/user/task/{id}.png");
        assert_eq!(mask_id_from_key(&key), id);
    }

    #[test]
    fn test_payload_arg_parsing() {
        let payload = serde_json::json!({
            "task_id": Uuid::new_v4(),
            "prompt": "a cat",
            "negative_prompt": "",
            "width": 1024,
            "height": 1024,
            "num_images": 1,
            "seed": null,
            "user_id": Uuid::new_v4(),
        });
        let args: GenerateArgs = serde_json::from_value(payload).unwrap();
        assert_eq!(args.prompt, "a cat");
        assert_eq!(args.seed, None);

        let payload = serde_json::json!({
            "task_id": Uuid::new_v4(),
            "image_id": Uuid::new_v4(),
            "image_url": "http://minio:9000/lumen-images/images/u/t/a.png",
            "user_id": Uuid::new_v4(),
        });
        let args: BackgroundArgs = serde_json::from_value(payload).unwrap();
        assert!(args.alpha_matting);
        assert!(args.background_url.is_none());
    }
}
