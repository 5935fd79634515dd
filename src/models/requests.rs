//! Request and response schemas for the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ArtifactInfo, MaskInfo, TaskStatus, User, UserRole};

// Auth

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
            is_active: user.is_active,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub user: UserResponse,
}

// Generation

#[derive(Debug, Clone, Deserialize)]
pub struct ImageGenerateRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    #[serde(default = "default_dimension")]
    pub width: i32,
    #[serde(default = "default_dimension")]
    pub height: i32,
    #[serde(default = "default_num_images")]
    pub num_images: i32,
    pub seed: Option<i64>,
}

fn default_dimension() -> i32 {
    1024
}

fn default_num_images() -> i32 {
    1
}

/// 202 envelope shared by every submission endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAccepted {
    pub task_id: Uuid,
    pub status: String,
    pub estimated_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ArtifactInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub progress: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

// Inpainting

#[derive(Debug, Clone, Deserialize)]
pub struct InpaintRequest {
    pub original_image_id: Uuid,
    /// Base64 data URL of the painted mask.
    pub mask_data: String,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    #[serde(default = "default_strength")]
    pub strength: f64,
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f64,
    #[serde(default = "default_inference_steps")]
    pub num_inference_steps: i32,
    pub seed: Option<i64>,
}

pub fn default_strength() -> f64 {
    0.85
}

pub fn default_guidance_scale() -> f64 {
    7.5
}

pub fn default_inference_steps() -> i32 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InpaintTaskStatusResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub progress: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ArtifactInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

// Segmentation

#[derive(Debug, Clone, Deserialize)]
pub struct SamPointRequest {
    pub image_id: Uuid,
    /// `[x, y]` pairs.
    pub point_coords: Vec<[i32; 2]>,
    /// 1 = foreground, 0 = background.
    pub point_labels: Vec<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamBoxRequest {
    pub image_id: Uuid,
    /// `[x1, y1, x2, y2]`.
    pub box_coords: Vec<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamAutoRequest {
    pub image_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamTaskStatusResponse {
    pub task_id: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub masks: Vec<MaskInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// Background

#[derive(Debug, Clone, Deserialize)]
pub struct BackgroundRemoveRequest {
    pub image_id: Uuid,
    #[serde(default = "default_alpha_matting")]
    pub alpha_matting: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackgroundReplaceImageRequest {
    pub image_id: Uuid,
    pub background_image_id: Uuid,
    #[serde(default = "default_alpha_matting")]
    pub alpha_matting: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackgroundReplaceColorRequest {
    pub image_id: Uuid,
    /// RGB triple, each channel 0-255.
    pub color: Vec<i32>,
    #[serde(default = "default_alpha_matting")]
    pub alpha_matting: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackgroundMaskRequest {
    pub image_id: Uuid,
}

fn default_alpha_matting() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundTaskStatusResponse {
    pub task_id: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ArtifactInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// Style transfer

#[derive(Debug, Clone, Deserialize)]
pub struct StyleApplyRequest {
    pub image_id: Uuid,
    pub style: String,
    #[serde(default)]
    pub prompt: String,
    pub strength: Option<f64>,
    pub seed: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleTaskStatusResponse {
    pub task_id: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ArtifactInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StylePreset {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StylePresetsResponse {
    pub styles: Vec<StylePreset>,
}

// Gallery

#[derive(Debug, Clone, Deserialize)]
pub struct GalleryQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    #[serde(default)]
    pub favorites_only: bool,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResponse {
    pub id: Uuid,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    pub width: i32,
    pub height: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    pub is_favorite: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&super::Image> for ImageResponse {
    fn from(img: &super::Image) -> Self {
        Self {
            id: img.id,
            url: img.url.clone(),
            thumbnail_url: img.thumbnail_url.clone(),
            prompt: img.prompt.clone(),
            negative_prompt: img.negative_prompt.clone(),
            width: img.width,
            height: img.height,
            seed: img.seed,
            is_favorite: img.is_favorite,
            created_at: img.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageListResponse {
    pub images: Vec<ImageResponse>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

// Edit history

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditHistoryListResponse {
    pub items: Vec<super::EditHistory>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub has_more: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayRequest {
    pub target_image_id: Uuid,
}

// Stats

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryStatsResponse {
    pub total_images: i64,
    pub today_images: i64,
    pub week_images: i64,
    pub month_images: i64,
    pub total_tasks: i64,
    pub avg_images_per_day: f64,
    pub generated_at: DateTime<Utc>,
}
