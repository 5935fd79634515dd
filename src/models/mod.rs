use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod requests;

pub use requests::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "admin" => UserRole::Admin,
            _ => UserRole::User,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => TaskStatus::Processing,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            _ => TaskStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Closed set of GPU job kinds. The wire name doubles as the dispatch key
/// on the `image_generation` lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    GenerateImage,
    InpaintImage,
    SegmentPoint,
    SegmentBox,
    SegmentAuto,
    RemoveBackground,
    ReplaceBackground,
    ReplaceBackgroundColor,
    GetBackgroundMask,
    ApplyStyle,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::GenerateImage => "generate_image",
            TaskKind::InpaintImage => "inpaint_image",
            TaskKind::SegmentPoint => "segment_point",
            TaskKind::SegmentBox => "segment_box",
            TaskKind::SegmentAuto => "segment_auto",
            TaskKind::RemoveBackground => "remove_background",
            TaskKind::ReplaceBackground => "replace_background",
            TaskKind::ReplaceBackgroundColor => "replace_background_color",
            TaskKind::GetBackgroundMask => "get_background_mask",
            TaskKind::ApplyStyle => "apply_style",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "generate_image" => Some(TaskKind::GenerateImage),
            "inpaint_image" => Some(TaskKind::InpaintImage),
            "segment_point" => Some(TaskKind::SegmentPoint),
            "segment_box" => Some(TaskKind::SegmentBox),
            "segment_auto" => Some(TaskKind::SegmentAuto),
            "remove_background" => Some(TaskKind::RemoveBackground),
            "replace_background" => Some(TaskKind::ReplaceBackground),
            "replace_background_color" => Some(TaskKind::ReplaceBackgroundColor),
            "get_background_mask" => Some(TaskKind::GetBackgroundMask),
            "apply_style" => Some(TaskKind::ApplyStyle),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditType {
    Inpaint,
    Background,
    Style,
    Segment,
}

impl EditType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditType::Inpaint => "inpaint",
            EditType::Background => "background",
            EditType::Style => "style",
            EditType::Segment => "segment",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "background" => EditType::Background,
            "style" => EditType::Style,
            "segment" => EditType::Segment,
            _ => EditType::Inpaint,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationTask {
    pub id: Uuid,
    pub user_id: Uuid,
    pub queue_task_id: Option<String>,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: i32,
    pub height: i32,
    pub num_images: i32,
    pub seed: Option<i64>,
    pub result: Option<TaskResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InpaintTask {
    pub id: Uuid,
    pub user_id: Uuid,
    pub queue_task_id: Option<String>,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub original_image_id: Uuid,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub strength: f64,
    pub guidance_scale: f64,
    pub num_inference_steps: i32,
    pub seed: Option<i64>,
    pub mask_object_name: Option<String>,
    pub result: Option<TaskResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_id: Option<Uuid>,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub object_name: String,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: i32,
    pub height: i32,
    pub seed: Option<i64>,
    pub is_favorite: bool,
    pub folder_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditHistory {
    pub id: Uuid,
    pub user_id: Uuid,
    pub original_image_id: Uuid,
    pub edited_image_id: Uuid,
    pub inpaint_task_id: Option<Uuid>,
    pub edit_type: EditType,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub strength: Option<f64>,
    pub mask_object_name: Option<String>,
    pub original_thumbnail_url: Option<String>,
    pub edited_thumbnail_url: Option<String>,
    pub edit_metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One uploaded artifact inside a worker result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub id: Uuid,
    pub url: String,
    pub object_name: String,
    pub width: i32,
    pub height: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

/// A mask artifact from a segmentation job: stored object plus an inline
/// copy for immediate canvas use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskInfo {
    pub id: Uuid,
    pub url: String,
    pub base64: String,
}

/// The single result document every worker job writes back through the
/// queue. The worker is its sole author; fields not applicable to a kind
/// stay absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ArtifactInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ArtifactInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_object_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub masks: Vec<MaskInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Source image of an edit, echoed from the submission payload so
    /// read paths can link history rows without a task row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_image_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translated_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub was_translated: Option<bool>,
}

impl TaskResult {
    pub fn completed(task_id: Uuid) -> Self {
        Self::new(task_id, TaskStatus::Completed)
    }

    pub fn failed(task_id: Uuid, error: impl Into<String>) -> Self {
        let mut result = Self::new(task_id, TaskStatus::Failed);
        result.error = Some(error.into());
        result
    }

    fn new(task_id: Uuid, status: TaskStatus) -> Self {
        Self {
            task_id,
            status,
            images: Vec::new(),
            image: None,
            mask_object_name: None,
            mask_url: None,
            mask_base64: None,
            masks: Vec::new(),
            style: None,
            original_image_id: None,
            error: None,
            original_prompt: None,
            translated_prompt: None,
            was_translated: None,
        }
    }
}

/// Broker-side view of a queued task, mirroring the states clients of the
/// result backend can observe.
#[derive(Debug, Clone)]
pub enum QueueState {
    /// No state recorded yet; the job sits in the lane.
    Pending,
    /// A worker picked the job up.
    Started,
    /// The result document is readable.
    Ready(TaskResult),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_kind_wire_names_round_trip() {
        let kinds = [
            TaskKind::GenerateImage,
            TaskKind::InpaintImage,
            TaskKind::SegmentPoint,
            TaskKind::SegmentBox,
            TaskKind::SegmentAuto,
            TaskKind::RemoveBackground,
            TaskKind::ReplaceBackground,
            TaskKind::ReplaceBackgroundColor,
            TaskKind::GetBackgroundMask,
            TaskKind::ApplyStyle,
        ];
        for kind in kinds {
            assert_eq!(TaskKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(TaskKind::parse("resize_image"), None);
    }

    #[test]
    fn test_status_terminality() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn test_task_result_serialization_skips_empty_fields() {
        let result = TaskResult::failed(Uuid::new_v4(), "model call raised");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "failed");
        assert!(value.get("images").is_none());
        assert!(value.get("mask_object_name").is_none());
        assert_eq!(value["error"], "model call raised");
    }

    #[test]
    fn test_role_parse_defaults_to_user() {
        assert_eq!(UserRole::parse("admin"), UserRole::Admin);
        assert_eq!(UserRole::parse("user"), UserRole::User);
        assert_eq!(UserRole::parse("other"), UserRole::User);
    }
}
