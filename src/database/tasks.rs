use anyhow::Result;
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use super::{edit_history, images, Database};
use crate::models::{
    EditType, GenerationTask, Image, ImageGenerateRequest, InpaintTask, TaskResult, TaskStatus,
};
use crate::utils::datetime::{format_for_storage, parse_datetime, parse_optional};

fn map_generation_task(row: &sqlx::sqlite::SqliteRow) -> Result<GenerationTask> {
    let result: Option<String> = row.get("result");
    Ok(GenerationTask {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        user_id: Uuid::parse_str(&row.get::<String, _>("user_id"))?,
        queue_task_id: row.get("queue_task_id"),
        status: TaskStatus::parse(&row.get::<String, _>("status")),
        error: row.get("error"),
        prompt: row.get("prompt"),
        negative_prompt: row.get("negative_prompt"),
        width: row.get("width"),
        height: row.get("height"),
        num_images: row.get("num_images"),
        seed: row.get("seed"),
        result: result.map(|s| serde_json::from_str(&s)).transpose()?,
        created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
        started_at: parse_optional(row.get("started_at"))?,
        completed_at: parse_optional(row.get("completed_at"))?,
    })
}

fn map_inpaint_task(row: &sqlx::sqlite::SqliteRow) -> Result<InpaintTask> {
    let result: Option<String> = row.get("result");
    Ok(InpaintTask {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        user_id: Uuid::parse_str(&row.get::<String, _>("user_id"))?,
        queue_task_id: row.get("queue_task_id"),
        status: TaskStatus::parse(&row.get::<String, _>("status")),
        error: row.get("error"),
        original_image_id: Uuid::parse_str(&row.get::<String, _>("original_image_id"))?,
        prompt: row.get("prompt"),
        negative_prompt: row.get("negative_prompt"),
        strength: row.get("strength"),
        guidance_scale: row.get("guidance_scale"),
        num_inference_steps: row.get("num_inference_steps"),
        seed: row.get("seed"),
        mask_object_name: row.get("mask_object_name"),
        result: result.map(|s| serde_json::from_str(&s)).transpose()?,
        created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
        started_at: parse_optional(row.get("started_at"))?,
        completed_at: parse_optional(row.get("completed_at"))?,
    })
}

const GENERATION_COLUMNS: &str = "id, user_id, queue_task_id, status, error, prompt, \
     negative_prompt, width, height, num_images, seed, result, created_at, started_at, \
     completed_at";

const INPAINT_COLUMNS: &str = "id, user_id, queue_task_id, status, error, original_image_id, \
     prompt, negative_prompt, strength, guidance_scale, num_inference_steps, seed, \
     mask_object_name, result, created_at, started_at, completed_at";

impl Database {
    pub async fn create_generation_task(
        &self,
        task_id: Uuid,
        user_id: Uuid,
        request: &ImageGenerateRequest,
    ) -> Result<GenerationTask> {
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO generation_tasks (id, user_id, status, prompt, negative_prompt,
             width, height, num_images, seed, created_at)
             VALUES (?, ?, 'pending', ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task_id.to_string())
        .bind(user_id.to_string())
        .bind(&request.prompt)
        .bind(&request.negative_prompt)
        .bind(request.width)
        .bind(request.height)
        .bind(request.num_images)
        .bind(request.seed)
        .bind(format_for_storage(&now))
        .execute(&self.pool)
        .await?;

        Ok(GenerationTask {
            id: task_id,
            user_id,
            queue_task_id: None,
            status: TaskStatus::Pending,
            error: None,
            prompt: request.prompt.clone(),
            negative_prompt: request.negative_prompt.clone(),
            width: request.width,
            height: request.height,
            num_images: request.num_images,
            seed: request.seed,
            result: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        })
    }

    pub async fn set_generation_queue_task(&self, id: Uuid, queue_task_id: &str) -> Result<()> {
        sqlx::query("UPDATE generation_tasks SET queue_task_id = ? WHERE id = ?")
            .bind(queue_task_id)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_generation_task(&self, id: Uuid) -> Result<Option<GenerationTask>> {
        let row = sqlx::query(&format!(
            "SELECT {GENERATION_COLUMNS} FROM generation_tasks WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_generation_task).transpose()
    }

    /// pending -> processing; keeps the first observed `started_at`.
    pub async fn mark_generation_processing(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE generation_tasks
             SET status = 'processing', started_at = COALESCE(started_at, ?)
             WHERE id = ? AND status IN ('pending', 'processing')",
        )
        .bind(format_for_storage(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Promote a generation task to `completed` and materialize its image
    /// rows in one transaction. The conditional update makes concurrent
    /// polls race safely: only the winner inserts, and the unique
    /// constraint on (task_id, artifact_id) backstops redelivered results.
    /// Returns false when another caller already promoted the row.
    pub async fn complete_generation_task(
        &self,
        task: &GenerationTask,
        result: &TaskResult,
    ) -> Result<bool> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE generation_tasks
             SET status = 'completed', result = ?, completed_at = ?,
                 started_at = COALESCE(started_at, ?)
             WHERE id = ? AND status IN ('pending', 'processing')",
        )
        .bind(serde_json::to_string(result)?)
        .bind(format_for_storage(&now))
        .bind(format_for_storage(&now))
        .bind(task.id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for artifact in &result.images {
            let image = Image {
                id: Uuid::new_v4(),
                user_id: task.user_id,
                task_id: Some(task.id),
                url: artifact.url.clone(),
                thumbnail_url: None,
                object_name: artifact.object_name.clone(),
                prompt: task.prompt.clone(),
                negative_prompt: task.negative_prompt.clone(),
                width: artifact.width,
                height: artifact.height,
                seed: artifact.seed,
                is_favorite: false,
                folder_id: None,
                metadata: serde_json::json!({}),
                created_at: now,
            };
            images::insert_image_in_tx(&mut tx, &image, artifact.id).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    pub async fn fail_generation_task(&self, id: Uuid, error: &str) -> Result<bool> {
        let now = Utc::now();
        let updated = sqlx::query(
            "UPDATE generation_tasks
             SET status = 'failed', error = ?, completed_at = ?,
                 started_at = COALESCE(started_at, ?)
             WHERE id = ? AND status IN ('pending', 'processing')",
        )
        .bind(error)
        .bind(format_for_storage(&now))
        .bind(format_for_storage(&now))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn count_generation_tasks(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM generation_tasks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Whether any generation job has ever completed; used to decide the
    /// one-time model-load penalty in time estimates.
    pub async fn generation_pipeline_observed(&self) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM generation_tasks WHERE status = 'completed'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn create_inpaint_task(&self, task: &InpaintTask) -> Result<()> {
        sqlx::query(
            "INSERT INTO inpaint_tasks (id, user_id, status, original_image_id, prompt,
             negative_prompt, strength, guidance_scale, num_inference_steps, seed, created_at)
             VALUES (?, ?, 'pending', ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task.id.to_string())
        .bind(task.user_id.to_string())
        .bind(task.original_image_id.to_string())
        .bind(&task.prompt)
        .bind(&task.negative_prompt)
        .bind(task.strength)
        .bind(task.guidance_scale)
        .bind(task.num_inference_steps)
        .bind(task.seed)
        .bind(format_for_storage(&task.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_inpaint_queue_task(&self, id: Uuid, queue_task_id: &str) -> Result<()> {
        sqlx::query("UPDATE inpaint_tasks SET queue_task_id = ? WHERE id = ?")
            .bind(queue_task_id)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_inpaint_task(&self, id: Uuid) -> Result<Option<InpaintTask>> {
        let row = sqlx::query(&format!(
            "SELECT {INPAINT_COLUMNS} FROM inpaint_tasks WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_inpaint_task).transpose()
    }

    pub async fn mark_inpaint_processing(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE inpaint_tasks
             SET status = 'processing', started_at = COALESCE(started_at, ?)
             WHERE id = ? AND status IN ('pending', 'processing')",
        )
        .bind(format_for_storage(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Promote an inpaint task and materialize its `Image` and
    /// `EditHistory` rows atomically. Same idempotence contract as
    /// [`Database::complete_generation_task`].
    pub async fn complete_inpaint_task(
        &self,
        task: &InpaintTask,
        result: &TaskResult,
    ) -> Result<bool> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE inpaint_tasks
             SET status = 'completed', result = ?, mask_object_name = ?, completed_at = ?,
                 started_at = COALESCE(started_at, ?)
             WHERE id = ? AND status IN ('pending', 'processing')",
        )
        .bind(serde_json::to_string(result)?)
        .bind(&result.mask_object_name)
        .bind(format_for_storage(&now))
        .bind(format_for_storage(&now))
        .bind(task.id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for artifact in &result.images {
            let image = Image {
                id: Uuid::new_v4(),
                user_id: task.user_id,
                task_id: Some(task.id),
                url: artifact.url.clone(),
                thumbnail_url: None,
                object_name: artifact.object_name.clone(),
                prompt: task.prompt.clone(),
                negative_prompt: task.negative_prompt.clone(),
                width: artifact.width,
                height: artifact.height,
                seed: artifact.seed,
                is_favorite: false,
                folder_id: None,
                metadata: serde_json::json!({ "original_image_id": task.original_image_id }),
                created_at: now,
            };
            images::insert_image_in_tx(&mut tx, &image, artifact.id).await?;

            let history = crate::models::EditHistory {
                id: Uuid::new_v4(),
                user_id: task.user_id,
                original_image_id: task.original_image_id,
                edited_image_id: image.id,
                inpaint_task_id: Some(task.id),
                edit_type: EditType::Inpaint,
                prompt: Some(task.prompt.clone()),
                negative_prompt: task.negative_prompt.clone(),
                strength: Some(task.strength),
                mask_object_name: result.mask_object_name.clone(),
                original_thumbnail_url: None,
                edited_thumbnail_url: None,
                edit_metadata: serde_json::json!({
                    "guidance_scale": task.guidance_scale,
                    "num_inference_steps": task.num_inference_steps,
                    "seed": task.seed,
                }),
                created_at: now,
            };
            edit_history::insert_history_in_tx(&mut tx, &history).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Materialize the `Image` and `EditHistory` rows for an edit job
    /// that has no durable task row (background, style). Safe to call on
    /// every poll: the image insert dedupes on (task_id, artifact_id),
    /// the history insert on edited_image_id, and the history row always
    /// references the image row that actually stuck.
    pub async fn materialize_ephemeral_edit(
        &self,
        user_id: Uuid,
        task_id: Uuid,
        artifact: &crate::models::ArtifactInfo,
        original_image_id: Uuid,
        edit_type: EditType,
        prompt: Option<&str>,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let image = Image {
            id: Uuid::new_v4(),
            user_id,
            task_id: Some(task_id),
            url: artifact.url.clone(),
            thumbnail_url: None,
            object_name: artifact.object_name.clone(),
            prompt: prompt.unwrap_or(edit_type.as_str()).to_string(),
            negative_prompt: None,
            width: artifact.width,
            height: artifact.height,
            seed: artifact.seed,
            is_favorite: false,
            folder_id: None,
            metadata: serde_json::json!({ "original_image_id": original_image_id }),
            created_at: now,
        };
        images::insert_image_in_tx(&mut tx, &image, artifact.id).await?;

        // The insert may have been a no-op; link history to whichever
        // image row owns this artifact.
        let stored_id: String = sqlx::query_scalar(
            "SELECT id FROM images WHERE task_id = ? AND artifact_id = ?",
        )
        .bind(task_id.to_string())
        .bind(artifact.id.to_string())
        .fetch_one(&mut *tx)
        .await?;

        let history = crate::models::EditHistory {
            id: Uuid::new_v4(),
            user_id,
            original_image_id,
            edited_image_id: Uuid::parse_str(&stored_id)?,
            inpaint_task_id: None,
            edit_type,
            prompt: prompt.map(str::to_string),
            negative_prompt: None,
            strength: None,
            mask_object_name: None,
            original_thumbnail_url: None,
            edited_thumbnail_url: None,
            edit_metadata: metadata,
            created_at: now,
        };
        edit_history::insert_history_in_tx(&mut tx, &history).await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn fail_inpaint_task(&self, id: Uuid, error: &str) -> Result<bool> {
        let now = Utc::now();
        let updated = sqlx::query(
            "UPDATE inpaint_tasks
             SET status = 'failed', error = ?, completed_at = ?,
                 started_at = COALESCE(started_at, ?)
             WHERE id = ? AND status IN ('pending', 'processing')",
        )
        .bind(error)
        .bind(format_for_storage(&now))
        .bind(format_for_storage(&now))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArtifactInfo;

    fn generate_request() -> ImageGenerateRequest {
        ImageGenerateRequest {
            prompt: "a cat".to_string(),
            negative_prompt: None,
            width: 1024,
            height: 1024,
            num_images: 1,
            seed: Some(42),
        }
    }

    fn completed_result(task_id: Uuid, artifacts: usize) -> TaskResult {
        let mut result = TaskResult::completed(task_id);
        for _ in 0..artifacts {
            result.images.push(ArtifactInfo {
                id: Uuid::new_v4(),
                url: "http://localhost:9020/lumen-images/images/u/t/a.png".to_string(),
                object_name: "images/u/t/a.png".to_string(),
                width: 1024,
                height: 1024,
                seed: Some(42),
            });
        }
        result
    }

    #[tokio::test]
    async fn test_generation_lifecycle() {
        let db = Database::connect_memory().await.unwrap();
        db.migrate().await.unwrap();

        let task_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let task = db
            .create_generation_task(task_id, user_id, &generate_request())
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        db.set_generation_queue_task(task_id, &task_id.to_string())
            .await
            .unwrap();
        db.mark_generation_processing(task_id).await.unwrap();

        let loaded = db.get_generation_task(task_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Processing);
        assert!(loaded.started_at.is_some());

        let result = completed_result(task_id, 2);
        assert!(db.complete_generation_task(&loaded, &result).await.unwrap());

        let done = db.get_generation_task(task_id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.completed_at.is_some());
        assert!(done.started_at.unwrap() <= done.completed_at.unwrap());
        assert_eq!(db.count_images_for_task(task_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_completion_is_idempotent_under_concurrent_polls() {
        let db = Database::connect_memory().await.unwrap();
        db.migrate().await.unwrap();

        let task_id = Uuid::new_v4();
        let task = db
            .create_generation_task(task_id, Uuid::new_v4(), &generate_request())
            .await
            .unwrap();

        let result = completed_result(task_id, 1);
        assert!(db.complete_generation_task(&task, &result).await.unwrap());
        // Second observer of the same result must not double-insert.
        assert!(!db.complete_generation_task(&task, &result).await.unwrap());
        assert_eq!(db.count_images_for_task(task_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_terminal_state_does_not_transition() {
        let db = Database::connect_memory().await.unwrap();
        db.migrate().await.unwrap();

        let task_id = Uuid::new_v4();
        let task = db
            .create_generation_task(task_id, Uuid::new_v4(), &generate_request())
            .await
            .unwrap();

        assert!(db.fail_generation_task(task_id, "boom").await.unwrap());
        // Already failed: neither completion nor a second failure applies.
        let result = completed_result(task_id, 1);
        assert!(!db.complete_generation_task(&task, &result).await.unwrap());
        assert!(!db.fail_generation_task(task_id, "again").await.unwrap());

        let loaded = db.get_generation_task(task_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_ephemeral_edit_materializes_once() {
        let db = Database::connect_memory().await.unwrap();
        db.migrate().await.unwrap();

        let user = Uuid::new_v4();
        let task_id = Uuid::new_v4();
        let original = Uuid::new_v4();
        let artifact = ArtifactInfo {
            id: Uuid::new_v4(),
            url: "http://localhost:9020/lumen-images/images/u/t/a.png".to_string(),
            object_name: format!("images/{user}/{task_id}/a.png"),
            width: 512,
            height: 512,
            seed: None,
        };

        for _ in 0..3 {
            db.materialize_ephemeral_edit(
                user,
                task_id,
                &artifact,
                original,
                EditType::Background,
                None,
                serde_json::json!({}),
            )
            .await
            .unwrap();
        }

        assert_eq!(db.count_images_for_task(task_id).await.unwrap(), 1);
        let (items, total) = db.list_edit_history(user, 1, 20).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].edit_type, EditType::Background);
        assert_eq!(items[0].original_image_id, original);
    }

    #[tokio::test]
    async fn test_inpaint_completion_writes_history_once() {
        let db = Database::connect_memory().await.unwrap();
        db.migrate().await.unwrap();

        let task_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let original_image_id = Uuid::new_v4();
        let task = InpaintTask {
            id: task_id,
            user_id,
            queue_task_id: None,
            status: TaskStatus::Pending,
            error: None,
            original_image_id,
            prompt: "replace sky".to_string(),
            negative_prompt: None,
            strength: 0.85,
            guidance_scale: 7.5,
            num_inference_steps: 30,
            seed: None,
            mask_object_name: None,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        db.create_inpaint_task(&task).await.unwrap();

        let mut result = completed_result(task_id, 1);
        result.mask_object_name = Some("masks/u/t/m.png".to_string());

        assert!(db.complete_inpaint_task(&task, &result).await.unwrap());
        assert!(!db.complete_inpaint_task(&task, &result).await.unwrap());

        let loaded = db.get_inpaint_task(task_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Completed);
        assert_eq!(loaded.mask_object_name.as_deref(), Some("masks/u/t/m.png"));

        let (items, total) = db.list_edit_history(user_id, 1, 20).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].original_image_id, original_image_id);
        assert_eq!(items[0].mask_object_name.as_deref(), Some("masks/u/t/m.png"));
    }
}
