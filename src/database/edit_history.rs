use anyhow::Result;
use sqlx::Row;
use uuid::Uuid;

use super::Database;
use crate::models::{EditHistory, EditType};
use crate::utils::datetime::{format_for_storage, parse_datetime};

fn map_history(row: &sqlx::sqlite::SqliteRow) -> Result<EditHistory> {
    let metadata: String = row.get("edit_metadata");
    let inpaint_task_id: Option<String> = row.get("inpaint_task_id");
    Ok(EditHistory {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        user_id: Uuid::parse_str(&row.get::<String, _>("user_id"))?,
        original_image_id: Uuid::parse_str(&row.get::<String, _>("original_image_id"))?,
        edited_image_id: Uuid::parse_str(&row.get::<String, _>("edited_image_id"))?,
        inpaint_task_id: inpaint_task_id.map(|s| Uuid::parse_str(&s)).transpose()?,
        edit_type: EditType::parse(&row.get::<String, _>("edit_type")),
        prompt: row.get("prompt"),
        negative_prompt: row.get("negative_prompt"),
        strength: row.get("strength"),
        mask_object_name: row.get("mask_object_name"),
        original_thumbnail_url: row.get("original_thumbnail_url"),
        edited_thumbnail_url: row.get("edited_thumbnail_url"),
        edit_metadata: serde_json::from_str(&metadata).unwrap_or_else(|_| serde_json::json!({})),
        created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
    })
}

const HISTORY_COLUMNS: &str = "id, user_id, original_image_id, edited_image_id, inpaint_task_id, \
     edit_type, prompt, negative_prompt, strength, mask_object_name, original_thumbnail_url, \
     edited_thumbnail_url, edit_metadata, created_at";

/// Insert inside a caller-owned transaction. The UNIQUE(edited_image_id)
/// constraint makes a replayed completion a no-op.
pub(crate) async fn insert_history_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    history: &EditHistory,
) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO edit_history (id, user_id, original_image_id, edited_image_id,
         inpaint_task_id, edit_type, prompt, negative_prompt, strength, mask_object_name,
         original_thumbnail_url, edited_thumbnail_url, edit_metadata, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(history.id.to_string())
    .bind(history.user_id.to_string())
    .bind(history.original_image_id.to_string())
    .bind(history.edited_image_id.to_string())
    .bind(history.inpaint_task_id.map(|id| id.to_string()))
    .bind(history.edit_type.as_str())
    .bind(&history.prompt)
    .bind(&history.negative_prompt)
    .bind(history.strength)
    .bind(&history.mask_object_name)
    .bind(&history.original_thumbnail_url)
    .bind(&history.edited_thumbnail_url)
    .bind(serde_json::to_string(&history.edit_metadata)?)
    .bind(format_for_storage(&history.created_at))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

impl Database {
    pub async fn insert_edit_history(&self, history: &EditHistory) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_history_in_tx(&mut tx, history).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_edit_history(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<EditHistory>> {
        let row = sqlx::query(&format!(
            "SELECT {HISTORY_COLUMNS} FROM edit_history WHERE id = ? AND user_id = ?"
        ))
        .bind(id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_history).transpose()
    }

    pub async fn list_edit_history(
        &self,
        user_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<EditHistory>, i64)> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM edit_history WHERE user_id = ?",
        )
        .bind(user_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        let offset = (page.saturating_sub(1)) * page_size;
        let rows = sqlx::query(&format!(
            "SELECT {HISTORY_COLUMNS} FROM edit_history WHERE user_id = ?
             ORDER BY created_at DESC LIMIT ? OFFSET ?"
        ))
        .bind(user_id.to_string())
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(map_history(row)?);
        }
        Ok((items, total))
    }

    /// History entries where the image appears on either side of the edit.
    pub async fn list_edit_history_for_image(
        &self,
        image_id: Uuid,
        user_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<EditHistory>, i64)> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM edit_history
             WHERE user_id = ? AND (original_image_id = ? OR edited_image_id = ?)",
        )
        .bind(user_id.to_string())
        .bind(image_id.to_string())
        .bind(image_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        let offset = (page.saturating_sub(1)) * page_size;
        let rows = sqlx::query(&format!(
            "SELECT {HISTORY_COLUMNS} FROM edit_history
             WHERE user_id = ? AND (original_image_id = ? OR edited_image_id = ?)
             ORDER BY created_at DESC LIMIT ? OFFSET ?"
        ))
        .bind(user_id.to_string())
        .bind(image_id.to_string())
        .bind(image_id.to_string())
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(map_history(row)?);
        }
        Ok((items, total))
    }

    /// Removes the row and returns the mask object key, if any, so the
    /// caller can schedule the object deletion.
    pub async fn delete_edit_history(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Option<String>>> {
        let Some(history) = self.get_edit_history(id, user_id).await? else {
            return Ok(None);
        };

        sqlx::query("DELETE FROM edit_history WHERE id = ? AND user_id = ?")
            .bind(id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(Some(history.mask_object_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_history(user_id: Uuid, original: Uuid, edited: Uuid) -> EditHistory {
        EditHistory {
            id: Uuid::new_v4(),
            user_id,
            original_image_id: original,
            edited_image_id: edited,
            inpaint_task_id: None,
            edit_type: EditType::Inpaint,
            prompt: Some("replace sky".to_string()),
            negative_prompt: None,
            strength: Some(0.85),
            mask_object_name: Some("masks/u/t/m.png".to_string()),
            original_thumbnail_url: None,
            edited_thumbnail_url: None,
            edit_metadata: serde_json::json!({ "guidance_scale": 7.5 }),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_history_lists_by_image_on_either_side() {
        let db = Database::connect_memory().await.unwrap();
        db.migrate().await.unwrap();

        let user = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        db.insert_edit_history(&sample_history(user, a, b)).await.unwrap();
        db.insert_edit_history(&sample_history(user, b, c)).await.unwrap();

        let (for_b, total) = db
            .list_edit_history_for_image(b, user, 1, 20)
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(for_b.len(), 2);

        let (for_a, total_a) = db
            .list_edit_history_for_image(a, user, 1, 20)
            .await
            .unwrap();
        assert_eq!(total_a, 1);
        assert_eq!(for_a[0].edited_image_id, b);
    }

    #[tokio::test]
    async fn test_duplicate_edited_image_ignored() {
        let db = Database::connect_memory().await.unwrap();
        db.migrate().await.unwrap();

        let user = Uuid::new_v4();
        let edited = Uuid::new_v4();
        db.insert_edit_history(&sample_history(user, Uuid::new_v4(), edited))
            .await
            .unwrap();
        db.insert_edit_history(&sample_history(user, Uuid::new_v4(), edited))
            .await
            .unwrap();

        let (_, total) = db.list_edit_history(user, 1, 20).await.unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_delete_returns_mask_key_and_scopes_to_owner() {
        let db = Database::connect_memory().await.unwrap();
        db.migrate().await.unwrap();

        let user = Uuid::new_v4();
        let history = sample_history(user, Uuid::new_v4(), Uuid::new_v4());
        db.insert_edit_history(&history).await.unwrap();

        assert!(db
            .delete_edit_history(history.id, Uuid::new_v4())
            .await
            .unwrap()
            .is_none());

        let mask = db
            .delete_edit_history(history.id, user)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mask.as_deref(), Some("masks/u/t/m.png"));
        assert!(db.get_edit_history(history.id, user).await.unwrap().is_none());
    }
}
