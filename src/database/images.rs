use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, Utc};
use sqlx::Row;
use uuid::Uuid;

use super::Database;
use crate::models::Image;
use crate::utils::datetime::{format_for_storage, parse_datetime};

fn map_image(row: &sqlx::sqlite::SqliteRow) -> Result<Image> {
    let metadata: String = row.get("metadata");
    let folder_id: Option<String> = row.get("folder_id");
    let task_id: Option<String> = row.get("task_id");
    Ok(Image {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        user_id: Uuid::parse_str(&row.get::<String, _>("user_id"))?,
        task_id: task_id.map(|s| Uuid::parse_str(&s)).transpose()?,
        url: row.get("url"),
        thumbnail_url: row.get("thumbnail_url"),
        object_name: row.get("object_name"),
        prompt: row.get("prompt"),
        negative_prompt: row.get("negative_prompt"),
        width: row.get("width"),
        height: row.get("height"),
        seed: row.get("seed"),
        is_favorite: row.get("is_favorite"),
        folder_id: folder_id.map(|s| Uuid::parse_str(&s)).transpose()?,
        metadata: serde_json::from_str(&metadata).unwrap_or_else(|_| serde_json::json!({})),
        created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
    })
}

const IMAGE_COLUMNS: &str = "id, user_id, task_id, url, thumbnail_url, object_name, prompt, \
     negative_prompt, width, height, seed, is_favorite, folder_id, metadata, created_at";

/// Insert inside a caller-owned transaction. `INSERT OR IGNORE` plus the
/// UNIQUE(task_id, artifact_id) constraint keeps replayed worker results
/// from duplicating rows.
pub(crate) async fn insert_image_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    image: &Image,
    artifact_id: Uuid,
) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO images (id, user_id, task_id, artifact_id, url, thumbnail_url,
         object_name, prompt, negative_prompt, width, height, seed, is_favorite, folder_id,
         metadata, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(image.id.to_string())
    .bind(image.user_id.to_string())
    .bind(image.task_id.map(|id| id.to_string()))
    .bind(artifact_id.to_string())
    .bind(&image.url)
    .bind(&image.thumbnail_url)
    .bind(&image.object_name)
    .bind(&image.prompt)
    .bind(&image.negative_prompt)
    .bind(image.width)
    .bind(image.height)
    .bind(image.seed)
    .bind(image.is_favorite)
    .bind(image.folder_id.map(|id| id.to_string()))
    .bind(serde_json::to_string(&image.metadata)?)
    .bind(format_for_storage(&image.created_at))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

impl Database {
    pub async fn insert_image(&self, image: &Image, artifact_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_image_in_tx(&mut tx, image, artifact_id).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_image(&self, id: Uuid, user_id: Uuid) -> Result<Option<Image>> {
        let row = sqlx::query(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images WHERE id = ? AND user_id = ?"
        ))
        .bind(id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_image).transpose()
    }

    pub async fn list_images(
        &self,
        user_id: Uuid,
        page: u32,
        limit: u32,
        favorites_only: bool,
        search: Option<&str>,
    ) -> Result<(Vec<Image>, i64)> {
        let mut filters = String::from("WHERE user_id = ?");
        if favorites_only {
            filters.push_str(" AND is_favorite = TRUE");
        }
        if search.is_some() {
            filters.push_str(" AND prompt LIKE ?");
        }
        let pattern = search.map(|s| format!("%{s}%"));

        let count_sql = format!("SELECT COUNT(*) FROM images {filters}");
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql).bind(user_id.to_string());
        if let Some(ref pattern) = pattern {
            count_query = count_query.bind(pattern);
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let offset = (page.saturating_sub(1)) * limit;
        let list_sql = format!(
            "SELECT {IMAGE_COLUMNS} FROM images {filters}
             ORDER BY created_at DESC LIMIT ? OFFSET ?"
        );
        let mut list_query = sqlx::query(&list_sql).bind(user_id.to_string());
        if let Some(ref pattern) = pattern {
            list_query = list_query.bind(pattern);
        }
        let rows = list_query
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let mut images = Vec::with_capacity(rows.len());
        for row in &rows {
            images.push(map_image(row)?);
        }
        Ok((images, total))
    }

    pub async fn toggle_image_favorite(&self, id: Uuid, user_id: Uuid) -> Result<Option<Image>> {
        let updated = sqlx::query(
            "UPDATE images SET is_favorite = NOT is_favorite WHERE id = ? AND user_id = ?",
        )
        .bind(id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Ok(None);
        }
        self.get_image(id, user_id).await
    }

    pub async fn delete_image(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM images WHERE id = ? AND user_id = ?")
            .bind(id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    pub async fn count_images(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM images")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_images_since(&self, since: DateTime<Utc>) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM images WHERE created_at >= ?")
            .bind(format_for_storage(&since))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_images_for_task(&self, task_id: Uuid) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM images WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Day, week and month boundaries for the gallery stats endpoint.
    pub fn stats_window_starts(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>, DateTime<Utc>) {
        let today = now.date_naive().and_time(chrono::NaiveTime::MIN).and_utc();
        let week = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
        let month = match today.date_naive().with_day(1) {
            Some(first) => first.and_time(chrono::NaiveTime::MIN).and_utc(),
            None => today,
        };
        (today, week, month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_image(user_id: Uuid, prompt: &str, favorite: bool) -> Image {
        Image {
            id: Uuid::new_v4(),
            user_id,
            task_id: Some(Uuid::new_v4()),
            url: "http://localhost:9020/lumen-images/images/u/t/a.png".to_string(),
            thumbnail_url: None,
            object_name: "images/u/t/a.png".to_string(),
            prompt: prompt.to_string(),
            negative_prompt: None,
            width: 512,
            height: 512,
            seed: None,
            is_favorite: favorite,
            folder_id: None,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_gallery_filters_and_pagination() {
        let db = Database::connect_memory().await.unwrap();
        db.migrate().await.unwrap();

        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        db.insert_image(&sample_image(user, "a cat", true), Uuid::new_v4())
            .await
            .unwrap();
        db.insert_image(&sample_image(user, "a dog", false), Uuid::new_v4())
            .await
            .unwrap();
        db.insert_image(&sample_image(other, "a cat", false), Uuid::new_v4())
            .await
            .unwrap();

        let (all, total) = db.list_images(user, 1, 20, false, None).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(all.len(), 2);

        let (favs, fav_total) = db.list_images(user, 1, 20, true, None).await.unwrap();
        assert_eq!(fav_total, 1);
        assert!(favs[0].is_favorite);

        let (cats, cat_total) = db.list_images(user, 1, 20, false, Some("cat")).await.unwrap();
        assert_eq!(cat_total, 1);
        assert_eq!(cats[0].prompt, "a cat");
    }

    #[tokio::test]
    async fn test_favorite_toggle_and_delete_scoped_to_owner() {
        let db = Database::connect_memory().await.unwrap();
        db.migrate().await.unwrap();

        let user = Uuid::new_v4();
        let intruder = Uuid::new_v4();
        let image = sample_image(user, "a cat", false);
        db.insert_image(&image, Uuid::new_v4()).await.unwrap();

        assert!(db
            .toggle_image_favorite(image.id, intruder)
            .await
            .unwrap()
            .is_none());
        let toggled = db
            .toggle_image_favorite(image.id, user)
            .await
            .unwrap()
            .unwrap();
        assert!(toggled.is_favorite);

        assert!(!db.delete_image(image.id, intruder).await.unwrap());
        assert!(db.delete_image(image.id, user).await.unwrap());
        assert!(db.get_image(image.id, user).await.unwrap().is_none());
    }

    #[test]
    fn test_stats_window_starts() {
        // 2026-07-15 is a Wednesday.
        let now = Utc.with_ymd_and_hms(2026, 7, 15, 13, 45, 0).unwrap();
        let (today, week, month) = Database::stats_window_starts(now);
        assert_eq!(today, Utc.with_ymd_and_hms(2026, 7, 15, 0, 0, 0).unwrap());
        assert_eq!(week, Utc.with_ymd_and_hms(2026, 7, 13, 0, 0, 0).unwrap());
        assert_eq!(month, Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap());
    }
}
