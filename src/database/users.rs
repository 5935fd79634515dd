use anyhow::Result;
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use super::Database;
use crate::models::{User, UserRole};
use crate::utils::datetime::{format_for_storage, parse_datetime};

fn map_user(row: &sqlx::sqlite::SqliteRow) -> Result<User> {
    Ok(User {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        name: row.get("name"),
        role: UserRole::parse(&row.get::<String, _>("role")),
        is_active: row.get("is_active"),
        created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
        updated_at: parse_datetime(&row.get::<String, _>("updated_at"))?,
    })
}

impl Database {
    pub async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        name: &str,
    ) -> Result<User> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO users (id, email, password_hash, name, role, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, 'user', TRUE, ?, ?)",
        )
        .bind(id.to_string())
        .bind(email)
        .bind(password_hash)
        .bind(name)
        .bind(format_for_storage(&now))
        .bind(format_for_storage(&now))
        .execute(&self.pool)
        .await?;

        Ok(User {
            id,
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            name: name.to_string(),
            role: UserRole::User,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, email, password_hash, name, role, is_active, created_at, updated_at
             FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_user).transpose()
    }

    pub async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, email, password_hash, name, role, is_active, created_at, updated_at
             FROM users WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_user).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_fetch_user() {
        let db = Database::connect_memory().await.unwrap();
        db.migrate().await.unwrap();

        let user = db
            .create_user("a@b.c", "$2b$12$hash", "Al")
            .await
            .unwrap();
        assert_eq!(user.role, UserRole::User);
        assert!(user.is_active);

        let by_email = db.get_user_by_email("a@b.c").await.unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
        assert_eq!(by_email.name, "Al");

        let by_id = db.get_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(by_id.email, "a@b.c");

        assert!(db.get_user_by_email("x@y.z").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let db = Database::connect_memory().await.unwrap();
        db.migrate().await.unwrap();

        db.create_user("a@b.c", "h1", "Al").await.unwrap();
        assert!(db.create_user("a@b.c", "h2", "Bo").await.is_err());
    }
}
