use sqlx::SqlitePool;

use crate::db::models::User;
use crate::error::{AppError, AppResult};

pub struct UserRepository;

impl UserRepository {
    pub async fn find_by_username(pool: &SqlitePool, username: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, password_hash, whatsapp_number FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(user)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, password_hash, whatsapp_number FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(user)
    }

    pub async fn list_all(pool: &SqlitePool) -> AppResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            "SELECT id, username, password_hash, whatsapp_number FROM users ORDER BY id",
        )
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(users)
    }

    pub async fn create(
        pool: &SqlitePool,
        username: &str,
        password_hash: &str,
        whatsapp_number: Option<&str>,
    ) -> AppResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, password_hash, whatsapp_number)
            VALUES (?, ?, ?)
            RETURNING id, username, password_hash, whatsapp_number
            "#,
        )
        .bind(username)
        .bind(password_hash)
        .bind(whatsapp_number)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(user)
    }
}
