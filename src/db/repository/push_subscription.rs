use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use crate::db::models::{PushSubscription, UpsertPushSubscription};
use crate::error::{AppError, AppResult};

const SUBSCRIPTION_COLUMNS: &str = r#"
    id,
    user_id,
    endpoint,
    p256dh,
    auth,
    expiration_time,
    user_agent,
    created_at,
    updated_at
"#;

/// Repository for web-push subscription endpoints.
///
/// Endpoints are unique across users; a re-subscribe of a known endpoint
/// refreshes its keys, owner and metadata instead of inserting a duplicate.
pub struct PushSubscriptionRepository;

impl PushSubscriptionRepository {
    /// All subscriptions of a user, ordered by id for determinism.
    pub async fn list_for_user(pool: &SqlitePool, user_id: i64) -> AppResult<Vec<PushSubscription>> {
        let subscriptions = sqlx::query_as::<_, PushSubscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM push_subscriptions
            WHERE user_id = ?
            ORDER BY id
            "#
        ))
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(subscriptions)
    }

    /// Insert a subscription or refresh an existing endpoint in place.
    pub async fn upsert(
        pool: &SqlitePool,
        subscription: UpsertPushSubscription,
    ) -> AppResult<PushSubscription> {
        let now = Utc::now().naive_utc();

        let row = sqlx::query_as::<_, PushSubscription>(&format!(
            r#"
            INSERT INTO push_subscriptions (
                user_id, endpoint, p256dh, auth,
                expiration_time, user_agent, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (endpoint) DO UPDATE SET
                user_id = excluded.user_id,
                p256dh = excluded.p256dh,
                auth = excluded.auth,
                expiration_time = excluded.expiration_time,
                user_agent = excluded.user_agent,
                updated_at = excluded.updated_at
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(subscription.user_id)
        .bind(&subscription.endpoint)
        .bind(&subscription.p256dh)
        .bind(&subscription.auth)
        .bind(subscription.expiration_time)
        .bind(subscription.user_agent.as_deref())
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Delete a user's subscription by endpoint; returns the deleted count.
    /// Idempotent: deleting an unknown endpoint is a no-op.
    pub async fn delete_for_user(
        pool: &SqlitePool,
        user_id: i64,
        endpoint: &str,
    ) -> AppResult<u64> {
        let result =
            sqlx::query("DELETE FROM push_subscriptions WHERE user_id = ? AND endpoint = ?")
                .bind(user_id)
                .bind(endpoint)
                .execute(pool)
                .await
                .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    /// Delete a subscription the push service reported as permanently gone.
    /// Runs on the dispatcher's cycle transaction.
    pub async fn delete_by_id(conn: &mut SqliteConnection, id: i64) -> AppResult<()> {
        sqlx::query("DELETE FROM push_subscriptions WHERE id = ?")
            .bind(id)
            .execute(conn)
            .await
            .map_err(AppError::Database)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::UserRepository;

    async fn test_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect in-memory sqlite");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("run migrations");
        pool
    }

    fn subscription(user_id: i64, endpoint: &str) -> UpsertPushSubscription {
        UpsertPushSubscription {
            user_id,
            endpoint: endpoint.to_string(),
            p256dh: "p256".to_string(),
            auth: "auth".to_string(),
            expiration_time: None,
            user_agent: Some("Firefox".to_string()),
        }
    }

    #[tokio::test]
    async fn resubscribe_updates_in_place() {
        let pool = test_pool().await;
        let user_id = UserRepository::create(&pool, "alice", "hash", None)
            .await
            .unwrap()
            .id;

        let first = PushSubscriptionRepository::upsert(
            &pool,
            subscription(user_id, "https://push.example/abc"),
        )
        .await
        .unwrap();

        let mut refreshed = subscription(user_id, "https://push.example/abc");
        refreshed.p256dh = "rotated".to_string();
        let second = PushSubscriptionRepository::upsert(&pool, refreshed)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.p256dh, "rotated");

        let subs = PushSubscriptionRepository::list_for_user(&pool, user_id)
            .await
            .unwrap();
        assert_eq!(subs.len(), 1);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let pool = test_pool().await;
        let user_id = UserRepository::create(&pool, "alice", "hash", None)
            .await
            .unwrap()
            .id;

        PushSubscriptionRepository::upsert(&pool, subscription(user_id, "https://push.example/abc"))
            .await
            .unwrap();

        let deleted = PushSubscriptionRepository::delete_for_user(
            &pool,
            user_id,
            "https://push.example/abc",
        )
        .await
        .unwrap();
        assert_eq!(deleted, 1);

        let deleted = PushSubscriptionRepository::delete_for_user(
            &pool,
            user_id,
            "https://push.example/abc",
        )
        .await
        .unwrap();
        assert_eq!(deleted, 0);
    }
}
