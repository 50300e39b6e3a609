pub mod auth;
pub mod cron;
pub mod events;
pub mod health;
pub mod push;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use crate::config::Config;
    use crate::AppState;

    /// App state over a migrated in-memory database, no optional
    /// integrations configured.
    pub async fn test_state() -> Arc<AppState> {
        test_state_with(Config::default()).await
    }

    pub async fn test_state_with(mut config: Config) -> Arc<AppState> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect in-memory sqlite");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("run migrations");

        if config.jwt.secret.is_empty() {
            config.jwt.secret = "test-secret".to_string();
        }
        Arc::new(AppState {
            db: pool,
            config,
            whatsapp: None,
        })
    }

    pub fn bearer(state: &Arc<AppState>, user_id: i64) -> String {
        let token = super::auth::create_jwt(state, user_id).expect("mint token");
        format!("Bearer {token}")
    }
}
