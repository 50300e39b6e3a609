//! Initialization helpers for the application:
//! - database connection + migrations
//! - reminder dispatcher construction
//!
//! This module centralizes bits that used to live in `main.rs`.

use std::path::Path;

use anyhow::Result;

use crate::config::Config;
use crate::services::dispatcher::ReminderDispatcher;
use crate::services::push::WebPushTransport;

/// Redact potentially sensitive information from a database URL before logging.
///
/// Attempts to parse the URL and remove userinfo (username:password) components.
/// Falls back to removing everything before '@' or returning "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let scheme = url.scheme();
        let host = url.host_str().unwrap_or("");
        let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        let path = url.path();
        format!("{}://{}{}{}", scheme, host, port_part, path)
    } else {
        if let Some(at_pos) = db_url.find('@') {
            let without_creds = &db_url[at_pos + 1..];
            return format!("(redacted){}", without_creds);
        }
        "(redacted)".to_string()
    }
}

/// Initialize SQLite database connection and run migrations.
///
/// Creates the parent directory for the database file (if applicable),
/// opens a connection pool using `create_if_missing(true)` and runs migrations.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Build the reminder dispatcher from configuration.
///
/// When the VAPID key pair is missing the dispatcher is created without a
/// transport: it still runs its cycles and settles due reminders as failed,
/// and the gap is logged once here at startup rather than every 30 seconds.
pub fn build_dispatcher(
    config: &Config,
    pool: sqlx::SqlitePool,
) -> Result<ReminderDispatcher<WebPushTransport>> {
    let transport = match config.vapid.keys() {
        Some((private_key, _public_key)) => Some(WebPushTransport::new(
            private_key,
            config.vapid.claims_sub.clone(),
            std::time::Duration::from_secs(config.reminder.send_timeout_seconds),
        )?),
        None => {
            tracing::warn!(
                "VAPID keys not configured; web push reminders will be marked failed"
            );
            None
        }
    };

    Ok(ReminderDispatcher::new(
        pool,
        transport,
        config.reminder.batch_size,
    ))
}
