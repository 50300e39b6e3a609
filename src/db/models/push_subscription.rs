use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A registered browser/device push endpoint for one user.
///
/// The endpoint URL is globally unique and assigned by the push service;
/// re-subscribing the same endpoint updates the keys and owner in place.
/// Rows are removed by an explicit unsubscribe or by the dispatcher when
/// the push service reports the endpoint permanently gone (404/410).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PushSubscription {
    pub id: i64,
    pub user_id: i64,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub expiration_time: Option<i64>,
    pub user_agent: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Data required to register (or refresh) a push subscription.
#[derive(Debug, Clone)]
pub struct UpsertPushSubscription {
    pub user_id: i64,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub expiration_time: Option<i64>,
    pub user_agent: Option<String>,
}
