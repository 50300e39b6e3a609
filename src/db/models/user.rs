use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,

    /// WhatsApp recipient in `whatsapp:+<country><number>` form; users
    /// without a number are skipped by the daily digest.
    pub whatsapp_number: Option<String>,
}
