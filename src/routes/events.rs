use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::models::{NotificationStatus, ReminderFields};
use crate::db::EventRepository;
use crate::error::AppError;
use crate::routes::auth::AuthUser;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/month", get(get_month).delete(clear_month))
        .route("/cell", post(update_cell))
        .route("/bulk", post(bulk_upsert))
        .route("/delete-bulk", post(bulk_delete))
}

#[derive(Debug, Deserialize)]
pub struct MonthQuery {
    pub year: i32,
    pub month: u32,
}

/// Month view: `{ "<dateISO>": { "Event <col>": value } }`.
async fn get_month(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<MonthQuery>,
) -> Result<Json<Value>, AppError> {
    let events =
        EventRepository::list_month(&state.db, user.id, query.year, query.month).await?;

    let mut result: HashMap<String, HashMap<String, String>> = HashMap::new();
    for event in events {
        result
            .entry(event.date.format("%Y-%m-%d").to_string())
            .or_default()
            .insert(format!("Event {}", event.event_col), event.value);
    }

    Ok(Json(json!(result)))
}

async fn clear_month(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<MonthQuery>,
) -> Result<Json<Value>, AppError> {
    let deleted =
        EventRepository::clear_month(&state.db, user.id, query.year, query.month).await?;
    tracing::info!(
        "Cleared {} event(s) for user {} in {}-{:02}",
        deleted,
        user.id,
        query.year,
        query.month
    );
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCellRequest {
    #[serde(rename = "dateISO")]
    pub date_iso: String,
    pub event_col: i64,
    pub value: String,
    pub event_date_time: Option<String>,
    pub reminder_minutes_before: Option<i64>,
    pub reminder_at: Option<String>,
    pub reminder_timezone: Option<String>,
    pub notification_status: Option<NotificationStatus>,
}

/// Upsert one cell. Reminder fields are replaced wholesale: a re-edit that
/// omits them clears any previous reminder, and one that re-arms the
/// reminder puts the row back to `pending` for the dispatcher.
async fn update_cell(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(request): Json<UpdateCellRequest>,
) -> Result<Json<Value>, AppError> {
    let date = parse_date(&request.date_iso)?;
    let reminder = ReminderFields {
        event_datetime: parse_optional_datetime(request.event_date_time.as_deref())?,
        reminder_minutes_before: request.reminder_minutes_before,
        reminder_at: parse_optional_datetime(request.reminder_at.as_deref())?,
        reminder_timezone: request
            .reminder_timezone
            .filter(|tz| !tz.is_empty()),
        notification_status: request.notification_status,
    };

    EventRepository::upsert_cell(
        &state.db,
        user.id,
        date,
        request.event_col,
        &request.value,
        &reminder,
    )
    .await?;

    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct BulkUpsertRequest {
    pub year: i32,
    pub month: u32,
    pub rows: Vec<Value>,
}

/// Bulk upsert a month grid. Rows outside the target month, empty values
/// and malformed keys are skipped rather than failing the whole request.
async fn bulk_upsert(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(request): Json<BulkUpsertRequest>,
) -> Result<Json<Value>, AppError> {
    for row in &request.rows {
        let Some(date_iso) = row.get("dateISO").and_then(Value::as_str) else {
            continue;
        };
        let Some(events) = row.get("events").and_then(Value::as_object) else {
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(date_iso, "%Y-%m-%d") else {
            continue;
        };
        if date.year() != request.year || date.month() != request.month {
            continue;
        }

        for (key, value) in events {
            let Some(value) = value.as_str().filter(|v| !v.is_empty()) else {
                continue;
            };
            let Some(event_col) = key
                .strip_prefix("Event ")
                .and_then(|n| n.parse::<i64>().ok())
            else {
                continue;
            };

            EventRepository::upsert_value(&state.db, user.id, date, event_col, value).await?;
        }
    }

    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    pub items: Vec<Value>,
}

/// Bulk delete cells, skipping malformed items; returns the deleted count.
async fn bulk_delete(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(request): Json<BulkDeleteRequest>,
) -> Result<Json<Value>, AppError> {
    let mut deleted: u64 = 0;

    for item in &request.items {
        let Some(date_iso) = item.get("dateISO").and_then(Value::as_str) else {
            continue;
        };
        let Some(event_col) = item.get("eventCol").and_then(Value::as_i64) else {
            continue;
        };
        if event_col <= 0 {
            continue;
        }
        let Ok(date) = NaiveDate::parse_from_str(date_iso, "%Y-%m-%d") else {
            continue;
        };

        if EventRepository::delete_cell(&state.db, user.id, date, event_col).await? {
            deleted += 1;
        }
    }

    Ok(Json(json!({ "ok": true, "deleted": deleted })))
}

fn parse_date(date_iso: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(date_iso, "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest("Invalid dateISO format. Use YYYY-MM-DD".to_string()))
}

/// Accepts RFC 3339 (with offset or `Z`, normalized to UTC) or a naive
/// `YYYY-MM-DDTHH:MM:SS` timestamp. Empty strings count as absent.
fn parse_optional_datetime(raw: Option<&str>) -> Result<Option<NaiveDateTime>, AppError> {
    let Some(raw) = raw.filter(|r| !r.is_empty()) else {
        return Ok(None);
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(dt.naive_utc()));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(Some)
        .map_err(|_| AppError::BadRequest(format!("Invalid datetime: {raw}")))
}
