use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Reminder delivery state for an event.
///
/// The CRUD layer sets `Pending` when a user arms a reminder; the background
/// dispatcher moves it to `Sent` or `Failed` exactly once per reminder.
/// A `Failed` event is never retried automatically; the user has to re-edit
/// the event to arm it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

/// One calendar grid cell, keyed by `(user_id, date, event_col)`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub user_id: i64,
    pub date: NaiveDate,
    pub event_col: i64,
    pub value: String,

    /// When the event itself occurs (informational).
    pub event_datetime: Option<NaiveDateTime>,

    /// Offset the client used to derive `reminder_at`; not interpreted by
    /// the dispatcher.
    pub reminder_minutes_before: Option<i64>,

    /// Absolute instant the reminder should fire. NULL means no reminder.
    pub reminder_at: Option<NaiveDateTime>,

    /// IANA timezone the client used when picking the reminder time.
    pub reminder_timezone: Option<String>,

    pub notification_status: Option<NotificationStatus>,

    /// Set exactly when the status transitions to `Sent`.
    pub notification_sent_at: Option<NaiveDateTime>,
}

/// Reminder fields accepted by the cell-update route.
#[derive(Debug, Clone, Default)]
pub struct ReminderFields {
    pub event_datetime: Option<NaiveDateTime>,
    pub reminder_minutes_before: Option<i64>,
    pub reminder_at: Option<NaiveDateTime>,
    pub reminder_timezone: Option<String>,
    pub notification_status: Option<NotificationStatus>,
}
