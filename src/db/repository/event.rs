use chrono::{NaiveDate, NaiveDateTime};
use sqlx::{SqliteConnection, SqlitePool};

use crate::db::models::{Event, NotificationStatus, ReminderFields};
use crate::error::{AppError, AppResult};

const EVENT_COLUMNS: &str = r#"
    id,
    user_id,
    date,
    event_col,
    value,
    event_datetime,
    reminder_minutes_before,
    reminder_at,
    reminder_timezone,
    notification_status,
    notification_sent_at
"#;

/// Repository for calendar event rows.
///
/// Besides the CRUD surface used by the HTTP routes, this owns the
/// `notification_status` lifecycle: `fetch_due` selects reminders ready to
/// fire and `mark_sent`/`mark_failed` commit the per-cycle transitions. The
/// transition functions take a `SqliteConnection` so the dispatcher can apply
/// a whole cycle (status updates plus subscription pruning) in one
/// transaction.
pub struct EventRepository;

impl EventRepository {
    /// Events with an armed reminder that has come due, oldest first.
    ///
    /// Due means `notification_status = 'pending'` and a non-null
    /// `reminder_at <= now`. Ordering by `reminder_at` ascending makes sure
    /// the oldest reminders are serviced first when `limit` cuts the batch.
    pub async fn fetch_due(
        pool: &SqlitePool,
        now: NaiveDateTime,
        limit: i64,
    ) -> AppResult<Vec<Event>> {
        let events = sqlx::query_as::<_, Event>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE notification_status = 'pending'
              AND reminder_at IS NOT NULL
              AND reminder_at <= ?
            ORDER BY reminder_at ASC
            LIMIT ?
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(events)
    }

    /// Transition an event to `sent`, stamping `notification_sent_at`.
    pub async fn mark_sent(
        conn: &mut SqliteConnection,
        event_id: i64,
        at: NaiveDateTime,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE events SET notification_status = ?, notification_sent_at = ? WHERE id = ?",
        )
        .bind(NotificationStatus::Sent)
        .bind(at)
        .bind(event_id)
        .execute(conn)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Transition an event to `failed`.
    pub async fn mark_failed(conn: &mut SqliteConnection, event_id: i64) -> AppResult<()> {
        sqlx::query("UPDATE events SET notification_status = ? WHERE id = ?")
            .bind(NotificationStatus::Failed)
            .bind(event_id)
            .execute(conn)
            .await
            .map_err(AppError::Database)?;

        Ok(())
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> AppResult<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(event)
    }

    pub async fn list_month(
        pool: &SqlitePool,
        user_id: i64,
        year: i32,
        month: u32,
    ) -> AppResult<Vec<Event>> {
        let (start, end) = month_bounds(year, month)?;

        let events = sqlx::query_as::<_, Event>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE user_id = ? AND date >= ? AND date < ?
            ORDER BY date, event_col
            "#
        ))
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(events)
    }

    pub async fn list_for_date(
        pool: &SqlitePool,
        user_id: i64,
        date: NaiveDate,
    ) -> AppResult<Vec<Event>> {
        let events = sqlx::query_as::<_, Event>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE user_id = ? AND date = ?
            ORDER BY event_col
            "#
        ))
        .bind(user_id)
        .bind(date)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(events)
    }

    /// Upsert one grid cell with its reminder fields.
    ///
    /// Re-editing a cell replaces the reminder fields wholesale, which is how
    /// a `failed` reminder becomes `pending` again.
    pub async fn upsert_cell(
        pool: &SqlitePool,
        user_id: i64,
        date: NaiveDate,
        event_col: i64,
        value: &str,
        reminder: &ReminderFields,
    ) -> AppResult<Event> {
        let event = sqlx::query_as::<_, Event>(&format!(
            r#"
            INSERT INTO events (
                user_id, date, event_col, value,
                event_datetime, reminder_minutes_before, reminder_at,
                reminder_timezone, notification_status
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, date, event_col) DO UPDATE SET
                value = excluded.value,
                event_datetime = excluded.event_datetime,
                reminder_minutes_before = excluded.reminder_minutes_before,
                reminder_at = excluded.reminder_at,
                reminder_timezone = excluded.reminder_timezone,
                notification_status = excluded.notification_status
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(date)
        .bind(event_col)
        .bind(value)
        .bind(reminder.event_datetime)
        .bind(reminder.reminder_minutes_before)
        .bind(reminder.reminder_at)
        .bind(reminder.reminder_timezone.as_deref())
        .bind(reminder.notification_status)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(event)
    }

    /// Upsert only the display value of a cell, leaving any reminder fields
    /// untouched. Used by the bulk month import.
    pub async fn upsert_value(
        pool: &SqlitePool,
        user_id: i64,
        date: NaiveDate,
        event_col: i64,
        value: &str,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO events (user_id, date, event_col, value)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (user_id, date, event_col) DO UPDATE SET
                value = excluded.value
            "#,
        )
        .bind(user_id)
        .bind(date)
        .bind(event_col)
        .bind(value)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Delete every event of a user in the given month, returning the count.
    pub async fn clear_month(
        pool: &SqlitePool,
        user_id: i64,
        year: i32,
        month: u32,
    ) -> AppResult<u64> {
        let (start, end) = month_bounds(year, month)?;

        let result = sqlx::query("DELETE FROM events WHERE user_id = ? AND date >= ? AND date < ?")
            .bind(user_id)
            .bind(start)
            .bind(end)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    /// Delete one cell; returns whether a row existed.
    pub async fn delete_cell(
        pool: &SqlitePool,
        user_id: i64,
        date: NaiveDate,
        event_col: i64,
    ) -> AppResult<bool> {
        let result =
            sqlx::query("DELETE FROM events WHERE user_id = ? AND date = ? AND event_col = ?")
                .bind(user_id)
                .bind(date)
                .bind(event_col)
                .execute(pool)
                .await
                .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}

/// First day of the month and first day of the following month.
fn month_bounds(year: i32, month: u32) -> AppResult<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| AppError::BadRequest("Invalid year/month".to_string()))?;
    let end = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(|| AppError::BadRequest("Invalid year/month".to_string()))?;

    Ok((start, end))
}
