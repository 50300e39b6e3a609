use chrono::NaiveDate;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::WhatsAppConfig;
use crate::db::models::{Event, User};
use crate::db::{EventRepository, UserRepository};
use crate::error::{AppError, AppResult};

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Outcome of one digest run, returned to the cron caller.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DigestSummary {
    pub sent: usize,
    /// Users without a WhatsApp number or without events on the date.
    pub skipped: usize,
    pub failed: usize,
}

/// Twilio-backed WhatsApp sender for the daily digest.
///
/// Constructed only when all Twilio credentials are configured; the cron
/// route reports the digest as disabled otherwise.
pub struct WhatsAppService {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from: String,
}

impl WhatsAppService {
    /// Returns `None` unless account SID, auth token and sender number are
    /// all configured.
    pub fn from_config(config: &WhatsAppConfig) -> Option<Self> {
        let account_sid = config.twilio_account_sid.clone()?;
        let auth_token = config.twilio_auth_token.clone()?;
        let from = config.twilio_whatsapp_from.clone()?;
        Some(Self {
            client: reqwest::Client::new(),
            account_sid,
            auth_token,
            from,
        })
    }

    /// Send the digest for `date` to every user with a WhatsApp number.
    ///
    /// Users without a number or without events on that date are skipped;
    /// a Twilio error for one user is counted and logged but never aborts
    /// the run.
    pub async fn send_daily_digest(
        &self,
        pool: &SqlitePool,
        date: NaiveDate,
    ) -> AppResult<DigestSummary> {
        let users = UserRepository::list_all(pool).await?;
        let mut summary = DigestSummary::default();

        for user in &users {
            let Some(number) = user.whatsapp_number.as_deref() else {
                summary.skipped += 1;
                continue;
            };

            let events = EventRepository::list_for_date(pool, user.id, date).await?;
            if events.is_empty() {
                summary.skipped += 1;
                continue;
            }

            let body = format_digest(user, date, &events);
            match self.send_message(number, &body).await {
                Ok(()) => summary.sent += 1,
                Err(err) => {
                    tracing::warn!(
                        "WhatsApp digest failed for user {}: {:?}",
                        user.username,
                        err
                    );
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            "WhatsApp digest for {}: {} sent, {} skipped, {} failed",
            date,
            summary.sent,
            summary.skipped,
            summary.failed
        );
        Ok(summary)
    }

    async fn send_message(&self, to: &str, body: &str) -> AppResult<()> {
        let url = format!(
            "{}/Accounts/{}/Messages.json",
            TWILIO_API_BASE, self.account_sid
        );
        let params = [
            ("To", format!("whatsapp:{to}")),
            ("From", format!("whatsapp:{}", self.from)),
            ("Body", body.to_string()),
        ];

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(AppError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::WhatsApp(format!(
                "Twilio returned {status}: {detail}"
            )));
        }

        Ok(())
    }
}

fn format_digest(user: &User, date: NaiveDate, events: &[Event]) -> String {
    let mut lines = vec![format!(
        "Hi {}! Your events for {}:",
        user.username,
        date.format("%A, %B %-d")
    )];
    for event in events {
        if event.value.is_empty() {
            continue;
        }
        lines.push(format!("- {}", event.value));
    }
    lines.join("\n")
}
