use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::db::models::Event;
use crate::db::{EventRepository, PushSubscriptionRepository};
use crate::error::{AppError, AppResult};
use crate::services::push::{DeliveryError, PushTransport};

/// Push message payload shown by the service worker. Field names are part
/// of the client contract.
#[derive(Debug, Clone, Serialize)]
pub struct ReminderPayload {
    pub title: String,
    pub body: String,
    #[serde(rename = "dateISO")]
    pub date_iso: String,
    #[serde(rename = "eventCol")]
    pub event_col: i64,
}

impl ReminderPayload {
    fn for_event(event: &Event) -> Self {
        let body = if event.value.is_empty() {
            "You have an upcoming event.".to_string()
        } else {
            event.value.clone()
        };
        Self {
            title: "Event Reminder".to_string(),
            body,
            date_iso: event.date.format("%Y-%m-%d").to_string(),
            event_col: event.event_col,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Due events fetched for this cycle.
    pub fetched: usize,
    pub sent: usize,
    pub failed: usize,
    /// Subscriptions deleted because the push service reported them gone.
    pub pruned: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleStats),
    /// A previous cycle was still running when this one was requested.
    Skipped,
}

/// Status transition decided for one event, applied at cycle commit.
enum Transition {
    Sent { event_id: i64, at: NaiveDateTime },
    Failed { event_id: i64 },
}

/// Background reminder dispatcher.
///
/// Each cycle fetches a batch of due reminders (oldest first), fans delivery
/// out to every push subscription of the owning user, and settles each event
/// to `sent` or `failed`. An event counts as sent when at least one of the
/// user's devices accepted the message; there is no per-device tracking.
/// A `failed` event is not re-queued; the user must re-arm the reminder.
///
/// `transport` is `None` when the VAPID key pair is not configured. In that
/// state a cycle marks every fetched due event `failed` without attempting
/// delivery, so reminders that cannot possibly be delivered are not
/// re-fetched forever.
pub struct ReminderDispatcher<T> {
    pool: SqlitePool,
    transport: Option<T>,
    batch_size: i64,
    started: AtomicBool,
    cycle_guard: Mutex<()>,
}

impl<T: PushTransport> ReminderDispatcher<T> {
    pub fn new(pool: SqlitePool, transport: Option<T>, batch_size: i64) -> Self {
        Self {
            pool,
            transport,
            batch_size,
            started: AtomicBool::new(false),
            cycle_guard: Mutex::new(()),
        }
    }

    /// Run one dispatch cycle against the clock value `now`.
    ///
    /// Returns `Skipped` without touching anything when another cycle is
    /// still in flight. All status transitions and subscription pruning of
    /// a cycle are committed in a single transaction after the batch loop,
    /// so a crash mid-cycle leaves every fetched event `pending` and safe
    /// to reprocess.
    pub async fn run_cycle(&self, now: NaiveDateTime) -> AppResult<CycleOutcome> {
        let _guard = match self.cycle_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!("Previous reminder cycle still running; skipping this tick");
                return Ok(CycleOutcome::Skipped);
            }
        };

        let due = EventRepository::fetch_due(&self.pool, now, self.batch_size).await?;
        let mut stats = CycleStats {
            fetched: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return Ok(CycleOutcome::Completed(stats));
        }

        let Some(transport) = self.transport.as_ref() else {
            // Fail fast: without VAPID keys no delivery can succeed, so the
            // whole batch is settled as failed without a network attempt.
            // Logged once per cycle, not per event.
            tracing::warn!(
                "VAPID keys not configured; marking {} due reminder(s) as failed",
                due.len()
            );
            let transitions: Vec<Transition> = due
                .iter()
                .map(|event| Transition::Failed { event_id: event.id })
                .collect();
            stats.failed = transitions.len();
            self.commit(&transitions, &[]).await?;
            return Ok(CycleOutcome::Completed(stats));
        };

        let mut transitions: Vec<Transition> = Vec::with_capacity(due.len());
        let mut pruned: Vec<i64> = Vec::new();

        for event in &due {
            match self.process_event(transport, event, now, &mut pruned).await {
                Ok(transition) => {
                    match transition {
                        Transition::Sent { .. } => stats.sent += 1,
                        Transition::Failed { .. } => stats.failed += 1,
                    }
                    transitions.push(transition);
                }
                Err(err) => {
                    // One broken event must not abort the rest of the batch;
                    // it stays pending and is retried next cycle.
                    tracing::warn!(
                        "Failed to process reminder for event {}: {:?}",
                        event.id,
                        err
                    );
                }
            }
        }

        stats.pruned = pruned.len();
        self.commit(&transitions, &pruned).await?;
        Ok(CycleOutcome::Completed(stats))
    }

    /// Decide the status transition for one due event, collecting gone
    /// subscription ids into `pruned` along the way.
    async fn process_event(
        &self,
        transport: &T,
        event: &Event,
        now: NaiveDateTime,
        pruned: &mut Vec<i64>,
    ) -> AppResult<Transition> {
        let subscriptions =
            PushSubscriptionRepository::list_for_user(&self.pool, event.user_id).await?;
        if subscriptions.is_empty() {
            tracing::debug!(
                "No push subscriptions for user {}; marking event {} failed",
                event.user_id,
                event.id
            );
            return Ok(Transition::Failed { event_id: event.id });
        }

        let payload = serde_json::to_string(&ReminderPayload::for_event(event))
            .map_err(|e| AppError::Internal(e.into()))?;

        let mut any_success = false;
        for subscription in &subscriptions {
            match transport.send(subscription, &payload).await {
                Ok(()) => any_success = true,
                Err(DeliveryError::Gone) => {
                    tracing::info!(
                        "Push endpoint gone for subscription {}; pruning",
                        subscription.id
                    );
                    pruned.push(subscription.id);
                }
                Err(DeliveryError::Transient(msg)) => {
                    tracing::warn!(
                        "Push delivery failed for subscription {}: {}",
                        subscription.id,
                        msg
                    );
                }
            }
        }

        if any_success {
            Ok(Transition::Sent {
                event_id: event.id,
                at: now,
            })
        } else {
            Ok(Transition::Failed { event_id: event.id })
        }
    }

    /// Persist a cycle's transitions and pruned subscriptions atomically.
    async fn commit(&self, transitions: &[Transition], pruned: &[i64]) -> AppResult<()> {
        if transitions.is_empty() && pruned.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(AppError::Database)?;
        for transition in transitions {
            match transition {
                Transition::Sent { event_id, at } => {
                    EventRepository::mark_sent(&mut *tx, *event_id, *at).await?
                }
                Transition::Failed { event_id } => {
                    EventRepository::mark_failed(&mut *tx, *event_id).await?
                }
            }
        }
        for subscription_id in pruned {
            PushSubscriptionRepository::delete_by_id(&mut *tx, *subscription_id).await?;
        }
        tx.commit().await.map_err(AppError::Database)?;

        Ok(())
    }

    /// Start the fixed-interval scheduler loop in a background task.
    ///
    /// Returns `None` when the dispatcher has already been started; the
    /// `started` flag guards against a second loop double-processing due
    /// events (e.g. a composition root wired twice under a dev reloader).
    /// Cycles run sequentially inside one task; a tick that arrives while a
    /// cycle is still running is skipped, not queued. Cycle errors are
    /// logged here and never escape the task.
    pub fn spawn(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: tokio::sync::broadcast::Sender<()>,
    ) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("Reminder dispatcher already started; ignoring duplicate start");
            return None;
        }

        let dispatcher = Arc::clone(self);
        let mut shutdown_rx = shutdown.subscribe();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Reminder dispatcher shutting down");
                        break;
                    }
                    _ = ticker.tick() => {}
                }

                match dispatcher.run_cycle(Utc::now().naive_utc()).await {
                    Ok(CycleOutcome::Completed(stats)) if stats.fetched > 0 => {
                        tracing::info!(
                            "Reminder cycle: {} due, {} sent, {} failed, {} subscription(s) pruned",
                            stats.fetched,
                            stats.sent,
                            stats.failed,
                            stats.pruned
                        );
                    }
                    Ok(_) => {}
                    Err(err) => {
                        // The failed cycle is a no-op; the next tick retries.
                        tracing::error!("Reminder cycle failed: {:?}", err);
                    }
                }
            }
        }))
    }
}
