use crate::application::effects::{bounded, record_activity};
use crate::application::registry::BrandRegistry;
use crate::domain::brand::{BrandContext, BrandId};
use crate::domain::ports::{ActivityEntry, SharedActivitySink, SharedMessenger, SharedSessionStore};
use crate::error::Result;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct ReminderPolicy {
    /// How long a cart must sit untouched before a reminder.
    pub idle_after: Duration,
    pub sweep_interval: Duration,
    pub daily_interval: Duration,
    pub send_timeout: Duration,
}

impl Default for ReminderPolicy {
    fn default() -> Self {
        Self {
            idle_after: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            daily_interval: Duration::from_secs(86_400),
            send_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct QueuedReminder {
    brand: BrandId,
    customer: String,
    /// Cart revision the reminder was queued for.
    last_added_at: Option<DateTime<Utc>>,
}

/// Nudges customers who left items in their cart.
///
/// At most one reminder per cart per calendar day (UTC). The cart is re-read
/// right before sending and the reminder is skipped if it was emptied or
/// changed since it was selected.
pub struct ReminderSweep {
    registry: Arc<BrandRegistry>,
    sessions: SharedSessionStore,
    messenger: SharedMessenger,
    activity: Option<SharedActivitySink>,
    policy: ReminderPolicy,
    queue: Mutex<VecDeque<QueuedReminder>>,
}

impl ReminderSweep {
    pub fn new(
        registry: Arc<BrandRegistry>,
        sessions: SharedSessionStore,
        messenger: SharedMessenger,
        policy: ReminderPolicy,
    ) -> Self {
        Self {
            registry,
            sessions,
            messenger,
            activity: None,
            policy,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_activity(mut self, sink: SharedActivitySink) -> Self {
        self.activity = Some(sink);
        self
    }

    pub async fn queued(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Drains the daily queue, then reminds every tracked customer whose cart
    /// has been idle for `idle_after`. Returns the number of reminders sent.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let today = now.date_naive();
        let mut sent = self.drain_queue(today).await?;

        let idle_after =
            chrono::Duration::from_std(self.policy.idle_after).unwrap_or(chrono::Duration::MAX);
        for brand in self.registry.brands() {
            for customer in self.sessions.tracked_customers(&brand.id).await? {
                let cart = self.sessions.get_cart(&brand.id, &customer).await?;
                if cart.is_empty() {
                    self.sessions.untrack(&brand.id, &customer).await?;
                    continue;
                }
                let Some(last_added_at) = cart.last_added_at else {
                    continue;
                };
                if now.signed_duration_since(last_added_at) < idle_after
                    || cart.last_reminder_date == Some(today)
                {
                    continue;
                }
                if self
                    .remind(brand, &customer, Some(last_added_at), today)
                    .await?
                {
                    sent += 1;
                }
            }
        }

        if sent > 0 {
            info!(sent, "cart reminders sent");
        }
        Ok(sent)
    }

    /// Queues every non-empty tracked cart for the next sweep.
    pub async fn enqueue_daily(&self, _now: DateTime<Utc>) -> Result<usize> {
        let mut batch = Vec::new();
        for brand in self.registry.brands() {
            for customer in self.sessions.tracked_customers(&brand.id).await? {
                let cart = self.sessions.get_cart(&brand.id, &customer).await?;
                if !cart.is_empty() {
                    batch.push(QueuedReminder {
                        brand: brand.id.clone(),
                        customer,
                        last_added_at: cart.last_added_at,
                    });
                }
            }
        }

        let count = batch.len();
        self.queue.lock().await.extend(batch);
        info!(count, "daily cart reminders queued");
        Ok(count)
    }

    async fn drain_queue(&self, today: NaiveDate) -> Result<usize> {
        let pending: Vec<QueuedReminder> = self.queue.lock().await.drain(..).collect();
        let mut sent = 0;
        for reminder in pending {
            let Some(brand) = self.registry.get(&reminder.brand) else {
                debug!(brand = %reminder.brand, "dropping reminder for unknown brand");
                continue;
            };
            if self
                .remind(&brand, &reminder.customer, reminder.last_added_at, today)
                .await?
            {
                sent += 1;
            }
        }
        Ok(sent)
    }

    async fn remind(
        &self,
        brand: &BrandContext,
        customer: &str,
        expected_last_added: Option<DateTime<Utc>>,
        today: NaiveDate,
    ) -> Result<bool> {
        let cart = self.sessions.get_cart(&brand.id, customer).await?;
        if cart.is_empty()
            || cart.last_added_at != expected_last_added
            || cart.last_reminder_date == Some(today)
        {
            debug!(brand = %brand.id, customer, "cart changed since selection, skipping reminder");
            return Ok(false);
        }

        if let Err(e) = bounded(
            "messaging",
            self.policy.send_timeout,
            self.messenger.send_cart_reminder(brand, customer, &cart),
        )
        .await
        {
            warn!(brand = %brand.id, customer, error = %e, "cart reminder failed");
            return Ok(false);
        }

        let items = cart.item_count();
        if !self
            .sessions
            .mark_reminded(&brand.id, customer, expected_last_added, today)
            .await?
        {
            debug!(brand = %brand.id, customer, "cart changed while reminding, not stamping");
        }
        record_activity(
            self.activity.as_ref(),
            ActivityEntry::new(&brand.id, customer, "cart_reminder", format!("{items} items")),
        )
        .await;
        Ok(true)
    }

    /// Starts the sweep and the daily enqueue on their intervals. Both stop
    /// when `cancel` fires. The first tick of each interval is skipped.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let sweeper = {
            let this = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(this.policy.sweep_interval);
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = this.sweep(Utc::now()).await {
                                warn!(error = %e, "reminder sweep failed (non-fatal)");
                            }
                        }
                        _ = cancel.cancelled() => {
                            info!("reminder sweep shutting down");
                            break;
                        }
                    }
                }
            })
        };

        let daily = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.policy.daily_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.enqueue_daily(Utc::now()).await {
                            warn!(error = %e, "daily reminder enqueue failed (non-fatal)");
                        }
                    }
                    _ = cancel.cancelled() => {
                        info!("daily reminder task shutting down");
                        break;
                    }
                }
            }
        });

        vec![sweeper, daily]
    }
}
