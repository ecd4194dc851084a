//! Weekly subscription quota accounting.
//!
//! Slots are counted per subscription per ISO week, Monday-anchored and
//! computed in UTC from the event's start instant.

use chrono::{DateTime, NaiveDate, Utc, Weekday};

use super::storage::UsageStore;
use crate::error::Result;
use crate::model::{Event, EventId, Subscription, SubscriptionId, SubscriptionUsage};

/// The Monday that opens the quota week containing `instant`.
#[must_use]
pub fn week_start(instant: DateTime<Utc>) -> NaiveDate {
    instant.date_naive().week(Weekday::Mon).first_day()
}

/// Tracks weekly slot consumption against a subscription's allowance.
pub struct QuotaLedger<U: UsageStore> {
    usage: U,
}

impl<U: UsageStore> QuotaLedger<U> {
    #[must_use]
    pub fn new(usage: U) -> Self {
        Self { usage }
    }

    /// Slots used by a subscription in the given week.
    pub async fn slots_used(
        &self,
        subscription_id: SubscriptionId,
        week: NaiveDate,
    ) -> Result<u32> {
        self.usage.count_used_in_week(subscription_id, week).await
    }

    /// Try to consume one slot for this event.
    ///
    /// Returns `true` if the event holds a slot after the call, whether it
    /// was consumed now or already held (idempotent: calling twice for the
    /// same (subscription, event) never consumes two slots). Returns
    /// `false` when the weekly allowance is exhausted.
    pub async fn try_consume(&self, subscription: &Subscription, event: &Event) -> Result<bool> {
        let week = week_start(event.starts_at);

        if self.usage.usage_exists(subscription.id, event.id).await? {
            return Ok(true);
        }

        let used = self.usage.count_used_in_week(subscription.id, week).await?;
        if !subscription.plan.weekly_allowance.allows(used) {
            tracing::debug!(
                target: "rollcall::attendance::quota",
                subscription_id = %subscription.id,
                event_id = %event.id,
                used,
                "weekly allowance exhausted"
            );
            return Ok(false);
        }

        // A concurrent duplicate loses at the store's conditional insert;
        // either way the slot is held afterwards.
        self.usage
            .insert_usage(&SubscriptionUsage {
                subscription_id: subscription.id,
                event_id: event.id,
                week_start: week,
            })
            .await?;

        Ok(true)
    }

    /// Release the slot held for this event, if any. Idempotent.
    pub async fn release(&self, subscription_id: SubscriptionId, event_id: EventId) -> Result<()> {
        self.usage.delete_usage(subscription_id, event_id).await
    }

    /// Whether this event currently holds a slot of the subscription.
    pub async fn holds_slot(
        &self,
        subscription_id: SubscriptionId,
        event_id: EventId,
    ) -> Result<bool> {
        self.usage.usage_exists(subscription_id, event_id).await
    }
}
