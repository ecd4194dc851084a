//! Storage traits for attendance data.
//!
//! Implement these traits to persist attendance state to your database.
//! The relational store is the single source of truth; the RSVP upsert
//! must be atomic on (event, person). An in-memory implementation is
//! provided for testing.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::Result;
use crate::model::{
    ClubId, Event, EventId, PersonId, PricingTier, Rsvp, Subscription, SubscriptionId,
    SubscriptionUsage,
};

/// Read access to events and their pricing tiers.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn get_event(&self, event_id: EventId) -> Result<Option<Event>>;

    /// Events for a club starting within `[from, to)`.
    async fn list_events(
        &self,
        club_id: ClubId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>>;

    async fn tiers_for_event(&self, event_id: EventId) -> Result<Vec<PricingTier>>;
}

/// RSVP persistence.
#[async_trait]
pub trait RsvpStore: Send + Sync {
    async fn get_rsvp(&self, event_id: EventId, person_id: PersonId) -> Result<Option<Rsvp>>;

    /// Insert or update the single RSVP row for (event, person).
    ///
    /// Must be atomic on that pair; concurrent submissions serialize here.
    async fn upsert_rsvp(&self, rsvp: &Rsvp) -> Result<()>;

    async fn list_rsvps_for_event(&self, event_id: EventId) -> Result<Vec<Rsvp>>;
}

/// Subscription persistence, synced by the reconciliation handler.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// The current (`active`/`past_due`) subscription for a member, if any.
    async fn current_subscription(
        &self,
        club_id: ClubId,
        person_id: PersonId,
    ) -> Result<Option<Subscription>>;

    /// Look up by the stable external subscription identifier.
    async fn get_by_gateway_id(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<Subscription>>;

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()>;

    async fn update_subscription(&self, subscription: &Subscription) -> Result<()>;
}

/// Weekly slot usage persistence.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn usage_exists(
        &self,
        subscription_id: SubscriptionId,
        event_id: EventId,
    ) -> Result<bool>;

    /// Slots used by a subscription in the week starting at `week_start`.
    async fn count_used_in_week(
        &self,
        subscription_id: SubscriptionId,
        week_start: NaiveDate,
    ) -> Result<u32>;

    /// Conditional insert. Returns `false` if a row for this
    /// (subscription, event) already exists; never inserts a duplicate.
    async fn insert_usage(&self, usage: &SubscriptionUsage) -> Result<bool>;

    /// Idempotent delete: removing a non-existent usage is a no-op.
    async fn delete_usage(&self, subscription_id: SubscriptionId, event_id: EventId) -> Result<()>;
}

/// In-memory attendance store for testing.
#[cfg(any(test, feature = "test-stores"))]
pub mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock};

    /// In-memory store implementing every attendance trait.
    ///
    /// Wraps data in `Arc` for cheap cloning.
    #[derive(Default, Clone)]
    pub struct InMemoryClubStore {
        inner: Arc<InMemoryClubStoreInner>,
    }

    #[derive(Default)]
    struct InMemoryClubStoreInner {
        events: RwLock<HashMap<EventId, Event>>,
        tiers: RwLock<Vec<PricingTier>>,
        rsvps: RwLock<HashMap<(EventId, PersonId), Rsvp>>,
        subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
        usage: RwLock<HashMap<(SubscriptionId, EventId), SubscriptionUsage>>,
    }

    impl InMemoryClubStore {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed_event(&self, event: Event) {
            self.inner.events.write().unwrap().insert(event.id, event);
        }

        pub fn seed_tier(&self, tier: PricingTier) {
            self.inner.tiers.write().unwrap().push(tier);
        }

        pub fn seed_subscription(&self, subscription: Subscription) {
            self.inner
                .subscriptions
                .write()
                .unwrap()
                .insert(subscription.id, subscription);
        }

        /// All usage rows, for assertions.
        pub fn usage_rows(&self) -> Vec<SubscriptionUsage> {
            self.inner.usage.read().unwrap().values().cloned().collect()
        }
    }

    #[async_trait]
    impl EventStore for InMemoryClubStore {
        async fn get_event(&self, event_id: EventId) -> Result<Option<Event>> {
            Ok(self.inner.events.read().unwrap().get(&event_id).cloned())
        }

        async fn list_events(
            &self,
            club_id: ClubId,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<Event>> {
            let mut events: Vec<Event> = self
                .inner
                .events
                .read()
                .unwrap()
                .values()
                .filter(|e| e.club_id == club_id && e.starts_at >= from && e.starts_at < to)
                .cloned()
                .collect();
            events.sort_by_key(|e| e.starts_at);
            Ok(events)
        }

        async fn tiers_for_event(&self, event_id: EventId) -> Result<Vec<PricingTier>> {
            Ok(self
                .inner
                .tiers
                .read()
                .unwrap()
                .iter()
                .filter(|t| t.event_id == event_id)
                .cloned()
                .collect())
        }
    }

    #[async_trait]
    impl RsvpStore for InMemoryClubStore {
        async fn get_rsvp(&self, event_id: EventId, person_id: PersonId) -> Result<Option<Rsvp>> {
            Ok(self
                .inner
                .rsvps
                .read()
                .unwrap()
                .get(&(event_id, person_id))
                .cloned())
        }

        async fn upsert_rsvp(&self, rsvp: &Rsvp) -> Result<()> {
            self.inner
                .rsvps
                .write()
                .unwrap()
                .insert((rsvp.event_id, rsvp.person_id), rsvp.clone());
            Ok(())
        }

        async fn list_rsvps_for_event(&self, event_id: EventId) -> Result<Vec<Rsvp>> {
            Ok(self
                .inner
                .rsvps
                .read()
                .unwrap()
                .values()
                .filter(|r| r.event_id == event_id)
                .cloned()
                .collect())
        }
    }

    #[async_trait]
    impl SubscriptionStore for InMemoryClubStore {
        async fn current_subscription(
            &self,
            club_id: ClubId,
            person_id: PersonId,
        ) -> Result<Option<Subscription>> {
            Ok(self
                .inner
                .subscriptions
                .read()
                .unwrap()
                .values()
                .find(|s| s.club_id == club_id && s.person_id == person_id && s.is_current())
                .cloned())
        }

        async fn get_by_gateway_id(
            &self,
            gateway_subscription_id: &str,
        ) -> Result<Option<Subscription>> {
            Ok(self
                .inner
                .subscriptions
                .read()
                .unwrap()
                .values()
                .find(|s| s.gateway_subscription_id.as_deref() == Some(gateway_subscription_id))
                .cloned())
        }

        async fn insert_subscription(&self, subscription: &Subscription) -> Result<()> {
            self.inner
                .subscriptions
                .write()
                .unwrap()
                .insert(subscription.id, subscription.clone());
            Ok(())
        }

        async fn update_subscription(&self, subscription: &Subscription) -> Result<()> {
            let mut subs = self.inner.subscriptions.write().unwrap();
            subs.insert(subscription.id, subscription.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl UsageStore for InMemoryClubStore {
        async fn usage_exists(
            &self,
            subscription_id: SubscriptionId,
            event_id: EventId,
        ) -> Result<bool> {
            Ok(self
                .inner
                .usage
                .read()
                .unwrap()
                .contains_key(&(subscription_id, event_id)))
        }

        async fn count_used_in_week(
            &self,
            subscription_id: SubscriptionId,
            week_start: NaiveDate,
        ) -> Result<u32> {
            Ok(self
                .inner
                .usage
                .read()
                .unwrap()
                .values()
                .filter(|u| u.subscription_id == subscription_id && u.week_start == week_start)
                .count() as u32)
        }

        async fn insert_usage(&self, usage: &SubscriptionUsage) -> Result<bool> {
            let mut rows = self.inner.usage.write().unwrap();
            let key = (usage.subscription_id, usage.event_id);
            if rows.contains_key(&key) {
                return Ok(false);
            }
            rows.insert(key, usage.clone());
            Ok(true)
        }

        async fn delete_usage(
            &self,
            subscription_id: SubscriptionId,
            event_id: EventId,
        ) -> Result<()> {
            self.inner
                .usage
                .write()
                .unwrap()
                .remove(&(subscription_id, event_id));
            Ok(())
        }
    }
}
