//! Read-side availability composition.
//!
//! Joins RSVP, quota, payment and pricing state into a single per-event
//! view for display. The decision logic is a pure function over an
//! explicitly-typed snapshot; the aggregator only loads snapshots through
//! the repository traits and maps the function across them.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::quota::week_start;
use super::storage::{EventStore, RsvpStore, SubscriptionStore, UsageStore};
use crate::directory::MemberDirectory;
use crate::error::Result;
use crate::model::{
    ClubId, Event, EventId, MemberCategory, PersonId, PricingTier, Rsvp, RsvpResponse,
    Subscription, Transaction, WeeklyAllowance,
};
use crate::payments::storage::TransactionStore;
use crate::pricing::{resolve_price, ResolvedPrice};

/// Everything needed to decide availability for one (event, caller) pair.
#[derive(Debug, Clone)]
pub struct EventSnapshot {
    pub event: Event,
    pub tiers: Vec<PricingTier>,
    pub rsvps: Vec<Rsvp>,
    pub own_rsvp: Option<Rsvp>,
    pub latest_transaction: Option<Transaction>,
    pub subscription: Option<SubscriptionSnapshot>,
    pub category: MemberCategory,
}

/// The caller's subscription state relative to one event's week.
#[derive(Debug, Clone)]
pub struct SubscriptionSnapshot {
    pub subscription: Subscription,
    pub used_this_week: u32,
    /// Whether a slot was already consumed for this specific event.
    pub used_for_event: bool,
}

/// RSVP counts by response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResponseCounts {
    pub yes: u32,
    pub no: u32,
    pub maybe: u32,
}

/// The caller's subscription as shown alongside an event.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionSummary {
    pub plan: String,
    pub allowed_per_week: WeeklyAllowance,
    pub used_this_week: u32,
}

/// Composed per-event view.
#[derive(Debug, Clone, Serialize)]
pub struct EventAvailability {
    pub event_id: EventId,
    pub counts: ResponseCounts,
    pub my_response: Option<RsvpResponse>,
    pub my_cancelled_late: Option<bool>,
    pub paid: bool,
    pub price: ResolvedPrice,
    pub payment_required: bool,
    pub subscription_used: bool,
    pub subscription: Option<SubscriptionSummary>,
}

/// Compose the availability view for one snapshot.
///
/// `payment_required` starts `true` and is only ever cleared, in this
/// order: free event, existing committed payment, then subscription slot
/// (already held for this event, or weekly quota not yet exhausted). The
/// order matters: an exhausted quota must not override an existing
/// payment, and a free event short-circuits regardless of subscription.
#[must_use]
pub fn availability(snapshot: &EventSnapshot, default_currency: &str) -> EventAvailability {
    let event = &snapshot.event;

    let mut counts = ResponseCounts::default();
    for rsvp in &snapshot.rsvps {
        match rsvp.response {
            RsvpResponse::Yes => counts.yes += 1,
            RsvpResponse::No => counts.no += 1,
            RsvpResponse::Maybe => counts.maybe += 1,
        }
    }

    let currency = event.currency.as_deref().unwrap_or(default_currency);
    let price = resolve_price(snapshot.category, &snapshot.tiers, event.fee_cents, currency);

    let paid = snapshot
        .latest_transaction
        .as_ref()
        .is_some_and(Transaction::is_settled);

    let mut payment_required = true;
    let mut subscription_used = false;

    if event.is_free() {
        payment_required = false;
    }
    if paid {
        payment_required = false;
    }
    if event.is_quota_eligible() {
        if let Some(sub) = &snapshot.subscription {
            if sub.used_for_event {
                payment_required = false;
                subscription_used = true;
            } else if sub
                .subscription
                .plan
                .weekly_allowance
                .allows(sub.used_this_week)
            {
                payment_required = false;
            }
        }
    }

    EventAvailability {
        event_id: event.id,
        counts,
        my_response: snapshot.own_rsvp.as_ref().map(|r| r.response),
        my_cancelled_late: snapshot.own_rsvp.as_ref().and_then(|r| r.cancelled_late),
        paid,
        price,
        payment_required,
        subscription_used,
        subscription: snapshot.subscription.as_ref().map(|s| SubscriptionSummary {
            plan: s.subscription.plan.name.clone(),
            allowed_per_week: s.subscription.plan.weekly_allowance,
            used_this_week: s.used_this_week,
        }),
    }
}

/// Loads snapshots and composes availability for a listing window.
pub struct AvailabilityAggregator<S, P, D>
where
    S: EventStore + RsvpStore + SubscriptionStore + UsageStore,
    P: TransactionStore,
    D: MemberDirectory,
{
    store: S,
    payments: P,
    directory: D,
    default_currency: String,
}

impl<S, P, D> AvailabilityAggregator<S, P, D>
where
    S: EventStore + RsvpStore + SubscriptionStore + UsageStore,
    P: TransactionStore,
    D: MemberDirectory,
{
    #[must_use]
    pub fn new(store: S, payments: P, directory: D, default_currency: impl Into<String>) -> Self {
        Self {
            store,
            payments,
            directory,
            default_currency: default_currency.into(),
        }
    }

    /// Composed views for every event of a club in `[from, to)`, from the
    /// caller's perspective.
    pub async fn list_for(
        &self,
        club_id: ClubId,
        person_id: PersonId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EventAvailability>> {
        let events = self.store.list_events(club_id, from, to).await?;

        let category = self
            .directory
            .membership(club_id, person_id)
            .await?
            .map_or(MemberCategory::Guest, |m| m.category);

        let subscription = self.store.current_subscription(club_id, person_id).await?;

        let mut views = Vec::with_capacity(events.len());
        for event in events {
            let snapshot = self
                .snapshot_for(event, person_id, category, subscription.as_ref())
                .await?;
            views.push(availability(&snapshot, &self.default_currency));
        }
        Ok(views)
    }

    async fn snapshot_for(
        &self,
        event: Event,
        person_id: PersonId,
        category: MemberCategory,
        subscription: Option<&Subscription>,
    ) -> Result<EventSnapshot> {
        let tiers = self.store.tiers_for_event(event.id).await?;
        let rsvps = self.store.list_rsvps_for_event(event.id).await?;
        let own_rsvp = rsvps
            .iter()
            .find(|r| r.person_id == person_id)
            .cloned();
        let latest_transaction = self.payments.latest_transaction(event.id, person_id).await?;

        let subscription = match subscription {
            Some(sub) => {
                let week = week_start(event.starts_at);
                let used_this_week = self.store.count_used_in_week(sub.id, week).await?;
                let used_for_event = self.store.usage_exists(sub.id, event.id).await?;
                Some(SubscriptionSnapshot {
                    subscription: sub.clone(),
                    used_this_week,
                    used_for_event,
                })
            }
            None => None,
        };

        Ok(EventSnapshot {
            event,
            tiers,
            rsvps,
            own_rsvp,
            latest_transaction,
            subscription,
            category,
        })
    }
}
