//! Domain types for the attendance/payment engine.
//!
//! These are the typed snapshots the decision logic operates on. All
//! relational access stays behind the storage traits; nothing in here
//! performs I/O.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type EventId = Uuid;
pub type PersonId = Uuid;
pub type ClubId = Uuid;
pub type SubscriptionId = Uuid;

// =============================================================================
// Events
// =============================================================================

/// Kind of club event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Session,
    Match,
    Tournament,
    Social,
    Training,
    Other,
}

/// How attendance at an event is paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    /// Covered by a subscription slot when one is available.
    Included,
    /// Paid per attendance.
    OneOff,
    /// No charge.
    Free,
}

/// A single occurrence of a club event.
///
/// Immutable to this engine; event editing is an external concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub club_id: ClubId,
    pub kind: EventKind,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub payment_mode: PaymentMode,
    /// Flat fee in minor units, used when no pricing tier matches.
    pub fee_cents: Option<i64>,
    pub currency: Option<String>,
}

impl Event {
    /// Whether attending this event can consume a weekly subscription slot.
    ///
    /// Only regular sessions covered by a subscription participate in
    /// quota accounting; everything else is quota-exempt.
    #[must_use]
    pub fn is_quota_eligible(&self) -> bool {
        self.kind == EventKind::Session && self.payment_mode == PaymentMode::Included
    }

    /// Whether attendance is free of charge regardless of subscription state.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.payment_mode == PaymentMode::Free || self.fee_cents.unwrap_or(0) == 0
    }
}

// =============================================================================
// Membership
// =============================================================================

/// Membership status within a club.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Active,
    Suspended,
    Left,
}

/// Pricing category a member falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberCategory {
    Adult,
    Student,
    Junior,
    Senior,
    Guest,
}

/// Person ↔ club relation. Read-only to this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub person_id: PersonId,
    pub club_id: ClubId,
    pub status: MembershipStatus,
    pub category: MemberCategory,
}

impl Membership {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == MembershipStatus::Active
    }
}

// =============================================================================
// RSVPs
// =============================================================================

/// Attendance response for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsvpResponse {
    Yes,
    No,
    Maybe,
}

impl RsvpResponse {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Maybe => "maybe",
        }
    }
}

impl std::fmt::Display for RsvpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Attendance record, exactly one per (event, person).
///
/// Created on first response and updated in place thereafter; never
/// deleted by this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rsvp {
    pub event_id: EventId,
    pub person_id: PersonId,
    pub response: RsvpResponse,
    pub responded_at: DateTime<Utc>,
    pub note: Option<String>,
    /// Tri-state: `Some(true)` = penalized late cancellation,
    /// `Some(false)` = explicitly cleared, `None` = not applicable.
    pub cancelled_late: Option<bool>,
}

// =============================================================================
// Subscriptions
// =============================================================================

/// Subscription status, synced from the payment gateway via webhooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Paused,
    Cancelled,
}

impl SubscriptionStatus {
    /// Parse from the gateway's subscription status string.
    #[must_use]
    pub fn from_gateway(status: &str) -> Self {
        match status {
            "active" | "trialing" => Self::Active,
            "past_due" | "unpaid" => Self::PastDue,
            "paused" => Self::Paused,
            _ => Self::Cancelled,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sessions a plan allows per ISO week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeeklyAllowance {
    Limited(u32),
    Unlimited,
}

impl WeeklyAllowance {
    /// Map the stored raw count to an allowance. Negative values are the
    /// unlimited sentinel.
    #[must_use]
    pub fn from_raw(raw: i64) -> Self {
        if raw < 0 {
            Self::Unlimited
        } else {
            Self::Limited(raw as u32)
        }
    }

    #[must_use]
    pub fn as_raw(&self) -> i64 {
        match self {
            Self::Limited(n) => i64::from(*n),
            Self::Unlimited => -1,
        }
    }

    /// Whether another slot may be consumed given `used` slots this week.
    #[must_use]
    pub fn allows(&self, used: u32) -> bool {
        match self {
            Self::Limited(n) => used < *n,
            Self::Unlimited => true,
        }
    }
}

/// A subscription plan as known to this engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    pub weekly_allowance: WeeklyAllowance,
    /// External price identifier used to detect plan changes during
    /// reconciliation.
    pub gateway_price_id: Option<String>,
}

/// Catalog of plans sellable through the gateway.
#[derive(Debug, Clone, Default)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
}

impl PlanCatalog {
    #[must_use]
    pub fn new(plans: Vec<Plan>) -> Self {
        Self { plans }
    }

    /// Find a plan by external price identifier.
    #[must_use]
    pub fn find_by_price(&self, gateway_price_id: &str) -> Option<&Plan> {
        self.plans
            .iter()
            .find(|p| p.gateway_price_id.as_deref() == Some(gateway_price_id))
    }
}

/// Person ↔ club ↔ plan relation.
///
/// At most one `active`/`past_due` subscription per (club, person) is
/// meaningful at a time; reconciliation enforces this on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub person_id: PersonId,
    pub club_id: ClubId,
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub started_at: DateTime<Utc>,
    /// External subscription identifier, the stable key for reconciliation.
    pub gateway_subscription_id: Option<String>,
}

impl Subscription {
    /// Whether the subscription currently holds slots.
    ///
    /// `past_due` retains service until the gateway cancels it.
    #[must_use]
    pub fn is_current(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::PastDue
        )
    }
}

/// One consumed weekly slot: this event used one unit of this
/// subscription's allowance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionUsage {
    pub subscription_id: SubscriptionId,
    pub event_id: EventId,
    /// Monday of the ISO week the slot belongs to, derived from the
    /// event's start instant.
    pub week_start: NaiveDate,
}

// =============================================================================
// Pricing
// =============================================================================

/// Per-event, per-category price override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingTier {
    pub event_id: EventId,
    pub category: MemberCategory,
    pub amount_cents: i64,
    pub currency: String,
}

// =============================================================================
// Transactions
// =============================================================================

/// Where a payment originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSource {
    Gateway,
    Cash,
    BankTransfer,
    Manual,
}

/// Lifecycle status of a payment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment ledger row for one (event, person) charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub event_id: EventId,
    pub person_id: PersonId,
    pub source: PaymentSource,
    pub status: TransactionStatus,
    pub amount_cents: i64,
    pub currency: String,
    /// Human-visible reference, used for bank transfers.
    pub reference: Option<String>,
    /// Checkout session id stamped at creation; the stable external key
    /// for reconciliation.
    pub checkout_session_id: Option<String>,
    /// Gateway payment identifier stamped on completion.
    pub gateway_payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Whether this row counts as paid for display/admission purposes.
    ///
    /// A manual intent (cash/bank transfer) is a provisional commitment and
    /// counts as paid while pending; a gateway payment only counts once it
    /// reaches `succeeded`.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        match self.status {
            TransactionStatus::Succeeded => true,
            TransactionStatus::Pending => self.source != PaymentSource::Gateway,
            _ => false,
        }
    }
}
