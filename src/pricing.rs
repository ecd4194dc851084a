//! Price tier resolution.
//!
//! Pure fallback logic mapping a member's category and an event's
//! configured tiers to an effective charge. Used both for live quoting
//! and for re-pricing audits, so the same inputs must always resolve to
//! the same output.

use serde::{Deserialize, Serialize};

use crate::model::{MemberCategory, PricingTier};

/// Where a resolved price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    /// A configured per-category tier matched (directly or via fallback).
    Tier,
    /// No tier matched; the event's flat fee applies.
    EventFeeFallback,
}

/// The effective charge for one member at one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPrice {
    pub charged_category: MemberCategory,
    pub amount_cents: i64,
    pub currency: String,
    pub source: PriceSource,
}

/// Resolve the effective charge for a member category.
///
/// Fallback chain, first match wins:
/// 1. exact category tier
/// 2. `senior` falls back to the `adult` tier
/// 3. `junior` falls back to the `student` tier
/// 4. `junior`/`student`/`guest` fall back to the `adult` tier
/// 5. the event's flat fee (or 0) charged at the `adult` category
///
/// Total: always returns a value, never touches storage.
#[must_use]
pub fn resolve_price(
    category: MemberCategory,
    tiers: &[PricingTier],
    fee_cents: Option<i64>,
    default_currency: &str,
) -> ResolvedPrice {
    if let Some(tier) = tier_for(tiers, category) {
        return from_tier(tier);
    }

    if category == MemberCategory::Senior {
        if let Some(tier) = tier_for(tiers, MemberCategory::Adult) {
            return from_tier(tier);
        }
    }

    if category == MemberCategory::Junior {
        if let Some(tier) = tier_for(tiers, MemberCategory::Student) {
            return from_tier(tier);
        }
    }

    if matches!(
        category,
        MemberCategory::Junior | MemberCategory::Student | MemberCategory::Guest
    ) {
        if let Some(tier) = tier_for(tiers, MemberCategory::Adult) {
            return from_tier(tier);
        }
    }

    ResolvedPrice {
        charged_category: MemberCategory::Adult,
        amount_cents: fee_cents.unwrap_or(0),
        currency: default_currency.to_string(),
        source: PriceSource::EventFeeFallback,
    }
}

fn tier_for(tiers: &[PricingTier], category: MemberCategory) -> Option<&PricingTier> {
    tiers.iter().find(|t| t.category == category)
}

fn from_tier(tier: &PricingTier) -> ResolvedPrice {
    ResolvedPrice {
        charged_category: tier.category,
        amount_cents: tier.amount_cents,
        currency: tier.currency.clone(),
        source: PriceSource::Tier,
    }
}
