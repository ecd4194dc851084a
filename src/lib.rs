//! Rollcall - attendance and payment reconciliation for sports clubs
//!
//! Rollcall tracks who is coming to a club's events and whether they have
//! paid, covering three ways of paying: a weekly subscription allowance,
//! one-off gateway checkouts, and manual cash or bank-transfer intents
//! reconciled by an organizer.
//!
//! # Features
//!
//! - **RSVPs**: yes/no/maybe responses with a guarded decline for team
//!   selections close to the event
//! - **Quota**: ISO-week subscription allowances consumed per session
//! - **Pricing**: per-category tiers with a fallback chain to the event fee
//! - **Payments**: manual intents and gateway checkouts in one ledger
//! - **Reconciliation**: signed, idempotent gateway webhooks
//! - **Availability**: one composed per-event view answering "can I come,
//!   and what does it cost me?"
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rollcall::attendance::{AvailabilityAggregator, RsvpEngine};
//! use rollcall::directory::TracingNotificationSink;
//! use rollcall::payments::{PaymentLedger, ReconciliationHandler};
//! use rollcall::{AppState, EngineConfig, PlanCatalog};
//! # use rollcall::attendance::InMemoryClubStore;
//! # use rollcall::directory::test::InMemoryDirectory;
//! # use rollcall::payments::{InMemoryPaymentStore, MockCheckoutClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     rollcall::init_tracing();
//!
//!     let config = EngineConfig::from_env()?;
//!     # let store = InMemoryClubStore::new();
//!     # let payments = InMemoryPaymentStore::new();
//!     # let gateway = MockCheckoutClient::new();
//!     # let directory = InMemoryDirectory::new();
//!     let notifier = TracingNotificationSink;
//!
//!     let rsvp = RsvpEngine::new(store.clone(), directory.clone(), directory.clone(), notifier);
//!     let state = AppState {
//!         availability: Arc::new(AvailabilityAggregator::new(
//!             store.clone(),
//!             payments.clone(),
//!             directory.clone(),
//!             config.default_currency.clone(),
//!         )),
//!         rsvp: Arc::new(RsvpEngine::new(
//!             store.clone(),
//!             directory.clone(),
//!             directory.clone(),
//!             notifier,
//!         )),
//!         ledger: Arc::new(PaymentLedger::new(
//!             store.clone(),
//!             payments.clone(),
//!             gateway,
//!             directory.clone(),
//!             rsvp,
//!             config.clone(),
//!         )),
//!         webhook: Arc::new(ReconciliationHandler::new(
//!             store.clone(),
//!             payments.clone(),
//!             RsvpEngine::new(store, directory.clone(), directory, notifier),
//!             notifier,
//!             PlanCatalog::default(),
//!             config.webhook.clone(),
//!         )),
//!     };
//!
//!     let app = rollcall::routes::router(state);
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod attendance;
pub mod config;
pub mod directory;
mod error;
pub mod model;
pub mod payments;
pub mod pricing;
pub mod routes;

// Re-exports for public API
pub use config::{BankDetails, EngineConfig, WebhookConfig};
pub use error::{Result, RollcallError};
pub use model::{
    Event, EventKind, MemberCategory, Membership, MembershipStatus, PaymentMode, PaymentSource,
    Plan, PlanCatalog, PricingTier, Rsvp, RsvpResponse, Subscription, SubscriptionStatus,
    SubscriptionUsage, Transaction, TransactionStatus, WeeklyAllowance,
};
pub use pricing::{resolve_price, PriceSource, ResolvedPrice};
pub use routes::{AppState, CallerIdentity};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging with sensible defaults
///
/// This should be called early in your application, typically in main().
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "rollcall=debug")
/// - `ROLLCALL_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("ROLLCALL_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
