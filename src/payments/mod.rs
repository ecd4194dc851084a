//! Payments: manual intents, gateway checkouts, and webhook
//! reconciliation.

pub mod checkout;
pub mod error;
pub mod ledger;
pub mod storage;
pub mod webhook;

pub use checkout::{CheckoutClient, CheckoutMetadata, CheckoutSession, CreateCheckoutRequest};
pub use error::PaymentError;
pub use ledger::{IntentReceipt, ManualMethod, PaymentLedger};
pub use storage::{ProcessedEventStore, TransactionStore};
pub use webhook::{
    GatewayEvent, GatewaySubscription, ReconciliationHandler, WebhookEnvelope, WebhookOutcome,
};

#[cfg(any(test, feature = "test-stores"))]
pub use checkout::test::MockCheckoutClient;
#[cfg(any(test, feature = "test-stores"))]
pub use storage::test::InMemoryPaymentStore;
