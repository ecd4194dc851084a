//! Gateway checkout client.
//!
//! Opening a checkout is the engine's only outbound network call; there is
//! no retry here, failures surface synchronously to the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{ClubId, EventId, PersonId};

/// Metadata stamped onto a checkout session so reconciliation can find
/// its way back without guessing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutMetadata {
    pub event_id: EventId,
    pub person_id: PersonId,
    pub club_id: ClubId,
}

/// Request to open a checkout session with the gateway.
#[derive(Debug, Clone)]
pub struct CreateCheckoutRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub metadata: CheckoutMetadata,
}

/// An opened checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    /// Stable external identifier, stamped onto the pending transaction.
    pub id: String,
    /// Where to redirect the member to complete payment.
    pub url: String,
}

/// Trait for the external payment gateway's checkout API.
#[async_trait]
pub trait CheckoutClient: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CreateCheckoutRequest,
    ) -> Result<CheckoutSession>;
}

/// Mock checkout client for testing.
#[cfg(any(test, feature = "test-stores"))]
pub mod test {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    /// Mock client that hands out deterministic session ids and records
    /// every request.
    #[derive(Default, Clone)]
    pub struct MockCheckoutClient {
        inner: Arc<MockCheckoutClientInner>,
    }

    #[derive(Default)]
    struct MockCheckoutClientInner {
        counter: AtomicU64,
        requests: Mutex<Vec<CreateCheckoutRequest>>,
    }

    impl MockCheckoutClient {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Requests seen so far, for assertions.
        pub fn requests(&self) -> Vec<CreateCheckoutRequest> {
            self.inner.requests.lock().unwrap().clone()
        }

        /// The session id the next call will return.
        #[must_use]
        pub fn next_session_id(&self) -> String {
            format!("cs_test_{}", self.inner.counter.load(Ordering::SeqCst) + 1)
        }
    }

    #[async_trait]
    impl CheckoutClient for MockCheckoutClient {
        async fn create_checkout_session(
            &self,
            request: CreateCheckoutRequest,
        ) -> Result<CheckoutSession> {
            let n = self.inner.counter.fetch_add(1, Ordering::SeqCst) + 1;
            self.inner.requests.lock().unwrap().push(request);
            Ok(CheckoutSession {
                id: format!("cs_test_{n}"),
                url: format!("https://gateway.example/checkout/cs_test_{n}"),
            })
        }
    }
}
