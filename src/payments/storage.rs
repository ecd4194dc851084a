//! Storage traits for payment data.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{EventId, PersonId, Transaction};

/// Payment ledger persistence.
///
/// Rows are keyed by their own id; at most one non-succeeded row per
/// (event, person) is live at a time, which the ledger logic maintains by
/// updating it in place.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// The most recently updated transaction for (event, person), if any.
    async fn latest_transaction(
        &self,
        event_id: EventId,
        person_id: PersonId,
    ) -> Result<Option<Transaction>>;

    /// The live (pending) transaction for (event, person), if any.
    async fn pending_transaction(
        &self,
        event_id: EventId,
        person_id: PersonId,
    ) -> Result<Option<Transaction>>;

    /// Look up by the checkout session id stamped at creation.
    async fn find_by_checkout_session(&self, session_id: &str) -> Result<Option<Transaction>>;

    /// Insert or update by transaction id.
    async fn save_transaction(&self, transaction: &Transaction) -> Result<()>;

    /// Delete by transaction id. Deleting a missing row is a no-op.
    async fn delete_transaction(&self, transaction_id: Uuid) -> Result<()>;
}

/// Webhook idempotency ledger.
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    /// Check if a webhook event has already been processed.
    async fn is_event_processed(&self, event_id: &str) -> Result<bool>;

    /// Mark a webhook event as processed.
    async fn mark_event_processed(&self, event_id: &str) -> Result<()>;
}

/// In-memory payment store for testing.
#[cfg(any(test, feature = "test-stores"))]
pub mod test {
    use super::*;
    use crate::model::TransactionStatus;
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock};

    /// In-memory transaction and processed-event store.
    ///
    /// Wraps data in `Arc` for cheap cloning.
    #[derive(Default, Clone)]
    pub struct InMemoryPaymentStore {
        inner: Arc<InMemoryPaymentStoreInner>,
    }

    #[derive(Default)]
    struct InMemoryPaymentStoreInner {
        transactions: RwLock<HashMap<Uuid, Transaction>>,
        processed_events: RwLock<Vec<String>>,
    }

    impl InMemoryPaymentStore {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// All transactions, for assertions.
        pub fn all_transactions(&self) -> Vec<Transaction> {
            self.inner
                .transactions
                .read()
                .unwrap()
                .values()
                .cloned()
                .collect()
        }

        /// Transactions for one (event, person) pair, for assertions.
        pub fn transactions_for(&self, event_id: EventId, person_id: PersonId) -> Vec<Transaction> {
            self.inner
                .transactions
                .read()
                .unwrap()
                .values()
                .filter(|t| t.event_id == event_id && t.person_id == person_id)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl TransactionStore for InMemoryPaymentStore {
        async fn latest_transaction(
            &self,
            event_id: EventId,
            person_id: PersonId,
        ) -> Result<Option<Transaction>> {
            Ok(self
                .inner
                .transactions
                .read()
                .unwrap()
                .values()
                .filter(|t| t.event_id == event_id && t.person_id == person_id)
                .max_by_key(|t| t.updated_at)
                .cloned())
        }

        async fn pending_transaction(
            &self,
            event_id: EventId,
            person_id: PersonId,
        ) -> Result<Option<Transaction>> {
            Ok(self
                .inner
                .transactions
                .read()
                .unwrap()
                .values()
                .find(|t| {
                    t.event_id == event_id
                        && t.person_id == person_id
                        && t.status == TransactionStatus::Pending
                })
                .cloned())
        }

        async fn find_by_checkout_session(&self, session_id: &str) -> Result<Option<Transaction>> {
            Ok(self
                .inner
                .transactions
                .read()
                .unwrap()
                .values()
                .find(|t| t.checkout_session_id.as_deref() == Some(session_id))
                .cloned())
        }

        async fn save_transaction(&self, transaction: &Transaction) -> Result<()> {
            self.inner
                .transactions
                .write()
                .unwrap()
                .insert(transaction.id, transaction.clone());
            Ok(())
        }

        async fn delete_transaction(&self, transaction_id: Uuid) -> Result<()> {
            self.inner
                .transactions
                .write()
                .unwrap()
                .remove(&transaction_id);
            Ok(())
        }
    }

    #[async_trait]
    impl ProcessedEventStore for InMemoryPaymentStore {
        async fn is_event_processed(&self, event_id: &str) -> Result<bool> {
            Ok(self
                .inner
                .processed_events
                .read()
                .unwrap()
                .iter()
                .any(|e| e == event_id))
        }

        async fn mark_event_processed(&self, event_id: &str) -> Result<()> {
            self.inner
                .processed_events
                .write()
                .unwrap()
                .push(event_id.to_string());
            Ok(())
        }
    }
}
