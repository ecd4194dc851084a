//! Payment ledger.
//!
//! Owns the per-(event, person) payment record lifecycle: manual intents
//! (cash, bank transfer) and gateway-initiated checkouts. Independent of
//! the RSVP state machine but drives the implicit `yes` on admission.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::checkout::{CheckoutClient, CheckoutMetadata, CheckoutSession, CreateCheckoutRequest};
use super::error::PaymentError;
use super::storage::TransactionStore;
use crate::attendance::error::AttendanceError;
use crate::attendance::rsvp::{RsvpEngine, RsvpRequest};
use crate::attendance::storage::{EventStore, RsvpStore, SubscriptionStore, UsageStore};
use crate::config::{BankDetails, EngineConfig};
use crate::directory::{MemberDirectory, NotificationSink, TeamAssignments};
use crate::error::Result;
use crate::model::{
    Event, EventId, Membership, PaymentSource, PersonId, RsvpResponse, Transaction,
    TransactionStatus,
};
use crate::pricing::resolve_price;

/// Manual payment methods a member can declare up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualMethod {
    Cash,
    BankTransfer,
}

impl ManualMethod {
    fn source(self) -> PaymentSource {
        match self {
            Self::Cash => PaymentSource::Cash,
            Self::BankTransfer => PaymentSource::BankTransfer,
        }
    }
}

/// What the member gets back after opening a manual intent.
#[derive(Debug, Clone, Serialize)]
pub struct IntentReceipt {
    pub transaction: Transaction,
    /// Reference to quote on the transfer, for bank transfers.
    pub reference: Option<String>,
    /// Where to send the money, for bank transfers.
    pub bank_details: Option<BankDetails>,
}

/// The payment ledger.
pub struct PaymentLedger<S, P, C, D, T, N>
where
    S: EventStore + RsvpStore + SubscriptionStore + UsageStore + Clone,
    P: TransactionStore,
    C: CheckoutClient,
    D: MemberDirectory,
    T: TeamAssignments,
    N: NotificationSink,
{
    store: S,
    payments: P,
    gateway: C,
    directory: D,
    rsvp: RsvpEngine<S, D, T, N>,
    config: EngineConfig,
}

impl<S, P, C, D, T, N> PaymentLedger<S, P, C, D, T, N>
where
    S: EventStore + RsvpStore + SubscriptionStore + UsageStore + Clone,
    P: TransactionStore,
    C: CheckoutClient,
    D: MemberDirectory,
    T: TeamAssignments,
    N: NotificationSink,
{
    #[must_use]
    pub fn new(
        store: S,
        payments: P,
        gateway: C,
        directory: D,
        rsvp: RsvpEngine<S, D, T, N>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            payments,
            gateway,
            directory,
            rsvp,
            config,
        }
    }

    /// Open a manual payment intent (cash or bank transfer).
    ///
    /// The pending row counts as paid immediately (a provisional
    /// commitment), so this also performs the implicit `yes` RSVP. Opening
    /// a second intent updates the existing pending row in place.
    pub async fn open_intent(
        &self,
        person_id: PersonId,
        event_id: EventId,
        method: ManualMethod,
    ) -> Result<IntentReceipt> {
        let (event, membership) = self.load_member_event(person_id, event_id).await?;

        if let Some(latest) = self.payments.latest_transaction(event_id, person_id).await? {
            if latest.status == TransactionStatus::Succeeded {
                return Err(PaymentError::AlreadyPaid { event_id, person_id }.into());
            }
        }

        let tiers = self.store.tiers_for_event(event_id).await?;
        let price = resolve_price(
            membership.category,
            &tiers,
            event.fee_cents,
            event
                .currency
                .as_deref()
                .unwrap_or(&self.config.default_currency),
        );

        let now = Utc::now();
        let existing = self.payments.pending_transaction(event_id, person_id).await?;

        let reference = match method {
            ManualMethod::BankTransfer => existing
                .as_ref()
                .and_then(|t| t.reference.clone())
                .or_else(|| Some(generate_reference())),
            ManualMethod::Cash => None,
        };

        let transaction = match existing {
            Some(mut tx) => {
                tx.source = method.source();
                tx.amount_cents = price.amount_cents;
                tx.currency = price.currency.clone();
                tx.reference = reference.clone();
                tx.updated_at = now;
                tx
            }
            None => Transaction {
                id: Uuid::new_v4(),
                event_id,
                person_id,
                source: method.source(),
                status: TransactionStatus::Pending,
                amount_cents: price.amount_cents,
                currency: price.currency.clone(),
                reference: reference.clone(),
                checkout_session_id: None,
                gateway_payment_id: None,
                created_at: now,
                updated_at: now,
            },
        };

        self.payments.save_transaction(&transaction).await?;

        // Auto-admission: declaring payment implies attending
        self.rsvp
            .submit(person_id, event_id, RsvpRequest::new(RsvpResponse::Yes))
            .await?;

        tracing::info!(
            target: "rollcall::payments::ledger",
            %event_id,
            %person_id,
            method = ?method,
            amount_cents = price.amount_cents,
            "manual intent opened"
        );

        let bank_details = match method {
            ManualMethod::BankTransfer => self.config.bank_details.clone(),
            ManualMethod::Cash => None,
        };

        Ok(IntentReceipt {
            transaction,
            reference,
            bank_details,
        })
    }

    /// Open a gateway checkout for a card payment.
    ///
    /// Records a pending gateway transaction stamped with the session id;
    /// the `yes` RSVP happens on the completion webhook, not here.
    pub async fn begin_checkout(
        &self,
        person_id: PersonId,
        event_id: EventId,
    ) -> Result<CheckoutSession> {
        let (event, membership) = self.load_member_event(person_id, event_id).await?;

        if let Some(latest) = self.payments.latest_transaction(event_id, person_id).await? {
            if latest.status == TransactionStatus::Succeeded {
                return Err(PaymentError::AlreadyPaid { event_id, person_id }.into());
            }
        }

        let tiers = self.store.tiers_for_event(event_id).await?;
        let price = resolve_price(
            membership.category,
            &tiers,
            event.fee_cents,
            event
                .currency
                .as_deref()
                .unwrap_or(&self.config.default_currency),
        );

        if price.amount_cents == 0 {
            return Err(PaymentError::NothingToPay { event_id }.into());
        }

        let session = self
            .gateway
            .create_checkout_session(CreateCheckoutRequest {
                amount_cents: price.amount_cents,
                currency: price.currency.clone(),
                metadata: CheckoutMetadata {
                    event_id,
                    person_id,
                    club_id: event.club_id,
                },
            })
            .await?;

        let now = Utc::now();
        let transaction = match self.payments.pending_transaction(event_id, person_id).await? {
            Some(mut tx) => {
                tx.source = PaymentSource::Gateway;
                tx.amount_cents = price.amount_cents;
                tx.currency = price.currency.clone();
                tx.checkout_session_id = Some(session.id.clone());
                tx.reference = None;
                tx.updated_at = now;
                tx
            }
            None => Transaction {
                id: Uuid::new_v4(),
                event_id,
                person_id,
                source: PaymentSource::Gateway,
                status: TransactionStatus::Pending,
                amount_cents: price.amount_cents,
                currency: price.currency.clone(),
                reference: None,
                checkout_session_id: Some(session.id.clone()),
                gateway_payment_id: None,
                created_at: now,
                updated_at: now,
            },
        };
        self.payments.save_transaction(&transaction).await?;

        tracing::info!(
            target: "rollcall::payments::ledger",
            %event_id,
            %person_id,
            session_id = %session.id,
            "checkout session opened"
        );

        Ok(session)
    }

    /// Latest transaction for (event, person), or none.
    pub async fn get_status(
        &self,
        person_id: PersonId,
        event_id: EventId,
    ) -> Result<Option<Transaction>> {
        self.payments.latest_transaction(event_id, person_id).await
    }

    /// Cancel the live intent for (event, person).
    ///
    /// Refused for any succeeded payment: a settled record is not an
    /// intent. A gateway payment additionally needs a refund flow this
    /// engine does not own.
    pub async fn cancel_intent(&self, person_id: PersonId, event_id: EventId) -> Result<()> {
        let transaction = self
            .payments
            .latest_transaction(event_id, person_id)
            .await?
            .ok_or(PaymentError::NoTransaction { event_id, person_id })?;

        if transaction.status == TransactionStatus::Succeeded {
            if transaction.source == PaymentSource::Gateway {
                return Err(PaymentError::RefundRequired { event_id, person_id }.into());
            }
            return Err(PaymentError::AlreadyPaid { event_id, person_id }.into());
        }

        self.payments.delete_transaction(transaction.id).await?;

        tracing::info!(
            target: "rollcall::payments::ledger",
            %event_id,
            %person_id,
            "intent cancelled"
        );
        Ok(())
    }

    async fn load_member_event(
        &self,
        person_id: PersonId,
        event_id: EventId,
    ) -> Result<(Event, Membership)> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or(AttendanceError::EventNotFound { event_id })?;

        let membership = self
            .directory
            .membership(event.club_id, person_id)
            .await?
            .filter(Membership::is_active)
            .ok_or(AttendanceError::NotClubMember {
                person_id,
                club_id: event.club_id,
            })?;

        Ok((event, membership))
    }
}

fn generate_reference() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("RC-{}", &id[..8].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::storage::test::InMemoryClubStore;
    use crate::directory::test::InMemoryDirectory;
    use crate::directory::NoOpNotificationSink;
    use crate::model::{
        ClubId, EventKind, MemberCategory, MembershipStatus, PaymentMode, PricingTier,
    };
    use crate::payments::checkout::test::MockCheckoutClient;
    use crate::payments::storage::test::InMemoryPaymentStore;
    use chrono::TimeZone;
    use chrono::Utc;

    type TestLedger = PaymentLedger<
        InMemoryClubStore,
        InMemoryPaymentStore,
        MockCheckoutClient,
        InMemoryDirectory,
        InMemoryDirectory,
        NoOpNotificationSink,
    >;

    struct Fixture {
        ledger: TestLedger,
        store: InMemoryClubStore,
        payments: InMemoryPaymentStore,
        gateway: MockCheckoutClient,
        club_id: ClubId,
        person_id: PersonId,
    }

    fn fixture() -> Fixture {
        let store = InMemoryClubStore::new();
        let payments = InMemoryPaymentStore::new();
        let gateway = MockCheckoutClient::new();
        let directory = InMemoryDirectory::new();
        let club_id = Uuid::new_v4();
        let person_id = Uuid::new_v4();

        directory.seed_membership(Membership {
            person_id,
            club_id,
            status: MembershipStatus::Active,
            category: MemberCategory::Adult,
        });

        let rsvp = RsvpEngine::new(
            store.clone(),
            directory.clone(),
            directory.clone(),
            NoOpNotificationSink,
        );
        let ledger = PaymentLedger::new(
            store.clone(),
            payments.clone(),
            gateway.clone(),
            directory.clone(),
            rsvp,
            EngineConfig::for_testing("whsec_test"),
        );

        Fixture {
            ledger,
            store,
            payments,
            gateway,
            club_id,
            person_id,
        }
    }

    fn one_off_event(club_id: ClubId, fee_cents: i64) -> Event {
        let starts_at = Utc.with_ymd_and_hms(2025, 6, 11, 19, 0, 0).unwrap();
        Event {
            id: Uuid::new_v4(),
            club_id,
            kind: EventKind::Match,
            starts_at,
            ends_at: starts_at + chrono::Duration::hours(2),
            payment_mode: PaymentMode::OneOff,
            fee_cents: Some(fee_cents),
            currency: Some("gbp".to_string()),
        }
    }

    #[tokio::test]
    async fn test_open_cash_intent_auto_rsvps() {
        let f = fixture();
        let event = one_off_event(f.club_id, 500);
        f.store.seed_event(event.clone());

        let receipt = f
            .ledger
            .open_intent(f.person_id, event.id, ManualMethod::Cash)
            .await
            .unwrap();

        assert_eq!(receipt.transaction.source, PaymentSource::Cash);
        assert_eq!(receipt.transaction.status, TransactionStatus::Pending);
        assert_eq!(receipt.transaction.amount_cents, 500);
        assert!(receipt.reference.is_none());
        assert!(receipt.bank_details.is_none());
        // Pending manual intent already counts as paid
        assert!(receipt.transaction.is_settled());

        let rsvp = f
            .store
            .get_rsvp(event.id, f.person_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rsvp.response, RsvpResponse::Yes);
    }

    #[tokio::test]
    async fn test_bank_transfer_gets_reference_and_details() {
        let f = fixture();
        let event = one_off_event(f.club_id, 500);
        f.store.seed_event(event.clone());

        let receipt = f
            .ledger
            .open_intent(f.person_id, event.id, ManualMethod::BankTransfer)
            .await
            .unwrap();

        let reference = receipt.reference.unwrap();
        assert!(reference.starts_with("RC-"));
        assert!(receipt.bank_details.is_some());

        // Re-opening updates in place and keeps the reference stable
        let second = f
            .ledger
            .open_intent(f.person_id, event.id, ManualMethod::BankTransfer)
            .await
            .unwrap();
        assert_eq!(second.transaction.id, receipt.transaction.id);
        assert_eq!(second.reference.unwrap(), reference);
        assert_eq!(f.payments.all_transactions().len(), 1);
    }

    #[tokio::test]
    async fn test_switching_method_updates_in_place() {
        let f = fixture();
        let event = one_off_event(f.club_id, 500);
        f.store.seed_event(event.clone());

        let cash = f
            .ledger
            .open_intent(f.person_id, event.id, ManualMethod::Cash)
            .await
            .unwrap();
        let transfer = f
            .ledger
            .open_intent(f.person_id, event.id, ManualMethod::BankTransfer)
            .await
            .unwrap();

        assert_eq!(cash.transaction.id, transfer.transaction.id);
        assert_eq!(transfer.transaction.source, PaymentSource::BankTransfer);
        assert_eq!(f.payments.all_transactions().len(), 1);
    }

    #[tokio::test]
    async fn test_member_category_tier_applies() {
        let f = fixture();
        let event = one_off_event(f.club_id, 800);
        f.store.seed_event(event.clone());
        f.store.seed_tier(PricingTier {
            event_id: event.id,
            category: MemberCategory::Adult,
            amount_cents: 650,
            currency: "gbp".to_string(),
        });

        let receipt = f
            .ledger
            .open_intent(f.person_id, event.id, ManualMethod::Cash)
            .await
            .unwrap();
        assert_eq!(receipt.transaction.amount_cents, 650);
    }

    #[tokio::test]
    async fn test_begin_checkout_stamps_session_id() {
        let f = fixture();
        let event = one_off_event(f.club_id, 700);
        f.store.seed_event(event.clone());

        let session = f.ledger.begin_checkout(f.person_id, event.id).await.unwrap();
        assert!(session.url.contains(&session.id));

        let tx = f
            .payments
            .find_by_checkout_session(&session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.source, PaymentSource::Gateway);
        assert_eq!(tx.status, TransactionStatus::Pending);
        // Gateway pending is not settled until the webhook lands
        assert!(!tx.is_settled());

        // No RSVP yet: that happens on completion
        assert!(f
            .store
            .get_rsvp(event.id, f.person_id)
            .await
            .unwrap()
            .is_none());

        let requests = f.gateway.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].metadata.event_id, event.id);
        assert_eq!(requests[0].metadata.person_id, f.person_id);
    }

    #[tokio::test]
    async fn test_checkout_refused_for_free_event() {
        let f = fixture();
        let mut event = one_off_event(f.club_id, 0);
        event.fee_cents = None;
        f.store.seed_event(event.clone());

        let err = f
            .ledger
            .begin_checkout(f.person_id, event.id)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::RollcallError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_cancel_intent() {
        let f = fixture();
        let event = one_off_event(f.club_id, 500);
        f.store.seed_event(event.clone());

        f.ledger
            .open_intent(f.person_id, event.id, ManualMethod::Cash)
            .await
            .unwrap();
        f.ledger.cancel_intent(f.person_id, event.id).await.unwrap();
        assert!(f.payments.all_transactions().is_empty());

        let err = f
            .ledger
            .cancel_intent(f.person_id, event.id)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::RollcallError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_refused_for_succeeded_gateway_payment() {
        let f = fixture();
        let event = one_off_event(f.club_id, 700);
        f.store.seed_event(event.clone());

        f.ledger.begin_checkout(f.person_id, event.id).await.unwrap();
        let mut tx = f
            .payments
            .latest_transaction(event.id, f.person_id)
            .await
            .unwrap()
            .unwrap();
        tx.status = TransactionStatus::Succeeded;
        f.payments.save_transaction(&tx).await.unwrap();

        let err = f
            .ledger
            .cancel_intent(f.person_id, event.id)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::RollcallError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_cancel_refused_for_succeeded_manual_payment() {
        let f = fixture();
        let event = one_off_event(f.club_id, 500);
        f.store.seed_event(event.clone());

        f.ledger
            .open_intent(f.person_id, event.id, ManualMethod::Cash)
            .await
            .unwrap();
        let mut tx = f
            .payments
            .latest_transaction(event.id, f.person_id)
            .await
            .unwrap()
            .unwrap();
        tx.status = TransactionStatus::Succeeded;
        f.payments.save_transaction(&tx).await.unwrap();

        // A settled cash payment is an accounting record, not an intent
        let err = f
            .ledger
            .cancel_intent(f.person_id, event.id)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::RollcallError::Conflict(_)));
        assert_eq!(f.payments.all_transactions().len(), 1);
    }

    #[tokio::test]
    async fn test_non_member_refused() {
        let f = fixture();
        let event = one_off_event(f.club_id, 500);
        f.store.seed_event(event.clone());
        let stranger = Uuid::new_v4();

        let err = f
            .ledger
            .open_intent(stranger, event.id, ManualMethod::Cash)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::RollcallError::Forbidden(_)));
        assert!(f.payments.all_transactions().is_empty());
    }
}
