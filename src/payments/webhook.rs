//! Gateway webhook reconciliation.
//!
//! Verifies webhook signatures, parses the gateway's payload into a closed
//! event type, and syncs transaction and subscription state. Every handler
//! is idempotent: the gateway retries until acknowledged and may deliver
//! the same event more than once, in any order.

use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::error::PaymentError;
use super::storage::{ProcessedEventStore, TransactionStore};
use crate::attendance::rsvp::{RsvpEngine, RsvpRequest};
use crate::attendance::storage::{EventStore, RsvpStore, SubscriptionStore, UsageStore};
use crate::config::WebhookConfig;
use crate::directory::{MemberDirectory, NotificationSink, TeamAssignments};
use crate::error::Result;
use crate::model::{
    ClubId, PersonId, PlanCatalog, RsvpResponse, Subscription, SubscriptionStatus,
    TransactionStatus,
};

// ============================================================================
// Wire types
// ============================================================================

/// Raw webhook envelope, as delivered by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    /// Gateway event id, the idempotency key.
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEnvelopeData,
    pub created: i64,
}

/// Envelope payload.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelopeData {
    /// The object the event describes. Shape depends on the event type.
    pub object: serde_json::Value,
}

/// Subscription fields extracted from a gateway payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySubscription {
    /// External subscription id.
    pub id: String,
    /// Raw gateway status string.
    pub status: String,
    /// Price id of the subscribed item, if present.
    pub price_id: Option<String>,
    /// Member identity stamped as metadata when the subscription was sold.
    pub person_id: Option<PersonId>,
    pub club_id: Option<ClubId>,
}

/// The gateway events this engine reacts to, parsed into a closed type.
///
/// Everything the dispatch logic needs is extracted here; handlers never
/// touch raw JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    CheckoutCompleted {
        session_id: String,
        gateway_payment_id: Option<String>,
        /// Whether the gateway reports the session as actually paid.
        /// Asynchronous payment methods complete the session first and
        /// confirm (or fail) the charge later.
        paid: bool,
    },
    CheckoutExpired {
        session_id: String,
    },
    /// An asynchronous charge for a completed session failed.
    PaymentFailed {
        session_id: String,
    },
    SubscriptionCreated(GatewaySubscription),
    SubscriptionUpdated(GatewaySubscription),
    SubscriptionDeleted {
        subscription_id: String,
    },
    InvoicePaid {
        subscription_id: Option<String>,
    },
    InvoicePaymentFailed {
        subscription_id: Option<String>,
    },
    /// An event type this engine does not handle.
    Unrecognized {
        event_type: String,
    },
}

impl GatewayEvent {
    /// Parse a verified envelope into a typed event.
    ///
    /// Unknown event types parse to [`GatewayEvent::Unrecognized`]; a
    /// recognized type with a malformed object is an error.
    pub fn from_envelope(envelope: &WebhookEnvelope) -> Result<Self> {
        let object = &envelope.data.object;
        let event = match envelope.event_type.as_str() {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                Self::CheckoutCompleted {
                    session_id: require_str(object, "id")?,
                    gateway_payment_id: optional_str(object, "payment_intent"),
                    paid: object
                        .get("payment_status")
                        .and_then(|v| v.as_str())
                        .map_or(true, |s| s == "paid"),
                }
            }
            "checkout.session.expired" => Self::CheckoutExpired {
                session_id: require_str(object, "id")?,
            },
            "checkout.session.async_payment_failed" => Self::PaymentFailed {
                session_id: require_str(object, "id")?,
            },
            "customer.subscription.created" => {
                Self::SubscriptionCreated(parse_subscription(object)?)
            }
            "customer.subscription.updated" => {
                Self::SubscriptionUpdated(parse_subscription(object)?)
            }
            "customer.subscription.deleted" => Self::SubscriptionDeleted {
                subscription_id: require_str(object, "id")?,
            },
            "invoice.paid" => Self::InvoicePaid {
                subscription_id: optional_str(object, "subscription"),
            },
            "invoice.payment_failed" => Self::InvoicePaymentFailed {
                subscription_id: optional_str(object, "subscription"),
            },
            other => Self::Unrecognized {
                event_type: other.to_string(),
            },
        };
        Ok(event)
    }
}

fn require_str(object: &serde_json::Value, field: &str) -> Result<String> {
    object
        .get(field)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| {
            PaymentError::InvalidWebhookPayload {
                message: format!("missing '{field}'"),
            }
            .into()
        })
}

fn optional_str(object: &serde_json::Value, field: &str) -> Option<String> {
    object.get(field).and_then(|v| v.as_str()).map(String::from)
}

fn parse_subscription(object: &serde_json::Value) -> Result<GatewaySubscription> {
    let id = require_str(object, "id")?;

    let status = object
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or("active")
        .to_string();

    let price_id = object
        .get("items")
        .and_then(|v| v.get("data"))
        .and_then(|v| v.as_array())
        .and_then(|items| items.first())
        .and_then(|item| item.get("price"))
        .and_then(|price| price.get("id"))
        .and_then(|v| v.as_str())
        .map(String::from);

    let metadata = object.get("metadata").and_then(|v| v.as_object());
    let metadata_uuid = |field: &str| {
        metadata
            .and_then(|m| m.get(field))
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    };

    Ok(GatewaySubscription {
        id,
        status,
        price_id,
        person_id: metadata_uuid("person_id"),
        club_id: metadata_uuid("club_id"),
    })
}

// ============================================================================
// Handler
// ============================================================================

/// Outcome of webhook processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Event was processed and recorded in the idempotency ledger.
    Processed,
    /// Event was acknowledged but not acted on.
    Ignored,
    /// Event was already processed (replay).
    AlreadyProcessed,
}

/// Reconciliation handler for gateway webhooks.
///
/// The webhook secret lives in a [`secrecy::SecretString`] inside the
/// config, so it never shows up in debug output.
pub struct ReconciliationHandler<S, P, D, T, N>
where
    S: EventStore + RsvpStore + SubscriptionStore + UsageStore + Clone,
    P: TransactionStore + ProcessedEventStore,
    D: MemberDirectory,
    T: TeamAssignments,
    N: NotificationSink,
{
    store: S,
    payments: P,
    rsvp: RsvpEngine<S, D, T, N>,
    notifier: N,
    plans: PlanCatalog,
    webhook: WebhookConfig,
}

impl<S, P, D, T, N> ReconciliationHandler<S, P, D, T, N>
where
    S: EventStore + RsvpStore + SubscriptionStore + UsageStore + Clone,
    P: TransactionStore + ProcessedEventStore,
    D: MemberDirectory,
    T: TeamAssignments,
    N: NotificationSink,
{
    #[must_use]
    pub fn new(
        store: S,
        payments: P,
        rsvp: RsvpEngine<S, D, T, N>,
        notifier: N,
        plans: PlanCatalog,
        webhook: WebhookConfig,
    ) -> Self {
        Self {
            store,
            payments,
            rsvp,
            notifier,
            plans,
            webhook,
        }
    }

    /// Verify the signature header and parse the envelope.
    ///
    /// The header carries a unix timestamp and an HMAC-SHA256 over
    /// `"{timestamp}.{body}"`; the comparison is constant-time and the
    /// timestamp must be within the configured tolerance.
    pub fn verify_signature(&self, payload: &[u8], signature: &str) -> Result<WebhookEnvelope> {
        let sig_parts = parse_signature_header(signature)?;

        let now = Utc::now().timestamp();
        let age_seconds = (now - sig_parts.timestamp).abs();
        if age_seconds > self.webhook.tolerance_secs {
            return Err(PaymentError::WebhookTimestampExpired { age_seconds }.into());
        }

        let signed_payload = format!(
            "{}.{}",
            sig_parts.timestamp,
            String::from_utf8_lossy(payload)
        );
        let expected_sig = compute_signature(
            self.webhook.secret.expose_secret(),
            signed_payload.as_bytes(),
        )?;

        let expected_bytes = hex::decode(&expected_sig)
            .map_err(|_| crate::error::RollcallError::internal("hex decode error"))?;
        let provided_bytes = hex::decode(&sig_parts.signature)
            .map_err(|_| PaymentError::InvalidWebhookSignature)?;

        if expected_bytes.ct_eq(&provided_bytes).unwrap_u8() != 1 {
            return Err(PaymentError::InvalidWebhookSignature.into());
        }

        let envelope: WebhookEnvelope = serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(
                target: "rollcall::payments::webhook",
                error = %e,
                "failed to parse webhook envelope"
            );
            PaymentError::InvalidWebhookPayload {
                message: "malformed JSON envelope".to_string(),
            }
        })?;

        Ok(envelope)
    }

    /// Process a verified envelope.
    ///
    /// Replays short-circuit on the idempotency ledger. A recognized event
    /// with a malformed object is acknowledged and logged, not retried;
    /// storage failures propagate so the gateway retries delivery.
    pub async fn handle(&self, envelope: WebhookEnvelope) -> Result<WebhookOutcome> {
        if self.payments.is_event_processed(&envelope.id).await? {
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        let event = match GatewayEvent::from_envelope(&envelope) {
            Ok(event) => event,
            Err(e) => {
                // A retry would deliver the same bytes, so ack and move on
                tracing::warn!(
                    target: "rollcall::payments::webhook",
                    event_id = %envelope.id,
                    event_type = %envelope.event_type,
                    error = %e,
                    "malformed webhook event, acknowledging without action"
                );
                return Ok(WebhookOutcome::Ignored);
            }
        };

        let outcome = self.dispatch(event).await?;

        if !matches!(outcome, WebhookOutcome::Ignored) {
            self.payments.mark_event_processed(&envelope.id).await?;
        }

        tracing::debug!(
            target: "rollcall::payments::webhook",
            event_id = %envelope.id,
            event_type = %envelope.event_type,
            outcome = ?outcome,
            "webhook handled"
        );

        Ok(outcome)
    }

    async fn dispatch(&self, event: GatewayEvent) -> Result<WebhookOutcome> {
        match event {
            GatewayEvent::CheckoutCompleted {
                session_id,
                gateway_payment_id,
                paid,
            } => {
                if !paid {
                    // The charge is still settling; a later
                    // async_payment_succeeded or async_payment_failed decides
                    return Ok(WebhookOutcome::Ignored);
                }
                self.handle_checkout_completed(&session_id, gateway_payment_id)
                    .await
            }
            GatewayEvent::CheckoutExpired { session_id } => {
                self.handle_checkout_demotion(&session_id, TransactionStatus::Cancelled)
                    .await
            }
            GatewayEvent::PaymentFailed { session_id } => {
                self.handle_checkout_demotion(&session_id, TransactionStatus::Failed)
                    .await
            }
            GatewayEvent::SubscriptionCreated(data) | GatewayEvent::SubscriptionUpdated(data) => {
                self.sync_subscription(&data).await
            }
            GatewayEvent::SubscriptionDeleted { subscription_id } => {
                self.set_subscription_status(&subscription_id, SubscriptionStatus::Cancelled)
                    .await
            }
            GatewayEvent::InvoicePaid { subscription_id } => match subscription_id {
                Some(id) => {
                    self.set_subscription_status(&id, SubscriptionStatus::Active)
                        .await
                }
                None => Ok(WebhookOutcome::Ignored),
            },
            GatewayEvent::InvoicePaymentFailed { subscription_id } => match subscription_id {
                Some(id) => {
                    self.set_subscription_status(&id, SubscriptionStatus::PastDue)
                        .await
                }
                None => Ok(WebhookOutcome::Ignored),
            },
            GatewayEvent::Unrecognized { event_type } => {
                tracing::debug!(
                    target: "rollcall::payments::webhook",
                    %event_type,
                    "unrecognized event type"
                );
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    /// A checkout was paid: settle the transaction and admit the member.
    ///
    /// The RSVP lands before the transaction flips to succeeded, so a
    /// crash in between leaves the event unacknowledged and the retry
    /// repeats both steps safely.
    async fn handle_checkout_completed(
        &self,
        session_id: &str,
        gateway_payment_id: Option<String>,
    ) -> Result<WebhookOutcome> {
        let Some(mut transaction) = self.payments.find_by_checkout_session(session_id).await?
        else {
            tracing::warn!(
                target: "rollcall::payments::webhook",
                %session_id,
                "completed checkout has no matching transaction"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        if transaction.status == TransactionStatus::Succeeded {
            return Ok(WebhookOutcome::Processed);
        }

        self.rsvp
            .submit(
                transaction.person_id,
                transaction.event_id,
                RsvpRequest::new(RsvpResponse::Yes),
            )
            .await?;

        transaction.status = TransactionStatus::Succeeded;
        transaction.gateway_payment_id = gateway_payment_id;
        transaction.updated_at = Utc::now();
        self.payments.save_transaction(&transaction).await?;

        self.notifier
            .payment_completed(transaction.event_id, transaction.person_id)
            .await;

        tracing::info!(
            target: "rollcall::payments::webhook",
            %session_id,
            event_id = %transaction.event_id,
            person_id = %transaction.person_id,
            "checkout settled"
        );

        Ok(WebhookOutcome::Processed)
    }

    /// A checkout timed out or its charge failed: demote the pending row.
    ///
    /// A completed event that arrived first wins; neither expiry nor a
    /// failure report undoes a settled transaction.
    async fn handle_checkout_demotion(
        &self,
        session_id: &str,
        status: TransactionStatus,
    ) -> Result<WebhookOutcome> {
        let Some(mut transaction) = self.payments.find_by_checkout_session(session_id).await?
        else {
            return Ok(WebhookOutcome::Ignored);
        };

        if transaction.status != TransactionStatus::Pending {
            return Ok(WebhookOutcome::Processed);
        }

        transaction.status = status;
        transaction.updated_at = Utc::now();
        self.payments.save_transaction(&transaction).await?;

        Ok(WebhookOutcome::Processed)
    }

    /// Sync a created or updated subscription into local state.
    async fn sync_subscription(&self, data: &GatewaySubscription) -> Result<WebhookOutcome> {
        let status = SubscriptionStatus::from_gateway(&data.status);

        if let Some(mut existing) = self.store.get_by_gateway_id(&data.id).await? {
            existing.status = status;
            if let Some(plan) = data
                .price_id
                .as_deref()
                .and_then(|price| self.plans.find_by_price(price))
            {
                existing.plan = plan.clone();
            }
            self.store.update_subscription(&existing).await?;
            return Ok(WebhookOutcome::Processed);
        }

        let (Some(person_id), Some(club_id)) = (data.person_id, data.club_id) else {
            tracing::warn!(
                target: "rollcall::payments::webhook",
                gateway_subscription_id = %data.id,
                "new subscription carries no member metadata"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        let Some(plan) = data
            .price_id
            .as_deref()
            .and_then(|price| self.plans.find_by_price(price))
        else {
            tracing::warn!(
                target: "rollcall::payments::webhook",
                gateway_subscription_id = %data.id,
                price_id = ?data.price_id,
                "new subscription references an unknown price"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        // One current subscription per (club, person): supersede the rest
        if let Some(mut other) = self.store.current_subscription(club_id, person_id).await? {
            other.status = SubscriptionStatus::Cancelled;
            self.store.update_subscription(&other).await?;
        }

        let subscription = Subscription {
            id: Uuid::new_v4(),
            person_id,
            club_id,
            plan: plan.clone(),
            status,
            started_at: Utc::now(),
            gateway_subscription_id: Some(data.id.clone()),
        };
        self.store.insert_subscription(&subscription).await?;

        tracing::info!(
            target: "rollcall::payments::webhook",
            gateway_subscription_id = %data.id,
            %person_id,
            %club_id,
            plan = %subscription.plan.name,
            "subscription created"
        );

        Ok(WebhookOutcome::Processed)
    }

    async fn set_subscription_status(
        &self,
        gateway_subscription_id: &str,
        status: SubscriptionStatus,
    ) -> Result<WebhookOutcome> {
        let Some(mut subscription) = self
            .store
            .get_by_gateway_id(gateway_subscription_id)
            .await?
        else {
            return Ok(WebhookOutcome::Ignored);
        };

        subscription.status = status;
        self.store.update_subscription(&subscription).await?;
        Ok(WebhookOutcome::Processed)
    }
}

/// Parsed signature header parts.
struct SignatureParts {
    timestamp: i64,
    signature: String,
}

/// Parse the `t=...,v1=...` signature header.
fn parse_signature_header(header: &str) -> Result<SignatureParts> {
    let mut timestamp = None;
    let mut signature = None;

    for part in header.split(',') {
        let (key, value) = part
            .split_once('=')
            .ok_or(PaymentError::InvalidWebhookSignature)?;

        match key.trim() {
            "t" => timestamp = value.parse().ok(),
            "v1" => signature = Some(value.to_string()),
            _ => {} // Ignore other versions
        }
    }

    Ok(SignatureParts {
        timestamp: timestamp.ok_or(PaymentError::InvalidWebhookSignature)?,
        signature: signature.ok_or(PaymentError::InvalidWebhookSignature)?,
    })
}

/// Compute a hex HMAC-SHA256 signature.
fn compute_signature(secret: &str, payload: &[u8]) -> Result<String> {
    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| crate::error::RollcallError::internal("HMAC key error"))?;

    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::storage::test::InMemoryClubStore;
    use crate::config::EngineConfig;
    use crate::directory::test::InMemoryDirectory;
    use crate::directory::NoOpNotificationSink;
    use crate::model::{
        Event, EventKind, MemberCategory, Membership, MembershipStatus, PaymentMode, PaymentSource,
        Plan, Transaction, WeeklyAllowance,
    };
    use crate::payments::storage::test::InMemoryPaymentStore;
    use chrono::TimeZone;
    use serde_json::json;

    type TestHandler = ReconciliationHandler<
        InMemoryClubStore,
        InMemoryPaymentStore,
        InMemoryDirectory,
        InMemoryDirectory,
        NoOpNotificationSink,
    >;

    struct Fixture {
        handler: TestHandler,
        store: InMemoryClubStore,
        payments: InMemoryPaymentStore,
        club_id: ClubId,
        person_id: PersonId,
    }

    fn fixture() -> Fixture {
        let store = InMemoryClubStore::new();
        let payments = InMemoryPaymentStore::new();
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
        let handler = ReconciliationHandler::new(
            store.clone(),
            payments.clone(),
            rsvp,
            NoOpNotificationSink,
            PlanCatalog::new(vec![
                Plan {
                    name: "twice-weekly".to_string(),
                    weekly_allowance: WeeklyAllowance::Limited(2),
                    gateway_price_id: Some("price_twice".to_string()),
                },
                Plan {
                    name: "unlimited".to_string(),
                    weekly_allowance: WeeklyAllowance::Unlimited,
                    gateway_price_id: Some("price_unlimited".to_string()),
                },
            ]),
            EngineConfig::for_testing("whsec_test").webhook,
        );

        Fixture {
            handler,
            store,
            payments,
            club_id,
            person_id,
        }
    }

    fn one_off_event(club_id: ClubId) -> Event {
        let starts_at = Utc.with_ymd_and_hms(2025, 6, 11, 19, 0, 0).unwrap();
        Event {
            id: Uuid::new_v4(),
            club_id,
            kind: EventKind::Match,
            starts_at,
            ends_at: starts_at + chrono::Duration::hours(2),
            payment_mode: PaymentMode::OneOff,
            fee_cents: Some(700),
            currency: Some("gbp".to_string()),
        }
    }

    fn pending_gateway_tx(
        event_id: crate::model::EventId,
        person_id: PersonId,
        session_id: &str,
    ) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            event_id,
            person_id,
            source: PaymentSource::Gateway,
            status: TransactionStatus::Pending,
            amount_cents: 700,
            currency: "gbp".to_string(),
            reference: None,
            checkout_session_id: Some(session_id.to_string()),
            gateway_payment_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn envelope(id: &str, event_type: &str, object: serde_json::Value) -> WebhookEnvelope {
        WebhookEnvelope {
            id: id.to_string(),
            event_type: event_type.to_string(),
            data: WebhookEnvelopeData { object },
            created: Utc::now().timestamp(),
        }
    }

    fn signed(secret: &str, payload: &[u8], timestamp: i64) -> String {
        let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
        let sig = compute_signature(secret, signed_payload.as_bytes()).unwrap();
        format!("t={timestamp},v1={sig}")
    }

    // ------------------------------------------------------------------
    // Signature verification
    // ------------------------------------------------------------------

    #[test]
    fn test_parse_signature_header() {
        let parts = parse_signature_header("t=1234567890,v1=abc123").unwrap();
        assert_eq!(parts.timestamp, 1234567890);
        assert_eq!(parts.signature, "abc123");
    }

    #[test]
    fn test_parse_signature_header_invalid() {
        assert!(parse_signature_header("garbage").is_err());
        assert!(parse_signature_header("v1=abc123").is_err());
    }

    #[test]
    fn test_verify_signature_valid() {
        let f = fixture();
        let payload =
            br#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}},"created":1234567890}"#;
        let signature = signed("whsec_test", payload, Utc::now().timestamp());

        let envelope = f.handler.verify_signature(payload, &signature).unwrap();
        assert_eq!(envelope.id, "evt_1");
        assert_eq!(envelope.event_type, "invoice.paid");
    }

    #[test]
    fn test_verify_signature_wrong_secret() {
        let f = fixture();
        let payload =
            br#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}},"created":1234567890}"#;
        let signature = signed("whsec_other", payload, Utc::now().timestamp());

        let err = f.handler.verify_signature(payload, &signature).unwrap_err();
        assert!(matches!(err, crate::error::RollcallError::BadRequest(_)));
    }

    #[test]
    fn test_verify_signature_tampered_payload() {
        let f = fixture();
        let payload =
            br#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}},"created":1234567890}"#;
        let signature = signed("whsec_test", payload, Utc::now().timestamp());

        let tampered =
            br#"{"id":"evt_2","type":"invoice.paid","data":{"object":{}},"created":1234567890}"#;
        assert!(f.handler.verify_signature(tampered, &signature).is_err());
    }

    #[test]
    fn test_verify_signature_expired_timestamp() {
        let f = fixture();
        let payload =
            br#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}},"created":1234567890}"#;
        let old = Utc::now().timestamp() - 3600;
        let signature = signed("whsec_test", payload, old);

        let err = f.handler.verify_signature(payload, &signature).unwrap_err();
        assert!(matches!(err, crate::error::RollcallError::BadRequest(_)));
    }

    // ------------------------------------------------------------------
    // Parsing
    // ------------------------------------------------------------------

    #[test]
    fn test_parse_checkout_completed() {
        let env = envelope(
            "evt_1",
            "checkout.session.completed",
            json!({"id": "cs_1", "payment_intent": "pi_9"}),
        );
        let event = GatewayEvent::from_envelope(&env).unwrap();
        assert_eq!(
            event,
            GatewayEvent::CheckoutCompleted {
                session_id: "cs_1".to_string(),
                gateway_payment_id: Some("pi_9".to_string()),
                paid: true,
            }
        );
    }

    #[test]
    fn test_parse_unknown_type() {
        let env = envelope("evt_1", "charge.refunded", json!({}));
        let event = GatewayEvent::from_envelope(&env).unwrap();
        assert_eq!(
            event,
            GatewayEvent::Unrecognized {
                event_type: "charge.refunded".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_missing_session_id_is_error() {
        let env = envelope("evt_1", "checkout.session.completed", json!({}));
        assert!(GatewayEvent::from_envelope(&env).is_err());
    }

    #[test]
    fn test_parse_subscription_metadata() {
        let person = Uuid::new_v4();
        let club = Uuid::new_v4();
        let env = envelope(
            "evt_1",
            "customer.subscription.created",
            json!({
                "id": "sub_1",
                "status": "active",
                "items": {"data": [{"price": {"id": "price_twice"}}]},
                "metadata": {
                    "person_id": person.to_string(),
                    "club_id": club.to_string(),
                },
            }),
        );
        let event = GatewayEvent::from_envelope(&env).unwrap();
        let GatewayEvent::SubscriptionCreated(data) = event else {
            panic!("expected SubscriptionCreated");
        };
        assert_eq!(data.id, "sub_1");
        assert_eq!(data.price_id.as_deref(), Some("price_twice"));
        assert_eq!(data.person_id, Some(person));
        assert_eq!(data.club_id, Some(club));
    }

    // ------------------------------------------------------------------
    // Checkout reconciliation
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_checkout_completed_settles_and_rsvps() {
        let f = fixture();
        let event = one_off_event(f.club_id);
        f.store.seed_event(event.clone());
        f.payments
            .save_transaction(&pending_gateway_tx(event.id, f.person_id, "cs_1"))
            .await
            .unwrap();

        let outcome = f
            .handler
            .handle(envelope(
                "evt_1",
                "checkout.session.completed",
                json!({"id": "cs_1", "payment_intent": "pi_1"}),
            ))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed);

        let tx = f
            .payments
            .latest_transaction(event.id, f.person_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Succeeded);
        assert_eq!(tx.gateway_payment_id.as_deref(), Some("pi_1"));

        let rsvp = f
            .store
            .get_rsvp(event.id, f.person_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rsvp.response, RsvpResponse::Yes);
    }

    #[tokio::test]
    async fn test_double_delivery_is_idempotent() {
        let f = fixture();
        let event = one_off_event(f.club_id);
        f.store.seed_event(event.clone());
        f.payments
            .save_transaction(&pending_gateway_tx(event.id, f.person_id, "cs_1"))
            .await
            .unwrap();

        let env = envelope(
            "evt_1",
            "checkout.session.completed",
            json!({"id": "cs_1"}),
        );
        assert_eq!(
            f.handler.handle(env.clone()).await.unwrap(),
            WebhookOutcome::Processed
        );
        assert_eq!(
            f.handler.handle(env).await.unwrap(),
            WebhookOutcome::AlreadyProcessed
        );

        assert_eq!(f.payments.all_transactions().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_after_completed_is_noop() {
        let f = fixture();
        let event = one_off_event(f.club_id);
        f.store.seed_event(event.clone());
        f.payments
            .save_transaction(&pending_gateway_tx(event.id, f.person_id, "cs_1"))
            .await
            .unwrap();

        f.handler
            .handle(envelope(
                "evt_1",
                "checkout.session.completed",
                json!({"id": "cs_1"}),
            ))
            .await
            .unwrap();

        let outcome = f
            .handler
            .handle(envelope(
                "evt_2",
                "checkout.session.expired",
                json!({"id": "cs_1"}),
            ))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed);

        let tx = f
            .payments
            .latest_transaction(event.id, f.person_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_expired_cancels_pending_checkout() {
        let f = fixture();
        let event = one_off_event(f.club_id);
        f.store.seed_event(event.clone());
        f.payments
            .save_transaction(&pending_gateway_tx(event.id, f.person_id, "cs_1"))
            .await
            .unwrap();

        let outcome = f
            .handler
            .handle(envelope(
                "evt_1",
                "checkout.session.expired",
                json!({"id": "cs_1"}),
            ))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed);

        let tx = f
            .payments
            .latest_transaction(event.id, f.person_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_unpaid_completion_waits_for_async_confirmation() {
        let f = fixture();
        let event = one_off_event(f.club_id);
        f.store.seed_event(event.clone());
        f.payments
            .save_transaction(&pending_gateway_tx(event.id, f.person_id, "cs_1"))
            .await
            .unwrap();

        // Session completes before the charge settles: nothing happens yet
        let outcome = f
            .handler
            .handle(envelope(
                "evt_1",
                "checkout.session.completed",
                json!({"id": "cs_1", "payment_status": "unpaid"}),
            ))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
        let tx = f
            .payments
            .latest_transaction(event.id, f.person_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);

        // The confirmation settles it
        let outcome = f
            .handler
            .handle(envelope(
                "evt_2",
                "checkout.session.async_payment_succeeded",
                json!({"id": "cs_1", "payment_status": "paid"}),
            ))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed);
        let tx = f
            .payments
            .latest_transaction(event.id, f.person_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_async_payment_failure_demotes_to_failed() {
        let f = fixture();
        let event = one_off_event(f.club_id);
        f.store.seed_event(event.clone());
        f.payments
            .save_transaction(&pending_gateway_tx(event.id, f.person_id, "cs_1"))
            .await
            .unwrap();

        let outcome = f
            .handler
            .handle(envelope(
                "evt_1",
                "checkout.session.async_payment_failed",
                json!({"id": "cs_1"}),
            ))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed);

        let tx = f
            .payments
            .latest_transaction(event.id, f.person_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Failed);
        // No RSVP was written for the failed payment
        assert!(f
            .store
            .get_rsvp(event.id, f.person_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unknown_session_is_ignored_and_retryable() {
        let f = fixture();
        let env = envelope(
            "evt_1",
            "checkout.session.completed",
            json!({"id": "cs_unknown"}),
        );
        assert_eq!(
            f.handler.handle(env.clone()).await.unwrap(),
            WebhookOutcome::Ignored
        );
        // Ignored events are not recorded, a redelivery gets reconsidered
        assert_eq!(
            f.handler.handle(env).await.unwrap(),
            WebhookOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn test_malformed_recognized_event_is_acked() {
        let f = fixture();
        let env = envelope("evt_1", "checkout.session.completed", json!({}));
        assert_eq!(
            f.handler.handle(env).await.unwrap(),
            WebhookOutcome::Ignored
        );
    }

    // ------------------------------------------------------------------
    // Subscription reconciliation
    // ------------------------------------------------------------------

    fn subscription_object(
        sub_id: &str,
        status: &str,
        price: &str,
        person: PersonId,
        club: ClubId,
    ) -> serde_json::Value {
        json!({
            "id": sub_id,
            "status": status,
            "items": {"data": [{"price": {"id": price}}]},
            "metadata": {
                "person_id": person.to_string(),
                "club_id": club.to_string(),
            },
        })
    }

    #[tokio::test]
    async fn test_subscription_created_inserts_with_plan() {
        let f = fixture();
        let outcome = f
            .handler
            .handle(envelope(
                "evt_1",
                "customer.subscription.created",
                subscription_object("sub_1", "active", "price_twice", f.person_id, f.club_id),
            ))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed);

        let sub = f
            .store
            .current_subscription(f.club_id, f.person_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.plan.weekly_allowance, WeeklyAllowance::Limited(2));
        assert_eq!(sub.gateway_subscription_id.as_deref(), Some("sub_1"));
    }

    #[tokio::test]
    async fn test_subscription_created_supersedes_existing() {
        let f = fixture();
        f.handler
            .handle(envelope(
                "evt_1",
                "customer.subscription.created",
                subscription_object("sub_1", "active", "price_twice", f.person_id, f.club_id),
            ))
            .await
            .unwrap();

        f.handler
            .handle(envelope(
                "evt_2",
                "customer.subscription.created",
                subscription_object("sub_2", "active", "price_unlimited", f.person_id, f.club_id),
            ))
            .await
            .unwrap();

        let current = f
            .store
            .current_subscription(f.club_id, f.person_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.gateway_subscription_id.as_deref(), Some("sub_2"));
        assert_eq!(current.plan.weekly_allowance, WeeklyAllowance::Unlimited);

        let old = f.store.get_by_gateway_id("sub_1").await.unwrap().unwrap();
        assert_eq!(old.status, SubscriptionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_subscription_updated_changes_plan_and_status() {
        let f = fixture();
        f.handler
            .handle(envelope(
                "evt_1",
                "customer.subscription.created",
                subscription_object("sub_1", "active", "price_twice", f.person_id, f.club_id),
            ))
            .await
            .unwrap();

        f.handler
            .handle(envelope(
                "evt_2",
                "customer.subscription.updated",
                subscription_object("sub_1", "past_due", "price_unlimited", f.person_id, f.club_id),
            ))
            .await
            .unwrap();

        let sub = f.store.get_by_gateway_id("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::PastDue);
        assert_eq!(sub.plan.weekly_allowance, WeeklyAllowance::Unlimited);
        // past_due still counts as current
        assert!(f
            .store
            .current_subscription(f.club_id, f.person_id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_subscription_deleted_cancels() {
        let f = fixture();
        f.handler
            .handle(envelope(
                "evt_1",
                "customer.subscription.created",
                subscription_object("sub_1", "active", "price_twice", f.person_id, f.club_id),
            ))
            .await
            .unwrap();

        let outcome = f
            .handler
            .handle(envelope(
                "evt_2",
                "customer.subscription.deleted",
                json!({"id": "sub_1"}),
            ))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Processed);

        assert!(f
            .store
            .current_subscription(f.club_id, f.person_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_invoice_failure_marks_past_due() {
        let f = fixture();
        f.handler
            .handle(envelope(
                "evt_1",
                "customer.subscription.created",
                subscription_object("sub_1", "active", "price_twice", f.person_id, f.club_id),
            ))
            .await
            .unwrap();

        f.handler
            .handle(envelope(
                "evt_2",
                "invoice.payment_failed",
                json!({"subscription": "sub_1"}),
            ))
            .await
            .unwrap();
        let sub = f.store.get_by_gateway_id("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::PastDue);

        f.handler
            .handle(envelope(
                "evt_3",
                "invoice.paid",
                json!({"subscription": "sub_1"}),
            ))
            .await
            .unwrap();
        let sub = f.store.get_by_gateway_id("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn test_unknown_subscription_events_ignored() {
        let f = fixture();
        let outcome = f
            .handler
            .handle(envelope(
                "evt_1",
                "customer.subscription.deleted",
                json!({"id": "sub_missing"}),
            ))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
    }
}
