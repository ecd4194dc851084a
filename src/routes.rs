//! HTTP surface.
//!
//! A thin axum layer over the engines; all behavior lives in
//! [`crate::attendance`] and [`crate::payments`]. Authentication is the
//! host application's job: it resolves the caller and forwards their id
//! in the `x-person-id` header.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attendance::availability::{AvailabilityAggregator, EventAvailability};
use crate::attendance::rsvp::{RsvpEngine, RsvpOutcome, RsvpRequest};
use crate::attendance::storage::{EventStore, RsvpStore, SubscriptionStore, UsageStore};
use crate::directory::{MemberDirectory, NotificationSink, TeamAssignments};
use crate::error::{Result, RollcallError};
use crate::model::{ClubId, EventId, PersonId, Transaction};
use crate::payments::checkout::CheckoutClient;
use crate::payments::ledger::{IntentReceipt, ManualMethod, PaymentLedger};
use crate::payments::storage::{ProcessedEventStore, TransactionStore};
use crate::payments::webhook::{ReconciliationHandler, WebhookOutcome};

/// Header carrying the authenticated caller's person id.
pub const PERSON_ID_HEADER: &str = "x-person-id";

/// Header carrying the gateway's webhook signature.
pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

// ============================================================================
// State
// ============================================================================

/// Shared state for the engine routes.
pub struct AppState<S, P, C, D, T, N>
where
    S: EventStore + RsvpStore + SubscriptionStore + UsageStore + Clone,
    P: TransactionStore + ProcessedEventStore,
    C: CheckoutClient,
    D: MemberDirectory,
    T: TeamAssignments,
    N: NotificationSink,
{
    pub availability: Arc<AvailabilityAggregator<S, P, D>>,
    pub rsvp: Arc<RsvpEngine<S, D, T, N>>,
    pub ledger: Arc<PaymentLedger<S, P, C, D, T, N>>,
    pub webhook: Arc<ReconciliationHandler<S, P, D, T, N>>,
}

impl<S, P, C, D, T, N> Clone for AppState<S, P, C, D, T, N>
where
    S: EventStore + RsvpStore + SubscriptionStore + UsageStore + Clone,
    P: TransactionStore + ProcessedEventStore,
    C: CheckoutClient,
    D: MemberDirectory,
    T: TeamAssignments,
    N: NotificationSink,
{
    fn clone(&self) -> Self {
        Self {
            availability: Arc::clone(&self.availability),
            rsvp: Arc::clone(&self.rsvp),
            ledger: Arc::clone(&self.ledger),
            webhook: Arc::clone(&self.webhook),
        }
    }
}

/// Build the engine router.
///
/// Mount under the host application's router, behind its authentication
/// middleware.
pub fn router<S, P, C, D, T, N>(state: AppState<S, P, C, D, T, N>) -> Router
where
    S: EventStore + RsvpStore + SubscriptionStore + UsageStore + Clone + 'static,
    P: TransactionStore + ProcessedEventStore + 'static,
    C: CheckoutClient + 'static,
    D: MemberDirectory + 'static,
    T: TeamAssignments + 'static,
    N: NotificationSink + 'static,
{
    Router::new()
        .route("/events", get(list_events))
        .route("/events/{event_id}/rsvp", post(submit_rsvp))
        .route(
            "/events/{event_id}/payment",
            post(open_payment).get(payment_status).delete(cancel_payment),
        )
        .route("/webhooks/payment-gateway", post(gateway_webhook))
        .with_state(state)
}

// ============================================================================
// Caller identity
// ============================================================================

/// The caller's person id, taken from [`PERSON_ID_HEADER`].
#[derive(Debug, Clone, Copy)]
pub struct CallerIdentity(pub PersonId);

impl<St> FromRequestParts<St> for CallerIdentity
where
    St: Send + Sync,
{
    type Rejection = RollcallError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &St,
    ) -> std::result::Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(PERSON_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RollcallError::unauthorized("Missing caller identity"))?;

        let person_id = Uuid::parse_str(header)
            .map_err(|_| RollcallError::unauthorized("Invalid caller identity"))?;

        Ok(Self(person_id))
    }
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
struct EventWindowQuery {
    club_id: ClubId,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct EventListResponse {
    events: Vec<EventAvailability>,
}

async fn list_events<S, P, C, D, T, N>(
    State(state): State<AppState<S, P, C, D, T, N>>,
    CallerIdentity(person_id): CallerIdentity,
    Query(query): Query<EventWindowQuery>,
) -> Result<Json<EventListResponse>>
where
    S: EventStore + RsvpStore + SubscriptionStore + UsageStore + Clone,
    P: TransactionStore + ProcessedEventStore,
    C: CheckoutClient,
    D: MemberDirectory,
    T: TeamAssignments,
    N: NotificationSink,
{
    let events = state
        .availability
        .list_for(query.club_id, person_id, query.from, query.to)
        .await?;
    Ok(Json(EventListResponse { events }))
}

async fn submit_rsvp<S, P, C, D, T, N>(
    State(state): State<AppState<S, P, C, D, T, N>>,
    CallerIdentity(person_id): CallerIdentity,
    Path(event_id): Path<EventId>,
    Json(request): Json<RsvpRequest>,
) -> Result<Response>
where
    S: EventStore + RsvpStore + SubscriptionStore + UsageStore + Clone,
    P: TransactionStore + ProcessedEventStore,
    C: CheckoutClient,
    D: MemberDirectory,
    T: TeamAssignments,
    N: NotificationSink,
{
    let outcome = state.rsvp.submit(person_id, event_id, request).await?;

    // Guarded declines need the caller to confirm and resubmit
    let status = match &outcome {
        RsvpOutcome::Committed { .. } => StatusCode::OK,
        RsvpOutcome::ConfirmationRequired { .. } => StatusCode::CONFLICT,
    };
    Ok((status, Json(outcome)).into_response())
}

#[derive(Debug, Deserialize)]
struct OpenPaymentRequest {
    method: PaymentMethod,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum PaymentMethod {
    Cash,
    BankTransfer,
    Card,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OpenPaymentResponse {
    Checkout {
        checkout_session_id: String,
        checkout_url: String,
    },
    Intent(IntentReceipt),
}

async fn open_payment<S, P, C, D, T, N>(
    State(state): State<AppState<S, P, C, D, T, N>>,
    CallerIdentity(person_id): CallerIdentity,
    Path(event_id): Path<EventId>,
    Json(request): Json<OpenPaymentRequest>,
) -> Result<Json<OpenPaymentResponse>>
where
    S: EventStore + RsvpStore + SubscriptionStore + UsageStore + Clone,
    P: TransactionStore + ProcessedEventStore,
    C: CheckoutClient,
    D: MemberDirectory,
    T: TeamAssignments,
    N: NotificationSink,
{
    let response = match request.method {
        PaymentMethod::Card => {
            let session = state.ledger.begin_checkout(person_id, event_id).await?;
            OpenPaymentResponse::Checkout {
                checkout_session_id: session.id,
                checkout_url: session.url,
            }
        }
        PaymentMethod::Cash => {
            let receipt = state
                .ledger
                .open_intent(person_id, event_id, ManualMethod::Cash)
                .await?;
            OpenPaymentResponse::Intent(receipt)
        }
        PaymentMethod::BankTransfer => {
            let receipt = state
                .ledger
                .open_intent(person_id, event_id, ManualMethod::BankTransfer)
                .await?;
            OpenPaymentResponse::Intent(receipt)
        }
    };
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct PaymentStatusResponse {
    transaction: Option<Transaction>,
}

async fn payment_status<S, P, C, D, T, N>(
    State(state): State<AppState<S, P, C, D, T, N>>,
    CallerIdentity(person_id): CallerIdentity,
    Path(event_id): Path<EventId>,
) -> Result<Json<PaymentStatusResponse>>
where
    S: EventStore + RsvpStore + SubscriptionStore + UsageStore + Clone,
    P: TransactionStore + ProcessedEventStore,
    C: CheckoutClient,
    D: MemberDirectory,
    T: TeamAssignments,
    N: NotificationSink,
{
    let transaction = state.ledger.get_status(person_id, event_id).await?;
    Ok(Json(PaymentStatusResponse { transaction }))
}

async fn cancel_payment<S, P, C, D, T, N>(
    State(state): State<AppState<S, P, C, D, T, N>>,
    CallerIdentity(person_id): CallerIdentity,
    Path(event_id): Path<EventId>,
) -> Result<StatusCode>
where
    S: EventStore + RsvpStore + SubscriptionStore + UsageStore + Clone,
    P: TransactionStore + ProcessedEventStore,
    C: CheckoutClient,
    D: MemberDirectory,
    T: TeamAssignments,
    N: NotificationSink,
{
    state.ledger.cancel_intent(person_id, event_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct WebhookAck {
    received: bool,
    outcome: &'static str,
}

async fn gateway_webhook<S, P, C, D, T, N>(
    State(state): State<AppState<S, P, C, D, T, N>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>>
where
    S: EventStore + RsvpStore + SubscriptionStore + UsageStore + Clone,
    P: TransactionStore + ProcessedEventStore,
    C: CheckoutClient,
    D: MemberDirectory,
    T: TeamAssignments,
    N: NotificationSink,
{
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| RollcallError::bad_request("Missing webhook signature"))?;

    let envelope = state.webhook.verify_signature(&body, signature)?;

    // Storage trouble must surface as 503 so the gateway redelivers
    let outcome = state.webhook.handle(envelope).await.map_err(|e| {
        tracing::error!(
            target: "rollcall::routes",
            error = %e,
            "webhook processing failed"
        );
        RollcallError::service_unavailable("Webhook processing failed, retry later")
    })?;

    let outcome = match outcome {
        WebhookOutcome::Processed => "processed",
        WebhookOutcome::Ignored => "ignored",
        WebhookOutcome::AlreadyProcessed => "already_processed",
    };
    Ok(Json(WebhookAck {
        received: true,
        outcome,
    }))
}
