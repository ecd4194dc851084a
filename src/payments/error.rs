//! Payment-specific error types.
//!
//! Granular errors for ledger and reconciliation operations, converted to
//! `RollcallError` for HTTP responses.

use std::fmt;

use crate::model::{EventId, PersonId};

/// Payment ledger and webhook errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    // Ledger errors
    /// No transaction exists for the pair.
    NoTransaction { event_id: EventId, person_id: PersonId },
    /// A succeeded payment already covers this attendance.
    AlreadyPaid { event_id: EventId, person_id: PersonId },
    /// Cancelling a succeeded gateway payment needs a refund flow, which
    /// this engine does not own.
    RefundRequired { event_id: EventId, person_id: PersonId },
    /// There is nothing to charge for this event and member.
    NothingToPay { event_id: EventId },

    // Webhook errors
    /// Webhook signature is invalid.
    InvalidWebhookSignature,
    /// Webhook timestamp is too old (replay protection).
    WebhookTimestampExpired { age_seconds: i64 },
    /// Webhook payload is malformed.
    InvalidWebhookPayload { message: String },

    // Gateway errors
    /// The gateway API call failed.
    GatewayApi { operation: String, message: String },
}

impl fmt::Display for PaymentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTransaction { event_id, person_id } => {
                write!(f, "No transaction for event {event_id}, person {person_id}")
            }
            Self::AlreadyPaid { event_id, person_id } => {
                write!(
                    f,
                    "Event {event_id} is already paid for person {person_id}"
                )
            }
            Self::RefundRequired { event_id, person_id } => {
                write!(
                    f,
                    "Succeeded gateway payment for event {event_id}, person {person_id} requires a refund flow"
                )
            }
            Self::NothingToPay { event_id } => {
                write!(f, "Nothing to pay for event {event_id}")
            }
            Self::InvalidWebhookSignature => {
                write!(f, "Invalid webhook signature")
            }
            Self::WebhookTimestampExpired { age_seconds } => {
                write!(f, "Webhook timestamp expired ({age_seconds} seconds old)")
            }
            Self::InvalidWebhookPayload { message } => {
                write!(f, "Invalid webhook payload: {message}")
            }
            Self::GatewayApi { operation, message } => {
                write!(f, "Gateway error during '{operation}': {message}")
            }
        }
    }
}

impl std::error::Error for PaymentError {}

impl From<PaymentError> for crate::error::RollcallError {
    fn from(err: PaymentError) -> Self {
        match &err {
            PaymentError::NoTransaction { .. } => {
                crate::error::RollcallError::NotFound(err.to_string())
            }
            PaymentError::AlreadyPaid { .. } | PaymentError::RefundRequired { .. } => {
                crate::error::RollcallError::Conflict(err.to_string())
            }
            PaymentError::NothingToPay { .. }
            | PaymentError::InvalidWebhookSignature
            | PaymentError::WebhookTimestampExpired { .. }
            | PaymentError::InvalidWebhookPayload { .. } => {
                crate::error::RollcallError::BadRequest(err.to_string())
            }
            PaymentError::GatewayApi { .. } => {
                crate::error::RollcallError::ServiceUnavailable(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_mapping() {
        let err = PaymentError::RefundRequired {
            event_id: Uuid::nil(),
            person_id: Uuid::nil(),
        };
        let top: crate::error::RollcallError = err.into();
        assert!(matches!(top, crate::error::RollcallError::Conflict(_)));

        let err = PaymentError::InvalidWebhookSignature;
        let top: crate::error::RollcallError = err.into();
        assert!(matches!(top, crate::error::RollcallError::BadRequest(_)));

        let err = PaymentError::GatewayApi {
            operation: "create_checkout_session".to_string(),
            message: "timeout".to_string(),
        };
        let top: crate::error::RollcallError = err.into();
        assert!(matches!(
            top,
            crate::error::RollcallError::ServiceUnavailable(_)
        ));
    }

    #[test]
    fn test_display() {
        let err = PaymentError::InvalidWebhookPayload {
            message: "missing session id".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid webhook payload: missing session id"
        );
    }
}
