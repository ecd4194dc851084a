//! Engine configuration.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Configuration for the attendance/payment engine.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Currency used when an event defines neither tiers nor a currency.
    #[serde(default = "default_currency")]
    pub default_currency: String,
    /// Account details handed out with bank transfer intents.
    #[serde(default)]
    pub bank_details: Option<BankDetails>,
    pub webhook: WebhookConfig,
}

/// Bank account details shown to members paying by transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankDetails {
    pub account_name: String,
    pub sort_code: String,
    pub account_number: String,
}

/// Settings for inbound gateway webhooks.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Shared secret for signature verification. Never exposed in debug
    /// output.
    pub secret: SecretString,
    /// Maximum accepted age of a signed payload, in seconds.
    #[serde(default = "default_tolerance_secs")]
    pub tolerance_secs: i64,
}

fn default_currency() -> String {
    "gbp".to_string()
}

fn default_tolerance_secs() -> i64 {
    300
}

impl EngineConfig {
    /// Build a config from environment variables.
    ///
    /// - `ROLLCALL_CURRENCY`: default currency code
    /// - `ROLLCALL_WEBHOOK_SECRET`: webhook signing secret (required)
    /// - `ROLLCALL_WEBHOOK_TOLERANCE_SECS`: signature timestamp tolerance
    /// - `ROLLCALL_BANK_ACCOUNT_NAME` / `ROLLCALL_BANK_SORT_CODE` /
    ///   `ROLLCALL_BANK_ACCOUNT_NUMBER`: bank transfer details
    pub fn from_env() -> crate::error::Result<Self> {
        let secret = std::env::var("ROLLCALL_WEBHOOK_SECRET").map_err(|_| {
            crate::error::RollcallError::internal("ROLLCALL_WEBHOOK_SECRET is not set")
        })?;

        let tolerance_secs = std::env::var("ROLLCALL_WEBHOOK_TOLERANCE_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_tolerance_secs);

        let bank_details = match (
            std::env::var("ROLLCALL_BANK_ACCOUNT_NAME"),
            std::env::var("ROLLCALL_BANK_SORT_CODE"),
            std::env::var("ROLLCALL_BANK_ACCOUNT_NUMBER"),
        ) {
            (Ok(account_name), Ok(sort_code), Ok(account_number)) => Some(BankDetails {
                account_name,
                sort_code,
                account_number,
            }),
            _ => None,
        };

        Ok(Self {
            default_currency: std::env::var("ROLLCALL_CURRENCY")
                .unwrap_or_else(|_| default_currency()),
            bank_details,
            webhook: WebhookConfig {
                secret: secret.into(),
                tolerance_secs,
            },
        })
    }

    /// A config suitable for tests: fixed secret, no bank details.
    #[must_use]
    pub fn for_testing(secret: impl Into<SecretString>) -> Self {
        Self {
            default_currency: default_currency(),
            bank_details: Some(BankDetails {
                account_name: "Test Club".to_string(),
                sort_code: "00-00-00".to_string(),
                account_number: "00000000".to_string(),
            }),
            webhook: WebhookConfig {
                secret: secret.into(),
                tolerance_secs: default_tolerance_secs(),
            },
        }
    }
}
