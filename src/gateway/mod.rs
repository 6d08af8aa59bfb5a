//! Payment gateway adapter.
//!
//! The gateway hosts the payment page. We initialize a transaction, the
//! buyer pays off-site, and the gateway redirects back with the reference,
//! which we then verify.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

mod rest;

pub use rest::HttpPaymentGateway;

pub const SUCCESS_STATUS: &str = "success";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("payment gateway timed out")]
    Timeout,
    #[error("payment gateway unreachable: {0}")]
    Transport(String),
    #[error("payment gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("unreadable payment gateway response: {0}")]
    Decode(String),
    #[error("payment gateway is not configured")]
    NotConfigured,
}

impl From<GatewayError> for crate::errors::ServiceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Timeout => crate::errors::ServiceError::ServiceUnavailable(err.to_string()),
            GatewayError::NotConfigured => crate::errors::ServiceError::InternalError(err.to_string()),
            _ => crate::errors::ServiceError::ExternalServiceError(err.to_string()),
        }
    }
}

/// Request to open a hosted payment page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitializeTransaction {
    pub email: String,
    /// Minor currency units.
    pub amount: i64,
    pub currency: String,
    pub callback_url: String,
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializedTransaction {
    pub authorization_url: String,
    #[serde(default)]
    pub access_code: Option<String>,
    pub reference: String,
}

/// Gateway view of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayTransaction {
    pub reference: String,
    pub status: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub gateway_response: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub paid_at: Option<String>,
}

impl GatewayTransaction {
    pub fn is_successful(&self) -> bool {
        self.status.eq_ignore_ascii_case(SUCCESS_STATUS)
    }

    /// Metadata as sent at initialization. The gateway returns an empty
    /// string when none was attached.
    pub fn metadata(&self) -> Option<Value> {
        match &self.metadata {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(other) => Some(other.clone()),
        }
    }

    /// Reason to show when the payment did not go through.
    pub fn failure_reason(&self) -> String {
        self.gateway_response
            .clone()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| format!("payment status is {}", self.status))
    }
}

/// Converts a major-unit amount to minor units, rounding half away from zero.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    amount
        .checked_mul(Decimal::ONE_HUNDRED)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize(
        &self,
        request: &InitializeTransaction,
    ) -> Result<InitializedTransaction, GatewayError>;

    async fn verify(&self, reference: &str) -> Result<GatewayTransaction, GatewayError>;
}
