//! Port to the order backend used by the reconciliation flow, its wire
//! envelopes, and the HTTP adapter.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::session::{CartItem, ShippingInfo};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("network error: {0}")]
    Transport(String),
    #[error("backend responded with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unreadable backend response: {0}")]
    Decode(String),
}

/// Outcome of the gateway verification lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedPayment {
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<VerifiedPayment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerifyPaymentResponse {
    pub fn verified(payment: VerifiedPayment) -> Self {
        Self {
            success: true,
            data: Some(payment),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderExistsResponse {
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    pub method: String,
    pub reference: String,
}

/// Body of the create-order call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderPayload {
    pub order_id: String,
    pub user_id: Option<String>,
    #[serde(default)]
    pub guest_email: Option<String>,
    #[serde(default)]
    pub guest_phone: Option<String>,
    pub customer_name: String,
    pub items: Vec<CartItem>,
    pub shipping: ShippingInfo,
    pub payment: PaymentDetails,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub payment_reference: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub already_exists: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl CreateOrderResponse {
    pub fn created(order_id: impl Into<String>) -> Self {
        Self {
            success: true,
            order_id: Some(order_id.into()),
            ..Default::default()
        }
    }

    pub fn existing(order_id: impl Into<String>) -> Self {
        Self {
            success: true,
            order_id: Some(order_id.into()),
            already_exists: Some(true),
            ..Default::default()
        }
    }

    pub fn rejected(error: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            details,
            ..Default::default()
        }
    }

    pub fn is_duplicate(&self) -> bool {
        self.already_exists.unwrap_or(false)
    }
}

/// Operations the reconciliation flow needs from the backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderBackend: Send + Sync {
    async fn verify_payment(&self, reference: &str) -> Result<VerifyPaymentResponse, ClientError>;

    async fn check_order_exists(&self, reference: &str)
        -> Result<OrderExistsResponse, ClientError>;

    async fn create_order(
        &self,
        payload: &CreateOrderPayload,
    ) -> Result<CreateOrderResponse, ClientError>;
}

/// Runs `fut` with a hard ceiling. Elapsed time becomes `ClientError::Timeout`;
/// nothing is retried.
pub async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Timeout(limit)),
    }
}

/// `OrderBackend` over the storefront's own REST API.
#[derive(Clone)]
pub struct HttpOrderBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpOrderBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    /// Decodes the envelope whatever the status code; the backend reports
    /// failures inside it. Only an undecodable error body becomes `Status`.
    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        match serde_json::from_str::<T>(&body) {
            Ok(envelope) => Ok(envelope),
            Err(err) if status.is_success() => Err(ClientError::Decode(err.to_string())),
            Err(_) => {
                warn!(status = status.as_u16(), "backend returned a non-envelope error body");
                Err(ClientError::Status {
                    status: status.as_u16(),
                    message: error_message(&body),
                })
            }
        }
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

fn transport(err: reqwest::Error) -> ClientError {
    ClientError::Transport(err.to_string())
}

#[async_trait]
impl OrderBackend for HttpOrderBackend {
    #[instrument(skip(self))]
    async fn verify_payment(&self, reference: &str) -> Result<VerifyPaymentResponse, ClientError> {
        debug!("calling verify-payment");
        let response = self
            .client
            .post(self.url("/payments/verify"))
            .json(&serde_json::json!({ "reference": reference }))
            .send()
            .await
            .map_err(transport)?;
        Self::decode(response).await
    }

    #[instrument(skip(self))]
    async fn check_order_exists(
        &self,
        reference: &str,
    ) -> Result<OrderExistsResponse, ClientError> {
        let response = self
            .client
            .get(self.url("/orders/exists"))
            .query(&[("reference", reference)])
            .send()
            .await
            .map_err(transport)?;
        Self::decode(response).await
    }

    #[instrument(skip(self, payload), fields(order_id = %payload.order_id, reference = %payload.payment_reference))]
    async fn create_order(
        &self,
        payload: &CreateOrderPayload,
    ) -> Result<CreateOrderResponse, ClientError> {
        let response = self
            .client
            .post(self.url("/orders"))
            .json(payload)
            .send()
            .await
            .map_err(transport)?;
        Self::decode(response).await
    }
}
