use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::{GatewayError, GatewayTransaction, InitializeTransaction, InitializedTransaction, PaymentGateway};

/// Envelope every gateway endpoint answers with.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

/// REST client for the hosted payment gateway.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    base_url: String,
    secret_key: Option<String>,
    client: reqwest::Client,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.filter(|k| !k.is_empty()),
            client,
        })
    }

    fn secret(&self) -> Result<&str, GatewayError> {
        self.secret_key.as_deref().ok_or(GatewayError::NotConfigured)
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, GatewayError> {
        let status = response.status();
        let body = response.text().await.map_err(map_transport)?;

        let envelope: Envelope<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(GatewayError::Rejected {
                    status: status.as_u16(),
                    message: body.chars().take(200).collect(),
                })
            }
            Err(e) => return Err(GatewayError::Decode(e.to_string())),
        };

        if !status.is_success() || !envelope.status {
            warn!(status = status.as_u16(), message = %envelope.message, "gateway refused request");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message: envelope.message,
            });
        }

        envelope
            .data
            .ok_or_else(|| GatewayError::Decode("response carried no data".to_string()))
    }
}

fn map_transport(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(err.to_string())
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(email = %request.email, amount = request.amount))]
    async fn initialize(
        &self,
        request: &InitializeTransaction,
    ) -> Result<InitializedTransaction, GatewayError> {
        let response = self
            .client
            .post(format!("{}/transaction/initialize", self.base_url))
            .bearer_auth(self.secret()?)
            .json(request)
            .send()
            .await
            .map_err(map_transport)?;

        let initialized: InitializedTransaction = Self::read(response).await?;
        info!(reference = %initialized.reference, "gateway transaction initialized");
        Ok(initialized)
    }

    #[instrument(skip(self))]
    async fn verify(&self, reference: &str) -> Result<GatewayTransaction, GatewayError> {
        let mut url = url::Url::parse(&self.base_url)
            .map_err(|e| GatewayError::Transport(format!("invalid gateway url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::Transport("gateway url cannot carry a path".to_string()))?
            .extend(["transaction", "verify", reference]);

        let response = self
            .client
            .get(url)
            .bearer_auth(self.secret()?)
            .send()
            .await
            .map_err(map_transport)?;

        let transaction: GatewayTransaction = Self::read(response).await?;
        info!(status = %transaction.status, "gateway transaction looked up");
        Ok(transaction)
    }
}
