use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{to_minor_units, InitializeTransaction, PaymentGateway},
    metrics,
    reconciliation::{compute_totals, VerifiedPayment, VerifyPaymentResponse},
    session::{CartItem, CheckoutSession, CheckoutSessionStore, ShippingInfo},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Checkout form submission.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitializePaymentRequest {
    #[validate(email)]
    pub email: String,
    /// Reuse an existing checkout session; a new one is minted when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    #[validate]
    pub shipping_info: ShippingInfo,
    #[validate(length(min = 1, message = "Cart is empty"))]
    pub cart_items: Vec<CartItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializedPayment {
    pub authorization_url: String,
    pub reference: String,
    pub access_code: Option<String>,
    pub session_id: String,
}

/// Talks to the gateway on behalf of checkout and reconciliation.
#[derive(Clone)]
pub struct PaymentService {
    gateway: Arc<dyn PaymentGateway>,
    sessions: Arc<CheckoutSessionStore>,
    callback_url: String,
    currency: String,
    event_sender: Option<EventSender>,
}

impl PaymentService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        sessions: Arc<CheckoutSessionStore>,
        callback_url: impl Into<String>,
        currency: impl Into<String>,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            gateway,
            sessions,
            callback_url: callback_url.into(),
            currency: currency.into(),
            event_sender,
        }
    }

    /// Stores the checkout session, opens a gateway transaction carrying a
    /// copy of it as metadata, and tracks the returned reference.
    #[instrument(skip(self, request), fields(email = %request.email, items = request.cart_items.len()))]
    pub async fn initialize(&self, request: InitializePaymentRequest) -> Result<InitializedPayment, ServiceError> {
        request.validate()?;
        for item in &request.cart_items {
            item.validate()?;
        }

        let totals = compute_totals(&request.cart_items)
            .map_err(|e| ServiceError::ValidationError(format!("Cart total is invalid: {}", e)))?;
        let amount = to_minor_units(totals.total)
            .filter(|amount| *amount > 0)
            .ok_or_else(|| ServiceError::ValidationError("Order total must be positive".to_string()))?;

        let session_id = request
            .session_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let session = CheckoutSession {
            shipping_info: request.shipping_info,
            cart_items: request.cart_items,
        };
        self.sessions.save(&session_id, &session).await?;

        let transaction = InitializeTransaction {
            email: request.email,
            amount,
            currency: self.currency.clone(),
            callback_url: self.callback_url.clone(),
            metadata: json!({
                "sessionId": session_id,
                "shippingInfo": session.shipping_info,
                "cartItems": session.cart_items,
            }),
            reference: None,
        };

        let initialized = self.gateway.initialize(&transaction).await.map_err(|e| {
            error!(error = %e, "Failed to initialize gateway transaction");
            ServiceError::from(e)
        })?;

        if let Err(e) = self
            .sessions
            .track_reference(&session_id, &initialized.reference)
            .await
        {
            warn!(error = %e, "Failed to track pending payment reference");
        }

        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender
                .send(Event::PaymentInitialized {
                    reference: initialized.reference.clone(),
                    session_id: session_id.clone(),
                })
                .await
            {
                warn!(error = %e, "Failed to publish payment event");
            }
        }

        info!(reference = %initialized.reference, "payment initialized");
        Ok(InitializedPayment {
            authorization_url: initialized.authorization_url,
            reference: initialized.reference,
            access_code: initialized.access_code,
            session_id,
        })
    }

    /// Verified only when the gateway answered and the transaction status is success.
    #[instrument(skip(self))]
    pub async fn verify(&self, reference: &str) -> VerifyPaymentResponse {
        if reference.trim().is_empty() {
            return VerifyPaymentResponse::failed("Payment reference is required");
        }

        match self.gateway.verify(reference).await {
            Ok(transaction) => {
                let verified = transaction.is_successful();
                metrics::record_verification(if verified { "verified" } else { "declined" });
                info!(status = %transaction.status, verified, "payment verification completed");
                VerifyPaymentResponse::verified(VerifiedPayment {
                    verified,
                    metadata: transaction.metadata(),
                    error_message: (!verified).then(|| transaction.failure_reason()),
                })
            }
            Err(e) => {
                metrics::record_verification("error");
                warn!(error = %e, "payment verification failed");
                VerifyPaymentResponse::failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayError, GatewayTransaction, InitializedTransaction, MockPaymentGateway};
    use crate::session::SlotKind;
    use rust_decimal_macros::dec;

    fn request() -> InitializePaymentRequest {
        InitializePaymentRequest {
            email: "fan@example.com".into(),
            session_id: Some("sess-9".into()),
            shipping_info: ShippingInfo {
                full_name: "Ngozi Umeh".into(),
                email: "fan@example.com".into(),
                phone: "08123456789".into(),
                address: "4 Ring Road".into(),
                city: "Ibadan".into(),
                region: Some("Oyo".into()),
                postal_code: None,
                country: "NG".into(),
            },
            cart_items: vec![CartItem {
                product_id: "retro-94".into(),
                name: "Retro 94 Jersey".into(),
                price: dec!(10),
                quantity: 2,
                image: None,
                size: Some("S".into()),
                color_id: Some("green".into()),
            }],
        }
    }

    fn service(gateway: MockPaymentGateway, sessions: Arc<CheckoutSessionStore>) -> PaymentService {
        PaymentService::new(
            Arc::new(gateway),
            sessions,
            "https://shop.test/payment/callback",
            "NGN",
            None,
        )
    }

    #[tokio::test]
    async fn initialize_stores_session_and_sends_metadata() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_initialize()
            .withf(|tx: &InitializeTransaction| {
                tx.amount == 2000
                    && tx.currency == "NGN"
                    && tx.callback_url == "https://shop.test/payment/callback"
                    && tx.metadata["sessionId"] == "sess-9"
                    && tx.metadata["shippingInfo"]["fullName"] == "Ngozi Umeh"
            })
            .times(1)
            .returning(|_| {
                Ok(InitializedTransaction {
                    authorization_url: "https://pay.test/abc".into(),
                    access_code: Some("abc".into()),
                    reference: "REF-NEW".into(),
                })
            });

        let sessions = Arc::new(CheckoutSessionStore::in_memory("t"));
        let initialized = service(gateway, sessions.clone())
            .initialize(request())
            .await
            .unwrap();

        assert_eq!(initialized.reference, "REF-NEW");
        assert_eq!(initialized.session_id, "sess-9");
        assert!(sessions.read_shipping(SlotKind::Durable, "sess-9").await.is_some());
        assert_eq!(
            sessions.pending_reference(SlotKind::Volatile, "sess-9").await.as_deref(),
            Some("REF-NEW")
        );
    }

    #[tokio::test]
    async fn empty_cart_never_reaches_gateway() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_initialize().times(0);
        let mut req = request();
        req.cart_items.clear();

        let err = service(gateway, Arc::new(CheckoutSessionStore::in_memory("t")))
            .initialize(req)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn oversized_cart_is_a_validation_error() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_initialize().times(0);
        let sessions = Arc::new(CheckoutSessionStore::in_memory("t"));
        let mut req = request();
        req.cart_items[0].price = rust_decimal::Decimal::MAX;

        let err = service(gateway, sessions.clone())
            .initialize(req)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(ref msg) if msg.contains("out of range")));
        assert!(sessions.read_cart(SlotKind::Durable, "sess-9").await.is_none());
    }

    #[tokio::test]
    async fn negative_price_is_rejected() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_initialize().times(0);
        let mut req = request();
        let full_price = CartItem {
            price: dec!(30.00),
            quantity: 1,
            ..req.cart_items[0].clone()
        };
        req.cart_items[0].price = dec!(-5.00);
        req.cart_items.push(full_price);

        let err = service(gateway, Arc::new(CheckoutSessionStore::in_memory("t")))
            .initialize(req)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn verify_maps_transaction_status() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_verify().returning(|reference| {
            Ok(GatewayTransaction {
                reference: reference.to_string(),
                status: if reference == "GOOD" { "success" } else { "failed" }.into(),
                amount: 2000,
                currency: Some("NGN".into()),
                gateway_response: Some("Declined by issuer".into()),
                metadata: Some(serde_json::json!("")),
                paid_at: None,
            })
        });
        let svc = service(gateway, Arc::new(CheckoutSessionStore::in_memory("t")));

        let good = svc.verify("GOOD").await;
        assert!(good.success);
        assert!(good.data.as_ref().unwrap().verified);
        assert!(good.data.unwrap().metadata.is_none());

        let bad = svc.verify("BAD").await;
        assert!(bad.success);
        let data = bad.data.unwrap();
        assert!(!data.verified);
        assert_eq!(data.error_message.as_deref(), Some("Declined by issuer"));
    }

    #[tokio::test]
    async fn gateway_outage_is_an_unsuccessful_envelope() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_verify()
            .returning(|_| Err(GatewayError::Transport("connection refused".into())));
        let svc = service(gateway, Arc::new(CheckoutSessionStore::in_memory("t")));

        let response = svc.verify("REF").await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("connection refused"));
    }
}
