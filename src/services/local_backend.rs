use async_trait::async_trait;
use serde_json::json;
use tracing::{instrument, warn};

use crate::{
    errors::ServiceError,
    reconciliation::{
        ClientError, CreateOrderPayload, CreateOrderResponse, OrderBackend, OrderExistsResponse,
        VerifyPaymentResponse,
    },
    services::{orders::OrderService, payments::PaymentService},
};

/// `OrderBackend` served in-process by the payment and order services.
///
/// The callback handler runs in the same process as the API, so the flow
/// calls the services directly instead of looping back over HTTP.
#[derive(Clone)]
pub struct LocalOrderBackend {
    payments: PaymentService,
    orders: OrderService,
}

impl LocalOrderBackend {
    pub fn new(payments: PaymentService, orders: OrderService) -> Self {
        Self { payments, orders }
    }
}

/// Maps a service failure onto the create-order envelope the HTTP API returns.
pub fn rejection(err: &ServiceError) -> CreateOrderResponse {
    match err {
        ServiceError::ValidationError(details) => {
            CreateOrderResponse::rejected("Validation failed", Some(json!(details)))
        }
        other => CreateOrderResponse::rejected(other.response_message(), None),
    }
}

#[async_trait]
impl OrderBackend for LocalOrderBackend {
    async fn verify_payment(&self, reference: &str) -> Result<VerifyPaymentResponse, ClientError> {
        Ok(self.payments.verify(reference).await)
    }

    #[instrument(skip(self))]
    async fn check_order_exists(&self, reference: &str) -> Result<OrderExistsResponse, ClientError> {
        let existing = self.orders.find_by_reference(reference).await.map_err(|e| {
            warn!(error = %e, "order lookup failed");
            ClientError::Transport(e.to_string())
        })?;

        Ok(OrderExistsResponse {
            exists: existing.is_some(),
            order_id: existing.map(|order| order.id),
        })
    }

    #[instrument(skip(self, payload), fields(order_id = %payload.order_id))]
    async fn create_order(&self, payload: &CreateOrderPayload) -> Result<CreateOrderResponse, ClientError> {
        match self.orders.create_order(payload.clone()).await {
            Ok(outcome) if outcome.already_existed() => {
                Ok(CreateOrderResponse::existing(outcome.order().id.clone()))
            }
            Ok(outcome) => Ok(CreateOrderResponse::created(outcome.order().id.clone())),
            Err(e) => {
                warn!(error = %e, "order creation rejected");
                Ok(rejection(&e))
            }
        }
    }
}
