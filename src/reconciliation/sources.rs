//! Ordered lookup of checkout data. Each source is tried in turn and the
//! first hit wins.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use strum::Display;
use tracing::{debug, warn};

use crate::session::{CartItem, CheckoutSessionStore, ShippingInfo, SlotKind};

pub const METADATA_SHIPPING_KEY: &str = "shippingInfo";
pub const METADATA_CART_KEY: &str = "cartItems";
pub const METADATA_SESSION_KEY: &str = "sessionId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionSource {
    DurableSlot,
    VolatileSlot,
    LiveCart,
    GatewayMetadata,
}

pub fn shipping_precedence() -> &'static [SessionSource] {
    &[
        SessionSource::DurableSlot,
        SessionSource::VolatileSlot,
        SessionSource::GatewayMetadata,
    ]
}

pub fn cart_precedence() -> &'static [SessionSource] {
    &[
        SessionSource::DurableSlot,
        SessionSource::VolatileSlot,
        SessionSource::LiveCart,
        SessionSource::GatewayMetadata,
    ]
}

/// The buyer's current cart, outside the checkout snapshot.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LiveCart: Send + Sync {
    async fn items(&self, session_id: Option<String>) -> Vec<CartItem>;
}

/// Reads `key` from gateway metadata. The value may be an embedded JSON
/// object or a JSON document serialized into a string.
pub fn metadata_field<T: DeserializeOwned>(metadata: &Value, key: &str) -> Option<T> {
    let value = metadata.get(key)?;
    let parsed = match value {
        Value::Null => return None,
        Value::String(raw) => serde_json::from_str(raw)
            .or_else(|_| serde_json::from_value(value.clone())),
        other => serde_json::from_value(other.clone()),
    };
    match parsed {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            warn!(key, error = %err, "gateway metadata field is malformed");
            None
        }
    }
}

/// Session id the checkout form stamped into the gateway metadata.
pub fn metadata_session_id(metadata: &Value) -> Option<String> {
    metadata
        .get(METADATA_SESSION_KEY)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
}

pub struct SessionResolver<'a> {
    store: &'a CheckoutSessionStore,
    session_id: Option<&'a str>,
    live_cart: Option<&'a dyn LiveCart>,
    metadata: Option<&'a Value>,
}

impl<'a> SessionResolver<'a> {
    pub fn new(store: &'a CheckoutSessionStore, session_id: Option<&'a str>) -> Self {
        Self {
            store,
            session_id,
            live_cart: None,
            metadata: None,
        }
    }

    pub fn with_live_cart(mut self, live_cart: Option<&'a dyn LiveCart>) -> Self {
        self.live_cart = live_cart;
        self
    }

    pub fn with_metadata(mut self, metadata: Option<&'a Value>) -> Self {
        self.metadata = metadata;
        self
    }

    async fn shipping_from(&self, source: SessionSource) -> Option<ShippingInfo> {
        match source {
            SessionSource::DurableSlot => {
                self.store
                    .read_shipping(SlotKind::Durable, self.session_id?)
                    .await
            }
            SessionSource::VolatileSlot => {
                self.store
                    .read_shipping(SlotKind::Volatile, self.session_id?)
                    .await
            }
            SessionSource::GatewayMetadata => metadata_field(self.metadata?, METADATA_SHIPPING_KEY),
            SessionSource::LiveCart => None,
        }
    }

    async fn cart_from(&self, source: SessionSource) -> Option<Vec<CartItem>> {
        let items = match source {
            SessionSource::DurableSlot => {
                self.store
                    .read_cart(SlotKind::Durable, self.session_id?)
                    .await
            }
            SessionSource::VolatileSlot => {
                self.store
                    .read_cart(SlotKind::Volatile, self.session_id?)
                    .await
            }
            SessionSource::LiveCart => Some(
                self.live_cart?
                    .items(self.session_id.map(str::to_owned))
                    .await,
            ),
            SessionSource::GatewayMetadata => metadata_field(self.metadata?, METADATA_CART_KEY),
        }?;
        (!items.is_empty()).then_some(items)
    }

    pub async fn resolve_shipping(&self) -> Option<(SessionSource, ShippingInfo)> {
        for source in shipping_precedence() {
            if let Some(shipping) = self.shipping_from(*source).await {
                debug!(source = %source, "shipping information resolved");
                return Some((*source, shipping));
            }
        }
        None
    }

    /// An empty cart counts as a miss.
    pub async fn resolve_cart(&self) -> Option<(SessionSource, Vec<CartItem>)> {
        for source in cart_precedence() {
            if let Some(items) = self.cart_from(*source).await {
                debug!(source = %source, count = items.len(), "cart items resolved");
                return Some((*source, items));
            }
        }
        None
    }
}
