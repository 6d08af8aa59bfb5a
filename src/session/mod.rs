//! Checkout session store.
//!
//! The checkout form writes its shipping and cart payloads to two slots, a
//! durable one (redis) and a volatile one (process memory), under matching
//! keys. Reconciliation reads them back and clears both after success.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use strum::{Display, IntoStaticStr};
use thiserror::Error;
use tracing::{debug, warn};

mod memory;
mod model;
mod redis_slot;

pub use memory::MemorySlot;
pub use model::{cart_subtotal, AmountOutOfRange, CartItem, CheckoutSession, ShippingInfo};
pub use redis_slot::RedisSlot;

#[derive(Debug, Error)]
pub enum SlotError {
    #[error("session slot unavailable: {0}")]
    Unavailable(String),
    #[error("session payload could not be encoded: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for SlotError {
    fn from(err: redis::RedisError) -> Self {
        SlotError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for SlotError {
    fn from(err: serde_json::Error) -> Self {
        SlotError::Serialization(err.to_string())
    }
}

impl From<SlotError> for crate::errors::ServiceError {
    fn from(err: SlotError) -> Self {
        crate::errors::ServiceError::CacheError(err.to_string())
    }
}

/// String key/value storage for one slot.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionSlot: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, SlotError>;
    async fn set(&self, key: &str, value: String) -> Result<(), SlotError>;
    async fn remove(&self, key: &str) -> Result<(), SlotError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SlotKind {
    #[strum(serialize = "durable")]
    Durable,
    #[strum(serialize = "volatile")]
    Volatile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum SessionKey {
    #[strum(serialize = "checkout_shipping")]
    Shipping,
    #[strum(serialize = "checkout_cart")]
    Cart,
    #[strum(serialize = "pending_payment_reference")]
    PendingReference,
}

impl SessionKey {
    pub const ALL: [SessionKey; 3] = [
        SessionKey::Shipping,
        SessionKey::Cart,
        SessionKey::PendingReference,
    ];

    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

pub struct CheckoutSessionStore {
    durable: Arc<dyn SessionSlot>,
    volatile: Arc<dyn SessionSlot>,
    namespace: String,
}

impl CheckoutSessionStore {
    pub fn new(
        durable: Arc<dyn SessionSlot>,
        volatile: Arc<dyn SessionSlot>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            durable,
            volatile,
            namespace: namespace.into(),
        }
    }

    /// Store with two in-memory slots.
    pub fn in_memory(namespace: impl Into<String>) -> Self {
        Self::new(
            Arc::new(MemorySlot::new()),
            Arc::new(MemorySlot::new()),
            namespace,
        )
    }

    pub fn key(&self, session_id: &str, key: SessionKey) -> String {
        format!("{}:{}:{}", self.namespace, session_id, key.as_str())
    }

    fn slot(&self, kind: SlotKind) -> &dyn SessionSlot {
        match kind {
            SlotKind::Durable => self.durable.as_ref(),
            SlotKind::Volatile => self.volatile.as_ref(),
        }
    }

    /// Writes the checkout form to both slots. Succeeds if at least one slot
    /// accepted both payloads.
    pub async fn save(&self, session_id: &str, session: &CheckoutSession) -> Result<(), SlotError> {
        let shipping = serde_json::to_string(&session.shipping_info)?;
        let cart = serde_json::to_string(&session.cart_items)?;

        self.write_both(session_id, &[
            (SessionKey::Shipping, shipping),
            (SessionKey::Cart, cart),
        ])
        .await
    }

    /// Records the reference of the payment currently in flight.
    pub async fn track_reference(&self, session_id: &str, reference: &str) -> Result<(), SlotError> {
        self.write_both(session_id, &[(SessionKey::PendingReference, reference.to_string())])
            .await
    }

    async fn write_both(
        &self,
        session_id: &str,
        entries: &[(SessionKey, String)],
    ) -> Result<(), SlotError> {
        let mut last_error = None;
        let mut accepted = 0usize;

        for kind in [SlotKind::Durable, SlotKind::Volatile] {
            let slot = self.slot(kind);
            let mut slot_ok = true;
            for (key, value) in entries {
                if let Err(err) = slot.set(&self.key(session_id, *key), value.clone()).await {
                    warn!(slot = %kind, key = key.as_str(), error = %err, "failed to write checkout session");
                    last_error = Some(err);
                    slot_ok = false;
                    break;
                }
            }
            if slot_ok {
                accepted += 1;
            }
        }

        match (accepted, last_error) {
            (0, Some(err)) => Err(err),
            _ => Ok(()),
        }
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        kind: SlotKind,
        session_id: &str,
        key: SessionKey,
    ) -> Option<T> {
        let raw = match self.slot(kind).get(&self.key(session_id, key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(slot = %kind, key = key.as_str(), error = %err, "checkout session read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(slot = %kind, key = key.as_str(), error = %err, "checkout session payload is malformed");
                None
            }
        }
    }

    pub async fn read_shipping(&self, kind: SlotKind, session_id: &str) -> Option<ShippingInfo> {
        self.read_json(kind, session_id, SessionKey::Shipping).await
    }

    pub async fn read_cart(&self, kind: SlotKind, session_id: &str) -> Option<Vec<CartItem>> {
        self.read_json(kind, session_id, SessionKey::Cart).await
    }

    pub async fn pending_reference(&self, kind: SlotKind, session_id: &str) -> Option<String> {
        match self
            .slot(kind)
            .get(&self.key(session_id, SessionKey::PendingReference))
            .await
        {
            Ok(value) => value,
            Err(err) => {
                warn!(slot = %kind, error = %err, "pending reference read failed");
                None
            }
        }
    }

    /// Removes every checkout key from both slots. Failures are logged only.
    pub async fn clear(&self, session_id: &str) {
        for kind in [SlotKind::Durable, SlotKind::Volatile] {
            for key in SessionKey::ALL {
                if let Err(err) = self.slot(kind).remove(&self.key(session_id, key)).await {
                    warn!(slot = %kind, key = key.as_str(), error = %err, "failed to clear checkout session key");
                }
            }
        }
        debug!(session_id, "checkout session cleared");
    }
}
