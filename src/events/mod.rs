use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Creates a bounded event channel.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

// Events emitted by checkout and reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    PaymentInitialized {
        reference: String,
        session_id: String,
    },
    OrderMaterialized {
        order_id: String,
        reference: String,
        user_id: Option<String>,
        at: DateTime<Utc>,
    },
    DuplicateCallback {
        order_id: String,
        reference: String,
    },
    ReconciliationFailed {
        reference: Option<String>,
        kind: String,
        message: String,
        payment_taken: bool,
    },
}

pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::PaymentInitialized {
                reference,
                session_id,
            } => {
                info!(%reference, %session_id, "payment initialized");
            }
            Event::OrderMaterialized {
                order_id,
                reference,
                user_id,
                at,
            } => {
                info!(
                    %order_id,
                    %reference,
                    guest = user_id.is_none(),
                    at = %at.to_rfc3339(),
                    "order materialized from verified payment"
                );
            }
            Event::DuplicateCallback {
                order_id,
                reference,
            } => {
                warn!(%order_id, %reference, "duplicate payment callback absorbed");
            }
            Event::ReconciliationFailed {
                reference,
                kind,
                message,
                payment_taken,
            } => {
                // Money moved without an order: this one needs a human.
                if payment_taken {
                    error!(
                        reference = reference.as_deref().unwrap_or("-"),
                        %kind,
                        %message,
                        "SUPPORT REQUIRED: payment captured but no order recorded"
                    );
                } else {
                    warn!(
                        reference = reference.as_deref().unwrap_or("-"),
                        %kind,
                        %message,
                        "payment callback failed"
                    );
                }
            }
        }
    }

    info!("Event processing loop stopped");
}
