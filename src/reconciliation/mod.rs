//! Payment callback reconciliation.
//!
//! Turns a gateway redirect into exactly one order: wait for the buyer's
//! identity, extract and latch the reference, verify the payment, look for an
//! existing order, resolve the checkout session, create the order and clear
//! the session. Every failure ends in a terminal error state whose message
//! carries the reference.

pub mod client;
pub mod error;
pub mod flow;
pub mod guard;
pub mod identity;
pub mod materializer;
pub mod reference;
pub mod sources;

pub use client::{
    bounded, ClientError, CreateOrderPayload, CreateOrderResponse, HttpOrderBackend, OrderBackend,
    OrderExistsResponse, PaymentDetails, VerifiedPayment, VerifyPaymentResponse,
};
pub use error::{ErrorKind, ReconciliationError, SessionDatum};
pub use flow::{
    FlowSettings, Navigation, Phase, ReconciliationFlow, ReconciliationOutcome, ReconciliationState,
};
pub use guard::IdempotencyGuard;
pub use identity::{
    identity_channel, IdentityGate, IdentityProvider, IdentityPublisher, IdentityStatus,
    NoIdentity, UserId,
};
pub use materializer::{compute_totals, generate_order_id, OrderTotals};
pub use reference::{extract_reference, CallbackQuery, PaymentReference, ReferenceKeys};
pub use sources::{cart_precedence, shipping_precedence, LiveCart, SessionSource};
