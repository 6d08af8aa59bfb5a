use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn, Span};

use super::client::{bounded, OrderBackend, OrderExistsResponse, VerifiedPayment, VerifyPaymentResponse};
use super::error::{ReconciliationError, SessionDatum};
use super::guard::IdempotencyGuard;
use super::identity::{IdentityGate, IdentityProvider, NoIdentity, UserId};
use super::materializer::{build_payload, generate_order_id, materialize};
use super::reference::{extract_reference, CallbackQuery, PaymentReference, ReferenceKeys};
use super::sources::{metadata_session_id, LiveCart, SessionResolver};
use crate::events::{Event, EventSender};
use crate::metrics;
use crate::session::{CartItem, CheckoutSessionStore, ShippingInfo};

pub const WAITING_FOR_IDENTITY: &str = "Waiting for account details...";
pub const VERIFYING_PAYMENT: &str = "Verifying your payment...";
pub const CREATING_ORDER: &str = "Payment verified. Creating your order...";
pub const ORDER_CREATED: &str = "Payment successful! Your order has been placed.";
pub const ALREADY_PROCESSED: &str = "This payment has already been processed. Taking you to your order.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Loading,
    Success,
    Error,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Phase::Loading)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationState {
    pub phase: Phase,
    pub message: String,
}

impl Default for ReconciliationState {
    fn default() -> Self {
        Self {
            phase: Phase::Loading,
            message: VERIFYING_PAYMENT.to_string(),
        }
    }
}

/// Where the buyer goes once the run is over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// Order success view, shown after `after` has elapsed.
    OrderView { path: String, after: Duration },
    /// Back to payment initiation; a new reference will be issued.
    RetryPayment { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationOutcome {
    pub state: ReconciliationState,
    pub reference: Option<String>,
    pub order_id: Option<String>,
    pub already_processed: bool,
    pub error: Option<ReconciliationError>,
    pub navigation: Navigation,
}

impl ReconciliationOutcome {
    pub fn is_success(&self) -> bool {
        self.state.phase == Phase::Success
    }
}

#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub reference_keys: ReferenceKeys,
    pub verify_timeout: Duration,
    pub create_timeout: Duration,
    pub redirect_delay: Duration,
    /// Success view template; `{orderId}` is substituted.
    pub success_path: String,
    pub retry_path: String,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            reference_keys: ReferenceKeys::default(),
            verify_timeout: Duration::from_secs(30),
            create_timeout: Duration::from_secs(30),
            redirect_delay: Duration::from_millis(2_000),
            success_path: "/orders/{orderId}/success".to_string(),
            retry_path: "/checkout/payment".to_string(),
        }
    }
}

impl FlowSettings {
    pub fn order_view_path(&self, order_id: &str) -> String {
        self.success_path.replace("{orderId}", order_id)
    }
}

struct Completion {
    order_id: String,
    user_id: Option<UserId>,
    already_processed: bool,
}

impl Completion {
    fn already_processed(order_id: String) -> Self {
        Self {
            order_id,
            user_id: None,
            already_processed: true,
        }
    }
}

/// One reconciliation attempt for one gateway redirect.
///
/// A flow is single use: the first `run` that gets past the identity gate
/// latches the guard, and once a terminal state is reached every further
/// `run` is a no-op.
pub struct ReconciliationFlow {
    backend: Arc<dyn OrderBackend>,
    sessions: Arc<CheckoutSessionStore>,
    identity: IdentityGate,
    fallback_identity: Arc<dyn IdentityProvider>,
    live_cart: Option<Arc<dyn LiveCart>>,
    events: Option<EventSender>,
    settings: FlowSettings,
    guard: IdempotencyGuard,
    state: watch::Sender<ReconciliationState>,
}

impl ReconciliationFlow {
    pub fn new(
        backend: Arc<dyn OrderBackend>,
        sessions: Arc<CheckoutSessionStore>,
        identity: IdentityGate,
        settings: FlowSettings,
    ) -> Self {
        let (state, _) = watch::channel(ReconciliationState::default());
        Self {
            backend,
            sessions,
            identity,
            fallback_identity: Arc::new(NoIdentity),
            live_cart: None,
            events: None,
            settings,
            guard: IdempotencyGuard::new(),
            state,
        }
    }

    /// Direct identity read used when the gate resolved to a guest.
    pub fn with_fallback_identity(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.fallback_identity = provider;
        self
    }

    pub fn with_live_cart(mut self, live_cart: Arc<dyn LiveCart>) -> Self {
        self.live_cart = Some(live_cart);
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> ReconciliationState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReconciliationState> {
        self.state.subscribe()
    }

    /// Drives the callback to a terminal state. Returns `None` when this flow
    /// has already been triggered.
    #[instrument(skip_all, fields(session_id = session_id.unwrap_or("-"), reference = tracing::field::Empty))]
    pub async fn run(
        &self,
        query: &CallbackQuery,
        session_id: Option<&str>,
    ) -> Option<ReconciliationOutcome> {
        if self.state.borrow().phase.is_terminal() {
            debug!("reconciliation already finished; ignoring trigger");
            return None;
        }

        if self.identity.is_pending() {
            self.transition(Phase::Loading, WAITING_FOR_IDENTITY);
            debug!("waiting for identity resolution");
        }
        self.identity.wait_resolved().await;

        let Some(reference) = extract_reference(query, &self.settings.reference_keys) else {
            return Some(self.fail(ReconciliationError::MissingReference).await);
        };
        Span::current().record("reference", reference.as_str());

        if !self.guard.try_latch(&reference) {
            return None;
        }

        self.transition(Phase::Loading, VERIFYING_PAYMENT);
        let outcome = match self.reconcile(&reference, session_id).await {
            Ok(done) => self.succeed(&reference, done).await,
            Err(err) => self.fail(err).await,
        };
        Some(outcome)
    }

    async fn reconcile(
        &self,
        reference: &PaymentReference,
        session_id: Option<&str>,
    ) -> Result<Completion, ReconciliationError> {
        let payment = self.verify(reference).await?;
        let metadata = payment.metadata;
        let session_id = session_id
            .map(str::to_owned)
            .or_else(|| metadata.as_ref().and_then(metadata_session_id));

        if let Some(order_id) = self.existing_order(reference).await {
            info!(%order_id, "order already recorded for this reference");
            self.cleanup(session_id.as_deref()).await;
            return Ok(Completion::already_processed(order_id));
        }

        self.transition(Phase::Loading, CREATING_ORDER);
        let (shipping, items) = match self
            .resolve_checkout(reference, session_id.as_deref(), metadata.as_ref())
            .await
        {
            Ok(resolved) => resolved,
            Err(err) => {
                // A concurrent callback may have created the order and cleared the session.
                if let Some(order_id) = self.existing_order(reference).await {
                    info!(%order_id, "order recorded by a concurrent callback");
                    return Ok(Completion::already_processed(order_id));
                }
                return Err(err);
            }
        };

        let user_id = self.resolve_user().await;
        let payload = build_payload(generate_order_id(), reference, user_id.clone(), shipping, items)
            .map_err(|err| {
                warn!(error = %err, "cart totals could not be computed");
                ReconciliationError::Materialization {
                    reference: reference.to_string(),
                    reason: err.to_string(),
                }
            })?;

        let created = materialize(self.backend.as_ref(), &payload, self.settings.create_timeout)
            .await
            .map_err(|reason| ReconciliationError::Materialization {
                reference: reference.to_string(),
                reason,
            })?;

        self.cleanup(session_id.as_deref()).await;
        Ok(Completion {
            order_id: created.order_id,
            user_id,
            already_processed: created.already_existed,
        })
    }

    async fn verify(&self, reference: &PaymentReference) -> Result<VerifiedPayment, ReconciliationError> {
        let response = bounded(
            self.settings.verify_timeout,
            self.backend.verify_payment(reference.as_str()),
        )
        .await
        .map_err(|err| {
            warn!(error = %err, "verify-payment call failed");
            ReconciliationError::Verification {
                reference: reference.to_string(),
                reason: err.to_string(),
            }
        })?;

        let VerifyPaymentResponse {
            success,
            data,
            error,
        } = response;

        match data {
            Some(payment) if success && payment.verified => Ok(payment),
            data => {
                let reason = data
                    .and_then(|payment| payment.error_message)
                    .or(error)
                    .unwrap_or_else(|| "payment could not be verified".to_string());
                warn!(%reason, "payment not verified");
                Err(ReconciliationError::Verification {
                    reference: reference.to_string(),
                    reason,
                })
            }
        }
    }

    /// A failed lookup falls through to creation; the store rejects a second
    /// order for the same reference.
    async fn resolve_checkout(
        &self,
        reference: &PaymentReference,
        session_id: Option<&str>,
        metadata: Option<&Value>,
    ) -> Result<(ShippingInfo, Vec<CartItem>), ReconciliationError> {
        let resolver = SessionResolver::new(&self.sessions, session_id)
            .with_live_cart(self.live_cart.as_deref())
            .with_metadata(metadata);

        let (shipping_source, shipping) =
            resolver
                .resolve_shipping()
                .await
                .ok_or_else(|| ReconciliationError::SessionData {
                    reference: reference.to_string(),
                    datum: SessionDatum::Shipping,
                })?;
        let (cart_source, items) =
            resolver
                .resolve_cart()
                .await
                .ok_or_else(|| ReconciliationError::SessionData {
                    reference: reference.to_string(),
                    datum: SessionDatum::Cart,
                })?;
        debug!(%shipping_source, %cart_source, items = items.len(), "checkout session resolved");
        Ok((shipping, items))
    }

    async fn existing_order(&self, reference: &PaymentReference) -> Option<String> {
        let lookup = bounded(
            self.settings.create_timeout,
            self.backend.check_order_exists(reference.as_str()),
        )
        .await;

        match lookup {
            Ok(OrderExistsResponse {
                exists: true,
                order_id: Some(order_id),
            }) => Some(order_id),
            Ok(OrderExistsResponse { exists: true, .. }) => {
                warn!("backend reported an existing order without an id");
                None
            }
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "duplicate-order check failed; continuing to create");
                None
            }
        }
    }

    /// Identity at this moment, not the one seen when the gate opened.
    async fn resolve_user(&self) -> Option<UserId> {
        match self.identity.current_user() {
            Some(user) => Some(user),
            None => self.fallback_identity.current_user_id().await,
        }
    }

    async fn cleanup(&self, session_id: Option<&str>) {
        match session_id {
            Some(session_id) => self.sessions.clear(session_id).await,
            None => debug!("no checkout session id; nothing to clear"),
        }
    }

    async fn succeed(&self, reference: &PaymentReference, done: Completion) -> ReconciliationOutcome {
        let message = if done.already_processed {
            ALREADY_PROCESSED
        } else {
            ORDER_CREATED
        };
        self.transition(Phase::Success, message);

        let event = if done.already_processed {
            metrics::record_reconciliation("already_processed");
            Event::DuplicateCallback {
                order_id: done.order_id.clone(),
                reference: reference.to_string(),
            }
        } else {
            metrics::record_reconciliation("created");
            Event::OrderMaterialized {
                order_id: done.order_id.clone(),
                reference: reference.to_string(),
                user_id: done.user_id.clone(),
                at: Utc::now(),
            }
        };
        self.emit(event).await;

        info!(order_id = %done.order_id, already_processed = done.already_processed, "payment reconciled");

        ReconciliationOutcome {
            state: ReconciliationState {
                phase: Phase::Success,
                message: message.to_string(),
            },
            reference: Some(reference.to_string()),
            navigation: Navigation::OrderView {
                path: self.settings.order_view_path(&done.order_id),
                after: self.settings.redirect_delay,
            },
            order_id: Some(done.order_id),
            already_processed: done.already_processed,
            error: None,
        }
    }

    async fn fail(&self, err: ReconciliationError) -> ReconciliationOutcome {
        let message = err.to_string();
        self.transition(Phase::Error, &message);

        let kind = err.kind();
        if err.payment_taken() {
            error!(%kind, reference = err.reference().unwrap_or("-"), %message, "reconciliation failed after payment");
        } else {
            warn!(%kind, reference = err.reference().unwrap_or("-"), %message, "reconciliation failed");
        }
        metrics::record_reconciliation(kind.as_ref());
        self.emit(Event::ReconciliationFailed {
            reference: err.reference().map(str::to_owned),
            kind: kind.to_string(),
            message: message.clone(),
            payment_taken: err.payment_taken(),
        })
        .await;

        ReconciliationOutcome {
            state: ReconciliationState {
                phase: Phase::Error,
                message,
            },
            reference: err.reference().map(str::to_owned),
            order_id: None,
            already_processed: false,
            error: Some(err),
            navigation: Navigation::RetryPayment {
                path: self.settings.retry_path.clone(),
            },
        }
    }

    /// Terminal states are never left.
    fn transition(&self, phase: Phase, message: &str) -> bool {
        self.state.send_if_modified(|state| {
            if state.phase.is_terminal() {
                return false;
            }
            *state = ReconciliationState {
                phase,
                message: message.to_string(),
            };
            true
        })
    }

    async fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            if let Err(e) = events.send(event).await {
                warn!(error = %e, "failed to publish reconciliation event");
            }
        }
    }
}
