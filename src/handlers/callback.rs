use axum::{
    extract::{RawQuery, State},
    http::HeaderMap,
    response::Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

use super::SESSION_COOKIE;
use crate::auth::{cookie_value, request_identity, CookieIdentityProvider};
use crate::handlers::AppState;
use crate::reconciliation::{
    CallbackQuery, IdentityGate, Navigation, Phase, ReconciliationFlow, ReconciliationOutcome,
};
use crate::services::LocalOrderBackend;

/// What the callback page renders: a status line plus where to go next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResponse {
    pub status: Phase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub already_processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_after_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_path: Option<String>,
}

impl From<ReconciliationOutcome> for CallbackResponse {
    fn from(outcome: ReconciliationOutcome) -> Self {
        let (redirect_to, redirect_after_ms, retry_path) = match outcome.navigation {
            Navigation::OrderView { path, after } => (Some(path), Some(after.as_millis() as u64), None),
            Navigation::RetryPayment { path } => (None, None, Some(path)),
        };

        Self {
            status: outcome.state.phase,
            message: outcome.state.message,
            reference: outcome.reference,
            order_id: outcome.order_id,
            already_processed: outcome.already_processed,
            error_kind: outcome.error.map(|e| e.kind().to_string()),
            redirect_to,
            redirect_after_ms,
            retry_path,
        }
    }
}

/// Gateway redirect target. Builds one reconciliation flow for this request
/// and drives it to a terminal state. Both outcomes answer 200; the page
/// reads `status`.
#[instrument(skip_all)]
pub async fn payment_callback(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
) -> Json<CallbackResponse> {
    let query = CallbackQuery::from_query(raw.as_deref().unwrap_or_default());
    let session_id = cookie_value(&headers, SESSION_COOKIE).map(str::to_owned);

    // The bearer token is known before the flow starts, so the gate is
    // already resolved; the auth cookie is the fallback read.
    let identity = IdentityGate::resolved(request_identity(state.tokens.as_ref(), &headers));
    let fallback = CookieIdentityProvider::from_headers(state.tokens.clone(), &headers);

    let backend = LocalOrderBackend::new(state.payments.clone(), state.orders.clone());
    let mut flow = ReconciliationFlow::new(
        Arc::new(backend),
        state.sessions.clone(),
        identity,
        state.config.flow_settings(),
    )
    .with_fallback_identity(Arc::new(fallback));
    if let Some(events) = state.event_sender.clone() {
        flow = flow.with_events(events);
    }

    match flow.run(&query, session_id.as_deref()).await {
        Some(outcome) => {
            info!(status = %outcome.state.phase, "payment callback handled");
            Json(outcome.into())
        }
        None => {
            let current = flow.state();
            Json(CallbackResponse {
                status: current.phase,
                message: current.message,
                reference: None,
                order_id: None,
                already_processed: false,
                error_kind: None,
                redirect_to: None,
                redirect_after_ms: None,
                retry_path: None,
            })
        }
    }
}
