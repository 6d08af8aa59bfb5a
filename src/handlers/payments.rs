use axum::{
    extract::{Json, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::Deserialize;
use tracing::info;

use super::SESSION_COOKIE;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::reconciliation::VerifyPaymentResponse;
use crate::services::InitializePaymentRequest;
use crate::ApiResponse;

#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    #[serde(default)]
    pub reference: String,
}

/// Stores the checkout session and opens a hosted payment page.
/// The session id is handed back both in the body and as a cookie so the
/// callback can find the session again.
async fn initialize_payment(
    State(state): State<AppState>,
    Json(request): Json<InitializePaymentRequest>,
) -> Result<Response, ServiceError> {
    let initialized = state.payments.initialize(request).await?;

    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, initialized.session_id, state.config.session_ttl_secs
    );
    let cookie = HeaderValue::from_str(&cookie)
        .map_err(|e| ServiceError::InternalError(format!("invalid session cookie: {}", e)))?;

    info!(reference = %initialized.reference, "checkout handed off to gateway");
    let mut response = (StatusCode::CREATED, Json(ApiResponse::success(initialized))).into_response();
    response.headers_mut().insert(header::SET_COOKIE, cookie);
    Ok(response)
}

/// Verification envelope. Gateway problems are reported inside the envelope
/// with `success: false`, never as an HTTP error.
async fn verify_payment(
    State(state): State<AppState>,
    Json(request): Json<VerifyPaymentRequest>,
) -> Json<VerifyPaymentResponse> {
    Json(state.payments.verify(request.reference.trim()).await)
}

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/initialize", post(initialize_payment))
        .route("/verify", post(verify_payment))
}
