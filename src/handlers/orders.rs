use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;

use crate::entities::order::Model as OrderModel;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::reconciliation::{CreateOrderPayload, CreateOrderResponse, OrderExistsResponse};
use crate::services::local_backend::rejection;
use crate::{ApiResponse, ApiResult};

#[derive(Debug, Deserialize)]
pub struct ExistsQuery {
    #[serde(default)]
    pub reference: String,
}

async fn order_exists(
    State(state): State<AppState>,
    Query(query): Query<ExistsQuery>,
) -> Result<Json<OrderExistsResponse>, ServiceError> {
    let reference = query.reference.trim();
    if reference.is_empty() {
        return Err(ServiceError::BadRequest("reference is required".to_string()));
    }

    let existing = state.orders.find_by_reference(reference).await?;
    Ok(Json(OrderExistsResponse {
        exists: existing.is_some(),
        order_id: existing.map(|order| order.id),
    }))
}

/// Create-once. Answers 201 for a new order, 200 with `alreadyExists` when
/// the reference already has one, and the error status otherwise; the body is
/// always the create-order envelope.
async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderPayload>,
) -> (StatusCode, Json<CreateOrderResponse>) {
    match state.orders.create_order(payload).await {
        Ok(outcome) if outcome.already_existed() => (
            StatusCode::OK,
            Json(CreateOrderResponse::existing(outcome.order().id.clone())),
        ),
        Ok(outcome) => (
            StatusCode::CREATED,
            Json(CreateOrderResponse::created(outcome.order().id.clone())),
        ),
        Err(err) => (err.status_code(), Json(rejection(&err))),
    }
}

async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<OrderModel> {
    let order = state.orders.get_order(&id).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order))
        .route("/exists", get(order_exists))
        .route("/:id", get(get_order))
}
