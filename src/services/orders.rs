use crate::{
    db::DbPool,
    entities::order::{self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel},
    errors::ServiceError,
    metrics,
    reconciliation::CreateOrderPayload,
    session::cart_subtotal,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, QueryFilter, Set, SqlErr};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use validator::Validate;

/// Result of a create-once call.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOrderOutcome {
    Created(OrderModel),
    /// The reference already had an order; nothing was written.
    AlreadyExists(OrderModel),
}

impl CreateOrderOutcome {
    pub fn order(&self) -> &OrderModel {
        match self {
            Self::Created(order) | Self::AlreadyExists(order) => order,
        }
    }

    pub fn already_existed(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

/// Order store: lookup by reference, create once, fetch by id.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    currency: String,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>, currency: impl Into<String>) -> Self {
        Self {
            db_pool,
            currency: currency.into(),
        }
    }

    #[instrument(skip(self))]
    pub async fn find_by_reference(&self, reference: &str) -> Result<Option<OrderModel>, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::PaymentReference.eq(reference))
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to look up order by payment reference");
                ServiceError::DatabaseError(e)
            })
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: &str) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id.to_string())
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to fetch order from database");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Inserts the order unless one already exists for its payment reference.
    /// A concurrent insert for the same reference is caught by the unique index
    /// and reported as `AlreadyExists`.
    #[instrument(skip(self, payload), fields(order_id = %payload.order_id, reference = %payload.payment_reference))]
    pub async fn create_order(&self, payload: CreateOrderPayload) -> Result<CreateOrderOutcome, ServiceError> {
        validate_payload(&payload)?;

        if let Some(existing) = self.find_by_reference(&payload.payment_reference).await? {
            info!(existing_order_id = %existing.id, "order already exists for payment reference");
            metrics::DUPLICATE_ORDER_ATTEMPTS.inc();
            return Ok(CreateOrderOutcome::AlreadyExists(existing));
        }

        let model = OrderActiveModel {
            id: Set(payload.order_id.clone()),
            user_id: Set(payload.user_id.clone()),
            guest_email: Set(payload.guest_email.clone()),
            guest_phone: Set(payload.guest_phone.clone()),
            customer_name: Set(payload.customer_name.clone()),
            items: Set(serde_json::to_value(&payload.items)?),
            shipping: Set(serde_json::to_value(&payload.shipping)?),
            payment_method: Set(payload.payment.method.clone()),
            payment_reference: Set(payload.payment_reference.clone()),
            subtotal: Set(payload.subtotal),
            shipping_cost: Set(payload.shipping_cost),
            tax: Set(payload.tax),
            total: Set(payload.total),
            currency: Set(self.currency.clone()),
            status: Set(order::STATUS_PENDING.to_string()),
            created_at: Set(Utc::now()),
        };

        match model.insert(&*self.db_pool).await {
            Ok(created) => {
                metrics::ORDERS_CREATED.inc();
                info!("Order created successfully");
                Ok(CreateOrderOutcome::Created(created))
            }
            Err(err) if is_unique_violation(&err) => {
                warn!(error = %err, "order insert hit a uniqueness constraint");
                match self.find_by_reference(&payload.payment_reference).await? {
                    Some(existing) => {
                        metrics::DUPLICATE_ORDER_ATTEMPTS.inc();
                        Ok(CreateOrderOutcome::AlreadyExists(existing))
                    }
                    None => Err(ServiceError::Conflict(format!(
                        "Order id {} is already taken",
                        payload.order_id
                    ))),
                }
            }
            Err(err) => {
                error!(error = %err, "Failed to create order in database");
                Err(ServiceError::DatabaseError(err))
            }
        }
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn validate_payload(payload: &CreateOrderPayload) -> Result<(), ServiceError> {
    let mut problems = Vec::new();

    if payload.order_id.trim().is_empty() {
        problems.push("orderId is required".to_string());
    }
    if payload.payment_reference.trim().is_empty() {
        problems.push("paymentReference is required".to_string());
    }
    if payload.payment.reference != payload.payment_reference {
        problems.push("payment.reference must match paymentReference".to_string());
    }
    if payload.items.is_empty() {
        problems.push("items must not be empty".to_string());
    }
    if payload.user_id.is_none() && payload.guest_email.as_deref().map_or(true, str::is_empty) {
        problems.push("guestEmail is required for guest checkout".to_string());
    }
    let charged = payload
        .subtotal
        .checked_add(payload.shipping_cost)
        .and_then(|sum| sum.checked_add(payload.tax));
    if charged != Some(payload.total) {
        problems.push("total must equal subtotal + shippingCost + tax".to_string());
    }
    match cart_subtotal(&payload.items) {
        Ok(items_subtotal) if items_subtotal == payload.subtotal => {}
        Ok(_) => problems.push("subtotal does not match the items".to_string()),
        Err(e) => problems.push(format!("items: {}", e)),
    }
    if let Err(e) = payload.shipping.validate() {
        problems.push(format!("shipping: {}", e));
    }
    for (index, item) in payload.items.iter().enumerate() {
        if let Err(e) = item.validate() {
            problems.push(format!("items[{}]: {}", index, e));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ServiceError::ValidationError(problems.join("; ")))
    }
}
