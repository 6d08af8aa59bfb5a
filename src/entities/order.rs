use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// An order materialized from a verified payment. `payment_reference` is
/// unique: one reference, one order.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub user_id: Option<String>,
    pub guest_email: Option<String>,
    pub guest_phone: Option<String>,
    pub customer_name: String,

    /// Cart line snapshot.
    pub items: Json,
    /// Shipping form snapshot.
    pub shipping: Json,

    pub payment_method: String,
    #[sea_orm(unique)]
    pub payment_reference: String,

    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub currency: String,

    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

pub const STATUS_PENDING: &str = "pending";
