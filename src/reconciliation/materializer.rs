use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{info, warn};

use super::client::{bounded, CreateOrderPayload, OrderBackend, PaymentDetails};
use super::reference::PaymentReference;
use crate::session::{cart_subtotal, AmountOutOfRange, CartItem, ShippingInfo};

pub const PAYMENT_METHOD: &str = "gateway";
const ORDER_ID_SUFFIX_LEN: usize = 6;
const ORDER_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Shipping and tax are not charged at checkout.
pub fn compute_totals(items: &[CartItem]) -> Result<OrderTotals, AmountOutOfRange> {
    let subtotal = cart_subtotal(items)?;
    let shipping_cost = Decimal::ZERO;
    let tax = Decimal::ZERO;
    let total = subtotal
        .checked_add(shipping_cost)
        .and_then(|sum| sum.checked_add(tax))
        .ok_or(AmountOutOfRange)?;
    Ok(OrderTotals {
        subtotal,
        shipping_cost,
        tax,
        total,
    })
}

/// `ORD-<unix millis>-<6 uppercase alphanumerics>`
pub fn generate_order_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ORDER_ID_SUFFIX_LEN)
        .map(|_| ORDER_ID_ALPHABET[rng.gen_range(0..ORDER_ID_ALPHABET.len())] as char)
        .collect();
    format!("ORD-{}-{}", Utc::now().timestamp_millis(), suffix)
}

pub fn build_payload(
    order_id: String,
    reference: &PaymentReference,
    user_id: Option<String>,
    shipping: ShippingInfo,
    items: Vec<CartItem>,
) -> Result<CreateOrderPayload, AmountOutOfRange> {
    let totals = compute_totals(&items)?;
    let (guest_email, guest_phone) = match user_id {
        Some(_) => (None, None),
        None => (Some(shipping.email.clone()), Some(shipping.phone.clone())),
    };

    Ok(CreateOrderPayload {
        order_id,
        user_id,
        guest_email,
        guest_phone,
        customer_name: shipping.full_name.trim().to_string(),
        items,
        shipping,
        payment: PaymentDetails {
            method: PAYMENT_METHOD.to_string(),
            reference: reference.as_str().to_string(),
        },
        subtotal: totals.subtotal,
        shipping_cost: totals.shipping_cost,
        tax: totals.tax,
        total: totals.total,
        payment_reference: reference.as_str().to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedOrder {
    pub order_id: String,
    /// The backend already held an order for this reference.
    pub already_existed: bool,
}

/// Issues the single create-order call. The error is the reason shown to the buyer.
pub async fn materialize<B>(
    backend: &B,
    payload: &CreateOrderPayload,
    limit: Duration,
) -> Result<MaterializedOrder, String>
where
    B: OrderBackend + ?Sized,
{
    let response = bounded(limit, backend.create_order(payload))
        .await
        .map_err(|err| {
            warn!(order_id = %payload.order_id, error = %err, "create-order call failed");
            err.to_string()
        })?;

    if !response.success {
        let reason = response
            .error
            .clone()
            .unwrap_or_else(|| "order could not be saved".to_string());
        warn!(order_id = %payload.order_id, reason = %reason, details = ?response.details, "create-order rejected");
        return Err(reason);
    }

    let already_existed = response.is_duplicate();
    let order_id = response
        .order_id
        .unwrap_or_else(|| payload.order_id.clone());
    info!(order_id = %order_id, already_existed, "order materialized");

    Ok(MaterializedOrder {
        order_id,
        already_existed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::client::{ClientError, CreateOrderResponse, MockOrderBackend};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn item(price: Decimal, quantity: u32) -> CartItem {
        CartItem {
            product_id: "p".into(),
            name: "Jersey".into(),
            price,
            quantity,
            image: None,
            size: None,
            color_id: None,
        }
    }

    fn shipping() -> ShippingInfo {
        ShippingInfo {
            full_name: " Kemi Ade ".into(),
            email: "kemi@example.com".into(),
            phone: "08030000000".into(),
            address: "1 Allen Ave".into(),
            city: "Ikeja".into(),
            region: None,
            postal_code: None,
            country: "NG".into(),
        }
    }

    #[test]
    fn totals_for_reference_cart() {
        let totals = compute_totals(&[item(dec!(10), 2), item(dec!(5), 1)]).unwrap();
        assert_eq!(totals.subtotal, dec!(25));
        assert_eq!(totals.shipping_cost, Decimal::ZERO);
        assert_eq!(totals.tax, Decimal::ZERO);
        assert_eq!(totals.total, dec!(25));
    }

    #[test]
    fn order_id_shape() {
        let id = generate_order_id();
        let parts: Vec<&str> = id.splitn(3, '-').collect();
        assert_eq!(parts[0], "ORD");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn guest_payload_carries_contact() {
        let reference = PaymentReference::new("R-1").unwrap();
        let payload = build_payload("ORD-1".into(), &reference, None, shipping(), vec![item(dec!(3), 1)]).unwrap();
        assert_eq!(payload.guest_email.as_deref(), Some("kemi@example.com"));
        assert_eq!(payload.guest_phone.as_deref(), Some("08030000000"));
        assert_eq!(payload.customer_name, "Kemi Ade");
        assert_eq!(payload.payment.method, "gateway");
        assert_eq!(payload.payment.reference, "R-1");
        assert_eq!(payload.payment_reference, "R-1");
        assert_eq!(payload.total, dec!(3));
    }

    #[test]
    fn signed_in_payload_omits_guest_contact() {
        let reference = PaymentReference::new("R-1").unwrap();
        let payload = build_payload(
            "ORD-1".into(),
            &reference,
            Some("user-1".into()),
            shipping(),
            vec![item(dec!(3), 1)],
        )
        .unwrap();
        assert_eq!(payload.user_id.as_deref(), Some("user-1"));
        assert!(payload.guest_email.is_none());
    }

    #[test]
    fn overflowing_cart_has_no_totals() {
        assert_eq!(compute_totals(&[item(Decimal::MAX, 2)]), Err(AmountOutOfRange));

        let reference = PaymentReference::new("R-1").unwrap();
        let built = build_payload("ORD-1".into(), &reference, None, shipping(), vec![item(Decimal::MAX, 2)]);
        assert_eq!(built.unwrap_err(), AmountOutOfRange);
    }

    #[tokio::test]
    async fn rejected_create_surfaces_backend_reason() {
        let mut backend = MockOrderBackend::new();
        backend
            .expect_create_order()
            .times(1)
            .returning(|_| Ok(CreateOrderResponse::rejected("stock exhausted", None)));

        let reference = PaymentReference::new("R-1").unwrap();
        let payload = build_payload("ORD-1".into(), &reference, None, shipping(), vec![item(dec!(1), 1)]).unwrap();
        let reason = materialize(&backend, &payload, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(reason, "stock exhausted");
    }

    #[tokio::test]
    async fn duplicate_create_reports_existing_order() {
        let mut backend = MockOrderBackend::new();
        backend
            .expect_create_order()
            .returning(|_| Ok(CreateOrderResponse::existing("ORD-OLD")));

        let reference = PaymentReference::new("R-1").unwrap();
        let payload = build_payload("ORD-NEW".into(), &reference, None, shipping(), vec![item(dec!(1), 1)]).unwrap();
        let created = materialize(&backend, &payload, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(created.order_id, "ORD-OLD");
        assert!(created.already_existed);
    }

    #[tokio::test]
    async fn transport_failure_is_reported() {
        let mut backend = MockOrderBackend::new();
        backend
            .expect_create_order()
            .returning(|_| Err(ClientError::Transport("connection reset".into())));

        let reference = PaymentReference::new("R-1").unwrap();
        let payload = build_payload("ORD-1".into(), &reference, None, shipping(), vec![item(dec!(1), 1)]).unwrap();
        let reason = materialize(&backend, &payload, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(reason.contains("connection reset"));
    }

    proptest! {
        #[test]
        fn total_is_sum_of_line_totals(lines in prop::collection::vec((0u32..100_000, 1u32..20), 0..12)) {
            let items: Vec<CartItem> = lines
                .iter()
                .map(|(cents, qty)| item(Decimal::new(*cents as i64, 2), *qty))
                .collect();
            let expected: Decimal = lines
                .iter()
                .map(|(cents, qty)| Decimal::new(*cents as i64 * *qty as i64, 2))
                .sum();
            let totals = compute_totals(&items).unwrap();
            prop_assert_eq!(totals.subtotal, expected);
            prop_assert_eq!(totals.total, totals.subtotal);
        }
    }
}
