//! `HttpOrderBackend` against a mocked storefront API.

use std::time::Duration;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_api::{
    reconciliation::{
        bounded, ClientError, CreateOrderPayload, HttpOrderBackend, OrderBackend, PaymentDetails,
    },
    session::{CartItem, ShippingInfo},
};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn payload() -> CreateOrderPayload {
    CreateOrderPayload {
        order_id: "ORD-1-ABCDEF".into(),
        user_id: None,
        guest_email: Some("fan@example.com".into()),
        guest_phone: Some("08000000000".into()),
        customer_name: "Tunde Bakare".into(),
        items: vec![CartItem {
            product_id: "third-kit".into(),
            name: "Third Kit".into(),
            price: dec!(30),
            quantity: 1,
            image: None,
            size: Some("M".into()),
            color_id: None,
        }],
        shipping: ShippingInfo {
            full_name: "Tunde Bakare".into(),
            email: "fan@example.com".into(),
            phone: "08000000000".into(),
            address: "1 Marina".into(),
            city: "Lagos".into(),
            region: None,
            postal_code: None,
            country: "NG".into(),
        },
        payment: PaymentDetails {
            method: "gateway".into(),
            reference: "REF-9".into(),
        },
        subtotal: dec!(30),
        shipping_cost: dec!(0),
        tax: dec!(0),
        total: dec!(30),
        payment_reference: "REF-9".into(),
    }
}

#[tokio::test]
async fn verify_posts_reference_and_reads_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/payments/verify"))
        .and(body_json(json!({ "reference": "REF-9" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "verified": true, "metadata": { "sessionId": "s-1" } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = HttpOrderBackend::new(server.uri());
    let response = backend.verify_payment("REF-9").await.unwrap();

    assert!(response.success);
    let data = response.data.unwrap();
    assert!(data.verified);
    assert_eq!(data.metadata, Some(json!({ "sessionId": "s-1" })));
}

#[tokio::test]
async fn exists_passes_reference_as_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/orders/exists"))
        .and(query_param("reference", "REF-9"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "exists": true, "orderId": "ORD-7" })),
        )
        .mount(&server)
        .await;

    let response = HttpOrderBackend::new(server.uri())
        .check_order_exists("REF-9")
        .await
        .unwrap();

    assert!(response.exists);
    assert_eq!(response.order_id.as_deref(), Some("ORD-7"));
}

#[tokio::test]
async fn create_reads_rejection_envelope_from_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/orders"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "success": false,
            "error": "Validation failed",
            "details": "items must not be empty"
        })))
        .mount(&server)
        .await;

    let response = HttpOrderBackend::new(server.uri())
        .create_order(&payload())
        .await
        .unwrap();

    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("Validation failed"));
}

#[tokio::test]
async fn create_reports_duplicate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/orders"))
        .and(body_json(serde_json::to_value(payload()).unwrap()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "orderId": "ORD-0",
            "alreadyExists": true
        })))
        .mount(&server)
        .await;

    let response = HttpOrderBackend::new(server.uri())
        .create_order(&payload())
        .await
        .unwrap();

    assert!(response.is_duplicate());
    assert_eq!(response.order_id.as_deref(), Some("ORD-0"));
}

#[tokio::test]
async fn non_envelope_error_body_becomes_status_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/payments/verify"))
        .respond_with(
            ResponseTemplate::new(502).set_body_json(json!({ "message": "upstream unavailable" })),
        )
        .mount(&server)
        .await;

    let err = HttpOrderBackend::new(server.uri())
        .verify_payment("REF-9")
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ClientError::Status {
            status: 502,
            message: "upstream unavailable".into()
        }
    );
}

#[tokio::test]
async fn garbage_success_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/orders/exists"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = HttpOrderBackend::new(server.uri())
        .check_order_exists("REF-9")
        .await
        .unwrap_err();

    assert_matches!(err, ClientError::Decode(_));
}

#[tokio::test]
async fn slow_backend_hits_the_ceiling() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/payments/verify"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "success": true, "data": { "verified": true } }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let backend = HttpOrderBackend::new(server.uri());
    let err = bounded(Duration::from_millis(100), backend.verify_payment("REF-9"))
        .await
        .unwrap_err();

    assert_eq!(err, ClientError::Timeout(Duration::from_millis(100)));
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_error() {
    // Nothing listens on port 9 locally.
    let err = HttpOrderBackend::new("http://127.0.0.1:9")
        .verify_payment("REF-9")
        .await
        .unwrap_err();

    assert_matches!(err, ClientError::Transport(_));
}
