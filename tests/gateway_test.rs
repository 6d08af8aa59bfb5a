//! `HttpPaymentGateway` against a mocked gateway.

use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use storefront_api::gateway::{
    GatewayError, HttpPaymentGateway, InitializeTransaction, PaymentGateway,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "sk_test_123";

fn gateway(base: &str) -> HttpPaymentGateway {
    HttpPaymentGateway::new(base, Some(SECRET.to_string()), Duration::from_secs(5)).unwrap()
}

fn request() -> InitializeTransaction {
    InitializeTransaction {
        email: "fan@example.com".into(),
        amount: 10_250,
        currency: "NGN".into(),
        callback_url: "https://shop.test/payment/callback".into(),
        metadata: json!({ "sessionId": "s-1" }),
        reference: None,
    }
}

#[tokio::test]
async fn initialize_authenticates_and_returns_page() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/transaction/initialize"))
        .and(header("authorization", "Bearer sk_test_123"))
        .and(body_partial_json(json!({
            "email": "fan@example.com",
            "amount": 10250,
            "callback_url": "https://shop.test/payment/callback",
            "metadata": { "sessionId": "s-1" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true,
            "message": "Authorization URL created",
            "data": {
                "authorization_url": "https://checkout.test/abc",
                "access_code": "abc",
                "reference": "ref_001"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let initialized = gateway(&server.uri()).initialize(&request()).await.unwrap();

    assert_eq!(initialized.reference, "ref_001");
    assert_eq!(initialized.authorization_url, "https://checkout.test/abc");
}

#[tokio::test]
async fn verify_reads_transaction() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transaction/verify/ref_001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true,
            "message": "Verification successful",
            "data": {
                "reference": "ref_001",
                "status": "success",
                "amount": 10250,
                "currency": "NGN",
                "gateway_response": "Successful",
                "metadata": { "sessionId": "s-1" }
            }
        })))
        .mount(&server)
        .await;

    let tx = gateway(&server.uri()).verify("ref_001").await.unwrap();

    assert!(tx.is_successful());
    assert_eq!(tx.metadata(), Some(json!({ "sessionId": "s-1" })));
}

#[tokio::test]
async fn refused_request_is_rejected_with_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transaction/verify/unknown"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "status": false,
            "message": "Transaction reference not found"
        })))
        .mount(&server)
        .await;

    let err = gateway(&server.uri()).verify("unknown").await.unwrap_err();

    assert_eq!(
        err,
        GatewayError::Rejected {
            status: 400,
            message: "Transaction reference not found".into()
        }
    );
}

#[tokio::test]
async fn missing_secret_never_calls_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

    let unconfigured = HttpPaymentGateway::new(server.uri(), None, Duration::from_secs(5)).unwrap();

    assert_eq!(
        unconfigured.verify("ref_001").await.unwrap_err(),
        GatewayError::NotConfigured
    );
}

#[tokio::test]
async fn slow_gateway_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transaction/verify/ref_slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "status": true, "message": "", "data": null }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let slow = HttpPaymentGateway::new(server.uri(), Some(SECRET.into()), Duration::from_millis(200)).unwrap();

    assert_matches!(slow.verify("ref_slow").await, Err(GatewayError::Timeout));
}
