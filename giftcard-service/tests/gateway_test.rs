//! HTTP payment gateway client tests against a mock server.

mod common;

use std::time::Duration;

use giftcard_service::services::gateway::{charge_until_settled, compensate};
use giftcard_service::services::{
    ChargeRequest, HttpPaymentGateway, PaymentGateway, RefundRequest, ServiceError,
};
use rust_decimal_macros::dec;
use secrecy::Secret;
use serde_json::json;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn charge_request() -> ChargeRequest {
    ChargeRequest {
        payment_method_reference: "tok_visa".to_string(),
        amount: dec!(12.50),
        currency: "USD".to_string(),
        idempotency_key: "idem-1".to_string(),
        description: Some("Gift card sale".to_string()),
    }
}

fn gateway(server: &MockServer, api_key: &str) -> HttpPaymentGateway {
    HttpPaymentGateway::new(
        server.uri(),
        Secret::new(api_key.to_string()),
        Duration::from_secs(2),
    )
    .expect("Failed to build gateway client")
}

#[tokio::test]
async fn confirmed_charge_returns_reference() {
    common::init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/charges"))
        .and(header("Idempotency-Key", "idem-1"))
        .and(header("authorization", "Bearer sk_test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "confirmed": true,
            "reference_id": "ch_123"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let confirmation = gateway(&server, "sk_test")
        .charge(&charge_request())
        .await
        .unwrap();

    assert!(confirmation.confirmed);
    assert_eq!(confirmation.reference_id.as_deref(), Some("ch_123"));
}

#[tokio::test]
async fn payment_required_is_a_decline() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/charges"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "code": "card_declined",
            "message": "Insufficient funds"
        })))
        .mount(&server)
        .await;

    let confirmation = gateway(&server, "sk_test")
        .charge(&charge_request())
        .await
        .unwrap();

    assert!(!confirmation.confirmed);
    assert!(confirmation.reference_id.is_none());
}

#[tokio::test]
async fn server_error_is_a_gateway_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/charges"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let err = gateway(&server, "sk_test")
        .charge(&charge_request())
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Gateway(_)));
}

#[tokio::test]
async fn confirmation_without_reference_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/charges"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "confirmed": true })))
        .mount(&server)
        .await;

    let err = gateway(&server, "sk_test")
        .charge(&charge_request())
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Gateway(_)));
}

#[tokio::test]
async fn slow_gateway_times_out() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/charges"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "confirmed": true, "reference_id": "ch_late" }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client = HttpPaymentGateway::new(
        server.uri(),
        Secret::new(String::new()),
        Duration::from_millis(200),
    )
    .unwrap();

    let err = client.charge(&charge_request()).await.unwrap_err();
    assert!(matches!(err, ServiceError::Gateway(_)));
}

#[tokio::test]
async fn refund_posts_with_derived_idempotency_key() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .and(header("Idempotency-Key", "refund-ch_123"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "refunded": true })))
        .expect(1)
        .mount(&server)
        .await;

    gateway(&server, "sk_test")
        .refund(&RefundRequest {
            reference_id: "ch_123".to_string(),
            amount: dec!(12.50),
            reason: "test".to_string(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn compensation_reports_failed_refund_as_internal() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = gateway(&server, "sk_test");
    let err = compensate(&client, "business_sale", "ch_123", dec!(12.50))
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Internal(_)));
}

#[tokio::test]
async fn unknown_outcome_is_resent_with_the_same_key() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/charges"))
        .and(header("Idempotency-Key", "idem-1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/charges"))
        .and(header("Idempotency-Key", "idem-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "confirmed": true,
            "reference_id": "ch_123"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = gateway(&server, "sk_test");
    let confirmation = charge_until_settled(&client, &charge_request(), 3, Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(confirmation.reference_id.as_deref(), Some("ch_123"));
}

#[tokio::test]
async fn declines_are_not_resent() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/charges"))
        .respond_with(ResponseTemplate::new(402))
        .expect(1)
        .mount(&server)
        .await;

    let client = gateway(&server, "sk_test");
    let confirmation = charge_until_settled(&client, &charge_request(), 3, Duration::ZERO)
        .await
        .unwrap();

    assert!(!confirmation.confirmed);
}
