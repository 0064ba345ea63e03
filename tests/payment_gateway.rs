//! Gateway client against a mock payment server.

use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

use travel_booking::{
    config::{CircuitBreakerConfig, PaymentConfig},
    services::gateway::{to_minor_units, CircuitState, GatewayError, NewPayment, PaymentGatewayClient},
};

fn client(server: &MockServer, failure_threshold: u32) -> PaymentGatewayClient {
    let payment = PaymentConfig {
        merchant_id: "merchant-1".to_string(),
        merchant_password: "s3cret".to_string(),
        gateway_url: server.uri(),
        success_url: "https://travel.test/payment/success".to_string(),
        fail_url: "https://travel.test/payment/fail".to_string(),
        webhook_url: "https://travel.test/api/payment/webhook".to_string(),
        currency: "INR".to_string(),
        expiry_minutes: 15,
    };
    let breaker = CircuitBreakerConfig { failure_threshold, timeout_seconds: 60 };
    PaymentGatewayClient::new(&payment, &breaker).unwrap()
}

fn new_payment() -> NewPayment {
    NewPayment {
        amount: to_minor_units(1500.0),
        order_id: "booking-7-1700000000".to_string(),
        description: "Kochi - Alleppey, 2 seats".to_string(),
        email: Some("guest@example.com".to_string()),
    }
}

#[tokio::test]
async fn create_payment_sends_signed_request() {
    let server = MockServer::start().await;
    let gateway = client(&server, 5);
    let expected_token = gateway.generate_init_token(150_000, "INR", "booking-7-1700000000");

    Mock::given(method("POST"))
        .and(path("/api/v1/PaymentInit/init"))
        .and(body_partial_json(json!({
            "teamSlug": "merchant-1",
            "amount": 150_000,
            "currency": "INR",
            "orderId": "booking-7-1700000000",
            "token": expected_token,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "paymentId": "pay-123",
            "paymentURL": "https://gateway.test/pay/pay-123",
            "expiresAt": "2030-01-01T00:15:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = gateway.create_payment(new_payment()).await.unwrap();
    assert!(response.success);
    assert_eq!(response.payment_id.as_deref(), Some("pay-123"));
    assert_eq!(response.payment_url.as_deref(), Some("https://gateway.test/pay/pay-123"));
    assert_eq!(gateway.circuit_breaker().state(), CircuitState::Closed);
}

#[tokio::test]
async fn check_payment_parses_status() {
    let server = MockServer::start().await;
    let gateway = client(&server, 5);

    Mock::given(method("POST"))
        .and(path("/api/v1/PaymentCheck/check"))
        .and(body_partial_json(json!({ "paymentId": "pay-9" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "status": "CONFIRMED",
            "paymentId": "pay-9",
            "amount": 150_000,
            "currency": "INR"
        })))
        .mount(&server)
        .await;

    let check = gateway.check_payment_status("pay-9").await.unwrap();
    assert!(check.success);
    assert_eq!(check.status.as_deref(), Some("CONFIRMED"));
    assert_eq!(check.amount, Some(150_000));
}

#[tokio::test]
async fn breaker_opens_after_repeated_server_errors() {
    let server = MockServer::start().await;
    let gateway = client(&server, 2);

    Mock::given(method("POST"))
        .and(path("/api/v1/PaymentCheck/check"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    for _ in 0..2 {
        let err = gateway.check_payment_status("pay-1").await.unwrap_err();
        assert!(matches!(err, GatewayError::Http(_)));
    }
    assert_eq!(gateway.circuit_breaker().state(), CircuitState::Open);

    // Third call never reaches the server
    let err = gateway.check_payment_status("pay-1").await.unwrap_err();
    assert!(matches!(err, GatewayError::CircuitOpen));
}

#[tokio::test]
async fn notifications_are_verified_against_the_merchant_secret() {
    let server = MockServer::start().await;
    let gateway = client(&server, 5);

    let token = gateway.generate_notification_token("pay-5", "CONFIRMED");
    assert!(gateway.verify_notification("pay-5", "CONFIRMED", &token));
    assert!(gateway.verify_notification("pay-5", "CONFIRMED", &token.to_uppercase()));
    assert!(!gateway.verify_notification("pay-5", "REJECTED", &token));
}
