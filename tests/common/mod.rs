//! Shared setup for the database and Redis backed tests.
//!
//! Each `#[sqlx::test]` gets its own fresh database; Redis is shared, so
//! users and transport units are created with random ids.
//! `REDIS_URL` defaults to a local server.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    response::Response,
    Router,
};
use chrono::{Duration, NaiveDate, Utc};
use fake::Fake;
use serde_json::Value;
use sqlx::PgPool;
use tower::ServiceExt;

use travel_booking::{
    config::{
        AppConfig, BootstrapConfig, CircuitBreakerConfig, Config, DatabaseConfig, FeatureFlags, HoldConfig,
        JwtConfig, PaymentConfig, RedisConfig,
    },
    database::Database,
    redis_client::RedisClient,
    AppState,
};

/// Nothing listens here; gateway calls fail fast.
pub const NO_GATEWAY: &str = "http://127.0.0.1:9";

pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

pub fn test_config(gateway_url: &str) -> Config {
    Config {
        app: AppConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            environment: "test".to_string(),
            rust_log: "travel_booking=debug".to_string(),
            log_format: "pretty".to_string(),
        },
        database: DatabaseConfig { url: String::new(), pool_size: 5 },
        redis: RedisConfig { url: redis_url() },
        jwt: JwtConfig { secret: "integration-test-secret".to_string(), expires_in_hours: 24 },
        payment: PaymentConfig {
            merchant_id: "merchant-1".to_string(),
            merchant_password: "s3cret".to_string(),
            gateway_url: gateway_url.to_string(),
            success_url: "https://travel.test/payment/success".to_string(),
            fail_url: "https://travel.test/payment/fail".to_string(),
            webhook_url: "https://travel.test/api/payment/webhook".to_string(),
            currency: "INR".to_string(),
            expiry_minutes: 15,
        },
        circuit_breaker: CircuitBreakerConfig { failure_threshold: 5, timeout_seconds: 60 },
        holds: HoldConfig {
            seat_hold_ttl_seconds: 60,
            cabin_hold_ttl_seconds: 60,
            unpaid_booking_ttl_minutes: 30,
            cleanup_interval_seconds: 60,
        },
        features: FeatureFlags { enable_analytics: true },
        bootstrap: BootstrapConfig { admin_email: None, admin_password: None },
    }
}

pub async fn test_state(pool: PgPool, gateway_url: &str) -> Arc<AppState> {
    let redis = RedisClient::new(&redis_url())
        .await
        .expect("REDIS_URL must point at a running Redis");
    AppState::from_parts(test_config(gateway_url), Database { pool }, redis).unwrap()
}

pub fn journey_date() -> NaiveDate {
    Utc::now().date_naive() + Duration::days(7)
}

// ---------------------------------------------------------------------------
// Seed data
// ---------------------------------------------------------------------------

/// Random ids keep Redis keys (holds, token revocations) of parallel tests
/// apart.
fn random_id() -> i64 {
    (1_000_000..i64::MAX / 2).fake()
}

pub async fn seed_user(pool: &PgPool, is_admin: bool) -> i64 {
    let id = random_id();
    sqlx::query_scalar(
        "INSERT INTO users (id, name, email, password_hash, is_admin)
         VALUES ($1, 'Test User', $2, 'x', $3)
         RETURNING id",
    )
    .bind(id)
    .bind(format!("user-{}@example.com", id))
    .bind(is_admin)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn seed_unit(pool: &PgPool, capacity: i32) -> i64 {
    let id = random_id();
    sqlx::query_scalar(
        "INSERT INTO transport_units
             (id, kind, name, number, route_from, route_to, departure_time, arrival_time, capacity, price)
         VALUES ($1, 'bus', 'Lake Express', $2, 'Kochi', 'Alleppey', '08:00'::time, '10:30'::time, $3, 250.0)
         RETURNING id",
    )
    .bind(id)
    .bind(format!("KL-{}", id))
    .bind(capacity)
    .fetch_one(pool)
    .await
    .unwrap()
}

/// Inserts a Pending/Pending booking row without claiming its seats.
pub async fn insert_booking(pool: &PgPool, unit: i64, user: i64, date: NaiveDate, seats: &[i32]) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO bookings (transport_id, user_id, journey_date, seats, amount)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id",
    )
    .bind(unit)
    .bind(user)
    .bind(date)
    .bind(seats)
    .bind(250.0 * seats.len() as f64)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn seed_package_order(pool: &PgPool, user: i64) -> i64 {
    let package: i64 = sqlx::query_scalar(
        "INSERT INTO packages (title, price, duration_days, itinerary)
         VALUES ('Backwater Escape', 4000.0, 1, '[{\"day\":1,\"title\":\"Arrival\"}]')
         RETURNING id",
    )
    .fetch_one(pool)
    .await
    .unwrap();

    sqlx::query_scalar(
        "INSERT INTO package_orders (package_id, user_id, travel_date, guests, contact, emergency_contact, amount)
         VALUES ($1, $2, $3,
                 '[{\"name\":\"Asha\",\"age\":31}]',
                 '{\"name\":\"Asha\",\"phone\":\"9800000000\",\"email\":\"asha@example.com\"}',
                 '{\"name\":\"Ravi\",\"phone\":\"9811111111\"}',
                 4000.0)
         RETURNING id",
    )
    .bind(package)
    .bind(user)
    .bind(journey_date())
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn booking_statuses(pool: &PgPool, id: i64) -> (String, String) {
    sqlx::query_as("SELECT booking_status, payment_status FROM bookings WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn booked_seats_of(pool: &PgPool, booking: i64) -> Vec<i32> {
    sqlx::query_scalar("SELECT seat_no FROM booked_seats WHERE booking_id = $1 ORDER BY seat_no")
        .bind(booking)
        .fetch_all(pool)
        .await
        .unwrap()
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
