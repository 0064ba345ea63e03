//! gateway.rs
//!
//! Client for the external payment gateway.
//!
//! Key components:
//! 1.  **CircuitBreaker**: stops calling the gateway after repeated failures
//!     and lets a single probe through once the timeout has passed.
//! 2.  **PaymentGatewayClient**: builds signed requests (init, check,
//!     confirm) and parses the gateway's responses. Every network call goes
//!     through the circuit breaker.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::{CircuitBreakerConfig, PaymentConfig};
use crate::error::AppError;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests go through.
    Closed,
    /// Too many failures; requests are refused until the timeout passes.
    Open,
    /// Timeout passed; one probe request decides whether to close again.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    /// Consecutive failures.
    failure_count: AtomicU32,
    failure_threshold: u32,
    timeout_duration: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout_seconds: u64) -> Self {
        Self {
            inner: Mutex::new(BreakerInner { state: CircuitState::Closed, opened_at: None }),
            failure_count: AtomicU32::new(0),
            failure_threshold: failure_threshold.max(1),
            timeout_duration: Duration::from_secs(timeout_seconds),
        }
    }

    /// Whether the next request may be sent.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let waited = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if waited >= self.timeout_duration {
                    inner.state = CircuitState::HalfOpen;
                    info!("Circuit breaker transitioning to HalfOpen state");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        self.failure_count.store(0, Ordering::Relaxed);
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            info!("Circuit breaker recovered - transitioning to Closed state");
        }
    }

    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        match inner.state {
            CircuitState::Closed if failures >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                error!(
                    "Circuit breaker OPENED - {} failures reached threshold {}",
                    failures, self.failure_threshold
                );
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!("Circuit breaker probe failed - returning to Open state");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).state
    }

    pub fn failures(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("circuit breaker is open - payment gateway temporarily unavailable")]
    CircuitOpen,
    #[error("payment gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("payment gateway rejected the request: {0}")]
    Rejected(String),
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::Gateway(err.to_string())
    }
}

// --- Gateway API models ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentInitRequest {
    team_slug: String,
    token: String,
    amount: i64,
    order_id: String,
    currency: String,
    description: String,
    #[serde(rename = "successURL")]
    success_url: String,
    #[serde(rename = "failURL")]
    fail_url: String,
    #[serde(rename = "notificationURL")]
    notification_url: String,
    email: Option<String>,
    language: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitResponse {
    pub success: bool,
    pub payment_id: Option<String>,
    #[serde(rename = "paymentURL")]
    pub payment_url: Option<String>,
    pub expires_at: Option<String>,
    pub code: Option<i32>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentCheckRequest {
    team_slug: String,
    token: String,
    payment_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCheckResponse {
    pub success: bool,
    pub status: Option<String>,
    pub payment_id: Option<String>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub order_id: Option<String>,
    pub code: Option<i32>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentConfirmRequest {
    team_slug: String,
    token: String,
    payment_id: String,
    amount: i64,
    currency: String,
    order_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfirmResponse {
    pub success: bool,
    pub code: Option<i32>,
    pub message: Option<String>,
}

/// Parameters of a new gateway payment.
#[derive(Debug, Clone)]
pub struct NewPayment {
    /// Amount in minor currency units.
    pub amount: i64,
    pub order_id: String,
    pub description: String,
    pub email: Option<String>,
}

#[derive(Clone)]
pub struct PaymentGatewayClient {
    team_slug: String,
    password: String,
    base_url: String,
    currency: String,
    success_url: String,
    fail_url: String,
    webhook_url: String,
    http_client: reqwest::Client,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl PaymentGatewayClient {
    pub fn new(config: &PaymentConfig, breaker: &CircuitBreakerConfig) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            team_slug: config.merchant_id.clone(),
            password: config.merchant_password.clone(),
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            currency: config.currency.clone(),
            success_url: config.success_url.clone(),
            fail_url: config.fail_url.clone(),
            webhook_url: config.webhook_url.clone(),
            http_client,
            circuit_breaker: Arc::new(CircuitBreaker::new(
                breaker.failure_threshold,
                breaker.timeout_seconds,
            )),
        })
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    async fn execute_with_circuit_breaker<F, T>(&self, operation: F) -> Result<T, GatewayError>
    where
        F: std::future::Future<Output = Result<T, reqwest::Error>>,
    {
        if !self.circuit_breaker.can_execute() {
            warn!("Circuit breaker is OPEN - blocking payment gateway request");
            return Err(GatewayError::CircuitOpen);
        }

        match operation.await {
            Ok(result) => {
                self.circuit_breaker.record_success();
                Ok(result)
            }
            Err(e) => {
                error!("Payment gateway request failed: {:?}", e);
                self.circuit_breaker.record_failure();
                Err(GatewayError::Http(e))
            }
        }
    }

    fn sha256_hex(input: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Token for init and confirm requests.
    pub fn generate_init_token(&self, amount: i64, currency: &str, order_id: &str) -> String {
        Self::sha256_hex(&format!(
            "{}{}{}{}{}",
            amount, currency, order_id, self.password, self.team_slug
        ))
    }

    /// Token for status checks.
    pub fn generate_check_token(&self, payment_id: &str) -> String {
        Self::sha256_hex(&format!("{}{}{}", payment_id, self.password, self.team_slug))
    }

    /// Token the gateway attaches to notifications.
    pub fn generate_notification_token(&self, payment_id: &str, status: &str) -> String {
        Self::sha256_hex(&format!("{}{}{}{}", payment_id, status, self.password, self.team_slug))
    }

    pub fn verify_notification(&self, payment_id: &str, status: &str, token: &str) -> bool {
        self.generate_notification_token(payment_id, status) == token.to_ascii_lowercase()
    }

    pub async fn create_payment(&self, payment: NewPayment) -> Result<PaymentInitResponse, GatewayError> {
        let token = self.generate_init_token(payment.amount, &self.currency, &payment.order_id);

        let request = PaymentInitRequest {
            team_slug: self.team_slug.clone(),
            token,
            amount: payment.amount,
            order_id: payment.order_id,
            currency: self.currency.clone(),
            description: payment.description,
            success_url: self.success_url.clone(),
            fail_url: self.fail_url.clone(),
            notification_url: self.webhook_url.clone(),
            email: payment.email,
            language: "en".to_string(),
        };

        info!(
            "Creating payment: amount={}, currency={}, breaker={:?}",
            request.amount,
            request.currency,
            self.circuit_breaker.state()
        );

        let operation = async {
            self.http_client
                .post(format!("{}/api/v1/PaymentInit/init", self.base_url))
                .json(&request)
                .send()
                .await?
                .error_for_status()?
                .json::<PaymentInitResponse>()
                .await
        };

        self.execute_with_circuit_breaker(operation).await
    }

    pub async fn check_payment_status(&self, payment_id: &str) -> Result<PaymentCheckResponse, GatewayError> {
        let request = PaymentCheckRequest {
            team_slug: self.team_slug.clone(),
            token: self.generate_check_token(payment_id),
            payment_id: payment_id.to_string(),
        };

        info!("Checking payment status: payment_id={}", payment_id);

        let operation = async {
            self.http_client
                .post(format!("{}/api/v1/PaymentCheck/check", self.base_url))
                .json(&request)
                .send()
                .await?
                .error_for_status()?
                .json::<PaymentCheckResponse>()
                .await
        };

        self.execute_with_circuit_breaker(operation).await
    }

    /// Captures an authorized payment.
    pub async fn confirm_payment(
        &self,
        payment_id: &str,
        amount: i64,
        currency: &str,
        order_id: &str,
    ) -> Result<PaymentConfirmResponse, GatewayError> {
        let request = PaymentConfirmRequest {
            team_slug: self.team_slug.clone(),
            token: self.generate_init_token(amount, currency, order_id),
            payment_id: payment_id.to_string(),
            amount,
            currency: currency.to_string(),
            order_id: order_id.to_string(),
        };

        info!("Confirming payment: payment_id={}", payment_id);

        let operation = async {
            self.http_client
                .post(format!("{}/api/v1/PaymentConfirm/confirm", self.base_url))
                .json(&request)
                .send()
                .await?
                .error_for_status()?
                .json::<PaymentConfirmResponse>()
                .await
        };

        self.execute_with_circuit_breaker(operation).await
    }
}

/// Converts a decimal amount to minor units (paise, cents).
pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}
