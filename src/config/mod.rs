use serde::Deserialize;

// Top-level configuration container
#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub payment: PaymentConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub holds: HoldConfig,
    pub features: FeatureFlags,
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub log_format: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub expires_in_hours: i64,
}

// Payment gateway settings
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub merchant_id: String,
    pub merchant_password: String,
    pub gateway_url: String,
    pub success_url: String,
    pub fail_url: String,
    pub webhook_url: String,
    pub currency: String,
    pub expiry_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

/// Lifetimes of seat holds, cabin holds and unpaid bookings.
#[derive(Debug, Clone)]
pub struct HoldConfig {
    pub seat_hold_ttl_seconds: u64,
    pub cabin_hold_ttl_seconds: i64,
    pub unpaid_booking_ttl_minutes: i64,
    pub cleanup_interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct FeatureFlags {
    pub enable_analytics: bool,
}

/// Optional admin account created at startup.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Source(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// Flat view of the process environment. Keys are the lowercased
// environment variable names.
#[derive(Debug, Deserialize)]
struct EnvSettings {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_environment")]
    environment: String,
    #[serde(default = "default_rust_log")]
    rust_log: String,
    #[serde(default = "default_log_format")]
    log_format: String,

    database_url: String,
    #[serde(default = "default_pool_size")]
    db_pool_size: u32,

    redis_url: String,

    jwt_secret: String,
    #[serde(default = "default_jwt_hours")]
    jwt_expires_in_hours: i64,

    #[serde(default)]
    merchant_id: String,
    #[serde(default)]
    merchant_password: String,
    #[serde(default = "default_gateway_url")]
    payment_gateway_url: String,
    #[serde(default = "default_success_url")]
    payment_success_url: String,
    #[serde(default = "default_fail_url")]
    payment_fail_url: String,
    #[serde(default = "default_webhook_url")]
    payment_webhook_url: String,
    #[serde(default = "default_currency")]
    payment_currency: String,
    #[serde(default = "default_payment_expiry")]
    payment_expiry_minutes: i64,

    #[serde(default = "default_failure_threshold")]
    circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_breaker_timeout")]
    circuit_breaker_timeout_seconds: u64,

    #[serde(default = "default_seat_hold_ttl")]
    seat_hold_ttl_seconds: u64,
    #[serde(default = "default_cabin_hold_ttl")]
    cabin_hold_ttl_seconds: i64,
    #[serde(default = "default_unpaid_ttl")]
    unpaid_booking_ttl_minutes: i64,
    #[serde(default = "default_cleanup_interval")]
    cleanup_interval_seconds: u64,

    #[serde(default = "default_true")]
    enable_analytics: bool,

    admin_email: Option<String>,
    admin_password: Option<String>,
}

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_environment() -> String { "development".to_string() }
fn default_rust_log() -> String { "travel_booking=debug,tower_http=debug".to_string() }
fn default_log_format() -> String { "pretty".to_string() }
fn default_pool_size() -> u32 { 20 }
fn default_jwt_hours() -> i64 { 24 }
fn default_gateway_url() -> String { "https://gateway.example.com".to_string() }
fn default_success_url() -> String { "https://your-domain.com/payment/success".to_string() }
fn default_fail_url() -> String { "https://your-domain.com/payment/fail".to_string() }
fn default_webhook_url() -> String { "https://your-domain.com/api/payment/webhook".to_string() }
fn default_currency() -> String { "INR".to_string() }
fn default_payment_expiry() -> i64 { 15 }
fn default_failure_threshold() -> u32 { 5 }
fn default_breaker_timeout() -> u64 { 60 }
fn default_seat_hold_ttl() -> u64 { 300 }
fn default_cabin_hold_ttl() -> i64 { 600 }
fn default_unpaid_ttl() -> i64 { 30 }
fn default_cleanup_interval() -> u64 { 60 }
fn default_true() -> bool { true }

impl Config {
    /// Reads the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(config::Environment::default().try_parsing(true))
    }

    /// Builds the configuration from an arbitrary environment source.
    pub fn from_source(source: config::Environment) -> Result<Self, ConfigError> {
        let raw: EnvSettings = config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()?;

        if raw.jwt_secret.len() < 16 {
            return Err(ConfigError::Invalid(
                "JWT_SECRET must be at least 16 characters".to_string(),
            ));
        }
        if raw.seat_hold_ttl_seconds == 0 || raw.cabin_hold_ttl_seconds <= 0 {
            return Err(ConfigError::Invalid("hold TTLs must be positive".to_string()));
        }
        if raw.admin_email.is_some() != raw.admin_password.is_some() {
            return Err(ConfigError::Invalid(
                "ADMIN_EMAIL and ADMIN_PASSWORD must be set together".to_string(),
            ));
        }

        Ok(Config {
            app: AppConfig {
                host: raw.host,
                port: raw.port,
                environment: raw.environment,
                rust_log: raw.rust_log,
                log_format: raw.log_format,
            },
            database: DatabaseConfig {
                url: raw.database_url,
                pool_size: raw.db_pool_size,
            },
            redis: RedisConfig { url: raw.redis_url },
            jwt: JwtConfig {
                secret: raw.jwt_secret,
                expires_in_hours: raw.jwt_expires_in_hours,
            },
            payment: PaymentConfig {
                merchant_id: raw.merchant_id,
                merchant_password: raw.merchant_password,
                gateway_url: raw.payment_gateway_url,
                success_url: raw.payment_success_url,
                fail_url: raw.payment_fail_url,
                webhook_url: raw.payment_webhook_url,
                currency: raw.payment_currency,
                expiry_minutes: raw.payment_expiry_minutes,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: raw.circuit_breaker_failure_threshold,
                timeout_seconds: raw.circuit_breaker_timeout_seconds,
            },
            holds: HoldConfig {
                seat_hold_ttl_seconds: raw.seat_hold_ttl_seconds,
                cabin_hold_ttl_seconds: raw.cabin_hold_ttl_seconds,
                unpaid_booking_ttl_minutes: raw.unpaid_booking_ttl_minutes,
                cleanup_interval_seconds: raw.cleanup_interval_seconds,
            },
            features: FeatureFlags {
                enable_analytics: raw.enable_analytics,
            },
            bootstrap: BootstrapConfig {
                admin_email: raw.admin_email,
                admin_password: raw.admin_password,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> config::Environment {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::default().source(Some(map)).try_parsing(true)
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("DATABASE_URL", "postgres://localhost/travel"),
        ("REDIS_URL", "redis://localhost"),
        ("JWT_SECRET", "a-very-long-test-secret"),
    ];

    #[test]
    fn defaults_fill_optional_keys() {
        let config = Config::from_source(env(&REQUIRED)).unwrap();
        assert_eq!(config.app.port, 8000);
        assert_eq!(config.payment.currency, "INR");
        assert_eq!(config.holds.seat_hold_ttl_seconds, 300);
        assert!(config.features.enable_analytics);
        assert!(config.bootstrap.admin_email.is_none());
    }

    #[test]
    fn explicit_values_override_defaults() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("PORT", "9090"));
        pairs.push(("SEAT_HOLD_TTL_SECONDS", "120"));
        pairs.push(("ENABLE_ANALYTICS", "false"));
        let config = Config::from_source(env(&pairs)).unwrap();
        assert_eq!(config.app.port, 9090);
        assert_eq!(config.holds.seat_hold_ttl_seconds, 120);
        assert!(!config.features.enable_analytics);
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let pairs = [("REDIS_URL", "redis://localhost"), ("JWT_SECRET", "a-very-long-test-secret")];
        assert!(Config::from_source(env(&pairs)).is_err());
    }

    #[test]
    fn short_jwt_secret_is_rejected() {
        let pairs = [
            ("DATABASE_URL", "postgres://localhost/travel"),
            ("REDIS_URL", "redis://localhost"),
            ("JWT_SECRET", "short"),
        ];
        assert!(matches!(Config::from_source(env(&pairs)), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn admin_credentials_must_come_in_pairs() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("ADMIN_EMAIL", "admin@example.com"));
        assert!(matches!(Config::from_source(env(&pairs)), Err(ConfigError::Invalid(_))));
    }
}
