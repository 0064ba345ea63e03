pub mod cache;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod search_client;
pub mod services;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{middleware::JwtKeys, models::User, services::gateway::PaymentGatewayClient};

// Shared state for the whole application
#[derive(Clone)]
pub struct AppState {
    pub db: database::Database,
    pub redis: redis_client::RedisClient,
    pub cache: cache::CacheService,
    pub config: config::Config,
    pub search_client: search_client::SearchClient,
    pub jwt: JwtKeys,
    pub gateway: PaymentGatewayClient,
}

impl AppState {
    pub async fn new(config: config::Config) -> anyhow::Result<Arc<Self>> {
        let db = database::Database::new(&config.database.url, config.database.pool_size).await?;
        info!("Database connected");
        db.run_migrations().await?;

        let redis = redis_client::RedisClient::new(&config.redis.url).await?;
        info!("Redis connected");

        Self::from_parts(config, db, redis)
    }

    /// Wires the services around already connected stores.
    pub fn from_parts(
        config: config::Config,
        db: database::Database,
        redis: redis_client::RedisClient,
    ) -> anyhow::Result<Arc<Self>> {
        let cache = cache::CacheService::new(redis.clone(), db.clone(), config.holds.seat_hold_ttl_seconds);
        let search_client = search_client::SearchClient::new(db.pool.clone());
        let jwt = JwtKeys::new(&config.jwt.secret, config.jwt.expires_in_hours).with_revocations(redis.clone());
        let gateway = PaymentGatewayClient::new(&config.payment, &config.circuit_breaker)?;

        Ok(Arc::new(Self { db, redis, cache, config, search_client, jwt, gateway }))
    }

    /// Creates or promotes the configured admin account.
    pub async fn ensure_admin(&self) -> anyhow::Result<()> {
        let (Some(email), Some(password)) = (
            self.config.bootstrap.admin_email.as_deref(),
            self.config.bootstrap.admin_password.as_deref(),
        ) else {
            return Ok(());
        };

        if let Some(existing) = User::find_by_email(email, &self.db).await? {
            if !existing.is_admin {
                sqlx::query("UPDATE users SET is_admin = TRUE WHERE id = $1")
                    .bind(existing.id)
                    .execute(&self.db.pool)
                    .await?;
                info!("Promoted {} to admin", email);
            }
            return Ok(());
        }

        let password_hash = User::hash_password(password.to_string()).await?;
        sqlx::query(
            "INSERT INTO users (name, email, password_hash, is_admin) VALUES ('Administrator', $1, $2, TRUE)",
        )
        .bind(email.to_lowercase())
        .bind(password_hash)
        .execute(&self.db.pool)
        .await?;
        info!("Created admin account {}", email);
        Ok(())
    }
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = sqlx::query("SELECT 1").execute(&state.db.pool).await.is_ok();
    let redis = state.redis.ping().await.is_ok();
    if !database || !redis {
        warn!("Health check failed: database={}, redis={}", database, redis);
    }

    let status = if database && redis { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(json!({
            "success": database && redis,
            "database": database,
            "redis": redis,
            "circuitBreaker": format!("{:?}", state.gateway.circuit_breaker().state()),
        })),
    )
}

/// The HTTP application: banner, health check and the `/api` tree.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Travel Booking API v1.0" }))
        .route("/health", get(health))
        .nest("/api", controllers::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
