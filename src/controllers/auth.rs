use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use validator::Validate;

use crate::{
    database::{is_db_code, UNIQUE_VIOLATION},
    error::{created, ok, ApiResult, AppError},
    extract::ValidatedJson,
    middleware::AuthUser,
    models::{user::USER_COLUMNS, User, UserProfile},
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 100, message = "name is required"))]
    pub name: String,
    #[validate(email(message = "a valid email is required"))]
    pub email: String,
    #[validate(length(min = 6, max = 20))]
    pub phone: Option<String>,
    #[validate(length(min = 6, message = "password must be at least 6 characters"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "a valid email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserProfile,
}

// POST /api/auth/register
async fn register(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let password_hash = User::hash_password(req.password).await?;

    let inserted = sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (name, email, phone, password_hash)
         VALUES ($1, $2, $3, $4)
         RETURNING {}",
        USER_COLUMNS
    ))
    .bind(req.name.trim())
    .bind(req.email.trim().to_lowercase())
    .bind(&req.phone)
    .bind(password_hash)
    .fetch_one(&state.db.pool)
    .await;

    let user = match inserted {
        Ok(user) => user,
        Err(e) if is_db_code(&e, UNIQUE_VIOLATION) => {
            return Err(AppError::conflict("DUPLICATE", "Email is already registered"));
        }
        Err(e) => return Err(e.into()),
    };

    let token = state.jwt.issue(user.id, user.is_admin)?;
    info!("Registered user {}", user.id);
    Ok(created(AuthResponse { token, user: user.into() }))
}

// POST /api/auth/login
async fn login(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let invalid = || AppError::unauthorized("INVALID_CREDENTIALS", "Invalid email or password");

    let user = User::find_by_email(req.email.trim(), &state.db)
        .await?
        .ok_or_else(invalid)?;

    if !user.verify_password(req.password).await? {
        return Err(invalid());
    }
    if !user.is_active {
        return Err(AppError::Forbidden("Account is disabled".to_string()));
    }

    let now = Utc::now();
    sqlx::query("UPDATE users SET last_logged_in = $1 WHERE id = $2")
        .bind(now)
        .bind(user.id)
        .execute(&state.db.pool)
        .await?;

    let token = state.jwt.issue(user.id, user.is_admin)?;
    let mut profile = UserProfile::from(user);
    profile.last_logged_in = Some(now);
    Ok(ok(AuthResponse { token, user: profile }))
}

// GET /api/auth/me
async fn me(State(state): State<Arc<AppState>>, user: AuthUser) -> ApiResult<impl IntoResponse> {
    let user = User::find_by_id(user.user_id, &state.db)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;
    Ok(ok(UserProfile::from(user)))
}
