use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use validator::Validate;

use crate::{
    database::{is_db_code, FOREIGN_KEY_VIOLATION},
    error::{message, ok, paginated, ApiResult, AppError, PageQuery},
    extract::ValidatedJson,
    middleware::{AdminUser, AuthUser},
    models::{user::USER_COLUMNS, User, UserProfile},
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/{id}", get(get_user).put(update_user).delete(delete_user))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(length(min = 6, max = 20))]
    pub phone: Option<String>,
    pub is_admin: Option<bool>,
    pub is_active: Option<bool>,
}

impl UpdateUserRequest {
    fn touches_admin_fields(&self) -> bool {
        self.is_admin.is_some() || self.is_active.is_some()
    }
}

// GET /api/users
async fn list_users(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(page): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let users = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        USER_COLUMNS
    ))
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.db.pool)
    .await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&state.db.pool)
        .await?;

    let profiles: Vec<UserProfile> = users.into_iter().map(UserProfile::from).collect();
    Ok(paginated(profiles, page.pagination(total)))
}

// GET /api/users/{id}
async fn get_user(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    user.ensure_owner_or_admin(id)?;
    let found = User::find_by_id(id, &state.db)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;
    Ok(ok(UserProfile::from(found)))
}

// PUT /api/users/{id}
async fn update_user(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<UpdateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    user.ensure_owner_or_admin(id)?;
    if req.touches_admin_fields() && !user.is_admin {
        return Err(AppError::Forbidden("Only admins can change roles or account status".to_string()));
    }

    let updated = sqlx::query_as::<_, User>(&format!(
        "UPDATE users SET
             name = COALESCE($1, name),
             phone = COALESCE($2, phone),
             is_admin = COALESCE($3, is_admin),
             is_active = COALESCE($4, is_active)
         WHERE id = $5
         RETURNING {}",
        USER_COLUMNS
    ))
    .bind(req.name.as_deref().map(str::trim))
    .bind(&req.phone)
    .bind(req.is_admin)
    .bind(req.is_active)
    .bind(id)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or_else(|| AppError::not_found("User"))?;

    if req.is_active == Some(false) || req.is_admin == Some(false) {
        state.jwt.revoke_user(id).await?;
        info!("Admin {} revoked tokens of user {}", user.user_id, id);
    }

    Ok(ok(UserProfile::from(updated)))
}

// DELETE /api/users/{id}
async fn delete_user(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    if admin.user_id == id {
        return Err(AppError::BadRequest("You cannot delete your own account".to_string()));
    }

    let deleted = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(&state.db.pool)
        .await;

    match deleted {
        Ok(done) if done.rows_affected() == 0 => Err(AppError::not_found("User")),
        Ok(_) => {
            state.jwt.revoke_user(id).await?;
            info!("Admin {} deleted user {}", admin.user_id, id);
            Ok(message("User deleted"))
        }
        Err(e) if is_db_code(&e, FOREIGN_KEY_VIOLATION) => Err(AppError::conflict(
            "IN_USE",
            "User has bookings or orders; deactivate the account instead",
        )),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_changes_are_admin_fields() {
        let req = UpdateUserRequest { name: Some("A".to_string()), phone: None, is_admin: None, is_active: None };
        assert!(!req.touches_admin_fields());
        let req = UpdateUserRequest { is_active: Some(false), ..req };
        assert!(req.touches_admin_fields());
    }
}
