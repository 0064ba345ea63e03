use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;
use validator::Validate;

use crate::{
    database::{is_db_code, UNIQUE_VIOLATION},
    error::{created, message, ok, ApiResult, AppError},
    extract::{JsonBody, ValidatedJson},
    middleware::{AdminUser, MaybeAuthUser},
    models::{
        city::{prepare_import, CityInput, ImportReport},
        City,
    },
    AppState,
};

const CITY_COLUMNS: &str = "id, name, region, is_active, created_at, updated_at";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/cities", get(list_cities).post(create_city))
        .route("/cities/import", post(import_cities))
        .route("/cities/{id}", get(get_city).put(update_city).delete(delete_city))
}

#[derive(Debug, Default, Deserialize)]
pub struct CityListQuery {
    #[serde(default)]
    pub all: bool,
}

fn duplicate_name(e: sqlx::Error) -> AppError {
    if is_db_code(&e, UNIQUE_VIOLATION) {
        AppError::conflict("DUPLICATE", "A city with this name already exists")
    } else {
        e.into()
    }
}

// GET /api/cities
async fn list_cities(
    State(state): State<Arc<AppState>>,
    MaybeAuthUser(user): MaybeAuthUser,
    Query(query): Query<CityListQuery>,
) -> ApiResult<impl IntoResponse> {
    let include_inactive = query.all && user.is_some_and(|u| u.is_admin);
    if !include_inactive {
        return Ok(ok(state.cache.get_active_cities().await?));
    }

    let cities = sqlx::query_as::<_, City>(&format!("SELECT {} FROM cities ORDER BY name", CITY_COLUMNS))
        .fetch_all(&state.db.pool)
        .await?;
    Ok(ok(cities))
}

// GET /api/cities/{id}
async fn get_city(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    let city = sqlx::query_as::<_, City>(&format!("SELECT {} FROM cities WHERE id = $1", CITY_COLUMNS))
        .bind(id)
        .fetch_optional(&state.db.pool)
        .await?
        .ok_or_else(|| AppError::not_found("City"))?;
    Ok(ok(city))
}

// POST /api/cities
async fn create_city(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    ValidatedJson(input): ValidatedJson<CityInput>,
) -> ApiResult<impl IntoResponse> {
    let input = input.normalized();
    input.validate()?;

    let city = sqlx::query_as::<_, City>(&format!(
        "INSERT INTO cities (name, region, is_active) VALUES ($1, $2, $3) RETURNING {}",
        CITY_COLUMNS
    ))
    .bind(&input.name)
    .bind(&input.region)
    .bind(input.is_active)
    .fetch_one(&state.db.pool)
    .await
    .map_err(duplicate_name)?;

    state.cache.invalidate_cities().await;
    Ok(created(city))
}

// PUT /api/cities/{id}
async fn update_city(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<i64>,
    ValidatedJson(input): ValidatedJson<CityInput>,
) -> ApiResult<impl IntoResponse> {
    let input = input.normalized();
    input.validate()?;

    let city = sqlx::query_as::<_, City>(&format!(
        "UPDATE cities SET name = $1, region = $2, is_active = $3, updated_at = NOW()
         WHERE id = $4
         RETURNING {}",
        CITY_COLUMNS
    ))
    .bind(&input.name)
    .bind(&input.region)
    .bind(input.is_active)
    .bind(id)
    .fetch_optional(&state.db.pool)
    .await
    .map_err(duplicate_name)?
    .ok_or_else(|| AppError::not_found("City"))?;

    state.cache.invalidate_cities().await;
    Ok(ok(city))
}

// DELETE /api/cities/{id}
async fn delete_city(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let done = sqlx::query("DELETE FROM cities WHERE id = $1")
        .bind(id)
        .execute(&state.db.pool)
        .await?;
    if done.rows_affected() == 0 {
        return Err(AppError::not_found("City"));
    }

    state.cache.invalidate_cities().await;
    Ok(message("City deleted"))
}

// POST /api/cities/import
async fn import_cities(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    JsonBody(payload): JsonBody<Value>,
) -> ApiResult<impl IntoResponse> {
    let (entries, skipped) = prepare_import(payload).map_err(AppError::BadRequest)?;
    let mut report = ImportReport { skipped, ..ImportReport::default() };

    let mut tx = state.db.pool.begin().await?;
    for city in &entries {
        // xmax is zero only for freshly inserted rows
        let inserted: bool = sqlx::query_scalar(
            "INSERT INTO cities (name, region, is_active) VALUES ($1, $2, $3)
             ON CONFLICT ((LOWER(name))) DO UPDATE
                 SET region = EXCLUDED.region, is_active = EXCLUDED.is_active, updated_at = NOW()
             RETURNING (xmax = 0)",
        )
        .bind(&city.name)
        .bind(&city.region)
        .bind(city.is_active)
        .fetch_one(&mut *tx)
        .await?;

        if inserted {
            report.inserted += 1;
        } else {
            report.updated += 1;
        }
    }
    tx.commit().await?;

    state.cache.invalidate_cities().await;
    info!(
        "Admin {} imported cities: {} inserted, {} updated, {} skipped",
        admin.user_id,
        report.inserted,
        report.updated,
        report.skipped.len()
    );
    Ok(ok(report))
}
