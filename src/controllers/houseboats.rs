use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, patch, post},
    Router,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::{
    controllers::version_conflict,
    error::{created, message, ok, ApiResult, AppError},
    extract::{JsonBody, ValidatedJson},
    middleware::{AdminUser, AuthUser, MaybeAuthUser},
    models::{
        houseboat::{
            book_cabin, hold_cabin, release_cabin, set_item_status, validate_deck_plans, CabinStatus, DeckItem,
            HouseboatInput, HOUSEBOAT_COLUMNS,
        },
        Deck, Houseboat, HouseboatRow,
    },
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/houseboats", get(list_houseboats).post(create_houseboat))
        .route(
            "/houseboats/{id}",
            get(get_houseboat).put(update_houseboat).delete(delete_houseboat),
        )
        .route("/houseboats/{id}/cabins/{item_id}", patch(set_cabin_status))
        .route("/houseboats/{id}/cabins/{item_id}/hold", post(hold).delete(release))
        .route("/houseboats/{id}/cabins/{item_id}/book", post(book))
}

/* ---------- helpers ---------- */

async fn load_houseboat(state: &AppState, id: i64) -> ApiResult<Houseboat> {
    let row = sqlx::query_as::<_, HouseboatRow>(&format!(
        "SELECT {} FROM houseboats WHERE id = $1",
        HOUSEBOAT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or_else(|| AppError::not_found("Houseboat"))?;
    Ok(row.into())
}

/// Writes a deck plan back only if nobody else changed the boat since it
/// was read.
async fn save_deck_plans(state: &AppState, boat: &Houseboat, decks: &[Deck]) -> ApiResult<Houseboat> {
    let row = sqlx::query_as::<_, HouseboatRow>(&format!(
        "UPDATE houseboats SET deck_plans = $1, version = version + 1, updated_at = NOW()
         WHERE id = $2 AND version = $3
         RETURNING {}",
        HOUSEBOAT_COLUMNS
    ))
    .bind(sqlx::types::Json(decks))
    .bind(boat.id)
    .bind(boat.version)
    .fetch_optional(&state.db.pool)
    .await?;

    match row {
        Some(row) => Ok(row.into()),
        None => {
            let current: Option<i32> = sqlx::query_scalar("SELECT version FROM houseboats WHERE id = $1")
                .bind(boat.id)
                .fetch_optional(&state.db.pool)
                .await?;
            match current {
                Some(version) => Err(version_conflict(version)),
                None => Err(AppError::not_found("Houseboat")),
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CabinChange {
    houseboat_id: i64,
    version: i32,
    item: DeckItem,
}

impl CabinChange {
    fn new(boat: &Houseboat, item: DeckItem) -> Self {
        CabinChange { houseboat_id: boat.id, version: boat.version, item }
    }
}

/* ---------- CATALOG ---------- */

// GET /api/houseboats
async fn list_houseboats(
    State(state): State<Arc<AppState>>,
    MaybeAuthUser(viewer): MaybeAuthUser,
) -> ApiResult<impl IntoResponse> {
    let include_inactive = viewer.is_some_and(|v| v.is_admin);
    let rows = sqlx::query_as::<_, HouseboatRow>(&format!(
        "SELECT {} FROM houseboats WHERE is_active OR $1 ORDER BY name",
        HOUSEBOAT_COLUMNS
    ))
    .bind(include_inactive)
    .fetch_all(&state.db.pool)
    .await?;

    let boats: Vec<Houseboat> = rows.into_iter().map(Houseboat::from).collect();
    Ok(ok(boats))
}

// GET /api/houseboats/{id}
async fn get_houseboat(
    State(state): State<Arc<AppState>>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let boat = load_houseboat(&state, id).await?;
    if !boat.is_active && !viewer.is_some_and(|v| v.is_admin) {
        return Err(AppError::not_found("Houseboat"));
    }
    Ok(ok(boat))
}

// POST /api/houseboats
async fn create_houseboat(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    ValidatedJson(input): ValidatedJson<HouseboatInput>,
) -> ApiResult<impl IntoResponse> {
    validate_deck_plans(&input.deck_plans)?;

    let row = sqlx::query_as::<_, HouseboatRow>(&format!(
        "INSERT INTO houseboats (name, description, location, price_per_night, deck_plans, is_active)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {}",
        HOUSEBOAT_COLUMNS
    ))
    .bind(input.name.trim())
    .bind(&input.description)
    .bind(&input.location)
    .bind(input.price_per_night)
    .bind(sqlx::types::Json(&input.deck_plans))
    .bind(input.is_active)
    .fetch_one(&state.db.pool)
    .await?;

    info!("Created houseboat {} ({})", row.id, row.name);
    Ok(created(Houseboat::from(row)))
}

// PUT /api/houseboats/{id}
async fn update_houseboat(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<i64>,
    ValidatedJson(input): ValidatedJson<HouseboatInput>,
) -> ApiResult<impl IntoResponse> {
    let version = input
        .version
        .ok_or_else(|| AppError::BadRequest("version is required".to_string()))?;
    validate_deck_plans(&input.deck_plans)?;

    let row = sqlx::query_as::<_, HouseboatRow>(&format!(
        "UPDATE houseboats SET
             name = $1, description = $2, location = $3, price_per_night = $4, deck_plans = $5,
             is_active = $6, version = version + 1, updated_at = NOW()
         WHERE id = $7 AND version = $8
         RETURNING {}",
        HOUSEBOAT_COLUMNS
    ))
    .bind(input.name.trim())
    .bind(&input.description)
    .bind(&input.location)
    .bind(input.price_per_night)
    .bind(sqlx::types::Json(&input.deck_plans))
    .bind(input.is_active)
    .bind(id)
    .bind(version)
    .fetch_optional(&state.db.pool)
    .await?;

    match row {
        Some(row) => Ok(ok(Houseboat::from(row))),
        None => {
            let current = load_houseboat(&state, id).await?;
            Err(version_conflict(current.version))
        }
    }
}

// DELETE /api/houseboats/{id}
async fn delete_houseboat(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let done = sqlx::query("DELETE FROM houseboats WHERE id = $1")
        .bind(id)
        .execute(&state.db.pool)
        .await?;
    if done.rows_affected() == 0 {
        return Err(AppError::not_found("Houseboat"));
    }

    info!("Admin {} deleted houseboat {}", admin.user_id, id);
    Ok(message("Houseboat deleted"))
}

/* ---------- CABINS ---------- */

// POST /api/houseboats/{id}/cabins/{item_id}/hold
async fn hold(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, item_id)): Path<(i64, String)>,
) -> ApiResult<impl IntoResponse> {
    let boat = load_houseboat(&state, id).await?;
    if !boat.is_active {
        return Err(AppError::BadRequest("This houseboat is not accepting bookings".to_string()));
    }

    let now = Utc::now();
    let until = now + Duration::seconds(state.config.holds.cabin_hold_ttl_seconds);
    let mut decks = boat.deck_plans.clone();
    let item = hold_cabin(&mut decks, &item_id, user.user_id, now, until)?;
    let saved = save_deck_plans(&state, &boat, &decks).await?;

    info!("User {} holds cabin {} on houseboat {} until {}", user.user_id, item_id, id, until);
    Ok(ok(CabinChange::new(&saved, item)))
}

// DELETE /api/houseboats/{id}/cabins/{item_id}/hold
async fn release(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, item_id)): Path<(i64, String)>,
) -> ApiResult<impl IntoResponse> {
    let boat = load_houseboat(&state, id).await?;
    let mut decks = boat.deck_plans.clone();
    let item = release_cabin(&mut decks, &item_id, user.user_id)?;
    let saved = save_deck_plans(&state, &boat, &decks).await?;
    Ok(ok(CabinChange::new(&saved, item)))
}

// POST /api/houseboats/{id}/cabins/{item_id}/book
async fn book(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, item_id)): Path<(i64, String)>,
) -> ApiResult<impl IntoResponse> {
    let boat = load_houseboat(&state, id).await?;
    let mut decks = boat.deck_plans.clone();
    let item = book_cabin(&mut decks, &item_id, user.user_id, Utc::now())?;
    let saved = save_deck_plans(&state, &boat, &decks).await?;

    info!("User {} booked cabin {} on houseboat {}", user.user_id, item_id, id);
    Ok(ok(CabinChange::new(&saved, item)))
}

#[derive(Debug, Deserialize)]
pub struct CabinStatusRequest {
    pub status: CabinStatus,
}

// PATCH /api/houseboats/{id}/cabins/{item_id}
async fn set_cabin_status(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path((id, item_id)): Path<(i64, String)>,
    JsonBody(req): JsonBody<CabinStatusRequest>,
) -> ApiResult<impl IntoResponse> {
    let boat = load_houseboat(&state, id).await?;
    let mut decks = boat.deck_plans.clone();
    let item = set_item_status(&mut decks, &item_id, req.status)?;
    let saved = save_deck_plans(&state, &boat, &decks).await?;

    info!("Admin {} set cabin {} on houseboat {} to {:?}", admin.user_id, item_id, id, req.status);
    Ok(ok(CabinChange::new(&saved, item)))
}
