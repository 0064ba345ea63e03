use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use validator::Validate;

use crate::{
    cache::search::transport_search_key,
    database::{is_db_code, FOREIGN_KEY_VIOLATION, UNIQUE_VIOLATION},
    error::{created, message, ok, paginated, ApiResult, AppError, PageQuery},
    extract::ValidatedJson,
    middleware::{AdminUser, AuthUser, MaybeAuthUser},
    models::{
        transport::{
            parse_clock_time, seats_left, validate_seat_selection, SeatInfo, SeatSummary, TransportInput,
            TRANSPORT_COLUMNS,
        },
        SeatMap, TransportUnit,
    },
    search_client::TransportSearch,
    services::inventory,
    AppState,
};

const SEARCH_CACHE_TTL_SECONDS: u64 = 60;
const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/buses", get(search_transports).post(create_transport))
        .route("/buses/{id}", get(get_transport).put(update_transport).delete(delete_transport))
        .route("/buses/{id}/seats", get(get_seat_map))
        .route("/buses/{id}/holds", post(hold_seats).delete(release_holds))
}

/* ---------- helpers ---------- */

pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub(crate) async fn load_unit(state: &AppState, id: i64) -> ApiResult<TransportUnit> {
    sqlx::query_as::<_, TransportUnit>(&format!(
        "SELECT {} FROM transport_units WHERE id = $1",
        TRANSPORT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or_else(|| AppError::not_found("Transport unit"))
}

async fn seat_map(state: &AppState, unit: &TransportUnit, date: NaiveDate) -> ApiResult<SeatMap> {
    let mut conn = state.db.pool.acquire().await?;
    let booked = inventory::taken_seats(&mut *conn, unit.id, date).await?;
    drop(conn);
    let holds = state.cache.seat_holds(unit.id, date, unit.capacity).await?;
    Ok(SeatMap::new(unit.capacity, booked, holds))
}

fn parse_times(input: &TransportInput) -> ApiResult<(NaiveTime, NaiveTime)> {
    let departure = parse_clock_time(&input.departure_time)
        .ok_or_else(|| AppError::BadRequest("departureTime must be HH:MM".to_string()))?;
    let arrival = parse_clock_time(&input.arrival_time)
        .ok_or_else(|| AppError::BadRequest("arrivalTime must be HH:MM".to_string()))?;
    Ok((departure, arrival))
}

fn duplicate_number(e: sqlx::Error) -> AppError {
    if is_db_code(&e, UNIQUE_VIOLATION) {
        AppError::conflict("DUPLICATE", "A unit with this number already exists")
    } else {
        e.into()
    }
}

/* ---------- SEARCH ---------- */

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub kind: Option<String>,
    pub date: Option<NaiveDate>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl SearchQuery {
    fn paging(&self) -> PageQuery {
        PageQuery { page: self.page, page_size: self.page_size }
    }
}

// GET /api/buses
async fn search_transports(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Response> {
    let kind = match query.kind.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        None => None,
        Some(k @ ("bus" | "boat")) => Some(k.to_string()),
        Some(other) => return Err(AppError::BadRequest(format!("unknown kind '{}'", other))),
    };
    let date = query.date.unwrap_or_else(today);
    let page = query.paging();
    let from = query.from.clone().unwrap_or_default();
    let to = query.to.clone().unwrap_or_default();

    let cache_key = transport_search_key(
        from.trim(),
        to.trim(),
        kind.as_deref().unwrap_or(""),
        &date.to_string(),
        page.page(),
        page.page_size(),
    );

    if let Ok(Some(cached)) = state.cache.get_cached_search(&cache_key).await {
        return Ok((
            [
                (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
                (X_CACHE, HeaderValue::from_static("HIT")),
            ],
            cached,
        )
            .into_response());
    }

    let search = TransportSearch {
        from: Some(from).filter(|s| !s.trim().is_empty()),
        to: Some(to).filter(|s| !s.trim().is_empty()),
        kind,
        date,
        limit: page.limit(),
        offset: page.offset(),
    };
    let (results, total) = state.search_client.search_transports(&search).await?;
    let body = paginated(results, page.pagination(total));

    match serde_json::to_string(&body.0) {
        Ok(serialized) => {
            if let Err(e) = state
                .cache
                .cache_search_result(&cache_key, &serialized, SEARCH_CACHE_TTL_SECONDS)
                .await
            {
                warn!("Failed to cache transport search: {:?}", e);
            }
        }
        Err(e) => warn!("Failed to serialize transport search: {:?}", e),
    }

    Ok(([(X_CACHE, HeaderValue::from_static("MISS"))], body).into_response())
}

/* ---------- DETAILS & SEATS ---------- */

#[derive(Debug, Default, Deserialize)]
pub struct DateQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransportDetails {
    #[serde(flatten)]
    unit: TransportUnit,
    journey_date: NaiveDate,
    seats_booked: Vec<i32>,
    seats_available: i32,
}

// GET /api/buses/{id}
async fn get_transport(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<DateQuery>,
) -> ApiResult<impl IntoResponse> {
    let unit = load_unit(&state, id).await?;
    let date = query.date.unwrap_or_else(today);

    let mut conn = state.db.pool.acquire().await?;
    let seats_booked = inventory::taken_seats(&mut *conn, id, date).await?;
    let seats_available = seats_left(unit.capacity, seats_booked.len());

    Ok(ok(TransportDetails { unit, journey_date: date, seats_booked, seats_available }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SeatMapResponse {
    transport_id: i64,
    journey_date: NaiveDate,
    summary: SeatSummary,
    seats: Vec<SeatInfo>,
}

// GET /api/buses/{id}/seats
async fn get_seat_map(
    State(state): State<Arc<AppState>>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    Path(id): Path<i64>,
    Query(query): Query<DateQuery>,
) -> ApiResult<impl IntoResponse> {
    let unit = load_unit(&state, id).await?;
    let date = query.date.unwrap_or_else(today);
    let map = seat_map(&state, &unit, date).await?;

    Ok(ok(SeatMapResponse {
        transport_id: id,
        journey_date: date,
        summary: map.summary(),
        seats: map.seats(viewer.map(|v| v.user_id)),
    }))
}

/* ---------- HOLDS ---------- */

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct HoldRequest {
    pub date: NaiveDate,
    #[validate(length(min = 1, message = "at least one seat must be given"))]
    pub seats: Vec<i32>,
}

// POST /api/buses/{id}/holds
async fn hold_seats(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<HoldRequest>,
) -> ApiResult<impl IntoResponse> {
    let unit = load_unit(&state, id).await?;
    if !unit.is_active {
        return Err(AppError::BadRequest("This unit is not accepting bookings".to_string()));
    }
    if req.date < today() {
        return Err(AppError::BadRequest("Journey date is in the past".to_string()));
    }
    let seats = validate_seat_selection(&req.seats, unit.capacity)?;

    let mut conn = state.db.pool.acquire().await?;
    let booked = inventory::taken_seats(&mut *conn, id, req.date).await?;
    drop(conn);
    let already_booked: Vec<i32> = seats.iter().copied().filter(|s| booked.contains(s)).collect();
    if !already_booked.is_empty() {
        return Err(inventory::seats_unavailable(already_booked));
    }

    if let Err(conflicts) = state.cache.hold_seats(id, req.date, &seats, user.user_id).await? {
        return Err(AppError::conflict_with(
            "SEAT_UNAVAILABLE",
            "Some seats are being held by another customer",
            json!({ "seats": conflicts }),
        ));
    }

    info!("User {} holds seats {:?} on unit {} for {}", user.user_id, seats, id, req.date);
    Ok(ok(json!({
        "transportId": id,
        "journeyDate": req.date,
        "seats": seats,
        "expiresInSeconds": state.cache.seat_hold_ttl(),
    })))
}

// DELETE /api/buses/{id}/holds
async fn release_holds(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<HoldRequest>,
) -> ApiResult<impl IntoResponse> {
    let released = state.cache.release_seats(id, req.date, &req.seats, user.user_id).await?;
    Ok(ok(json!({ "released": released })))
}

/* ---------- ADMIN ---------- */

// POST /api/buses
async fn create_transport(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    ValidatedJson(input): ValidatedJson<TransportInput>,
) -> ApiResult<impl IntoResponse> {
    let (departure, arrival) = parse_times(&input)?;

    let unit = sqlx::query_as::<_, TransportUnit>(&format!(
        "INSERT INTO transport_units
             (kind, name, number, route_from, route_to, departure_time, arrival_time, capacity, price, is_active)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         RETURNING {}",
        TRANSPORT_COLUMNS
    ))
    .bind(input.kind.as_str())
    .bind(input.name.trim())
    .bind(input.number.trim())
    .bind(input.route_from.trim())
    .bind(input.route_to.trim())
    .bind(departure)
    .bind(arrival)
    .bind(input.capacity)
    .bind(input.price)
    .bind(input.is_active)
    .fetch_one(&state.db.pool)
    .await
    .map_err(duplicate_number)?;

    state.cache.invalidate_transport_searches().await;
    info!("Created {} {} ({})", unit.kind, unit.id, unit.number);
    Ok(created(unit))
}

// PUT /api/buses/{id}
async fn update_transport(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<i64>,
    ValidatedJson(input): ValidatedJson<TransportInput>,
) -> ApiResult<impl IntoResponse> {
    let (departure, arrival) = parse_times(&input)?;
    let mut tx = state.db.pool.begin().await?;

    let locked: Option<i64> = sqlx::query_scalar("SELECT id FROM transport_units WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    if locked.is_none() {
        return Err(AppError::not_found("Transport unit"));
    }

    if let Some(highest) = inventory::max_taken_from(&mut *tx, id, today()).await? {
        if highest > input.capacity {
            return Err(AppError::conflict_with(
                "CAPACITY_CONFLICT",
                "Capacity is below a seat that is already booked",
                json!({ "highestBookedSeat": highest }),
            ));
        }
    }

    let unit = sqlx::query_as::<_, TransportUnit>(&format!(
        "UPDATE transport_units SET
             kind = $1, name = $2, number = $3, route_from = $4, route_to = $5,
             departure_time = $6, arrival_time = $7, capacity = $8, price = $9,
             is_active = $10, updated_at = NOW()
         WHERE id = $11
         RETURNING {}",
        TRANSPORT_COLUMNS
    ))
    .bind(input.kind.as_str())
    .bind(input.name.trim())
    .bind(input.number.trim())
    .bind(input.route_from.trim())
    .bind(input.route_to.trim())
    .bind(departure)
    .bind(arrival)
    .bind(input.capacity)
    .bind(input.price)
    .bind(input.is_active)
    .bind(id)
    .fetch_one(&mut *tx)
    .await
    .map_err(duplicate_number)?;

    tx.commit().await?;
    state.cache.invalidate_transport_searches().await;
    Ok(ok(unit))
}

// DELETE /api/buses/{id}
async fn delete_transport(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    load_unit(&state, id).await?;

    let upcoming: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM bookings
         WHERE transport_id = $1 AND journey_date >= $2 AND booking_status <> 'Cancelled'",
    )
    .bind(id)
    .bind(today())
    .fetch_one(&state.db.pool)
    .await?;

    if upcoming > 0 {
        return Err(AppError::conflict_with(
            "IN_USE",
            "This unit has upcoming bookings",
            json!({ "upcomingBookings": upcoming }),
        ));
    }

    let deleted = sqlx::query("DELETE FROM transport_units WHERE id = $1")
        .bind(id)
        .execute(&state.db.pool)
        .await;

    let text = match deleted {
        Ok(_) => "Transport unit deleted",
        // Past bookings still point at the unit; keep it for history
        Err(e) if is_db_code(&e, FOREIGN_KEY_VIOLATION) => {
            sqlx::query("UPDATE transport_units SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .execute(&state.db.pool)
                .await?;
            "Transport unit deactivated; past bookings are kept"
        }
        Err(e) => return Err(e.into()),
    };

    if let Err(e) = state.cache.clear_unit_holds(id).await {
        warn!("Failed to clear holds for unit {}: {:?}", id, e);
    }
    state.cache.invalidate_transport_searches().await;
    info!("Admin {} removed unit {}", admin.user_id, id);
    Ok(message(text))
}
