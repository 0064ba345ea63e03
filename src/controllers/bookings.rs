use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, patch, post},
    Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use validator::Validate;

use crate::{
    controllers::{
        transports::{load_unit, today},
        version_conflict, StatusUpdateRequest,
    },
    error::{created, message, ok, paginated, ApiResult, AppError, PageQuery},
    extract::ValidatedJson,
    middleware::{AdminUser, AuthUser},
    models::{
        booking::{validate_update, BOOKING_COLUMNS},
        transport::validate_seat_selection,
        Booking, BookingRow, BookingStatus, PaymentStatus, SeatMap, TransportUnit,
    },
    services::inventory,
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking).get(list_bookings))
        .route("/bookings/my", get(my_bookings))
        .route("/bookings/{id}", get(get_booking).put(update_booking).delete(delete_booking))
        .route("/bookings/{id}/cancel", patch(cancel_booking))
}

/* ---------- helpers ---------- */

async fn load_booking(state: &AppState, id: i64) -> ApiResult<Booking> {
    let row = sqlx::query_as::<_, BookingRow>(&format!(
        "SELECT {} FROM bookings WHERE id = $1",
        BOOKING_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or_else(|| AppError::not_found("Booking"))?;
    Booking::try_from(row)
}

fn into_bookings(rows: Vec<BookingRow>) -> ApiResult<Vec<Booking>> {
    rows.into_iter().map(Booking::try_from).collect()
}

/// Seats held by somebody else are off limits even before they are booked.
async fn ensure_not_held_elsewhere(
    state: &AppState,
    unit: &TransportUnit,
    date: NaiveDate,
    seats: &[i32],
    user_id: i64,
) -> ApiResult<()> {
    let holds = state.cache.seat_holds(unit.id, date, unit.capacity).await?;
    let held_elsewhere = SeatMap::new(unit.capacity, std::iter::empty::<i32>(), holds).unavailable_for(seats, user_id);
    if held_elsewhere.is_empty() {
        Ok(())
    } else {
        Err(inventory::seats_unavailable(held_elsewhere))
    }
}

/* ---------- CUSTOMER ---------- */

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub transport_id: i64,
    pub journey_date: NaiveDate,
    #[validate(length(min = 1, message = "at least one seat must be selected"))]
    pub seats: Vec<i32>,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

// POST /api/bookings
async fn create_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<CreateBookingRequest>,
) -> ApiResult<impl IntoResponse> {
    let unit = load_unit(&state, req.transport_id).await?;
    if !unit.is_active {
        return Err(AppError::BadRequest("This unit is not accepting bookings".to_string()));
    }
    if req.journey_date < today() {
        return Err(AppError::BadRequest("Journey date is in the past".to_string()));
    }
    let seats = validate_seat_selection(&req.seats, unit.capacity)?;

    ensure_not_held_elsewhere(&state, &unit, req.journey_date, &seats, user.user_id).await?;

    let amount = unit.price * seats.len() as f64;
    let mut tx = state.db.pool.begin().await?;

    let row = sqlx::query_as::<_, BookingRow>(&format!(
        "INSERT INTO bookings (transport_id, user_id, journey_date, seats, amount, notes)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {}",
        BOOKING_COLUMNS
    ))
    .bind(unit.id)
    .bind(user.user_id)
    .bind(req.journey_date)
    .bind(&seats)
    .bind(amount)
    .bind(&req.notes)
    .fetch_one(&mut *tx)
    .await?;

    inventory::claim_seats(&mut *tx, unit.id, req.journey_date, row.id, &seats).await?;
    // A hold taken after the first check loses to this booking only if it
    // shows up before commit; later holds fail at their own claim.
    ensure_not_held_elsewhere(&state, &unit, req.journey_date, &seats, user.user_id).await?;
    tx.commit().await?;

    if let Err(e) = state.cache.release_seats(unit.id, req.journey_date, &seats, user.user_id).await {
        warn!("Failed to release holds after booking {}: {:?}", row.id, e);
    }
    state.cache.invalidate_transport_searches().await;

    info!(
        "Booking {} created: user={}, unit={}, date={}, seats={:?}",
        row.id, user.user_id, unit.id, req.journey_date, seats
    );
    Ok(created(Booking::try_from(row)?))
}

// GET /api/bookings/my
async fn my_bookings(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(page): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let rows = sqlx::query_as::<_, BookingRow>(&format!(
        "SELECT {} FROM bookings WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        BOOKING_COLUMNS
    ))
    .bind(user.user_id)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.db.pool)
    .await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookings WHERE user_id = $1")
        .bind(user.user_id)
        .fetch_one(&state.db.pool)
        .await?;

    Ok(paginated(into_bookings(rows)?, page.pagination(total)))
}

// GET /api/bookings/{id}
async fn get_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let booking = load_booking(&state, id).await?;
    user.ensure_owner_or_admin(booking.user_id)?;
    Ok(ok(booking))
}

// PATCH /api/bookings/{id}/cancel
async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let booking = load_booking(&state, id).await?;
    user.ensure_owner_or_admin(booking.user_id)?;

    if booking.payment_status.has_funds() {
        return Err(AppError::conflict(
            "ALREADY_PAID",
            "Paid bookings cannot be cancelled here; contact support for a refund",
        ));
    }
    if !booking.booking_status.can_transition_to(BookingStatus::Cancelled) {
        return Err(AppError::unprocessable(
            "INVALID_TRANSITION",
            format!("A {} booking cannot be cancelled", booking.booking_status),
        ));
    }
    if booking.booking_status == BookingStatus::Cancelled {
        return Ok(ok(booking));
    }

    let mut tx = state.db.pool.begin().await?;
    let row = sqlx::query_as::<_, BookingRow>(&format!(
        "UPDATE bookings SET booking_status = 'Cancelled', version = version + 1, updated_at = NOW()
         WHERE id = $1 AND version = $2
         RETURNING {}",
        BOOKING_COLUMNS
    ))
    .bind(id)
    .bind(booking.version)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| version_conflict(booking.version))?;

    let released = inventory::release_booking_seats(&mut *tx, id).await?;
    tx.commit().await?;
    state.cache.invalidate_transport_searches().await;

    info!("Booking {} cancelled by user {}, {} seats released", id, user.user_id, released.len());
    Ok(ok(Booking::try_from(row)?))
}

/* ---------- ADMIN ---------- */

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingFilter {
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub transport_id: Option<i64>,
    pub date: Option<NaiveDate>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl BookingFilter {
    /// Parses the status filters so unknown values fail with 400 instead
    /// of silently matching nothing.
    fn statuses(&self) -> ApiResult<(Option<BookingStatus>, Option<PaymentStatus>)> {
        let booking = self
            .status
            .as_deref()
            .map(str::parse::<BookingStatus>)
            .transpose()
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        let payment = self
            .payment_status
            .as_deref()
            .map(str::parse::<PaymentStatus>)
            .transpose()
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        Ok((booking, payment))
    }
}

// GET /api/bookings
async fn list_bookings(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(filter): Query<BookingFilter>,
) -> ApiResult<impl IntoResponse> {
    let (booking_status, payment_status) = filter.statuses()?;
    let page = PageQuery { page: filter.page, page_size: filter.page_size };
    const WHERE: &str = "WHERE ($1::text IS NULL OR booking_status = $1)
           AND ($2::text IS NULL OR payment_status = $2)
           AND ($3::bigint IS NULL OR transport_id = $3)
           AND ($4::date IS NULL OR journey_date = $4)";

    let rows = sqlx::query_as::<_, BookingRow>(&format!(
        "SELECT {} FROM bookings {} ORDER BY created_at DESC LIMIT $5 OFFSET $6",
        BOOKING_COLUMNS, WHERE
    ))
    .bind(booking_status.map(BookingStatus::as_str))
    .bind(payment_status.map(PaymentStatus::as_str))
    .bind(filter.transport_id)
    .bind(filter.date)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.db.pool)
    .await?;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM bookings {}", WHERE))
        .bind(booking_status.map(BookingStatus::as_str))
        .bind(payment_status.map(PaymentStatus::as_str))
        .bind(filter.transport_id)
        .bind(filter.date)
        .fetch_one(&state.db.pool)
        .await?;

    Ok(paginated(into_bookings(rows)?, page.pagination(total)))
}

// PUT /api/bookings/{id}
async fn update_booking(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<StatusUpdateRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut tx = state.db.pool.begin().await?;

    let current = sqlx::query_as::<_, BookingRow>(&format!(
        "SELECT {} FROM bookings WHERE id = $1 FOR UPDATE",
        BOOKING_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::not_found("Booking"))?;
    let current = Booking::try_from(current)?;

    if current.version != req.version {
        return Err(version_conflict(current.version));
    }

    let advance = req.advance_amount.or(current.advance_amount);
    let settlement = validate_update(
        current.booking_status,
        req.booking_status,
        req.payment_status,
        current.amount,
        advance,
    )?;

    let row = sqlx::query_as::<_, BookingRow>(&format!(
        "UPDATE bookings SET
             booking_status = $1, payment_status = $2, advance_amount = $3, remaining_amount = $4,
             notes = COALESCE($5, notes), version = version + 1, updated_at = NOW()
         WHERE id = $6
         RETURNING {}",
        BOOKING_COLUMNS
    ))
    .bind(req.booking_status.as_str())
    .bind(req.payment_status.as_str())
    .bind(settlement.advance_amount)
    .bind(settlement.remaining_amount)
    .bind(&req.notes)
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    let released = if req.booking_status.holds_inventory() {
        vec![]
    } else {
        inventory::release_booking_seats(&mut *tx, id).await?
    };
    tx.commit().await?;

    if !released.is_empty() {
        state.cache.invalidate_transport_searches().await;
    }
    info!(
        "Admin {} updated booking {}: {}/{} -> {}/{}",
        admin.user_id, id, current.booking_status, current.payment_status, req.booking_status, req.payment_status
    );
    Ok(ok(Booking::try_from(row)?))
}

// DELETE /api/bookings/{id}
async fn delete_booking(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let mut tx = state.db.pool.begin().await?;
    let released = inventory::release_booking_seats(&mut *tx, id).await?;
    let done = sqlx::query("DELETE FROM bookings WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if done.rows_affected() == 0 {
        return Err(AppError::not_found("Booking"));
    }
    tx.commit().await?;

    state.cache.invalidate_transport_searches().await;
    info!("Admin {} deleted booking {}, {} seats released", admin.user_id, id, released.len());
    Ok(message("Booking deleted"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_filter_is_rejected() {
        let filter = BookingFilter { status: Some("Shipped".to_string()), ..Default::default() };
        assert!(filter.statuses().is_err());

        let filter = BookingFilter {
            status: Some("Confirmed".to_string()),
            payment_status: Some("Advance_Paid".to_string()),
            ..Default::default()
        };
        assert_eq!(
            filter.statuses().unwrap(),
            (Some(BookingStatus::Confirmed), Some(PaymentStatus::AdvancePaid))
        );
    }

    #[test]
    fn create_request_requires_seats() {
        let req: CreateBookingRequest = serde_json::from_value(serde_json::json!({
            "transportId": 3,
            "journeyDate": "2031-05-01",
            "seats": []
        }))
        .unwrap();
        assert!(req.validate().is_err());
    }
}
