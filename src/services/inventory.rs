//! Durable seat inventory.
//!
//! A seat is taken when a row for (unit, journey date, seat) exists in
//! `booked_seats`. The primary key on those three columns is what keeps
//! two bookings from ever sharing a seat; the pre-check below only exists
//! to report which seats were lost.

use chrono::NaiveDate;
use serde_json::json;
use sqlx::PgConnection;
use tracing::{debug, warn};

use crate::database::{is_db_code, UNIQUE_VIOLATION};
use crate::error::AppError;

/// Seats of a unit already taken on a date.
pub async fn taken_seats(
    conn: &mut PgConnection,
    transport_id: i64,
    date: NaiveDate,
) -> Result<Vec<i32>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT seat_no FROM booked_seats
         WHERE transport_id = $1 AND journey_date = $2
         ORDER BY seat_no",
    )
    .bind(transport_id)
    .bind(date)
    .fetch_all(conn)
    .await
}

/// Claims `seats` for `booking_id` inside the caller's transaction.
///
/// Fails with 409 SEAT_UNAVAILABLE if any seat is already taken; the
/// transaction should then be rolled back.
pub async fn claim_seats(
    conn: &mut PgConnection,
    transport_id: i64,
    date: NaiveDate,
    booking_id: i64,
    seats: &[i32],
) -> Result<(), AppError> {
    let conflicting: Vec<i32> = sqlx::query_scalar(
        "SELECT seat_no FROM booked_seats
         WHERE transport_id = $1 AND journey_date = $2 AND seat_no = ANY($3)
         ORDER BY seat_no",
    )
    .bind(transport_id)
    .bind(date)
    .bind(seats)
    .fetch_all(&mut *conn)
    .await?;

    if !conflicting.is_empty() {
        return Err(seats_unavailable(conflicting));
    }

    let inserted = sqlx::query(
        "INSERT INTO booked_seats (transport_id, journey_date, seat_no, booking_id)
         SELECT $1, $2, seat, $4 FROM UNNEST($3::int[]) AS seat",
    )
    .bind(transport_id)
    .bind(date)
    .bind(seats)
    .bind(booking_id)
    .execute(&mut *conn)
    .await;

    match inserted {
        Ok(_) => {
            debug!("Booking {} claimed seats {:?} on unit {} for {}", booking_id, seats, transport_id, date);
            Ok(())
        }
        // Lost a race with a concurrent booking between the check and the insert
        Err(e) if is_db_code(&e, UNIQUE_VIOLATION) => {
            warn!("Seat claim race lost for unit {} on {}", transport_id, date);
            Err(seats_unavailable(seats.to_vec()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Frees every seat claimed by a booking; returns the released seat numbers.
pub async fn release_booking_seats(
    conn: &mut PgConnection,
    booking_id: i64,
) -> Result<Vec<i32>, sqlx::Error> {
    let mut seats: Vec<i32> = sqlx::query_scalar(
        "DELETE FROM booked_seats WHERE booking_id = $1 RETURNING seat_no",
    )
    .bind(booking_id)
    .fetch_all(conn)
    .await?;
    seats.sort_unstable();
    Ok(seats)
}

/// Number of seats taken on a unit for every date from `from` on.
pub async fn max_taken_from(
    conn: &mut PgConnection,
    transport_id: i64,
    from: NaiveDate,
) -> Result<Option<i32>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT MAX(seat_no) FROM booked_seats
         WHERE transport_id = $1 AND journey_date >= $2",
    )
    .bind(transport_id)
    .bind(from)
    .fetch_one(conn)
    .await
}

pub fn seats_unavailable(seats: Vec<i32>) -> AppError {
    AppError::conflict_with(
        "SEAT_UNAVAILABLE",
        "One or more selected seats are no longer available",
        json!({ "seats": seats }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn unavailable_seats_are_a_conflict() {
        let err = seats_unavailable(vec![4, 7]);
        assert_eq!(err.status(), StatusCode::CONFLICT);
        match err {
            AppError::Conflict { code, details, .. } => {
                assert_eq!(code, "SEAT_UNAVAILABLE");
                assert_eq!(details, Some(json!({ "seats": [4, 7] })));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
