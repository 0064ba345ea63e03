use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::{BTreeMap, BTreeSet};
use validator::{Validate, ValidationError};

use crate::error::AppError;

/// Largest number of seats one booking may take.
pub const MAX_SEATS_PER_BOOKING: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Bus,
    Boat,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Bus => "bus",
            TransportKind::Boat => "boat",
        }
    }
}

/// A bus or boat with a fixed route and daily schedule.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportUnit {
    pub id: i64,
    pub kind: String,
    pub name: String,
    pub number: String,
    pub route_from: String,
    pub route_to: String,
    pub departure_time: NaiveTime,
    pub arrival_time: NaiveTime,
    pub capacity: i32,
    pub price: f64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const TRANSPORT_COLUMNS: &str = "id, kind, name, number, route_from, route_to, departure_time, \
     arrival_time, capacity, price, is_active, created_at, updated_at";

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_route"))]
pub struct TransportInput {
    pub kind: TransportKind,
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 1, max = 40))]
    pub number: String,
    #[validate(length(min = 1, max = 120))]
    pub route_from: String,
    #[validate(length(min = 1, max = 120))]
    pub route_to: String,
    #[validate(custom(function = "validate_clock_time"))]
    pub departure_time: String,
    #[validate(custom(function = "validate_clock_time"))]
    pub arrival_time: String,
    #[validate(range(min = 1, max = 500))]
    pub capacity: i32,
    #[validate(range(min = 0.0))]
    pub price: f64,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

fn validate_route(input: &TransportInput) -> Result<(), ValidationError> {
    if input.route_from.trim().eq_ignore_ascii_case(input.route_to.trim()) {
        return Err(ValidationError::new("route").with_message("routeFrom and routeTo must differ".into()));
    }
    Ok(())
}

fn validate_clock_time(value: &str) -> Result<(), ValidationError> {
    parse_clock_time(value)
        .map(|_| ())
        .ok_or_else(|| ValidationError::new("time").with_message("expected HH:MM or HH:MM:SS".into()))
}

/// Parses `HH:MM` or `HH:MM:SS`.
pub fn parse_clock_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}

// --- Seat selection ---

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeatError {
    #[error("at least one seat must be selected")]
    Empty,
    #[error("at most 10 seats may be booked at once")]
    TooMany,
    #[error("seats {0:?} are outside 1..={1}")]
    OutOfRange(Vec<i32>, i32),
    #[error("seat {0} was selected more than once")]
    Duplicate(i32),
}

impl From<SeatError> for AppError {
    fn from(err: SeatError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

/// Checks a seat selection against the unit's capacity and returns the
/// seats sorted ascending.
pub fn validate_seat_selection(seats: &[i32], capacity: i32) -> Result<Vec<i32>, SeatError> {
    if seats.is_empty() {
        return Err(SeatError::Empty);
    }
    if seats.len() > MAX_SEATS_PER_BOOKING {
        return Err(SeatError::TooMany);
    }

    let out_of_range: Vec<i32> = seats.iter().copied().filter(|s| *s < 1 || *s > capacity).collect();
    if !out_of_range.is_empty() {
        return Err(SeatError::OutOfRange(out_of_range, capacity));
    }

    let mut sorted = seats.to_vec();
    sorted.sort_unstable();
    if let Some(pair) = sorted.windows(2).find(|w| w[0] == w[1]) {
        return Err(SeatError::Duplicate(pair[0]));
    }
    Ok(sorted)
}

/// Free seats given how many are taken. Past dates may hold more bookings
/// than a since-reduced capacity, so this never goes below zero.
pub fn seats_left(capacity: i32, taken: usize) -> i32 {
    let taken = i32::try_from(taken).unwrap_or(i32::MAX);
    capacity.saturating_sub(taken).max(0)
}

// --- Seat map ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatState {
    Available,
    Booked,
    Held,
    HeldByYou,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatInfo {
    pub seat_no: i32,
    pub state: SeatState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatSummary {
    pub capacity: i32,
    pub available: i32,
    pub booked: i32,
    pub held: i32,
}

/// Occupancy of one unit on one journey date: seats taken by bookings and
/// seats under a checkout hold (seat -> holder user id).
#[derive(Debug, Clone, Default)]
pub struct SeatMap {
    capacity: i32,
    booked: BTreeSet<i32>,
    holds: BTreeMap<i32, i64>,
}

impl SeatMap {
    pub fn new(
        capacity: i32,
        booked: impl IntoIterator<Item = i32>,
        holds: impl IntoIterator<Item = (i32, i64)>,
    ) -> Self {
        let booked: BTreeSet<i32> = booked.into_iter().filter(|s| *s >= 1 && *s <= capacity).collect();
        let holds = holds
            .into_iter()
            .filter(|(s, _)| *s >= 1 && *s <= capacity && !booked.contains(s))
            .collect();
        SeatMap { capacity, booked, holds }
    }

    pub fn state_of(&self, seat: i32, viewer: Option<i64>) -> SeatState {
        if self.booked.contains(&seat) {
            return SeatState::Booked;
        }
        match self.holds.get(&seat) {
            Some(holder) if Some(*holder) == viewer => SeatState::HeldByYou,
            Some(_) => SeatState::Held,
            None => SeatState::Available,
        }
    }

    pub fn seats(&self, viewer: Option<i64>) -> Vec<SeatInfo> {
        (1..=self.capacity)
            .map(|seat_no| SeatInfo { seat_no, state: self.state_of(seat_no, viewer) })
            .collect()
    }

    pub fn summary(&self) -> SeatSummary {
        let booked = self.booked.len() as i32;
        let held = self.holds.len() as i32;
        SeatSummary { capacity: self.capacity, available: self.capacity - booked - held, booked, held }
    }

    /// Seats from `wanted` that `user` cannot take right now.
    pub fn unavailable_for(&self, wanted: &[i32], user: i64) -> Vec<i32> {
        wanted
            .iter()
            .copied()
            .filter(|seat| {
                !matches!(self.state_of(*seat, Some(user)), SeatState::Available | SeatState::HeldByYou)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn selection_is_sorted() {
        assert_eq!(validate_seat_selection(&[4, 1, 3], 40).unwrap(), vec![1, 3, 4]);
    }

    #[test]
    fn selection_errors() {
        assert_eq!(validate_seat_selection(&[], 40), Err(SeatError::Empty));
        assert_eq!(validate_seat_selection(&[0, 41, 2], 40), Err(SeatError::OutOfRange(vec![0, 41], 40)));
        assert_eq!(validate_seat_selection(&[2, 5, 2], 40), Err(SeatError::Duplicate(2)));
        let many: Vec<i32> = (1..=11).collect();
        assert_eq!(validate_seat_selection(&many, 40), Err(SeatError::TooMany));
    }

    #[test]
    fn booked_seat_wins_over_hold() {
        let map = SeatMap::new(10, [2], [(2, 7), (3, 7), (4, 8)]);
        assert_eq!(map.state_of(2, Some(7)), SeatState::Booked);
        assert_eq!(map.state_of(3, Some(7)), SeatState::HeldByYou);
        assert_eq!(map.state_of(3, Some(8)), SeatState::Held);
        assert_eq!(map.state_of(3, None), SeatState::Held);
        assert_eq!(map.state_of(5, None), SeatState::Available);
        assert_eq!(map.unavailable_for(&[2, 3, 4, 5], 7), vec![2, 4]);
    }

    #[test]
    fn seats_left_never_negative() {
        assert_eq!(seats_left(40, 12), 28);
        assert_eq!(seats_left(20, 20), 0);
        // Capacity lowered after these bookings were made
        assert_eq!(seats_left(20, 26), 0);
    }

    #[test]
    fn clock_times_parse() {
        assert_eq!(parse_clock_time("08:30"), NaiveTime::from_hms_opt(8, 30, 0));
        assert_eq!(parse_clock_time("23:15:10"), NaiveTime::from_hms_opt(23, 15, 10));
        assert_eq!(parse_clock_time("25:00"), None);
    }

    #[test]
    fn route_endpoints_must_differ() {
        let input = TransportInput {
            kind: TransportKind::Boat,
            name: "Vembanad Star".to_string(),
            number: "KL-B-12".to_string(),
            route_from: "Alleppey".to_string(),
            route_to: "alleppey ".to_string(),
            departure_time: "09:00".to_string(),
            arrival_time: "12:00".to_string(),
            capacity: 30,
            price: 450.0,
            is_active: true,
        };
        assert!(input.validate().is_err());
    }

    proptest! {
        #[test]
        fn validated_selection_is_sorted_unique_and_in_range(
            seats in proptest::collection::vec(-3i32..60, 0..12),
            capacity in 1i32..50,
        ) {
            match validate_seat_selection(&seats, capacity) {
                Ok(valid) => {
                    prop_assert_eq!(valid.len(), seats.len());
                    prop_assert!(valid.windows(2).all(|w| w[0] < w[1]));
                    prop_assert!(valid.iter().all(|s| *s >= 1 && *s <= capacity));
                }
                Err(_) => {
                    let mut sorted = seats.clone();
                    sorted.sort_unstable();
                    sorted.dedup();
                    let invalid = seats.is_empty()
                        || seats.len() > MAX_SEATS_PER_BOOKING
                        || sorted.len() != seats.len()
                        || seats.iter().any(|s| *s < 1 || *s > capacity);
                    prop_assert!(invalid);
                }
            }
        }

        #[test]
        fn seat_map_partitions_capacity(
            capacity in 1i32..60,
            booked in proptest::collection::vec(0i32..70, 0..40),
            holds in proptest::collection::vec((0i32..70, 1i64..4), 0..40),
        ) {
            let map = SeatMap::new(capacity, booked, holds);
            let summary = map.summary();
            prop_assert_eq!(summary.available + summary.booked + summary.held, capacity);

            let seats = map.seats(None);
            prop_assert_eq!(seats.len() as i32, capacity);
            let available = seats.iter().filter(|s| s.state == SeatState::Available).count() as i32;
            prop_assert_eq!(available, summary.available);
        }
    }
}
