use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};

use crate::error::AppError;

/// Lifecycle of a seat booking or package order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Booked,
    Confirmed,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Paid,
    #[serde(rename = "Advance_Paid")]
    AdvancePaid,
    Failed,
    Refunded,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 5] = [
        BookingStatus::Pending,
        BookingStatus::Booked,
        BookingStatus::Confirmed,
        BookingStatus::Cancelled,
        BookingStatus::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "Pending",
            BookingStatus::Booked => "Booked",
            BookingStatus::Confirmed => "Confirmed",
            BookingStatus::Cancelled => "Cancelled",
            BookingStatus::Completed => "Completed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Completed)
    }

    /// Whether seats attached to a record in this status stay taken.
    pub fn holds_inventory(self) -> bool {
        self != BookingStatus::Cancelled
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        self == next
            || matches!(
                (self, next),
                (Pending, Booked | Confirmed | Cancelled)
                    | (Booked, Confirmed | Cancelled)
                    | (Confirmed, Completed | Cancelled)
            )
    }
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 5] = [
        PaymentStatus::Pending,
        PaymentStatus::Paid,
        PaymentStatus::AdvancePaid,
        PaymentStatus::Failed,
        PaymentStatus::Refunded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Paid => "Paid",
            PaymentStatus::AdvancePaid => "Advance_Paid",
            PaymentStatus::Failed => "Failed",
            PaymentStatus::Refunded => "Refunded",
        }
    }

    /// Money has been taken and not returned.
    pub fn has_funds(self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::AdvancePaid)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StatusError::Unknown(s.to_string()))
    }
}

impl FromStr for PaymentStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StatusError::Unknown(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StatusError {
    #[error("unknown status '{0}'")]
    Unknown(String),
    #[error("cannot move from {from} to {to}")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },
    #[error("booking status {booking} cannot be combined with payment status {payment}")]
    InconsistentPair { booking: BookingStatus, payment: PaymentStatus },
    #[error("{0}")]
    InvalidAmount(String),
}

impl From<StatusError> for AppError {
    fn from(err: StatusError) -> Self {
        let code = match err {
            StatusError::InvalidTransition { .. } => "INVALID_TRANSITION",
            _ => "INVALID_STATUS",
        };
        AppError::unprocessable(code, err.to_string())
    }
}

/// Rejects status pairs that cannot describe a real booking, such as a
/// cancelled booking that still holds the customer's money.
pub fn check_status_pair(booking: BookingStatus, payment: PaymentStatus) -> Result<(), StatusError> {
    use BookingStatus as B;
    use PaymentStatus as P;

    let consistent = match (booking, payment) {
        (B::Cancelled, p) => !p.has_funds(),
        (B::Completed, p) => p == P::Paid,
        (B::Confirmed, p) => p.has_funds(),
        (_, P::Refunded) => false,
        _ => true,
    };

    if consistent {
        Ok(())
    } else {
        Err(StatusError::InconsistentPair { booking, payment })
    }
}

/// Advance and remaining amounts after a payment status change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settlement {
    pub advance_amount: Option<f64>,
    pub remaining_amount: Option<f64>,
}

pub fn settle_amounts(
    amount: f64,
    payment: PaymentStatus,
    advance: Option<f64>,
) -> Result<Settlement, StatusError> {
    if let Some(a) = advance {
        if !a.is_finite() || a < 0.0 || a > amount {
            return Err(StatusError::InvalidAmount(format!(
                "advance amount must be between 0 and {:.2}",
                amount
            )));
        }
    }

    match payment {
        PaymentStatus::AdvancePaid => match advance {
            Some(a) if a > 0.0 && a < amount => Ok(Settlement {
                advance_amount: Some(a),
                remaining_amount: Some(amount - a),
            }),
            _ => Err(StatusError::InvalidAmount(
                "Advance_Paid requires an advance amount greater than zero and below the total"
                    .to_string(),
            )),
        },
        PaymentStatus::Paid => Ok(Settlement { advance_amount: advance, remaining_amount: Some(0.0) }),
        _ => Ok(Settlement {
            advance_amount: advance,
            remaining_amount: advance.map(|a| amount - a),
        }),
    }
}

/// Validates a full status update and returns the resulting amounts.
pub fn validate_update(
    current: BookingStatus,
    next: BookingStatus,
    payment: PaymentStatus,
    amount: f64,
    advance: Option<f64>,
) -> Result<Settlement, StatusError> {
    if !current.can_transition_to(next) {
        return Err(StatusError::InvalidTransition { from: current, to: next });
    }
    check_status_pair(next, payment)?;
    settle_amounts(amount, payment, advance)
}

// --- Persistence ---

#[derive(Debug, Clone, FromRow)]
pub struct BookingRow {
    pub id: i64,
    pub transport_id: i64,
    pub user_id: i64,
    pub journey_date: NaiveDate,
    pub seats: Vec<i32>,
    pub amount: f64,
    pub booking_status: String,
    pub payment_status: String,
    pub advance_amount: Option<f64>,
    pub remaining_amount: Option<f64>,
    pub notes: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const BOOKING_COLUMNS: &str = "id, transport_id, user_id, journey_date, seats, amount, \
     booking_status, payment_status, advance_amount, remaining_amount, notes, version, \
     created_at, updated_at";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: i64,
    pub transport_id: i64,
    pub user_id: i64,
    pub journey_date: NaiveDate,
    pub seats: Vec<i32>,
    pub amount: f64,
    pub booking_status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub advance_amount: Option<f64>,
    pub remaining_amount: Option<f64>,
    pub notes: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = AppError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            booking_status: parse_stored(&row.booking_status)?,
            payment_status: parse_stored(&row.payment_status)?,
            id: row.id,
            transport_id: row.transport_id,
            user_id: row.user_id,
            journey_date: row.journey_date,
            seats: row.seats,
            amount: row.amount,
            advance_amount: row.advance_amount,
            remaining_amount: row.remaining_amount,
            notes: row.notes,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Parses a status column; a bad value in the database is an internal error.
pub fn parse_stored<T: FromStr<Err = StatusError>>(value: &str) -> Result<T, AppError> {
    value
        .parse()
        .map_err(|e: StatusError| AppError::Internal(anyhow::anyhow!("corrupt status column: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use BookingStatus as B;
    use PaymentStatus as P;

    #[test]
    fn terminal_states_have_no_exits() {
        for next in B::ALL {
            if next != B::Cancelled {
                assert!(!B::Cancelled.can_transition_to(next), "Cancelled -> {}", next);
            }
            if next != B::Completed {
                assert!(!B::Completed.can_transition_to(next), "Completed -> {}", next);
            }
        }
    }

    #[test]
    fn forward_transitions_are_allowed() {
        assert!(B::Pending.can_transition_to(B::Booked));
        assert!(B::Pending.can_transition_to(B::Confirmed));
        assert!(B::Booked.can_transition_to(B::Confirmed));
        assert!(B::Confirmed.can_transition_to(B::Completed));
        assert!(B::Confirmed.can_transition_to(B::Cancelled));
        assert!(!B::Pending.can_transition_to(B::Completed));
        assert!(!B::Confirmed.can_transition_to(B::Pending));
    }

    #[test]
    fn cancelled_and_paid_is_rejected() {
        assert!(check_status_pair(B::Cancelled, P::Paid).is_err());
        assert!(check_status_pair(B::Cancelled, P::AdvancePaid).is_err());
        assert!(check_status_pair(B::Cancelled, P::Refunded).is_ok());
        assert!(check_status_pair(B::Cancelled, P::Pending).is_ok());
    }

    #[test]
    fn refunded_only_with_cancelled() {
        for status in B::ALL {
            let ok = check_status_pair(status, P::Refunded).is_ok();
            assert_eq!(ok, status == B::Cancelled, "{} + Refunded", status);
        }
    }

    #[test]
    fn completed_requires_full_payment() {
        assert!(check_status_pair(B::Completed, P::Paid).is_ok());
        assert!(check_status_pair(B::Completed, P::AdvancePaid).is_err());
        assert!(check_status_pair(B::Confirmed, P::AdvancePaid).is_ok());
        assert!(check_status_pair(B::Confirmed, P::Pending).is_err());
    }

    #[test]
    fn advance_paid_computes_remaining() {
        let s = settle_amounts(1000.0, P::AdvancePaid, Some(250.0)).unwrap();
        assert_eq!(s.advance_amount, Some(250.0));
        assert_eq!(s.remaining_amount, Some(750.0));

        assert!(settle_amounts(1000.0, P::AdvancePaid, None).is_err());
        assert!(settle_amounts(1000.0, P::AdvancePaid, Some(1000.0)).is_err());
        assert!(settle_amounts(1000.0, P::Pending, Some(1500.0)).is_err());
    }

    #[test]
    fn paid_clears_remaining() {
        let s = settle_amounts(500.0, P::Paid, Some(100.0)).unwrap();
        assert_eq!(s.remaining_amount, Some(0.0));
        assert_eq!(s.advance_amount, Some(100.0));
    }

    #[test]
    fn validate_update_checks_transition_first() {
        let err = validate_update(B::Completed, B::Pending, P::Paid, 100.0, None).unwrap_err();
        assert!(matches!(err, StatusError::InvalidTransition { .. }));

        let err = validate_update(B::Pending, B::Cancelled, P::Paid, 100.0, None).unwrap_err();
        assert!(matches!(err, StatusError::InconsistentPair { .. }));
    }

    #[test]
    fn statuses_serialize_with_api_names() {
        assert_eq!(serde_json::to_string(&P::AdvancePaid).unwrap(), "\"Advance_Paid\"");
        assert_eq!("Advance_Paid".parse::<P>().unwrap(), P::AdvancePaid);
        assert_eq!("Confirmed".parse::<B>().unwrap(), B::Confirmed);
        assert!("confirmed".parse::<B>().is_err());
    }
}
