use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// What a payment pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentTarget {
    Booking,
    PackageOrder,
}

impl PaymentTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentTarget::Booking => "booking",
            PaymentTarget::PackageOrder => "package_order",
        }
    }

    /// Table holding the target records; both share the status columns.
    pub fn table(self) -> &'static str {
        match self {
            PaymentTarget::Booking => "bookings",
            PaymentTarget::PackageOrder => "package_orders",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "booking" => Some(PaymentTarget::Booking),
            "package_order" => Some(PaymentTarget::PackageOrder),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTransaction {
    pub id: i64,
    pub target_kind: String,
    pub target_id: i64,
    pub transaction_id: String,
    pub amount: f64,
    pub is_advance: bool,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a gateway status should be applied locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    Succeeded,
    NeedsConfirmation,
    Failed,
    Refunded,
    Pending,
    Unknown,
}

impl GatewayOutcome {
    pub fn from_status(status: &str) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "CONFIRMED" | "COMPLETED" => GatewayOutcome::Succeeded,
            "AUTHORIZED" => GatewayOutcome::NeedsConfirmation,
            "CANCELLED" | "FAILED" | "REJECTED" | "EXPIRED" => GatewayOutcome::Failed,
            "REFUNDED" => GatewayOutcome::Refunded,
            "NEW" | "PENDING" => GatewayOutcome::Pending,
            _ => GatewayOutcome::Unknown,
        }
    }

    /// Outcome a webhook may apply. The gateway's own answer wins; without
    /// one, only a signed notification is believed and an unsigned one
    /// leaves the payment pending for the expiry sweep.
    pub fn for_notification(claimed: &str, signed: bool, rechecked: Option<GatewayOutcome>) -> Self {
        match rechecked {
            Some(outcome) => outcome,
            None if signed => GatewayOutcome::from_status(claimed),
            None => GatewayOutcome::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_statuses_map_to_outcomes() {
        assert_eq!(GatewayOutcome::from_status("CONFIRMED"), GatewayOutcome::Succeeded);
        assert_eq!(GatewayOutcome::from_status("completed"), GatewayOutcome::Succeeded);
        assert_eq!(GatewayOutcome::from_status("AUTHORIZED"), GatewayOutcome::NeedsConfirmation);
        assert_eq!(GatewayOutcome::from_status("REJECTED"), GatewayOutcome::Failed);
        assert_eq!(GatewayOutcome::from_status("REFUNDED"), GatewayOutcome::Refunded);
        assert_eq!(GatewayOutcome::from_status("NEW"), GatewayOutcome::Pending);
        assert_eq!(GatewayOutcome::from_status("???"), GatewayOutcome::Unknown);
    }

    #[test]
    fn unsigned_notification_needs_gateway_answer() {
        let pending = GatewayOutcome::for_notification("CONFIRMED", false, None);
        assert_eq!(pending, GatewayOutcome::Pending);
        assert_eq!(GatewayOutcome::for_notification("REFUNDED", false, None), GatewayOutcome::Pending);

        let confirmed = GatewayOutcome::for_notification("CONFIRMED", false, Some(GatewayOutcome::Succeeded));
        assert_eq!(confirmed, GatewayOutcome::Succeeded);
    }

    #[test]
    fn gateway_answer_overrides_notification_body() {
        let outcome = GatewayOutcome::for_notification("CONFIRMED", true, Some(GatewayOutcome::Failed));
        assert_eq!(outcome, GatewayOutcome::Failed);
        assert_eq!(GatewayOutcome::for_notification("confirmed", true, None), GatewayOutcome::Succeeded);
    }

    #[test]
    fn targets_round_trip_through_strings() {
        for target in [PaymentTarget::Booking, PaymentTarget::PackageOrder] {
            assert_eq!(PaymentTarget::parse(target.as_str()), Some(target));
        }
        assert_eq!(PaymentTarget::parse("houseboat"), None);
    }
}
