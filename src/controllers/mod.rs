pub mod auth;
pub mod bookings;
pub mod cities;
pub mod houseboats;
pub mod packages;
pub mod payment;
pub mod transports;
pub mod users;

#[cfg(feature = "analytics")]
pub mod analytics;

use axum::Router;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::AppError,
    models::{BookingStatus, PaymentStatus},
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    let router = Router::new()
        .merge(auth::routes())
        .merge(users::routes())
        .merge(cities::routes())
        .merge(transports::routes())
        .merge(bookings::routes())
        .merge(packages::routes())
        .merge(houseboats::routes())
        .merge(payment::routes());

    #[cfg(feature = "analytics")]
    let router = router.merge(analytics::routes());

    router
}

/// Admin status update shared by seat bookings and package orders.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateRequest {
    pub booking_status: BookingStatus,
    pub payment_status: PaymentStatus,
    #[validate(range(min = 0.0))]
    pub advance_amount: Option<f64>,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
    pub version: i32,
}

pub(crate) fn version_conflict(current: i32) -> AppError {
    AppError::conflict_with(
        "VERSION_CONFLICT",
        "The record was modified by someone else; reload and try again",
        json!({ "currentVersion": current }),
    )
}
