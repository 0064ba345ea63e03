//! analytics.rs
//!
//! Admin reporting over bookings, orders and inventory.
//!
//! Provides:
//! - A dashboard with booking and order counts per status, collected
//!   revenue, catalog sizes and pending cleanup work.
//! - Seat occupancy of one unit on one journey date.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::{collections::BTreeMap, sync::Arc};
use tracing::info;

use crate::{
    controllers::transports::{load_unit, today},
    error::{ok, ApiResult, AppError},
    middleware::AdminUser,
    models::{transport::SeatSummary, SeatMap},
    services::{cleanup::CleanupService, inventory},
    AppState,
};

/// Routes for reporting.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/analytics/dashboard", get(dashboard))
        .route("/analytics/occupancy", get(occupancy))
}

fn ensure_enabled(state: &AppState) -> ApiResult<()> {
    if state.config.features.enable_analytics {
        Ok(())
    } else {
        Err(AppError::NotFound("Analytics are disabled".to_string()))
    }
}

// --- Queries ---

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub by_booking_status: BTreeMap<String, i64>,
    pub by_payment_status: BTreeMap<String, i64>,
    pub total: i64,
}

/// Counts rows of `table` grouped by both status columns.
async fn status_counts(pool: &PgPool, table: &'static str) -> sqlx::Result<StatusCounts> {
    let rows = sqlx::query(&format!(
        "SELECT booking_status, payment_status, COUNT(*) AS n FROM {} GROUP BY booking_status, payment_status",
        table
    ))
    .fetch_all(pool)
    .await?;

    let mut counts = StatusCounts::default();
    for row in rows {
        let booking: String = row.get("booking_status");
        let payment: String = row.get("payment_status");
        let n: i64 = row.get("n");
        *counts.by_booking_status.entry(booking).or_default() += n;
        *counts.by_payment_status.entry(payment).or_default() += n;
        counts.total += n;
    }
    Ok(counts)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Revenue {
    pub collected: f64,
    pub refunded: f64,
    pub completed_payments: i64,
}

/// Money collected through the gateway, from completed transactions.
async fn revenue(pool: &PgPool) -> sqlx::Result<Revenue> {
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(SUM(amount) FILTER (WHERE status = 'completed'), 0)::float8 AS collected,
            COALESCE(SUM(amount) FILTER (WHERE status = 'refunded'), 0)::float8 AS refunded,
            COUNT(*) FILTER (WHERE status = 'completed') AS completed_payments
        FROM payment_transactions
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(Revenue {
        collected: row.get("collected"),
        refunded: row.get("refunded"),
        completed_payments: row.get("completed_payments"),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogCounts {
    pub users: i64,
    pub active_units: i64,
    pub active_packages: i64,
    pub active_houseboats: i64,
}

async fn catalog_counts(pool: &PgPool) -> sqlx::Result<CatalogCounts> {
    let row = sqlx::query(
        r#"
        SELECT
            (SELECT COUNT(*) FROM users) AS users,
            (SELECT COUNT(*) FROM transport_units WHERE is_active) AS active_units,
            (SELECT COUNT(*) FROM packages WHERE is_active) AS active_packages,
            (SELECT COUNT(*) FROM houseboats WHERE is_active) AS active_houseboats
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(CatalogCounts {
        users: row.get("users"),
        active_units: row.get("active_units"),
        active_packages: row.get("active_packages"),
        active_houseboats: row.get("active_houseboats"),
    })
}

// --- Handlers ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Dashboard {
    bookings: StatusCounts,
    package_orders: StatusCounts,
    revenue: Revenue,
    catalog: CatalogCounts,
    pending_cleanup: crate::services::cleanup::CleanupStats,
}

/// GET /api/analytics/dashboard
///
/// All sections are queried concurrently; any failure fails the request.
async fn dashboard(State(state): State<Arc<AppState>>, _admin: AdminUser) -> ApiResult<impl IntoResponse> {
    ensure_enabled(&state)?;
    let pool = &state.db.pool;
    let cleanup = CleanupService::new(state.clone());

    let (bookings, package_orders, revenue, catalog, pending_cleanup) = futures::try_join!(
        status_counts(pool, "bookings"),
        status_counts(pool, "package_orders"),
        revenue(pool),
        catalog_counts(pool),
        cleanup.get_cleanup_stats(),
    )?;

    info!(
        "Dashboard: {} bookings, {} package orders, {:.2} collected",
        bookings.total, package_orders.total, revenue.collected
    );
    Ok(ok(Dashboard { bookings, package_orders, revenue, catalog, pending_cleanup }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OccupancyQuery {
    transport_id: i64,
    date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Occupancy {
    transport_id: i64,
    journey_date: NaiveDate,
    #[serde(flatten)]
    summary: SeatSummary,
    load_factor: f64,
}

/// GET /api/analytics/occupancy?transportId=&date=
async fn occupancy(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<OccupancyQuery>,
) -> ApiResult<impl IntoResponse> {
    ensure_enabled(&state)?;
    let unit = load_unit(&state, query.transport_id).await?;
    let date = query.date.unwrap_or_else(today);

    let mut conn = state.db.pool.acquire().await?;
    let booked = inventory::taken_seats(&mut *conn, unit.id, date).await?;
    drop(conn);
    let holds = state.cache.seat_holds(unit.id, date, unit.capacity).await?;
    let summary = SeatMap::new(unit.capacity, booked, holds).summary();

    Ok(ok(Occupancy {
        transport_id: unit.id,
        journey_date: date,
        load_factor: load_factor(&summary),
        summary,
    }))
}

/// Share of capacity taken by bookings.
fn load_factor(summary: &SeatSummary) -> f64 {
    if summary.capacity <= 0 {
        return 0.0;
    }
    summary.booked as f64 / summary.capacity as f64
}
