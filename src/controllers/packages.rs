use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use sqlx::types::Json;
use std::sync::Arc;
use tracing::info;

use crate::{
    controllers::{transports::today, version_conflict, StatusUpdateRequest},
    database::{is_db_code, FOREIGN_KEY_VIOLATION},
    error::{created, message, ok, paginated, ApiResult, AppError, PageQuery},
    extract::ValidatedJson,
    middleware::{AdminUser, AuthUser, MaybeAuthUser},
    models::{
        booking::validate_update,
        package::{order_amount, PackageInput, PackageOrderInput, PACKAGE_COLUMNS, PACKAGE_ORDER_COLUMNS},
        BookingStatus, Package, PackageOrder, PackageOrderRow, PackageRow,
    },
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/packages", get(list_packages).post(create_package))
        .route("/packages/orders/my", get(my_orders))
        .route("/packages/admin/bookings", get(list_orders))
        .route(
            "/packages/admin/bookings/{id}",
            get(get_order).put(update_order).delete(delete_order),
        )
        .route("/packages/{id}", get(get_package).put(update_package).delete(delete_package))
        .route("/packages/{id}/book", post(book_package))
}

/* ---------- helpers ---------- */

async fn load_package(state: &AppState, id: i64) -> ApiResult<Package> {
    let row = sqlx::query_as::<_, PackageRow>(&format!("SELECT {} FROM packages WHERE id = $1", PACKAGE_COLUMNS))
        .bind(id)
        .fetch_optional(&state.db.pool)
        .await?
        .ok_or_else(|| AppError::not_found("Package"))?;
    Ok(row.into())
}

async fn load_order(state: &AppState, id: i64) -> ApiResult<PackageOrder> {
    let row = sqlx::query_as::<_, PackageOrderRow>(&format!(
        "SELECT {} FROM package_orders WHERE id = $1",
        PACKAGE_ORDER_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or_else(|| AppError::not_found("Package order"))?;
    PackageOrder::try_from(row)
}

fn into_orders(rows: Vec<PackageOrderRow>) -> ApiResult<Vec<PackageOrder>> {
    rows.into_iter().map(PackageOrder::try_from).collect()
}

fn matches_query(package: &Package, needle: &str) -> bool {
    package.title.to_lowercase().contains(needle) || package.description.to_lowercase().contains(needle)
}

/* ---------- CATALOG ---------- */

#[derive(Debug, Default, Deserialize)]
pub struct PackageListQuery {
    pub q: Option<String>,
}

// GET /api/packages
async fn list_packages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PackageListQuery>,
) -> ApiResult<impl IntoResponse> {
    let mut packages = state.cache.get_active_packages().await?;
    if let Some(needle) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let needle = needle.to_lowercase();
        packages.retain(|p| matches_query(p, &needle));
    }
    Ok(ok(packages))
}

// GET /api/packages/{id}
async fn get_package(
    State(state): State<Arc<AppState>>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let package = load_package(&state, id).await?;
    if !package.is_active && !viewer.is_some_and(|v| v.is_admin) {
        return Err(AppError::not_found("Package"));
    }
    Ok(ok(package))
}

// POST /api/packages
async fn create_package(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    ValidatedJson(input): ValidatedJson<PackageInput>,
) -> ApiResult<impl IntoResponse> {
    let row = sqlx::query_as::<_, PackageRow>(&format!(
        "INSERT INTO packages (title, description, price, duration_days, itinerary, is_active)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {}",
        PACKAGE_COLUMNS
    ))
    .bind(input.title.trim())
    .bind(&input.description)
    .bind(input.price)
    .bind(input.duration())
    .bind(Json(&input.itinerary))
    .bind(input.is_active)
    .fetch_one(&state.db.pool)
    .await?;

    state.cache.invalidate_packages().await;
    info!("Created package {} ({})", row.id, row.title);
    Ok(created(Package::from(row)))
}

// PUT /api/packages/{id}
async fn update_package(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<i64>,
    ValidatedJson(input): ValidatedJson<PackageInput>,
) -> ApiResult<impl IntoResponse> {
    let row = sqlx::query_as::<_, PackageRow>(&format!(
        "UPDATE packages SET
             title = $1, description = $2, price = $3, duration_days = $4, itinerary = $5,
             is_active = $6, updated_at = NOW()
         WHERE id = $7
         RETURNING {}",
        PACKAGE_COLUMNS
    ))
    .bind(input.title.trim())
    .bind(&input.description)
    .bind(input.price)
    .bind(input.duration())
    .bind(Json(&input.itinerary))
    .bind(input.is_active)
    .bind(id)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or_else(|| AppError::not_found("Package"))?;

    state.cache.invalidate_packages().await;
    Ok(ok(Package::from(row)))
}

// DELETE /api/packages/{id}
async fn delete_package(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let deleted = sqlx::query("DELETE FROM packages WHERE id = $1")
        .bind(id)
        .execute(&state.db.pool)
        .await;

    match deleted {
        Ok(done) if done.rows_affected() == 0 => Err(AppError::not_found("Package")),
        Ok(_) => {
            state.cache.invalidate_packages().await;
            info!("Admin {} deleted package {}", admin.user_id, id);
            Ok(message("Package deleted"))
        }
        Err(e) if is_db_code(&e, FOREIGN_KEY_VIOLATION) => Err(AppError::conflict(
            "IN_USE",
            "Package has orders; deactivate it instead",
        )),
        Err(e) => Err(e.into()),
    }
}

/* ---------- ORDERS ---------- */

// POST /api/packages/{id}/book
async fn book_package(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    ValidatedJson(input): ValidatedJson<PackageOrderInput>,
) -> ApiResult<impl IntoResponse> {
    let package = load_package(&state, id).await?;
    if !package.is_active {
        return Err(AppError::BadRequest("This package is not accepting bookings".to_string()));
    }
    if input.travel_date < today() {
        return Err(AppError::BadRequest("Travel date is in the past".to_string()));
    }

    let amount = order_amount(package.price, input.guests.len());
    let row = sqlx::query_as::<_, PackageOrderRow>(&format!(
        "INSERT INTO package_orders
             (package_id, user_id, travel_date, guests, contact, emergency_contact, amount, notes)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING {}",
        PACKAGE_ORDER_COLUMNS
    ))
    .bind(package.id)
    .bind(user.user_id)
    .bind(input.travel_date)
    .bind(Json(&input.guests))
    .bind(Json(&input.contact))
    .bind(Json(&input.emergency_contact))
    .bind(amount)
    .bind(&input.notes)
    .fetch_one(&state.db.pool)
    .await?;

    info!(
        "Package order {} created: user={}, package={}, guests={}",
        row.id,
        user.user_id,
        package.id,
        input.guests.len()
    );
    Ok(created(PackageOrder::try_from(row)?))
}

// GET /api/packages/orders/my
async fn my_orders(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(page): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let rows = sqlx::query_as::<_, PackageOrderRow>(&format!(
        "SELECT {} FROM package_orders WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        PACKAGE_ORDER_COLUMNS
    ))
    .bind(user.user_id)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.db.pool)
    .await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM package_orders WHERE user_id = $1")
        .bind(user.user_id)
        .fetch_one(&state.db.pool)
        .await?;

    Ok(paginated(into_orders(rows)?, page.pagination(total)))
}

/* ---------- ADMIN ORDERS ---------- */

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFilter {
    pub status: Option<BookingStatus>,
    pub package_id: Option<i64>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

// GET /api/packages/admin/bookings
async fn list_orders(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(filter): Query<OrderFilter>,
) -> ApiResult<impl IntoResponse> {
    let page = PageQuery { page: filter.page, page_size: filter.page_size };
    let status = filter.status.map(BookingStatus::as_str);
    const WHERE: &str = "WHERE ($1::text IS NULL OR booking_status = $1)
           AND ($2::bigint IS NULL OR package_id = $2)";

    let rows = sqlx::query_as::<_, PackageOrderRow>(&format!(
        "SELECT {} FROM package_orders {} ORDER BY created_at DESC LIMIT $3 OFFSET $4",
        PACKAGE_ORDER_COLUMNS, WHERE
    ))
    .bind(status)
    .bind(filter.package_id)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.db.pool)
    .await?;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM package_orders {}", WHERE))
        .bind(status)
        .bind(filter.package_id)
        .fetch_one(&state.db.pool)
        .await?;

    Ok(paginated(into_orders(rows)?, page.pagination(total)))
}

// GET /api/packages/admin/bookings/{id}
async fn get_order(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(load_order(&state, id).await?))
}

// PUT /api/packages/admin/bookings/{id}
async fn update_order(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<StatusUpdateRequest>,
) -> ApiResult<impl IntoResponse> {
    let current = load_order(&state, id).await?;
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

    // The version predicate turns a concurrent write into a conflict
    let row = sqlx::query_as::<_, PackageOrderRow>(&format!(
        "UPDATE package_orders SET
             booking_status = $1, payment_status = $2, advance_amount = $3, remaining_amount = $4,
             notes = COALESCE($5, notes), version = version + 1, updated_at = NOW()
         WHERE id = $6 AND version = $7
         RETURNING {}",
        PACKAGE_ORDER_COLUMNS
    ))
    .bind(req.booking_status.as_str())
    .bind(req.payment_status.as_str())
    .bind(settlement.advance_amount)
    .bind(settlement.remaining_amount)
    .bind(&req.notes)
    .bind(id)
    .bind(req.version)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or_else(|| version_conflict(current.version + 1))?;

    info!(
        "Admin {} updated package order {}: {}/{} -> {}/{}",
        admin.user_id, id, current.booking_status, current.payment_status, req.booking_status, req.payment_status
    );
    Ok(ok(PackageOrder::try_from(row)?))
}

// DELETE /api/packages/admin/bookings/{id}
async fn delete_order(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let done = sqlx::query("DELETE FROM package_orders WHERE id = $1")
        .bind(id)
        .execute(&state.db.pool)
        .await?;
    if done.rows_affected() == 0 {
        return Err(AppError::not_found("Package order"));
    }

    info!("Admin {} deleted package order {}", admin.user_id, id);
    Ok(message("Package order deleted"))
}
