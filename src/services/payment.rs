//! payment.rs
//!
//! Payment lifecycle for seat bookings and package orders.
//!
//! 1.  **Initiation**: works out what is owed (full amount, advance, or the
//!     balance after an advance), opens a gateway payment and records a
//!     pending transaction.
//! 2.  **Notifications**: webhook statuses are re-checked with the gateway
//!     when the circuit breaker allows it, then applied to the transaction
//!     and the paid record in one database transaction. An unsigned
//!     notification the gateway cannot confirm changes nothing.
//! 3.  **Expiry**: pending transactions older than the payment window get a
//!     last status check and are otherwise marked expired.

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::{FromRow, PgConnection};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    error::{ApiResult, AppError},
    middleware::AuthUser,
    models::{
        booking::{parse_stored, validate_update, Settlement, StatusError},
        payment::GatewayOutcome,
        BookingStatus, PaymentStatus, PaymentTarget, PaymentTransaction,
    },
    services::{
        gateway::{to_minor_units, NewPayment},
        inventory,
    },
    AppState,
};

const TRANSACTION_COLUMNS: &str =
    "id, target_kind, target_id, transaction_id, amount, is_advance, status, created_at, updated_at";

/// What the next payment for a record should charge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Charge {
    pub amount: f64,
    pub is_advance: bool,
}

/// Decides the charge for a record given its current statuses.
pub fn charge_for(
    total: f64,
    booking: BookingStatus,
    payment: PaymentStatus,
    paid_advance: Option<f64>,
    requested_advance: Option<f64>,
) -> Result<Charge, AppError> {
    if booking.is_terminal() {
        return Err(AppError::conflict(
            "BOOKING_CLOSED",
            format!("A {} booking cannot be paid", booking.as_str().to_lowercase()),
        ));
    }

    match payment {
        PaymentStatus::Paid => Err(AppError::conflict("ALREADY_PAID", "This booking is already paid")),
        PaymentStatus::Refunded => Err(AppError::conflict("BOOKING_CLOSED", "This booking was refunded")),
        PaymentStatus::AdvancePaid => {
            if requested_advance.is_some() {
                return Err(AppError::BadRequest(
                    "An advance has already been paid; only the balance can be paid now".to_string(),
                ));
            }
            Ok(Charge { amount: total - paid_advance.unwrap_or(0.0), is_advance: false })
        }
        PaymentStatus::Pending | PaymentStatus::Failed => match requested_advance {
            None => Ok(Charge { amount: total, is_advance: false }),
            Some(a) if a.is_finite() && a > 0.0 && a < total => Ok(Charge { amount: a, is_advance: true }),
            Some(_) => Err(AppError::BadRequest(format!(
                "Advance amount must be greater than 0 and less than {:.2}",
                total
            ))),
        },
    }
}

/// Statuses and amounts after a successful gateway payment.
pub fn settle_success(
    total: f64,
    current: BookingStatus,
    paid_advance: Option<f64>,
    charge: Charge,
) -> Result<(BookingStatus, PaymentStatus, Settlement), StatusError> {
    if charge.is_advance {
        let next = if current == BookingStatus::Pending { BookingStatus::Booked } else { current };
        let settlement =
            validate_update(current, next, PaymentStatus::AdvancePaid, total, Some(charge.amount))?;
        Ok((next, PaymentStatus::AdvancePaid, settlement))
    } else {
        let next = match current {
            BookingStatus::Pending | BookingStatus::Booked => BookingStatus::Confirmed,
            other => other,
        };
        let settlement = validate_update(current, next, PaymentStatus::Paid, total, paid_advance)?;
        Ok((next, PaymentStatus::Paid, settlement))
    }
}

// Status columns shared by `bookings` and `package_orders`.
#[derive(Debug, Clone, FromRow)]
struct PayableRow {
    id: i64,
    user_id: i64,
    amount: f64,
    booking_status: String,
    payment_status: String,
    advance_amount: Option<f64>,
    remaining_amount: Option<f64>,
    version: i32,
}

impl PayableRow {
    fn statuses(&self) -> Result<(BookingStatus, PaymentStatus), AppError> {
        Ok((parse_stored(&self.booking_status)?, parse_stored(&self.payment_status)?))
    }
}

async fn load_payable(
    conn: &mut PgConnection,
    target: PaymentTarget,
    id: i64,
    for_update: bool,
) -> Result<Option<PayableRow>, sqlx::Error> {
    let sql = format!(
        "SELECT id, user_id, amount, booking_status, payment_status, advance_amount, \
         remaining_amount, version FROM {} WHERE id = $1{}",
        target.table(),
        if for_update { " FOR UPDATE" } else { "" }
    );
    sqlx::query_as::<_, PayableRow>(&sql).bind(id).fetch_optional(conn).await
}

/// Returned to the client after a payment was opened.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    pub payment_id: String,
    pub payment_url: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub is_advance: bool,
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOverview {
    pub target_kind: PaymentTarget,
    pub target_id: i64,
    pub booking_status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub amount: f64,
    pub advance_amount: Option<f64>,
    pub remaining_amount: Option<f64>,
    pub transactions: Vec<PaymentTransaction>,
}

pub struct PaymentService {
    state: Arc<AppState>,
}

impl PaymentService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Opens a gateway payment for a booking or package order.
    pub async fn initiate(
        &self,
        user: AuthUser,
        target: PaymentTarget,
        target_id: i64,
        requested_advance: Option<f64>,
    ) -> ApiResult<PaymentSession> {
        let pool = &self.state.db.pool;
        let mut conn = pool.acquire().await?;

        let row = load_payable(&mut *conn, target, target_id, false)
            .await?
            .ok_or_else(|| AppError::not_found("Booking"))?;
        user.ensure_owner_or_admin(row.user_id)?;

        let (booking, payment) = row.statuses()?;
        let charge = charge_for(row.amount, booking, payment, row.advance_amount, requested_advance)?;

        let window = Utc::now() - Duration::minutes(self.state.config.payment.expiry_minutes);
        let in_flight: Option<String> = sqlx::query_scalar(
            "SELECT transaction_id FROM payment_transactions
             WHERE target_kind = $1 AND target_id = $2 AND status = 'pending' AND created_at > $3
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(target.as_str())
        .bind(target_id)
        .bind(window)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(payment_id) = in_flight {
            return Err(AppError::conflict_with(
                "PAYMENT_IN_PROGRESS",
                "A payment for this booking is already in progress",
                json!({ "paymentId": payment_id }),
            ));
        }

        let email: Option<String> = sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
            .bind(row.user_id)
            .fetch_optional(&mut *conn)
            .await?;
        drop(conn);

        let order_id = format!("{}-{}-{}", target.as_str(), target_id, Utc::now().timestamp_millis());
        let gateway = &self.state.gateway;
        let response = gateway
            .create_payment(NewPayment {
                amount: to_minor_units(charge.amount),
                order_id: order_id.clone(),
                description: format!(
                    "{} {} for {} #{}",
                    if charge.is_advance { "Advance payment" } else { "Payment" },
                    order_id,
                    target.as_str().replace('_', " "),
                    target_id
                ),
                email,
            })
            .await?;

        if !response.success {
            return Err(AppError::Gateway(
                response.message.unwrap_or_else(|| "payment was rejected".to_string()),
            ));
        }
        let payment_id = response
            .payment_id
            .ok_or_else(|| AppError::Gateway("gateway response has no payment id".to_string()))?;

        sqlx::query(
            "INSERT INTO payment_transactions (target_kind, target_id, transaction_id, amount, is_advance, status)
             VALUES ($1, $2, $3, $4, $5, 'pending')",
        )
        .bind(target.as_str())
        .bind(target_id)
        .bind(&payment_id)
        .bind(charge.amount)
        .bind(charge.is_advance)
        .execute(pool)
        .await?;

        info!(
            "Payment {} opened for {} {}: amount={:.2}, advance={}",
            payment_id,
            target.as_str(),
            target_id,
            charge.amount,
            charge.is_advance
        );

        Ok(PaymentSession {
            payment_id,
            payment_url: response.payment_url,
            amount: charge.amount,
            currency: gateway.currency().to_string(),
            is_advance: charge.is_advance,
            expires_at: response.expires_at,
        })
    }

    /// Payment state of a record together with its transactions.
    pub async fn overview(&self, user: AuthUser, target: PaymentTarget, target_id: i64) -> ApiResult<PaymentOverview> {
        let mut conn = self.state.db.pool.acquire().await?;
        let row = load_payable(&mut *conn, target, target_id, false)
            .await?
            .ok_or_else(|| AppError::not_found("Booking"))?;
        user.ensure_owner_or_admin(row.user_id)?;
        let (booking_status, payment_status) = row.statuses()?;

        let transactions = sqlx::query_as::<_, PaymentTransaction>(&format!(
            "SELECT {} FROM payment_transactions
             WHERE target_kind = $1 AND target_id = $2
             ORDER BY created_at DESC",
            TRANSACTION_COLUMNS
        ))
        .bind(target.as_str())
        .bind(target_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(PaymentOverview {
            target_kind: target,
            target_id,
            booking_status,
            payment_status,
            amount: row.amount,
            advance_amount: row.advance_amount,
            remaining_amount: row.remaining_amount,
            transactions,
        })
    }

    async fn find_transaction(&self, payment_id: &str) -> Result<Option<PaymentTransaction>, sqlx::Error> {
        sqlx::query_as::<_, PaymentTransaction>(&format!(
            "SELECT {} FROM payment_transactions WHERE transaction_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&self.state.db.pool)
        .await
    }

    /// Handles a gateway notification.
    pub async fn process_webhook_notification(
        &self,
        payment_id: &str,
        status: &str,
        token: Option<&str>,
    ) -> ApiResult<()> {
        info!("Processing webhook: payment_id={}, status={}", payment_id, status);

        let gateway = &self.state.gateway;
        if let Some(token) = token {
            if !gateway.verify_notification(payment_id, status, token) {
                warn!("Rejected webhook for payment {}: bad signature", payment_id);
                return Err(AppError::unauthorized("INVALID_SIGNATURE", "Invalid notification signature"));
            }
        }

        let Some(transaction) = self.find_transaction(payment_id).await? else {
            warn!("Payment {} not found in database", payment_id);
            return Err(AppError::not_found("Payment"));
        };

        let rechecked = self.recheck_status(payment_id).await;
        if rechecked.is_none() && token.is_none() {
            warn!(
                "Unsigned webhook for payment {} could not be confirmed with the gateway, leaving it pending",
                payment_id
            );
        }

        let outcome = GatewayOutcome::for_notification(status, token.is_some(), rechecked);
        self.apply_outcome(&transaction, outcome).await
    }

    /// Status reported by the gateway itself, if it could be asked.
    async fn recheck_status(&self, payment_id: &str) -> Option<GatewayOutcome> {
        let gateway = &self.state.gateway;
        if !gateway.circuit_breaker().can_execute() {
            warn!("Circuit breaker is OPEN - skipping status re-check for payment {}", payment_id);
            return None;
        }

        match gateway.check_payment_status(payment_id).await {
            Ok(check) if check.success => check.status.as_deref().map(GatewayOutcome::from_status),
            Ok(_) => {
                warn!("Gateway could not report status of payment {}", payment_id);
                None
            }
            Err(e) => {
                warn!("Status re-check failed for payment {}: {}", payment_id, e);
                None
            }
        }
    }

    async fn apply_outcome(&self, transaction: &PaymentTransaction, outcome: GatewayOutcome) -> ApiResult<()> {
        match outcome {
            GatewayOutcome::Succeeded => self.process_successful_payment(transaction).await,
            GatewayOutcome::NeedsConfirmation => {
                if self.confirm_authorized(transaction).await {
                    self.process_successful_payment(transaction).await
                } else {
                    warn!(
                        "Could not auto-confirm payment {}, leaving it pending",
                        transaction.transaction_id
                    );
                    Ok(())
                }
            }
            GatewayOutcome::Failed => self.process_failed_payment(transaction).await,
            GatewayOutcome::Refunded => self.process_refund(transaction).await,
            GatewayOutcome::Pending => Ok(()),
            GatewayOutcome::Unknown => {
                warn!("Unknown gateway status for payment {}", transaction.transaction_id);
                Ok(())
            }
        }
    }

    async fn confirm_authorized(&self, transaction: &PaymentTransaction) -> bool {
        let gateway = &self.state.gateway;
        let check = match gateway.check_payment_status(&transaction.transaction_id).await {
            Ok(check) => check,
            Err(_) => return false,
        };
        let (Some(amount), Some(currency), Some(order_id)) = (check.amount, check.currency, check.order_id) else {
            return false;
        };
        matches!(
            gateway.confirm_payment(&transaction.transaction_id, amount, &currency, &order_id).await,
            Ok(response) if response.success
        )
    }

    fn target_of(transaction: &PaymentTransaction) -> ApiResult<PaymentTarget> {
        PaymentTarget::parse(&transaction.target_kind).ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("unknown payment target '{}'", transaction.target_kind))
        })
    }

    /// Marks the transaction completed and advances the paid record.
    pub async fn process_successful_payment(&self, transaction: &PaymentTransaction) -> ApiResult<()> {
        let target = Self::target_of(transaction)?;
        let mut tx = self.state.db.pool.begin().await?;

        let claimed: Option<i64> = sqlx::query_scalar(
            "UPDATE payment_transactions SET status = 'completed', updated_at = NOW()
             WHERE transaction_id = $1 AND status IN ('pending', 'expired', 'failed')
             RETURNING id",
        )
        .bind(&transaction.transaction_id)
        .fetch_optional(&mut *tx)
        .await?;

        if claimed.is_none() {
            info!("Payment {} already processed", transaction.transaction_id);
            return Ok(());
        }

        let row = load_payable(&mut *tx, target, transaction.target_id, true)
            .await?
            .ok_or_else(|| AppError::not_found("Booking"))?;
        let (current, _) = row.statuses()?;
        let charge = Charge { amount: transaction.amount, is_advance: transaction.is_advance };

        match settle_success(row.amount, current, row.advance_amount, charge) {
            Ok((booking_status, payment_status, settlement)) => {
                sqlx::query(&format!(
                    "UPDATE {} SET booking_status = $1, payment_status = $2, advance_amount = $3,
                         remaining_amount = $4, version = version + 1, updated_at = NOW()
                     WHERE id = $5",
                    target.table()
                ))
                .bind(booking_status.as_str())
                .bind(payment_status.as_str())
                .bind(settlement.advance_amount)
                .bind(settlement.remaining_amount)
                .bind(row.id)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
                info!(
                    "Payment {} completed: {} {} is now {}/{} (version {})",
                    transaction.transaction_id,
                    target.as_str(),
                    row.id,
                    booking_status,
                    payment_status,
                    row.version + 1
                );
            }
            Err(e) => {
                // Money arrived for a record that can no longer take it.
                tx.commit().await?;
                error!(
                    "Payment {} received for {} {} in state {}: {} - manual refund required",
                    transaction.transaction_id,
                    target.as_str(),
                    row.id,
                    current,
                    e
                );
            }
        }
        Ok(())
    }

    pub async fn process_failed_payment(&self, transaction: &PaymentTransaction) -> ApiResult<()> {
        let target = Self::target_of(transaction)?;
        let mut tx = self.state.db.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE payment_transactions SET status = 'failed', updated_at = NOW()
             WHERE transaction_id = $1 AND status = 'pending'",
        )
        .bind(&transaction.transaction_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(());
        }

        // An earlier advance keeps the record in Advance_Paid.
        sqlx::query(&format!(
            "UPDATE {} SET payment_status = 'Failed', version = version + 1, updated_at = NOW()
             WHERE id = $1 AND payment_status = 'Pending'",
            target.table()
        ))
        .bind(transaction.target_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!("Payment {} failed for {} {}", transaction.transaction_id, target.as_str(), transaction.target_id);
        Ok(())
    }

    /// A refund cancels the record and, for seat bookings, frees the seats.
    pub async fn process_refund(&self, transaction: &PaymentTransaction) -> ApiResult<()> {
        let target = Self::target_of(transaction)?;
        let mut tx = self.state.db.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE payment_transactions SET status = 'refunded', updated_at = NOW()
             WHERE transaction_id = $1 AND status <> 'refunded'",
        )
        .bind(&transaction.transaction_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Ok(());
        }

        let row = load_payable(&mut *tx, target, transaction.target_id, true)
            .await?
            .ok_or_else(|| AppError::not_found("Booking"))?;
        let (current, _) = row.statuses()?;

        if !current.can_transition_to(BookingStatus::Cancelled) {
            tx.commit().await?;
            warn!(
                "Refund {} recorded but {} {} stays {}",
                transaction.transaction_id,
                target.as_str(),
                row.id,
                current
            );
            return Ok(());
        }

        sqlx::query(&format!(
            "UPDATE {} SET booking_status = 'Cancelled', payment_status = 'Refunded',
                 version = version + 1, updated_at = NOW()
             WHERE id = $1",
            target.table()
        ))
        .bind(row.id)
        .execute(&mut *tx)
        .await?;

        let released = if target == PaymentTarget::Booking {
            inventory::release_booking_seats(&mut *tx, row.id).await?
        } else {
            vec![]
        };

        tx.commit().await?;
        if !released.is_empty() {
            self.state.cache.invalidate_transport_searches().await;
        }
        info!(
            "Payment {} refunded, {} {} cancelled, {} seats released",
            transaction.transaction_id,
            target.as_str(),
            row.id,
            released.len()
        );
        Ok(())
    }

    /// Expires pending payments older than the payment window. Returns how
    /// many transactions were expired.
    pub async fn cleanup_expired_payments(&self) -> usize {
        let cutoff = Utc::now() - Duration::minutes(self.state.config.payment.expiry_minutes);
        let expired = match sqlx::query_as::<_, PaymentTransaction>(&format!(
            "SELECT {} FROM payment_transactions WHERE status = 'pending' AND created_at < $1",
            TRANSACTION_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.state.db.pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                error!("Failed to load expired payments: {:?}", e);
                return 0;
            }
        };

        let gateway = &self.state.gateway;
        let mut count = 0;
        for transaction in expired {
            // Last chance: the gateway may have settled it without notifying us.
            if gateway.circuit_breaker().can_execute() {
                if let Ok(check) = gateway.check_payment_status(&transaction.transaction_id).await {
                    let outcome = check
                        .status
                        .as_deref()
                        .map(GatewayOutcome::from_status)
                        .unwrap_or(GatewayOutcome::Unknown);
                    if check.success
                        && matches!(outcome, GatewayOutcome::Succeeded | GatewayOutcome::NeedsConfirmation)
                    {
                        info!("Payment {} was confirmed during cleanup", transaction.transaction_id);
                        if let Err(e) = self.apply_outcome(&transaction, outcome).await {
                            error!("Failed to apply late payment {}: {:?}", transaction.transaction_id, e);
                        }
                        continue;
                    }
                }
            } else {
                warn!(
                    "Circuit breaker is OPEN - skipping API check for payment {}",
                    transaction.transaction_id
                );
            }

            if let Err(e) = self.expire_payment(&transaction).await {
                error!("Failed to expire payment {}: {:?}", transaction.transaction_id, e);
            } else {
                count += 1;
            }
        }
        count
    }

    async fn expire_payment(&self, transaction: &PaymentTransaction) -> ApiResult<()> {
        let target = Self::target_of(transaction)?;
        let mut tx = self.state.db.pool.begin().await?;

        sqlx::query(
            "UPDATE payment_transactions SET status = 'expired', updated_at = NOW()
             WHERE transaction_id = $1 AND status = 'pending'",
        )
        .bind(&transaction.transaction_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "UPDATE {} SET payment_status = 'Failed', version = version + 1, updated_at = NOW()
             WHERE id = $1 AND payment_status = 'Pending'",
            target.table()
        ))
        .bind(transaction.target_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!("Expired payment {} for {} {}", transaction.transaction_id, target.as_str(), transaction.target_id);
        Ok(())
    }
}
