use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::types::Json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    cache::holds::parse_seat_hold_key,
    models::{houseboat::release_expired_holds, Deck},
    services::{inventory, payment::PaymentService},
    AppState,
};

const HELD_CABINS_PATH: &str = r#"$[*].items[*] ? (@.status == "held")"#;

pub struct CleanupService {
    state: Arc<AppState>,
}

impl CleanupService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Runs every cleanup step: payments, unpaid records, cabin holds and
    /// seat holds.
    pub async fn run_full_cleanup(&self) {
        info!("🧹 Starting full cleanup process");

        let expired = PaymentService::new(self.state.clone()).cleanup_expired_payments().await;
        if expired > 0 {
            info!("💳 Expired {} stale payments", expired);
        }

        self.cleanup_unpaid_bookings().await;
        self.cleanup_unpaid_package_orders().await;
        self.release_expired_cabin_holds().await;
        self.cleanup_orphaned_seat_holds().await;

        info!("✅ Full cleanup process completed");
    }

    fn unpaid_cutoff(&self) -> DateTime<Utc> {
        Utc::now() - Duration::minutes(self.state.config.holds.unpaid_booking_ttl_minutes)
    }

    /// Cancels pending seat bookings that were never paid and frees their seats.
    async fn cleanup_unpaid_bookings(&self) {
        let stale: Vec<i64> = match sqlx::query_scalar(
            r#"
            SELECT b.id
            FROM bookings b
            WHERE b.booking_status = 'Pending'
              AND b.payment_status IN ('Pending', 'Failed')
              AND b.created_at < $1
              AND NOT EXISTS (
                  SELECT 1 FROM payment_transactions pt
                  WHERE pt.target_kind = 'booking' AND pt.target_id = b.id AND pt.status = 'pending'
              )
            "#,
        )
        .bind(self.unpaid_cutoff())
        .fetch_all(&self.state.db.pool)
        .await
        {
            Ok(ids) => ids,
            Err(e) => {
                error!("🎫 Failed to load unpaid bookings: {:?}", e);
                return;
            }
        };

        if stale.is_empty() {
            info!("🎫 No unpaid bookings to cleanup");
            return;
        }

        info!("🎫 Found {} unpaid bookings to cancel", stale.len());

        let mut released_any = false;
        for booking_id in stale {
            match self.cancel_unpaid_booking(booking_id).await {
                Ok(Some(seats)) => {
                    released_any |= !seats.is_empty();
                    info!("🎫 Unpaid booking {} cancelled, {} seats released", booking_id, seats.len());
                }
                Ok(None) => warn!("🎫 Booking {} was not cancelled (status changed?)", booking_id),
                Err(e) => error!("🎫 Failed to cancel unpaid booking {}: {:?}", booking_id, e),
            }
        }

        if released_any {
            self.state.cache.invalidate_transport_searches().await;
        }
    }

    async fn cancel_unpaid_booking(&self, booking_id: i64) -> Result<Option<Vec<i32>>, sqlx::Error> {
        let mut tx = self.state.db.pool.begin().await?;

        let cancelled = sqlx::query(
            "UPDATE bookings
             SET booking_status = 'Cancelled', version = version + 1, updated_at = NOW()
             WHERE id = $1 AND booking_status = 'Pending' AND payment_status IN ('Pending', 'Failed')",
        )
        .bind(booking_id)
        .execute(&mut *tx)
        .await?;

        if cancelled.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let seats = inventory::release_booking_seats(&mut *tx, booking_id).await?;
        tx.commit().await?;
        Ok(Some(seats))
    }

    async fn cleanup_unpaid_package_orders(&self) {
        let result = sqlx::query(
            r#"
            UPDATE package_orders po
            SET booking_status = 'Cancelled', version = version + 1, updated_at = NOW()
            WHERE po.booking_status = 'Pending'
              AND po.payment_status IN ('Pending', 'Failed')
              AND po.created_at < $1
              AND NOT EXISTS (
                  SELECT 1 FROM payment_transactions pt
                  WHERE pt.target_kind = 'package_order' AND pt.target_id = po.id AND pt.status = 'pending'
              )
            "#,
        )
        .bind(self.unpaid_cutoff())
        .execute(&self.state.db.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() > 0 => {
                info!("🧳 Cancelled {} unpaid package orders", done.rows_affected());
            }
            Ok(_) => info!("🧳 No unpaid package orders to cleanup"),
            Err(e) => error!("🧳 Failed to cancel unpaid package orders: {:?}", e),
        }
    }

    /// Returns expired cabin holds to `available`. Each houseboat is written
    /// back with a version check, so a concurrent hold or admin edit wins and
    /// the sweep retries on the next run.
    async fn release_expired_cabin_holds(&self) {
        let boats: Vec<(i64, Json<Vec<Deck>>, i32)> = match sqlx::query_as(
            "SELECT id, deck_plans, version FROM houseboats WHERE jsonb_path_exists(deck_plans, $1::jsonpath)",
        )
        .bind(HELD_CABINS_PATH)
        .fetch_all(&self.state.db.pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                error!("🛶 Failed to load houseboats with held cabins: {:?}", e);
                return;
            }
        };

        let now = Utc::now();
        for (id, Json(mut decks), version) in boats {
            let released = release_expired_holds(&mut decks, now);
            if released.is_empty() {
                continue;
            }

            let saved = sqlx::query(
                "UPDATE houseboats
                 SET deck_plans = $1, version = version + 1, updated_at = NOW()
                 WHERE id = $2 AND version = $3",
            )
            .bind(Json(&decks))
            .bind(id)
            .bind(version)
            .execute(&self.state.db.pool)
            .await;

            match saved {
                Ok(done) if done.rows_affected() > 0 => {
                    info!("🛶 Houseboat {}: released expired holds on {:?}", id, released);
                }
                Ok(_) => warn!("🛶 Houseboat {} changed during cleanup, retrying next run", id),
                Err(e) => error!("🛶 Failed to release cabin holds on houseboat {}: {:?}", id, e),
            }
        }
    }

    /// Drops Redis seat holds on seats that are already booked.
    async fn cleanup_orphaned_seat_holds(&self) {
        let mut redis_conn = self.state.redis.conn.clone();

        let keys: Vec<String> = match redis::cmd("KEYS")
            .arg("hold:seat:*")
            .query_async(&mut redis_conn)
            .await
        {
            Ok(keys) => keys,
            Err(e) => {
                error!("🔑 Failed to list seat holds: {:?}", e);
                return;
            }
        };

        if keys.is_empty() {
            info!("🔑 No seat holds to check");
            return;
        }

        let parsed: Vec<(String, (i64, chrono::NaiveDate, i32))> = keys
            .into_iter()
            .filter_map(|key| parse_seat_hold_key(&key).map(|parsed| (key, parsed)))
            .collect();

        let unit_ids: Vec<i64> = parsed
            .iter()
            .map(|(_, (unit, _, _))| *unit)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let booked: Vec<(i64, chrono::NaiveDate, i32)> = match sqlx::query_as(
            "SELECT transport_id, journey_date, seat_no FROM booked_seats WHERE transport_id = ANY($1)",
        )
        .bind(&unit_ids)
        .fetch_all(&self.state.db.pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                error!("🔑 Failed to load booked seats: {:?}", e);
                return;
            }
        };
        let booked: HashSet<_> = booked.into_iter().collect();

        let orphaned: Vec<String> = parsed
            .into_iter()
            .filter(|(_, seat)| booked.contains(seat))
            .map(|(key, _)| key)
            .collect();

        if orphaned.is_empty() {
            info!("🔑 No orphaned seat holds found");
            return;
        }

        let mut pipe = redis::pipe();
        for key in &orphaned {
            pipe.del(key).ignore();
        }
        match pipe.query_async::<()>(&mut redis_conn).await {
            Ok(()) => info!("🔑 Cleaned up {} orphaned seat holds", orphaned.len()),
            Err(e) => error!("🔑 Failed to delete orphaned seat holds: {:?}", e),
        }
    }

    /// Counts of records the next cleanup run would touch.
    pub async fn get_cleanup_stats(&self) -> Result<CleanupStats, sqlx::Error> {
        let pool = &self.state.db.pool;
        let payment_cutoff = Utc::now() - Duration::minutes(self.state.config.payment.expiry_minutes);

        let expired_payments: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM payment_transactions WHERE status = 'pending' AND created_at < $1",
        )
        .bind(payment_cutoff)
        .fetch_one(pool)
        .await?;

        let unpaid_bookings: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM bookings
             WHERE booking_status = 'Pending' AND payment_status IN ('Pending', 'Failed')
               AND created_at < $1",
        )
        .bind(self.unpaid_cutoff())
        .fetch_one(pool)
        .await?;

        let unpaid_package_orders: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM package_orders
             WHERE booking_status = 'Pending' AND payment_status IN ('Pending', 'Failed')
               AND created_at < $1",
        )
        .bind(self.unpaid_cutoff())
        .fetch_one(pool)
        .await?;

        let boats_with_held_cabins: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM houseboats WHERE jsonb_path_exists(deck_plans, $1::jsonpath)",
        )
        .bind(HELD_CABINS_PATH)
        .fetch_one(pool)
        .await?;

        Ok(CleanupStats {
            expired_payments,
            unpaid_bookings,
            unpaid_package_orders,
            boats_with_held_cabins,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupStats {
    pub expired_payments: i64,
    pub unpaid_bookings: i64,
    pub unpaid_package_orders: i64,
    pub boats_with_held_cabins: i64,
}

impl CleanupStats {
    pub fn total_items_to_cleanup(&self) -> i64 {
        self.expired_payments + self.unpaid_bookings + self.unpaid_package_orders
    }
}

/// Background loop driving [`CleanupService`].
pub async fn run_cleanup_loop(state: Arc<AppState>) {
    let interval = std::time::Duration::from_secs(state.config.holds.cleanup_interval_seconds.max(1));
    let service = CleanupService::new(state);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        service.run_full_cleanup().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_total_skips_cabin_boats() {
        let stats = CleanupStats {
            expired_payments: 2,
            unpaid_bookings: 3,
            unpaid_package_orders: 1,
            boats_with_held_cabins: 9,
        };
        assert_eq!(stats.total_items_to_cleanup(), 6);
    }

    #[test]
    fn held_cabin_path_matches_serialized_status() {
        let item = serde_json::to_value(crate::models::houseboat::CabinStatus::Held).unwrap();
        assert_eq!(item, "held");
        assert!(HELD_CABINS_PATH.contains("\"held\""));
    }
}
