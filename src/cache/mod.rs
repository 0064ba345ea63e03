use crate::{database::Database, redis_client::RedisClient};
use tracing::{info, warn};

pub mod catalog;
pub mod holds;
pub mod search;

#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
    db: Database,
    seat_hold_ttl: u64,
}

impl CacheService {
    pub fn new(redis: RedisClient, db: Database, seat_hold_ttl: u64) -> Self {
        Self { redis, db, seat_hold_ttl }
    }

    pub fn seat_hold_ttl(&self) -> u64 {
        self.seat_hold_ttl
    }

    // Warm the catalog caches at startup
    pub async fn warmup_cache(&self) {
        info!("Starting cache warmup...");

        match self.get_active_cities().await {
            Ok(cities) => info!("Loaded {} cities", cities.len()),
            Err(e) => warn!("Failed to warm cities: {:?}", e),
        }

        match self.get_active_packages().await {
            Ok(packages) => info!("Loaded {} packages", packages.len()),
            Err(e) => warn!("Failed to warm packages: {:?}", e),
        }

        info!("Cache warmup done");
    }

    /// Deletes every key matching `pattern`; returns how many were removed.
    pub(crate) async fn delete_matching(&self, pattern: &str) -> Result<usize, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut conn)
            .await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut pipe = redis::pipe();
        for key in &keys {
            pipe.del(key).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(keys.len())
    }
}
