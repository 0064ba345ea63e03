use crate::cache::CacheService;
use crate::models::{package::PACKAGE_COLUMNS, City, Package, PackageRow};
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{info, warn};

const CITIES_KEY: &str = "catalog:cities:active";
const PACKAGES_KEY: &str = "catalog:packages:active";
const CATALOG_TTL_SECONDS: u64 = 3600;

impl CacheService {
    // Active cities, cache first
    pub async fn get_active_cities(&self) -> Result<Vec<City>, sqlx::Error> {
        if let Ok(cities) = self.read_json::<Vec<City>>(CITIES_KEY).await {
            return Ok(cities);
        }

        let cities = self.load_active_cities().await?;
        if let Err(e) = self.write_json(CITIES_KEY, &cities).await {
            warn!("Failed to cache cities: {:?}", e);
        }
        Ok(cities)
    }

    // Active packages, cache first
    pub async fn get_active_packages(&self) -> Result<Vec<Package>, sqlx::Error> {
        if let Ok(packages) = self.read_json::<Vec<Package>>(PACKAGES_KEY).await {
            return Ok(packages);
        }

        let packages = self.load_active_packages().await?;
        if let Err(e) = self.write_json(PACKAGES_KEY, &packages).await {
            warn!("Failed to cache packages: {:?}", e);
        }
        Ok(packages)
    }

    pub async fn invalidate_cities(&self) {
        let mut conn = self.redis.conn.clone();
        let _: Result<(), _> = conn.del(CITIES_KEY).await;
        info!("Invalidated cities cache");
    }

    pub async fn invalidate_packages(&self) {
        let mut conn = self.redis.conn.clone();
        let _: Result<(), _> = conn.del(PACKAGES_KEY).await;
        info!("Invalidated packages cache");
    }

    // === Database ===

    async fn load_active_cities(&self) -> Result<Vec<City>, sqlx::Error> {
        sqlx::query_as::<_, City>(
            "SELECT id, name, region, is_active, created_at, updated_at
             FROM cities
             WHERE is_active
             ORDER BY name",
        )
        .fetch_all(&self.db.pool)
        .await
    }

    async fn load_active_packages(&self) -> Result<Vec<Package>, sqlx::Error> {
        let rows = sqlx::query_as::<_, PackageRow>(&format!(
            "SELECT {} FROM packages WHERE is_active ORDER BY title",
            PACKAGE_COLUMNS
        ))
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows.into_iter().map(Package::from).collect())
    }

    // === Cache ===

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let data: String = conn.get(key).await?;
        serde_json::from_str(&data)
            .map_err(|_| redis::RedisError::from((redis::ErrorKind::TypeError, "Parse error")))
    }

    async fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), redis::RedisError> {
        let data = serde_json::to_string(value)
            .map_err(|_| redis::RedisError::from((redis::ErrorKind::TypeError, "Serialize error")))?;
        let mut conn = self.redis.conn.clone();
        conn.set_ex(key, data, CATALOG_TTL_SECONDS).await
    }
}
