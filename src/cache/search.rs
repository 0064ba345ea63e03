use crate::cache::CacheService;
use redis::AsyncCommands;

const TRANSPORT_SEARCH_PREFIX: &str = "search:transports:";

impl CacheService {
    /// Returns a cached search result by key.
    pub async fn get_cached_search(&self, key: &str) -> Result<Option<String>, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        conn.get(key).await
    }

    /// Stores a search result with a TTL in seconds.
    pub async fn cache_search_result(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        conn.set_ex(key, value, ttl_seconds).await
    }

    /// Seat availability changed; cached transport searches are stale.
    pub async fn invalidate_transport_searches(&self) {
        match self.delete_matching(&format!("{}*", TRANSPORT_SEARCH_PREFIX)).await {
            Ok(n) if n > 0 => tracing::debug!("Invalidated {} cached transport searches", n),
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to invalidate transport searches: {:?}", e),
        }
    }
}

pub fn transport_search_key(
    from: &str,
    to: &str,
    kind: &str,
    date: &str,
    page: u32,
    page_size: u32,
) -> String {
    format!(
        "{}from={}&to={}&kind={}&date={}&p={}&ps={}",
        TRANSPORT_SEARCH_PREFIX,
        from.to_lowercase(),
        to.to_lowercase(),
        kind,
        date,
        page,
        page_size
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_keys_ignore_case_of_city_names() {
        assert_eq!(
            transport_search_key("Kochi", "ALLEPPEY", "boat", "2030-01-01", 1, 20),
            transport_search_key("kochi", "alleppey", "boat", "2030-01-01", 1, 20),
        );
        assert!(transport_search_key("", "", "", "", 1, 20).starts_with(TRANSPORT_SEARCH_PREFIX));
    }
}
