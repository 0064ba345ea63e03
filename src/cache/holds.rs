//! Checkout holds on transport seats.
//!
//! One key per (unit, journey date, seat) stores the holder's user id with
//! a TTL, so abandoned holds disappear on their own. Multi-seat holds and
//! releases run as Lua scripts to stay all-or-nothing.

use chrono::NaiveDate;
use redis::Script;

use crate::cache::CacheService;

// Returns the 1-based positions of seats held by somebody else; holds
// nothing unless that list is empty.
const HOLD_SEATS_LUA: &str = r#"
local conflicts = {}
for i, key in ipairs(KEYS) do
  local owner = redis.call('GET', key)
  if owner and owner ~= ARGV[1] then
    table.insert(conflicts, i)
  end
end
if #conflicts > 0 then
  return conflicts
end
for _, key in ipairs(KEYS) do
  redis.call('SET', key, ARGV[1], 'EX', ARGV[2])
end
return conflicts
"#;

// Deletes only keys owned by ARGV[1]; returns the number removed.
const RELEASE_SEATS_LUA: &str = r#"
local released = 0
for _, key in ipairs(KEYS) do
  if redis.call('GET', key) == ARGV[1] then
    redis.call('DEL', key)
    released = released + 1
  end
end
return released
"#;

pub fn seat_hold_key(transport_id: i64, date: NaiveDate, seat: i32) -> String {
    format!("hold:seat:{}:{}:{}", transport_id, date, seat)
}

/// Recovers (unit, date, seat) from a hold key.
pub fn parse_seat_hold_key(key: &str) -> Option<(i64, NaiveDate, i32)> {
    let mut parts = key.strip_prefix("hold:seat:")?.split(':');
    let transport_id = parts.next()?.parse().ok()?;
    let date = NaiveDate::parse_from_str(parts.next()?, "%Y-%m-%d").ok()?;
    let seat = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((transport_id, date, seat))
}

impl CacheService {
    /// Atomically holds `seats` for `user_id`. On conflict nothing is held
    /// and the seats owned by other users are returned.
    pub async fn hold_seats(
        &self,
        transport_id: i64,
        date: NaiveDate,
        seats: &[i32],
        user_id: i64,
    ) -> Result<Result<(), Vec<i32>>, redis::RedisError> {
        let script = Script::new(HOLD_SEATS_LUA);
        let mut invocation = script.prepare_invoke();
        for seat in seats {
            invocation.key(seat_hold_key(transport_id, date, *seat));
        }
        invocation.arg(user_id).arg(self.seat_hold_ttl);

        let mut conn = self.redis.conn.clone();
        let conflicts: Vec<usize> = invocation.invoke_async(&mut conn).await?;
        if conflicts.is_empty() {
            Ok(Ok(()))
        } else {
            Ok(Err(conflicts
                .into_iter()
                .filter_map(|i| seats.get(i.wrapping_sub(1)).copied())
                .collect()))
        }
    }

    /// Releases the caller's holds among `seats`; returns how many were freed.
    pub async fn release_seats(
        &self,
        transport_id: i64,
        date: NaiveDate,
        seats: &[i32],
        user_id: i64,
    ) -> Result<usize, redis::RedisError> {
        if seats.is_empty() {
            return Ok(0);
        }
        let script = Script::new(RELEASE_SEATS_LUA);
        let mut invocation = script.prepare_invoke();
        for seat in seats {
            invocation.key(seat_hold_key(transport_id, date, *seat));
        }
        invocation.arg(user_id);

        let mut conn = self.redis.conn.clone();
        invocation.invoke_async(&mut conn).await
    }

    /// Current holders of seats 1..=capacity, as (seat, user id) pairs.
    pub async fn seat_holds(
        &self,
        transport_id: i64,
        date: NaiveDate,
        capacity: i32,
    ) -> Result<Vec<(i32, i64)>, redis::RedisError> {
        if capacity <= 0 {
            return Ok(vec![]);
        }
        let mut conn = self.redis.conn.clone();
        let mut pipe = redis::pipe();
        for seat in 1..=capacity {
            pipe.get(seat_hold_key(transport_id, date, seat));
        }
        let holders: Vec<Option<i64>> = pipe.query_async(&mut conn).await?;

        Ok((1..=capacity)
            .zip(holders)
            .filter_map(|(seat, holder)| holder.map(|user| (seat, user)))
            .collect())
    }

    /// Drops every hold on a unit; used when an admin deletes it.
    pub async fn clear_unit_holds(&self, transport_id: i64) -> Result<usize, redis::RedisError> {
        self.delete_matching(&format!("hold:seat:{}:*", transport_id)).await
    }
}
