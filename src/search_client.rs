use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// Route search over buses and boats.
#[derive(Clone)]
pub struct SearchClient {
    pool: PgPool,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TransportSearchResult {
    pub id: i64,
    pub kind: String,
    pub name: String,
    pub number: String,
    pub route_from: String,
    pub route_to: String,
    pub departure_time: NaiveTime,
    pub arrival_time: NaiveTime,
    pub capacity: i32,
    pub price: f64,
    pub seats_available: i32,
}

#[derive(Debug, Clone)]
pub struct TransportSearch {
    pub from: Option<String>,
    pub to: Option<String>,
    pub kind: Option<String>,
    pub date: NaiveDate,
    pub limit: i64,
    pub offset: i64,
}

impl SearchClient {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn search_transports(
        &self,
        search: &TransportSearch,
    ) -> Result<(Vec<TransportSearchResult>, i64), sqlx::Error> {
        let from = search.from.as_deref().map(prepare_pattern).filter(|p| p != "%%");
        let to = search.to.as_deref().map(prepare_pattern).filter(|p| p != "%%");

        if from.is_none() && to.is_none() && search.kind.is_none() {
            // Fast path for the unfiltered listing
            return self.list_all(search).await;
        }

        let rows = sqlx::query_as::<_, TransportSearchResult>(
            r#"
            SELECT
                t.id, t.kind, t.name, t.number, t.route_from, t.route_to,
                t.departure_time, t.arrival_time, t.capacity, t.price,
                GREATEST(t.capacity - COUNT(bs.seat_no), 0)::int AS seats_available
            FROM transport_units t
            LEFT JOIN booked_seats bs
                   ON bs.transport_id = t.id AND bs.journey_date = $4
            WHERE t.is_active
              AND ($1::text IS NULL OR t.route_from ILIKE $1)
              AND ($2::text IS NULL OR t.route_to ILIKE $2)
              AND ($3::text IS NULL OR t.kind = $3)
            GROUP BY t.id
            ORDER BY t.departure_time, t.id
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(&from)
        .bind(&to)
        .bind(&search.kind)
        .bind(search.date)
        .bind(search.limit)
        .bind(search.offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM transport_units t
            WHERE t.is_active
              AND ($1::text IS NULL OR t.route_from ILIKE $1)
              AND ($2::text IS NULL OR t.route_to ILIKE $2)
              AND ($3::text IS NULL OR t.kind = $3)
            "#,
        )
        .bind(&from)
        .bind(&to)
        .bind(&search.kind)
        .fetch_one(&self.pool)
        .await?;

        Ok((rows, total))
    }

    async fn list_all(
        &self,
        search: &TransportSearch,
    ) -> Result<(Vec<TransportSearchResult>, i64), sqlx::Error> {
        let rows = sqlx::query_as::<_, TransportSearchResult>(
            r#"
            SELECT
                t.id, t.kind, t.name, t.number, t.route_from, t.route_to,
                t.departure_time, t.arrival_time, t.capacity, t.price,
                GREATEST(t.capacity - COUNT(bs.seat_no), 0)::int AS seats_available
            FROM transport_units t
            LEFT JOIN booked_seats bs
                   ON bs.transport_id = t.id AND bs.journey_date = $1
            WHERE t.is_active
            GROUP BY t.id
            ORDER BY t.departure_time, t.id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(search.date)
        .bind(search.limit)
        .bind(search.offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transport_units WHERE is_active")
            .fetch_one(&self.pool)
            .await?;

        Ok((rows, total))
    }
}

/// Turns free text into an ILIKE pattern: strips wildcard and punctuation
/// characters, collapses whitespace and matches anywhere in the name.
pub fn prepare_pattern(query: &str) -> String {
    let cleaned = query
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    format!("%{}%", cleaned)
}
