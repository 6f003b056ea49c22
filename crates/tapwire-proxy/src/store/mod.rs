//! Durable exchange log backed by SQLite.
//!
//! Writers insert on background tasks with a bounded deadline; readers
//! (replay, inspection) take short row scans. WAL journaling keeps the
//! two from blocking each other. The insert statement text is a single
//! shared constant; sqlx prepares and caches it per pooled connection.

mod record;

pub use record::{headers_from_json, headers_to_json, ExchangeRecord};

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::metrics;

/// Deadline for one background insert.
const PERSIST_DEADLINE: Duration = Duration::from_secs(5);

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS traffic_records (
    id TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    protocol TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    service TEXT NOT NULL DEFAULT '',
    request_headers TEXT NOT NULL DEFAULT '{}',
    request_body BLOB,
    response_status INTEGER NOT NULL,
    response_headers TEXT NOT NULL DEFAULT '{}',
    response_body BLOB,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    client_ip TEXT NOT NULL DEFAULT '',
    test_id TEXT NOT NULL DEFAULT '',
    session_id TEXT NOT NULL DEFAULT '',
    connection_id TEXT NOT NULL DEFAULT '',
    message_type TEXT NOT NULL DEFAULT '',
    direction TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_traffic_replay
    ON traffic_records (protocol, method, url, timestamp);
"#;

const INSERT_SQL: &str = r#"
INSERT INTO traffic_records (
    id, timestamp, protocol, method, url, service,
    request_headers, request_body,
    response_status, response_headers, response_body,
    duration_ms, client_ip, test_id, session_id,
    connection_id, message_type, direction
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

/// A stored response, as needed by the replayer.
#[derive(Debug, Clone)]
pub struct StoredResponse {
    pub status: u16,
    pub headers_json: String,
    pub body: Vec<u8>,
}

/// Summary row for the inspection surface.
#[derive(Debug, Clone, Serialize)]
pub struct RecordSummary {
    pub id: String,
    pub timestamp: String,
    pub method: String,
    pub url: String,
    pub response_status: u16,
    pub duration_ms: i64,
    pub client_ip: String,
}

pub struct TrafficStore {
    pool: SqlitePool,
    pending: AtomicUsize,
}

impl TrafficStore {
    /// Open (creating if missing) the store at the given path.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL;").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous = NORMAL;").execute(&pool).await?;

        let store = Self {
            pool,
            pending: AtomicUsize::new(0),
        };
        store.initialize().await?;
        Ok(store)
    }

    /// In-memory store for tests. Single connection, since each SQLite
    /// in-memory connection is its own database.
    pub async fn open_in_memory() -> Result<Self, anyhow::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self {
            pool,
            pending: AtomicUsize::new(0),
        };
        store.initialize().await?;
        Ok(store)
    }

    async fn initialize(&self) -> Result<(), anyhow::Error> {
        for statement in SCHEMA_SQL.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Insert one exchange record.
    pub async fn insert(&self, record: &ExchangeRecord) -> Result<(), anyhow::Error> {
        if !record.status_valid() {
            anyhow::bail!(
                "record {} has out-of-range response status {}",
                record.id,
                record.response_status
            );
        }

        sqlx::query(INSERT_SQL)
            .bind(&record.id)
            .bind(format_timestamp(&record.timestamp))
            .bind(&record.protocol)
            .bind(&record.method)
            .bind(&record.url)
            .bind(&record.service)
            .bind(&record.request_headers)
            .bind(&record.request_body)
            .bind(i64::from(record.response_status))
            .bind(&record.response_headers)
            .bind(&record.response_body)
            .bind(record.duration_ms)
            .bind(&record.client_ip)
            .bind(&record.test_id)
            .bind(&record.session_id)
            .bind(&record.connection_id)
            .bind(&record.message_type)
            .bind(&record.direction)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist a record on a background task with a bounded deadline.
    /// Never exerts backpressure on the exchange that produced it.
    pub fn persist_detached(self: &Arc<Self>, record: ExchangeRecord) {
        let store = Arc::clone(self);
        store.pending.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            match tokio::time::timeout(PERSIST_DEADLINE, store.insert(&record)).await {
                Ok(Ok(())) => {
                    metrics::record_persistence("ok");
                    debug!(id = %record.id, method = %record.method, url = %record.url,
                        "exchange record saved");
                }
                Ok(Err(e)) => {
                    metrics::record_persistence("error");
                    warn!(id = %record.id, error = %e, "failed to save exchange record");
                }
                Err(_) => {
                    metrics::record_persistence("timeout");
                    warn!(id = %record.id, "exchange record write exceeded deadline");
                }
            }
            store.pending.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Number of persistence tasks still in flight.
    pub fn pending_writes(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait for in-flight persistence tasks, up to `deadline`. Returns
    /// the number of tasks still outstanding when the deadline expired.
    pub async fn drain(&self, deadline: Duration) -> usize {
        let start = tokio::time::Instant::now();
        while self.pending_writes() > 0 {
            if start.elapsed() >= deadline {
                return self.pending_writes();
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        0
    }

    /// Replay lookup: the most recent record for `(method, url)` wins.
    /// Single entry point for matching so the key can evolve.
    pub async fn find_replay(
        &self,
        method: &str,
        url: &str,
    ) -> Result<Option<StoredResponse>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT response_status, response_headers, response_body \
             FROM traffic_records \
             WHERE protocol = 'HTTP' AND method = ? AND url = ? \
             ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(method)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| StoredResponse {
            status: row.get::<i64, _>(0) as u16,
            headers_json: row.get::<String, _>(1),
            body: row.get::<Option<Vec<u8>>, _>(2).unwrap_or_default(),
        }))
    }

    /// Recent exchange summaries for the inspection surface.
    pub async fn recent(
        &self,
        limit: i64,
        method: Option<&str>,
        url_contains: Option<&str>,
    ) -> Result<Vec<RecordSummary>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id, timestamp, method, url, response_status, duration_ms, client_ip \
             FROM traffic_records \
             WHERE (?1 = '' OR method = ?1) \
               AND (?2 = '' OR url LIKE '%' || ?2 || '%') \
             ORDER BY timestamp DESC LIMIT ?3",
        )
        .bind(method.unwrap_or(""))
        .bind(url_contains.unwrap_or(""))
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| RecordSummary {
                id: row.get(0),
                timestamp: row.get(1),
                method: row.get(2),
                url: row.get(3),
                response_status: row.get::<i64, _>(4) as u16,
                duration_ms: row.get(5),
                client_ip: row.get(6),
            })
            .collect())
    }

    /// Fetch one full record by id.
    pub async fn get(&self, id: &str) -> Result<Option<ExchangeRecord>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, timestamp, protocol, method, url, service, \
                    request_headers, request_body, \
                    response_status, response_headers, response_body, \
                    duration_ms, client_ip, test_id, session_id, \
                    connection_id, message_type, direction \
             FROM traffic_records WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| ExchangeRecord {
            id: row.get(0),
            timestamp: parse_timestamp(&row.get::<String, _>(1)),
            protocol: row.get(2),
            method: row.get(3),
            url: row.get(4),
            service: row.get(5),
            request_headers: row.get(6),
            request_body: row.get::<Option<Vec<u8>>, _>(7).unwrap_or_default(),
            response_status: row.get::<i64, _>(8) as u16,
            response_headers: row.get(9),
            response_body: row.get::<Option<Vec<u8>>, _>(10).unwrap_or_default(),
            duration_ms: row.get(11),
            client_ip: row.get(12),
            test_id: row.get(13),
            session_id: row.get(14),
            connection_id: row.get(15),
            message_type: row.get(16),
            direction: row.get(17),
        }))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// RFC 3339 with fixed precision so lexicographic order is chronological.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(method: &str, url: &str, status: u16, body: &[u8]) -> ExchangeRecord {
        ExchangeRecord {
            id: ExchangeRecord::generate_id(),
            timestamp: Utc::now(),
            protocol: "HTTP".to_string(),
            method: method.to_string(),
            url: url.to_string(),
            service: String::new(),
            request_headers: "{}".to_string(),
            request_body: Vec::new(),
            response_status: status,
            response_headers: r#"{"content-type":["text/plain"]}"#.to_string(),
            response_body: body.to_vec(),
            duration_ms: 3,
            client_ip: "127.0.0.1".to_string(),
            test_id: String::new(),
            session_id: String::new(),
            connection_id: String::new(),
            message_type: String::new(),
            direction: String::new(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_round_trip() {
        let store = TrafficStore::open_in_memory().await.unwrap();
        let mut rec = record("POST", "/v1/users", 201, b"created");
        rec.request_body = br#"{"n":"a"}"#.to_vec();
        rec.session_id = "s-1".to_string();
        let id = rec.id.clone();

        store.insert(&rec).await.unwrap();

        let loaded = store.get(&id).await.unwrap().unwrap();
        assert_eq!(loaded.method, "POST");
        assert_eq!(loaded.url, "/v1/users");
        assert_eq!(loaded.request_body, br#"{"n":"a"}"#);
        assert_eq!(loaded.response_status, 201);
        assert_eq!(loaded.response_body, b"created");
        assert_eq!(loaded.session_id, "s-1");
        assert!(loaded.duration_ms >= 0);
        assert!(loaded.connection_id.is_empty());
    }

    #[tokio::test]
    async fn test_replay_hit() {
        let store = TrafficStore::open_in_memory().await.unwrap();
        store.insert(&record("GET", "/x", 200, b"hello")).await.unwrap();

        let stored = store.find_replay("GET", "/x").await.unwrap().unwrap();
        assert_eq!(stored.status, 200);
        assert_eq!(stored.body, b"hello");
    }

    #[tokio::test]
    async fn test_replay_miss() {
        let store = TrafficStore::open_in_memory().await.unwrap();
        assert!(store.find_replay("GET", "/anything").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replay_key_is_method_and_url() {
        let store = TrafficStore::open_in_memory().await.unwrap();
        store.insert(&record("GET", "/x", 200, b"get")).await.unwrap();

        assert!(store.find_replay("POST", "/x").await.unwrap().is_none());
        assert!(store.find_replay("GET", "/x?y=1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replay_most_recent_wins() {
        let store = TrafficStore::open_in_memory().await.unwrap();

        let mut old = record("GET", "/x", 200, b"old");
        old.timestamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut new = record("GET", "/x", 200, b"new");
        new.timestamp = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        store.insert(&old).await.unwrap();
        store.insert(&new).await.unwrap();

        let stored = store.find_replay("GET", "/x").await.unwrap().unwrap();
        assert_eq!(stored.body, b"new");
    }

    #[tokio::test]
    async fn test_replay_is_deterministic() {
        let store = TrafficStore::open_in_memory().await.unwrap();
        store.insert(&record("GET", "/x", 200, b"hello")).await.unwrap();

        let first = store.find_replay("GET", "/x").await.unwrap().unwrap();
        let second = store.find_replay("GET", "/x").await.unwrap().unwrap();
        assert_eq!(first.status, second.status);
        assert_eq!(first.body, second.body);
    }

    #[tokio::test]
    async fn test_out_of_range_status_rejected() {
        let store = TrafficStore::open_in_memory().await.unwrap();
        let err = store.insert(&record("GET", "/x", 0, b"")).await.unwrap_err();
        assert!(err.to_string().contains("out-of-range"));
    }

    #[tokio::test]
    async fn test_recent_with_filters() {
        let store = TrafficStore::open_in_memory().await.unwrap();
        store.insert(&record("GET", "/a/one", 200, b"")).await.unwrap();
        store.insert(&record("POST", "/a/two", 201, b"")).await.unwrap();
        store.insert(&record("GET", "/b/three", 200, b"")).await.unwrap();

        let all = store.recent(100, None, None).await.unwrap();
        assert_eq!(all.len(), 3);

        let gets = store.recent(100, Some("GET"), None).await.unwrap();
        assert_eq!(gets.len(), 2);

        let a_paths = store.recent(100, None, Some("/a/")).await.unwrap();
        assert_eq!(a_paths.len(), 2);

        let one = store.recent(100, Some("POST"), Some("two")).await.unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].response_status, 201);
    }

    #[tokio::test]
    async fn test_drain_with_no_pending_is_immediate() {
        let store = TrafficStore::open_in_memory().await.unwrap();
        assert_eq!(store.drain(Duration::from_millis(10)).await, 0);
    }

    #[test]
    fn test_timestamp_order_is_lexicographic() {
        let early = format_timestamp(&Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap());
        let late = format_timestamp(&Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 6).unwrap());
        assert!(early < late);
    }
}
