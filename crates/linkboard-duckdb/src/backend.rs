use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::Connection;
use tokio::sync::Mutex;
use tracing::info;

use linkboard_core::model::{Event, HourlyRollup, Session};

use crate::schema::init_sql;

/// Generate a cryptographically random hex string of `n` bytes (2n hex chars).
pub(crate) fn rand_hex(n: usize) -> String {
    use rand::RngCore;
    let mut buf = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Timestamp format written to and read from DuckDB TIMESTAMP columns.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()
}

/// Parse a DuckDB `CAST(x AS VARCHAR)` timestamp back into UTC.
pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(anyhow!("unparseable timestamp from store: {raw}"))
}

/// A DuckDB-backed metrics store.
///
/// DuckDB is single-writer: concurrent reads are fine, but concurrent writes
/// cause contention. We wrap the connection in `Arc<Mutex<_>>` so the async
/// runtime serialises access while the struct stays cheap to clone and share
/// across Axum handlers and the scheduler.
pub struct DuckDbStore {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl DuckDbStore {
    /// Open (or create) a DuckDB database file at `path`.
    ///
    /// `memory_limit` is a DuckDB size string such as `"1GB"` or `"512MB"`,
    /// read from `Config.duckdb_memory_limit` at the call site. Runs the
    /// schema init SQL so all tables and indexes exist.
    pub fn open(path: &str, memory_limit: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(&init_sql(memory_limit))?;
        Self::seed_settings_sync(&conn)?;
        info!(
            "DuckDB opened at {} with memory_limit={}, threads=2",
            path, memory_limit
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an **in-memory** DuckDB database.
    ///
    /// Intended for tests — data is discarded when the struct is dropped.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&init_sql("1GB"))?;
        Self::seed_settings_sync(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Seed the `settings` table on first open. `INSERT OR IGNORE` keeps
    /// re-runs on every startup safe.
    fn seed_settings_sync(conn: &Connection) -> Result<()> {
        let install_id = rand_hex(8);
        conn.execute(
            "INSERT OR IGNORE INTO settings (key, value) VALUES ('version', ?1)",
            duckdb::params!["1"],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO settings (key, value) VALUES ('install_id', ?1)",
            duckdb::params![install_id],
        )?;
        Ok(())
    }

    /// Execute `SELECT 1` as a lightweight liveness check.
    ///
    /// Called by the `/health` endpoint. Returns an error if the connection
    /// is unavailable (file locked, disk full, etc.).
    pub async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }

    /// Insert or update a site row.
    ///
    /// Intended for test fixtures and the startup seed. Safe to call
    /// repeatedly with the same `slug`.
    pub async fn seed_site(&self, slug: &str, title: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO sites (slug, title, created_at)
               VALUES (?1, ?2, CURRENT_TIMESTAMP)
               ON CONFLICT (slug) DO UPDATE SET title = EXCLUDED.title"#,
            duckdb::params![slug, title],
        )?;
        Ok(())
    }

    /// Insert a batch of events in a single transaction.
    ///
    /// The query engine itself never writes events; this exists for the
    /// capture path's flush and for test fixtures. Returns immediately
    /// (no-op) if `events` is empty.
    pub async fn insert_events(&self, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().await;
        // One transaction for the whole batch: atomic, and one fsync instead of N.
        let tx = conn.transaction()?;
        for event in events {
            tx.execute(
                r#"INSERT INTO events (
                    id, site_slug, event_type, visitor_id, session_id,
                    action_index, action_type, referrer, device_type, browser,
                    country, timestamp
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
                duckdb::params![
                    event.id,
                    event.site_slug,
                    event.event_type.as_str(),
                    event.visitor_id,
                    event.session_id,
                    event.action_index.map(|i| i as i64),
                    event.action_type,
                    event.referrer,
                    event.device_type,
                    event.browser,
                    event.country,
                    fmt_ts(event.timestamp),
                ],
            )?;
        }
        tx.commit()?;
        tracing::debug!(count = events.len(), "inserted events");
        Ok(())
    }

    /// Insert or replace session rows. Fixture/capture-path helper.
    pub async fn insert_sessions(&self, sessions: &[Session]) -> Result<()> {
        if sessions.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for session in sessions {
            tx.execute(
                r#"INSERT OR REPLACE INTO sessions (
                    id, site_slug, visitor_id, duration_seconds, bounce, started_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                duckdb::params![
                    session.id,
                    session.site_slug,
                    session.visitor_id,
                    session.duration_seconds,
                    session.bounce,
                    fmt_ts(session.started_at),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Heartbeat upsert: one presence row per (site, visitor).
    pub async fn upsert_presence(
        &self,
        site_slug: &str,
        visitor_id: &str,
        last_seen: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO presence (site_slug, visitor_id, last_seen)
               VALUES (?1, ?2, ?3)
               ON CONFLICT (site_slug, visitor_id) DO UPDATE SET last_seen = EXCLUDED.last_seen"#,
            duckdb::params![site_slug, visitor_id, fmt_ts(last_seen)],
        )?;
        Ok(())
    }

    /// Insert precomputed hourly rows. Used by the rollup builder and tests.
    pub async fn insert_rollups(&self, rows: &[HourlyRollup]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for row in rows {
            tx.execute(
                r#"INSERT INTO rollups_hourly (
                    site_slug, hour, page_views, unique_visitors, sessions,
                    total_session_duration, bounces
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                duckdb::params![
                    row.site_slug,
                    fmt_ts(row.hour),
                    row.page_views,
                    row.unique_visitors,
                    row.sessions,
                    row.total_session_duration,
                    row.bounces,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Acquire the DuckDB connection lock for direct queries.
    ///
    /// Intended for integration tests that need to verify stored data.
    /// Production code should use the typed methods above.
    pub async fn conn_for_test(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}
