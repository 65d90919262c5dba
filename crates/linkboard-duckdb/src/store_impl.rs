//! `MetricsStore` implementation: parameterized row reads over DuckDB.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::Connection;

use linkboard_core::model::{DateRange, Event, EventType, HourlyRollup, PresenceRecord, Session};
use linkboard_core::store::MetricsStore;

use crate::backend::{fmt_ts, parse_ts, DuckDbStore};

/// Chunk size for `IN (...)` batch lookups, keeping statements bounded.
const SESSION_LOOKUP_CHUNK: usize = 500;

const EVENT_COLUMNS: &str = "id, event_type, visitor_id, session_id, action_index, action_type, \
     referrer, device_type, browser, country, CAST(timestamp AS VARCHAR)";

/// Map one projected events row. Rows with an unrecognised `event_type` are
/// dropped with a warning — dirty rows must not fail the whole read.
#[allow(clippy::type_complexity)]
fn collect_events(
    rows: Vec<(
        String,
        String,
        String,
        String,
        Option<i64>,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        String,
    )>,
    site_slug: &str,
) -> Result<Vec<Event>> {
    let mut events = Vec::with_capacity(rows.len());
    for (
        id,
        event_type,
        visitor_id,
        session_id,
        action_index,
        action_type,
        referrer,
        device_type,
        browser,
        country,
        ts,
    ) in rows
    {
        let Some(event_type) = EventType::parse(&event_type) else {
            tracing::warn!(site_slug, event_type, "skipping event with unknown type");
            continue;
        };
        events.push(Event {
            id,
            site_slug: site_slug.to_string(),
            event_type,
            visitor_id,
            session_id,
            action_index: action_index.map(|i| i as u32),
            action_type,
            referrer,
            device_type,
            browser,
            country,
            timestamp: parse_ts(&ts)?,
        });
    }
    Ok(events)
}

/// Fetch events for one site. `end_exclusive` switches the upper bound from
/// the inclusive query-range semantics to the rollup builder's half-open
/// hour scan. Ordering ties on `timestamp` break by `id` so pagination-style
/// reads are stable.
pub(crate) fn query_events(
    conn: &Connection,
    site_slug: &str,
    start: &str,
    end: &str,
    end_exclusive: bool,
    newest_first: bool,
    limit: Option<u32>,
) -> Result<Vec<Event>> {
    let end_op = if end_exclusive { "<" } else { "<=" };
    let order = if newest_first {
        " ORDER BY timestamp DESC, id DESC"
    } else {
        ""
    };
    let limit_sql = match limit {
        Some(n) => format!(" LIMIT {n}"),
        None => String::new(),
    };
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM events \
         WHERE site_slug = ?1 AND timestamp >= ?2 AND timestamp {end_op} ?3{order}{limit_sql}"
    );

    let mut stmt = conn.prepare(&sql)?;
    let mapped = stmt.query_map(duckdb::params![site_slug, start, end], |row| {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
            row.get(9)?,
            row.get(10)?,
        ))
    })?;

    let mut rows = Vec::new();
    for row in mapped {
        rows.push(row?);
    }
    collect_events(rows, site_slug)
}

/// Batch session lookup, chunked so the `IN (...)` list stays bounded.
pub(crate) fn query_sessions_by_ids(
    conn: &Connection,
    site_slug: &str,
    ids: &[String],
) -> Result<Vec<Session>> {
    let mut sessions = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(SESSION_LOOKUP_CHUNK) {
        let placeholders: Vec<String> = (0..chunk.len()).map(|i| format!("?{}", i + 2)).collect();
        let sql = format!(
            "SELECT id, visitor_id, duration_seconds, bounce, CAST(started_at AS VARCHAR) \
             FROM sessions WHERE site_slug = ?1 AND id IN ({})",
            placeholders.join(", ")
        );

        let mut params: Vec<Box<dyn duckdb::types::ToSql>> =
            vec![Box::new(site_slug.to_string())];
        for id in chunk {
            params.push(Box::new(id.clone()));
        }
        let param_refs: Vec<&dyn duckdb::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let mapped = stmt.query_map(param_refs.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        for row in mapped {
            let (id, visitor_id, duration_seconds, bounce, started_at) = row?;
            sessions.push(Session {
                id,
                site_slug: site_slug.to_string(),
                visitor_id,
                duration_seconds,
                bounce,
                started_at: parse_ts(&started_at)?,
            });
        }
    }
    Ok(sessions)
}

#[async_trait]
impl MetricsStore for DuckDbStore {
    async fn site_exists(&self, site_slug: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .prepare("SELECT COUNT(*) FROM sites WHERE slug = ?1")?
            .query_row(duckdb::params![site_slug], |row| row.get(0))?;
        Ok(count > 0)
    }

    async fn hourly_rollups(
        &self,
        site_slug: &str,
        range: &DateRange,
    ) -> Result<Vec<HourlyRollup>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT CAST(hour AS VARCHAR), page_views, unique_visitors, sessions, \
                    total_session_duration, bounces \
             FROM rollups_hourly \
             WHERE site_slug = ?1 AND hour >= ?2 AND hour <= ?3 \
             ORDER BY hour DESC",
        )?;
        let mapped = stmt.query_map(
            duckdb::params![site_slug, fmt_ts(range.start), fmt_ts(range.end)],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        )?;

        let mut rollups = Vec::new();
        for row in mapped {
            let (hour, page_views, unique_visitors, sessions, total_session_duration, bounces) =
                row?;
            rollups.push(HourlyRollup {
                site_slug: site_slug.to_string(),
                hour: parse_ts(&hour)?,
                page_views,
                unique_visitors,
                sessions,
                total_session_duration,
                bounces,
            });
        }
        Ok(rollups)
    }

    async fn events_in_range(&self, site_slug: &str, range: &DateRange) -> Result<Vec<Event>> {
        let conn = self.conn.lock().await;
        query_events(
            &conn,
            site_slug,
            &fmt_ts(range.start),
            &fmt_ts(range.end),
            false,
            false,
            None,
        )
    }

    async fn recent_events(
        &self,
        site_slug: &str,
        range: &DateRange,
        limit: u32,
    ) -> Result<Vec<Event>> {
        let conn = self.conn.lock().await;
        query_events(
            &conn,
            site_slug,
            &fmt_ts(range.start),
            &fmt_ts(range.end),
            false,
            true,
            Some(limit),
        )
    }

    async fn sessions_by_ids(&self, site_slug: &str, ids: &[String]) -> Result<Vec<Session>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().await;
        query_sessions_by_ids(&conn, site_slug, ids)
    }

    async fn recent_sessions(
        &self,
        site_slug: &str,
        range: &DateRange,
        limit: u32,
    ) -> Result<Vec<Session>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT id, visitor_id, duration_seconds, bounce, CAST(started_at AS VARCHAR) \
             FROM sessions \
             WHERE site_slug = ?1 AND started_at >= ?2 AND started_at <= ?3 \
             ORDER BY started_at DESC, id DESC LIMIT {limit}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mapped = stmt.query_map(
            duckdb::params![site_slug, fmt_ts(range.start), fmt_ts(range.end)],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )?;

        let mut sessions = Vec::new();
        for row in mapped {
            let (id, visitor_id, duration_seconds, bounce, started_at) = row?;
            sessions.push(Session {
                id,
                site_slug: site_slug.to_string(),
                visitor_id,
                duration_seconds,
                bounce,
                started_at: parse_ts(&started_at)?,
            });
        }
        Ok(sessions)
    }

    async fn presence_since(
        &self,
        site_slug: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PresenceRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT visitor_id, CAST(last_seen AS VARCHAR) \
             FROM presence \
             WHERE site_slug = ?1 AND last_seen >= ?2 \
             ORDER BY last_seen DESC",
        )?;
        let mapped = stmt.query_map(duckdb::params![site_slug, fmt_ts(cutoff)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut records = Vec::new();
        for row in mapped {
            let (visitor_id, last_seen) = row?;
            records.push(PresenceRecord {
                site_slug: site_slug.to_string(),
                visitor_id,
                last_seen: parse_ts(&last_seen)?,
            });
        }
        Ok(records)
    }
}
