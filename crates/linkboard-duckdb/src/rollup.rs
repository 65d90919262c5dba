//! Hourly rollup builder and presence pruning, driven by the scheduler.

use anyhow::Result;
use chrono::{DateTime, Duration, Timelike, Utc};

use linkboard_core::service::{distinct_session_ids, raw_totals};

use crate::backend::{fmt_ts, DuckDbStore};
use crate::store_impl::{query_events, query_sessions_by_ids};

/// Truncate to the containing hour boundary.
pub fn hour_floor(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive()
        .and_hms_opt(ts.hour(), 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(ts)
}

/// Build rollup rows for the hour starting at `hour_start` (which must be a
/// truncated hour boundary) and return how many rows were written.
///
/// Skips the whole hour if any rollup row already exists for it, so a
/// scheduler tick that fires more than once per hour stays idempotent. Sites
/// with no events in the hour produce no row — cold ranges keep hitting the
/// raw-event fallback instead of reading zero rows as truth.
///
/// Totals use the same arithmetic as the query engine's fallback
/// aggregation, so summing these rows and rescanning raw events give
/// identical answers.
pub async fn build_hourly(db: &DuckDbStore, hour_start: DateTime<Utc>) -> Result<usize> {
    let hour_end = hour_start + Duration::hours(1);
    let start = fmt_ts(hour_start);
    let end = fmt_ts(hour_end);

    let conn = db.conn.lock().await;

    let already_built: i64 = conn
        .prepare("SELECT COUNT(*) FROM rollups_hourly WHERE hour = ?1")?
        .query_row(duckdb::params![start], |row| row.get(0))?;
    if already_built > 0 {
        return Ok(0);
    }

    let mut stmt = conn.prepare(
        "SELECT DISTINCT site_slug FROM events WHERE timestamp >= ?1 AND timestamp < ?2",
    )?;
    let mapped = stmt.query_map(duckdb::params![start, end], |row| row.get::<_, String>(0))?;
    let mut sites = Vec::new();
    for site in mapped {
        sites.push(site?);
    }

    let mut written = 0;
    for site_slug in sites {
        let events = query_events(&conn, &site_slug, &start, &end, true, false, None)?;
        if events.is_empty() {
            continue;
        }
        let session_ids = distinct_session_ids(&events);
        let sessions = query_sessions_by_ids(&conn, &site_slug, &session_ids)?;
        let totals = raw_totals(&events, &sessions);

        conn.execute(
            r#"INSERT INTO rollups_hourly (
                site_slug, hour, page_views, unique_visitors, sessions,
                total_session_duration, bounces
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            duckdb::params![
                site_slug,
                start,
                totals.page_views,
                totals.unique_visitors,
                totals.sessions,
                totals.total_duration,
                totals.bounces,
            ],
        )?;
        written += 1;
    }

    if written > 0 {
        tracing::info!(hour = %hour_start, sites = written, "hourly rollups built");
    }
    Ok(written)
}

/// Delete presence rows that fell out of the trailing window. The realtime
/// query filters by cutoff itself, so pruning is purely a size bound.
pub async fn prune_presence(db: &DuckDbStore, cutoff: DateTime<Utc>) -> Result<usize> {
    let conn = db.conn.lock().await;
    let deleted = conn.execute(
        "DELETE FROM presence WHERE last_seen < ?1",
        duckdb::params![fmt_ts(cutoff)],
    )?;
    Ok(deleted)
}
