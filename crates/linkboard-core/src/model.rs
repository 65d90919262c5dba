use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a recorded visitor interaction.
///
/// `SessionEnd` rows are written by the session-close job; they carry no
/// dimension data and only matter for the activity feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PageView,
    ActionClick,
    SessionEnd,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PageView => "page_view",
            EventType::ActionClick => "action_click",
            EventType::SessionEnd => "session_end",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "page_view" => Some(EventType::PageView),
            "action_click" => Some(EventType::ActionClick),
            "session_end" => Some(EventType::SessionEnd),
            _ => None,
        }
    }
}

/// A raw visit/click event, read-only from the engine's perspective.
///
/// Dimension fields (`referrer`, `device_type`, `browser`, `country`) are
/// populated by the capture path and may be NULL; the query layer buckets or
/// skips missing values rather than failing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub site_slug: String,
    pub event_type: EventType,
    pub visitor_id: String,
    pub session_id: String,
    pub action_index: Option<u32>,
    pub action_type: Option<String>,
    pub referrer: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub country: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One visitor-interaction window. `bounce` is true when the session produced
/// a single page view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub site_slug: String,
    pub visitor_id: String,
    pub duration_seconds: i64,
    pub bounce: bool,
    pub started_at: DateTime<Utc>,
}

/// Precomputed per-site per-hour aggregate, produced by the rollup builder.
/// `hour` is truncated to the hour boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HourlyRollup {
    pub site_slug: String,
    pub hour: DateTime<Utc>,
    pub page_views: i64,
    pub unique_visitors: i64,
    pub sessions: i64,
    pub total_session_duration: i64,
    pub bounces: i64,
}

/// One heartbeat row per (site, visitor) — upsert semantics upstream mean the
/// realtime count can treat row count and visitor count as the same thing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub site_slug: String,
    pub visitor_id: String,
    pub last_seen: DateTime<Utc>,
}

/// Inclusive query range. Construction rejects inverted ranges so every
/// downstream read can assume `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(anyhow!("start_date must be on or before end_date"));
        }
        Ok(Self { start, end })
    }

    /// Default dashboard range: the trailing `days` ending at `now`.
    pub fn trailing_days(now: DateTime<Utc>, days: i64) -> Self {
        Self {
            start: now - Duration::days(days),
            end: now,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}
