//! Chart preparation over already-fetched metric payloads.
//!
//! The query surface has grown several field-name variants over time
//! (`timeSeries`/`timeseries`, `page_views`/`pageViews`, ...). Everything in
//! this module maps those onto one canonical series row, rebuilds a series
//! from the raw event feed when the server supplied none, and derives the
//! presentation values (trend, moving average) the dashboard charts. All
//! functions are pure: same payload in, same report out.

use std::collections::{BTreeMap, HashSet};

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Trailing window length for the chart's smoothing line, in buckets.
pub const MOVING_AVERAGE_WINDOW: usize = 6;

/// One canonical time-series row. Every upstream variant shape normalizes to
/// this before any derivation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    pub hour: DateTime<Utc>,
    /// Pre-rendered axis label, e.g. "Mar 10 14:00".
    pub label: String,
    pub page_views: i64,
    pub unique_visitors: i64,
    pub sessions: i64,
    pub clicks: i64,
}

impl SeriesPoint {
    fn new(hour: DateTime<Utc>) -> Self {
        Self {
            hour,
            label: hour.format("%b %d %H:%M").to_string(),
            page_views: 0,
            unique_visitors: 0,
            sessions: 0,
            clicks: 0,
        }
    }
}

/// The counter a chart is plotting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChartMetric {
    PageViews,
    UniqueVisitors,
    Sessions,
    Clicks,
}

impl ChartMetric {
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        match raw.map(str::trim) {
            None | Some("") | Some("pageViews") => Ok(Self::PageViews),
            Some("uniqueVisitors") => Ok(Self::UniqueVisitors),
            Some("sessions") => Ok(Self::Sessions),
            Some("clicks") => Ok(Self::Clicks),
            Some(_) => Err(anyhow!(
                "metric must be one of: pageViews, uniqueVisitors, sessions, clicks"
            )),
        }
    }

    pub fn value_of(&self, point: &SeriesPoint) -> i64 {
        match self {
            ChartMetric::PageViews => point.page_views,
            ChartMetric::UniqueVisitors => point.unique_visitors,
            ChartMetric::Sessions => point.sessions,
            ChartMetric::Clicks => point.clicks,
        }
    }
}

/// Known shapes of a server series row. Serde aliases carry the exhaustive
/// variant mapping; anything else deserializes to `None` and the row is
/// dropped below.
#[derive(Debug, Deserialize)]
struct RawSeriesRow {
    #[serde(default, alias = "timestamp", alias = "time", alias = "date")]
    hour: Option<String>,
    #[serde(default, alias = "pageViews", alias = "pageviews", alias = "views")]
    page_views: Option<i64>,
    #[serde(default, alias = "uniqueVisitors", alias = "visitors")]
    unique_visitors: Option<i64>,
    #[serde(default)]
    sessions: Option<i64>,
    #[serde(default)]
    clicks: Option<i64>,
}

/// Known shapes of a raw event row as it appears in the activity feed.
#[derive(Debug, Deserialize)]
struct RawEventRow {
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default, alias = "eventType")]
    event_type: Option<String>,
    #[serde(default, alias = "visitorId", alias = "uid")]
    visitor_id: Option<String>,
    #[serde(default, alias = "sessionId")]
    session_id: Option<String>,
}

/// Parse the timestamp formats the stores and rollup jobs have emitted.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    None
}

fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive()
        .and_hms_opt(ts.hour(), 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(ts)
}

/// Extract and normalize the time series of an overview payload.
///
/// Rows whose timestamp is missing or unparseable are dropped, with a warning
/// recorded — dirty rows must not block the rest of the chart.
pub fn normalize_series(overview: &Value) -> Vec<SeriesPoint> {
    let series = ["timeSeries", "timeseries", "series", "timeline"]
        .iter()
        .find_map(|key| overview.get(*key))
        .and_then(Value::as_array);
    let Some(rows) = series else {
        return Vec::new();
    };

    let mut points = Vec::with_capacity(rows.len());
    for row in rows {
        let Ok(raw) = serde_json::from_value::<RawSeriesRow>(row.clone()) else {
            tracing::warn!("dropping malformed time-series row");
            continue;
        };
        let Some(hour) = raw.hour.as_deref().and_then(parse_timestamp) else {
            tracing::warn!(row = %row, "dropping time-series row with unparseable timestamp");
            continue;
        };
        let mut point = SeriesPoint::new(hour);
        point.page_views = raw.page_views.unwrap_or(0);
        point.unique_visitors = raw.unique_visitors.unwrap_or(0);
        point.sessions = raw.sessions.unwrap_or(0);
        point.clicks = raw.clicks.unwrap_or(0);
        points.push(point);
    }
    // The server emits rollup rows newest first; the canonical series is
    // chronological so trend halves line up with earlier/later periods.
    points.sort_by_key(|p| p.hour);
    points
}

#[derive(Default)]
struct HourBucket {
    page_views: i64,
    clicks: i64,
    visitors: HashSet<String>,
    sessions: HashSet<String>,
}

/// Rebuild an hourly series from raw event rows.
///
/// Used when normalization produced nothing — the composite dashboard fetch
/// returns no series for un-rolled-up ranges even when totals exist. Buckets
/// come out in ascending chronological order, one per distinct hour.
pub fn series_from_events(events: &[Value]) -> Vec<SeriesPoint> {
    let mut buckets: BTreeMap<DateTime<Utc>, HourBucket> = BTreeMap::new();
    for row in events {
        let Ok(raw) = serde_json::from_value::<RawEventRow>(row.clone()) else {
            tracing::warn!("dropping malformed event row");
            continue;
        };
        let Some(ts) = raw.timestamp.as_deref().and_then(parse_timestamp) else {
            tracing::warn!(row = %row, "dropping event row with unparseable timestamp");
            continue;
        };
        let bucket = buckets.entry(truncate_to_hour(ts)).or_default();
        match raw.event_type.as_deref() {
            Some("page_view") => bucket.page_views += 1,
            Some("action_click") => bucket.clicks += 1,
            _ => {}
        }
        if let Some(visitor) = raw.visitor_id {
            bucket.visitors.insert(visitor);
        }
        if let Some(session) = raw.session_id {
            bucket.sessions.insert(session);
        }
    }

    buckets
        .into_iter()
        .map(|(hour, bucket)| {
            let mut point = SeriesPoint::new(hour);
            point.page_views = bucket.page_views;
            point.clicks = bucket.clicks;
            point.unique_visitors = bucket.visitors.len() as i64;
            point.sessions = bucket.sessions.len() as i64;
            point
        })
        .collect()
}

/// Period-over-period movement of the selected metric within one series.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trend {
    pub previous: i64,
    pub current: i64,
    pub delta: i64,
    /// `None` when the first half sums to zero — there is no base to express
    /// a percentage against.
    pub percent: Option<f64>,
}

/// Split the series at `floor(n/2)` and compare the two halves.
pub fn trend(series: &[SeriesPoint], metric: ChartMetric) -> Trend {
    let mid = series.len() / 2;
    let previous: i64 = series[..mid].iter().map(|p| metric.value_of(p)).sum();
    let current: i64 = series[mid..].iter().map(|p| metric.value_of(p)).sum();
    let delta = current - previous;
    let percent = if previous > 0 {
        Some(delta as f64 / previous as f64 * 100.0)
    } else {
        None
    };
    Trend {
        previous,
        current,
        delta,
        percent,
    }
}

/// Trailing moving average of the selected metric, one value per point.
/// The window clamps to available history at the series start; no look-ahead.
pub fn moving_average(series: &[SeriesPoint], metric: ChartMetric, window: usize) -> Vec<f64> {
    let window = window.max(1);
    let values: Vec<i64> = series.iter().map(|p| metric.value_of(p)).collect();
    values
        .iter()
        .enumerate()
        .map(|(i, _)| {
            let start = i.saturating_sub(window - 1);
            let slice = &values[start..=i];
            slice.iter().sum::<i64>() as f64 / slice.len() as f64
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartPoint {
    #[serde(flatten)]
    pub point: SeriesPoint,
    pub moving_average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTotals {
    pub page_views: i64,
    pub unique_visitors: i64,
    pub sessions: i64,
    pub clicks: i64,
}

/// Chart-ready bundle: canonical series with smoothing, derived totals, and
/// trend for the selected metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartReport {
    pub metric: ChartMetric,
    pub series: Vec<ChartPoint>,
    pub totals: ReportTotals,
    pub trend: Trend,
}

fn total_field(overview: &Value, key: &str) -> Option<i64> {
    overview.get("totals")?.get(key)?.as_i64()
}

fn sum_actions(actions: &Value) -> Option<i64> {
    let map = actions.get("actions")?.as_object()?;
    Some(map.values().filter_map(Value::as_i64).sum())
}

/// Assemble the full chart report from the per-metric payloads a dashboard
/// load already fetched. Issues no queries of its own; calling it twice on
/// the same input yields identical output.
pub fn build_report(
    overview: &Value,
    events: &[Value],
    actions: Option<&Value>,
    metric: ChartMetric,
) -> ChartReport {
    let mut series = normalize_series(overview);
    if series.is_empty() {
        series = series_from_events(events);
    }

    let sum = |m: ChartMetric| series.iter().map(|p| m.value_of(p)).sum::<i64>();
    let action_clicks = actions.and_then(sum_actions);
    let totals = ReportTotals {
        page_views: total_field(overview, "pageViews").unwrap_or_else(|| sum(ChartMetric::PageViews)),
        unique_visitors: total_field(overview, "uniqueVisitors")
            .unwrap_or_else(|| sum(ChartMetric::UniqueVisitors)),
        sessions: total_field(overview, "sessions").unwrap_or_else(|| sum(ChartMetric::Sessions)),
        clicks: action_clicks.unwrap_or_else(|| sum(ChartMetric::Clicks)),
    };

    let trend = trend(&series, metric);
    let averages = moving_average(&series, metric, MOVING_AVERAGE_WINDOW);
    let series = series
        .into_iter()
        .zip(averages)
        .map(|(point, moving_average)| ChartPoint {
            point,
            moving_average,
        })
        .collect();

    ChartReport {
        metric,
        series,
        totals,
        trend,
    }
}
