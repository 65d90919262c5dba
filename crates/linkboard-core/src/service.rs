//! Metrics query service: rollup-first totals with raw-event fallback,
//! per-dimension breakdowns, the activity feed, and the presence counter.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{DateRange, Event, EventType, HourlyRollup, PresenceRecord, Session};
use crate::store::MetricsStore;

/// Trailing window for the "active now" count, in minutes.
pub const PRESENCE_WINDOW_MINUTES: i64 = 5;

/// Maximum rows returned by the `events` metric (activity feed).
pub const EVENT_FEED_LIMIT: u32 = 100;

/// Referrer breakdown cap.
pub const TOP_REFERRERS: usize = 10;

/// Recent-sessions cap on the composite dashboard fetch.
pub const DASHBOARD_SESSIONS_LIMIT: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Overview,
    Actions,
    Referrers,
    Devices,
    Geography,
    Events,
    Realtime,
    All,
}

impl MetricKind {
    /// Parse the `metric` query parameter. Absent means the composite fetch.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        match raw.map(str::trim) {
            None | Some("") | Some("all") => Ok(Self::All),
            Some("overview") => Ok(Self::Overview),
            Some("actions") => Ok(Self::Actions),
            Some("referrers") => Ok(Self::Referrers),
            Some("devices") => Ok(Self::Devices),
            Some("geography") => Ok(Self::Geography),
            Some("events") => Ok(Self::Events),
            Some("realtime") => Ok(Self::Realtime),
            Some(_) => Err(anyhow!(
                "metric must be one of: overview, actions, referrers, devices, geography, events, realtime, all"
            )),
        }
    }
}

/// Where overview totals came from: summed rollup rows, or the raw-event
/// fallback. Carried through so callers can tell provenance apart (e.g. for
/// future cache-warming decisions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsSource {
    Rollup,
    RawEvents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewTotals {
    pub page_views: i64,
    pub unique_visitors: i64,
    pub sessions: i64,
    pub total_duration: i64,
    pub bounces: i64,
    pub avg_session_duration: i64,
    pub bounce_rate: i64,
}

impl OverviewTotals {
    /// Derive the per-session metrics; both are 0 when there are no sessions,
    /// never NaN or infinite.
    pub fn from_counts(
        page_views: i64,
        unique_visitors: i64,
        sessions: i64,
        total_duration: i64,
        bounces: i64,
    ) -> Self {
        let avg_session_duration = if sessions > 0 {
            (total_duration as f64 / sessions as f64).round() as i64
        } else {
            0
        };
        let bounce_rate = if sessions > 0 {
            (bounces as f64 / sessions as f64 * 100.0).round() as i64
        } else {
            0
        };
        Self {
            page_views,
            unique_visitors,
            sessions,
            total_duration,
            bounces,
            avg_session_duration,
            bounce_rate,
        }
    }

    pub fn zero() -> Self {
        Self::from_counts(0, 0, 0, 0, 0)
    }
}

/// Sum precomputed hourly rows into overview totals.
pub fn sum_rollups(rows: &[HourlyRollup]) -> OverviewTotals {
    let mut page_views = 0;
    let mut unique_visitors = 0;
    let mut sessions = 0;
    let mut total_duration = 0;
    let mut bounces = 0;
    for row in rows {
        page_views += row.page_views;
        unique_visitors += row.unique_visitors;
        sessions += row.sessions;
        total_duration += row.total_session_duration;
        bounces += row.bounces;
    }
    OverviewTotals::from_counts(page_views, unique_visitors, sessions, total_duration, bounces)
}

/// Aggregate overview totals directly from raw rows.
///
/// `sessions` must be the batch-looked-up rows for the session ids appearing
/// in `events`; the counts derived from `events` alone do not depend on it.
/// Shared with the rollup builder so precomputed rows and fallback totals
/// cannot drift apart.
pub fn raw_totals(events: &[Event], sessions: &[Session]) -> OverviewTotals {
    let page_views = events
        .iter()
        .filter(|e| e.event_type == EventType::PageView)
        .count() as i64;
    let unique_visitors = events
        .iter()
        .map(|e| e.visitor_id.as_str())
        .collect::<HashSet<_>>()
        .len() as i64;
    let session_count = events
        .iter()
        .map(|e| e.session_id.as_str())
        .filter(|id| !id.is_empty())
        .collect::<HashSet<_>>()
        .len() as i64;
    let total_duration = sessions.iter().map(|s| s.duration_seconds).sum();
    let bounces = sessions.iter().filter(|s| s.bounce).count() as i64;
    OverviewTotals::from_counts(page_views, unique_visitors, session_count, total_duration, bounces)
}

/// Distinct non-empty session ids of `events`, for the batch session lookup.
pub fn distinct_session_ids(events: &[Event]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for event in events {
        if event.session_id.is_empty() {
            continue;
        }
        if seen.insert(event.session_id.as_str()) {
            ids.push(event.session_id.clone());
        }
    }
    ids
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewResult {
    pub totals: OverviewTotals,
    pub time_series: Vec<HourlyRollup>,
    pub source: MetricsSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionsResult {
    pub actions: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferrerCount {
    pub referrer: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferrersResult {
    pub referrers: Vec<ReferrerCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DevicesResult {
    pub devices: BTreeMap<String, u64>,
    pub browsers: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeographyResult {
    pub countries: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventsResult {
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeResult {
    pub active_visitors: i64,
    pub visitors: Vec<PresenceRecord>,
}

/// The composite dashboard fetch: four independent reads returned side by
/// side. Deliberately rollup-only — this path never falls back to raw
/// aggregation, it is a lightweight combined view.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardResult {
    pub events: Vec<Event>,
    pub metrics: Vec<HourlyRollup>,
    pub realtime: RealtimeResult,
    pub sessions: Vec<Session>,
}

/// The metrics query engine. Stateless between calls; every method takes the
/// wall clock as a parameter where it matters so aggregation stays pure.
#[derive(Clone)]
pub struct MetricsService {
    store: Arc<dyn MetricsStore>,
}

impl MetricsService {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn MetricsStore> {
        &self.store
    }

    /// Overview totals plus hourly time series.
    ///
    /// Rollup rows win when any exist; a cold range (new site, un-rolled-up
    /// hours) falls back to scanning raw events. The fallback is mandatory:
    /// rollups lag behind writes, and an empty-but-successful response here
    /// would misreport live sites as dead.
    pub async fn overview(&self, site_slug: &str, range: &DateRange) -> Result<OverviewResult> {
        let rollups = self.store.hourly_rollups(site_slug, range).await?;
        if !rollups.is_empty() {
            return Ok(OverviewResult {
                totals: sum_rollups(&rollups),
                time_series: rollups,
                source: MetricsSource::Rollup,
            });
        }

        tracing::debug!(site_slug, "no hourly rollups in range, aggregating raw events");
        let events = self.store.events_in_range(site_slug, range).await?;
        if events.is_empty() {
            return Ok(OverviewResult {
                totals: OverviewTotals::zero(),
                time_series: Vec::new(),
                source: MetricsSource::RawEvents,
            });
        }

        let session_ids = distinct_session_ids(&events);
        let sessions = if session_ids.is_empty() {
            Vec::new()
        } else {
            self.store.sessions_by_ids(site_slug, &session_ids).await?
        };

        Ok(OverviewResult {
            totals: raw_totals(&events, &sessions),
            time_series: Vec::new(),
            source: MetricsSource::RawEvents,
        })
    }

    /// Click counts per button position. Clicks without a recorded position
    /// land under `"unknown"`.
    pub async fn actions(&self, site_slug: &str, range: &DateRange) -> Result<ActionsResult> {
        let events = self.store.events_in_range(site_slug, range).await?;
        let mut actions: BTreeMap<String, u64> = BTreeMap::new();
        for event in events
            .iter()
            .filter(|e| e.event_type == EventType::ActionClick)
        {
            let key = match event.action_index {
                Some(index) => index.to_string(),
                None => "unknown".to_string(),
            };
            *actions.entry(key).or_insert(0) += 1;
        }
        Ok(ActionsResult { actions })
    }

    /// Top referrers, descending by count, capped at [`TOP_REFERRERS`].
    ///
    /// Events with no referrer are excluded; an empty referrer string means
    /// the capture path saw a direct visit and is bucketed as `"direct"`.
    pub async fn referrers(&self, site_slug: &str, range: &DateRange) -> Result<ReferrersResult> {
        let events = self.store.events_in_range(site_slug, range).await?;
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for event in &events {
            let Some(referrer) = event.referrer.as_deref() else {
                continue;
            };
            let key = if referrer.is_empty() { "direct" } else { referrer };
            *counts.entry(key.to_string()).or_insert(0) += 1;
        }

        let mut referrers: Vec<ReferrerCount> = counts
            .into_iter()
            .map(|(referrer, count)| ReferrerCount { referrer, count })
            .collect();
        // BTreeMap iteration gives name-ascending order; the stable sort on
        // count keeps it as the tiebreaker.
        referrers.sort_by(|a, b| b.count.cmp(&a.count));
        referrers.truncate(TOP_REFERRERS);
        Ok(ReferrersResult { referrers })
    }

    /// Device-type and browser breakdowns. Rows missing a value are omitted.
    pub async fn devices(&self, site_slug: &str, range: &DateRange) -> Result<DevicesResult> {
        let events = self.store.events_in_range(site_slug, range).await?;
        let mut devices: BTreeMap<String, u64> = BTreeMap::new();
        let mut browsers: BTreeMap<String, u64> = BTreeMap::new();
        for event in &events {
            if let Some(device) = event.device_type.as_deref() {
                *devices.entry(device.to_string()).or_insert(0) += 1;
            }
            if let Some(browser) = event.browser.as_deref() {
                *browsers.entry(browser.to_string()).or_insert(0) += 1;
            }
        }
        Ok(DevicesResult { devices, browsers })
    }

    /// Country breakdown. Rows with no country are omitted.
    pub async fn geography(&self, site_slug: &str, range: &DateRange) -> Result<GeographyResult> {
        let events = self.store.events_in_range(site_slug, range).await?;
        let mut countries: BTreeMap<String, u64> = BTreeMap::new();
        for event in &events {
            if let Some(country) = event.country.as_deref() {
                *countries.entry(country.to_string()).or_insert(0) += 1;
            }
        }
        Ok(GeographyResult { countries })
    }

    /// Activity feed: the most recent 100 events in range, newest first,
    /// returned verbatim.
    pub async fn events(&self, site_slug: &str, range: &DateRange) -> Result<EventsResult> {
        let events = self
            .store
            .recent_events(site_slug, range, EVENT_FEED_LIMIT)
            .await?;
        Ok(EventsResult { events })
    }

    /// Visitors seen within the trailing presence window.
    ///
    /// The count is the filtered row count — upsert semantics upstream keep
    /// one row per (site, visitor). Stateless: every call re-evaluates the
    /// window against the `now` it is given.
    pub async fn realtime(&self, site_slug: &str, now: DateTime<Utc>) -> Result<RealtimeResult> {
        let cutoff = now - Duration::minutes(PRESENCE_WINDOW_MINUTES);
        let visitors = self.store.presence_since(site_slug, cutoff).await?;
        Ok(RealtimeResult {
            active_visitors: visitors.len() as i64,
            visitors,
        })
    }

    /// The composite dashboard fetch: events feed, rollup series, realtime,
    /// and recent sessions, read concurrently and returned independently.
    ///
    /// This path intentionally does the bare rollup fetch without the raw
    /// fallback of [`MetricsService::overview`] — it is a cheap combined
    /// view, and consumers reconstruct a series from the events feed when
    /// the rollup series comes back empty.
    pub async fn all(
        &self,
        site_slug: &str,
        range: &DateRange,
        now: DateTime<Utc>,
    ) -> Result<DashboardResult> {
        let (events, metrics, realtime, sessions) = tokio::try_join!(
            self.store.recent_events(site_slug, range, EVENT_FEED_LIMIT),
            self.store.hourly_rollups(site_slug, range),
            self.realtime(site_slug, now),
            self.store
                .recent_sessions(site_slug, range, DASHBOARD_SESSIONS_LIMIT),
        )?;
        Ok(DashboardResult {
            events,
            metrics,
            realtime,
            sessions,
        })
    }
}
