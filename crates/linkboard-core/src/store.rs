//! Read contract against the event, rollup, and presence stores.

use chrono::{DateTime, Utc};

use crate::model::{DateRange, Event, HourlyRollup, PresenceRecord, Session};

/// Read-side contract the query engine runs against.
///
/// Implementations return rows only — filtering, ordering, and limiting are
/// the store's job; all arithmetic happens in [`crate::service`] so the
/// aggregation logic stays identical across backends and test fixtures.
///
/// The engine never writes through this trait; the capture path and the
/// rollup builder own all mutations.
#[async_trait::async_trait]
pub trait MetricsStore: Send + Sync + 'static {
    async fn site_exists(&self, site_slug: &str) -> anyhow::Result<bool>;

    /// Rollup rows whose hour falls inside `range` (inclusive), newest first.
    async fn hourly_rollups(
        &self,
        site_slug: &str,
        range: &DateRange,
    ) -> anyhow::Result<Vec<HourlyRollup>>;

    /// Every event in `range` (inclusive), in no guaranteed order.
    async fn events_in_range(
        &self,
        site_slug: &str,
        range: &DateRange,
    ) -> anyhow::Result<Vec<Event>>;

    /// The most recent `limit` events in `range`, newest first.
    async fn recent_events(
        &self,
        site_slug: &str,
        range: &DateRange,
        limit: u32,
    ) -> anyhow::Result<Vec<Event>>;

    /// Batch lookup of sessions by id. `ids` is bounded by the caller; an
    /// empty slice must return an empty vec without touching the store.
    async fn sessions_by_ids(
        &self,
        site_slug: &str,
        ids: &[String],
    ) -> anyhow::Result<Vec<Session>>;

    /// The most recent `limit` sessions started in `range`, newest first.
    async fn recent_sessions(
        &self,
        site_slug: &str,
        range: &DateRange,
        limit: u32,
    ) -> anyhow::Result<Vec<Session>>;

    /// Presence rows with `last_seen >= cutoff`.
    async fn presence_since(
        &self,
        site_slug: &str,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<PresenceRecord>>;
}
