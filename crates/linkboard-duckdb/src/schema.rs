/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup (idempotent).
///
/// `memory_limit` is passed at runtime from `Config.duckdb_memory_limit`
/// (env `LINKBOARD_DUCKDB_MEMORY`, default `"1GB"`). Always set an explicit
/// limit — the DuckDB default of 80% of system RAM is not acceptable for a
/// server process. `SET threads = 2` bounds the background thread pool for
/// single-writer embedded use.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- SETTINGS
-- ===========================================
-- Keys stored in this table:
--   'version'     – Database schema version (for migrations)
--   'install_id'  – Unique installation identifier
CREATE TABLE IF NOT EXISTS settings (
    key             VARCHAR PRIMARY KEY,
    value           VARCHAR NOT NULL
);

-- ===========================================
-- SITES
-- ===========================================
CREATE TABLE IF NOT EXISTS sites (
    slug            VARCHAR PRIMARY KEY,
    title           VARCHAR NOT NULL,
    created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- ===========================================
-- EVENTS (raw visit/click stream, append-only)
-- ===========================================
CREATE TABLE IF NOT EXISTS events (
    id              VARCHAR NOT NULL,              -- UUID v4
    site_slug       VARCHAR NOT NULL,
    event_type      VARCHAR NOT NULL,              -- 'page_view' | 'action_click' | 'session_end'
    visitor_id      VARCHAR NOT NULL,
    session_id      VARCHAR NOT NULL,
    action_index    INTEGER,                       -- button position, NULL for non-click events
    action_type     VARCHAR,
    referrer        VARCHAR,
    device_type     VARCHAR,                       -- 'desktop' | 'mobile' | 'tablet'
    browser         VARCHAR,
    country         VARCHAR(2),                    -- ISO 3166-1 alpha-2
    timestamp       TIMESTAMP NOT NULL
);
-- Optimised for range scans and the newest-first activity feed
CREATE INDEX IF NOT EXISTS idx_events_site_ts
    ON events(site_slug, timestamp DESC);

-- ===========================================
-- SESSIONS (closed by the capture path)
-- ===========================================
CREATE TABLE IF NOT EXISTS sessions (
    id              VARCHAR PRIMARY KEY,
    site_slug       VARCHAR NOT NULL,
    visitor_id      VARCHAR NOT NULL,
    duration_seconds BIGINT NOT NULL DEFAULT 0,
    bounce          BOOLEAN NOT NULL DEFAULT FALSE, -- exactly one page view
    started_at      TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sessions_site_started
    ON sessions(site_slug, started_at DESC);

-- ===========================================
-- ROLLUPS (one row per site per hour, built by the scheduler)
-- ===========================================
CREATE TABLE IF NOT EXISTS rollups_hourly (
    site_slug       VARCHAR NOT NULL,
    hour            TIMESTAMP NOT NULL,            -- truncated to the hour boundary
    page_views      BIGINT NOT NULL DEFAULT 0,
    unique_visitors BIGINT NOT NULL DEFAULT 0,
    sessions        BIGINT NOT NULL DEFAULT 0,
    total_session_duration BIGINT NOT NULL DEFAULT 0,
    bounces         BIGINT NOT NULL DEFAULT 0
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_rollups_site_hour
    ON rollups_hourly(site_slug, hour);

-- ===========================================
-- PRESENCE (heartbeat upserts; one row per site+visitor)
-- ===========================================
CREATE TABLE IF NOT EXISTS presence (
    site_slug       VARCHAR NOT NULL,
    visitor_id      VARCHAR NOT NULL,
    last_seen       TIMESTAMP NOT NULL,
    PRIMARY KEY (site_slug, visitor_id)
);
-- Optimised for the trailing-window active-visitors query
CREATE INDEX IF NOT EXISTS idx_presence_site_seen
    ON presence(site_slug, last_seen DESC);
"#
    )
}
