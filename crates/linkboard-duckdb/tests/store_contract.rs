use chrono::{DateTime, Duration, TimeZone, Utc};

use linkboard_core::model::{DateRange, Event, EventType, Session};
use linkboard_core::store::MetricsStore;
use linkboard_duckdb::DuckDbStore;

fn ts(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, hour, minute, 0).unwrap()
}

fn range(start_hour: u32, end_hour: u32) -> DateRange {
    DateRange::new(ts(start_hour, 0), ts(end_hour, 0)).expect("valid range")
}

fn event(site: &str, id: &str, kind: EventType, visitor: &str, session: &str, at: DateTime<Utc>) -> Event {
    Event {
        id: id.to_string(),
        site_slug: site.to_string(),
        event_type: kind,
        visitor_id: visitor.to_string(),
        session_id: session.to_string(),
        action_index: None,
        action_type: None,
        referrer: None,
        device_type: None,
        browser: None,
        country: None,
        timestamp: at,
    }
}

fn session(site: &str, id: &str, duration: i64, bounce: bool, at: DateTime<Utc>) -> Session {
    Session {
        id: id.to_string(),
        site_slug: site.to_string(),
        visitor_id: format!("v-{id}"),
        duration_seconds: duration,
        bounce,
        started_at: at,
    }
}

async fn store_with_site() -> DuckDbStore {
    let db = DuckDbStore::open_in_memory().expect("in-memory DuckDB");
    db.seed_site("demo", "Demo Page").await.expect("seed site");
    db
}

#[tokio::test]
async fn open_seeds_settings_once() {
    let db = DuckDbStore::open_in_memory().expect("in-memory DuckDB");
    let conn = db.conn_for_test().await;

    let version: String = conn
        .prepare("SELECT value FROM settings WHERE key = 'version'")
        .expect("prepare")
        .query_row([], |row| row.get(0))
        .expect("version seeded");
    assert_eq!(version, "1");

    let install_id: String = conn
        .prepare("SELECT value FROM settings WHERE key = 'install_id'")
        .expect("prepare")
        .query_row([], |row| row.get(0))
        .expect("install_id seeded");
    // 8 random bytes, hex encoded.
    assert_eq!(install_id.len(), 16);
    assert!(install_id.chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn site_existence() {
    let db = store_with_site().await;
    assert!(db.site_exists("demo").await.expect("query"));
    assert!(!db.site_exists("missing").await.expect("query"));
}

#[tokio::test]
async fn events_round_trip_with_range_bounds() {
    let db = store_with_site().await;
    db.insert_events(&[
        event("demo", "e1", EventType::PageView, "v1", "s1", ts(9, 59)),
        event("demo", "e2", EventType::PageView, "v1", "s1", ts(10, 0)),
        event("demo", "e3", EventType::ActionClick, "v2", "s2", ts(11, 30)),
        event("demo", "e4", EventType::PageView, "v2", "s2", ts(12, 0)),
        event("demo", "e5", EventType::PageView, "v3", "s3", ts(12, 1)),
    ])
    .await
    .expect("insert");

    // Inclusive on both ends: e2 and e4 are in, e1 and e5 are out.
    let rows = db
        .events_in_range("demo", &range(10, 12))
        .await
        .expect("read");
    let ids: Vec<&str> = rows.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(rows.len(), 3);
    assert!(ids.contains(&"e2") && ids.contains(&"e3") && ids.contains(&"e4"));
}

#[tokio::test]
async fn recent_events_newest_first_and_limited() {
    let db = store_with_site().await;
    let mut events = Vec::new();
    for i in 0..10u32 {
        events.push(event(
            "demo",
            &format!("e{i}"),
            EventType::PageView,
            "v",
            "s",
            ts(9, 0) + Duration::minutes(i as i64),
        ));
    }
    db.insert_events(&events).await.expect("insert");

    let rows = db
        .recent_events("demo", &range(0, 23), 4)
        .await
        .expect("read");
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0].id, "e9");
    assert!(rows.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
}

#[tokio::test]
async fn event_fields_survive_storage() {
    let db = store_with_site().await;
    let mut e = event("demo", "rich", EventType::ActionClick, "v1", "s1", ts(10, 30));
    e.action_index = Some(3);
    e.action_type = Some("link".to_string());
    e.referrer = Some("https://example.com".to_string());
    e.device_type = Some("mobile".to_string());
    e.browser = Some("Firefox".to_string());
    e.country = Some("DE".to_string());
    db.insert_events(std::slice::from_ref(&e)).await.expect("insert");

    let rows = db
        .events_in_range("demo", &range(10, 11))
        .await
        .expect("read");
    assert_eq!(rows.len(), 1);
    let stored = &rows[0];
    assert_eq!(stored.event_type, EventType::ActionClick);
    assert_eq!(stored.action_index, Some(3));
    assert_eq!(stored.action_type.as_deref(), Some("link"));
    assert_eq!(stored.referrer.as_deref(), Some("https://example.com"));
    assert_eq!(stored.device_type.as_deref(), Some("mobile"));
    assert_eq!(stored.browser.as_deref(), Some("Firefox"));
    assert_eq!(stored.country.as_deref(), Some("DE"));
    assert_eq!(stored.timestamp, ts(10, 30));
}

#[tokio::test]
async fn sessions_batch_lookup_filters_by_id_and_site() {
    let db = store_with_site().await;
    db.seed_site("other", "Other Page").await.expect("seed");
    db.insert_sessions(&[
        session("demo", "s1", 120, false, ts(9, 0)),
        session("demo", "s2", 10, true, ts(9, 30)),
        session("demo", "s3", 40, false, ts(10, 0)),
        session("other", "s1", 999, false, ts(9, 0)),
    ])
    .await
    .expect("insert");

    let ids = vec!["s1".to_string(), "s3".to_string(), "sX".to_string()];
    let rows = db.sessions_by_ids("demo", &ids).await.expect("read");
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|s| s.site_slug == "demo"));
    assert!(rows.iter().any(|s| s.id == "s1" && s.duration_seconds == 120));

    let empty = db.sessions_by_ids("demo", &[]).await.expect("read");
    assert!(empty.is_empty());
}

#[tokio::test]
async fn recent_sessions_ordered_and_capped() {
    let db = store_with_site().await;
    let mut sessions = Vec::new();
    for i in 0..5u32 {
        sessions.push(session(
            "demo",
            &format!("s{i}"),
            60,
            false,
            ts(8, 0) + Duration::minutes(i as i64 * 10),
        ));
    }
    db.insert_sessions(&sessions).await.expect("insert");

    let rows = db
        .recent_sessions("demo", &range(0, 23), 3)
        .await
        .expect("read");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].id, "s4");
    assert!(rows.windows(2).all(|w| w[0].started_at >= w[1].started_at));
}

#[tokio::test]
async fn rollup_rows_read_newest_first() {
    let db = store_with_site().await;
    db.insert_rollups(&[
        linkboard_core::model::HourlyRollup {
            site_slug: "demo".to_string(),
            hour: ts(9, 0),
            page_views: 5,
            unique_visitors: 4,
            sessions: 2,
            total_session_duration: 300,
            bounces: 1,
        },
        linkboard_core::model::HourlyRollup {
            site_slug: "demo".to_string(),
            hour: ts(10, 0),
            page_views: 3,
            unique_visitors: 3,
            sessions: 1,
            total_session_duration: 60,
            bounces: 0,
        },
    ])
    .await
    .expect("insert");

    let rows = db.hourly_rollups("demo", &range(0, 23)).await.expect("read");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].hour, ts(10, 0));
    assert_eq!(rows[1].page_views, 5);
    assert_eq!(rows[1].bounces, 1);
}

#[tokio::test]
async fn presence_window_filter() {
    let db = store_with_site().await;
    let now = ts(12, 0);
    db.upsert_presence("demo", "fresh", now - Duration::seconds(30))
        .await
        .expect("upsert");
    db.upsert_presence("demo", "stale", now - Duration::minutes(10))
        .await
        .expect("upsert");

    let cutoff = now - Duration::minutes(5);
    let rows = db.presence_since("demo", cutoff).await.expect("read");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].visitor_id, "fresh");
}

#[tokio::test]
async fn presence_upsert_keeps_one_row_per_visitor() {
    let db = store_with_site().await;
    let now = ts(12, 0);
    db.upsert_presence("demo", "v1", now - Duration::minutes(1))
        .await
        .expect("upsert");
    db.upsert_presence("demo", "v1", now).await.expect("upsert");

    let rows = db
        .presence_since("demo", now - Duration::minutes(5))
        .await
        .expect("read");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].last_seen, now);
}
