use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::BodyExt;
use tower::ServiceExt;

use linkboard_core::config::Config;
use linkboard_core::model::{Event, EventType};
use linkboard_duckdb::DuckDbStore;
use linkboard_server::app::build_app;
use linkboard_server::state::AppState;

fn config() -> Config {
    Config {
        port: 0,
        data_dir: "/tmp/linkboard-test".to_string(),
        duckdb_memory_limit: "1GB".to_string(),
        scheduler_tick_seconds: 60,
        cors_origins: vec![],
    }
}

async fn setup() -> (Arc<AppState>, axum::Router) {
    let db = DuckDbStore::open_in_memory().expect("in-memory DuckDB");
    db.seed_site("demo", "Demo Page").await.expect("seed site");
    let state = Arc::new(AppState::new(db, config()));
    let app = build_app(Arc::clone(&state));
    (state, app)
}

async fn get(app: &axum::Router, uri: &str) -> axum::http::Response<Body> {
    let request = Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    app.clone().oneshot(request).await.expect("request")
}

async fn body_string(response: axum::http::Response<Body>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

fn ts(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, hour, minute, 0).unwrap()
}

fn event(id: &str, referrer: Option<&str>, at: DateTime<Utc>) -> Event {
    Event {
        id: id.to_string(),
        site_slug: "demo".to_string(),
        event_type: EventType::PageView,
        visitor_id: "v1".to_string(),
        session_id: "s1".to_string(),
        action_index: None,
        action_type: None,
        referrer: referrer.map(str::to_string),
        device_type: Some("desktop".to_string()),
        browser: Some("Firefox".to_string()),
        country: Some("DE".to_string()),
        timestamp: at,
    }
}

const RANGE: &str = "start_date=2026-03-10T00:00:00Z&end_date=2026-03-10T23:59:00Z";

#[tokio::test]
async fn export_returns_csv_attachment_newest_first() {
    let (state, app) = setup().await;
    state
        .db
        .insert_events(&[
            event("e1", Some("https://a.example"), ts(9, 0)),
            event("e2", Some("https://b.example"), ts(10, 0)),
        ])
        .await
        .expect("insert");

    let response = get(&app, &format!("/api/sites/demo/export?{RANGE}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("text/csv; charset=utf-8")
    );
    let disposition = response
        .headers()
        .get("content-disposition")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_default();
    assert!(disposition.starts_with("attachment; filename=\"analytics-demo-"));

    let body = body_string(response).await;
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("timestamp,event_type,visitor_id"));
    // Newest first.
    assert!(lines[1].contains("https://b.example"));
    assert!(lines[2].contains("https://a.example"));
}

#[tokio::test]
async fn export_sanitizes_formula_injection() {
    let (state, app) = setup().await;
    state
        .db
        .insert_events(&[event("e1", Some("=HYPERLINK(\"https://evil\")"), ts(9, 0))])
        .await
        .expect("insert");

    let response = get(&app, &format!("/api/sites/demo/export?{RANGE}")).await;
    let body = body_string(response).await;
    assert!(body.contains("'=HYPERLINK"));
}

#[tokio::test]
async fn export_rejects_oversized_range() {
    let (_state, app) = setup().await;
    let response = get(
        &app,
        "/api/sites/demo/export?start_date=2025-11-01T00:00:00Z&end_date=2026-03-10T00:00:00Z",
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn export_unknown_site_is_not_found() {
    let (_state, app) = setup().await;
    let response = get(&app, "/api/sites/nope/export").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
