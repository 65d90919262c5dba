use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::Response,
};
use chrono::Utc;
use serde::Deserialize;

use linkboard_core::model::Event;

use crate::routes::metrics::resolve_range;
use crate::{error::AppError, state::AppState};

/// Maximum date range allowed for export (90 days).
const MAX_EXPORT_DAYS: i64 = 90;

/// Maximum number of rows in a single export.
const MAX_EXPORT_ROWS: u32 = 10_000;

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// `GET /api/sites/{slug}/export` — download raw events as CSV.
///
/// Range defaults to the trailing 30 days and is capped at 90; rows are
/// capped at 10 000, newest first. Response: `Content-Type: text/csv` with
/// `Content-Disposition: attachment`.
pub async fn export_events(
    State(state): State<Arc<AppState>>,
    Path(site_slug): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, AppError> {
    if !state
        .is_known_site(&site_slug)
        .await
        .map_err(AppError::Internal)?
    {
        return Err(AppError::NotFound("Site not found".to_string()));
    }

    let now = Utc::now();
    let range = resolve_range(query.start_date.as_deref(), query.end_date.as_deref(), now)?;
    let range_days = (range.end - range.start).num_days() + 1;
    if range_days > MAX_EXPORT_DAYS {
        return Err(AppError::BadRequest(format!(
            "date range too large: {range_days} days (max {MAX_EXPORT_DAYS})"
        )));
    }

    let rows = state
        .service
        .store()
        .recent_events(&site_slug, &range, MAX_EXPORT_ROWS)
        .await
        .map_err(AppError::Internal)?;

    let csv_bytes =
        Bytes::from(build_csv(&rows).map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?);
    let filename = format!(
        "analytics-{}-{}.csv",
        site_slug,
        now.format("%Y-%m-%d")
    );
    build_csv_response(&filename, csv_bytes)
}

/// Sanitize a CSV field value against formula injection.
///
/// Spreadsheet apps (Excel, Google Sheets, LibreOffice) interpret values that
/// begin with `=`, `+`, `-`, `@`, TAB, or CR as formula expressions. Prepending
/// a single quote (`'`) causes them to treat the value as a literal string.
fn sanitize_csv_field(val: &str) -> std::borrow::Cow<'_, str> {
    if val.starts_with(['=', '+', '-', '@', '\t', '\r']) {
        std::borrow::Cow::Owned(format!("'{val}"))
    } else {
        std::borrow::Cow::Borrowed(val)
    }
}

fn build_csv(rows: &[Event]) -> anyhow::Result<Vec<u8>> {
    let mut wtr = csv::Writer::from_writer(Vec::with_capacity(rows.len().saturating_mul(128)));

    wtr.write_record([
        "timestamp",
        "event_type",
        "visitor_id",
        "session_id",
        "action_index",
        "action_type",
        "referrer",
        "device_type",
        "browser",
        "country",
    ])
    .map_err(|e| anyhow::anyhow!("csv write_record failed: {e}"))?;

    for row in rows {
        let timestamp = row.timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
        let action_index = row.action_index.map(|i| i.to_string()).unwrap_or_default();
        let visitor_id = sanitize_csv_field(&row.visitor_id);
        let session_id = sanitize_csv_field(&row.session_id);
        let action_type = sanitize_csv_field(row.action_type.as_deref().unwrap_or(""));
        let referrer = sanitize_csv_field(row.referrer.as_deref().unwrap_or(""));
        let device_type = sanitize_csv_field(row.device_type.as_deref().unwrap_or(""));
        let browser = sanitize_csv_field(row.browser.as_deref().unwrap_or(""));
        let country = sanitize_csv_field(row.country.as_deref().unwrap_or(""));

        wtr.write_record([
            timestamp.as_str(),
            row.event_type.as_str(),
            visitor_id.as_ref(),
            session_id.as_ref(),
            action_index.as_str(),
            action_type.as_ref(),
            referrer.as_ref(),
            device_type.as_ref(),
            browser.as_ref(),
            country.as_ref(),
        ])
        .map_err(|e| anyhow::anyhow!("csv write_record failed: {e}"))?;
    }

    wtr.into_inner()
        .map_err(|e| anyhow::anyhow!("csv flush failed: {e}"))
}

fn build_csv_response(filename: &str, csv_bytes: Bytes) -> Result<Response, AppError> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(axum::body::Body::from(csv_bytes))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("response build failed: {e}")))
}
