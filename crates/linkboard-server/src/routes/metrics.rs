use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use linkboard_core::model::DateRange;
use linkboard_core::service::MetricKind;

use crate::{error::AppError, state::AppState};

/// Range applied when the caller omits one: the trailing 30 days.
pub const DEFAULT_RANGE_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    pub metric: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

fn parse_date(raw: &str, field: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| AppError::BadRequest(format!("{field} must be an RFC 3339 timestamp")))
}

/// Resolve the requested range, defaulting each missing end to the trailing
/// 30-day window around `now`. `start > end` is rejected before any store
/// access.
pub(crate) fn resolve_range(
    start_date: Option<&str>,
    end_date: Option<&str>,
    now: DateTime<Utc>,
) -> Result<DateRange, AppError> {
    let default = DateRange::trailing_days(now, DEFAULT_RANGE_DAYS);
    let start = match start_date {
        Some(raw) => parse_date(raw, "start_date")?,
        None => default.start,
    };
    let end = match end_date {
        Some(raw) => parse_date(raw, "end_date")?,
        None => default.end,
    };
    DateRange::new(start, end).map_err(|e| AppError::BadRequest(e.to_string()))
}

/// Serialize a metrics payload with the no-store directive attached.
/// Dashboards must always see fresh numbers; nothing on this surface is
/// cacheable.
pub(crate) fn no_store_json<T: serde::Serialize>(value: T) -> Response {
    let mut response = Json(value).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store, max-age=0"),
    );
    response
}

/// `GET /api/sites/{slug}/metrics` — the per-metric query surface.
///
/// Ownership is enforced upstream; by the time a request reaches this
/// handler the caller is assumed to be allowed to read the site.
pub async fn query_metrics(
    State(state): State<Arc<AppState>>,
    Path(site_slug): Path<String>,
    Query(query): Query<MetricsQuery>,
) -> Result<Response, AppError> {
    if !state
        .is_known_site(&site_slug)
        .await
        .map_err(AppError::Internal)?
    {
        return Err(AppError::NotFound("Site not found".to_string()));
    }

    let metric = MetricKind::parse(query.metric.as_deref())
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let now = Utc::now();

    // Realtime ignores the range: the presence window is anchored to now.
    if metric == MetricKind::Realtime {
        let result = state
            .service
            .realtime(&site_slug, now)
            .await
            .map_err(AppError::Internal)?;
        return Ok(no_store_json(result));
    }

    let range = resolve_range(query.start_date.as_deref(), query.end_date.as_deref(), now)?;
    let service = &state.service;
    let response = match metric {
        MetricKind::Overview => {
            no_store_json(service.overview(&site_slug, &range).await.map_err(AppError::Internal)?)
        }
        MetricKind::Actions => {
            no_store_json(service.actions(&site_slug, &range).await.map_err(AppError::Internal)?)
        }
        MetricKind::Referrers => no_store_json(
            service
                .referrers(&site_slug, &range)
                .await
                .map_err(AppError::Internal)?,
        ),
        MetricKind::Devices => {
            no_store_json(service.devices(&site_slug, &range).await.map_err(AppError::Internal)?)
        }
        MetricKind::Geography => no_store_json(
            service
                .geography(&site_slug, &range)
                .await
                .map_err(AppError::Internal)?,
        ),
        MetricKind::Events => {
            no_store_json(service.events(&site_slug, &range).await.map_err(AppError::Internal)?)
        }
        MetricKind::All => no_store_json(
            service
                .all(&site_slug, &range, now)
                .await
                .map_err(AppError::Internal)?,
        ),
        MetricKind::Realtime => unreachable!(),
    };
    Ok(response)
}
