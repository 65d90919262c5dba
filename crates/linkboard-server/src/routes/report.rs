use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::Response,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use linkboard_core::reporting::{self, ChartMetric};

use crate::routes::metrics::{no_store_json, resolve_range};
use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub metric: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// `GET /api/sites/{slug}/metrics/report` — chart-ready series for one metric.
///
/// Performs the same parallel per-metric fetches a dashboard load does, then
/// reshapes them: canonical series (reconstructed from the event feed when no
/// rollup series exists), trailing moving average, midpoint trend, and
/// derived totals. Everything downstream of the fetches is pure.
pub async fn chart_report(
    State(state): State<Arc<AppState>>,
    Path(site_slug): Path<String>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, AppError> {
    if !state
        .is_known_site(&site_slug)
        .await
        .map_err(AppError::Internal)?
    {
        return Err(AppError::NotFound("Site not found".to_string()));
    }

    let metric = ChartMetric::parse(query.metric.as_deref())
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let now = Utc::now();
    let range = resolve_range(query.start_date.as_deref(), query.end_date.as_deref(), now)?;

    let (overview, events, actions) = tokio::try_join!(
        state.service.overview(&site_slug, &range),
        state.service.events(&site_slug, &range),
        state.service.actions(&site_slug, &range),
    )
    .map_err(AppError::Internal)?;

    // The reporting layer consumes the serialized payload shapes, exactly as
    // a dashboard client would.
    let overview = serde_json::to_value(&overview).map_err(anyhow::Error::from)?;
    let events: Vec<Value> = events
        .events
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<_, _>>()
        .map_err(anyhow::Error::from)?;
    let actions = serde_json::to_value(&actions).map_err(anyhow::Error::from)?;

    let report = reporting::build_report(&overview, &events, Some(&actions), metric);
    Ok(no_store_json(report))
}
