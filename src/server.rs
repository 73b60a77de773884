//! ==============================================================================
//! server.rs - read-only dashboard over http
//! ==============================================================================
//!
//! routes:
//!     GET /            server-rendered status page (auto-refreshes)
//!     GET /api/state   full session snapshot as json
//!     GET /api/series  rolling dose-rate window as json, oldest first
//!
//! there is no write path: handlers only ever take snapshots.
//!
//! ==============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    response::{Html, Json},
    routing::get,
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::domain::{AlertLevel, Sample, SessionSnapshot};
use crate::session::LiveSession;

pub fn router(session: Arc<LiveSession>) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/api/state", get(state_handler))
        .route("/api/series", get(series_handler))
        .layer(CorsLayer::permissive())
        .with_state(session)
}

pub async fn run_server(session: Arc<LiveSession>, bind: &str, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    info!("[HTTP] Dashboard live at http://{}", bind);
    axum::serve(listener, router(session))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn dashboard_handler(State(session): State<Arc<LiveSession>>) -> Html<String> {
    Html(render_dashboard(&session.snapshot().await))
}

/// json api endpoint for programmatic access
async fn state_handler(State(session): State<Arc<LiveSession>>) -> Json<SessionSnapshot> {
    Json(session.snapshot().await)
}

async fn series_handler(State(session): State<Arc<LiveSession>>) -> Json<Vec<Sample>> {
    Json(session.series().await)
}

/// small readings below 1 keep six decimals, like the detector display
pub fn format_value(value: f64) -> String {
    if value < 1.0 {
        format!("{:.6}", value)
    } else {
        format!("{}", value)
    }
}

pub fn render_dashboard(snap: &SessionSnapshot) -> String {
    let level = AlertLevel::from_flag(snap.alert);
    let accent = if snap.alert { "#ff6b6b" } else { "#51cf66" };
    let last = snap
        .last_update
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());

    let error = snap
        .error
        .as_deref()
        .map(|err| format!("<p style=\"color: #ffa94d;\">{}</p>\n", html_escape(err)))
        .unwrap_or_default();

    let r = &snap.reading;
    let rows: String = [
        ("Counts Per Second", r.cps, "CPS", "NORMAL"),
        ("Counts Per Minute", r.cpm, "CPM", "NORMAL"),
        ("Dose Rate", r.dose_usv_h, "µSv/h", level.field_badge()),
        ("Activity (Curie)", r.activity_ci, "Ci", "NORMAL"),
        ("Activity (Becquerel)", r.activity_bq, "Bq", "NORMAL"),
    ]
    .iter()
    .map(|(title, value, unit, badge)| {
        format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            title,
            format_value(*value),
            unit,
            badge
        )
    })
    .collect();

    let chart = if snap.series.is_empty() {
        "<p>Waiting for data...</p>\n".to_string()
    } else {
        let items: String = snap
            .series
            .iter()
            .map(|sample| format!("<li>{} &mdash; {} µSv/h</li>\n", html_escape(&sample.label), sample.dose_usv_h))
            .collect();
        format!("<ol>\n{}</ol>\n", items)
    };

    format!(
        r#"<!doctype html>
<html>
<head><title>Gamma Rays Detection Dashboard</title><meta http-equiv="refresh" content="2"></head>
<body style="font-family: system-ui; padding: 2rem; background: #1a1a2e; color: #eee;">
<h1>Gamma Rays Detection Dashboard</h1>
<p>{status}{stale} &middot; Last update: {last} &middot; <strong style="color: {accent};">{label}</strong></p>
{error}<h2 style="color: {accent};">{headline}</h2>
<p>Current: {dose} µSv/h &middot; Danger threshold: {threshold} µSv/h &middot; Gauge: {gauge:.0}%</p>
<table>
{rows}</table>
<h2>Radiation Levels Over Time (Last {count} Readings)</h2>
{chart}</body>
</html>
"#,
        status = snap.status.caption(),
        stale = if snap.stale { " (stale)" } else { "" },
        last = last,
        accent = accent,
        label = level.status_label(),
        error = error,
        headline = level.headline(),
        dose = snap.reading.dose_usv_h,
        threshold = snap.danger_threshold,
        gauge = snap.gauge_percent,
        rows = rows,
        count = snap.series.len(),
        chart = chart,
    )
}

/// escape html special characters to prevent xss
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
