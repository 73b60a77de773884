//! ==============================================================================
//! domain.rs - readings, chart samples and the session snapshot
//! ==============================================================================
//!
//! purpose:
//!     plain data types shared between the session controller and the
//!     presentation layer. everything here is immutable once built and
//!     serializes straight to json for the /api endpoints.
//!
//! relationships:
//!     - built by: validator.rs (Reading), session.rs (Sample, SessionSnapshot)
//!     - read by: server.rs (json api + html page)
//!
//! ==============================================================================

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

/// Upper end of the dose gauge shown under the alert banner (µSv/h).
pub const GAUGE_FULL_SCALE_USV_H: f64 = 5.0;

/// one sensor observation, already normalized
///
/// every field is finite and non-negative. a new Reading replaces the
/// previous one wholesale; there are no partial updates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Reading {
    /// counts per second
    #[serde(rename = "CPS")]
    pub cps: f64,
    /// counts per minute
    #[serde(rename = "CPM")]
    pub cpm: f64,
    /// dose rate in µSv/h
    #[serde(rename = "Dose_uSv")]
    pub dose_usv_h: f64,
    /// activity in curie
    #[serde(rename = "Activity_Ci")]
    pub activity_ci: f64,
    /// activity in becquerel
    #[serde(rename = "Activity_Bq")]
    pub activity_bq: f64,
}

impl Reading {
    /// strict greater-than: a dose exactly at the threshold is still safe
    pub fn exceeds(&self, danger_threshold: f64) -> bool {
        self.dose_usv_h > danger_threshold
    }
}

/// one point of the rolling dose-rate chart
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Sample {
    /// dose rate in µSv/h
    pub dose_usv_h: f64,
    /// wall-clock capture time
    pub captured_at: DateTime<Utc>,
    /// local time of day, e.g. "14:03:27"
    pub label: String,
}

impl Sample {
    pub fn new(dose_usv_h: f64, captured_at: DateTime<Utc>) -> Self {
        let label = captured_at
            .with_timezone(&Local)
            .format("%H:%M:%S")
            .to_string();
        Self { dose_usv_h, captured_at, label }
    }
}

/// connection liveness as reported by the push source
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn caption(self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Disconnected => "Disconnected",
        }
    }
}

/// alert level derived from the current reading
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Safe,
    Danger,
}

impl AlertLevel {
    pub fn from_flag(alert: bool) -> Self {
        if alert { AlertLevel::Danger } else { AlertLevel::Safe }
    }

    /// short status badge
    pub fn status_label(self) -> &'static str {
        match self {
            AlertLevel::Safe => "SAFE",
            AlertLevel::Danger => "DANGER",
        }
    }

    /// banner headline
    pub fn headline(self) -> &'static str {
        match self {
            AlertLevel::Safe => "Safe Radiation Levels",
            AlertLevel::Danger => "HIGH RADIATION ALERT",
        }
    }

    /// per-card badge for the dose rate field
    pub fn field_badge(self) -> &'static str {
        match self {
            AlertLevel::Safe => "NORMAL",
            AlertLevel::Danger => "HIGH",
        }
    }
}

/// how far the dose gauge is filled, 0-100
pub fn gauge_percent(dose_usv_h: f64) -> f64 {
    (dose_usv_h / GAUGE_FULL_SCALE_USV_H * 100.0).clamp(0.0, 100.0)
}

/// read-only view handed to the presentation layer
///
/// built under a single read guard so `alert` always matches `reading`.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    pub reading: Reading,
    pub series: Vec<Sample>,
    pub status: ConnectionStatus,
    pub last_update: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub alert: bool,
    pub status_label: String,
    pub headline: String,
    pub gauge_percent: f64,
    pub danger_threshold: f64,
    /// true when a staleness limit is configured and the last update is older
    pub stale: bool,
}
