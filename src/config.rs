//! ==============================================================================
//! config.rs - runtime configuration loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `dashboard.toml`.
//!     loads configuration from file or falls back to defaults.
//!     everything here is startup configuration; nothing is changed at runtime.
//!
//! structure:
//!     - SourceConfig: which push source to use and where it lives.
//!     - AlertConfig: danger threshold, chart window size, staleness limit.
//!     - ServerConfig: where the dashboard listens.
//!     - LoggingConfig: log level and per-reading output.
//!
//! ==============================================================================

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;
use tracing::{info, warn};

use crate::series::DEFAULT_MAX_POINTS;
use crate::session::{SessionConfig, DEFAULT_DANGER_THRESHOLD, DEFAULT_DATA_PATH};
use crate::source::{PushSource, RealtimeDbSource, SimulatedSource, SocketSource};

/// overrides the config search path
pub const CONFIG_ENV: &str = "GAMMA_DASH_CONFIG";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DashboardConfig {
    pub source: SourceConfig,
    pub alert: AlertConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    /// file this config came from, if any
    #[serde(skip)]
    pub loaded_from: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Simulated,
    RealtimeDb,
    Socket,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub data_path: String,
    /// e.g. "https://my-project-default-rtdb.europe-west1.firebasedatabase.app"
    pub database_url: Option<String>,
    /// e.g. "192.168.1.40:5000"
    pub socket_addr: Option<String>,
    pub interval_ms: u64,
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AlertConfig {
    pub danger_threshold_usv_h: f64,
    pub max_points: usize,
    pub stale_after_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_readings: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Simulated,
            data_path: DEFAULT_DATA_PATH.to_string(),
            database_url: None,
            socket_addr: None,
            interval_ms: 2000,
            reconnect_delay_ms: 2000,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            danger_threshold_usv_h: DEFAULT_DANGER_THRESHOLD,
            max_points: DEFAULT_MAX_POINTS,
            stale_after_seconds: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3000".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_readings: true }
    }
}

impl DashboardConfig {
    /// Parse configuration from a toml string
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: DashboardConfig = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;
        let mut config = Self::from_toml(&content)?;
        config.loaded_from = Some(path.as_ref().to_path_buf());
        Ok(config)
    }

    /// Load with default fallback
    ///
    /// defaults are used only when no config file exists. a file that is
    /// present but unreadable or invalid is an error, never silently replaced.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let mut paths = Vec::new();
        if let Ok(p) = std::env::var(CONFIG_ENV) {
            paths.push(PathBuf::from(p));
        }
        paths.push(PathBuf::from("config").join("dashboard.toml"));
        paths.push(PathBuf::from("..").join("config").join("dashboard.toml"));
        Self::load_first(&paths)
    }

    /// load the first of `paths` that exists, or defaults if none do
    pub fn load_first(paths: &[PathBuf]) -> anyhow::Result<Self> {
        match paths.iter().find(|p| p.exists()) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let threshold = self.alert.danger_threshold_usv_h;
        if !threshold.is_finite() || threshold < 0.0 {
            bail!("alert.danger_threshold_usv_h must be a finite non-negative number, got {}", threshold);
        }
        if self.alert.max_points == 0 {
            bail!("alert.max_points must be at least 1");
        }
        match self.source.kind {
            SourceKind::RealtimeDb if self.source.database_url.is_none() => {
                bail!("source.database_url is required for kind = \"realtime_db\"")
            }
            SourceKind::Socket if self.source.socket_addr.is_none() => {
                bail!("source.socket_addr is required for kind = \"socket\"")
            }
            SourceKind::Simulated if self.source.interval_ms == 0 => {
                bail!("source.interval_ms must be greater than 0")
            }
            _ => Ok(()),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            data_path: self.source.data_path.clone(),
            danger_threshold: self.alert.danger_threshold_usv_h,
            max_points: self.alert.max_points,
            stale_after: self.alert.stale_after_seconds.map(Duration::from_secs),
            show_readings: self.logging.show_readings,
        }
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        match &self.loaded_from {
            Some(path) => info!("[CONFIG] Loaded from {}", path.display()),
            None => warn!("[CONFIG] No config file found - using defaults"),
        }
        info!("[CONFIG] Source: {:?} (path '{}')", self.source.kind, self.source.data_path);
        info!(
            "[CONFIG] Danger threshold: {} µSv/h | Window: {} samples",
            self.alert.danger_threshold_usv_h, self.alert.max_points
        );
        if let Some(secs) = self.alert.stale_after_seconds {
            info!("[CONFIG] Readings go stale after {}s", secs);
        }
        info!("[CONFIG] Listening on {} | Log level: {}", self.server.bind, self.logging.level);
    }
}

impl SourceConfig {
    /// construct the configured push source client
    pub fn build(&self) -> anyhow::Result<Arc<dyn PushSource>> {
        let reconnect = Duration::from_millis(self.reconnect_delay_ms);
        let source: Arc<dyn PushSource> = match self.kind {
            SourceKind::Simulated => Arc::new(SimulatedSource::new(Duration::from_millis(self.interval_ms))),
            SourceKind::RealtimeDb => {
                let url = self.database_url.as_deref().context("source.database_url is not set")?;
                Arc::new(RealtimeDbSource::new(url, reconnect)?)
            }
            SourceKind::Socket => {
                let addr = self.socket_addr.as_deref().context("source.socket_addr is not set")?;
                Arc::new(SocketSource::new(addr, reconnect)?)
            }
        };
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = DashboardConfig::from_toml("").unwrap();
        assert_eq!(config.source.kind, SourceKind::Simulated);
        assert_eq!(config.alert.danger_threshold_usv_h, 2.0);
        assert_eq!(config.alert.max_points, 20);
        assert_eq!(config.server.bind, "0.0.0.0:3000");
        assert!(config.alert.stale_after_seconds.is_none());
    }

    #[test]
    fn parses_realtime_db_section() {
        let config = DashboardConfig::from_toml(
            r#"
            [source]
            kind = "realtime_db"
            data_path = "gamma/live"
            database_url = "https://example-default-rtdb.firebasedatabase.app"

            [alert]
            danger_threshold_usv_h = 1.5
            stale_after_seconds = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.source.kind, SourceKind::RealtimeDb);
        let session = config.session_config();
        assert_eq!(session.data_path, "gamma/live");
        assert_eq!(session.danger_threshold, 1.5);
        assert_eq!(session.stale_after, Some(Duration::from_secs(30)));
    }

    fn scratch_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("gamma-dash-{}-{}.toml", name, std::process::id()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn invalid_file_is_an_error_not_a_fallback() {
        let broken = scratch_file("broken", "[source]\nkind = \"socket\"\n");
        let good = scratch_file("good", "[alert]\nmax_points = 5\n");

        let err = DashboardConfig::load_first(&[broken.clone(), good.clone()]).unwrap_err();
        assert!(format!("{:#}", err).contains("socket_addr"));

        let config = DashboardConfig::load_first(&[good.clone()]).unwrap();
        assert_eq!(config.alert.max_points, 5);
        assert_eq!(config.loaded_from.as_deref(), Some(good.as_path()));

        std::fs::remove_file(broken).ok();
        std::fs::remove_file(good).ok();
    }

    #[test]
    fn missing_files_give_defaults() {
        let nowhere = std::env::temp_dir().join("gamma-dash-does-not-exist").join("dashboard.toml");
        let config = DashboardConfig::load_first(&[nowhere]).unwrap();
        assert_eq!(config.source.kind, SourceKind::Simulated);
        assert!(config.loaded_from.is_none());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(DashboardConfig::from_toml("[alert]\nmax_points = 0").is_err());
        assert!(DashboardConfig::from_toml("[alert]\ndanger_threshold_usv_h = -1.0").is_err());
        assert!(DashboardConfig::from_toml("[source]\nkind = \"socket\"").is_err());
        assert!(DashboardConfig::from_toml("[source]\nkind = \"carrier_pigeon\"").is_err());
    }
}
