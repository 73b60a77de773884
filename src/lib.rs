//! ==============================================================================
//! gamma-dash - live gamma radiation dashboard core
//! ==============================================================================
//!
//! data flow:
//!
//! ```text
//!     push source ──> LiveSession ──> validator / series buffer
//!                          │
//!                          └──> SessionSnapshot ──> http dashboard (read-only)
//! ```
//!
//! modules:
//!     - domain.rs    : Reading, Sample, status and alert types
//!     - validator.rs : weakly-typed payload -> Reading, never fails
//!     - series.rs    : bounded rolling window of dose-rate samples
//!     - session.rs   : the stateful controller and its pump task
//!     - source/      : push-source clients (simulated, realtime db, socket)
//!     - config.rs    : dashboard.toml schema and loader
//!     - server.rs    : axum routes for the dashboard and json api
//!
//! ==============================================================================

pub mod config;
pub mod domain;
pub mod error;
pub mod series;
pub mod server;
pub mod session;
pub mod source;
pub mod validator;

pub use domain::{AlertLevel, ConnectionStatus, Reading, Sample, SessionSnapshot};
pub use error::{SessionError, SourceError};
pub use series::SeriesBuffer;
pub use session::{LiveSession, SessionConfig, SessionState};
pub use source::{ConnectivityEvent, DataEvent, PushSource, Subscription};
pub use validator::validate;
