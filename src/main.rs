//! ==============================================================================
//! main.rs - gamma dashboard entry point
//! ==============================================================================
//!
//! purpose:
//!     wires the configured push source into a live session and serves the
//!     read-only dashboard until ctrl-c.
//!
//! startup:
//!     1. load config/dashboard.toml (defaults only if no file exists)
//!     2. set up tracing (RUST_LOG wins over logging.level)
//!     3. build the push-source client and hand it to a LiveSession
//!     4. start the session, then the web server
//!     5. on ctrl-c: shut the session down (releases both subscriptions,
//!        freezes state), stop http
//!
//! ==============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use gamma_dash::config::DashboardConfig;
use gamma_dash::server;
use gamma_dash::session::LiveSession;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration
    // a config file that exists but is invalid stops startup here
    let config = DashboardConfig::load_or_default()?;

    // step 2: logging
    init_tracing(&config.logging.level);
    info!("===========================================================");
    info!("  Gamma Rays Detection Dashboard");
    info!("===========================================================");
    config.log_summary();

    // step 3: push source + session
    let source = config.source.build().context("failed to create push source")?;
    let session = Arc::new(LiveSession::new(source, config.session_config()));

    // step 4: start
    session.start().await.context("failed to start live session")?;

    let shutdown = CancellationToken::new();
    let web_session = session.clone();
    let web_shutdown = shutdown.clone();
    let bind = config.server.bind.clone();
    let web = tokio::spawn(async move {
        if let Err(e) = server::run_server(web_session, &bind, web_shutdown).await {
            error!("[HTTP] Web server error: {:#}", e);
        }
    });

    // step 5: wait for ctrl-c, then tear down
    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("[RUNTIME] Shutting down");
    session.shutdown().await;
    shutdown.cancel();
    web.await.ok();
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
