//! ==============================================================================
//! main.rs - esp32 monitor entry point
//! ==============================================================================
//!
//! purpose:
//!     wires the polling controller to its collaborators and serves the
//!     control api the ui talks to.
//!
//! responsibilities:
//!     - load configuration (first cli argument, or config/monitor.toml)
//!     - install the tracing subscriber
//!     - open the key-value store and pick the notification sink
//!     - optionally connect to the remembered device on startup
//!     - serve the api until ctrl-c, then tear the session down
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                         main.rs                              │
//!     │   ┌──────────────┐          ┌──────────────────────────────┐ │
//!     │   │  api server  │────────► │     PollingController        │ │
//!     │   │ (port 3000)  │          │  poll timer (5s) ─► device   │ │
//!     │   └──────────────┘          │  history ─► store (files)    │ │
//!     │                             │  alerts  ─► notification sink│ │
//!     │                             │  relay   ─► collector        │ │
//!     │                             └──────────────────────────────┘ │
//!     └──────────────────────────────────────────────────────────────┘
//!
//! ==============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use esp32_monitor::config::MonitorConfig;
use esp32_monitor::storage::FileStore;
use esp32_monitor::{api, notify, PollingController};

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  ESP32 Monitor");
    println!("  poll · store · alert · relay");
    println!("===========================================================");

    // step 1: load configuration
    let config = MonitorConfig::load_or_default(std::env::args().nth(1).map(PathBuf::from));
    config.print_summary();

    // step 2: logging
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!(
            "{},hyper=warn,reqwest=warn",
            config.logging.level
        ))
        .context("invalid logging.level")?,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_target(false),
        )
        .init();

    // step 3: collaborators
    let store = FileStore::open(&config.storage.dir).with_context(|| {
        format!("failed to open storage at {}", config.storage.dir.display())
    })?;
    let sink = notify::sink_from_config(&config.notifications);
    let controller = PollingController::new(&config, Arc::new(store), sink);
    info!("{} readings in history", controller.history().await.len());

    // step 4: optional auto-connect
    if config.polling.auto_connect {
        let address = controller.remembered_address().await;
        match controller.connect(&address).await {
            Ok(_) => info!("auto-connected to {address}"),
            Err(e) => warn!("auto-connect to {address} failed: {e}"),
        }
    }

    // step 5: serve until ctrl-c; the timer stops before the server drains
    let shutdown = api::shutdown_on(controller.clone(), tokio::signal::ctrl_c());
    let result = api::serve(&config.server.bind, controller.clone(), shutdown).await;

    // a failed bind never reaches the shutdown future
    controller.shutdown();
    result
}
