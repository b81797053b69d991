mod bridge;
mod catalog;
mod catalog_view;
mod config;
mod downloader;
mod error;
mod execute;
mod logging;
mod models;
mod orchestrator;
mod state;
mod tui;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::{
    bridge::HostBridge,
    catalog::CatalogClient,
    config::AppConfig,
    downloader::Downloader,
    execute::SystemPlatform,
    orchestrator::Orchestrator,
    state::AppState,
    tui::{run_tui, Session},
};

#[tokio::main]
async fn main() -> Result<()> {
    let (config, config_problem) = AppConfig::load();

    let log_file = config.log_file();
    if let Err(err) = logging::init(&log_file) {
        eprintln!("logging disabled: {err}");
    }
    info!(
        "appdock v{} starting, log file {}",
        env!("CARGO_PKG_VERSION"),
        log_file.display()
    );
    if let Some(problem) = config_problem {
        warn!("{problem}");
    }

    let client = CatalogClient::new(config.request_timeout()).context("building catalog client")?;
    let downloader = Downloader::new(config.download_dir()).context("building downloader")?;
    info!("downloads go to {}", downloader.dir().display());
    let platform = SystemPlatform::new(config.run_installer_elevated);
    let orchestrator = Orchestrator::new(config.silent_flags());

    let state = AppState::new(config, client);
    println!("Loading catalog from {}...", state.catalog_config().selected());
    state.refresh().await;

    let (bridge, events, host_task) = HostBridge::spawn(downloader, platform);
    let mut session = Session {
        bridge,
        events,
        orchestrator,
    };

    let outcome = run_tui(&state, &mut session);

    if let Err(err) = session.bridge.shutdown().await {
        warn!("host bridge shutdown: {err}");
    }
    if let Err(err) = host_task.await {
        warn!("host task ended abnormally: {err}");
    }
    info!("appdock stopped");
    outcome
}
