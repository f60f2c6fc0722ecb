//! Shipwright - Entry Point
//!
//! Drives source builds and deployments on a managed build provider and
//! ingests the provider's status notifications. `--relay` runs the stateless
//! push relay instead.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use anyhow::Context;
use shipwright::app::options::{AppOptions, RelayOptions};
use shipwright::app::run::{run, run_relay};
use shipwright::filesys::file::File;
use shipwright::logs::{init_logging, LogOptions};
use shipwright::storage::layout::StorageLayout;
use shipwright::storage::settings::Settings;
use shipwright::utils::version_info;

use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{version}"),
            Err(e) => eprintln!("Failed to render version info: {e}"),
        }
        return;
    }

    if let Err(e) = launch(&cli_args).await {
        error!("Failed to run shipwright: {e:#}");
        eprintln!("shipwright: {e:#}");
        std::process::exit(1);
    }
}

async fn launch(cli_args: &HashMap<String, String>) -> anyhow::Result<()> {
    // Retrieve the settings file
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(PathBuf::from(path)),
        None => StorageLayout::default().settings_file(),
    };
    let settings = Settings::load(&settings_file)
        .await
        .with_context(|| format!("reading {}", settings_file.path().display()))?;

    let layout = match &settings.storage.base_dir {
        Some(base_dir) => StorageLayout::new(base_dir.clone()),
        None => StorageLayout::default(),
    };

    // Initialize logging
    let log_dir = if settings.log_to_file {
        let dir = layout.logs_dir();
        dir.create().await.context("creating the logs directory")?;
        Some(dir.path().to_path_buf())
    } else {
        None
    };
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let version = version_info();
    if cli_args.contains_key("relay") {
        let options = RelayOptions::from_settings(&settings);
        info!(
            "Running shipwright {} relay on {}:{}",
            version.version, options.server.host, options.server.port
        );
        run_relay(options, await_shutdown_signal())
            .await
            .context("event relay")?;
    } else {
        let options = AppOptions::from_settings(&settings, layout).context("invalid settings")?;
        info!(
            "Running shipwright {} on {}:{}",
            version.version, options.server.host, options.server.port
        );
        run(options, await_shutdown_signal())
            .await
            .context("orchestration service")?;
    }

    Ok(())
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Unable to install signal handlers: {e}; waiting on Ctrl+C only");
                    wait_for_ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl+C received, shutting down..."),
        Err(e) => error!("Failed to listen for Ctrl+C: {e}"),
    }
}
