//! deployd - Entry Point
//!
//! Promotes CI-built artifacts from a hosted Git repository into a live
//! directory, with backups, rollback and drift detection.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use anyhow::Context;
use deployd::app::options::AppOptions;
use deployd::app::run::run;
use deployd::filesys::file::File;
use deployd::http::client::{CiClient, CiClientOptions};
use deployd::logs::{init_logging, LogOptions};
use deployd::storage::layout::StorageLayout;
use deployd::storage::settings::Settings;
use deployd::utils::version_info;
use secrecy::SecretString;

use tracing::{error, info};

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
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    let layout = cli_args
        .get("data-dir")
        .map(StorageLayout::new)
        .unwrap_or_default();
    let settings_file = cli_args
        .get("config")
        .map(|path| File::new(PathBuf::from(path)))
        .unwrap_or_else(|| layout.settings_file());

    // Retrieve the settings file
    let settings = match load_settings(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to load settings: {:#}", e);
            std::process::exit(1);
        }
    };

    // A data_dir in the settings applies unless overridden on the command line
    let layout = match (&settings.data_dir, cli_args.contains_key("data-dir")) {
        (Some(dir), false) => StorageLayout::new(dir),
        _ => layout,
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: settings.log_dir.as_ref().map(PathBuf::from),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    // Validate configuration and connectivity, then exit
    if cli_args.contains_key("check") {
        match check(&settings).await {
            Ok(()) => println!("Configuration OK"),
            Err(e) => {
                eprintln!("Check failed: {:#}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    info!(
        "Running deployd {} for {}/{} ({}) into {}",
        version.version,
        settings.github.owner,
        settings.github.repo,
        settings.github.branch,
        settings.deploy.target_dir
    );
    let options = AppOptions::new(settings, layout);
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run deployd: {e}");
        std::process::exit(1);
    }
}

async fn load_settings(file: &File) -> anyhow::Result<Settings> {
    let settings = file
        .read_json::<Settings>()
        .await
        .with_context(|| format!("reading {}", file.path().display()))?;
    settings.validate().context("invalid settings")?;
    Ok(settings)
}

async fn check(settings: &Settings) -> anyhow::Result<()> {
    let ci = CiClient::new(
        CiClientOptions::new(
            &settings.github.api_base_url,
            SecretString::from(settings.github.token.clone()),
            &settings.github.owner,
            &settings.github.repo,
        ),
        None,
    )?;
    let repo = ci
        .get_repository()
        .await
        .context("connecting to the CI service")?;
    println!("Repository: {}", repo.full_name);

    let workflows = ci
        .list_workflows(&settings.github.owner, &settings.github.repo)
        .await
        .context("listing workflows")?;
    let configured = &settings.github.workflow;
    let found = workflows
        .iter()
        .any(|w| w.path.ends_with(configured.as_str()) || w.id.to_string() == *configured);
    if !found {
        anyhow::bail!("workflow {} not found in repository", configured);
    }
    println!("Workflow: {}", configured);
    Ok(())
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to listen for SIGTERM");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to listen for SIGINT");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Ctrl+C received, shutting down...");
    }
}
