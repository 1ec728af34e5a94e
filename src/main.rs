mod api;
mod config;
mod connection;
mod content_source;
mod error;
mod media_resolver;
mod models;
mod mpv_client;
mod playback_cycle;
mod player;
mod preloader;
mod runtime;
mod schedule;
mod scheduler;
mod surface;
#[cfg(test)]
mod testing;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::{HttpSignageApi, SignageApi};
use crate::config::Config;
use crate::connection::ConnectionMonitor;
use crate::content_source::{ContentSource, Resolution};
use crate::models::DisplaySettings;
use crate::mpv_client::MpvSurface;
use crate::preloader::Preloader;
use crate::runtime::PlayerRuntime;
use crate::scheduler::PollingScheduler;

const DEFAULT_CONFIG_PATH: &str = "player-config.toml";

#[derive(Parser)]
#[command(version, author = "SIGNAGE PLAYER AUTHORS", about = "Signage Player\nLicensed under AGPLv3", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Generate a default configuration template to stdout
    #[arg(long)]
    generate_config: bool,

    /// Resolve a single content item, print it as JSON and exit
    #[arg(long)]
    resolve_once: bool,
}

fn run_onboarding() -> Result<()> {
    use dialoguer::{theme::ColorfulTheme, Input};

    println!("Welcome to Signage Player!");
    println!("It looks like you don't have a configuration file yet.");
    println!("Let's get you set up.\n");

    let server_url: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Control plane URL")
        .default("http://127.0.0.1:8080".to_string())
        .interact_text()?;

    let screen_id: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Screen id (leave empty for none)")
        .allow_empty(true)
        .interact_text()?;

    let mut config_content = Config::default_template().replacen(
        "server_url = \"http://127.0.0.1:8080\"",
        &format!("server_url = \"{}\"", server_url.trim()),
        1,
    );
    if !screen_id.trim().is_empty() {
        config_content = config_content.replacen(
            "# screen_id = \"lobby-1\"",
            &format!("screen_id = \"{}\"", screen_id.trim()),
            1,
        );
    }

    // Validate before writing
    let _: Config = toml::from_str(&config_content)?;

    println!("\nGenerating configuration file: {}", DEFAULT_CONFIG_PATH);
    std::fs::write(DEFAULT_CONFIG_PATH, &config_content)?;
    println!("Configuration saved successfully!");
    println!("----------------------------------------\n");
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    if std::fs::metadata(&config_path).is_err() {
        if cli.config.is_none() && console::user_attended() {
            if let Err(e) = run_onboarding() {
                eprintln!("Onboarding failed: {}", e);
                std::process::exit(1);
            }
        } else {
            eprintln!("Error: Configuration file '{}' not found.", config_path);
            eprintln!("Run with --generate-config to see a template.");
            std::process::exit(1);
        }
    }

    Config::load(&config_path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        println!("{}", Config::default_template());
        return Ok(());
    }

    let config = load_config(&cli)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("signage_player={}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Using control plane at {}", config.server_url);

    let api: Arc<dyn SignageApi> = Arc::new(HttpSignageApi::new(
        &config.server_url,
        config.screen_id.clone(),
        Duration::from_secs(config.network.request_timeout_secs),
    )?);

    if cli.resolve_once {
        return resolve_once(api, &config).await;
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down...");
            shutdown.cancel();
        }
    });

    let _mpv = mpv_client::spawn_mpv(&config.mpv_socket_path).await?;
    let (surface_tx, surface_rx) = mpsc::channel(64);
    let surface = Arc::new(MpvSurface::connect(&config.mpv_socket_path, surface_tx).await?);

    let mut monitor = ConnectionMonitor::new(&config.network);
    let Some(initial) =
        connection::wait_for_server(api.as_ref(), surface.as_ref(), &mut monitor, &cancel).await
    else {
        return Ok(());
    };
    let settings = Arc::new(RwLock::new(initial));

    let mut runtime = PlayerRuntime::new(
        api.clone(),
        settings.clone(),
        surface,
        surface_rx,
        config.playback.clone(),
        &config.network,
    );
    if config.preload.enabled {
        match Preloader::new(config.cache_dir(), &config.preload) {
            Ok(preloader) => runtime = runtime.with_preloader(preloader, config.preload.ahead),
            Err(e) => tracing::warn!("Preloading disabled: {:#}", e),
        }
    }

    let scheduler = PollingScheduler::new(config.polling.clone(), runtime.sender(), api, settings);
    tokio::spawn(scheduler.run(cancel.clone()));

    runtime.run(cancel).await;
    Ok(())
}

async fn resolve_once(api: Arc<dyn SignageApi>, config: &Config) -> Result<()> {
    let settings = match api.display_settings().await {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Using default display settings: {}", e);
            DisplaySettings::default()
        }
    };

    let mut source = ContentSource::new(
        api,
        Arc::new(RwLock::new(settings)),
        config.playback.live_feed_limit,
    );
    let output = match source.resolve_next().await? {
        Resolution::Emergency(directive) => serde_json::to_string_pretty(&directive)?,
        Resolution::Content(item) => serde_json::to_string_pretty(&item)?,
    };
    println!("{}", output);
    Ok(())
}
