pub mod cli;
pub mod clients;
pub mod config;
pub mod constants;
pub mod db;
pub mod domain;
pub mod entities;
pub mod services;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
pub use config::Config;
use services::Scheduler;
use state::SharedState;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load()?;
    config.validate()?;

    if config.observability.metrics_enabled {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let mut builder = PrometheusBuilder::new();
        if let Some(port) = config.observability.metrics_port {
            builder = builder.with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)));
        }
        builder
            .install()
            .context("Failed to install Prometheus recorder")?;
        info!("Prometheus metrics recorder initialized");
    }

    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    let fmt_layer = tracing_subscriber::fmt::layer();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if config.observability.loki_enabled {
        let url = url::Url::parse(&config.observability.loki_url).context("Invalid Loki URL")?;

        let mut builder = tracing_loki::builder();
        for (key, value) in &config.observability.loki_labels {
            builder = builder.label(key.as_str(), value.as_str())?;
        }
        let (layer, task) = builder.build_url(url)?;

        tokio::spawn(task);

        registry.with(layer).init();
        info!(
            "Loki logging initialized at {}",
            config.observability.loki_url
        );
    } else {
        registry.init();
    }

    let cli = Cli::parse();

    let Some(command) = cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        return Ok(());
    };

    match command {
        Commands::Init => {
            if Config::create_default_if_missing()? {
                println!("✓ Config file created. Edit config.toml and run again.");
            } else {
                println!("config.toml already exists, leaving it untouched.");
            }
            Ok(())
        }

        Commands::Daemon => run_daemon(config).await,

        command => {
            let state = SharedState::new(config).await?;
            match command {
                Commands::Scan { json } => cli::cmd_scan(&state, json).await,
                Commands::Resolve { id, apply } => cli::cmd_resolve(&state, id, apply).await,
                Commands::Subscribe {
                    chat_id,
                    username,
                    sync,
                } => cli::cmd_subscribe(&state, chat_id, &username, sync).await,
                Commands::Watchers { title_id } => cli::cmd_watchers(&state, title_id).await,
                Commands::Status => cli::cmd_status(&state).await,
                Commands::Init | Commands::Daemon => Ok(()),
            }
        }
    }
}

async fn run_daemon(config: Config) -> anyhow::Result<()> {
    info!(
        "Anipush v{} starting in daemon mode...",
        env!("CARGO_PKG_VERSION")
    );

    let scheduler_config = config.scheduler.clone();
    let state = Arc::new(SharedState::new(config).await?);

    let scheduler = Arc::new(Scheduler::new(Arc::clone(&state), scheduler_config));

    let scheduler_handle = {
        let sched = Arc::clone(&scheduler);
        tokio::spawn(async move {
            if let Err(e) = sched.start().await {
                error!("Scheduler error: {}", e);
            }
        })
    };

    info!("Daemon running. Press Ctrl+C to stop.");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received");
        }
        Err(e) => {
            error!("Error listening for shutdown: {}", e);
        }
    }

    scheduler.stop().await;
    scheduler_handle.abort();
    info!("Daemon stopped");

    Ok(())
}
