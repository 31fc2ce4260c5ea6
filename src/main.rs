use anyhow::{Context, Result};
use clap::Parser;
use dingrelay::{app::App, cli::Cli, telemetry, web::WebOptions};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_logging(cli.log_level, cli.log_format)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting dingrelay");

    let prom_handle = telemetry::install_metrics_recorder()?;
    let source = cli.config_source().context("invalid command-line configuration")?;
    if cli.uses_legacy_flags() {
        info!("Using configuration from command-line flags; --config.file is ignored");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let app = App::builder(source)
        .listen_address(cli.listen_address)
        .watch_config(cli.watch_config)
        .web_options(WebOptions {
            enable_lifecycle: cli.enable_lifecycle,
            max_alert_count: cli.max_alert_count,
            flags: cli.flags(),
        })
        .prometheus_handle(prom_handle)
        .build(shutdown_rx)
        .await
        .map_err(|e| {
            error!(err = %format!("{e:#}"), "Failed to start");
            e
        })?;

    tokio::spawn(async move {
        wait_for_termination().await;
        info!("Shutdown signal received. Shutting down gracefully...");
        let _ = shutdown_tx.send(true);
    });

    app.run().await?;
    info!("All tasks shut down. Exiting.");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            error!(err = %e, "Cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
