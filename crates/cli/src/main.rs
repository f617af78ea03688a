//! Pulse actions entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse arguments**: `--topic-base`, `--dry-run`, `--debug`.
//! 2. **Wire observability**: install the `tracing` subscriber (see [`telemetry`]).
//! 3. **Load configuration** and resolve every selected topic-base to a
//!    route with a registered handler. Any miss is fatal.
//! 4. **Construct infrastructure**: the HTTP trigger service client and the
//!    Pulse consumer, injected into the [`handlers::Dispatcher`].
//! 5. **Run** the dispatch loop until SIGINT/SIGTERM.
//!
//! ## Exit status
//!
//! The process always exits with status 1: on configuration or
//! authentication failure, and on an explicit shutdown. It never finishes
//! on its own.

mod settings;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;

use actions::{DryRun, TriggerService};
use anyhow::Context;
use clap::Parser;
use handlers::{builtin_registry, select_handler, Dispatcher};
use listener::{PulseConsumer, Subscription};
use tokio::signal;
use tracing::{error, info};
use trigger_api::HttpTriggerClient;

use crate::settings::Settings;

/// Consume Pulse messages and act on them against the CI trigger service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Identifier(s) of the exchange and topic to listen to, comma separated.
    #[arg(long = "topic-base", required = true, value_delimiter = ',')]
    topic_base: Vec<String>,

    /// Log what would happen without acknowledging messages or triggering jobs.
    #[arg(long)]
    dry_run: bool,

    /// Log at debug level.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let telemetry = match telemetry::init(args.debug) {
        Ok(telemetry) => telemetry,
        Err(err) => {
            eprintln!("{err:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(args).await {
        Ok(()) => info!("Stopped"),
        Err(err) => error!("{err:#}"),
    }

    telemetry.shutdown();
    ExitCode::FAILURE
}

async fn run(args: Args) -> anyhow::Result<()> {
    let dry_run = DryRun::new(args.dry_run);
    let settings = Settings::load().context("Failed to load configuration")?;

    let topic_bases = settings::parse_topic_bases(&args.topic_base)?;
    let routes = settings.routes_for(&topic_bases)?;

    let trigger: Arc<dyn TriggerService> = Arc::new(
        HttpTriggerClient::new(&settings.trigger_api)
            .context("Failed to create trigger service client")?,
    );
    let registry = builtin_registry(trigger)?;
    let handler = select_handler(&registry, &routes)?;

    let credentials = settings::credentials(|key| std::env::var(key).ok())?;
    let subscription = Subscription::new(topic_bases, routes)?;
    let mut consumer = PulseConsumer::new(settings.pulse.clone(), credentials, subscription);

    info!(handler = handler.name(), %dry_run, "Starting");
    Dispatcher::new(handler, dry_run)
        .with_reconnect_delay(settings.reconnect_delay())
        .run(&mut consumer, shutdown_signal())
        .await?;
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("Failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actions::ConfigurationError;

    #[test]
    fn topic_base_accepts_comma_separated_list() {
        let args = Args::try_parse_from([
            "pulse-actions",
            "--topic-base",
            "talos,manual_backfill",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(args.topic_base, vec!["talos", "manual_backfill"]);
        assert!(args.dry_run);
        assert!(!args.debug);
    }

    #[test]
    fn topic_base_is_required() {
        assert!(Args::try_parse_from(["pulse-actions", "--debug"]).is_err());
    }

    #[test]
    fn configured_route_without_handler_fails_startup() {
        let settings = Settings::builtin().unwrap();
        let trigger: Arc<dyn TriggerService> =
            Arc::new(HttpTriggerClient::new(&settings.trigger_api).unwrap());
        let registry = builtin_registry(trigger).unwrap();

        let talos = settings
            .routes_for(&settings::parse_topic_bases(&["talos".to_string()]).unwrap())
            .unwrap();
        assert!(select_handler(&registry, &talos).is_ok());

        let backfill = settings
            .routes_for(&settings::parse_topic_bases(&["manual_backfill".to_string()]).unwrap())
            .unwrap();
        let err = select_handler(&registry, &backfill).err().unwrap();
        assert!(matches!(err, ConfigurationError::MissingHandler { .. }));
        assert!(err
            .to_string()
            .contains("exchange/treeherder/v1/job-actions"));
    }
}
