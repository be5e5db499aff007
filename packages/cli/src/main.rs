#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line front end for the traffic dashboard core.
//!
//! * `watch` polls the incident service and logs the headline after every
//!   cycle until interrupted.
//! * `snapshot` polls once and prints the dashboard report as JSON.
//! * `route` computes a route between two named locations.
//! * `login` exchanges credentials for a token usable as
//!   `TRAFFIC_WATCH_ACCESS_TOKEN`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use traffic_watch_analytics_models::DashboardSummary;
use traffic_watch_bus::Diagnostic;
use traffic_watch_dashboard::{DashboardConfig, DashboardSession};
use traffic_watch_poller::CycleOutcome;
use traffic_watch_route::RouteResolution;
use traffic_watch_route_models::RequestState;
use traffic_watch_source::auth::{AuthClient, LoginRequest};

#[derive(Parser)]
#[command(name = "traffic_watch", about = "Traffic incident dashboard core")]
struct Cli {
    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Incident service base URL (overrides config and `TRAFFIC_WATCH_API_URL`)
    #[arg(long, global = true)]
    api_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll continuously and log headline figures after every cycle
    Watch {
        /// Stop after this many applied cycles
        #[arg(long)]
        cycles: Option<u64>,
    },
    /// Poll once and print the dashboard report as JSON
    Snapshot {
        /// Hours covered by the hourly trend
        #[arg(long, default_value = "24")]
        trend_hours: u32,
    },
    /// Compute a route between two named locations
    Route {
        /// Starting location name
        start: String,
        /// Destination name
        end: String,
    },
    /// List the named locations usable with `route`
    Locations,
    /// Log in to the incident service and print the access token
    Login {
        /// Account email
        #[arg(long)]
        email: String,
        /// Account password
        #[arg(long, env = "TRAFFIC_WATCH_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

fn load_config(cli: &Cli) -> Result<DashboardConfig, Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => DashboardConfig::load(path)?,
        None => DashboardConfig::default(),
    };
    let mut config = config.with_env_overrides()?;
    if let Some(url) = &cli.api_url {
        config.api_url.clone_from(url);
    }
    Ok(config)
}

fn headline(summary: &DashboardSummary) -> String {
    let by_type = summary
        .by_type
        .iter()
        .map(|(category, count)| format!("{category} {count}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "rev {}: {} incidents ({by_type}), {} high priority, {} on map",
        summary.revision, summary.total, summary.high_priority, summary.mappable
    )
}

async fn watch(
    session: &DashboardSession,
    cycles: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = session.store().on_change(move |change| {
        let summary = traffic_watch_analytics::summarize(&change.snapshot);
        log::info!("{}", headline(&summary));
        if !change.report.is_unchanged() {
            log::info!(
                "+{} -{} ~{}",
                change.report.added.len(),
                change.report.removed.len(),
                change.report.updated.len()
            );
        }
        // The receiver only goes away on shutdown.
        let _ = tx.send(change.snapshot.revision());
        Ok(())
    });

    let mut diagnostics = session.diagnostics().subscribe();
    tokio::spawn(async move {
        loop {
            match diagnostics.recv().await {
                Ok(Diagnostic::NetworkFailure { message, .. }) => {
                    log::warn!("Showing last good data: {message}");
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    session.start();
    let mut applied = 0_u64;
    loop {
        tokio::select! {
            revision = rx.recv() => {
                let Some(revision) = revision else { break };
                applied += 1;
                log::debug!("Applied revision {revision}");
                if cycles.is_some_and(|limit| applied >= limit) {
                    break;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                log::info!("Interrupted");
                break;
            }
        }
    }

    subscription.unsubscribe();
    session.dispose();
    Ok(())
}

async fn snapshot(
    session: &DashboardSession,
    trend_hours: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    match session.poller().poll_once().await {
        CycleOutcome::Applied(report) => {
            if report.skipped > 0 {
                log::warn!("{} malformed record(s) skipped", report.skipped);
            }
        }
        CycleOutcome::Failed(e) => return Err(e.into()),
        CycleOutcome::Discarded | CycleOutcome::Skipped => {
            return Err("poll did not complete".into());
        }
    }

    let report = session.report(chrono::Utc::now(), trend_hours)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn route(
    session: &DashboardSession,
    start: &str,
    end: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let gazetteer = session.gazetteer();
    let request = session.route().request_named(&gazetteer, start, end)?;

    match request.finished().await {
        RouteResolution::Applied(state) => {
            println!("{}", serde_json::to_string_pretty(&state)?);
            if state.request == RequestState::Failed {
                return Err(state
                    .error
                    .unwrap_or_else(|| "route failed".to_string())
                    .into());
            }
            Ok(())
        }
        RouteResolution::Superseded | RouteResolution::Cancelled => {
            Err("route request did not complete".into())
        }
    }
}

async fn login(
    config: &DashboardConfig,
    email: String,
    password: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = AuthClient::new(reqwest::Client::new(), &config.api_url);
    let token = client.login(&LoginRequest { email, password }).await?;
    log::info!("Logged in ({} token)", token.token_type);
    println!("{}", token.access_token);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    log::info!("Using incident service at {}", config.api_url);

    match cli.command {
        Commands::Watch { cycles } => {
            let session = DashboardSession::new(config)?;
            watch(&session, cycles).await?;
        }
        Commands::Snapshot { trend_hours } => {
            let session = DashboardSession::new(config)?;
            snapshot(&session, trend_hours).await?;
        }
        Commands::Route { start, end } => {
            let session = DashboardSession::new(config)?;
            route(&session, &start, &end).await?;
        }
        Commands::Locations => {
            for location in config.gazetteer()?.iter() {
                println!(
                    "{}\t{:.4}\t{:.4}",
                    location.name, location.latitude, location.longitude
                );
            }
        }
        Commands::Login { email, password } => login(&config, email, password).await?,
    }

    Ok(())
}
