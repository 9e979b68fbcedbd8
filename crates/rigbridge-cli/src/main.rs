//! `rigbridge` – CAT-to-broker bridge.
//!
//! 1. Loads `~/.rigbridge/config.toml` (writing the defaults on first run),
//!    then applies `RIGBRIDGE_*` variables and command-line flags.
//! 2. Starts the bridge against the configured MQTT broker (or, with
//!    `--loopback`, an in-process broker) and the simulated transceiver.
//! 3. Ctrl-C requests a graceful shutdown: the offline status is announced
//!    before the workers are stopped.  Workers that do not stop within the
//!    exit timeout are abandoned.

mod cli;
mod config;

use clap::Parser;
use colored::Colorize;
use std::path::Path;
use std::process;
use tracing::{debug, error, info, warn};

use rigbridge_hal::SimRadio;
use rigbridge_kernel::ExitOutcome;
use rigbridge_middleware::{LoopbackBroker, LoopbackTransport, MqttTransport, TransportClient};
use rigbridge_runtime::{Bridge, BridgeConfig, telemetry};
use rigbridge_types::RigError;

use crate::cli::Cli;
use crate::config::Config;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let tracer_guard = telemetry::init_tracing("rigbridge");

    print_banner();

    let code = match run(cli).await {
        Ok(ExitOutcome::Clean) => {
            info!("bridge terminated cleanly");
            0
        }
        Ok(ExitOutcome::Forced { outstanding }) => {
            warn!(?outstanding, "bridge terminated forcefully; in-flight work abandoned");
            0
        }
        Err(e) => {
            error!(error = %e, "bridge failed");
            eprintln!("{}: {e}", "Error".red().bold());
            1
        }
    };
    // process::exit skips destructors; flush spans first.
    drop(tracer_guard);
    process::exit(code);
}

async fn run(cli: Cli) -> Result<ExitOutcome, RigError> {
    let cfg = load_config(&cli)?;
    cfg.validate()?;
    debug!(config = ?cfg, "effective configuration");

    let topics = cfg.topics();
    let transport = cfg.transport_settings();
    let client: Box<dyn TransportClient> = if cli.loopback {
        println!(
            "  Broker   {} as {}",
            "in-process loopback".bold(),
            transport.client_id.bold()
        );
        let broker = LoopbackBroker::new();
        spawn_traffic_monitor(&broker, &topics.base);
        Box::new(LoopbackTransport::new(broker))
    } else {
        println!(
            "  Broker   {}:{} as {}",
            transport.broker_url.bold(),
            transport.broker_port,
            transport.client_id.bold()
        );
        Box::new(MqttTransport::new())
    };
    println!("  Topics   {}/…", topics.base.bold());
    println!("  Rig      model {} on {}", cfg.radio.rig_model, cfg.radio_settings().serial);
    println!("  Press {} to stop.\n", "Ctrl-C".bold().cyan());

    let mut bridge_config = BridgeConfig::new(topics, transport);
    bridge_config.timings = cfg.timings();
    bridge_config.device_start_delay = cfg.device_start_delay();

    Bridge::new(bridge_config)
        .launch(client, Box::new(SimRadio::new(cfg.radio_settings())), ctrl_c())
        .await
}

/// File (or first-run defaults), then environment, then flags.
fn load_config(cli: &Cli) -> Result<Config, RigError> {
    let path = cli.config.clone().unwrap_or_else(config::config_path);
    let mut cfg = match config::load_from(&path)? {
        Some(cfg) => {
            println!("  Using config file {}", path.display().to_string().bold());
            cfg
        }
        None if cli.config.is_some() => {
            return Err(RigError::Config(format!("{} not found", path.display())));
        }
        None => first_run(&path),
    };
    config::apply_env_overrides(&mut cfg);
    cli.apply(&mut cfg);
    Ok(cfg)
}

fn first_run(path: &Path) -> Config {
    let cfg = Config::default();
    match config::save_to(&cfg, path) {
        Ok(()) => println!(
            "  {} Default config written to {}",
            "✓".green().bold(),
            path.display().to_string().bold()
        ),
        Err(e) => warn!(error = %e, "could not write default config"),
    }
    cfg
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            println!();
            println!("{}", "  Ctrl-C received, going offline …".yellow().bold());
        }
        Err(e) => {
            // Without a signal handler the bridge can only stop on a fault.
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}

/// Log everything the bridge publishes on the loopback broker at debug
/// level.
fn spawn_traffic_monitor(broker: &LoopbackBroker, base: &str) {
    let filter = format!("{base}/#");
    let mut rx = broker.connect_observer("rigbridge-monitor", &[filter.as_str()]);
    tokio::spawn(async move {
        while let Some(env) = rx.recv().await {
            debug!(
                topic = %env.topic,
                retain = env.retain,
                payload = %String::from_utf8_lossy(&env.payload),
                "broker traffic"
            );
        }
    });
}

fn print_banner() {
    println!();
    println!(
        "  {} {}",
        "rigbridge".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  CAT control over pub/sub");
    println!();
}
