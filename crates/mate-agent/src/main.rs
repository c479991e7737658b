mod client;
mod config;
mod discovery;
mod executor;
mod logging;
mod logreader;
mod monitor;
mod shutdown;
mod transport;

#[cfg(test)]
mod testutil;

use clap::Parser;
use client::NavigatorClient;
use config::Config;
use mate_core::CommandPolicy;
use monitor::Monitor;
use shutdown::StopSignal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "mate-agent")]
struct Args {
    /// Path to the configuration file
    #[arg(long, default_value = "config.yml")]
    config: PathBuf,
    /// Print version information and exit
    #[arg(long, default_value_t = false)]
    version: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if args.version {
        println!("Fleet Mate v{VERSION}");
        return;
    }

    let config = match Config::load(&args.config) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            std::process::exit(1);
        }
    };

    let _log_guard = logging::init(&config.logging);
    info!(
        event = "starting",
        version = VERSION,
        mate_id = %config.mate.id,
        navigator = %config.navigator.url,
        monitoring_interval_secs = config.monitoring.interval_secs,
    );

    let monitor = Arc::new(Monitor::new(config.clone()));
    let policy = Arc::new(CommandPolicy::default());
    let stop = StopSignal::new();

    let client = NavigatorClient::new(config, policy, monitor, stop.clone());
    let mut client_task = tokio::spawn(async move { client.run().await });

    tokio::select! {
        _ = wait_for_signal() => {
            info!(event = "signal_received");
            stop.stop();
            let _ = client_task.await;
        }
        // The client returns on its own after a shutdown command or a clean
        // close from the Navigator.
        result = &mut client_task => {
            let _ = result;
        }
    }
    info!(event = "stopped");
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(_) => {
                let _ = ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
