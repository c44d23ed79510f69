use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::agent::AgentLoop;
use crate::client::ControlPlaneClient;
use crate::command::Cli;
use crate::executor::CommandExecutor;
use crate::shutdown::Shutdown;


pub async fn run() -> ExitCode {
    let args = Cli::parse();
    init_tracing(args.verbose);

    let config = args.config;
    info!(control_plane = %config.base_url(), "Starting adb-proxy");

    let executor = match CommandExecutor::new(&config).await {
        Ok(executor) => executor,
        Err(err) => {
            error!("Failed to initialize executor: {}", err);
            return ExitCode::FAILURE;
        }
    };
    info!(adb = %executor.tool_path().display(), "Device tool is available");

    let client = match ControlPlaneClient::new(&config) {
        Ok(client) => client,
        Err(err) => {
            error!("Failed to initialize control plane client: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Shutdown::new();
    shutdown.install_signal_handlers();

    match AgentLoop::new(executor, client, &config).run(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("Agent stopped: {}", err);
            ExitCode::FAILURE
        }
    }
}


/// RUST_LOG wins when set; otherwise info, or debug with --verbose.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
