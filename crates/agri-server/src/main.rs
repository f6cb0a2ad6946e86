//! AgriRent API server binary.

use std::process::ExitCode;

use agri_server::{AppServer, Cli};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let market_config = match cli.market_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    let config = cli.server_config();
    let addr = config.bind_addr;

    info!(
        addr = %addr,
        platform_fee_bps = market_config.platform_fee.get(),
        deposit_bps = market_config.deposit.get(),
        "starting AgriRent server"
    );

    let server = match AppServer::open(config, market_config) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "failed to open marketplace");
            return ExitCode::FAILURE;
        }
    };

    match server.serve_with_shutdown(addr, shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server error");
            ExitCode::FAILURE
        }
    }
}
