use std::process::ExitCode;

use clap::Parser;
use inkroom_server::{AppState, ServerConfig};
use tracing::{error, info};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkroom_server=info,tower_http=info".into()),
        )
        .init();
}

async fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let settings = config.room_settings()?;
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    let addr = listener.local_addr()?;
    info!("InkRoom relay server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);
    info!(
        "Log bound {} (trim to {}), simplify epsilon {}",
        settings.limits.max_log_size, settings.limits.keep_suffix, settings.epsilon
    );

    inkroom_server::serve(listener, AppState::new(settings)).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let config = ServerConfig::parse();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Server failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
