use std::process::ExitCode;

use host_bridge::{run, HostConfig, HostError};
use log::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // stdout carries serial data, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match session().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn session() -> Result<(), HostError> {
    let path = std::env::args().nth(1).ok_or(HostError::Usage)?;
    let config = HostConfig::load(path)?;
    let stats = run(config).await?;
    info!("link stats: {}", serde_json::to_string(&stats)?);
    Ok(())
}
