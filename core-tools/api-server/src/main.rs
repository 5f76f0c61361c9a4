// Draftmill trigger API
// Serves POST /api/pipeline/trigger for external schedulers

use api_server::{serve, ApiState};
use clap::Parser;
use draftmill_engine::config::Config;
use draftmill_engine::services::Services;
use draftmill_engine::telemetry::init_telemetry_with_level;
use std::path::PathBuf;
use std::sync::Arc;

/// Draftmill trigger API server
#[derive(Parser, Debug)]
#[command(name = "draftmill-api")]
#[command(version, about, long_about = None)]
struct Args {
    /// Specify alternate configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the configured bind address
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if let Some(config_path) = &args.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };
    if let Some(bind) = args.bind {
        config.api.bind = bind;
    }

    init_telemetry_with_level(&config.core.log_level);

    let services = Arc::new(Services::open(config).await?);
    serve(ApiState::from_env(services)).await
}
