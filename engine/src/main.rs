// Draftmill
// Main entry point for the draftmill binary

use clap::Parser;
use draftmill_engine::cli::{Cli, Command, RouteAction};
use draftmill_engine::config::Config;
use draftmill_engine::handlers::{
    handle_create, handle_health, handle_logs, handle_routes_list, handle_routes_set, handle_run,
    handle_stuck, OutputFormat,
};
use draftmill_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the configured level; RUST_LOG wins over both
    let log_level = cli.log.clone().unwrap_or_else(|| config.core.log_level.clone());
    init_telemetry_with_level(&log_level);

    tracing::debug!("Draftmill v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Run {
            action,
            site,
            locale,
        } => handle_run(action, site, locale, config, format).await,

        Command::Create {
            site,
            locale,
            pair_locale,
            keywords,
        } => handle_create(site, locale, pair_locale, keywords, config, format).await,

        Command::Stuck => handle_stuck(config, format).await,

        Command::Health => handle_health(config, format).await,

        Command::Routes { action } => match action {
            RouteAction::List => handle_routes_list(config, format).await,
            RouteAction::Set {
                task,
                primary,
                fallback,
                model,
            } => handle_routes_set(task, primary, fallback, model, config, format).await,
        },

        Command::Logs { limit } => handle_logs(limit, config, format).await,
    }
}
