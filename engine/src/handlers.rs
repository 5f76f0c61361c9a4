//! Command handlers for CLI operations
//!
//! Each handler opens the store, does one thing and prints the result as
//! text or JSON.

use anyhow::{Context, Result};
use serde_json::json;

use crate::config::Config;
use crate::db::ProviderRoute;
use crate::llm::ProviderKey;
use crate::pipeline::RunSummary;
use crate::services::Services;
use sdk::{Action, TriggerRequest};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Run one pipeline invocation
pub async fn handle_run(
    action: Action,
    site: Option<String>,
    locale: Option<String>,
    config: Config,
    format: OutputFormat,
) -> Result<()> {
    let mut request = TriggerRequest::new(action);
    request.site_id = site;
    request.locale = locale;
    run_request(&request, config, format).await
}

/// Create drafts from keywords
pub async fn handle_create(
    site: String,
    locale: String,
    pair_locale: Option<String>,
    keywords: Vec<String>,
    config: Config,
    format: OutputFormat,
) -> Result<()> {
    let mut request = TriggerRequest::new(Action::Create).with_scope(site, locale);
    request.pair_locale = pair_locale;
    request.keywords = keywords;
    run_request(&request, config, format).await
}

async fn run_request(request: &TriggerRequest, config: Config, format: OutputFormat) -> Result<()> {
    let services = Services::open(config).await?;
    let runner = services.runner()?;
    let summary = runner.run(request).await?;
    print_summary(&summary, format)?;
    services.database.close().await
}

fn print_summary(summary: &RunSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("Pipeline run: {}", summary.action);
            println!("  Processed: {}", summary.processed);
            println!("  Succeeded: {}", summary.succeeded);
            println!("  Failed:    {}", summary.failed);
            println!("  Deferred:  {}", summary.deferred);
            if summary.rejected > 0 {
                println!("  Rejected:  {}", summary.rejected);
            }
            println!("  Duration:  {}ms", summary.duration_ms);
            if let Some(blocker) = &summary.config_blocker {
                println!();
                println!("⚠ {}", blocker);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(summary)?);
        }
    }
    Ok(())
}

/// List drafts stuck in 'generating'
pub async fn handle_stuck(config: Config, format: OutputFormat) -> Result<()> {
    let services = Services::open(config).await?;
    let report = services.runner()?.health_report().await?;

    match format {
        OutputFormat::Text => {
            if report.stuck.is_empty() {
                println!("No stuck drafts");
            } else {
                println!("Stuck drafts ({}):", report.stuck.len());
                println!();
                for draft in &report.stuck {
                    println!("Draft ID: {}", draft.id);
                    println!("  Site/locale: {}/{}", draft.site_id, draft.locale);
                    println!("  Phase: {}", draft.phase);
                    println!("  Stuck for: {}s", draft.stuck_for_secs);
                    println!();
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "stuck": report.stuck,
                "count": report.stuck.len(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    services.database.close().await
}

/// Show provider configuration and pipeline health
pub async fn handle_health(config: Config, format: OutputFormat) -> Result<()> {
    let services = Services::open(config).await?;
    let report = services.runner()?.health_report().await?;

    match format {
        OutputFormat::Text => {
            println!("Draftmill Health");
            println!("================");
            println!();
            println!("Status: {:?}", report.status);
            println!();
            println!("Providers:");
            for key in ProviderKey::ALL {
                let status = if report.configured_providers.contains(&key) {
                    "configured"
                } else {
                    "no credential"
                };
                println!("  {:<12} {}", format!("{}:", key), status);
            }
            println!();
            println!("Drafts by phase:");
            for (phase, count) in &report.phase_counts {
                println!("  {:<12} {}", format!("{}:", phase), count);
            }
            if !report.stuck.is_empty() {
                println!();
                println!("⚠ {} stuck draft(s); see `draftmill stuck`", report.stuck.len());
            }
            if let Some(blocker) = &report.config_blocker {
                println!();
                println!("⚠ {}", blocker);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    services.database.close().await
}

/// List provider routes
pub async fn handle_routes_list(config: Config, format: OutputFormat) -> Result<()> {
    let services = Services::open(config).await?;
    let routes = services.database.routes().list().await?;

    match format {
        OutputFormat::Text => {
            if routes.is_empty() {
                println!("No provider routes; every task uses the default provider");
            } else {
                for route in &routes {
                    println!(
                        "{:<10} {} -> {}{}",
                        route.task_type,
                        route.primary_provider,
                        route.fallback_provider.as_deref().unwrap_or("-"),
                        route
                            .model
                            .as_deref()
                            .map(|m| format!(" (model {})", m))
                            .unwrap_or_default()
                    );
                }
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({ "routes": routes }))?);
        }
    }

    services.database.close().await
}

/// Create or replace a provider route
pub async fn handle_routes_set(
    task: String,
    primary: String,
    fallback: Option<String>,
    model: Option<String>,
    config: Config,
    format: OutputFormat,
) -> Result<()> {
    // Reject unknown providers before they reach the table
    primary.parse::<ProviderKey>()?;
    if let Some(fallback) = fallback.as_deref() {
        fallback.parse::<ProviderKey>()?;
    }

    let services = Services::open(config).await?;
    let route = ProviderRoute {
        task_type: task,
        primary_provider: primary,
        fallback_provider: fallback,
        model,
        updated_at: services.clock.now_millis(),
    };
    services.database.routes().upsert(&route).await?;

    match format {
        OutputFormat::Text => println!("Route for '{}' saved", route.task_type),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&route)?),
    }

    services.database.close().await
}

/// Show recent audit log entries
pub async fn handle_logs(limit: i64, config: Config, format: OutputFormat) -> Result<()> {
    let services = Services::open(config).await?;
    let logs = services
        .database
        .cron_logs()
        .list_recent(limit)
        .await
        .context("Failed to fetch audit log")?;

    match format {
        OutputFormat::Text => {
            if logs.is_empty() {
                println!("No invocations recorded");
            } else {
                for log in &logs {
                    let started = chrono::DateTime::from_timestamp_millis(log.started_at)
                        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "Unknown".to_string());
                    println!(
                        "{}  {:<18} {:<8} {}/{}/{} in {}ms",
                        started,
                        log.job_name,
                        log.status.as_str(),
                        log.items_processed,
                        log.items_succeeded,
                        log.items_failed,
                        log.duration_ms
                    );
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "logs": logs,
                "count": logs.len(),
                "limit": limit,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    services.database.close().await
}
