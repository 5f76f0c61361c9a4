//! CLI interface for Draftmill
//!
//! This module provides the command-line interface using clap's derive API.
//! Every command is a single short-lived invocation; there is no daemon.

use clap::{Parser, Subcommand};
use sdk::Action;
use std::path::PathBuf;

/// Draftmill content pipeline
///
/// Advances drafts through research, outlining, drafting and review one
/// phase at a time, then publishes what passes the quality gate.
#[derive(Parser, Debug)]
#[command(name = "draftmill")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one pipeline invocation (advance, publish, scan, create, health)
    Run {
        #[arg(value_parser = parse_action)]
        action: Action,

        /// Restrict to one site
        #[arg(long)]
        site: Option<String>,

        /// Restrict to one locale
        #[arg(long)]
        locale: Option<String>,
    },

    /// Create research-phase drafts from keywords
    Create {
        #[arg(long)]
        site: String,

        #[arg(long)]
        locale: String,

        /// Also create a linked draft in this locale
        #[arg(long)]
        pair_locale: Option<String>,

        #[arg(required = true)]
        keywords: Vec<String>,
    },

    /// List drafts held in 'generating' past the staleness threshold
    Stuck,

    /// Show provider configuration and pipeline health
    Health,

    /// Manage per-task provider routes
    Routes {
        #[command(subcommand)]
        action: RouteAction,
    },

    /// Show recent invocations from the audit log
    Logs {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
}

/// Provider route actions
#[derive(Subcommand, Debug)]
pub enum RouteAction {
    /// List all routes
    List,

    /// Create or replace the route for a task type
    Set {
        /// Task type (research, outline, drafting, images, seo, scoring)
        task: String,

        /// Primary provider
        primary: String,

        #[arg(long)]
        fallback: Option<String>,

        /// Model override for the primary provider
        #[arg(long)]
        model: Option<String>,
    },
}

fn parse_action(s: &str) -> Result<Action, String> {
    s.parse::<Action>().map_err(|e| e.to_string())
}
