//! Wiring for one invocation
//!
//! Opens the draft store and builds the provider router and pipeline runner
//! from configuration. Both the CLI and the trigger API start here.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::Database;
use crate::llm::{CredentialSource, EnvCredentials, ProviderRouter};
use crate::pipeline::PipelineRunner;

pub struct Services {
    pub database: Database,
    pub config: Arc<Config>,
    pub router: Arc<ProviderRouter>,
    pub clock: Arc<dyn Clock>,
}

impl Services {
    /// Open the store at the configured path with environment credentials
    pub async fn open(config: Config) -> Result<Self> {
        let database = Database::new(&config.core.database_path())
            .await
            .context("Failed to open database")?;
        Ok(Self::with_parts(
            database,
            config,
            Arc::new(EnvCredentials),
            Arc::new(SystemClock),
        ))
    }

    pub fn with_parts(
        database: Database,
        config: Config,
        credentials: Arc<dyn CredentialSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = Arc::new(config);
        let router = ProviderRouter::new(Arc::new(config.llm.clone()), credentials)
            .with_routes(database.routes());

        Self {
            database,
            config,
            router: Arc::new(router),
            clock,
        }
    }

    /// Runner for one invocation
    pub fn runner(&self) -> Result<PipelineRunner> {
        PipelineRunner::new(
            &self.database,
            self.config.clone(),
            self.router.clone(),
            self.clock.clone(),
        )
    }
}
