//! Daemon lifecycle

use std::sync::Arc;

use dphp_auth::TokenIssuer;
use dphp_consumer::Runtime;
use dphp_glue::{Executor, ProcessExecutor};
use dphp_state::StateStore;
use dphp_store::{Broker, MemoryBroker};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};

/// The runtime plus the store it consumes from.
pub struct Daemon {
    config: DaemonConfig,
    broker: Arc<dyn Broker>,
    runtime: Runtime,
}

impl Daemon {
    /// Build a daemon running scripts with the configured process executor.
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let bootstrap = config.bootstrap_path()?;
        let mut executor = ProcessExecutor::new(&config.executor.program)
            .with_args(config.executor.args.clone());
        if !config.executor.router.is_empty() {
            executor = executor.with_router(config.executor.router.clone());
        }
        if let Some(dir) = bootstrap.parent() {
            executor = executor.with_working_dir(dir);
        }
        Self::with_executor(config, Arc::new(MemoryBroker::new()), Arc::new(executor)).await
    }

    pub async fn with_executor(
        config: DaemonConfig,
        broker: Arc<dyn Broker>,
        executor: Arc<dyn Executor>,
    ) -> DaemonResult<Self> {
        if config.authz.enabled {
            // Refuse to start with secrets no token could be checked against.
            TokenIssuer::new(config.authz.secrets.as_slice())?;
        }
        let bootstrap = config.bootstrap_path()?;
        let bootstrap = bootstrap
            .to_str()
            .ok_or_else(|| DaemonError::Config(format!("bootstrap path {} is not UTF-8", bootstrap.display())))?
            .to_string();

        let runtime = Runtime::new(broker.clone(), executor, bootstrap, config.consumer_config()).await?;
        Ok(Self {
            config,
            broker,
            runtime,
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// State of the store this daemon consumes into.
    pub fn state(&self) -> StateStore {
        StateStore::new(self.broker.clone())
    }

    /// Consume until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) -> DaemonResult<()> {
        info!(
            project = %self.config.project,
            kinds = ?self.config.kinds(),
            "dphpd running"
        );
        self.runtime.run(shutdown).await?;
        Ok(())
    }
}
