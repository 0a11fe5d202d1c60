//! Runtime wiring: one pull consumer per identifier kind, each with its own
//! bounded worker pool.

use std::sync::Arc;
use std::time::Duration;

use dphp_auth::{GluePermissionSource, PermissionCache, ResourceManager};
use dphp_glue::{Bridge, Executor};
use dphp_state::{StateStore, SubjectLock};
use dphp_store::{Broker, Consumer};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ConsumerConfig;
use crate::dispatch::Dispatcher;
use crate::error::ConsumerResult;

pub struct Runtime {
    broker: Arc<dyn Broker>,
    dispatcher: Dispatcher,
    config: ConsumerConfig,
}

impl Runtime {
    /// Wire the runtime and make sure its stream exists.
    pub async fn new(
        broker: Arc<dyn Broker>,
        executor: Arc<dyn Executor>,
        bootstrap: impl Into<String>,
        config: ConsumerConfig,
    ) -> ConsumerResult<Self> {
        let mut state = StateStore::new(broker.clone());
        if let Some(retention) = config.history_retention {
            state = state.with_history_retention(retention);
        }
        let bridge = Bridge::new(executor, state, bootstrap);
        let lock = SubjectLock::new(broker.clone(), config.lock.clone());
        let mut dispatcher =
            Dispatcher::new(config.namespace.clone(), broker.clone(), bridge.clone(), lock)
                .with_heartbeat(config.heartbeat());

        if config.authorization {
            let source = Arc::new(GluePermissionSource::new(bridge));
            let resources = ResourceManager::open(
                broker.clone(),
                config.namespace.clone(),
                source,
                PermissionCache::new(config.permissions.clone()),
            )
            .await?;
            dispatcher = dispatcher.with_resources(resources);
        }

        broker.stream(config.stream()).await?;
        info!(
            namespace = %config.namespace,
            authorization = config.authorization,
            "Runtime initialized"
        );

        Ok(Self {
            broker,
            dispatcher,
            config,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Consume until `shutdown` fires, then wait for in-flight messages.
    pub async fn run(&self, shutdown: CancellationToken) -> ConsumerResult<()> {
        let stream = self.broker.stream(self.config.stream()).await?;
        let mut loops = JoinSet::new();

        for kind in &self.config.kinds {
            let consumer = stream.consumer(self.config.durable(*kind)).await?;
            info!(stream = %stream.name(), consumer = %consumer.name(), "Consumer started");
            loops.spawn(consume(
                consumer,
                self.dispatcher.clone(),
                self.config.concurrency,
                self.config.retry_backoff,
                shutdown.clone(),
            ));
        }

        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Consumer loop failed");
            }
        }
        info!("Runtime stopped");
        Ok(())
    }
}

async fn consume(
    consumer: Arc<dyn Consumer>,
    dispatcher: Dispatcher,
    concurrency: usize,
    backoff: Duration,
    shutdown: CancellationToken,
) {
    let size = pool_size(concurrency);
    let permits = Arc::new(Semaphore::new(size as usize));

    loop {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let delivery = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = consumer.next() => match next {
                Ok(delivery) => delivery,
                Err(e) => {
                    error!(consumer = %consumer.name(), error = %e, "Failed to pull message");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            },
        };

        let dispatcher = dispatcher.clone();
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            let _permit = permit;
            // Settled inside handle.
            let _ = dispatcher.handle(delivery, &cancel).await;
        });
    }

    debug!(consumer = %consumer.name(), "Draining in-flight messages");
    let _ = permits.acquire_many(size).await;
    info!(consumer = %consumer.name(), "Consumer stopped");
}

/// Permits for `concurrency` workers, bounded so the whole pool can be
/// drained with a single `acquire_many`.
fn pool_size(concurrency: usize) -> u32 {
    let size = concurrency.clamp(1, Semaphore::MAX_PERMITS);
    u32::try_from(size).unwrap_or(u32::MAX)
}
