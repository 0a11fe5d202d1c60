use std::time::Duration;

use dphp_auth::CacheConfig;
use dphp_state::LockConfig;
use dphp_store::StreamConfig;
use dphp_types::IdKind;

pub const DEFAULT_NAMESPACE: &str = "dphp";

/// Dispatch loop configuration.
#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    /// Stream name and subject prefix.
    pub namespace: String,
    /// Kinds to run a consumer for.
    pub kinds: Vec<IdKind>,
    /// Messages processed at once per kind.
    pub concurrency: usize,
    pub ack_wait: Duration,
    pub max_deliver: Option<u32>,
    /// Check resources and shares before executing.
    pub authorization: bool,
    pub lock: LockConfig,
    pub permissions: CacheConfig,
    /// Expire orchestration state after this long without a commit.
    pub history_retention: Option<Duration>,
    /// Pause after a failed pull before trying again.
    pub retry_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            kinds: IdKind::ALL.to_vec(),
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            ack_wait: Duration::from_secs(30),
            max_deliver: None,
            authorization: false,
            lock: LockConfig::default(),
            permissions: CacheConfig::default(),
            history_retention: None,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl ConsumerConfig {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_authorization(mut self, enabled: bool) -> Self {
        self.authorization = enabled;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_kinds(mut self, kinds: Vec<IdKind>) -> Self {
        self.kinds = kinds;
        self
    }

    /// Interval at which in-flight deliveries report progress.
    pub fn heartbeat(&self) -> Duration {
        self.ack_wait / 3
    }

    /// The stream every event and deletion is published to.
    pub fn stream(&self) -> StreamConfig {
        StreamConfig::new(self.namespace.clone(), vec![format!("{}.>", self.namespace)])
    }

    /// Durable consumer for one kind.
    pub fn durable(&self, kind: IdKind) -> dphp_store::ConsumerConfig {
        let mut config = dphp_store::ConsumerConfig::new(
            format!("{}-{}", self.namespace, kind),
            vec![format!("{}.{}.>", self.namespace, kind)],
        );
        config.ack_wait = self.ack_wait;
        config.max_deliver = self.max_deliver;
        config
    }
}
