//! Configuration for dphpd

use std::path::PathBuf;
use std::time::Duration;

use dphp_auth::CacheConfig;
use dphp_consumer::{ConsumerConfig, DEFAULT_NAMESPACE};
use dphp_state::LockConfig;
use dphp_types::IdKind;
use serde::{Deserialize, Serialize};

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Stream namespace
    #[serde(default = "default_project")]
    pub project: String,

    /// Script the executor loads before handling a call
    #[serde(default = "default_bootstrap")]
    pub bootstrap: String,

    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Days orchestration state is kept after its last change; 0 keeps it
    #[serde(default)]
    pub history_retention_days: u64,

    #[serde(default)]
    pub authz: AuthzConfig,

    #[serde(default)]
    pub consumers: ConsumersConfig,

    #[serde(default)]
    pub lock: LockSettings,

    #[serde(default)]
    pub permissions: PermissionsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            project: default_project(),
            bootstrap: default_bootstrap(),
            executor: ExecutorConfig::default(),
            history_retention_days: 0,
            authz: AuthzConfig::default(),
            consumers: ConsumersConfig::default(),
            lock: LockSettings::default(),
            permissions: PermissionsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Script runtime started for every call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_program")]
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Router script appended to the arguments; empty for none
    #[serde(default)]
    pub router: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
            router: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthzConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Base64 token secrets, newest last
    #[serde(default)]
    pub secrets: Vec<String>,
}

/// Which consumers to run and how hard to drive them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumersConfig {
    #[serde(default = "default_true")]
    pub activities: bool,

    #[serde(default = "default_true")]
    pub entities: bool,

    #[serde(default = "default_true")]
    pub orchestrations: bool,

    /// Messages in flight per consumer; 0 uses the number of CPUs
    #[serde(default)]
    pub concurrency: usize,

    #[serde(default = "default_ack_wait")]
    pub ack_wait_secs: u64,

    /// Deliveries before a message is dropped; 0 retries forever
    #[serde(default)]
    pub max_deliver: u32,
}

impl Default for ConsumersConfig {
    fn default() -> Self {
        Self {
            activities: true,
            entities: true,
            orchestrations: true,
            concurrency: 0,
            ack_wait_secs: default_ack_wait(),
            max_deliver: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    #[serde(default = "default_lock_ttl")]
    pub ttl_secs: u64,

    /// 0 waits until the lock is free
    #[serde(default)]
    pub acquire_timeout_secs: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_lock_ttl(),
            acquire_timeout_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsConfig {
    /// 0 keeps fetched policies until restart
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_project() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_bootstrap() -> String {
    "src/bootstrap.php".to_string()
}

fn default_program() -> String {
    "php".to_string()
}

fn default_true() -> bool {
    true
}

fn default_ack_wait() -> u64 {
    30
}

fn default_lock_ttl() -> u64 {
    300
}

fn default_cache_ttl() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn nonzero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file at `path`
    /// (`dphp.{json,toml,yaml}` when unset), then `DPHP_` variables.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        builder = builder.add_source(config::File::with_name(path.unwrap_or("dphp")).required(false));

        // Nested keys use a double underscore: DPHP_CONSUMERS__CONCURRENCY
        builder = builder.add_source(
            config::Environment::with_prefix("DPHP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// The bootstrap script as an absolute path.
    pub fn bootstrap_path(&self) -> std::io::Result<PathBuf> {
        let path = PathBuf::from(&self.bootstrap);
        if path.is_absolute() {
            return Ok(path);
        }
        Ok(std::env::current_dir()?.join(path))
    }

    pub fn kinds(&self) -> Vec<IdKind> {
        let enabled = [
            (IdKind::Activity, self.consumers.activities),
            (IdKind::Entity, self.consumers.entities),
            (IdKind::Orchestration, self.consumers.orchestrations),
        ];
        enabled
            .into_iter()
            .filter_map(|(kind, on)| on.then_some(kind))
            .collect()
    }

    pub fn history_retention(&self) -> Option<Duration> {
        (self.history_retention_days > 0)
            .then(|| Duration::from_secs(self.history_retention_days * 24 * 60 * 60))
    }

    /// Settings for the dispatch loop.
    pub fn consumer_config(&self) -> ConsumerConfig {
        let mut config = ConsumerConfig::default()
            .with_namespace(self.project.clone())
            .with_kinds(self.kinds())
            .with_authorization(self.authz.enabled);
        if self.consumers.concurrency > 0 {
            config = config.with_concurrency(self.consumers.concurrency);
        }
        config.ack_wait = Duration::from_secs(self.consumers.ack_wait_secs.max(1));
        config.max_deliver = (self.consumers.max_deliver > 0).then_some(self.consumers.max_deliver);
        config.lock = LockConfig {
            ttl: Duration::from_secs(self.lock.ttl_secs.max(1)),
            acquire_timeout: nonzero_secs(self.lock.acquire_timeout_secs),
        };
        config.permissions = CacheConfig {
            ttl: nonzero_secs(self.permissions.cache_ttl_secs),
        };
        config.history_retention = self.history_retention();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.project, "dphp");
        assert_eq!(config.bootstrap, "src/bootstrap.php");
        assert!(!config.authz.enabled);
        assert_eq!(config.kinds(), IdKind::ALL.to_vec());
        assert_eq!(config.history_retention(), None);
    }

    #[test]
    fn test_consumer_config_mapping() {
        let mut config = DaemonConfig::default();
        config.project = "shop".into();
        config.consumers.entities = false;
        config.consumers.concurrency = 3;
        config.consumers.max_deliver = 5;
        config.lock.acquire_timeout_secs = 10;
        config.permissions.cache_ttl_secs = 0;
        config.history_retention_days = 2;

        let consumer = config.consumer_config();
        assert_eq!(consumer.namespace, "shop");
        assert_eq!(consumer.kinds, vec![IdKind::Activity, IdKind::Orchestration]);
        assert_eq!(consumer.concurrency, 3);
        assert_eq!(consumer.max_deliver, Some(5));
        assert_eq!(consumer.lock.acquire_timeout, Some(Duration::from_secs(10)));
        assert_eq!(consumer.permissions.ttl, None);
        assert_eq!(
            consumer.history_retention,
            Some(Duration::from_secs(2 * 86_400))
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dphp.json");
        std::fs::write(
            &path,
            r#"{"project":"billing","authz":{"enabled":true,"secrets":["c2VjcmV0"]},
                "consumers":{"concurrency":2}}"#,
        )
        .unwrap();

        let config = DaemonConfig::load(path.to_str()).unwrap();
        assert_eq!(config.project, "billing");
        assert!(config.authz.enabled);
        assert_eq!(config.authz.secrets, vec!["c2VjcmV0".to_string()]);
        assert_eq!(config.consumers.concurrency, 2);
        assert!(config.consumers.entities);
        assert_eq!(config.lock.ttl_secs, 300);
    }

    #[test]
    fn test_relative_bootstrap_is_resolved() {
        let config = DaemonConfig::default();
        let path = config.bootstrap_path().unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("src/bootstrap.php"));
    }
}
