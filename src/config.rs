use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub protection: ProtectionConfig,
    #[serde(default)]
    pub dump: DumpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Cluster member id; defaults to the host name.
    pub id: Option<String>,
    /// Node-local directory for heap dump files.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: None,
            cache_dir: default_cache_dir(),
        }
    }
}

fn default_cache_dir() -> String {
    "data/cache".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Max history length per queue. Accepts an integer or a string-encoded integer.
    #[serde(default = "default_dataset_size", deserialize_with = "int_or_string")]
    pub dataset_size: usize,
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,
    /// How often to log app stats at INFO level.
    #[serde(default = "default_stats_log_interval_secs")]
    pub stats_log_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            dataset_size: default_dataset_size(),
            update_interval_secs: default_update_interval_secs(),
            stats_log_interval_secs: default_stats_log_interval_secs(),
        }
    }
}

fn default_dataset_size() -> usize {
    120
}

fn default_update_interval_secs() -> u64 {
    60
}

fn default_stats_log_interval_secs() -> u64 {
    300
}

fn int_or_string<'de, D: Deserializer<'de>>(d: D) -> Result<usize, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(usize),
        Str(String),
    }
    match Raw::deserialize(d)? {
        Raw::Int(n) => Ok(n),
        Raw::Str(s) => s
            .trim()
            .parse()
            .map_err(|e| serde::de::Error::custom(format!("invalid integer {:?}: {}", s, e))),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Upper bound for one cross-node request/reply exchange.
    #[serde(default = "default_exchange_timeout_secs")]
    pub exchange_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            exchange_timeout_secs: default_exchange_timeout_secs(),
        }
    }
}

fn default_exchange_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    /// Where aggregated metrics go; publishing is off when unset.
    pub destination: Option<String>,
    #[serde(default = "default_publish_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_publish_initial_delay_secs")]
    pub initial_delay_secs: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            destination: None,
            interval_secs: default_publish_interval_secs(),
            initial_delay_secs: default_publish_initial_delay_secs(),
        }
    }
}

fn default_publish_interval_secs() -> u64 {
    60
}

fn default_publish_initial_delay_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProtectionConfig {
    #[serde(default = "default_protection_interval_secs")]
    pub interval_secs: u64,
    /// Optional cron expression (local time); overrides interval_secs.
    pub schedule: Option<String>,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_protection_interval_secs(),
            schedule: None,
        }
    }
}

fn default_protection_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct DumpConfig {
    /// Bytes per content read when streaming a heap dump.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Give up waiting for heap dump completion after this long.
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            poll_interval_ms: default_poll_interval_ms(),
            max_wait_secs: default_max_wait_secs(),
        }
    }
}

fn default_chunk_size() -> u32 {
    1 << 30
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_wait_secs() -> u64 {
    600
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            self.node.id.as_deref().is_none_or(|id| !id.trim().is_empty()),
            "node.id must be non-empty when set"
        );
        anyhow::ensure!(
            !self.node.cache_dir.is_empty(),
            "node.cache_dir must be non-empty"
        );
        anyhow::ensure!(
            self.monitor.dataset_size > 0,
            "monitor.dataset_size must be > 0, got {}",
            self.monitor.dataset_size
        );
        anyhow::ensure!(
            self.monitor.update_interval_secs > 0,
            "monitor.update_interval_secs must be > 0, got {}",
            self.monitor.update_interval_secs
        );
        anyhow::ensure!(
            self.monitor.stats_log_interval_secs > 0,
            "monitor.stats_log_interval_secs must be > 0, got {}",
            self.monitor.stats_log_interval_secs
        );
        anyhow::ensure!(
            self.cluster.exchange_timeout_secs > 0,
            "cluster.exchange_timeout_secs must be > 0, got {}",
            self.cluster.exchange_timeout_secs
        );
        if self.publisher.destination.is_some() {
            anyhow::ensure!(
                self.publisher.interval_secs > 0,
                "publisher.interval_secs must be > 0, got {}",
                self.publisher.interval_secs
            );
        }
        match &self.protection.schedule {
            Some(expr) => {
                <cron::Schedule as std::str::FromStr>::from_str(expr).map_err(|e| {
                    anyhow::anyhow!("protection.schedule is not a valid cron expression: {}", e)
                })?;
            }
            None => anyhow::ensure!(
                self.protection.interval_secs > 0,
                "protection.interval_secs must be > 0, got {}",
                self.protection.interval_secs
            ),
        }
        anyhow::ensure!(
            self.dump.chunk_size > 0,
            "dump.chunk_size must be > 0, got {}",
            self.dump.chunk_size
        );
        anyhow::ensure!(
            self.dump.poll_interval_ms > 0,
            "dump.poll_interval_ms must be > 0, got {}",
            self.dump.poll_interval_ms
        );
        anyhow::ensure!(
            self.dump.max_wait_secs > 0,
            "dump.max_wait_secs must be > 0, got {}",
            self.dump.max_wait_secs
        );
        Ok(())
    }
}
