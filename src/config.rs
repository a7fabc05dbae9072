use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

/// Command line options for the presence server.
#[derive(Parser, Debug, Default)]
pub struct Cli {
    /// Override bind address (host:port).
    #[arg(long)]
    pub bind: Option<String>,
    /// Override server port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Override the Redis connection URL.
    #[arg(long)]
    pub redis_url: Option<String>,
    /// Enable or disable logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Which backend holds the presence keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis instance, the normal multi-process deployment.
    Redis,
    /// In-process map with TTL emulation, for tests and single-process use.
    Memory,
}

/// Runtime configuration resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind: String,
    /// Presence key backend.
    pub store: StoreBackend,
    /// Redis connection URL, used when the backend is `redis`.
    pub redis_url: String,
    /// Prefix for presence keys in the store.
    pub namespace: String,
    /// Seconds before an unrefreshed presence key expires on its own.
    pub ttl_seconds: u64,
    /// Minimum seconds between store writes for the same user. Zero disables
    /// throttling.
    pub throttle_seconds: u64,
    /// Interval between client heartbeats in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Track the current user on every request instead of relying on the
    /// browser heartbeat.
    pub auto_hook: bool,
    /// Serve the browser heartbeat script and rely on beacon-driven tracking.
    pub activity_only: bool,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    store: FileStore,
    #[serde(default)]
    presence: FilePresence,
    #[serde(default)]
    logging: FileLogging,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_port")]
    port: u16,
}

#[derive(Deserialize)]
struct FileStore {
    #[serde(default = "default_backend")]
    backend: StoreBackend,
    #[serde(default = "default_redis_url")]
    url: String,
    #[serde(default = "default_namespace")]
    namespace: String,
}

#[derive(Deserialize)]
struct FilePresence {
    #[serde(default = "default_ttl")]
    ttl_seconds: u64,
    #[serde(default = "default_throttle")]
    throttle_seconds: u64,
    #[serde(default = "default_heartbeat_interval")]
    heartbeat_interval_ms: u64,
    #[serde(default)]
    auto_hook: bool,
    #[serde(default = "default_activity_only")]
    activity_only: bool,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

fn default_port() -> u16 {
    8989
}

fn default_backend() -> StoreBackend {
    StoreBackend::Redis
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".into()
}

fn default_namespace() -> String {
    "whoisonline:user".into()
}

fn default_ttl() -> u64 {
    90
}

fn default_throttle() -> u64 {
    30
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

fn default_activity_only() -> bool {
    true
}

fn default_logging() -> bool {
    true
}

impl Default for FileServer {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_redis_url(),
            namespace: default_namespace(),
        }
    }
}

impl Default for FilePresence {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl(),
            throttle_seconds: default_throttle(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            auto_hook: false,
            activity_only: default_activity_only(),
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: format!("127.0.0.1:{}", default_port()),
            store: default_backend(),
            redis_url: default_redis_url(),
            namespace: default_namespace(),
            ttl_seconds: default_ttl(),
            throttle_seconds: default_throttle(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            auto_hook: false,
            activity_only: default_activity_only(),
            logging_enabled: default_logging(),
        }
    }
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and
    /// defaults, in that order of precedence.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut cfg = Config::default();
        let mut port = default_port();

        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("WHOISONLINE_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/whoisonline.toml"));

        if let Ok(bytes) = fs::read(&config_path) {
            let contents = String::from_utf8_lossy(&bytes);
            let file_cfg: FileConfig = toml::from_str(&contents).context("invalid config file")?;
            port = file_cfg.server.port;
            cfg.store = file_cfg.store.backend;
            cfg.redis_url = file_cfg.store.url;
            cfg.namespace = file_cfg.store.namespace;
            cfg.ttl_seconds = file_cfg.presence.ttl_seconds;
            cfg.throttle_seconds = file_cfg.presence.throttle_seconds;
            cfg.heartbeat_interval_ms = file_cfg.presence.heartbeat_interval_ms;
            cfg.auto_hook = file_cfg.presence.auto_hook;
            cfg.activity_only = file_cfg.presence.activity_only;
            cfg.logging_enabled = file_cfg.logging.enabled;
        }

        // environment overrides
        if let Ok(p) = std::env::var("WHOISONLINE_PORT") {
            if let Ok(p) = p.parse::<u16>() {
                port = p;
            }
        }
        if let Ok(l) = std::env::var("WHOISONLINE_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                cfg.logging_enabled = l;
            }
        }
        if let Ok(s) = std::env::var("WHOISONLINE_STORE") {
            cfg.store = match s.as_str() {
                "redis" => StoreBackend::Redis,
                "memory" => StoreBackend::Memory,
                _ => anyhow::bail!("invalid_store_backend"),
            };
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            cfg.redis_url = url;
        }

        // CLI overrides
        if let Some(p) = cli.port {
            port = p;
        }
        if let Some(l) = cli.logging {
            cfg.logging_enabled = l;
        }
        if let Some(url) = &cli.redis_url {
            cfg.redis_url = url.clone();
        }

        // validate port range
        if !(1024..=65535).contains(&port) {
            anyhow::bail!("invalid_port");
        }
        // a key that never expires would leave ghosts online forever
        if cfg.ttl_seconds == 0 {
            anyhow::bail!("invalid_ttl");
        }

        // bind address precedence for host override
        cfg.bind = if let Some(b) = &cli.bind {
            b.clone()
        } else if let Ok(b) = std::env::var("BIND") {
            b
        } else {
            format!("127.0.0.1:{}", port)
        };

        Ok(cfg)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_secs(self.throttle_seconds)
    }
}
