//! # Configuration Management
//!
//! This module holds the configuration for a pool of backend connections.
//! Configuration can be built in code or loaded from a file and covers:
//! - Backend address (host/port)
//! - Backend-specific connection options (auth, database, timeouts)
//! - Pool sizing and idle reaping
//! - Pool event logging
//!
//! ## Example Configuration File (pool.toml)
//! ```toml
//! host = "127.0.0.1"
//! port = 6379
//! max = 8
//! idle_timeout_millis = 10000
//! reap_interval_millis = 1000
//! log = true
//!
//! [options]
//! database = 2
//! connect_timeout_millis = 2000
//! ```
//!
//! Any field may be omitted. Zero or empty values count as omitted and are
//! replaced by the defaults, so `max = 0` yields a pool of four connections.

use config::{Config as ConfigLib, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default backend host
pub const DEFAULT_HOST: &str = "localhost";
/// Default backend port
pub const DEFAULT_PORT: u16 = 6379;
/// Default maximum number of pooled connections
pub const DEFAULT_MAX: u32 = 4;
/// Default idle time after which a pooled connection is reaped
pub const DEFAULT_IDLE_TIMEOUT_MILLIS: u64 = 10_000;
/// Default interval between reaper runs
pub const DEFAULT_REAP_INTERVAL_MILLIS: u64 = 1_000;

const DEFAULT_CONNECT_TIMEOUT_MILLIS: u64 = 5_000;
const DEFAULT_ACQUIRE_TIMEOUT_MILLIS: u64 = 30_000;

/// Environment variable that overrides `options.password` when loading from a file.
pub const PASSWORD_ENV: &str = "KV_POOL_PASSWORD";

/// Backend-specific options applied to every connection the pool opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendOptions {
    /// Password sent with `AUTH` during the handshake
    pub password: Option<String>,

    /// ACL user name, only used together with `password`
    pub username: Option<String>,

    /// Logical database selected with `SELECT` after connecting (0 skips the command)
    pub database: u32,

    /// Name registered with `CLIENT SETNAME`
    pub client_name: Option<String>,

    /// Upper bound on TCP connect plus handshake
    pub connect_timeout_millis: u64,

    /// Upper bound on a single command round-trip; 0 disables the limit
    pub command_timeout_millis: u64,

    /// How long a caller waits for a pooled connection before giving up
    pub acquire_timeout_millis: u64,

    /// Set TCP_NODELAY on new sockets
    pub nodelay: bool,

    /// Send `PING` on every checkout and discard connections that fail it
    pub test_on_checkout: bool,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            password: None,
            username: None,
            database: 0,
            client_name: None,
            connect_timeout_millis: DEFAULT_CONNECT_TIMEOUT_MILLIS,
            command_timeout_millis: 0,
            acquire_timeout_millis: DEFAULT_ACQUIRE_TIMEOUT_MILLIS,
            nodelay: true,
            test_on_checkout: false,
        }
    }
}

impl BackendOptions {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_millis)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        match self.command_timeout_millis {
            0 => None,
            millis => Some(Duration::from_millis(millis)),
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_millis)
    }

    fn normalize(&mut self) {
        if self.connect_timeout_millis == 0 {
            self.connect_timeout_millis = DEFAULT_CONNECT_TIMEOUT_MILLIS;
        }
        if self.acquire_timeout_millis == 0 {
            self.acquire_timeout_millis = DEFAULT_ACQUIRE_TIMEOUT_MILLIS;
        }
        if self.password.as_deref() == Some("") {
            self.password = None;
        }
        if self.username.as_deref() == Some("") {
            self.username = None;
        }
        if self.client_name.as_deref() == Some("") {
            self.client_name = None;
        }
    }
}

/// Configuration for a pool of connections to a single backend server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Backend host name or IP address
    pub host: String,

    /// Backend TCP port
    pub port: u16,

    /// Options passed through to every new connection
    pub options: BackendOptions,

    /// Maximum number of connections, idle and in use together
    pub max: u32,

    /// Idle connections older than this are destroyed by the reaper
    pub idle_timeout_millis: u64,

    /// How often the reaper looks for idle connections
    pub reap_interval_millis: u64,

    /// Log every acquisition and release at info level
    pub log: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            options: BackendOptions::default(),
            max: DEFAULT_MAX,
            idle_timeout_millis: DEFAULT_IDLE_TIMEOUT_MILLIS,
            reap_interval_millis: DEFAULT_REAP_INTERVAL_MILLIS,
            log: false,
        }
    }
}

impl PoolConfig {
    /// Configuration for the given backend address with every other field defaulted.
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Load configuration from a file (TOML, YAML or JSON by extension).
    ///
    /// Missing fields take their defaults. When `KV_POOL_PASSWORD` is set it
    /// replaces `options.password`, so secrets can stay out of the file.
    ///
    /// # Example
    /// ```rust,no_run
    /// use std::path::Path;
    /// use kv_pool::PoolConfig;
    /// let config = PoolConfig::load(Path::new("pool.toml"))?;
    /// # Ok::<(), kv_pool::Error>(())
    /// ```
    pub fn load(path: &Path) -> Result<Self> {
        let settings = ConfigLib::builder().add_source(File::from(path)).build()?;

        let mut config: PoolConfig = settings.try_deserialize()?;
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            config.options.password = Some(password);
        }
        Ok(config.with_defaults())
    }

    /// Replace zero or empty fields with their defaults.
    pub fn with_defaults(mut self) -> Self {
        if self.host.is_empty() {
            self.host = DEFAULT_HOST.to_string();
        }
        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }
        if self.max == 0 {
            self.max = DEFAULT_MAX;
        }
        if self.idle_timeout_millis == 0 {
            self.idle_timeout_millis = DEFAULT_IDLE_TIMEOUT_MILLIS;
        }
        if self.reap_interval_millis == 0 {
            self.reap_interval_millis = DEFAULT_REAP_INTERVAL_MILLIS;
        }
        self.options.normalize();
        self
    }

    /// Check the configuration after defaults have been applied.
    pub fn validate(&self) -> Result<()> {
        if self.host.chars().any(char::is_whitespace) {
            return Err(Error::config(format!("invalid host '{}'", self.host)));
        }
        if self.options.username.is_some() && self.options.password.is_none() {
            return Err(Error::config("username requires a password"));
        }
        Ok(())
    }

    /// `host:port` of the backend
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Pool name used in log lines, e.g. `redis://localhost:6379`
    pub fn pool_name(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_millis)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_millis)
    }
}
