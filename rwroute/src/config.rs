//! Routing configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `RWROUTE_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `RWROUTE_` override YAML values
//! 3. **DATABASE_URL** - Special case: overrides `database.primary.url` if set
//! 4. **DATABASE_REPLICA_URLS** - Special case: comma-separated list replacing `database.replicas`
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `RWROUTE_DATABASE__READ_POLICY=primary_fallback` sets the `database.read_policy` field.
//!
//! ## Example
//!
//! ```yaml
//! database:
//!   primary:
//!     url: postgres://app@primary:5432/app
//!   replicas:
//!     - url: postgres://app@replica-1:5432/app
//!     - name: reporting
//!       url: postgres://app@replica-2:5432/app
//!       pool:
//!         max_connections: 4
//!   pool:
//!     max_connections: 20
//! ```
//!
//! Startup fails when `database.read_policy` is `replicas` (the default) and no replicas are
//! configured. Set it to `primary_fallback` to knowingly send read-only work to the primary.

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::errors::Error;
use crate::routing::ReadRoutingPolicy;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "RWROUTE_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without sampling pool metrics.
    /// Useful for CI/CD pipelines to catch config errors before deployment.
    #[arg(long)]
    pub validate: bool,
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Optional: primary URL override, set via DATABASE_URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// Optional: comma-separated replica URLs, set via DATABASE_REPLICA_URLS
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_replica_urls: Option<String>,
    /// Main database: one primary and its replicas
    pub database: DatabaseConfig,
    /// Optional separate log database with its own primary/replica split
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_database: Option<DatabaseConfig>,
    /// Periodically record pool gauges through the `metrics` facade
    pub enable_pool_metrics: bool,
    /// How often pool gauges are sampled
    #[serde(with = "humantime_serde")]
    pub pool_metrics_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            database_replica_urls: None,
            database: DatabaseConfig::default(),
            log_database: None,
            enable_pool_metrics: false,
            pool_metrics_interval: Duration::from_secs(5),
        }
    }
}

/// Individual pool configuration with all SQLx parameters.
///
/// These settings control connection pool behavior for optimal performance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections to maintain
    pub min_connections: u32,
    /// Maximum time to wait for a connection (seconds)
    pub acquire_timeout_secs: u64,
    /// Time before idle connections are closed (seconds, 0 = never)
    pub idle_timeout_secs: u64,
    /// Maximum lifetime of a connection (seconds, 0 = never)
    pub max_lifetime_secs: u64,
}

impl Default for PoolSettings {
    /// Production defaults: balanced for reliability and resource usage
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,  // 10 minutes
            max_lifetime_secs: 1800, // 30 minutes
        }
    }
}

impl PoolSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        (self.max_lifetime_secs > 0).then(|| Duration::from_secs(self.max_lifetime_secs))
    }

    fn validate(&self, pool: &str) -> Result<(), Error> {
        if self.max_connections == 0 {
            return Err(Error::configuration(format!("{pool}: max_connections must be at least 1")));
        }
        if self.min_connections > self.max_connections {
            return Err(Error::configuration(format!(
                "{pool}: min_connections ({}) cannot be greater than max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

/// One data-store endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    /// Pool name used in logs, metrics and `application_name` (defaults by role)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// PostgreSQL connection URL
    pub url: String,
    /// Pool settings for this endpoint only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolSettings>,
}

impl EndpointConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            name: None,
            url: url.into(),
            pool: None,
        }
    }
}

/// A primary and its read replicas.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// The single endpoint that accepts writes
    pub primary: EndpointConfig,
    /// Read replicas, selected round robin for read-only units of work
    pub replicas: Vec<EndpointConfig>,
    /// Behaviour of read-only work when `replicas` is empty
    pub read_policy: ReadRoutingPolicy,
    /// Pool settings for the primary (and replicas if not specified)
    pub pool: PoolSettings,
    /// Optional separate pool settings for replica connections
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica_pool: Option<PoolSettings>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            primary: EndpointConfig::new("postgres://localhost:5432/rwroute"),
            replicas: Vec::new(),
            read_policy: ReadRoutingPolicy::default(),
            pool: PoolSettings::default(),
            replica_pool: None,
        }
    }
}

impl DatabaseConfig {
    pub fn primary_name(&self) -> String {
        self.primary.name.clone().unwrap_or_else(|| "primary".to_string())
    }

    /// Name of the replica at `index` (zero-based); unnamed replicas are `replica-1`, `replica-2`, ...
    pub fn replica_name(&self, index: usize) -> String {
        self.replicas
            .get(index)
            .and_then(|replica| replica.name.clone())
            .unwrap_or_else(|| format!("replica-{}", index + 1))
    }

    pub fn primary_pool_settings(&self) -> &PoolSettings {
        self.primary.pool.as_ref().unwrap_or(&self.pool)
    }

    /// Settings for one replica: its own, then `replica_pool`, then `pool`.
    pub fn replica_pool_settings<'a>(&'a self, replica: &'a EndpointConfig) -> &'a PoolSettings {
        replica
            .pool
            .as_ref()
            .or(self.replica_pool.as_ref())
            .unwrap_or(&self.pool)
    }

    /// Validate one primary/replica group; `section` prefixes error messages.
    pub fn validate(&self, section: &str) -> Result<(), Error> {
        validate_url(&format!("{section}.primary"), &self.primary.url)?;
        self.primary_pool_settings().validate(&format!("{section}.primary.pool"))?;

        for (index, replica) in self.replicas.iter().enumerate() {
            let label = format!("{section}.replicas[{index}]");
            validate_url(&label, &replica.url)?;
            self.replica_pool_settings(replica).validate(&format!("{label}.pool"))?;
        }

        if self.replicas.is_empty() && self.read_policy == ReadRoutingPolicy::Replicas {
            return Err(Error::configuration(format!(
                "{section}: read routing is enabled but no replicas are configured. \
                 Add replicas or set {section}.read_policy to primary_fallback."
            )));
        }

        Ok(())
    }
}

fn validate_url(label: &str, url: &str) -> Result<(), Error> {
    if url.trim().is_empty() {
        return Err(Error::configuration(format!("{label}: url is required")));
    }

    let parsed = Url::parse(url).map_err(|e| Error::configuration(format!("{label}: invalid url: {e}")))?;
    if !matches!(parsed.scheme(), "postgres" | "postgresql") {
        return Err(Error::configuration(format!(
            "{label}: unsupported scheme '{}', expected postgres:// or postgresql://",
            parsed.scheme()
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file and environment, then validate it.
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        // DATABASE_URL replaces only the primary URL, keeping its name and pool settings
        if let Some(url) = config.database_url.take() {
            config.database.primary.url = url;
        }

        if let Some(urls) = config.database_replica_urls.take() {
            config.database.replicas = urls
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(EndpointConfig::new)
                .collect();
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        self.database.validate("database")?;

        if let Some(log_database) = &self.log_database {
            log_database.validate("log_database")?;
        }

        if self.enable_pool_metrics && self.pool_metrics_interval.is_zero() {
            return Err(Error::configuration("pool_metrics_interval must be greater than zero"));
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("RWROUTE_").ignore(&["CONFIG"]).split("__"))
            // Common DATABASE_URL pattern, plus the replica list
            .merge(Env::raw().only(&["DATABASE_URL", "DATABASE_REPLICA_URLS"]))
    }
}
