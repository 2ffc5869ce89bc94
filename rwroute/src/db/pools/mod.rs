//! SQLx pools wired into the router.
//!
//! This module provides [`DbPools`], which builds one lazily-connected `PgPool` per configured
//! endpoint and hands them to a [`ConnectionRouter`].
//!
//! # Architecture
//!
//! ```text
//!        ┌─────────────┐
//!        │   DbPools   │
//!        └──────┬──────┘
//!               │ RoutedPools<PgPool>
//!        ┌──────┴──────────────┐
//!        ↓                     ↓
//!   ┌─────────┐   ┌──────────────────────────┐
//!   │ Primary │   │ Replica 1 .. Replica N   │ (round robin)
//!   └─────────┘   └──────────────────────────┘
//! ```
//!
//! # Usage
//!
//! `DbPools` implements `Deref<Target = RoutedPools<PgPool>>`:
//! - Use `.connection()` inside a [`crate::routing::UnitOfWork`] for implicit routing
//! - Use `.read()` / `.write()` to pick a pool by hand
//!
//! ```ignore
//! let db = DbPools::from_config(&config.database)?;
//!
//! let count: (i64,) = UnitOfWork::read_only()
//!     .run(async {
//!         let mut conn = db.connection();
//!         sqlx::query_as("SELECT count(*) FROM users").fetch_one(&mut **conn.acquire().await?).await
//!     })
//!     .await?;
//! ```

pub mod metrics;

use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::ops::Deref;
use tracing::info;

use crate::config::{DatabaseConfig, EndpointConfig, PoolSettings};
use crate::errors::{Error, Result};
use crate::routing::{ConnectionRouter, RoutedPools, SourceRole};

pub use metrics::{LabeledPool, PoolMetricsConfig, PoolSample, RoutingLoad, run_pool_metrics_sampler};

/// Build one pool for an endpoint without opening any connection.
///
/// The pool name is reported to PostgreSQL as `application_name`.
pub fn build_pool(name: &str, endpoint: &EndpointConfig, settings: &PoolSettings) -> Result<PgPool> {
    let options: PgConnectOptions = endpoint
        .url
        .parse()
        .map_err(|e| Error::configuration(format!("{name}: invalid connection url: {e}")))?;

    Ok(PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout())
        .idle_timeout(settings.idle_timeout())
        .max_lifetime(settings.max_lifetime())
        .connect_lazy_with(options.application_name(name)))
}

/// Named primary and replica pools behind a router.
#[derive(Clone, Debug)]
pub struct DbPools {
    routed: RoutedPools<PgPool>,
    /// Pool names: primary first, then replicas in roster order
    names: Vec<String>,
}

impl DbPools {
    /// Create pools and router from configuration.
    ///
    /// Fails on unparsable URLs and on an empty roster under
    /// [`crate::routing::ReadRoutingPolicy::Replicas`].
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let primary_name = config.primary_name();
        let primary = build_pool(&primary_name, &config.primary, config.primary_pool_settings())?;

        let mut names = vec![primary_name];
        let mut replicas = Vec::with_capacity(config.replicas.len());
        for (index, replica) in config.replicas.iter().enumerate() {
            let name = config.replica_name(index);
            replicas.push(build_pool(&name, replica, config.replica_pool_settings(replica))?);
            names.push(name);
        }

        let router = ConnectionRouter::new(primary, replicas, config.read_policy)?;
        info!(primary = %names[0], replicas = ?&names[1..], "Database pools created (connections open on first use)");

        Ok(Self {
            routed: RoutedPools::new(router),
            names,
        })
    }

    /// Name of the pool behind a resolved role, or `None` for a replica index this
    /// roster does not have.
    pub fn pool_name(&self, role: SourceRole) -> Option<&str> {
        let position = match role {
            SourceRole::Primary => 0,
            SourceRole::Replica(index) => index.checked_add(1)?,
        };
        self.names.get(position).map(String::as_str)
    }

    /// Every pool with its name and role, primary first.
    pub fn labeled_pools(&self) -> Vec<LabeledPool> {
        let router = self.routed.router();
        let roles = std::iter::once(SourceRole::Primary).chain((0..router.replicas().len()).map(SourceRole::Replica));
        std::iter::once(router.primary())
            .chain(router.replicas())
            .zip(roles)
            .zip(&self.names)
            .map(|((pool, role), name)| LabeledPool {
                name: name.clone(),
                role,
                pool: pool.clone(),
            })
            .collect()
    }

    /// Close all database connections.
    pub async fn close(&self) {
        for labeled in self.labeled_pools() {
            labeled.pool.close().await;
        }
    }
}

/// Dereferences to the routed pools.
///
/// This allows natural usage like `db.connection()`, `db.read()` or `db.write()`.
impl Deref for DbPools {
    type Target = RoutedPools<PgPool>;

    fn deref(&self) -> &Self::Target {
        &self.routed
    }
}

/// Lets `DbPools` stand in wherever a plain read/write pool provider is expected.
///
/// `read()` advances the replica rotation like [`RoutedPools::read`].
impl sqlx_pool_router::PoolProvider for DbPools {
    fn read(&self) -> &PgPool {
        self.routed.read()
    }

    fn write(&self) -> &PgPool {
        self.routed.write()
    }
}
