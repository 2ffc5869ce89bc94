//! Routing load gauges.
//!
//! A background task samples every routed pool and reports how connections are spread
//! between the primary and the replicas. Per pool it records:
//!
//! - `rwroute_db_pool_connections{pool, role, state}` with `state` one of `total`, `idle`, `in_use`
//! - `rwroute_db_pool_connections_max{pool, role}` (once, at startup)
//!
//! And across the roster:
//!
//! - `rwroute_routed_connections_in_use{role}`: in-use connections summed per role
//! - `rwroute_replica_in_use_spread`: busiest minus idlest replica, a round-robin skew signal

use std::time::Duration;

use metrics::gauge;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::routing::SourceRole;

#[derive(Debug, Clone)]
pub struct PoolMetricsConfig {
    pub sample_interval: Duration,
}

impl Default for PoolMetricsConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(5),
        }
    }
}

/// A pool with the name and routing role used to label it.
#[derive(Debug, Clone)]
pub struct LabeledPool {
    pub name: String,
    pub role: SourceRole,
    pub pool: PgPool,
}

/// Connection counts of one pool at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSample {
    pub total: u32,
    pub idle: usize,
    pub in_use: usize,
}

impl PoolSample {
    pub fn of(pool: &PgPool) -> Self {
        let total = pool.size();
        let idle = pool.num_idle();
        Self {
            total,
            idle,
            in_use: (total as usize).saturating_sub(idle),
        }
    }
}

/// In-use connections across the roster, split by role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoutingLoad {
    pub primary_in_use: usize,
    pub replica_in_use: usize,
    /// Busiest replica minus idlest replica (0 without replicas).
    pub replica_spread: usize,
}

impl RoutingLoad {
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = (SourceRole, &'a PoolSample)>) -> Self {
        let mut load = Self::default();
        let mut replica_bounds: Option<(usize, usize)> = None;

        for (role, sample) in samples {
            match role {
                SourceRole::Primary => load.primary_in_use += sample.in_use,
                SourceRole::Replica(_) => {
                    load.replica_in_use += sample.in_use;
                    let (low, high) = replica_bounds.get_or_insert((sample.in_use, sample.in_use));
                    *low = (*low).min(sample.in_use);
                    *high = (*high).max(sample.in_use);
                }
            }
        }

        load.replica_spread = replica_bounds.map_or(0, |(low, high)| high - low);
        load
    }
}

fn record(labeled: &LabeledPool, sample: &PoolSample) {
    let role = labeled.role.kind();
    let states = [
        ("total", sample.total as f64),
        ("idle", sample.idle as f64),
        ("in_use", sample.in_use as f64),
    ];
    for (state, value) in states {
        gauge!("rwroute_db_pool_connections", "pool" => labeled.name.clone(), "role" => role, "state" => state)
            .set(value);
    }
}

/// Sample pool state until `shutdown` is cancelled.
pub async fn run_pool_metrics_sampler(
    pools: Vec<LabeledPool>,
    config: PoolMetricsConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!(
        pools = pools.len(),
        interval = ?config.sample_interval,
        "Starting routing load sampler"
    );

    for labeled in &pools {
        let max = labeled.pool.options().get_max_connections();
        gauge!("rwroute_db_pool_connections_max", "pool" => labeled.name.clone(), "role" => labeled.role.kind())
            .set(max as f64);
    }

    let mut interval = tokio::time::interval(config.sample_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Routing load sampler shutting down");
                break;
            }
            _ = interval.tick() => {
                let samples: Vec<PoolSample> = pools.iter().map(|labeled| PoolSample::of(&labeled.pool)).collect();
                for (labeled, sample) in pools.iter().zip(&samples) {
                    record(labeled, sample);
                }

                let load = RoutingLoad::from_samples(pools.iter().map(|labeled| labeled.role).zip(&samples));
                gauge!("rwroute_routed_connections_in_use", "role" => "primary").set(load.primary_in_use as f64);
                gauge!("rwroute_routed_connections_in_use", "role" => "replica").set(load.replica_in_use as f64);
                gauge!("rwroute_replica_in_use_spread").set(load.replica_spread as f64);

                debug!(
                    primary_in_use = load.primary_in_use,
                    replica_in_use = load.replica_in_use,
                    replica_spread = load.replica_spread,
                    "Sampled routing load"
                );
            }
        }
    }

    Ok(())
}
