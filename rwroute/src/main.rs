use clap::Parser;
use rwroute::config::{Args, Config, DatabaseConfig};
use rwroute::db::DbPools;
use rwroute::db::pools::{PoolMetricsConfig, run_pool_metrics_sampler};
use rwroute::telemetry;
use tokio_util::sync::CancellationToken;
use tracing::info;

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

fn build_pools(section: &str, config: &DatabaseConfig) -> anyhow::Result<DbPools> {
    let pools = DbPools::from_config(config)?;
    for labeled in pools.labeled_pools() {
        info!(section, pool = %labeled.name, role = %labeled.role, "Routing roster entry");
    }
    info!(section, policy = ?pools.router().policy(), "Routing roster loaded");
    Ok(pools)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Exits non-zero on any configuration error, including an empty replica roster
    let config = Config::load(&args)?;

    if !args.validate {
        telemetry::init_telemetry()?;
        tracing::debug!("{:?}", args);
    }

    // Pools are lazy, so building them validates URLs without connecting
    let db = build_pools("database", &config.database)?;
    let log_db = config
        .log_database
        .as_ref()
        .map(|log| build_pools("log_database", log))
        .transpose()?;

    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    if !config.enable_pool_metrics {
        info!("Pool metrics disabled; nothing to run");
        return Ok(());
    }

    let mut pools = db.labeled_pools();
    if let Some(log_db) = &log_db {
        pools.extend(log_db.labeled_pools().into_iter().map(|mut labeled| {
            labeled.name = format!("log-{}", labeled.name);
            labeled
        }));
    }

    let shutdown = CancellationToken::new();
    let sampler = tokio::spawn(run_pool_metrics_sampler(
        pools,
        PoolMetricsConfig {
            sample_interval: config.pool_metrics_interval,
        },
        shutdown.clone(),
    ));

    shutdown_signal().await;
    shutdown.cancel();
    sampler.await??;

    db.close().await;
    if let Some(log_db) = log_db {
        log_db.close().await;
    }
    Ok(())
}
