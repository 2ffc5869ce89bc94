//! Tracing setup.
//!
//! Log verbosity follows `RUST_LOG` (default `info`). Routing decisions are logged at
//! `trace`, unit-of-work boundaries at `debug`:
//!
//! ```bash
//! RUST_LOG=info,rwroute::routing=trace rwroute -f config.yaml
//! ```

use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the global subscriber (env filter + console output).
///
/// Fails if a global subscriber is already set.
pub fn init_telemetry() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    info!("Telemetry initialized");
    Ok(())
}
