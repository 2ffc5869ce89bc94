//! # rwroute: read/write-split connection routing
//!
//! `rwroute` sends each unit of database work either to a writable primary or to one of
//! several read-only replicas, based on whether the work was declared read-only.
//!
//! ## Overview
//!
//! Application code declares intent once per unit of work with [`UnitOfWork`]. Code that
//! runs inside the unit asks [`RoutedPools::connection`] for a connection without naming a
//! pool; the router looks up the innermost declaration and picks the primary for writes or
//! the next replica (round robin) for reads. Undeclared work always goes to the primary.
//!
//! Connections are checked out lazily: the decision is read and the pool touched only when
//! the first statement needs a connection, and the connection stays bound to that pool
//! until it is released.
//!
//! ## Layout
//!
//! - [`routing`]: decisions, the task-scoped routing context, the replica balancer, the
//!   router, lazy connections and units of work
//! - [`source`]: the [`ConnectionSource`] seam over anything that hands out connections
//! - [`db`]: sqlx `PgPool`s built from configuration, plus pool metrics
//! - [`config`]: YAML + environment configuration
//! - [`telemetry`]: tracing setup
//!
//! ## Example
//!
//! ```ignore
//! let config = Config::load(&args)?;
//! let db = DbPools::from_config(&config.database)?;
//!
//! let users: Vec<User> = UnitOfWork::read_only()
//!     .run(async {
//!         let mut conn = db.connection();
//!         sqlx::query_as("SELECT * FROM users").fetch_all(&mut **conn.acquire().await?).await
//!     })
//!     .await?;
//! ```

pub mod config;
pub mod db;
pub mod errors;
pub mod routing;
pub mod source;
pub mod telemetry;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::Config;
pub use db::DbPools;
pub use errors::{Error, Result};
pub use routing::{
    ConnectionRouter, LazyConnection, ReadRoutingPolicy, RoutedPools, RoutingContext, RoutingDecision, UnitOfWork,
    UnitOfWorkInterceptor,
};
pub use source::ConnectionSource;
