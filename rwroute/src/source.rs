//! The pool collaborator seam.
//!
//! The routing layer never sizes, health-checks or retries pools; it only asks a selected
//! source for one connection. Releasing is dropping: a checked-out connection returns
//! to its originating pool when it goes out of scope.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};

/// A pooled connection source: the primary or one replica.
#[async_trait]
pub trait ConnectionSource: Send + Sync + 'static {
    /// Connection handed out by the pool. Dropping it releases it back to the pool.
    type Connection: Send;

    /// The pool's own checkout error (exhaustion, timeout, connect failure).
    type Error: std::error::Error + Send + Sync + 'static;

    /// Checks a physical connection out of the pool, waiting up to the pool's own timeout.
    async fn checkout(&self) -> Result<Self::Connection, Self::Error>;
}

#[async_trait]
impl ConnectionSource for PgPool {
    type Connection = PoolConnection<Postgres>;
    type Error = sqlx::Error;

    async fn checkout(&self) -> Result<Self::Connection, Self::Error> {
        self.acquire().await
    }
}
