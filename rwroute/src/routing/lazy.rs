//! Deferred connection checkout.
//!
//! [`RoutedPools::connection`] hands out a [`LazyConnection`] straight away without touching
//! any pool. The first [`LazyConnection::acquire`] resolves the source once, checks out
//! one connection and binds to it; every later call reuses that connection. Units of work
//! that never reach their first statement never consume pool capacity.
//!
//! ```ignore
//! let users = UnitOfWork::read_only()
//!     .run(async {
//!         let mut conn = pools.connection();
//!         // checkout happens here, against a replica
//!         sqlx::query_as::<_, User>("SELECT * FROM users").fetch_all(&mut **conn.acquire().await?).await
//!     })
//!     .await?;
//! ```

use std::sync::Arc;

use metrics::counter;
use tracing::trace;

use super::decision::RoutingDecision;
use super::router::{ConnectionRouter, SourceRole};
use crate::source::ConnectionSource;

/// Cheap-to-clone handle to a primary and its replicas.
///
/// This is what application state holds. Routing is implicit through
/// [`RoutedPools::connection`]; [`RoutedPools::read`] and [`RoutedPools::write`] are
/// available for callers that pick a pool by hand.
#[derive(Debug)]
pub struct RoutedPools<S> {
    router: Arc<ConnectionRouter<S>>,
}

impl<S> Clone for RoutedPools<S> {
    fn clone(&self) -> Self {
        Self {
            router: self.router.clone(),
        }
    }
}

impl<S: ConnectionSource> RoutedPools<S> {
    pub fn new(router: ConnectionRouter<S>) -> Self {
        Self {
            router: Arc::new(router),
        }
    }

    /// A connection that is checked out on first use, from the source chosen at that moment.
    pub fn connection(&self) -> LazyConnection<S> {
        LazyConnection {
            router: self.router.clone(),
            bound: None,
        }
    }

    /// The next read source: a replica, or the primary under primary fallback.
    pub fn read(&self) -> &S {
        self.router.resolve_for(RoutingDecision::Read).source
    }

    /// The primary.
    pub fn write(&self) -> &S {
        self.router.primary()
    }

    pub fn has_replicas(&self) -> bool {
        self.router.has_replicas()
    }

    pub fn router(&self) -> &ConnectionRouter<S> {
        &self.router
    }
}

struct BoundConnection<C> {
    role: SourceRole,
    connection: C,
}

/// A connection whose checkout is deferred until it is first used.
///
/// Once bound, the connection stays tied to the same source for its whole lifetime.
/// Dropping it (or calling [`LazyConnection::release`]) returns a bound connection to
/// its originating pool.
pub struct LazyConnection<S: ConnectionSource> {
    router: Arc<ConnectionRouter<S>>,
    bound: Option<BoundConnection<S::Connection>>,
}

impl<S: ConnectionSource> LazyConnection<S> {
    /// Returns the bound connection, checking one out on the first call.
    ///
    /// Checkout errors are the pool's own and are returned unchanged. After a failed
    /// checkout nothing is bound, so the next call resolves again.
    pub async fn acquire(&mut self) -> Result<&mut S::Connection, S::Error> {
        let bound = match self.bound.take() {
            Some(bound) => bound,
            None => {
                let resolved = self.router.resolve();
                let role = resolved.role;
                let connection = resolved.source.checkout().await?;

                counter!("rwroute_checkouts_total", "role" => role.kind()).increment(1);
                trace!(%role, "Checked out connection");
                BoundConnection { role, connection }
            }
        };

        Ok(&mut self.bound.insert(bound).connection)
    }

    /// Whether a physical connection has been checked out.
    pub fn is_acquired(&self) -> bool {
        self.bound.is_some()
    }

    /// The source this connection is bound to, if it has been acquired.
    pub fn role(&self) -> Option<SourceRole> {
        self.bound.as_ref().map(|bound| bound.role)
    }

    /// Takes the bound connection out of the wrapper, if any.
    pub fn into_inner(mut self) -> Option<S::Connection> {
        self.bound.take().map(|bound| bound.connection)
    }

    /// Returns the connection to its pool (a no-op if it was never acquired).
    pub fn release(self) {
        if let Some(role) = self.role() {
            trace!(%role, "Releasing connection");
        }
    }
}

impl<S: ConnectionSource> std::fmt::Debug for LazyConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyConnection").field("role", &self.role()).finish()
    }
}
