//! In-memory connection sources for exercising routing without a database
//! (available with the `test-utils` feature).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::routing::{ConnectionRouter, ReadRoutingPolicy, RoutedPools};
use crate::source::ConnectionSource;

/// Connection source that counts checkouts and releases.
#[derive(Debug, Clone)]
pub struct CountingSource {
    pub name: &'static str,
    checkouts: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
    failing: bool,
}

impl CountingSource {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            checkouts: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
            failing: false,
        }
    }

    /// A source whose every checkout fails as if the pool timed out.
    pub fn failing(name: &'static str) -> Self {
        Self { failing: true, ..Self::new(name) }
    }

    pub fn checkouts(&self) -> usize {
        self.checkouts.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Connections checked out and not yet released.
    pub fn in_use(&self) -> usize {
        self.checkouts() - self.releases()
    }
}

/// A "physical" connection from a [`CountingSource`].
#[derive(Debug)]
pub struct CountedConnection {
    pub source: &'static str,
    releases: Arc<AtomicUsize>,
}

impl Drop for CountedConnection {
    fn drop(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, thiserror::Error)]
#[error("pool {0} timed out while waiting for an open connection")]
pub struct PoolTimedOut(pub &'static str);

#[async_trait]
impl ConnectionSource for CountingSource {
    type Connection = CountedConnection;
    type Error = PoolTimedOut;

    async fn checkout(&self) -> Result<Self::Connection, Self::Error> {
        if self.failing {
            return Err(PoolTimedOut(self.name));
        }
        self.checkouts.fetch_add(1, Ordering::SeqCst);
        Ok(CountedConnection {
            source: self.name,
            releases: self.releases.clone(),
        })
    }
}

/// A primary plus one to four replicas named `R1`, `R2`, ... wired into [`RoutedPools`].
pub struct TestTopology {
    pub primary: CountingSource,
    pub replicas: Vec<CountingSource>,
    pub pools: RoutedPools<CountingSource>,
}

impl TestTopology {
    pub fn new(replica_count: usize) -> Self {
        const NAMES: [&str; 4] = ["R1", "R2", "R3", "R4"];
        assert!((1..=NAMES.len()).contains(&replica_count), "between 1 and {} test replicas", NAMES.len());

        let primary = CountingSource::new("primary");
        let replicas: Vec<_> = NAMES[..replica_count].iter().copied().map(CountingSource::new).collect();
        let router = ConnectionRouter::new(primary.clone(), replicas.clone(), ReadRoutingPolicy::Replicas)
            .expect("Failed to build test router");

        Self {
            primary,
            replicas,
            pools: RoutedPools::new(router),
        }
    }

    /// Total checkouts across every source.
    pub fn total_checkouts(&self) -> usize {
        self.primary.checkouts() + self.replicas.iter().map(CountingSource::checkouts).sum::<usize>()
    }
}
