//! Round-robin selection over a fixed replica roster.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::trace;

use crate::errors::{Error, Result};

/// Distributes reads evenly across replicas.
///
/// The roster is fixed at construction and never changes. The cursor is a plain
/// unsigned counter: `fetch_add` wraps at `usize::MAX`, and the modulo of an unsigned
/// value can never be negative.
#[derive(Debug)]
pub struct ReplicaBalancer<S> {
    replicas: Vec<S>,
    cursor: AtomicUsize,
}

impl<S> ReplicaBalancer<S> {
    /// Creates a balancer whose cursor starts at the first replica.
    ///
    /// Fails if `replicas` is empty.
    pub fn new(replicas: Vec<S>) -> Result<Self> {
        Self::with_cursor(replicas, 0)
    }

    fn with_cursor(replicas: Vec<S>, start: usize) -> Result<Self> {
        if replicas.is_empty() {
            return Err(Error::configuration("replica roster must contain at least one replica"));
        }

        Ok(Self {
            replicas,
            cursor: AtomicUsize::new(start),
        })
    }

    /// Returns the next replica along with its position in the roster.
    ///
    /// Concurrent callers may receive the same replica, but no increment is lost.
    pub fn next(&self) -> (usize, &S) {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.replicas.len();
        trace!(index, "Routing to replica");
        (index, &self.replicas[index])
    }

    /// Number of replicas in the roster.
    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    /// Always false: an empty roster is rejected at construction.
    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    /// The full roster in configuration order.
    pub fn replicas(&self) -> &[S] {
        &self.replicas
    }
}
