//! The single decision point mapping a [`RoutingDecision`] to a connection source.

use std::fmt;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, trace, warn};

use super::balancer::ReplicaBalancer;
use super::context::RoutingContext;
use super::decision::RoutingDecision;
use crate::errors::{Error, Result};

/// What to do with read-only work when no replicas are configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadRoutingPolicy {
    /// Reads go to replicas; an empty roster fails at startup.
    #[default]
    Replicas,
    /// Explicit opt-in: with an empty roster, reads go to the primary.
    PrimaryFallback,
}

/// Which configured source a resolution selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceRole {
    Primary,
    /// Position in the replica roster, zero-based.
    Replica(usize),
}

impl SourceRole {
    pub fn is_primary(&self) -> bool {
        matches!(self, SourceRole::Primary)
    }

    /// Low-cardinality label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceRole::Primary => "primary",
            SourceRole::Replica(_) => "replica",
        }
    }
}

impl fmt::Display for SourceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRole::Primary => f.write_str("primary"),
            SourceRole::Replica(index) => write!(f, "replica[{index}]"),
        }
    }
}

/// A source picked by [`ConnectionRouter::resolve`].
#[derive(Debug)]
pub struct ResolvedSource<'a, S> {
    pub role: SourceRole,
    pub source: &'a S,
}

/// Routes `Write` to the primary and `Read` to the next replica.
///
/// The primary and roster are immutable after construction, so the router can be
/// shared across tasks without locking.
#[derive(Debug)]
pub struct ConnectionRouter<S> {
    primary: S,
    balancer: Option<ReplicaBalancer<S>>,
    policy: ReadRoutingPolicy,
}

impl<S> ConnectionRouter<S> {
    /// Builds a router, failing fast if read routing is enabled without replicas.
    pub fn new(primary: S, replicas: Vec<S>, policy: ReadRoutingPolicy) -> Result<Self> {
        let balancer = match (replicas.is_empty(), policy) {
            (true, ReadRoutingPolicy::Replicas) => {
                return Err(Error::configuration(
                    "read routing is enabled but no replicas are configured \
                     (set database.read_policy to primary_fallback to send reads to the primary)",
                ));
            }
            (true, ReadRoutingPolicy::PrimaryFallback) => {
                warn!("No replicas configured: read-only units of work will use the primary");
                None
            }
            (false, _) => Some(ReplicaBalancer::new(replicas)?),
        };

        info!(
            replicas = balancer.as_ref().map_or(0, ReplicaBalancer::len),
            policy = ?policy,
            "Connection router initialized"
        );

        Ok(Self {
            primary,
            balancer,
            policy,
        })
    }

    /// Resolves the source for the calling task's current decision.
    ///
    /// Performs no I/O and never fails.
    pub fn resolve(&self) -> ResolvedSource<'_, S> {
        self.resolve_for(RoutingContext::get())
    }

    /// Resolves the source for an explicit decision.
    pub fn resolve_for(&self, decision: RoutingDecision) -> ResolvedSource<'_, S> {
        let resolved = match (decision, &self.balancer) {
            (RoutingDecision::Read, Some(balancer)) => {
                let (index, source) = balancer.next();
                ResolvedSource {
                    role: SourceRole::Replica(index),
                    source,
                }
            }
            _ => ResolvedSource {
                role: SourceRole::Primary,
                source: &self.primary,
            },
        };

        counter!("rwroute_resolutions_total", "role" => resolved.role.kind()).increment(1);
        trace!(%decision, role = %resolved.role, "Resolved connection source");
        resolved
    }

    pub fn primary(&self) -> &S {
        &self.primary
    }

    /// The replica roster in configuration order (empty under primary fallback).
    pub fn replicas(&self) -> &[S] {
        match &self.balancer {
            Some(balancer) => balancer.replicas(),
            None => &[],
        }
    }

    pub fn has_replicas(&self) -> bool {
        self.balancer.is_some()
    }

    pub fn policy(&self) -> ReadRoutingPolicy {
        self.policy
    }
}
