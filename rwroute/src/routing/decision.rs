use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the data access of the current unit of work should go.
///
/// `Write` is the default: sending a write to a replica is a correctness bug, while
/// sending a read to the primary only costs capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingDecision {
    /// Route to the primary.
    #[default]
    Write,
    /// Route to one of the replicas.
    Read,
}

impl RoutingDecision {
    /// Maps a declared read-only flag to a decision.
    #[inline]
    pub fn from_read_only(read_only: bool) -> Self {
        if read_only { RoutingDecision::Read } else { RoutingDecision::Write }
    }

    #[inline]
    pub fn is_read(&self) -> bool {
        matches!(self, RoutingDecision::Read)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingDecision::Write => "write",
            RoutingDecision::Read => "read",
        }
    }
}

impl fmt::Display for RoutingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_write() {
        assert_eq!(RoutingDecision::default(), RoutingDecision::Write);
    }

    #[test]
    fn test_from_read_only() {
        assert_eq!(RoutingDecision::from_read_only(true), RoutingDecision::Read);
        assert_eq!(RoutingDecision::from_read_only(false), RoutingDecision::Write);
        assert!(RoutingDecision::Read.is_read());
        assert!(!RoutingDecision::Write.is_read());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", RoutingDecision::Write), "write");
        assert_eq!(format!("{}", RoutingDecision::Read), "read");
    }
}
