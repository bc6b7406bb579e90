use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Reported by a neighbor table (LLDP/CDP).
    Discovered,
    /// Two interfaces share an inferred subnet.
    Inferred,
}

/// Unordered pair of device names. Endpoints are stored sorted so `(a, b)` and `(b, a)`
/// compare and hash the same.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AdjacencyEdge {
    pub a: String,
    pub b: String,
    pub kind: EdgeKind,
}

impl AdjacencyEdge {
    pub fn new(a: &str, b: &str, kind: EdgeKind) -> Self {
        let (a, b) = if a <= b { (a, b) } else { (b, a) };
        AdjacencyEdge {
            a: a.to_string(),
            b: b.to_string(),
            kind,
        }
    }

    pub fn discovered(a: &str, b: &str) -> Self {
        Self::new(a, b, EdgeKind::Discovered)
    }

    pub fn inferred(a: &str, b: &str) -> Self {
        Self::new(a, b, EdgeKind::Inferred)
    }

    pub fn endpoints(&self) -> (&str, &str) {
        (&self.a, &self.b)
    }

    pub fn same_pair(&self, other: &AdjacencyEdge) -> bool {
        self.a == other.a && self.b == other.b
    }

    pub fn is_loop(&self) -> bool {
        self.a == self.b
    }
}

impl Display for AdjacencyEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            EdgeKind::Discovered => "discovered",
            EdgeKind::Inferred => "inferred",
        };
        write!(f, "{} -- {} ({kind})", self.a, self.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_is_unordered() {
        let ab = AdjacencyEdge::discovered("r1", "r2");
        let ba = AdjacencyEdge::discovered("r2", "r1");
        assert_eq!(ab, ba);
        assert_eq!(ab.endpoints(), ("r1", "r2"));
        assert!(ab.same_pair(&AdjacencyEdge::inferred("r2", "r1")));
        assert!(!ab.is_loop());
    }
}
