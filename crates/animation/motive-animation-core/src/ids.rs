#![allow(dead_code)]
//! Identifiers for nodes and namespaces.
//!
//! Nodes are opaque host-allocated handles; the engine never dereferences
//! them, it only keys tables by them and hands them back to the driver.
//! Namespace ids are caller-supplied (one per embedding scope).

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct NamespaceId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl std::fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ns{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// it should hash and compare by the underlying handle
    #[test]
    fn id_identity() {
        assert_eq!(NodeId(7), NodeId(7));
        assert_ne!(NodeId(7), NodeId(8));
        assert_eq!(NamespaceId(1), NamespaceId(1));
        assert_eq!(format!("{}", NodeId(3)), "#3");
    }
}
