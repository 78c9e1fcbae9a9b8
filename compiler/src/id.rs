// id.rs — Stable node identifiers
//
// Node ids are unique across a graph and all of its nested subgraphs, so a
// failure or diagnostic can name a node without carrying its graph path.
// Allocated in construction order by the graph builder.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier for a node in a compute graph (or any nested subgraph).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Allocator for node ids. Produces monotonically increasing ids in
/// allocation order, ensuring deterministic assignment.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_node: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_node(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sequential() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.alloc_node(), NodeId(0));
        assert_eq!(ids.alloc_node(), NodeId(1));
        assert_eq!(NodeId(7).to_string(), "%7");
    }
}
