use std::collections::HashMap;

use crate::graph::{ComputeGraph, Node, TensorDesc};
use crate::id::NodeId;

/// Edge lookup tables for one graph level (nested subgraphs get their own).
///
/// Positions index `ComputeGraph::nodes`. Edges naming a node or slot that
/// does not exist are ignored.
#[derive(Debug, Clone, Default)]
pub struct GraphIndex {
    node_pos: HashMap<NodeId, usize>,
    /// (consumer, input slot) → (producer position, output slot).
    producers: HashMap<(NodeId, usize), (usize, usize)>,
}

impl GraphIndex {
    pub fn build(graph: &ComputeGraph) -> Self {
        let mut index = GraphIndex::default();
        for (i, node) in graph.nodes.iter().enumerate() {
            index.node_pos.insert(node.id, i);
        }
        for edge in &graph.edges {
            let (Some(&src), Some(&dst)) = (
                index.node_pos.get(&edge.source),
                index.node_pos.get(&edge.target),
            ) else {
                continue;
            };
            if edge.source_slot >= graph.nodes[src].outputs.len()
                || edge.target_slot >= graph.nodes[dst].inputs.len()
            {
                continue;
            }
            index
                .producers
                .entry((edge.target, edge.target_slot))
                .or_insert((src, edge.source_slot));
        }
        index
    }

    /// Producer (position, output slot) feeding `id`'s input `slot`.
    pub fn producer(&self, id: NodeId, slot: usize) -> Option<(usize, usize)> {
        self.producers.get(&(id, slot)).copied()
    }

    /// The producer's output descriptor for `id`'s input `slot`.
    pub fn producer_desc<'g>(
        &self,
        graph: &'g ComputeGraph,
        id: NodeId,
        slot: usize,
    ) -> Option<(&'g Node, &'g TensorDesc)> {
        let (pos, out) = self.producer(id, slot)?;
        let node = graph.nodes.get(pos)?;
        node.outputs.get(out).map(|d| (node, d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::Backend;
    use crate::dtype::DataType;
    use crate::graph::{Edge, GraphBuilder};
    use crate::id::IdAllocator;
    use crate::layout::Format;
    use crate::shape::Shape;

    fn desc() -> TensorDesc {
        TensorDesc::new(Shape::fixed(&[8]), Format::Nd, DataType::Float32)
    }

    #[test]
    fn first_edge_per_input_wins() {
        let mut ids = IdAllocator::new();
        let mut b = GraphBuilder::new(&mut ids, "g");
        let x = b.data("x", 0, desc());
        let a = b.op("a", "Relu", Backend::Vector, vec![desc()], vec![desc()]);
        let m = b.op("m", "Add", Backend::Vector, vec![desc(), desc()], vec![desc()]);
        b.connect(x, 0, a, 0);
        b.connect(x, 0, m, 0);
        b.connect(a, 0, m, 1);
        let g = b.finish();
        let index = GraphIndex::build(&g);

        assert_eq!(index.producer(m, 1), Some((1, 0)));
        assert_eq!(index.producer(a, 0), Some((0, 0)));
        assert_eq!(index.producer(x, 0), None);
        let (node, _) = index.producer_desc(&g, m, 0).expect("producer");
        assert_eq!(node.id, x);

        let mut doubled = g.clone();
        doubled.edges.push(Edge {
            source: a,
            source_slot: 0,
            target: m,
            target_slot: 0,
        });
        assert_eq!(GraphIndex::build(&doubled).producer(m, 0), Some((0, 0)));
    }

    #[test]
    fn dangling_edges_are_ignored() {
        let mut ids = IdAllocator::new();
        let mut b = GraphBuilder::new(&mut ids, "g");
        let x = b.data("x", 0, desc());
        let a = b.op("a", "Relu", Backend::Vector, vec![desc()], vec![desc()]);
        b.connect(x, 3, a, 0);
        b.connect(NodeId(99), 0, a, 0);
        let mut g = b.finish();
        g.edges.push(Edge {
            source: x,
            source_slot: 0,
            target: a,
            target_slot: 5,
        });
        let index = GraphIndex::build(&g);
        assert_eq!(index.producer(a, 0), None);
        assert!(index.producer_desc(&g, a, 0).is_none());
    }
}
