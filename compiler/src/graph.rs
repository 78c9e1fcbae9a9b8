// graph.rs — Compute graph data model
//
// Nodes, edges and per-slot tensor descriptors the judge annotates in place.
// Call-like nodes own nested subgraphs; Data pseudo-nodes stand for a
// subgraph's parameters and the single Output pseudo-node for its results.
//
// Preconditions: `ComputeGraph::nodes` is in topological order; node ids are
//                unique across the graph and all nested subgraphs.
// Postconditions: none (data model and builder only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalogue::Backend;
use crate::dtype::DataType;
use crate::id::{IdAllocator, NodeId};
use crate::layout::{Format, Layout};
use crate::shape::Shape;

// ── Tensor descriptors ──────────────────────────────────────────────────────

/// A decided (layout, dtype, physical shape) triple for one slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorChoice {
    pub layout: Layout,
    pub dtype: DataType,
    pub shape: Shape,
}

/// One input or output slot of a node.
///
/// The origin fields are never rewritten. The chosen fields are written once
/// by a judge run; a later write to a decided descriptor is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorDesc {
    pub origin_shape: Shape,
    pub origin_layout: Format,
    pub origin_dtype: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen_layout: Option<Layout>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen_dtype: Option<DataType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_shape: Option<Shape>,
}

impl TensorDesc {
    pub fn new(origin_shape: Shape, origin_layout: Format, origin_dtype: DataType) -> Self {
        TensorDesc {
            origin_shape,
            origin_layout,
            origin_dtype,
            group_count: None,
            chosen_layout: None,
            chosen_dtype: None,
            physical_shape: None,
        }
    }

    pub fn with_groups(mut self, groups: u32) -> Self {
        self.group_count = Some(groups);
        self
    }

    /// Channel group count; 1 when absent.
    pub fn groups(&self) -> u32 {
        self.group_count.unwrap_or(1).max(1)
    }

    pub fn is_decided(&self) -> bool {
        self.chosen_layout.is_some() && self.chosen_dtype.is_some() && self.physical_shape.is_some()
    }

    pub fn choice(&self) -> Option<TensorChoice> {
        match (&self.chosen_layout, &self.chosen_dtype, &self.physical_shape) {
            (Some(layout), Some(dtype), Some(shape)) => Some(TensorChoice {
                layout: *layout,
                dtype: *dtype,
                shape: shape.clone(),
            }),
            _ => None,
        }
    }

    /// The origin layout tagged with this tensor's group count.
    pub fn origin_layout_tagged(&self) -> Layout {
        Layout::with_groups(self.origin_layout, self.groups())
    }

    /// The descriptor left as-is: origin layout, dtype and shape.
    pub fn origin_choice(&self) -> TensorChoice {
        TensorChoice {
            layout: self.origin_layout_tagged(),
            dtype: self.origin_dtype,
            shape: self.origin_shape.clone(),
        }
    }

    /// Write a choice. Returns false, leaving the descriptor untouched, when
    /// it was already decided.
    pub fn apply(&mut self, choice: TensorChoice) -> bool {
        if self.is_decided() {
            return false;
        }
        self.chosen_layout = Some(choice.layout);
        self.chosen_dtype = Some(choice.dtype);
        self.physical_shape = Some(choice.shape);
        true
    }
}

// ── Nodes and edges ─────────────────────────────────────────────────────────

/// The kind of a graph node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// Graph input, or parameter `index` of a subgraph.
    Data { index: usize },
    /// Constant / weight tensor.
    Const,
    /// Subgraph (or graph) result collector. Input slot `i` is result `i`.
    Output,
    /// An operator executed by a kernel.
    Op {
        op_type: String,
        #[serde(default)]
        backend: Backend,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default)]
    pub inputs: Vec<TensorDesc>,
    #[serde(default)]
    pub outputs: Vec<TensorDesc>,
    /// Bodies of a call-like node (conditional branches, loop body).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subgraphs: Vec<ComputeGraph>,
}

impl Node {
    pub fn is_call(&self) -> bool {
        !self.subgraphs.is_empty()
    }

    /// Every slot is decided (and there is at least one slot).
    pub fn is_judged(&self) -> bool {
        let mut slots = self.inputs.iter().chain(self.outputs.iter()).peekable();
        slots.peek().is_some() && slots.all(TensorDesc::is_decided)
    }
}

/// Producer output slot → consumer input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub source_slot: usize,
    pub target: NodeId,
    pub target_slot: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeGraph {
    pub name: String,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl ComputeGraph {
    pub fn new(name: impl Into<String>) -> Self {
        ComputeGraph {
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// First node named `name`, searching nested subgraphs depth-first.
    pub fn find(&self, name: &str) -> Option<&Node> {
        for node in &self.nodes {
            if node.name == name {
                return Some(node);
            }
            if let Some(found) = node.subgraphs.iter().find_map(|sub| sub.find(name)) {
                return Some(found);
            }
        }
        None
    }

    /// Number of nodes, nested subgraphs included.
    pub fn node_count(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| 1 + n.subgraphs.iter().map(ComputeGraph::node_count).sum::<usize>())
            .sum()
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// Incremental graph construction with globally unique node ids.
///
/// Nested bodies are built with `subgraph()`, which shares the id allocator,
/// then attached to their call node with `attach_subgraph()`.
pub struct GraphBuilder<'a> {
    ids: &'a mut IdAllocator,
    graph: ComputeGraph,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(ids: &'a mut IdAllocator, name: impl Into<String>) -> Self {
        GraphBuilder {
            ids,
            graph: ComputeGraph::new(name),
        }
    }

    /// Builder for a nested body sharing this builder's id allocator.
    pub fn subgraph(&mut self, name: impl Into<String>) -> GraphBuilder<'_> {
        GraphBuilder {
            ids: &mut *self.ids,
            graph: ComputeGraph::new(name),
        }
    }

    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        kind: NodeKind,
        inputs: Vec<TensorDesc>,
        outputs: Vec<TensorDesc>,
    ) -> NodeId {
        let id = self.ids.alloc_node();
        self.graph.nodes.push(Node {
            id,
            name: name.into(),
            kind,
            inputs,
            outputs,
            subgraphs: Vec::new(),
        });
        id
    }

    pub fn data(&mut self, name: impl Into<String>, index: usize, desc: TensorDesc) -> NodeId {
        self.add_node(name, NodeKind::Data { index }, Vec::new(), vec![desc])
    }

    pub fn constant(&mut self, name: impl Into<String>, desc: TensorDesc) -> NodeId {
        self.add_node(name, NodeKind::Const, Vec::new(), vec![desc])
    }

    pub fn op(
        &mut self,
        name: impl Into<String>,
        op_type: impl Into<String>,
        backend: Backend,
        inputs: Vec<TensorDesc>,
        outputs: Vec<TensorDesc>,
    ) -> NodeId {
        let kind = NodeKind::Op {
            op_type: op_type.into(),
            backend,
        };
        self.add_node(name, kind, inputs, outputs)
    }

    pub fn output(&mut self, name: impl Into<String>, inputs: Vec<TensorDesc>) -> NodeId {
        self.add_node(name, NodeKind::Output, inputs, Vec::new())
    }

    pub fn connect(&mut self, source: NodeId, source_slot: usize, target: NodeId, target_slot: usize) {
        self.graph.edges.push(Edge {
            source,
            source_slot,
            target,
            target_slot,
        });
    }

    /// Attach a finished body to `node`. Unknown ids are ignored.
    pub fn attach_subgraph(&mut self, node: NodeId, body: ComputeGraph) {
        if let Some(n) = self.graph.nodes.iter_mut().find(|n| n.id == node) {
            n.subgraphs.push(body);
        }
    }

    pub fn finish(self) -> ComputeGraph {
        self.graph
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

fn write_desc(f: &mut fmt::Formatter<'_>, desc: &TensorDesc) -> fmt::Result {
    write!(
        f,
        "{} {} {}",
        desc.origin_layout_tagged(),
        desc.origin_dtype,
        desc.origin_shape
    )?;
    match desc.choice() {
        Some(c) => write!(f, " => {} {} {}", c.layout, c.dtype, c.shape),
        None => write!(f, " => ?"),
    }
}

fn write_graph(f: &mut fmt::Formatter<'_>, graph: &ComputeGraph, indent: usize) -> fmt::Result {
    let pad = " ".repeat(indent);
    writeln!(f, "{}graph '{}'", pad, graph.name)?;
    for node in &graph.nodes {
        write!(f, "{}  {} {} = ", pad, node.id, node.name)?;
        match &node.kind {
            NodeKind::Data { index } => writeln!(f, "data {}", index)?,
            NodeKind::Const => writeln!(f, "const")?,
            NodeKind::Output => writeln!(f, "output")?,
            NodeKind::Op { op_type, backend } => writeln!(f, "{} @{}", op_type, backend)?,
        }
        for (i, desc) in node.inputs.iter().enumerate() {
            write!(f, "{}    in{}", pad, i)?;
            let producer = graph
                .edges
                .iter()
                .find(|e| e.target == node.id && e.target_slot == i);
            if let Some(e) = producer {
                write!(f, " <- {}.{}", e.source, e.source_slot)?;
            }
            write!(f, ": ")?;
            write_desc(f, desc)?;
            writeln!(f)?;
        }
        for (i, desc) in node.outputs.iter().enumerate() {
            write!(f, "{}    out{}: ", pad, i)?;
            write_desc(f, desc)?;
            writeln!(f)?;
        }
        for sub in &node.subgraphs {
            write_graph(f, sub, indent + 4)?;
        }
    }
    Ok(())
}

impl fmt::Display for ComputeGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_graph(f, self, 0)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn nd_f32(dims: &[u64]) -> TensorDesc {
        TensorDesc::new(Shape::fixed(dims), Format::Nd, DataType::Float32)
    }

    #[test]
    fn apply_is_single_assignment() {
        let mut d = nd_f32(&[4]);
        assert!(!d.is_decided());
        let first = TensorChoice {
            layout: Layout::new(Format::Nd),
            dtype: DataType::Float16,
            shape: Shape::fixed(&[4]),
        };
        assert!(d.apply(first.clone()));
        let second = TensorChoice {
            dtype: DataType::Float32,
            ..first.clone()
        };
        assert!(!d.apply(second));
        assert_eq!(d.choice(), Some(first));
        assert_eq!(d.origin_dtype, DataType::Float32);
    }

    #[test]
    fn builder_shares_ids_with_subgraphs() {
        let mut ids = IdAllocator::new();
        let mut b = GraphBuilder::new(&mut ids, "main");
        let x = b.data("x", 0, nd_f32(&[2]));
        let call = b.op("if", "If", Backend::Cpu, vec![nd_f32(&[2])], vec![nd_f32(&[2])]);
        b.connect(x, 0, call, 0);
        let body = {
            let mut s = b.subgraph("then");
            let p = s.data("p", 0, nd_f32(&[2]));
            let out = s.output("ret", vec![nd_f32(&[2])]);
            s.connect(p, 0, out, 0);
            s.finish()
        };
        b.attach_subgraph(call, body);
        let g = b.finish();

        assert_eq!(g.node_count(), 4);
        assert_eq!(g.find("ret").map(|n| n.id), Some(NodeId(3)));
        assert!(g.node(call).is_some_and(Node::is_call));
        assert!(g.node(x).is_some_and(|n| matches!(n.kind, NodeKind::Data { index: 0 })));
    }

    #[test]
    fn judged_requires_every_slot() {
        let mut ids = IdAllocator::new();
        let mut b = GraphBuilder::new(&mut ids, "g");
        b.op("empty", "Nop", Backend::Cpu, Vec::new(), Vec::new());
        b.op("relu", "Relu", Backend::Vector, vec![nd_f32(&[2])], vec![nd_f32(&[2])]);
        let mut g = b.finish();
        assert!(!g.nodes[0].is_judged());
        assert!(!g.nodes[1].is_judged());
        let c = g.nodes[1].inputs[0].origin_choice();
        g.nodes[1].inputs[0].apply(c.clone());
        assert!(!g.nodes[1].is_judged());
        g.nodes[1].outputs[0].apply(c);
        assert!(g.nodes[1].is_judged());
    }

    #[test]
    fn json_uses_flattened_kind_tag() {
        let src = r#"{
            "name": "g",
            "nodes": [
                {"id": 0, "name": "x", "kind": "data", "index": 0,
                 "outputs": [{"origin_shape": {"dims": [1, -1], "range": [{"min": 1, "max": 8}]},
                              "origin_layout": "ND", "origin_dtype": "float16"}]},
                {"id": 1, "name": "relu", "kind": "op", "op_type": "Relu",
                 "inputs": [{"origin_shape": {"dims": [1, -1], "range": [{"min": 1, "max": 8}]},
                             "origin_layout": "ND", "origin_dtype": "float16"}]}
            ],
            "edges": [{"source": 0, "source_slot": 0, "target": 1, "target_slot": 0}]
        }"#;
        let g: ComputeGraph = serde_json::from_str(src).expect("graph json");
        assert_eq!(g.nodes[0].kind, NodeKind::Data { index: 0 });
        assert_eq!(
            g.nodes[1].kind,
            NodeKind::Op {
                op_type: "Relu".to_string(),
                backend: Backend::Cube
            }
        );
        assert_eq!(g.nodes[0].outputs[0].origin_shape.to_string(), "[1, ?] range [1..8]");

        let back: ComputeGraph =
            serde_json::from_str(&serde_json::to_string(&g).expect("serialize")).expect("reparse");
        assert_eq!(back, g);
    }
}
