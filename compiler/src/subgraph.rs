// subgraph.rs — Subgraph propagator
//
// Carries choices across call-node boundaries. Inward, each body's Data[i]
// parameters receive the call's input slot i. Outward, the first body judged
// fixes the reference result per Output slot; later bodies are judged under
// that reference and must end with the same dtype at every slot. A call that
// is itself constrained passes its required result dtypes down to every body.
//
// Preconditions: the call node's input choices are computed.
// Postconditions: every judged body agrees with the reference dtypes.
// Failure modes: a parameter or result dtype that contradicts the
//                reference → `InconsistentSubgraphAgreement`.
// Side effects: seeds Data descriptors of the bodies.

use std::collections::HashMap;

use crate::dtype::DataType;
use crate::graph::{ComputeGraph, NodeKind, TensorChoice};
use crate::graph_index::GraphIndex;
use crate::id::NodeId;
use crate::judge::{JudgeErrorKind, JudgeFailure, NodeError};

/// Required output dtypes per node, keyed by node id.
pub type OutputConstraints = HashMap<NodeId, Vec<(usize, DataType)>>;

/// Position of the body's Output pseudo-node (the first, if several).
fn output_node(body: &ComputeGraph) -> Option<usize> {
    body.nodes
        .iter()
        .position(|n| matches!(n.kind, NodeKind::Output))
}

/// The choices at the body's Output node, one per result slot.
pub fn results(body: &ComputeGraph) -> Vec<Option<TensorChoice>> {
    match output_node(body) {
        Some(pos) => body.nodes[pos].inputs.iter().map(|d| d.choice()).collect(),
        None => Vec::new(),
    }
}

/// Seed every Data[i] of `body` with call input `i`.
///
/// A parameter that is already decided keeps its value, provided the dtype
/// matches. Parameters without a matching call input are left to adopt their
/// origin.
pub fn seed_parameters(body: &mut ComputeGraph, call_inputs: &[TensorChoice]) -> Result<(), JudgeFailure> {
    for pos in 0..body.nodes.len() {
        let NodeKind::Data { index } = body.nodes[pos].kind else {
            continue;
        };
        let Some(choice) = call_inputs.get(index) else {
            continue;
        };
        let clash = body.nodes[pos]
            .outputs
            .iter()
            .find_map(|d| d.chosen_dtype.filter(|&t| t != choice.dtype));
        if let Some(existing) = clash {
            let message = format!(
                "parameter {} is already {} but the call passes {}",
                index, existing, choice.dtype
            );
            return Err(JudgeFailure::at(
                body,
                &body.nodes[pos],
                NodeError::new(JudgeErrorKind::InconsistentSubgraphAgreement, message),
            ));
        }
        for desc in body.nodes[pos].outputs.iter_mut() {
            desc.apply(choice.clone());
        }
    }
    Ok(())
}

/// Agreement state threaded through the bodies of one call node.
///
/// `required` holds the result dtypes the enclosing graph demands of the call
/// itself (a call nested in a constrained body); the first body is judged
/// under those, later bodies under the reference.
#[derive(Debug, Clone, Default)]
pub struct OutputAgreement {
    required: Vec<(usize, DataType)>,
    reference: Option<(String, Vec<Option<TensorChoice>>)>,
}

impl OutputAgreement {
    /// Agreement for a call whose output slots must carry `required` dtypes.
    pub fn requiring(required: &[(usize, DataType)]) -> Self {
        Self {
            required: required.to_vec(),
            reference: None,
        }
    }

    /// Dtype result slot `slot` must have, if any.
    fn wanted(&self, slot: usize) -> Option<DataType> {
        let reference = self
            .reference
            .as_ref()
            .and_then(|(_, r)| r.get(slot))
            .and_then(|c| c.as_ref())
            .map(|c| c.dtype);
        reference.or_else(|| {
            self.required
                .iter()
                .find(|&&(s, _)| s == slot)
                .map(|&(_, t)| t)
        })
    }

    /// Output constraints for the next body: the operator (or nested call)
    /// feeding Output slot `i` must produce the wanted dtype of slot `i`.
    pub fn constraints(&self, body: &ComputeGraph) -> OutputConstraints {
        let mut out = OutputConstraints::new();
        let Some(pos) = output_node(body) else {
            return out;
        };
        let index = GraphIndex::build(body);
        let output = &body.nodes[pos];
        for slot in 0..output.inputs.len() {
            let Some(wanted) = self.wanted(slot) else { continue };
            let Some((producer, out_slot)) = index.producer(output.id, slot) else {
                continue;
            };
            let producer = &body.nodes[producer];
            if !matches!(producer.kind, NodeKind::Op { .. }) {
                continue;
            }
            let entry = out.entry(producer.id).or_default();
            if !entry.contains(&(out_slot, wanted)) {
                entry.push((out_slot, wanted));
            }
        }
        out
    }

    /// Check a judged body against the wanted dtypes; the first body to pass
    /// becomes the reference.
    pub fn settle(&mut self, body: &ComputeGraph) -> Result<(), JudgeFailure> {
        let got = results(body);
        let mismatch = got.iter().enumerate().find_map(|(slot, g)| {
            let have = g.as_ref()?.dtype;
            let want = self.wanted(slot)?;
            (have != want).then_some((slot, want, have))
        });
        if let (Some((slot, want, have)), Some(pos)) = (mismatch, output_node(body)) {
            let message = match &self.reference {
                Some((ref_name, _)) => format!(
                    "result {} is {} but '{}' produced {}",
                    slot, have, ref_name, want
                ),
                None => format!(
                    "result {} is {} but the enclosing graph requires {}",
                    slot, have, want
                ),
            };
            return Err(JudgeFailure::at(
                body,
                &body.nodes[pos],
                NodeError::new(JudgeErrorKind::InconsistentSubgraphAgreement, message),
            ));
        }
        if self.reference.is_none() {
            log::trace!("'{}' sets the result reference", body.name);
            self.reference = Some((body.name.clone(), got));
        }
        Ok(())
    }

    /// Reference results to copy onto the call node's outputs.
    pub fn outward(&self) -> &[Option<TensorChoice>] {
        self.reference
            .as_ref()
            .map(|(_, r)| r.as_slice())
            .unwrap_or(&[])
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
