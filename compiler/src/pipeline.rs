// pipeline.rs — Graph judge
//
// Visits every node of a compute graph in order, judging operator nodes
// against the kernel catalogue and copying choices through pass-through
// nodes. Call nodes recurse into their subgraphs through the subgraph
// propagator. Stops at the first failure.
//
// Preconditions: `graph.nodes` is in topological order at every level.
// Postconditions: on success every reachable slot is decided.
// Failure modes: the first node failure, as a `JudgeFailure`. Nodes judged
//                before it keep their choices; the failing node (and a call
//                node whose body failed) is not written.
// Side effects: mutates descriptors in place; `log` output.

use std::fmt;
use std::time::{Duration, Instant};

use crate::catalogue::{KernelCatalogue, Slot};
use crate::config::JudgeConfig;
use crate::diag::Diagnostic;
use crate::dtype::DataType;
use crate::graph::{ComputeGraph, Node, NodeKind};
use crate::graph_index::GraphIndex;
use crate::judge::{
    gather_inputs, judge_op, judge_passthrough, judge_unbound_call, InputContext, JudgeErrorKind,
    JudgeFailure, NodeError, Policy, Verdict,
};
use crate::subgraph::{seed_parameters, OutputAgreement, OutputConstraints};

/// Summary of a successful run.
#[derive(Debug, Clone, Default)]
pub struct JudgeReport {
    /// Operator nodes decided against a kernel table.
    pub judged: usize,
    /// Data, Const and Output nodes (and call nodes without a table).
    pub passed_through: usize,
    /// Nodes skipped because every slot was already decided.
    pub already_judged: usize,
    /// Subgraph bodies visited.
    pub subgraphs: usize,
    pub warnings: Vec<Diagnostic>,
    pub elapsed: Duration,
}

impl fmt::Display for JudgeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} judged, {} passed through, {} already judged, {} subgraph(s), {} warning(s), {:.1}ms",
            self.judged,
            self.passed_through,
            self.already_judged,
            self.subgraphs,
            self.warnings.len(),
            self.elapsed.as_secs_f64() * 1000.0
        )
    }
}

struct Run<'a> {
    catalogue: &'a dyn KernelCatalogue,
    config: &'a JudgeConfig,
    report: JudgeReport,
}

/// Judge every node of `graph` in place.
pub fn judge_graph(
    graph: &mut ComputeGraph,
    catalogue: &dyn KernelCatalogue,
    config: &JudgeConfig,
) -> Result<JudgeReport, JudgeFailure> {
    let t = Instant::now();
    let mut run = Run {
        catalogue,
        config,
        report: JudgeReport::default(),
    };
    log::debug!(
        "judging '{}' ({} nodes) under {}",
        graph.name,
        graph.node_count(),
        config.precision_mode
    );
    run.judge_body(graph, &OutputConstraints::new())?;
    run.report.elapsed = t.elapsed();
    log::debug!("'{}': {}", graph.name, run.report);
    Ok(run.report)
}

impl Run<'_> {
    fn judge_body(
        &mut self,
        graph: &mut ComputeGraph,
        constraints: &OutputConstraints,
    ) -> Result<(), JudgeFailure> {
        let index = GraphIndex::build(graph);
        for pos in 0..graph.nodes.len() {
            let node = &graph.nodes[pos];
            if node.is_judged() {
                log::trace!("{} '{}' already judged", node.id, node.name);
                self.report.already_judged += 1;
                continue;
            }
            let inputs = gather_inputs(graph, &index, pos);
            let agreement = constraints
                .get(&node.id)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let mut verdict = self
                .decide(node, &inputs, agreement)
                .map_err(|e| JudgeFailure::at(graph, node, e))?;
            if node.is_call() {
                self.judge_call(&mut graph.nodes[pos], &mut verdict, agreement)?;
            }
            self.report.warnings.append(&mut verdict.warnings);
            verdict.apply(&mut graph.nodes[pos]);
        }
        Ok(())
    }

    fn decide(
        &mut self,
        node: &Node,
        inputs: &[InputContext],
        agreement: &[(usize, DataType)],
    ) -> Result<Verdict, NodeError> {
        let NodeKind::Op { op_type, backend } = &node.kind else {
            self.report.passed_through += 1;
            return judge_passthrough(node, inputs);
        };
        match self.catalogue.lookup(op_type, *backend) {
            Some(table) => {
                let policy = Policy {
                    mode: self.config.precision_mode,
                    class: self.config.precision_class(op_type, self.catalogue),
                };
                let verdict = judge_op(node, inputs, table, policy, agreement)?;
                self.report.judged += 1;
                Ok(verdict)
            }
            None if node.is_call() => {
                self.report.passed_through += 1;
                judge_unbound_call(node, inputs)
            }
            None => Err(NodeError::new(
                JudgeErrorKind::CatalogueMiss,
                format!("no kernel table for '{}' on {}", op_type, backend),
            )),
        }
    }

    /// Judge each body of a call node, then take the call's outputs from the
    /// first body's results where it produced one. `required` is the call's
    /// own output constraint and binds every body.
    fn judge_call(
        &mut self,
        call: &mut Node,
        verdict: &mut Verdict,
        required: &[(usize, DataType)],
    ) -> Result<(), JudgeFailure> {
        let (id, name) = (call.id, call.name.clone());
        let mut agreement = OutputAgreement::requiring(required);
        for body in call.subgraphs.iter_mut() {
            log::debug!("{} '{}': entering subgraph '{}'", id, name, body.name);
            self.report.subgraphs += 1;
            seed_parameters(body, &verdict.inputs).map_err(|f| f.within(id, &name))?;
            let constraints = agreement.constraints(body);
            self.judge_body(body, &constraints)
                .map_err(|f| f.within(id, &name))?;
            agreement.settle(body).map_err(|f| f.within(id, &name))?;
        }
        for (slot, result) in agreement.outward().iter().enumerate() {
            match (result, verdict.outputs.get_mut(slot)) {
                (Some(r), Some(out)) => *out = r.clone(),
                _ => log::trace!("{} keeps its own choice at {}", id, Slot::Output(slot)),
            }
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
