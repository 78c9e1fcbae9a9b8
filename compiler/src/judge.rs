// judge.rs — Node judge
//
// Decides, for one node, the (layout, dtype, physical shape) of every slot.
// Operator nodes narrow their kernel table's combinations by format, then by
// dtype under the precision policy, then pick the lowest surviving index.
// Pass-through nodes (Data, Const, Output) copy upstream choices or adopt
// their origin.
//
// Preconditions: inputs were gathered from the node's current graph state.
// Postconditions: a `Verdict` holds one choice per slot; nothing is written
//                 until `Verdict::apply`.
// Failure modes: catalogue miss, empty narrowing, unsupported origin dtype,
//                broken subgraph agreement, malformed shape range.
// Side effects: `log` output only.

use std::fmt;

use crate::catalogue::{KernelTable, Slot, SlotSpec};
use crate::diag::{codes, DiagCode, DiagLevel, Diagnostic};
use crate::dtype::DataType;
use crate::dtype_match::{match_dtypes, DtypeMatch};
use crate::format_match::{match_formats, FormatPreference};
use crate::graph::{ComputeGraph, Node, NodeKind, TensorChoice, TensorDesc};
use crate::graph_index::GraphIndex;
use crate::id::NodeId;
use crate::layout::Layout;
use crate::precision::{resolve_target_dtype, DtypeTarget, MatchRule, PrecisionClass, PrecisionMode};
use crate::shape::{transform, TransformArgs};

// ── Failures ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JudgeErrorKind {
    CatalogueMiss,
    NoAdmissibleCombination,
    UnsupportedOriginDtype,
    InconsistentSubgraphAgreement,
    MalformedShapeRange,
}

impl JudgeErrorKind {
    pub fn code(self) -> DiagCode {
        match self {
            JudgeErrorKind::CatalogueMiss => codes::E0100,
            JudgeErrorKind::NoAdmissibleCombination => codes::E0101,
            JudgeErrorKind::UnsupportedOriginDtype => codes::E0102,
            JudgeErrorKind::InconsistentSubgraphAgreement => codes::E0103,
            JudgeErrorKind::MalformedShapeRange => codes::E0104,
        }
    }

    fn hint(self) -> &'static str {
        match self {
            JudgeErrorKind::CatalogueMiss => {
                "register a kernel table for this operator type and backend"
            }
            JudgeErrorKind::NoAdmissibleCombination => {
                "add a combination accepting these dtypes or relax the precision mode"
            }
            JudgeErrorKind::UnsupportedOriginDtype => {
                "the precision mode keeps the origin dtype; choose another mode or extend the kernel"
            }
            JudgeErrorKind::InconsistentSubgraphAgreement => {
                "every branch must produce the same dtype at each result slot"
            }
            JudgeErrorKind::MalformedShapeRange => {
                "give exactly one range entry per unknown (-1) dimension"
            }
        }
    }
}

impl fmt::Display for JudgeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JudgeErrorKind::CatalogueMiss => "catalogue miss",
            JudgeErrorKind::NoAdmissibleCombination => "no admissible combination",
            JudgeErrorKind::UnsupportedOriginDtype => "unsupported origin dtype",
            JudgeErrorKind::InconsistentSubgraphAgreement => "inconsistent subgraph agreement",
            JudgeErrorKind::MalformedShapeRange => "malformed shape range",
        };
        write!(f, "{}", s)
    }
}

/// A node-local failure, before it is attributed to a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeError {
    pub kind: JudgeErrorKind,
    pub message: String,
}

impl NodeError {
    pub fn new(kind: JudgeErrorKind, message: impl Into<String>) -> Self {
        NodeError {
            kind,
            message: message.into(),
        }
    }
}

/// The first failure of a judge run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgeFailure {
    pub node: NodeId,
    pub node_name: String,
    /// Name of the (sub)graph holding the node.
    pub graph: String,
    pub kind: JudgeErrorKind,
    pub message: String,
    /// Enclosing call nodes, outermost first.
    pub call_chain: Vec<(NodeId, String)>,
}

impl JudgeFailure {
    pub fn at(graph: &ComputeGraph, node: &Node, err: NodeError) -> Self {
        JudgeFailure {
            node: node.id,
            node_name: node.name.clone(),
            graph: graph.name.clone(),
            kind: err.kind,
            message: err.message,
            call_chain: Vec::new(),
        }
    }

    /// Record that the failure happened inside a subgraph of call `id`.
    pub fn within(mut self, id: NodeId, name: &str) -> Self {
        self.call_chain.insert(0, (id, name.to_string()));
        self
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        let mut d = Diagnostic::new(
            DiagLevel::Error,
            Some(self.node),
            format!("{} at '{}': {}", self.kind, self.node_name, self.message),
        )
        .with_code(self.kind.code())
        .with_hint(self.kind.hint());
        for (id, name) in self.call_chain.iter().rev() {
            d = d.with_cause(format!("inside a subgraph of call '{}'", name), Some(*id));
        }
        d
    }
}

impl fmt::Display for JudgeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {} '{}' in graph '{}': {}",
            self.kind, self.node, self.node_name, self.graph, self.message
        )
    }
}

impl std::error::Error for JudgeFailure {}

// ── Gathering ───────────────────────────────────────────────────────────────

/// What one input slot sees upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputContext {
    pub slot: usize,
    /// The producer's decided choice, if any.
    pub upstream: Option<TensorChoice>,
    /// Producer's chosen layout, else its origin, else the slot's own origin.
    pub preferred: Layout,
    /// Producer's chosen dtype, else its origin, else the slot's own origin.
    pub predecessor_dtype: DataType,
    /// Fed by an ordinary operator (not Const, Data, or nothing).
    pub primary: bool,
}

/// Collect an `InputContext` for every input slot of the node at `pos`.
pub fn gather_inputs(graph: &ComputeGraph, index: &GraphIndex, pos: usize) -> Vec<InputContext> {
    let node = &graph.nodes[pos];
    node.inputs
        .iter()
        .enumerate()
        .map(|(slot, own)| match index.producer_desc(graph, node.id, slot) {
            Some((producer, desc)) => InputContext {
                slot,
                upstream: desc.choice(),
                preferred: desc.chosen_layout.unwrap_or_else(|| desc.origin_layout_tagged()),
                predecessor_dtype: desc.chosen_dtype.unwrap_or(desc.origin_dtype),
                primary: matches!(producer.kind, NodeKind::Op { .. }),
            },
            None => InputContext {
                slot,
                upstream: None,
                preferred: own.origin_layout_tagged(),
                predecessor_dtype: own.origin_dtype,
                primary: false,
            },
        })
        .collect()
}

/// Input positions in narrowing order: primary inputs first, declaration
/// order otherwise.
fn priority_order(inputs: &[InputContext]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..inputs.len()).collect();
    order.sort_by_key(|&i| !inputs[i].primary);
    order
}

// ── Verdict ─────────────────────────────────────────────────────────────────

/// Everything a node will be written with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub inputs: Vec<TensorChoice>,
    pub outputs: Vec<TensorChoice>,
    /// Selected combination index; `None` for pass-through nodes.
    pub combination: Option<usize>,
    pub warnings: Vec<Diagnostic>,
}

impl Verdict {
    /// Write every slot. Already-decided slots keep their value.
    pub fn apply(self, node: &mut Node) {
        for (desc, choice) in node.inputs.iter_mut().zip(self.inputs) {
            desc.apply(choice);
        }
        for (desc, choice) in node.outputs.iter_mut().zip(self.outputs) {
            desc.apply(choice);
        }
    }
}

fn origin_choice(desc: &TensorDesc) -> Result<TensorChoice, NodeError> {
    desc.origin_shape
        .validate()
        .map_err(|e| NodeError::new(JudgeErrorKind::MalformedShapeRange, e.to_string()))?;
    Ok(desc.origin_choice())
}

/// Data, Const and Output nodes: inputs take the upstream choice (or origin),
/// outputs mirror the input of the same index (or origin).
pub fn judge_passthrough(node: &Node, inputs: &[InputContext]) -> Result<Verdict, NodeError> {
    let mut chosen_inputs = Vec::with_capacity(node.inputs.len());
    for (desc, cx) in node.inputs.iter().zip(inputs) {
        chosen_inputs.push(match &cx.upstream {
            Some(c) => c.clone(),
            None => origin_choice(desc)?,
        });
    }
    let mut outputs = Vec::with_capacity(node.outputs.len());
    for (i, desc) in node.outputs.iter().enumerate() {
        outputs.push(match chosen_inputs.get(i) {
            Some(c) => c.clone(),
            None => origin_choice(desc)?,
        });
    }
    Ok(Verdict {
        inputs: chosen_inputs,
        outputs,
        combination: None,
        warnings: Vec::new(),
    })
}

/// A call node with no kernel table: inputs take the upstream choice (or
/// origin), outputs keep their origin until the subgraphs supply results.
pub fn judge_unbound_call(node: &Node, inputs: &[InputContext]) -> Result<Verdict, NodeError> {
    let mut verdict = judge_passthrough(node, inputs)?;
    verdict.outputs = node
        .outputs
        .iter()
        .map(origin_choice)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(verdict)
}

/// Precision policy for one operator node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub mode: PrecisionMode,
    pub class: PrecisionClass,
}

/// Output-slot dtypes a node must produce so sibling subgraphs agree.
pub type OutputConstraint = [(usize, DataType)];

/// Judge an operator node against its kernel table.
pub fn judge_op(
    node: &Node,
    inputs: &[InputContext],
    table: &KernelTable,
    policy: Policy,
    agreement: &OutputConstraint,
) -> Result<Verdict, NodeError> {
    let by_arity = table.indices_for_arity(node.inputs.len(), node.outputs.len());
    if by_arity.is_empty() {
        return Err(NodeError::new(
            JudgeErrorKind::NoAdmissibleCombination,
            format!(
                "'{}' has no combination with {} input(s) and {} output(s)",
                table.op_type,
                node.inputs.len(),
                node.outputs.len()
            ),
        ));
    }

    let mut candidates = by_arity.clone();
    for &(slot, dtype) in agreement {
        candidates.retain(|&i| table.spec(i, Slot::Output(slot)).map(|s| s.dtype) == Some(dtype));
        if candidates.is_empty() {
            return Err(NodeError::new(
                JudgeErrorKind::InconsistentSubgraphAgreement,
                format!("no combination produces {} at output {}", dtype, slot),
            ));
        }
    }
    let constrained = !agreement.is_empty();

    let order = priority_order(inputs);

    // Each input narrows only the survivors of the inputs before it, so a
    // later input can fall back to its origin format where a strict
    // intersection of every input's preferred rows would come out empty.
    for &k in &order {
        let cx = &inputs[k];
        let desc = &node.inputs[cx.slot];
        let pref = FormatPreference {
            preferred: cx.preferred,
            origin: desc.origin_layout,
            groups: desc.groups(),
        };
        let (narrowed, how) = match_formats(table, &candidates, cx.slot, &pref);
        log::trace!(
            "{} input {}: format {} -> {:?} {:?}",
            node.id,
            cx.slot,
            cx.preferred,
            how,
            narrowed
        );
        candidates = narrowed;
    }

    let mut warnings = Vec::new();
    for (rank, &k) in order.iter().enumerate() {
        let cx = &inputs[k];
        let desc = &node.inputs[cx.slot];
        let supported = table.dtypes_at(&by_arity, Slot::Input(cx.slot));
        let target = match resolve_target_dtype(
            policy.mode,
            policy.class,
            cx.predecessor_dtype,
            desc.origin_dtype,
            &supported,
        ) {
            Ok(t) => t,
            Err(_) if constrained && policy.mode != PrecisionMode::MustKeepOriginDtype => {
                DtypeTarget {
                    dtypes: vec![cx.predecessor_dtype],
                    rule: MatchRule::Lenient,
                }
            }
            Err(e) => {
                return Err(NodeError::new(
                    JudgeErrorKind::UnsupportedOriginDtype,
                    format!("input {}: {} under {}", cx.slot, e, policy.mode),
                ))
            }
        };
        let target = relax(target, rank > 0, constrained, policy.mode);

        let matched = match_dtypes(table, &candidates, Slot::Input(cx.slot), &target);
        log::trace!(
            "{} input {}: dtype {:?} ({:?}) -> {:?}",
            node.id,
            cx.slot,
            target.dtypes,
            target.rule,
            matched
        );
        if let DtypeMatch::Reduced(got, _) = &matched {
            let message = format!(
                "input {} of '{}': precision reduced from {} to {}",
                cx.slot,
                node.name,
                target.primary(),
                got
            );
            let warning =
                Diagnostic::new(DiagLevel::Warning, Some(node.id), message).with_code(codes::W0100);
            log::warn!("{}", warning);
            warnings.push(warning);
        }
        if matched == DtypeMatch::NoMatch {
            let wanted: Vec<&str> = target.dtypes.iter().map(|t| t.name()).collect();
            return Err(NodeError::new(
                JudgeErrorKind::NoAdmissibleCombination,
                format!(
                    "input {}: no remaining combination accepts [{}]",
                    cx.slot,
                    wanted.join(", ")
                ),
            ));
        }
        candidates = matched.into_candidates();
    }

    let Some(&selected) = candidates.first() else {
        return Err(NodeError::new(
            JudgeErrorKind::NoAdmissibleCombination,
            "narrowing left no combination",
        ));
    };
    let combination = &table.combinations[selected];

    let place = |desc: &TensorDesc, spec: &SlotSpec| -> Result<TensorChoice, NodeError> {
        if table.no_reshape {
            let kept = origin_choice(desc)?;
            return Ok(TensorChoice {
                dtype: spec.dtype,
                ..kept
            });
        }
        let shape = transform(TransformArgs {
            shape: &desc.origin_shape,
            origin: desc.origin_layout,
            target: spec.format,
            groups: desc.groups(),
            dtype: spec.dtype,
        })
        .map_err(|e| NodeError::new(JudgeErrorKind::MalformedShapeRange, e.to_string()))?;
        Ok(TensorChoice {
            layout: Layout::with_groups(spec.format, desc.groups()),
            dtype: spec.dtype,
            shape,
        })
    };

    let chosen_inputs = node
        .inputs
        .iter()
        .zip(&combination.inputs)
        .map(|(d, s)| place(d, s))
        .collect::<Result<Vec<_>, _>>()?;
    let outputs = node
        .outputs
        .iter()
        .zip(&combination.outputs)
        .map(|(d, s)| place(d, s))
        .collect::<Result<Vec<_>, _>>()?;

    log::debug!(
        "{} '{}': {} combination {} of {}",
        node.id,
        node.name,
        table.op_type,
        selected,
        table.combinations.len()
    );
    Ok(Verdict {
        inputs: chosen_inputs,
        outputs,
        combination: Some(selected),
        warnings,
    })
}

/// Lower-priority inputs may fall back leniently; so may every input of a
/// node bound by subgraph agreement, unless the origin dtype must be kept.
fn relax(target: DtypeTarget, lower_priority: bool, constrained: bool, mode: PrecisionMode) -> DtypeTarget {
    let rule = match target.rule {
        _ if constrained && mode != PrecisionMode::MustKeepOriginDtype => MatchRule::Lenient,
        MatchRule::Rise if lower_priority => MatchRule::Lenient,
        rule => rule,
    };
    DtypeTarget { rule, ..target }
}

// ── Tests ───────────────────────────────────────────────────────────────────
