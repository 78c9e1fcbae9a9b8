// dtype_match.rs — Dtype matcher
//
// Narrows candidate combinations to those whose declared dtype at a slot
// satisfies a precision target: exact first, then a rise of the target, then
// (lenient targets only) a reduction to a narrower type of the same family.

use crate::catalogue::{KernelTable, Slot};
use crate::dtype::{can_rise, DataType};
use crate::precision::{DtypeTarget, MatchRule};

/// Outcome of one dtype narrowing step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DtypeMatch {
    Exact(DataType, Vec<usize>),
    /// The target was unavailable; a wider type of the same family was taken.
    Rise(DataType, Vec<usize>),
    /// Lenient fallback to a strictly narrower type of the same family.
    Reduced(DataType, Vec<usize>),
    NoMatch,
}

impl DtypeMatch {
    pub fn into_candidates(self) -> Vec<usize> {
        match self {
            DtypeMatch::Exact(_, c) | DtypeMatch::Rise(_, c) | DtypeMatch::Reduced(_, c) => c,
            DtypeMatch::NoMatch => Vec::new(),
        }
    }
}

/// Narrow `candidates` (ascending combination indices) at `slot`.
pub fn match_dtypes(
    table: &KernelTable,
    candidates: &[usize],
    slot: Slot,
    target: &DtypeTarget,
) -> DtypeMatch {
    let declared = |i: usize| table.spec(i, slot).map(|s| s.dtype);
    let tied = |dtype: DataType| -> Vec<usize> {
        candidates
            .iter()
            .copied()
            .filter(|&i| declared(i) == Some(dtype))
            .collect()
    };

    for &want in &target.dtypes {
        let exact = tied(want);
        if !exact.is_empty() {
            return DtypeMatch::Exact(want, exact);
        }
    }
    if target.rule == MatchRule::Exact {
        return DtypeMatch::NoMatch;
    }

    for &want in &target.dtypes {
        let first_rise = candidates
            .iter()
            .filter_map(|&i| declared(i))
            .find(|&d| can_rise(want, d));
        if let Some(d) = first_rise {
            return DtypeMatch::Rise(d, tied(d));
        }
    }
    if target.rule == MatchRule::Rise {
        return DtypeMatch::NoMatch;
    }

    for &want in &target.dtypes {
        let narrower = candidates
            .iter()
            .filter_map(|&i| declared(i))
            .find(|&d| can_rise(d, want));
        if let Some(d) = narrower {
            return DtypeMatch::Reduced(d, tied(d));
        }
    }
    DtypeMatch::NoMatch
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::{Backend, Combination, SlotSpec};
    use crate::layout::Format;

    fn table(dtypes: &[DataType]) -> KernelTable {
        KernelTable::new(
            "T",
            Backend::Vector,
            dtypes
                .iter()
                .map(|&t| {
                    Combination::new(
                        vec![SlotSpec::new(Format::Nd, t)],
                        vec![SlotSpec::new(Format::Nd, t)],
                    )
                })
                .collect(),
        )
    }

    fn target(dtypes: &[DataType], rule: MatchRule) -> DtypeTarget {
        DtypeTarget {
            dtypes: dtypes.to_vec(),
            rule,
        }
    }

    #[test]
    fn exact_match_returns_all_ties() {
        let t = table(&[DataType::Float32, DataType::Float16, DataType::Float16]);
        let m = match_dtypes(
            &t,
            &[0, 1, 2],
            Slot::Input(0),
            &target(&[DataType::Float16], MatchRule::Exact),
        );
        assert_eq!(m, DtypeMatch::Exact(DataType::Float16, vec![1, 2]));
    }

    #[test]
    fn target_priority_order() {
        let t = table(&[DataType::Float32, DataType::Bfloat16]);
        let m = match_dtypes(
            &t,
            &[0, 1],
            Slot::Input(0),
            &target(&[DataType::Float16, DataType::Bfloat16, DataType::Float32], MatchRule::Exact),
        );
        assert_eq!(m, DtypeMatch::Exact(DataType::Bfloat16, vec![1]));
    }

    #[test]
    fn rise_takes_first_wider_in_table_order() {
        let t = table(&[
            DataType::Int8,
            DataType::Float64,
            DataType::Float32,
            DataType::Float64,
        ]);
        let m = match_dtypes(
            &t,
            &[0, 1, 2, 3],
            Slot::Output(0),
            &target(&[DataType::Float16], MatchRule::Rise),
        );
        assert_eq!(m, DtypeMatch::Rise(DataType::Float64, vec![1, 3]));
    }

    #[test]
    fn exact_rule_never_rises() {
        let t = table(&[DataType::Float32]);
        let m = match_dtypes(
            &t,
            &[0],
            Slot::Input(0),
            &target(&[DataType::Float16], MatchRule::Exact),
        );
        assert_eq!(m, DtypeMatch::NoMatch);
    }

    #[test]
    fn lenient_reduces_within_family() {
        let t = table(&[DataType::Int32, DataType::Float16]);
        let m = match_dtypes(
            &t,
            &[0, 1],
            Slot::Input(0),
            &target(&[DataType::Float32], MatchRule::Lenient),
        );
        assert_eq!(m, DtypeMatch::Reduced(DataType::Float16, vec![1]));

        let rise_only = match_dtypes(
            &t,
            &[0, 1],
            Slot::Input(0),
            &target(&[DataType::Float32], MatchRule::Rise),
        );
        assert_eq!(rise_only, DtypeMatch::NoMatch);
    }

    #[test]
    fn lenient_never_crosses_family() {
        let t = table(&[DataType::Int32]);
        let m = match_dtypes(
            &t,
            &[0],
            Slot::Input(0),
            &target(&[DataType::Float32], MatchRule::Lenient),
        );
        assert_eq!(m, DtypeMatch::NoMatch);
    }

    #[test]
    fn lenient_skips_incomparable_types() {
        let t = table(&[DataType::Float16, DataType::Float32]);
        let m = match_dtypes(
            &t,
            &[0, 1],
            Slot::Input(0),
            &target(&[DataType::Bfloat16], MatchRule::Lenient),
        );
        // float32 is a rise of bfloat16; float16 is never a reduction of it.
        assert_eq!(m, DtypeMatch::Rise(DataType::Float32, vec![1]));

        let m = match_dtypes(
            &t,
            &[0],
            Slot::Input(0),
            &target(&[DataType::Bfloat16], MatchRule::Lenient),
        );
        assert_eq!(m, DtypeMatch::NoMatch);
    }

    #[test]
    fn only_survivors_considered() {
        let t = table(&[DataType::Float16, DataType::Float32]);
        let m = match_dtypes(
            &t,
            &[1],
            Slot::Input(0),
            &target(&[DataType::Float16], MatchRule::Rise),
        );
        assert_eq!(m, DtypeMatch::Rise(DataType::Float32, vec![1]));
    }
}
