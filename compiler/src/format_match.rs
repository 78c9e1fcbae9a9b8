// format_match.rs — Format matcher
//
// Narrows a node's candidate combinations by the layout its producers prefer.
// Never empties the candidate set: when neither the preferred nor the origin
// layout is offered, the slot places no constraint.

use crate::catalogue::{KernelTable, Slot};
use crate::layout::{Format, Layout};

/// What an input slot would like to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatPreference {
    /// Producer's chosen layout, or its origin layout when undecided.
    pub preferred: Layout,
    /// The slot's own origin layout.
    pub origin: Format,
    /// Group count of the slot's tensor (1 when ungrouped).
    pub groups: u32,
}

/// Which rule admitted the surviving candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatMatch {
    Preferred,
    Origin,
    Unconstrained,
}

fn admits(declared: Format, wanted: Layout, groups: u32) -> bool {
    Layout::with_groups(declared, groups) == wanted
}

/// Narrow `candidates` (ascending combination indices) for input `slot`.
pub fn match_formats(
    table: &KernelTable,
    candidates: &[usize],
    slot: usize,
    pref: &FormatPreference,
) -> (Vec<usize>, FormatMatch) {
    let filter = |wanted: Layout| -> Vec<usize> {
        candidates
            .iter()
            .copied()
            .filter(|&i| {
                table
                    .spec(i, Slot::Input(slot))
                    .is_some_and(|s| admits(s.format, wanted, pref.groups))
            })
            .collect()
    };

    let preferred = filter(pref.preferred);
    if !preferred.is_empty() {
        return (preferred, FormatMatch::Preferred);
    }
    let origin = filter(Layout::with_groups(pref.origin, pref.groups));
    if !origin.is_empty() {
        return (origin, FormatMatch::Origin);
    }
    (candidates.to_vec(), FormatMatch::Unconstrained)
}

// ── Tests ───────────────────────────────────────────────────────────────────
