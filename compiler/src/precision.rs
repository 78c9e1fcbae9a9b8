// precision.rs — Precision policy resolver
//
// Maps the global precision mode, an operator's precision class and the
// incoming element type to the dtype target a node's input is matched against.
//
// Preconditions: `supported` lists the dtypes the node's kernel table declares
//   at the slot being resolved.
// Postconditions: the target is non-empty.
// Failure modes: the policy demands the origin dtype (or a fixed mix-list
//   dtype) that the kernel cannot execute → `UnsupportedOrigin`.
// Side effects: none.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dtype::{lower_of, DataType};

// ── Policy values ──────────────────────────────────────────────────────────

/// Per-operator classification used by the mixed-precision modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecisionClass {
    #[default]
    Unrestricted,
    PreferLow,
    PreferHigh,
    MustKeepOriginal,
}

impl PrecisionClass {
    pub const ALL: [PrecisionClass; 4] = [
        PrecisionClass::Unrestricted,
        PrecisionClass::PreferLow,
        PrecisionClass::PreferHigh,
        PrecisionClass::MustKeepOriginal,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            PrecisionClass::Unrestricted => "unrestricted",
            PrecisionClass::PreferLow => "prefer_low",
            PrecisionClass::PreferHigh => "prefer_high",
            PrecisionClass::MustKeepOriginal => "must_keep_original",
        }
    }
}

/// Process-wide precision mode. Read once per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecisionMode {
    #[default]
    Default,
    MustKeepOriginDtype,
    ForceFp16,
    ForceBf16,
    ForceFp32,
    ForceLowerPrecision,
    AllowFp32ToFp16,
    AllowFp32ToBf16,
    AllowFp32ToLowPrecision,
    AllowMixPrecision,
    AllowMixPrecisionFp16,
    AllowMixPrecisionBf16,
}

impl PrecisionMode {
    pub const ALL: [PrecisionMode; 12] = [
        PrecisionMode::Default,
        PrecisionMode::MustKeepOriginDtype,
        PrecisionMode::ForceFp16,
        PrecisionMode::ForceBf16,
        PrecisionMode::ForceFp32,
        PrecisionMode::ForceLowerPrecision,
        PrecisionMode::AllowFp32ToFp16,
        PrecisionMode::AllowFp32ToBf16,
        PrecisionMode::AllowFp32ToLowPrecision,
        PrecisionMode::AllowMixPrecision,
        PrecisionMode::AllowMixPrecisionFp16,
        PrecisionMode::AllowMixPrecisionBf16,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            PrecisionMode::Default => "default",
            PrecisionMode::MustKeepOriginDtype => "must_keep_origin_dtype",
            PrecisionMode::ForceFp16 => "force_fp16",
            PrecisionMode::ForceBf16 => "force_bf16",
            PrecisionMode::ForceFp32 => "force_fp32",
            PrecisionMode::ForceLowerPrecision => "force_lower_precision",
            PrecisionMode::AllowFp32ToFp16 => "allow_fp32_to_fp16",
            PrecisionMode::AllowFp32ToBf16 => "allow_fp32_to_bf16",
            PrecisionMode::AllowFp32ToLowPrecision => "allow_fp32_to_low_precision",
            PrecisionMode::AllowMixPrecision => "allow_mix_precision",
            PrecisionMode::AllowMixPrecisionFp16 => "allow_mix_precision_fp16",
            PrecisionMode::AllowMixPrecisionBf16 => "allow_mix_precision_bf16",
        }
    }

    /// Whether the mode consults operator precision classes.
    pub const fn is_mixed(self) -> bool {
        matches!(
            self,
            PrecisionMode::AllowMixPrecision
                | PrecisionMode::AllowMixPrecisionFp16
                | PrecisionMode::AllowMixPrecisionBf16
        )
    }
}

impl fmt::Display for PrecisionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for PrecisionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown mode or class name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPolicyName {
    pub what: &'static str,
    pub name: String,
}

impl fmt::Display for UnknownPolicyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.what, self.name)
    }
}

impl std::error::Error for UnknownPolicyName {}

impl FromStr for PrecisionMode {
    type Err = UnknownPolicyName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.replace('-', "_");
        PrecisionMode::ALL
            .iter()
            .copied()
            .find(|m| m.name() == normalized)
            .ok_or_else(|| UnknownPolicyName {
                what: "precision mode",
                name: s.to_string(),
            })
    }
}

impl FromStr for PrecisionClass {
    type Err = UnknownPolicyName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.replace('-', "_");
        PrecisionClass::ALL
            .iter()
            .copied()
            .find(|c| c.name() == normalized)
            .ok_or_else(|| UnknownPolicyName {
                what: "precision class",
                name: s.to_string(),
            })
    }
}

// ── Targets ────────────────────────────────────────────────────────────────

/// How far the dtype matcher may stray from the target dtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    /// Only the listed dtypes.
    Exact,
    /// The listed dtypes, then a rise of them.
    Rise,
    /// Exact, then rise, then any dtype of the same family (a reduction).
    Lenient,
}

/// Dtype(s) an input slot is matched against, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtypeTarget {
    pub dtypes: Vec<DataType>,
    pub rule: MatchRule,
}

impl DtypeTarget {
    fn one(dtype: DataType, rule: MatchRule) -> Self {
        DtypeTarget {
            dtypes: vec![dtype],
            rule,
        }
    }

    pub fn primary(&self) -> DataType {
        self.dtypes[0]
    }
}

/// The policy demands dtypes the kernel does not declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedOrigin {
    pub wanted: Vec<DataType>,
}

impl fmt::Display for UnsupportedOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.wanted.iter().map(|t| t.name()).collect();
        write!(f, "kernel supports none of [{}]", names.join(", "))
    }
}

impl std::error::Error for UnsupportedOrigin {}

/// Exact-only target over `wanted` restricted to what the kernel declares.
fn keep_exact(wanted: &[DataType], supported: &[DataType]) -> Result<DtypeTarget, UnsupportedOrigin> {
    let mut dtypes: Vec<DataType> = Vec::new();
    for t in wanted {
        if supported.contains(t) && !dtypes.contains(t) {
            dtypes.push(*t);
        }
    }
    if dtypes.is_empty() {
        let mut wanted = wanted.to_vec();
        wanted.dedup();
        return Err(UnsupportedOrigin { wanted });
    }
    Ok(DtypeTarget {
        dtypes,
        rule: MatchRule::Exact,
    })
}

/// Resolve the dtype target for one input slot.
///
/// `predecessor` is the producer's chosen dtype (or the slot's origin dtype
/// for graph inputs).
pub fn resolve_target_dtype(
    mode: PrecisionMode,
    class: PrecisionClass,
    predecessor: DataType,
    origin: DataType,
    supported: &[DataType],
) -> Result<DtypeTarget, UnsupportedOrigin> {
    use PrecisionMode as M;

    let target = match mode {
        M::MustKeepOriginDtype => return keep_exact(&[origin], supported),
        M::ForceFp16 | M::ForceBf16 | M::ForceFp32 => {
            let forced = match mode {
                M::ForceFp16 => DataType::Float16,
                M::ForceBf16 => DataType::Bfloat16,
                _ => DataType::Float32,
            };
            if predecessor.is_integral() {
                DtypeTarget::one(predecessor, MatchRule::Lenient)
            } else {
                DtypeTarget::one(forced, MatchRule::Lenient)
            }
        }
        M::ForceLowerPrecision => {
            let lower = lower_of(predecessor, DataType::Float16).unwrap_or(predecessor);
            DtypeTarget::one(lower, MatchRule::Lenient)
        }
        M::AllowFp32ToFp16 | M::AllowFp32ToBf16 | M::AllowFp32ToLowPrecision => {
            if predecessor == DataType::Float32 {
                let dtypes = match mode {
                    M::AllowFp32ToFp16 => vec![DataType::Float16, DataType::Float32],
                    M::AllowFp32ToBf16 => vec![DataType::Bfloat16, DataType::Float32],
                    _ => vec![DataType::Float16, DataType::Bfloat16, DataType::Float32],
                };
                DtypeTarget {
                    dtypes,
                    rule: MatchRule::Lenient,
                }
            } else {
                DtypeTarget::one(predecessor, MatchRule::Lenient)
            }
        }
        M::AllowMixPrecision | M::AllowMixPrecisionFp16 | M::AllowMixPrecisionBf16 => {
            if predecessor.is_integral() {
                DtypeTarget::one(predecessor, MatchRule::Lenient)
            } else {
                let narrow = if mode == M::AllowMixPrecisionBf16 {
                    DataType::Bfloat16
                } else {
                    DataType::Float16
                };
                match class {
                    PrecisionClass::PreferLow => return keep_exact(&[narrow, origin], supported),
                    PrecisionClass::PreferHigh => {
                        return keep_exact(&[DataType::Float32, origin], supported)
                    }
                    PrecisionClass::MustKeepOriginal => return keep_exact(&[origin], supported),
                    PrecisionClass::Unrestricted => DtypeTarget::one(predecessor, MatchRule::Rise),
                }
            }
        }
        M::Default => DtypeTarget::one(predecessor, MatchRule::Lenient),
    };
    Ok(target)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_FLOATS: &[DataType] = &[
        DataType::Float16,
        DataType::Bfloat16,
        DataType::Float32,
    ];

    fn resolve(
        mode: PrecisionMode,
        class: PrecisionClass,
        pred: DataType,
        origin: DataType,
    ) -> Result<DtypeTarget, UnsupportedOrigin> {
        resolve_target_dtype(mode, class, pred, origin, ALL_FLOATS)
    }

    #[test]
    fn must_keep_origin_requires_support() {
        let t = resolve(
            PrecisionMode::MustKeepOriginDtype,
            PrecisionClass::Unrestricted,
            DataType::Float16,
            DataType::Float32,
        )
        .unwrap();
        assert_eq!(t.dtypes, vec![DataType::Float32]);
        assert_eq!(t.rule, MatchRule::Exact);

        let err = resolve(
            PrecisionMode::MustKeepOriginDtype,
            PrecisionClass::Unrestricted,
            DataType::Int32,
            DataType::Int32,
        )
        .unwrap_err();
        assert_eq!(err.wanted, vec![DataType::Int32]);
    }

    #[test]
    fn force_never_touches_integers() {
        let t = resolve(
            PrecisionMode::ForceFp16,
            PrecisionClass::Unrestricted,
            DataType::Int32,
            DataType::Int32,
        )
        .unwrap();
        assert_eq!(t.primary(), DataType::Int32);

        let t = resolve(
            PrecisionMode::ForceBf16,
            PrecisionClass::Unrestricted,
            DataType::Float32,
            DataType::Float32,
        )
        .unwrap();
        assert_eq!(t.primary(), DataType::Bfloat16);
    }

    #[test]
    fn force_lower_precision_keeps_incomparable() {
        let t = resolve(
            PrecisionMode::ForceLowerPrecision,
            PrecisionClass::Unrestricted,
            DataType::Float32,
            DataType::Float32,
        )
        .unwrap();
        assert_eq!(t.primary(), DataType::Float16);

        let t = resolve(
            PrecisionMode::ForceLowerPrecision,
            PrecisionClass::Unrestricted,
            DataType::Bfloat16,
            DataType::Float32,
        )
        .unwrap();
        assert_eq!(t.primary(), DataType::Bfloat16);
    }

    #[test]
    fn allow_fp32_to_fp16_only_narrows_fp32() {
        let t = resolve(
            PrecisionMode::AllowFp32ToFp16,
            PrecisionClass::Unrestricted,
            DataType::Float32,
            DataType::Float32,
        )
        .unwrap();
        assert_eq!(t.dtypes, vec![DataType::Float16, DataType::Float32]);

        let t = resolve(
            PrecisionMode::AllowFp32ToFp16,
            PrecisionClass::Unrestricted,
            DataType::Float64,
            DataType::Float64,
        )
        .unwrap();
        assert_eq!(t.dtypes, vec![DataType::Float64]);
    }

    #[test]
    fn mix_precision_classes() {
        let low = resolve(
            PrecisionMode::AllowMixPrecisionBf16,
            PrecisionClass::PreferLow,
            DataType::Float32,
            DataType::Float32,
        )
        .unwrap();
        assert_eq!(low.dtypes, vec![DataType::Bfloat16, DataType::Float32]);
        assert_eq!(low.rule, MatchRule::Exact);

        let high = resolve(
            PrecisionMode::AllowMixPrecision,
            PrecisionClass::PreferHigh,
            DataType::Float16,
            DataType::Float16,
        )
        .unwrap();
        assert_eq!(high.dtypes, vec![DataType::Float32, DataType::Float16]);

        let gray = resolve(
            PrecisionMode::AllowMixPrecisionFp16,
            PrecisionClass::Unrestricted,
            DataType::Float16,
            DataType::Float32,
        )
        .unwrap();
        assert_eq!(gray.dtypes, vec![DataType::Float16]);
        assert_eq!(gray.rule, MatchRule::Rise);
    }

    #[test]
    fn mix_precision_prefer_low_unsupported() {
        let err = resolve_target_dtype(
            PrecisionMode::AllowMixPrecision,
            PrecisionClass::PreferLow,
            DataType::Float32,
            DataType::Float64,
            &[DataType::Float32],
        )
        .unwrap_err();
        assert_eq!(err.wanted, vec![DataType::Float16, DataType::Float64]);
    }

    #[test]
    fn default_passes_predecessor_through() {
        let t = resolve(
            PrecisionMode::Default,
            PrecisionClass::PreferLow,
            DataType::Bfloat16,
            DataType::Float32,
        )
        .unwrap();
        assert_eq!(t.dtypes, vec![DataType::Bfloat16]);
        assert_eq!(t.rule, MatchRule::Lenient);
    }

    #[test]
    fn totality_over_all_inputs() {
        let supported_sets: [&[DataType]; 3] = [&[], ALL_FLOATS, &DataType::ALL];
        for mode in PrecisionMode::ALL {
            for class in PrecisionClass::ALL {
                for pred in DataType::ALL {
                    for origin in DataType::ALL {
                        for supported in supported_sets {
                            if let Ok(t) =
                                resolve_target_dtype(mode, class, pred, origin, supported)
                            {
                                assert!(!t.dtypes.is_empty());
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn parse_mode_names() {
        assert_eq!(
            "allow_mix_precision_bf16".parse::<PrecisionMode>(),
            Ok(PrecisionMode::AllowMixPrecisionBf16)
        );
        assert_eq!(
            "must-keep-origin-dtype".parse::<PrecisionMode>(),
            Ok(PrecisionMode::MustKeepOriginDtype)
        );
        assert!("fastest".parse::<PrecisionMode>().is_err());
        assert_eq!(
            "prefer_high".parse::<PrecisionClass>(),
            Ok(PrecisionClass::PreferHigh)
        );
    }
}
