// dtype.rs — Element types and the rise lattice
//
// Defines the tensor element types a kernel may declare and the partial
// order ("rise") used when an exact element type is unavailable.
//
// Rise chains (within a family only):
//   Signed:   int4 → int8 → int16 → int32 → int64
//   Unsigned: uint8 → uint16 → uint32 → uint64
//   Float:    float16 → float32 → float64
//             bfloat16 → float32 → float64
// float16 and bfloat16 are incomparable. Cross-family rises never happen.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── Element types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Bool,
    Int4,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float16,
    Bfloat16,
    Float32,
    Float64,
}

/// Numeric family of an element type. Rises stay inside one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Bool,
    Signed,
    Unsigned,
    Float,
}

impl DataType {
    /// Every element type, in declaration order.
    pub const ALL: [DataType; 14] = [
        DataType::Bool,
        DataType::Int4,
        DataType::Int8,
        DataType::Uint8,
        DataType::Int16,
        DataType::Uint16,
        DataType::Int32,
        DataType::Uint32,
        DataType::Int64,
        DataType::Uint64,
        DataType::Float16,
        DataType::Bfloat16,
        DataType::Float32,
        DataType::Float64,
    ];

    pub const fn bits(self) -> u32 {
        match self {
            DataType::Bool | DataType::Int8 | DataType::Uint8 => 8,
            DataType::Int4 => 4,
            DataType::Int16 | DataType::Uint16 | DataType::Float16 | DataType::Bfloat16 => 16,
            DataType::Int32 | DataType::Uint32 | DataType::Float32 => 32,
            DataType::Int64 | DataType::Uint64 | DataType::Float64 => 64,
        }
    }

    pub const fn family(self) -> Family {
        match self {
            DataType::Bool => Family::Bool,
            DataType::Int4 | DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
                Family::Signed
            }
            DataType::Uint8 | DataType::Uint16 | DataType::Uint32 | DataType::Uint64 => {
                Family::Unsigned
            }
            DataType::Float16 | DataType::Bfloat16 | DataType::Float32 | DataType::Float64 => {
                Family::Float
            }
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self.family(), Family::Float)
    }

    /// Integral or boolean. Precision forcing never touches these.
    pub const fn is_integral(self) -> bool {
        !self.is_float()
    }

    pub const fn name(self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int4 => "int4",
            DataType::Int8 => "int8",
            DataType::Uint8 => "uint8",
            DataType::Int16 => "int16",
            DataType::Uint16 => "uint16",
            DataType::Int32 => "int32",
            DataType::Uint32 => "uint32",
            DataType::Int64 => "int64",
            DataType::Uint64 => "uint64",
            DataType::Float16 => "float16",
            DataType::Bfloat16 => "bfloat16",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown element type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDataType(pub String);

impl fmt::Display for UnknownDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown element type '{}'", self.0)
    }
}

impl std::error::Error for UnknownDataType {}

impl FromStr for DataType {
    type Err = UnknownDataType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fp16" | "half" => Ok(DataType::Float16),
            "bf16" => Ok(DataType::Bfloat16),
            "fp32" | "float" => Ok(DataType::Float32),
            "fp64" | "double" => Ok(DataType::Float64),
            _ => DataType::ALL
                .iter()
                .copied()
                .find(|t| t.name() == s)
                .ok_or_else(|| UnknownDataType(s.to_string())),
        }
    }
}

// ── Rise lattice ───────────────────────────────────────────────────────────

/// Position of a type in its family chain. Equal ranks with different
/// types (float16 / bfloat16) are incomparable.
fn rise_rank(t: DataType) -> u8 {
    match t {
        DataType::Bool => 0,
        DataType::Int4 => 0,
        DataType::Int8 => 1,
        DataType::Int16 => 2,
        DataType::Int32 => 3,
        DataType::Int64 => 4,
        DataType::Uint8 => 0,
        DataType::Uint16 => 1,
        DataType::Uint32 => 2,
        DataType::Uint64 => 3,
        DataType::Float16 | DataType::Bfloat16 => 0,
        DataType::Float32 => 1,
        DataType::Float64 => 2,
    }
}

/// Check whether `to` is an acceptable rise of `from`: equal, or strictly
/// wider within the same family.
pub fn can_rise(from: DataType, to: DataType) -> bool {
    if from == to {
        return true;
    }
    from.family() == to.family() && rise_rank(from) < rise_rank(to)
}

/// The lower-precision of two types under the lattice, or `None` when they
/// are incomparable.
pub fn lower_of(a: DataType, b: DataType) -> Option<DataType> {
    if can_rise(a, b) {
        Some(a)
    } else if can_rise(b, a) {
        Some(b)
    } else {
        None
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rise_same_type() {
        assert!(can_rise(DataType::Float16, DataType::Float16));
        assert!(can_rise(DataType::Bool, DataType::Bool));
    }

    #[test]
    fn rise_float_chain() {
        assert!(can_rise(DataType::Float16, DataType::Float32));
        assert!(can_rise(DataType::Bfloat16, DataType::Float32));
        assert!(can_rise(DataType::Float16, DataType::Float64));
        assert!(!can_rise(DataType::Float32, DataType::Float16));
    }

    #[test]
    fn half_types_incomparable() {
        assert!(!can_rise(DataType::Float16, DataType::Bfloat16));
        assert!(!can_rise(DataType::Bfloat16, DataType::Float16));
        assert_eq!(lower_of(DataType::Float16, DataType::Bfloat16), None);
    }

    #[test]
    fn cross_family_rejected() {
        assert!(!can_rise(DataType::Int32, DataType::Float32));
        assert!(!can_rise(DataType::Uint8, DataType::Int16));
        assert!(!can_rise(DataType::Bool, DataType::Int8));
    }

    #[test]
    fn lower_of_picks_narrower() {
        assert_eq!(
            lower_of(DataType::Float32, DataType::Float16),
            Some(DataType::Float16)
        );
        assert_eq!(
            lower_of(DataType::Int8, DataType::Int32),
            Some(DataType::Int8)
        );
    }

    #[test]
    fn rise_is_transitive() {
        for &a in &DataType::ALL {
            for &b in &DataType::ALL {
                for &c in &DataType::ALL {
                    if can_rise(a, b) && can_rise(b, c) {
                        assert!(can_rise(a, c), "{a} -> {b} -> {c} not transitive");
                    }
                }
            }
        }
    }

    #[test]
    fn parse_names_and_aliases() {
        assert_eq!("float16".parse::<DataType>(), Ok(DataType::Float16));
        assert_eq!("bf16".parse::<DataType>(), Ok(DataType::Bfloat16));
        assert_eq!("uint32".parse::<DataType>(), Ok(DataType::Uint32));
        assert!("complex64".parse::<DataType>().is_err());
    }
}
