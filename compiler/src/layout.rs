// layout.rs — Layout catalogue
//
// Static description of every tensor layout the engine knows: which logical
// axes a plain layout orders, how blocked and fractal layouts relate to the
// origin rank, and the blocking constants their transforms use.
//
// Side effects: none (static tables only).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dtype::DataType;

/// Row/column tile size of the fractal layouts (the "N0" / "M0" axis).
pub const CUBE_BLOCK: u64 = 16;

/// Channel block (C0) for a given element type: a fractal tile row is 32 bytes
/// for 8-bit types and 16 elements otherwise.
pub fn c0_for(dtype: DataType) -> u64 {
    match dtype.bits() {
        4 => 64,
        8 => 32,
        _ => 16,
    }
}

// ── Axes ───────────────────────────────────────────────────────────────────

/// A logical tensor axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    N,
    C,
    D,
    H,
    W,
}

// ── Formats ────────────────────────────────────────────────────────────────

/// Primary tensor layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Format {
    #[serde(rename = "ND")]
    Nd,
    #[serde(rename = "NCHW")]
    Nchw,
    #[serde(rename = "NHWC")]
    Nhwc,
    #[serde(rename = "HWCN")]
    Hwcn,
    #[serde(rename = "CHWN")]
    Chwn,
    #[serde(rename = "NCDHW")]
    Ncdhw,
    #[serde(rename = "NDHWC")]
    Ndhwc,
    #[serde(rename = "DHWCN")]
    Dhwcn,
    #[serde(rename = "NC1HWC0")]
    Nc1hwc0,
    #[serde(rename = "NDC1HWC0")]
    Ndc1hwc0,
    #[serde(rename = "FRACTAL_Z")]
    FractalZ,
    #[serde(rename = "FRACTAL_Z_3D")]
    FractalZ3d,
    #[serde(rename = "FRACTAL_NZ")]
    FractalNz,
}

/// How a format's physical shape relates to the logical one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    /// Arbitrary rank, dimensions kept as-is.
    Nd,
    /// A permutation of the listed logical axes.
    Plain(&'static [Axis]),
    /// Channel axis split into C1 plus a trailing C0.
    Blocked,
    /// Axes merged into a tile-count axis plus fixed tile axes.
    Fractal,
}

const AXES_NCHW: &[Axis] = &[Axis::N, Axis::C, Axis::H, Axis::W];
const AXES_NHWC: &[Axis] = &[Axis::N, Axis::H, Axis::W, Axis::C];
const AXES_HWCN: &[Axis] = &[Axis::H, Axis::W, Axis::C, Axis::N];
const AXES_CHWN: &[Axis] = &[Axis::C, Axis::H, Axis::W, Axis::N];
const AXES_NCDHW: &[Axis] = &[Axis::N, Axis::C, Axis::D, Axis::H, Axis::W];
const AXES_NDHWC: &[Axis] = &[Axis::N, Axis::D, Axis::H, Axis::W, Axis::C];
const AXES_DHWCN: &[Axis] = &[Axis::D, Axis::H, Axis::W, Axis::C, Axis::N];

impl Format {
    pub const ALL: [Format; 13] = [
        Format::Nd,
        Format::Nchw,
        Format::Nhwc,
        Format::Hwcn,
        Format::Chwn,
        Format::Ncdhw,
        Format::Ndhwc,
        Format::Dhwcn,
        Format::Nc1hwc0,
        Format::Ndc1hwc0,
        Format::FractalZ,
        Format::FractalZ3d,
        Format::FractalNz,
    ];

    pub const fn kind(self) -> LayoutKind {
        match self {
            Format::Nd => LayoutKind::Nd,
            Format::Nchw => LayoutKind::Plain(AXES_NCHW),
            Format::Nhwc => LayoutKind::Plain(AXES_NHWC),
            Format::Hwcn => LayoutKind::Plain(AXES_HWCN),
            Format::Chwn => LayoutKind::Plain(AXES_CHWN),
            Format::Ncdhw => LayoutKind::Plain(AXES_NCDHW),
            Format::Ndhwc => LayoutKind::Plain(AXES_NDHWC),
            Format::Dhwcn => LayoutKind::Plain(AXES_DHWCN),
            Format::Nc1hwc0 | Format::Ndc1hwc0 => LayoutKind::Blocked,
            Format::FractalZ | Format::FractalZ3d | Format::FractalNz => LayoutKind::Fractal,
        }
    }

    /// Logical axes of a plain format, in storage order.
    pub fn axes(self) -> Option<&'static [Axis]> {
        match self.kind() {
            LayoutKind::Plain(axes) => Some(axes),
            _ => None,
        }
    }

    /// Rank of the logical shape this format is defined over. `None` for
    /// rank-agnostic formats (ND, FRACTAL_NZ).
    pub const fn origin_rank(self) -> Option<usize> {
        match self {
            Format::Nchw | Format::Nhwc | Format::Hwcn | Format::Chwn => Some(4),
            Format::Nc1hwc0 | Format::FractalZ => Some(4),
            Format::Ncdhw | Format::Ndhwc | Format::Dhwcn => Some(5),
            Format::Ndc1hwc0 | Format::FractalZ3d => Some(5),
            Format::Nd | Format::FractalNz => None,
        }
    }

    /// Whether two tensors of this format with different group counts are
    /// laid out differently.
    pub const fn is_group_sensitive(self) -> bool {
        matches!(self, Format::FractalZ | Format::FractalZ3d)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Format::Nd => "ND",
            Format::Nchw => "NCHW",
            Format::Nhwc => "NHWC",
            Format::Hwcn => "HWCN",
            Format::Chwn => "CHWN",
            Format::Ncdhw => "NCDHW",
            Format::Ndhwc => "NDHWC",
            Format::Dhwcn => "DHWCN",
            Format::Nc1hwc0 => "NC1HWC0",
            Format::Ndc1hwc0 => "NDC1HWC0",
            Format::FractalZ => "FRACTAL_Z",
            Format::FractalZ3d => "FRACTAL_Z_3D",
            Format::FractalNz => "FRACTAL_NZ",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFormat(pub String);

impl fmt::Display for UnknownFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown layout '{}'", self.0)
    }
}

impl std::error::Error for UnknownFormat {}

impl FromStr for Format {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        Format::ALL
            .iter()
            .copied()
            .find(|f| f.name() == upper)
            .ok_or_else(|| UnknownFormat(s.to_string()))
    }
}

// ── Layout (format + group sub-tag) ────────────────────────────────────────

fn is_ungrouped(groups: &u32) -> bool {
    *groups <= 1
}

fn default_groups() -> u32 {
    1
}

/// A chosen layout: primary format plus the group count sub-tag carried by
/// group-sensitive formats. Two layouts with the same format but different
/// group counts compare unequal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Layout {
    pub format: Format,
    #[serde(default = "default_groups", skip_serializing_if = "is_ungrouped")]
    pub groups: u32,
}

impl Layout {
    pub const fn new(format: Format) -> Self {
        Layout { format, groups: 1 }
    }

    /// Layout for `format` on a tensor with `groups` channel groups. The
    /// sub-tag is only kept for group-sensitive formats.
    pub fn with_groups(format: Format, groups: u32) -> Self {
        if format.is_group_sensitive() && groups > 1 {
            Layout { format, groups }
        } else {
            Layout::new(format)
        }
    }
}

impl From<Format> for Layout {
    fn from(format: Format) -> Self {
        Layout::new(format)
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.groups > 1 {
            write!(f, "{}:{}", self.format, self.groups)
        } else {
            write!(f, "{}", self.format)
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
