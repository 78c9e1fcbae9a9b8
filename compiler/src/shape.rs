// shape.rs — Shapes, unknown-dimension ranges and the layout shape transformer
//
// Recomputes a tensor's physical shape from its logical (origin) shape when a
// layout is chosen. Unknown dimensions carry an inclusive (min, max) range;
// every transform applies its arithmetic to both bounds independently.
//
// Preconditions: `Shape::range` holds exactly one entry per unknown dimension.
// Postconditions: the result upholds the same invariant, and every produced
//   range keeps `min <= max` when the input ranges did.
// Failure modes: range length mismatch → `ShapeError::MalformedRange`.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dtype::DataType;
use crate::layout::{c0_for, Axis, Format, LayoutKind, CUBE_BLOCK};

// ── Dimensions and ranges ──────────────────────────────────────────────────

/// One logical dimension. Serialized as an integer, `-1` for unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum Dim {
    Known(u64),
    Unknown,
}

impl From<i64> for Dim {
    fn from(v: i64) -> Self {
        if v < 0 {
            Dim::Unknown
        } else {
            Dim::Known(v as u64)
        }
    }
}

impl From<Dim> for i64 {
    fn from(d: Dim) -> Self {
        match d {
            Dim::Known(v) => v as i64,
            Dim::Unknown => -1,
        }
    }
}

/// Inclusive bound on an unknown dimension. `max == None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DimRange {
    pub min: u64,
    pub max: Option<u64>,
}

impl DimRange {
    pub const fn new(min: u64, max: u64) -> Self {
        DimRange {
            min,
            max: Some(max),
        }
    }

    pub const fn unbounded(min: u64) -> Self {
        DimRange { min, max: None }
    }

    pub fn is_ordered(&self) -> bool {
        self.max.map_or(true, |max| self.min <= max)
    }

    fn ceil_div(self, block: u64) -> Self {
        DimRange {
            min: self.min.div_ceil(block),
            max: self.max.map(|m| m.div_ceil(block)),
        }
    }

    fn scale(self, k: u64) -> Self {
        DimRange {
            min: self.min.saturating_mul(k),
            max: self.max.map(|m| m.saturating_mul(k)),
        }
    }

    fn mul(self, other: DimRange) -> Self {
        DimRange {
            min: self.min.saturating_mul(other.min),
            max: match (self.max, other.max) {
                (Some(a), Some(b)) => Some(a.saturating_mul(b)),
                _ => None,
            },
        }
    }
}

impl fmt::Display for DimRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "{}..{}", self.min, max),
            None => write!(f, "{}..", self.min),
        }
    }
}

// ── Shape ──────────────────────────────────────────────────────────────────

/// A shape plus the ranges of its unknown dimensions, in dimension order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    pub dims: Vec<Dim>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub range: Vec<DimRange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    /// `range` length differs from the number of unknown dimensions.
    MalformedRange { unknown_dims: usize, ranges: usize },
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeError::MalformedRange {
                unknown_dims,
                ranges,
            } => write!(
                f,
                "shape has {} unknown dimension(s) but {} range entr{}",
                unknown_dims,
                ranges,
                if *ranges == 1 { "y" } else { "ies" }
            ),
        }
    }
}

impl std::error::Error for ShapeError {}

impl Shape {
    /// A fully known shape.
    pub fn fixed(dims: &[u64]) -> Self {
        Shape {
            dims: dims.iter().map(|&d| Dim::Known(d)).collect(),
            range: Vec::new(),
        }
    }

    pub fn new(dims: Vec<Dim>, range: Vec<DimRange>) -> Self {
        Shape { dims, range }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn unknown_count(&self) -> usize {
        self.dims.iter().filter(|d| **d == Dim::Unknown).count()
    }

    pub fn validate(&self) -> Result<(), ShapeError> {
        let unknown_dims = self.unknown_count();
        if unknown_dims != self.range.len() {
            return Err(ShapeError::MalformedRange {
                unknown_dims,
                ranges: self.range.len(),
            });
        }
        Ok(())
    }

    fn extents(&self) -> Result<Vec<Extent>, ShapeError> {
        self.validate()?;
        let mut ranges = self.range.iter();
        Ok(self
            .dims
            .iter()
            .map(|d| match d {
                Dim::Known(v) => Extent::Fixed(*v),
                // validate() guarantees one range per unknown dim
                Dim::Unknown => Extent::Ranged(ranges.next().copied().unwrap_or(DimRange::unbounded(0))),
            })
            .collect())
    }

    fn from_extents(extents: &[Extent]) -> Self {
        let mut shape = Shape::default();
        for e in extents {
            match e {
                Extent::Fixed(v) => shape.dims.push(Dim::Known(*v)),
                Extent::Ranged(r) => {
                    shape.dims.push(Dim::Unknown);
                    shape.range.push(*r);
                }
            }
        }
        shape
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match d {
                Dim::Known(v) => write!(f, "{}", v)?,
                Dim::Unknown => write!(f, "?")?,
            }
        }
        write!(f, "]")?;
        if !self.range.is_empty() {
            let ranges: Vec<String> = self.range.iter().map(|r| r.to_string()).collect();
            write!(f, " range [{}]", ranges.join(", "))?;
        }
        Ok(())
    }
}

// ── Extent arithmetic ──────────────────────────────────────────────────────

/// A dimension during transformation: fixed, or unknown with its range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extent {
    Fixed(u64),
    Ranged(DimRange),
}

impl Extent {
    fn ceil_div(self, block: u64) -> Extent {
        match self {
            Extent::Fixed(v) => Extent::Fixed(v.div_ceil(block)),
            Extent::Ranged(r) => Extent::Ranged(r.ceil_div(block)),
        }
    }

    fn mul(self, other: Extent) -> Extent {
        match (self, other) {
            (Extent::Fixed(a), Extent::Fixed(b)) => Extent::Fixed(a.saturating_mul(b)),
            (Extent::Fixed(k), Extent::Ranged(r)) | (Extent::Ranged(r), Extent::Fixed(k)) => {
                Extent::Ranged(r.scale(k))
            }
            (Extent::Ranged(a), Extent::Ranged(b)) => Extent::Ranged(a.mul(b)),
        }
    }
}

/// Logical axes extracted from an origin shape. Axes absent from the origin
/// layout (D for 4-D origins) are 1.
struct AxisMap {
    n: Extent,
    c: Extent,
    d: Extent,
    h: Extent,
    w: Extent,
}

impl AxisMap {
    fn get(&self, axis: Axis) -> Extent {
        match axis {
            Axis::N => self.n,
            Axis::C => self.c,
            Axis::D => self.d,
            Axis::H => self.h,
            Axis::W => self.w,
        }
    }
}

const AXES_4D: &[Axis] = &[Axis::N, Axis::C, Axis::H, Axis::W];
const AXES_5D: &[Axis] = &[Axis::N, Axis::C, Axis::D, Axis::H, Axis::W];

fn pad_left(extents: &[Extent], rank: usize) -> Vec<Extent> {
    let mut padded = vec![Extent::Fixed(1); rank.saturating_sub(extents.len())];
    padded.extend_from_slice(extents);
    padded
}

/// Interpret `extents` (laid out in `origin`) as named axes. ND origins are
/// read as NCHW / NCDHW depending on the rank the target expects.
fn axis_map(extents: &[Extent], origin: Format, target_rank: usize) -> Option<AxisMap> {
    let axes = match origin.axes() {
        Some(axes) => axes,
        None if target_rank == 5 => AXES_5D,
        None => AXES_4D,
    };
    if extents.len() > axes.len() {
        return None;
    }
    let padded = pad_left(extents, axes.len());
    let mut map = AxisMap {
        n: Extent::Fixed(1),
        c: Extent::Fixed(1),
        d: Extent::Fixed(1),
        h: Extent::Fixed(1),
        w: Extent::Fixed(1),
    };
    for (axis, extent) in axes.iter().zip(padded) {
        match axis {
            Axis::N => map.n = extent,
            Axis::C => map.c = extent,
            Axis::D => map.d = extent,
            Axis::H => map.h = extent,
            Axis::W => map.w = extent,
        }
    }
    Some(map)
}

// ── Transformer ────────────────────────────────────────────────────────────

/// Inputs to one shape transform.
#[derive(Debug, Clone, Copy)]
pub struct TransformArgs<'a> {
    pub shape: &'a Shape,
    pub origin: Format,
    pub target: Format,
    /// Channel groups; values <= 1 mean ungrouped.
    pub groups: u32,
    /// Element type of the chosen combination (selects C0).
    pub dtype: DataType,
}

/// Compute the physical shape of `args.shape` under `args.target`.
///
/// Transform pairs the catalogue cannot interpret (a 5-D plain origin into a
/// 4-D blocked target, an over-long shape) keep the origin dimensions.
pub fn transform(args: TransformArgs<'_>) -> Result<Shape, ShapeError> {
    let extents = args.shape.extents()?;
    // Short plain shapes still get their leading 1s under the same format.
    let short_plain = matches!(
        args.target.kind(),
        LayoutKind::Plain(axes) if extents.len() < axes.len()
    );
    if args.origin == args.target && !short_plain {
        return Ok(args.shape.clone());
    }
    let c0 = c0_for(args.dtype);

    let physical = match args.target.kind() {
        LayoutKind::Nd => None,
        LayoutKind::Plain(axes) => transform_plain(&extents, args.origin, axes),
        LayoutKind::Blocked => transform_blocked(&extents, args.origin, args.target, c0),
        LayoutKind::Fractal => match args.target {
            Format::FractalNz => Some(transform_fractal_nz(&extents, c0)),
            _ => transform_fractal_z(&extents, args.origin, args.target, args.groups, c0),
        },
    };

    Ok(match physical {
        Some(p) => Shape::from_extents(&p),
        None => {
            log::trace!(
                "no shape transform {} -> {} for rank {}; keeping origin dims",
                args.origin,
                args.target,
                extents.len()
            );
            args.shape.clone()
        }
    })
}

fn transform_plain(extents: &[Extent], origin: Format, axes: &[Axis]) -> Option<Vec<Extent>> {
    let map = axis_map(extents, origin, axes.len())?;
    // A 5-D origin cannot be squeezed into a 4-D permutation.
    if axes.len() == 4 && origin.origin_rank() == Some(5) {
        return None;
    }
    Some(axes.iter().map(|&a| map.get(a)).collect())
}

fn transform_blocked(
    extents: &[Extent],
    origin: Format,
    target: Format,
    c0: u64,
) -> Option<Vec<Extent>> {
    let rank = target.origin_rank()?;
    if rank == 4 && origin.origin_rank() == Some(5) {
        return None;
    }
    let m = axis_map(extents, origin, rank)?;
    let c1 = m.c.ceil_div(c0);
    let c0 = Extent::Fixed(c0);
    Some(match target {
        Format::Ndc1hwc0 => vec![m.n, m.d, c1, m.h, m.w, c0],
        _ => vec![m.n, c1, m.h, m.w, c0],
    })
}

fn transform_fractal_z(
    extents: &[Extent],
    origin: Format,
    target: Format,
    groups: u32,
    c0: u64,
) -> Option<Vec<Extent>> {
    let rank = target.origin_rank()?;
    if rank == 4 && origin.origin_rank() == Some(5) {
        return None;
    }
    let m = axis_map(extents, origin, rank)?;
    let kernel_volume = match target {
        Format::FractalZ3d => m.d.mul(m.h).mul(m.w),
        _ => m.h.mul(m.w),
    };
    let (c1, n1) = if groups > 1 {
        let g = u64::from(groups);
        let c1 = m.c.ceil_div(g).ceil_div(c0).mul(Extent::Fixed(g));
        (c1, m.n.ceil_div(g).ceil_div(CUBE_BLOCK))
    } else {
        (m.c.ceil_div(c0), m.n.ceil_div(CUBE_BLOCK))
    };
    Some(vec![
        c1.mul(kernel_volume),
        n1,
        Extent::Fixed(CUBE_BLOCK),
        Extent::Fixed(c0),
    ])
}

fn transform_fractal_nz(extents: &[Extent], c0: u64) -> Vec<Extent> {
    let padded = pad_left(extents, 2);
    let (batch, matrix) = padded.split_at(padded.len() - 2);
    let (m, n) = (matrix[0], matrix[1]);
    let mut out = batch.to_vec();
    out.extend([
        n.ceil_div(c0),
        m.ceil_div(CUBE_BLOCK),
        Extent::Fixed(CUBE_BLOCK),
        Extent::Fixed(c0),
    ]);
    out
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn run(shape: &Shape, origin: Format, target: Format) -> Shape {
        transform(TransformArgs {
            shape,
            origin,
            target,
            groups: 1,
            dtype: DataType::Float16,
        })
        .unwrap()
    }

    #[test]
    fn permutation_nchw_to_nhwc() {
        let out = run(&Shape::fixed(&[1, 3, 224, 200]), Format::Nchw, Format::Nhwc);
        assert_eq!(out, Shape::fixed(&[1, 224, 200, 3]));
    }

    #[test]
    fn short_shape_pads_under_same_format() {
        let shape = Shape::fixed(&[32]);
        assert_eq!(run(&shape, Format::Nchw, Format::Nchw), Shape::fixed(&[1, 1, 1, 32]));
        assert_eq!(run(&shape, Format::Nchw, Format::Nhwc), Shape::fixed(&[1, 1, 32, 1]));
        assert_eq!(
            run(&shape, Format::Ncdhw, Format::Ncdhw),
            Shape::fixed(&[1, 1, 1, 1, 32])
        );
        // Full-rank and ND shapes are returned untouched.
        let full = Shape::fixed(&[2, 3, 4, 5]);
        assert_eq!(run(&full, Format::Nhwc, Format::Nhwc), full);
        assert_eq!(run(&shape, Format::Nd, Format::Nd), shape);
    }

    #[test]
    fn permutation_moves_ranges() {
        let shape = Shape::new(
            vec![Dim::Unknown, Dim::Known(3), Dim::Unknown, Dim::Known(8)],
            vec![DimRange::new(1, 4), DimRange::new(16, 32)],
        );
        let out = run(&shape, Format::Nchw, Format::Hwcn);
        assert_eq!(
            out.dims,
            vec![Dim::Unknown, Dim::Known(8), Dim::Known(3), Dim::Unknown]
        );
        assert_eq!(out.range, vec![DimRange::new(16, 32), DimRange::new(1, 4)]);
    }

    #[test]
    fn blocked_splits_channels() {
        let out = run(&Shape::fixed(&[2, 35, 7, 7]), Format::Nchw, Format::Nc1hwc0);
        assert_eq!(out, Shape::fixed(&[2, 3, 7, 7, 16]));
    }

    #[test]
    fn blocked_from_nhwc() {
        let out = run(&Shape::fixed(&[2, 7, 7, 64]), Format::Nhwc, Format::Nc1hwc0);
        assert_eq!(out, Shape::fixed(&[2, 4, 7, 7, 16]));
    }

    #[test]
    fn blocked_int8_uses_wider_c0() {
        let out = transform(TransformArgs {
            shape: &Shape::fixed(&[1, 64, 4, 4]),
            origin: Format::Nchw,
            target: Format::Nc1hwc0,
            groups: 1,
            dtype: DataType::Int8,
        })
        .unwrap();
        assert_eq!(out, Shape::fixed(&[1, 2, 4, 4, 32]));
    }

    #[test]
    fn blocked_unknown_channel_range() {
        let shape = Shape::new(
            vec![Dim::Known(1), Dim::Unknown, Dim::Known(4), Dim::Known(4)],
            vec![DimRange::new(17, 40)],
        );
        let out = run(&shape, Format::Nchw, Format::Nc1hwc0);
        assert_eq!(
            out.dims,
            vec![
                Dim::Known(1),
                Dim::Unknown,
                Dim::Known(4),
                Dim::Known(4),
                Dim::Known(16)
            ]
        );
        assert_eq!(out.range, vec![DimRange::new(2, 3)]);
    }

    #[test]
    fn blocked_3d() {
        let out = run(
            &Shape::fixed(&[1, 20, 3, 8, 8]),
            Format::Ncdhw,
            Format::Ndc1hwc0,
        );
        assert_eq!(out, Shape::fixed(&[1, 3, 2, 8, 8, 16]));
    }

    #[test]
    fn fractal_z_weights() {
        // Cout=64, Cin=32, 3x3
        let out = run(&Shape::fixed(&[64, 32, 3, 3]), Format::Nchw, Format::FractalZ);
        assert_eq!(out, Shape::fixed(&[2 * 9, 4, 16, 16]));
    }

    #[test]
    fn fractal_z_3d_grouped() {
        // 192 channels in 8 groups, 3x3x3 kernel
        let out = transform(TransformArgs {
            shape: &Shape::fixed(&[192, 192, 3, 3, 3]),
            origin: Format::Ncdhw,
            target: Format::FractalZ3d,
            groups: 8,
            dtype: DataType::Float16,
        })
        .unwrap();
        assert_eq!(out.dims[0], Dim::Known(24u64.div_ceil(16) * 27 * 8));
        assert_eq!(out.dims[1], Dim::Known(2));
    }

    #[test]
    fn fractal_nz_matrix() {
        let out = run(&Shape::fixed(&[4, 33, 70]), Format::Nd, Format::FractalNz);
        assert_eq!(out, Shape::fixed(&[4, 5, 3, 16, 16]));
    }

    #[test]
    fn fractal_nz_pads_vectors() {
        let out = run(&Shape::fixed(&[20]), Format::Nd, Format::FractalNz);
        assert_eq!(out, Shape::fixed(&[2, 1, 16, 16]));
    }

    #[test]
    fn degenerate_shape_is_one_padded() {
        let out = run(&Shape::fixed(&[32]), Format::Nchw, Format::Nc1hwc0);
        // [32] -> [1, 1, 1, 32]: the single axis lands on W
        assert_eq!(out, Shape::fixed(&[1, 1, 1, 32, 16]));
        let scalar = run(&Shape::fixed(&[]), Format::Nchw, Format::Nhwc);
        assert_eq!(scalar, Shape::fixed(&[1, 1, 1, 1]));
    }

    #[test]
    fn unbounded_range_stays_unbounded() {
        let shape = Shape::new(
            vec![Dim::Unknown, Dim::Known(8), Dim::Known(1), Dim::Known(1)],
            vec![DimRange::unbounded(1)],
        );
        let out = run(&shape, Format::Nchw, Format::FractalZ);
        assert_eq!(out.range, vec![DimRange::unbounded(1)]);
    }

    #[test]
    fn malformed_range_rejected() {
        let shape = Shape::new(vec![Dim::Unknown, Dim::Known(2)], vec![]);
        let err = transform(TransformArgs {
            shape: &shape,
            origin: Format::Nchw,
            target: Format::Nhwc,
            groups: 1,
            dtype: DataType::Float32,
        })
        .unwrap_err();
        assert_eq!(
            err,
            ShapeError::MalformedRange {
                unknown_dims: 1,
                ranges: 0
            }
        );
    }

    #[test]
    fn five_d_origin_into_four_d_target_keeps_dims() {
        let shape = Shape::fixed(&[1, 2, 3, 4, 5]);
        assert_eq!(run(&shape, Format::Ncdhw, Format::Nc1hwc0), shape);
    }

    #[test]
    fn dim_json_uses_minus_one() {
        let shape = Shape::new(vec![Dim::Known(2), Dim::Unknown], vec![DimRange::new(1, 8)]);
        let json = serde_json::to_string(&shape).unwrap();
        assert_eq!(json, r#"{"dims":[2,-1],"range":[{"min":1,"max":8}]}"#);
    }

    #[test]
    fn display_shape() {
        let shape = Shape::new(
            vec![Dim::Known(2), Dim::Unknown],
            vec![DimRange::unbounded(1)],
        );
        assert_eq!(shape.to_string(), "[2, ?] range [1..]");
    }
}
