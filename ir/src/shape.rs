//! Shapes of values flowing along graph edges.
//!
//! Rank is always known. Individual dimensions are either static or a named
//! symbolic extent (e.g. a dynamic batch size). Broadcasting follows numpy
//! rules; a symbolic dimension unifies with an equally named one or with 1.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::{BroadcastShapeMismatchSnafu, Result};

/// A single dimension of a shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::From)]
pub enum Dim {
    Static(usize),
    Symbolic(Arc<str>),
}

impl Dim {
    pub fn symbolic(name: impl AsRef<str>) -> Self {
        Self::Symbolic(Arc::from(name.as_ref()))
    }

    pub fn as_static(&self) -> Option<usize> {
        match self {
            Self::Static(v) => Some(*v),
            Self::Symbolic(_) => None,
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, Self::Static(_))
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(v) => write!(f, "{v}"),
            Self::Symbolic(name) => write!(f, "{name}"),
        }
    }
}

pub type Shape = SmallVec<[Dim; 4]>;

/// Concrete shape with every dimension known.
pub type StaticShape = SmallVec<[usize; 4]>;

/// Build a fully static shape.
pub fn static_shape(dims: &[usize]) -> Shape {
    dims.iter().map(|&d| Dim::Static(d)).collect()
}

/// Check if all dimensions are concrete.
pub fn is_static(shape: &Shape) -> bool {
    shape.iter().all(Dim::is_static)
}

/// Convert to concrete dimensions, or `None` if any dimension is symbolic.
pub fn to_static(shape: &Shape) -> Option<StaticShape> {
    shape.iter().map(Dim::as_static).collect()
}

/// Number of elements, or `None` for symbolic shapes.
pub fn shape_size(shape: &Shape) -> Option<usize> {
    shape.iter().map(Dim::as_static).try_fold(1usize, |acc, d| d.map(|d| acc * d))
}

pub fn format_shape(shape: &Shape) -> String {
    let dims: Vec<String> = shape.iter().map(ToString::to_string).collect();
    format!("[{}]", dims.join(","))
}

/// Numpy broadcast of two shapes (right-aligned).
pub fn broadcast_shapes(lhs: &Shape, rhs: &Shape) -> Result<Shape> {
    let rank = lhs.len().max(rhs.len());
    let one = Dim::Static(1);
    let mut result = Shape::with_capacity(rank);

    for i in 0..rank {
        let l = (i + lhs.len()).checked_sub(rank).map_or(&one, |j| &lhs[j]);
        let r = (i + rhs.len()).checked_sub(rank).map_or(&one, |j| &rhs[j]);
        let dim = match (l, r) {
            (l, r) if l == r => l.clone(),
            (Dim::Static(1), other) | (other, Dim::Static(1)) => other.clone(),
            _ => {
                return BroadcastShapeMismatchSnafu { lhs: Box::new(lhs.clone()), rhs: Box::new(rhs.clone()) }.fail();
            }
        };
        result.push(dim);
    }

    Ok(result)
}

/// Row-major strides of a static shape.
pub fn strides(shape: &[usize]) -> StaticShape {
    let mut strides: StaticShape = smallvec::smallvec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Normalize a possibly negative axis against `rank`.
pub fn normalize_axis(axis: i64, rank: usize) -> Option<usize> {
    let rank = rank as i64;
    let axis = if axis < 0 { axis + rank } else { axis };
    (0..rank).contains(&axis).then_some(axis as usize)
}
