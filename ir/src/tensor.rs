//! Compile-time constant tensors.
//!
//! Values are stored as `f64`, which represents every supported element type
//! exactly except 64-bit integers beyond 2^53. Every constructor snaps the
//! values onto the grid of the declared element type (rounding and
//! saturating), so a tensor never holds a value its dtype cannot represent.

use lowp_dtype::{DType, HasDType};
use smallvec::SmallVec;
use snafu::ensure;

use crate::error::{InvalidPermutationSnafu, ReshapeSizeMismatchSnafu, Result, TensorSizeMismatchSnafu};
use crate::shape::{self, Shape, StaticShape};

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dtype: DType,
    shape: StaticShape,
    data: Vec<f64>,
}

impl Tensor {
    pub fn new(dtype: DType, shape: &[usize], data: Vec<f64>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        ensure!(
            data.len() == expected,
            TensorSizeMismatchSnafu { shape: shape.to_vec(), expected, actual: data.len() }
        );
        let data = data.into_iter().map(|v| cast_value(v, dtype)).collect();
        Ok(Self { dtype, shape: shape.into(), data })
    }

    /// Rank-0 tensor.
    pub fn scalar(dtype: DType, value: f64) -> Self {
        Self { dtype, shape: SmallVec::new(), data: vec![cast_value(value, dtype)] }
    }

    /// Tensor of `shape` filled with `value`.
    pub fn splat(dtype: DType, shape: &[usize], value: f64) -> Self {
        let len = shape.iter().product();
        Self { dtype, shape: shape.into(), data: vec![cast_value(value, dtype); len] }
    }

    /// Build from native values; the dtype follows `T`.
    pub fn from_slice<T: HasDType + Copy + Into<f64>>(shape: &[usize], values: &[T]) -> Result<Self> {
        Self::new(T::DTYPE, shape, values.iter().map(|&v| v.into()).collect())
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Shape as graph dimensions.
    pub fn dims(&self) -> Shape {
        shape::static_shape(&self.shape)
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.data
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.data.get(index).copied()
    }

    /// Values converted to `T` (saturating, rounding half to even).
    pub fn cast_vector<T: Element>(&self) -> Vec<T> {
        self.data.iter().map(|&v| T::from_f64(cast_value(v, T::DTYPE))).collect()
    }

    pub fn cast(&self, dtype: DType) -> Self {
        Self { dtype, shape: self.shape.clone(), data: self.data.iter().map(|&v| cast_value(v, dtype)).collect() }
    }

    /// All elements equal (a broadcastable per-tensor value).
    pub fn is_scalar_like(&self) -> bool {
        self.data.windows(2).all(|w| w[0] == w[1] || (w[0].is_nan() && w[1].is_nan()))
    }

    /// The common value of a scalar-like tensor.
    pub fn scalar_value(&self) -> Option<f64> {
        if self.is_scalar_like() { self.data.first().copied() } else { None }
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self { dtype: self.dtype, shape: self.shape.clone(), data: self.data.iter().map(|&v| cast_value(f(v), self.dtype)).collect() }
    }

    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        let output_size: usize = shape.iter().product();
        ensure!(output_size == self.len(), ReshapeSizeMismatchSnafu { input_size: self.len(), output_size });
        Ok(Self { dtype: self.dtype, shape: shape.into(), data: self.data.clone() })
    }

    pub fn transpose(&self, permutation: &[usize]) -> Result<Self> {
        let rank = self.rank();
        let mut seen = vec![false; rank];
        let valid = permutation.len() == rank
            && permutation.iter().all(|&p| p < rank && !std::mem::replace(&mut seen[p], true));
        ensure!(valid, InvalidPermutationSnafu { permutation: permutation.iter().map(|&p| p as i64).collect::<Vec<_>>(), rank });

        let out_shape: StaticShape = permutation.iter().map(|&p| self.shape[p]).collect();
        let in_strides = shape::strides(&self.shape);
        let data = for_each_index(&out_shape)
            .map(|index| {
                let offset: usize = index.iter().zip(permutation).map(|(&i, &p)| i * in_strides[p]).sum();
                self.data[offset]
            })
            .collect();
        Ok(Self { dtype: self.dtype, shape: out_shape, data })
    }

    /// Numpy-broadcast elementwise combination producing a tensor of `dtype`.
    pub fn zip_broadcast(&self, other: &Tensor, dtype: DType, f: impl Fn(f64, f64) -> f64) -> Result<Self> {
        let out = shape::broadcast_shapes(&self.dims(), &other.dims())?;
        let out: StaticShape = out.iter().filter_map(|d| d.as_static()).collect();
        let lhs = self.broadcast_to(&out)?;
        let rhs = other.broadcast_to(&out)?;
        let data = lhs.iter().zip(&rhs).map(|(&a, &b)| f(a, b)).collect();
        Self::new(dtype, &out, data)
    }

    /// Values broadcast to `target` (row-major).
    pub fn broadcast_to(&self, target: &[usize]) -> Result<Vec<f64>> {
        let dims = shape::broadcast_shapes(&self.dims(), &shape::static_shape(target))?;
        ensure!(
            dims.iter().map(|d| d.as_static()).eq(target.iter().map(|&d| Some(d))),
            ReshapeSizeMismatchSnafu { input_size: self.len(), output_size: target.iter().product::<usize>() }
        );

        let offset = target.len() - self.rank();
        let in_strides = shape::strides(&self.shape);
        Ok(for_each_index(target)
            .map(|index| {
                let flat: usize = (0..self.rank())
                    .filter(|&d| self.shape[d] != 1)
                    .map(|d| index[d + offset] * in_strides[d])
                    .sum();
                self.data[flat]
            })
            .collect())
    }
}

/// Iterate every multi-index of `shape` in row-major order.
pub fn for_each_index(shape: &[usize]) -> impl Iterator<Item = StaticShape> + '_ {
    let total: usize = shape.iter().product();
    let strides = shape::strides(shape);
    (0..total).map(move |flat| shape.iter().zip(&strides).map(|(&dim, &stride)| (flat / stride) % dim).collect())
}

/// Snap `value` onto the representable grid of `dtype`.
pub fn cast_value(value: f64, dtype: DType) -> f64 {
    match dtype {
        DType::Bool => f64::from(u8::from(value != 0.0)),
        DType::Float64 | DType::Dynamic => value,
        DType::Float32 => value as f32 as f64,
        DType::Float16 => round_mantissa(value, 10).clamp(dtype.min_value(), dtype.max_value()),
        DType::BFloat16 => round_mantissa(value, 7).clamp(dtype.min_value(), dtype.max_value()),
        _ if value.is_nan() => 0.0,
        _ => value.round_ties_even().clamp(dtype.min_value(), dtype.max_value()),
    }
}

fn round_mantissa(value: f64, bits: i32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    let exponent = value.abs().log2().floor() as i32;
    let scale = 2f64.powi(bits - exponent);
    (value * scale).round_ties_even() / scale
}

/// Native element types a tensor can be read back as.
pub trait Element: HasDType + Copy {
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_element {
    ($($ty:ty),* $(,)?) => {
        $(impl Element for $ty { fn from_f64(value: f64) -> Self { value as $ty } })*
    };
}

impl_element!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl Element for bool {
    fn from_f64(value: f64) -> Self {
        value != 0.0
    }
}
