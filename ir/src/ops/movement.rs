//! Layout operations: data is moved, never recomputed.
//!
//! Shape-like operands (target shape, order, slice bounds, split lengths)
//! must be constants so output shapes stay derivable at inference time.

use smallvec::smallvec;
use snafu::{OptionExt, ensure};

use super::{OPSET, args, constant_input, expect_inputs, op_common, output_dims, single, static_dims};
use crate::error::{
    AxisOutOfRangeSnafu, DynamicShapeSnafu, InvalidAttributeSnafu, InvalidPermutationSnafu,
    ReshapeSizeMismatchSnafu, Result, SplitLengthMismatchSnafu,
};
use crate::node::OutputDesc;
use crate::op::{AttributeMap, EvaluatedOutputs, InferInput, InferredOutputs, OpDef, Operation, TypeInfo};
use crate::shape::{Dim, Shape, StaticShape, normalize_axis, strides};
use crate::tensor::{Tensor, for_each_index};

fn as_ints(tensor: &Tensor) -> Vec<i64> {
    tensor.values().iter().map(|&v| v as i64).collect()
}

// ============================================================================
// Reshape
// ============================================================================

/// Reshape to a constant target shape. `-1` infers one dimension; with
/// `special_zero` a `0` copies the input dimension at the same position.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Reshape {
    special_zero: bool,
}

impl Reshape {
    pub fn new(special_zero: bool) -> Self {
        Self { special_zero }
    }

    pub fn special_zero(&self) -> bool {
        self.special_zero
    }

    /// Output shape for `input` and the raw `pattern`.
    pub fn resolve(&self, input: &Shape, pattern: &[i64]) -> Result<Shape> {
        let op = Self::TYPE_INFO.name;
        let mut inferred = None;
        let mut shape = Shape::with_capacity(pattern.len());

        for (axis, &value) in pattern.iter().enumerate() {
            let dim = match value {
                -1 => {
                    ensure!(
                        inferred.replace(axis).is_none(),
                        InvalidAttributeSnafu { op, name: "shape", reason: "more than one -1".to_string() }
                    );
                    Dim::Static(1)
                }
                0 if self.special_zero => input
                    .get(axis)
                    .cloned()
                    .context(AxisOutOfRangeSnafu { op, axis: axis as i64, rank: input.len() })?,
                v if v >= 0 => Dim::Static(v as usize),
                v => {
                    return InvalidAttributeSnafu { op, name: "shape", reason: format!("negative dimension {v}") }
                        .fail();
                }
            };
            shape.push(dim);
        }

        let input_size = crate::shape::shape_size(input);
        let known: Option<usize> = shape.iter().map(Dim::as_static).product();
        match (inferred, input_size, known) {
            (Some(axis), Some(input_size), Some(known)) => {
                ensure!(
                    known != 0 && input_size % known == 0,
                    ReshapeSizeMismatchSnafu { input_size, output_size: known }
                );
                shape[axis] = Dim::Static(input_size / known);
            }
            (Some(_), _, _) => return DynamicShapeSnafu { op }.fail(),
            (None, Some(input_size), Some(output_size)) => {
                ensure!(input_size == output_size, ReshapeSizeMismatchSnafu { input_size, output_size });
            }
            (None, _, _) => {}
        }
        Ok(shape)
    }
}

impl OpDef for Reshape {
    const TYPE_INFO: TypeInfo = TypeInfo::new("Reshape", OPSET);

    fn from_attributes(attributes: &AttributeMap) -> Result<Self> {
        Ok(Self::new(attributes.bool(Self::TYPE_INFO.name, "special_zero")?))
    }
}

impl Operation for Reshape {
    op_common!();

    fn infer(&self, inputs: &[InferInput]) -> Result<InferredOutputs> {
        let op = Self::TYPE_INFO.name;
        expect_inputs(op, inputs, 2)?;
        let pattern = as_ints(constant_input(op, inputs, 1)?);
        let desc = &inputs[0].desc;
        Ok(single(OutputDesc::new(desc.dtype, self.resolve(&desc.shape, &pattern)?)))
    }

    fn evaluate(&self, inputs: &[Tensor], outputs: &[OutputDesc]) -> Result<EvaluatedOutputs> {
        let op = Self::TYPE_INFO.name;
        let [data, _] = args::<2>(op, inputs)?;
        Ok(smallvec![data.reshape(&output_dims(op, outputs, 0)?)?])
    }

    fn visit_attributes(&self) -> AttributeMap {
        AttributeMap::new().with("special_zero", self.special_zero)
    }
}

// ============================================================================
// Transpose
// ============================================================================

/// Permute axes by a constant order; an empty order reverses them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Transpose;

impl Transpose {
    /// Validated permutation for a tensor of `rank`.
    pub fn permutation(order: &[i64], rank: usize) -> Result<Vec<usize>> {
        if order.is_empty() {
            return Ok((0..rank).rev().collect());
        }
        let mut seen = vec![false; rank];
        let permutation: Option<Vec<usize>> = order
            .iter()
            .map(|&axis| {
                let axis = usize::try_from(axis).ok().filter(|&a| a < rank)?;
                (!std::mem::replace(&mut seen[axis], true)).then_some(axis)
            })
            .collect();
        permutation
            .filter(|p| p.len() == rank)
            .context(InvalidPermutationSnafu { permutation: order.to_vec(), rank })
    }
}

impl OpDef for Transpose {
    const TYPE_INFO: TypeInfo = TypeInfo::new("Transpose", OPSET);

    fn from_attributes(_attributes: &AttributeMap) -> Result<Self> {
        Ok(Self)
    }
}

impl Operation for Transpose {
    op_common!();

    fn infer(&self, inputs: &[InferInput]) -> Result<InferredOutputs> {
        let op = Self::TYPE_INFO.name;
        expect_inputs(op, inputs, 2)?;
        let desc = &inputs[0].desc;
        let permutation = Self::permutation(&as_ints(constant_input(op, inputs, 1)?), desc.rank())?;
        let shape = permutation.iter().map(|&p| desc.shape[p].clone()).collect();
        Ok(single(OutputDesc::new(desc.dtype, shape)))
    }

    fn evaluate(&self, inputs: &[Tensor], _outputs: &[OutputDesc]) -> Result<EvaluatedOutputs> {
        let [data, order] = args::<2>(Self::TYPE_INFO.name, inputs)?;
        let permutation = Self::permutation(&as_ints(order), data.rank())?;
        Ok(smallvec![data.transpose(&permutation)?])
    }
}

// ============================================================================
// StridedSlice
// ============================================================================

/// Resolved slice along one axis: `len` elements starting at `start`,
/// advancing by `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceAxis {
    pub start: i64,
    pub step: i64,
    pub len: usize,
}

impl SliceAxis {
    pub fn full(dim: usize) -> Self {
        Self { start: 0, step: 1, len: dim }
    }

    /// Whether this axis keeps the whole dimension in order.
    pub fn is_identity(&self, dim: usize) -> bool {
        self.step == 1 && self.start == 0 && self.len == dim
    }

    /// One past the last index read, for unit steps.
    pub fn stop(&self) -> i64 {
        self.start + self.step * self.len as i64
    }
}

/// Numpy slicing of `dims` by `begin/end/strides`. A set mask bit ignores
/// the corresponding bound. Axes beyond `begin.len()` are kept whole.
pub fn slice_plan(
    dims: &[usize],
    begin: &[i64],
    end: &[i64],
    steps: &[i64],
    begin_mask: &[i64],
    end_mask: &[i64],
) -> Result<Vec<SliceAxis>> {
    let op = StridedSlice::TYPE_INFO.name;
    ensure!(
        begin.len() == end.len() && (steps.is_empty() || steps.len() == begin.len()),
        InvalidAttributeSnafu { op, name: "begin", reason: "begin, end and strides lengths differ".to_string() }
    );
    ensure!(
        begin.len() <= dims.len(),
        AxisOutOfRangeSnafu { op, axis: begin.len() as i64 - 1, rank: dims.len() }
    );

    let masked = |mask: &[i64], axis: usize| mask.get(axis).is_some_and(|&bit| bit != 0);
    let mut plan = Vec::with_capacity(dims.len());
    for (axis, &dim) in dims.iter().enumerate() {
        if axis >= begin.len() {
            plan.push(SliceAxis::full(dim));
            continue;
        }
        let step = steps.get(axis).copied().unwrap_or(1);
        ensure!(step != 0, InvalidAttributeSnafu { op, name: "strides", reason: "zero stride".to_string() });

        let size = dim as i64;
        let normalize = |v: i64| if v < 0 { v + size } else { v };
        let (start, stop) = if step > 0 {
            let start = if masked(begin_mask, axis) { 0 } else { normalize(begin[axis]).clamp(0, size) };
            let stop = if masked(end_mask, axis) { size } else { normalize(end[axis]).clamp(0, size) };
            (start, stop)
        } else {
            let start = if masked(begin_mask, axis) { size - 1 } else { normalize(begin[axis]).clamp(-1, size - 1) };
            let stop = if masked(end_mask, axis) { -1 } else { normalize(end[axis]).clamp(-1, size - 1) };
            (start, stop)
        };
        let span = if step > 0 { stop - start } else { start - stop };
        let len = if span > 0 { ((span + step.abs() - 1) / step.abs()) as usize } else { 0 };
        plan.push(SliceAxis { start, step, len });
    }
    Ok(plan)
}

/// Strided slice with numpy semantics.
///
/// Only `begin_mask` and `end_mask` are supported; the axis-inserting and
/// axis-removing masks must be all zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StridedSlice {
    begin_mask: Vec<i64>,
    end_mask: Vec<i64>,
}

impl StridedSlice {
    pub fn new(begin_mask: Vec<i64>, end_mask: Vec<i64>) -> Self {
        Self { begin_mask, end_mask }
    }

    pub fn begin_mask(&self) -> &[i64] {
        &self.begin_mask
    }

    pub fn end_mask(&self) -> &[i64] {
        &self.end_mask
    }

    /// Slice plan for concrete input dims and bound operands.
    pub fn plan(&self, dims: &[usize], begin: &Tensor, end: &Tensor, steps: Option<&Tensor>) -> Result<Vec<SliceAxis>> {
        let steps = steps.map(as_ints).unwrap_or_default();
        slice_plan(dims, &as_ints(begin), &as_ints(end), &steps, &self.begin_mask, &self.end_mask)
    }
}

impl OpDef for StridedSlice {
    const TYPE_INFO: TypeInfo = TypeInfo::new("StridedSlice", OPSET);

    fn from_attributes(attributes: &AttributeMap) -> Result<Self> {
        let op = Self::TYPE_INFO.name;
        for name in ["new_axis_mask", "shrink_axis_mask", "ellipsis_mask"] {
            if let Some(crate::op::AttrValue::Ints(mask)) = attributes.get(name) {
                ensure!(
                    mask.iter().all(|&bit| bit == 0),
                    InvalidAttributeSnafu { op, name, reason: "only zero masks are supported".to_string() }
                );
            }
        }
        Ok(Self::new(attributes.ints(op, "begin_mask")?, attributes.ints(op, "end_mask")?))
    }
}

impl Operation for StridedSlice {
    op_common!();

    fn infer(&self, inputs: &[InferInput]) -> Result<InferredOutputs> {
        let op = Self::TYPE_INFO.name;
        ensure!(
            inputs.len() == 3 || inputs.len() == 4,
            crate::error::InputCountMismatchSnafu { op, expected: 4usize, actual: inputs.len() }
        );
        let desc = &inputs[0].desc;
        let dims = static_dims(op, desc)?;
        let steps = if inputs.len() == 4 { Some(constant_input(op, inputs, 3)?.as_ref()) } else { None };
        let plan = self.plan(&dims, constant_input(op, inputs, 1)?, constant_input(op, inputs, 2)?, steps)?;
        let shape = plan.iter().map(|axis| Dim::Static(axis.len)).collect();
        Ok(single(OutputDesc::new(desc.dtype, shape)))
    }

    fn evaluate(&self, inputs: &[Tensor], _outputs: &[OutputDesc]) -> Result<EvaluatedOutputs> {
        let op = Self::TYPE_INFO.name;
        let [data, begin, end] = args::<3>(op, inputs)?;
        let plan = self.plan(data.shape(), begin, end, inputs.get(3))?;
        let out_shape: StaticShape = plan.iter().map(|axis| axis.len).collect();
        let in_strides = strides(data.shape());
        let values = for_each_index(&out_shape)
            .map(|index| {
                let flat: i64 = index
                    .iter()
                    .zip(&plan)
                    .zip(&in_strides)
                    .map(|((&i, axis), &stride)| (axis.start + i as i64 * axis.step) * stride as i64)
                    .sum();
                data.values()[flat as usize]
            })
            .collect();
        Ok(smallvec![Tensor::new(data.dtype(), &out_shape, values)?])
    }

    fn visit_attributes(&self) -> AttributeMap {
        let zeros = vec![0i64; self.begin_mask.len()];
        AttributeMap::new()
            .with("begin_mask", self.begin_mask.clone())
            .with("end_mask", self.end_mask.clone())
            .with("new_axis_mask", zeros.clone())
            .with("shrink_axis_mask", zeros.clone())
            .with("ellipsis_mask", zeros)
    }
}

// ============================================================================
// VariadicSplit
// ============================================================================

/// Split along a constant axis into pieces of constant lengths; one length
/// may be `-1` and takes the remainder.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VariadicSplit;

impl VariadicSplit {
    pub fn resolve_lengths(lengths: &[i64], dim: usize) -> Result<Vec<usize>> {
        let mismatch = || SplitLengthMismatchSnafu { lengths: lengths.to_vec(), dim };
        ensure!(lengths.iter().filter(|&&l| l == -1).count() <= 1 && lengths.iter().all(|&l| l >= -1), mismatch());

        let known: i64 = lengths.iter().filter(|&&l| l >= 0).sum();
        let rest = dim as i64 - known;
        ensure!(rest >= 0, mismatch());
        let has_rest = lengths.contains(&-1);
        ensure!(has_rest || rest == 0, mismatch());
        Ok(lengths.iter().map(|&l| if l == -1 { rest as usize } else { l as usize }).collect())
    }

    fn split_axis(op: &'static str, axis: &Tensor, rank: usize) -> Result<usize> {
        let raw = axis.get(0).context(InvalidAttributeSnafu { op, name: "axis", reason: "empty".to_string() })? as i64;
        normalize_axis(raw, rank).context(AxisOutOfRangeSnafu { op, axis: raw, rank })
    }
}

impl OpDef for VariadicSplit {
    const TYPE_INFO: TypeInfo = TypeInfo::new("VariadicSplit", OPSET);

    fn from_attributes(_attributes: &AttributeMap) -> Result<Self> {
        Ok(Self)
    }
}

impl Operation for VariadicSplit {
    op_common!();

    fn infer(&self, inputs: &[InferInput]) -> Result<InferredOutputs> {
        let op = Self::TYPE_INFO.name;
        expect_inputs(op, inputs, 3)?;
        let desc = &inputs[0].desc;
        let axis = Self::split_axis(op, constant_input(op, inputs, 1)?, desc.rank())?;
        let dim = desc.shape[axis].as_static().context(DynamicShapeSnafu { op })?;
        let lengths = Self::resolve_lengths(&as_ints(constant_input(op, inputs, 2)?), dim)?;

        Ok(lengths
            .into_iter()
            .map(|len| {
                let mut shape = desc.shape.clone();
                shape[axis] = Dim::Static(len);
                OutputDesc::new(desc.dtype, shape)
            })
            .collect())
    }

    fn evaluate(&self, inputs: &[Tensor], _outputs: &[OutputDesc]) -> Result<EvaluatedOutputs> {
        let op = Self::TYPE_INFO.name;
        let [data, axis, lengths] = args::<3>(op, inputs)?;
        let axis = Self::split_axis(op, axis, data.rank())?;
        let lengths = Self::resolve_lengths(&as_ints(lengths), data.shape()[axis])?;
        let in_strides = strides(data.shape());

        let mut offset = 0;
        let mut outputs = EvaluatedOutputs::new();
        for len in lengths {
            let mut shape: StaticShape = data.shape().into();
            shape[axis] = len;
            let values = for_each_index(&shape)
                .map(|mut index| {
                    index[axis] += offset;
                    let flat: usize = index.iter().zip(&in_strides).map(|(i, s)| i * s).sum();
                    data.values()[flat]
                })
                .collect();
            outputs.push(Tensor::new(data.dtype(), &shape, values)?);
            offset += len;
        }
        Ok(outputs)
    }
}
