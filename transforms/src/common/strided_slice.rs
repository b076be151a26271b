//! StridedSlice clean-ups.
//!
//! - [`UselessStridedSliceEraser`] drops slices that keep their whole input.
//! - [`SharedStridedSliceEraser`] merges identical slices of one output.
//! - [`GroupedStridedSliceOptimizer`] turns slices that partition one axis
//!   into a single `VariadicSplit`.

use std::collections::HashSet;

use lowp_ir::ops::{Constant, SliceAxis, StridedSlice, VariadicSplit};
use lowp_ir::{Function, FunctionPass, Node, NodeRef, Output, Tensor, replace_output_update_name};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::network_helper::static_dims;

/// Resolved plan of a slice with static input and constant bounds.
fn plan_of(slice: &NodeRef) -> Result<Option<(Vec<usize>, Vec<SliceAxis>)>> {
    let Some(op) = slice.op_as::<StridedSlice>() else {
        return Ok(None);
    };
    let Some(dims) = static_dims(&slice.input_value(0)?) else {
        return Ok(None);
    };
    let operands: Option<Vec<_>> = (1..slice.input_count())
        .map(|index| slice.input_node(index).ok().and_then(|node| node.constant_value()))
        .collect();
    let Some(operands) = operands else {
        return Ok(None);
    };
    let [begin, end, rest @ ..] = operands.as_slice() else {
        return Ok(None);
    };
    let plan = op.plan(&dims, begin, end, rest.first().map(|steps| steps.as_ref()))?;
    Ok(Some((dims, plan)))
}

/// Slices reading `output`, each listed once.
fn slices_of(output: &Output) -> Vec<NodeRef> {
    let mut seen = HashSet::new();
    output
        .consumers()
        .into_iter()
        .filter(|input| input.index() == 0 && input.node().is::<StridedSlice>())
        .map(|input| input.node().clone())
        .filter(|node| seen.insert(node.id()))
        .collect()
}

// ===== Useless =====

/// Removes StridedSlice nodes whose output equals their input.
#[derive(Debug, Clone, Copy, Default)]
pub struct UselessStridedSliceEraser;

impl FunctionPass<Error> for UselessStridedSliceEraser {
    fn name(&self) -> &str {
        "UselessStridedSliceEraser"
    }

    fn run_on_function(&self, function: &Function) -> Result<bool> {
        let mut changed = false;
        for node in function.ordered_ops() {
            let Some((dims, plan)) = plan_of(&node)? else {
                continue;
            };
            if !plan.iter().zip(&dims).all(|(axis, &dim)| axis.is_identity(dim)) {
                continue;
            }
            if replace_output_update_name(&node.output(0)?, &node.input_value(0)?)? {
                trace!(node = %node.friendly_name(), "useless slice erased");
                changed = true;
            }
        }
        Ok(changed)
    }
}

// ===== Shared =====

/// Merges StridedSlice nodes with equal attributes and bounds reading the
/// same output.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedStridedSliceEraser;

fn same_slice(lhs: &NodeRef, rhs: &NodeRef) -> bool {
    let (Some(a), Some(b)) = (lhs.op_as::<StridedSlice>(), rhs.op_as::<StridedSlice>()) else {
        return false;
    };
    if a != b || lhs.input_count() != rhs.input_count() {
        return false;
    }
    let (a_inputs, b_inputs) = (lhs.inputs(), rhs.inputs());
    a_inputs.iter().zip(&b_inputs).skip(1).all(|(x, y)| {
        x == y
            || matches!(
                (x.node().constant_value(), y.node().constant_value()),
                (Some(x), Some(y)) if x == y
            )
    })
}

impl FunctionPass<Error> for SharedStridedSliceEraser {
    fn name(&self) -> &str {
        "SharedStridedSliceEraser"
    }

    fn run_on_function(&self, function: &Function) -> Result<bool> {
        let mut changed = false;
        for node in function.ordered_ops() {
            for output in node.outputs() {
                let slices = slices_of(&output);
                let mut merged: HashSet<u64> = HashSet::new();
                for (i, kept) in slices.iter().enumerate() {
                    if merged.contains(&kept.id()) {
                        continue;
                    }
                    for duplicate in &slices[i + 1..] {
                        if merged.contains(&duplicate.id()) || !same_slice(kept, duplicate) {
                            continue;
                        }
                        duplicate.output(0)?.replace(&kept.output(0)?)?;
                        merged.insert(duplicate.id());
                        trace!(kept = %kept.friendly_name(), merged = %duplicate.friendly_name(), "shared slice merged");
                        changed = true;
                    }
                }
            }
        }
        Ok(changed)
    }
}

// ===== Grouped =====

/// Replaces stride-1 slices of one output that select disjoint ranges of one
/// common axis with a single `VariadicSplit`. Uncovered ranges become
/// unused split outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupedStridedSliceOptimizer;

/// A slice that narrows exactly one axis.
struct AxisRange {
    slice: NodeRef,
    axis: usize,
    start: usize,
    len: usize,
}

fn axis_range(slice: &NodeRef) -> Result<Option<AxisRange>> {
    let Some((dims, plan)) = plan_of(slice)? else {
        return Ok(None);
    };
    let mut narrowed = plan.iter().enumerate().filter(|&(axis, range)| !range.is_identity(dims[axis]));
    let (Some((axis, range)), None) = (narrowed.next(), narrowed.next()) else {
        return Ok(None);
    };
    if range.step != 1 || range.len == 0 {
        return Ok(None);
    }
    Ok(Some(AxisRange { slice: slice.clone(), axis, start: range.start as usize, len: range.len }))
}

fn int_constant(dims: &[usize], values: Vec<i64>) -> Result<NodeRef> {
    let tensor = Tensor::new(lowp_dtype::DType::Int64, dims, values.into_iter().map(|v| v as f64).collect())?;
    Ok(Constant::create(tensor)?)
}

impl GroupedStridedSliceOptimizer {
    fn optimize(output: &Output) -> Result<bool> {
        let slices = slices_of(output);
        if slices.len() < 2 {
            return Ok(false);
        }
        let Some(dims) = static_dims(output) else {
            return Ok(false);
        };
        let ranges: Option<Vec<AxisRange>> = slices.iter().map(axis_range).collect::<Result<_>>()?;
        let Some(mut ranges) = ranges else {
            return Ok(false);
        };
        let axis = ranges[0].axis;
        if ranges.iter().any(|range| range.axis != axis) {
            return Ok(false);
        }
        ranges.sort_by_key(|range| range.start);
        if ranges.windows(2).any(|pair| pair[0].start + pair[0].len > pair[1].start) {
            return Ok(false);
        }

        // Split lengths with gaps; `Some(i)` marks the piece of `ranges[i]`.
        let mut pieces: Vec<(usize, Option<usize>)> = Vec::new();
        let mut cursor = 0;
        for (i, range) in ranges.iter().enumerate() {
            if range.start > cursor {
                pieces.push((range.start - cursor, None));
            }
            pieces.push((range.len, Some(i)));
            cursor = range.start + range.len;
        }
        if cursor < dims[axis] {
            pieces.push((dims[axis] - cursor, None));
        }

        let axis_constant = int_constant(&[], vec![axis as i64])?;
        let lengths = pieces.iter().map(|&(len, _)| len as i64).collect::<Vec<_>>();
        let lengths = int_constant(&[lengths.len()], lengths)?;
        let split = Node::new(VariadicSplit, [output.clone(), axis_constant.output(0)?, lengths.output(0)?])?;
        split.set_friendly_name(format!("{}/split", output.node().friendly_name()));

        for (index, (_, owner)) in pieces.iter().enumerate() {
            if let Some(owner) = owner {
                replace_output_update_name(&ranges[*owner].slice.output(0)?, &split.output(index)?)?;
            }
        }
        debug!(split = %split.friendly_name(), slices = ranges.len(), outputs = pieces.len(), "grouped slices");
        Ok(true)
    }
}

impl FunctionPass<Error> for GroupedStridedSliceOptimizer {
    fn name(&self) -> &str {
        "GroupedStridedSliceOptimizer"
    }

    fn run_on_function(&self, function: &Function) -> Result<bool> {
        let mut changed = false;
        for node in function.ordered_ops() {
            for output in node.outputs() {
                changed |= Self::optimize(&output)?;
            }
        }
        Ok(changed)
    }
}

// ===== Sequence =====

/// Runs the useless, shared and grouped slice optimizations in that order.
#[derive(Debug, Clone, Copy, Default)]
pub struct StridedSliceOptimization;

impl FunctionPass<Error> for StridedSliceOptimization {
    fn name(&self) -> &str {
        "StridedSliceOptimization"
    }

    #[tracing::instrument(skip_all, fields(function = function.name()))]
    fn run_on_function(&self, function: &Function) -> Result<bool> {
        let mut changed = UselessStridedSliceEraser.run_on_function(function)?;
        changed |= SharedStridedSliceEraser.run_on_function(function)?;
        changed |= GroupedStridedSliceOptimizer.run_on_function(function)?;
        Ok(changed)
    }
}
