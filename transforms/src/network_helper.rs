//! Graph helpers shared by the layer transformations.

use std::sync::Arc;

use lowp_dtype::DType;
use lowp_ir::ops::{Constant, Convert, Multiply, Subtract};
use lowp_ir::rt_info::{copy_runtime_info, keys};
use lowp_ir::shape::to_static;
use lowp_ir::tensor::cast_value;
use lowp_ir::{Node, NodeRef, Output, Tensor, replace_node};
use smallvec::SmallVec;
use snafu::{OptionExt, ensure};
use tracing::{debug, trace};

use crate::dequantization::{FakeQuantizeDequantization, get_dequantization};
use crate::error::{
    ConstantNarrowingSnafu, DetachedDequantizationSnafu, NonConstantOperandSnafu, NotScalarLikeSnafu, Result,
};

// ===== Constants =====

/// First input of `node` produced by a constant.
pub fn get_constant_input(node: &NodeRef) -> Option<NodeRef> {
    node.inputs().iter().map(|input| input.node().clone()).find(|input| input.is::<Constant>())
}

/// `constant` holds a single repeated value.
pub fn is_scalar_like(constant: &NodeRef) -> bool {
    constant.constant_value().is_some_and(|value| value.is_scalar_like())
}

/// Rank-0 constant with the repeated value of `constant`.
pub fn to_scalar(constant: &NodeRef) -> Result<NodeRef> {
    let value = constant.constant_value().context(NonConstantOperandSnafu { node: constant.friendly_name(), index: 0usize })?;
    let scalar = value.scalar_value().context(NotScalarLikeSnafu { node: constant.friendly_name() })?;
    Ok(Constant::create(Tensor::scalar(value.dtype(), scalar))?)
}

/// Value of a constant, or of a `Convert` applied to one.
pub fn constant_value_of(node: &NodeRef) -> Option<Tensor> {
    if let Some(value) = node.constant_value() {
        return Some(value.as_ref().clone());
    }
    let convert = node.op_as::<Convert>()?;
    let source = node.input_node(0).ok()?.constant_value()?;
    Some(source.cast(convert.destination()))
}

/// Replacement constant for `Convert(Constant)`; `None` when the source is
/// not constant.
pub fn fold_convert(convert: &NodeRef) -> Result<Option<NodeRef>> {
    if !convert.is::<Convert>() {
        return Ok(None);
    }
    let Some(value) = constant_value_of(convert) else {
        return Ok(None);
    };
    let folded = Constant::create(value)?;
    copy_info(convert, &folded);
    trace!(convert = %convert.friendly_name(), "folded convert");
    Ok(Some(folded))
}

/// Replacement constant for a node whose inputs are all constants.
pub fn fold_constant(node: &NodeRef) -> Result<Option<NodeRef>> {
    let inputs: Option<Vec<Tensor>> = node.inputs().iter().map(|input| constant_value_of(input.node())).collect();
    let Some(inputs) = inputs else {
        return Ok(None);
    };
    if node.output_count() != 1 {
        return Ok(None);
    }
    let Some(value) = node.evaluate(&inputs)?.into_iter().next() else {
        return Ok(None);
    };
    let folded = Constant::create(value)?;
    copy_info(node, &folded);
    Ok(Some(folded))
}

/// Every value of `constant` is exactly representable in `dtype`.
pub fn check_constant_value_precision(dtype: DType, constant: &NodeRef) -> bool {
    constant_value_of(constant).is_some_and(|value| value.values().iter().all(|&v| cast_value(v, dtype) == v))
}

/// Constant broadcast against a tensor of `rank` varies at most along the
/// channel axis (axis 1).
pub fn is_per_tensor_or_per_channel(value: &Tensor, rank: usize) -> bool {
    if value.is_scalar_like() {
        return true;
    }
    if value.rank() > rank {
        return false;
    }
    let offset = rank - value.rank();
    let varying: SmallVec<[usize; 4]> =
        value.shape().iter().enumerate().filter(|&(_, &dim)| dim != 1).map(|(axis, _)| axis + offset).collect();
    varying.as_slice() == [1]
}

// ===== Node bookkeeping =====

/// Carry runtime info and the friendly name of `source` over to `target`.
pub fn copy_info(source: &NodeRef, target: &NodeRef) {
    copy_runtime_info(source, target);
    target.set_friendly_name(source.friendly_name());
}

/// Force every output of `node` to `dtype`.
pub fn set_out_data_precision(node: &NodeRef, dtype: DType) -> Result<()> {
    for index in 0..node.output_count() {
        if node.is_type_relaxed() || node.output_dtype(index)? != dtype {
            node.set_output_type(index, dtype)?;
        }
    }
    Ok(())
}

pub fn mark_dequantization(node: &NodeRef) {
    node.insert_rt_value(keys::DEQUANTIZATION, true);
}

pub fn mark_precision_preserved(node: &NodeRef, preserved: bool) {
    node.insert_rt_value(keys::PRECISION_PRESERVED, preserved);
}

// ===== Branch separation =====

/// Give `node` private copies of the dequantization chains it shares with
/// other consumers. Data and constants stay shared.
///
/// Returns whether anything was copied.
pub fn separate_in_standalone_branch(node: &NodeRef) -> Result<bool> {
    let mut separated = false;
    for index in 0..node.input_count() {
        let chain = get_dequantization(node, index)?;
        if chain.is_empty() || !chain.is_shared() {
            continue;
        }

        let (mut old, mut parent) = (chain.data.clone(), chain.data.clone());
        for link in chain.links() {
            let inputs: SmallVec<[Output; 2]> =
                link.inputs().into_iter().map(|input| if input == old { parent.clone() } else { input }).collect();
            let copy = link.clone_with_new_inputs(inputs)?;
            copy_runtime_info(link, &copy);
            old = link.output(0)?;
            parent = copy.output(0)?;
        }
        node.set_argument(index, &parent)?;
        debug!(node = %node.friendly_name(), input = index, "separated dequantization branch");
        separated = true;
    }
    Ok(separated)
}

// ===== Propagation =====

/// Result of [`move_dequantization_after`].
#[derive(Debug, Clone)]
pub struct MovedDequantization {
    /// The operation, now computing on the chain's data.
    pub operation: NodeRef,
    /// Last node of the re-applied chain; it took the operation's place.
    pub last: NodeRef,
}

/// Move `chain` from the input of `op` to its output.
///
/// A copy of `op` consumes the chain's data (or the zero-point subtraction
/// when `move_subtract` is off). The chain is re-applied after the copy,
/// preceded by a `Convert` when the copy's output type differs from the
/// chain's precision, and the copy plus chain replace `op` for every
/// consumer. A type-relaxed copy computes in its input type when
/// `update_precision` is on and in the scale's type otherwise.
///
/// Constants are taken from `chain`, so callers may pass rewritten ones via
/// [`FakeQuantizeDequantization::with_constants`].
pub fn move_dequantization_after(
    op: &NodeRef,
    chain: &FakeQuantizeDequantization,
    update_precision: bool,
    move_subtract: bool,
) -> Result<MovedDequantization> {
    let chain_output = chain.output();
    let detached = || DetachedDequantizationSnafu { op: op.friendly_name(), chain: chain_output.node().friendly_name() };
    ensure!(!chain.is_empty(), detached());
    let data_index = op.inputs().iter().position(|input| *input == chain_output).context(detached())?;

    let source = match &chain.subtract {
        Some(subtract) if !move_subtract => subtract.output(0)?,
        _ => chain.data.clone(),
    };
    let mut inputs = op.inputs();
    inputs[data_index] = source;
    let operation = op.clone_with_new_inputs(inputs)?;
    copy_runtime_info(op, &operation);

    let precision = chain.precision();
    if operation.is_type_relaxed() {
        let dtype = if update_precision {
            operation.input_dtype(data_index)?
        } else {
            chain
                .multiply_constant
                .as_ref()
                .or(chain.subtract_constant.as_ref())
                .and_then(|constant| constant.constant_value())
                .map_or(precision, |value| value.dtype())
        };
        set_out_data_precision(&operation, dtype)?;
    }

    let mut parent = operation.output(0)?;
    if parent.dtype() != precision {
        let destination =
            chain.convert.as_ref().and_then(|node| node.op_as::<Convert>()).map_or(precision, Convert::destination);
        let convert = Node::new(Convert::new(destination), [parent])?;
        mark_dequantization(&convert);
        parent = convert.output(0)?;
    }

    if move_subtract && let Some(subtract) = &chain.subtract {
        let operand = chain.subtract_convert.as_ref().or(chain.subtract_constant.as_ref());
        let operand = operand.context(NonConstantOperandSnafu { node: subtract.friendly_name(), index: 1usize })?;
        let operand = operand_in(operand, parent.dtype())?;
        let moved = Node::new(Subtract, [parent, operand])?;
        copy_runtime_info(subtract, &moved);
        mark_dequantization(&moved);
        parent = moved.output(0)?;
    }

    if let Some(multiply) = &chain.multiply {
        let operand = chain
            .multiply_constant
            .as_ref()
            .context(NonConstantOperandSnafu { node: multiply.friendly_name(), index: 1usize })?;
        let operand = operand_in(operand, parent.dtype())?;
        let moved = Node::new(Multiply, [parent, operand])?;
        copy_runtime_info(multiply, &moved);
        mark_dequantization(&moved);
        parent = moved.output(0)?;
    }

    let last = parent.node().clone();
    let name = op.friendly_name();
    if Arc::ptr_eq(&last, &operation) {
        operation.set_friendly_name(name);
    } else {
        operation.set_friendly_name(format!("{name}_original"));
        last.set_friendly_name(name);
    }
    replace_node(op, &last)?;
    debug!(op = %op.friendly_name(), last = %last.friendly_name(), "moved dequantization after operation");
    Ok(MovedDequantization { operation, last })
}

/// `operand` as a value of `dtype`, folding a cast into a new constant.
fn operand_in(operand: &NodeRef, dtype: DType) -> Result<Output> {
    let output = operand.output(0)?;
    if output.dtype() == dtype {
        return Ok(output);
    }
    ensure!(
        dtype.bitwidth() >= output.dtype().bitwidth(),
        ConstantNarrowingSnafu { node: operand.friendly_name(), from: output.dtype(), to: dtype }
    );
    let value =
        constant_value_of(operand).context(NonConstantOperandSnafu { node: operand.friendly_name(), index: 0usize })?;
    let folded = Constant::create(value.cast(dtype))?;
    copy_runtime_info(operand, &folded);
    Ok(folded.output(0)?)
}

/// Static dims of `output`, if fully known.
pub fn static_dims(output: &Output) -> Option<Vec<usize>> {
    to_static(&output.shape()).map(|dims| dims.to_vec())
}
