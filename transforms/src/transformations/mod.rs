//! Layer transformations.
//!
//! - main: `max_pool`, `avg_pool`, `mvn`, `clamp`, `transpose`, `reshape`
//! - prerequisites: `pull_reshape`, `pull_transpose`
//! - cleanup: `fold_convert`, `fuse_convert`

use lowp_ir::ops::{Constant, Convert, Multiply, Subtract};
use lowp_ir::rt_info::copy_runtime_info;
use lowp_ir::{Node, NodeRef, Tensor};

use crate::dequantization::FakeQuantizeDequantization;
use crate::error::{Error, NonConstantOperandSnafu, Result};
use crate::network_helper::mark_dequantization;

pub mod avg_pool;
pub mod clamp;
pub mod fold_convert;
pub mod fuse_convert;
pub mod max_pool;
pub mod mvn;
pub mod pull_reshape;
pub mod pull_transpose;
pub mod reshape;
pub mod transpose;

pub use avg_pool::AvgPoolTransformation;
pub use clamp::ClampTransformation;
pub use fold_convert::FoldConvertTransformation;
pub use fuse_convert::FuseConvertTransformation;
pub use max_pool::MaxPoolTransformation;
pub use mvn::MvnTransformation;
pub use pull_reshape::PullReshapeThroughDequantization;
pub use pull_transpose::PullTransposeThroughDequantization;
pub use reshape::ReshapeTransformation;
pub use transpose::TransposeTransformation;

pub(crate) fn as_ints(value: &Tensor) -> Vec<i64> {
    value.values().iter().map(|&v| v as i64).collect()
}

/// `value` with leading unit dims up to `rank`.
pub(crate) fn expand_rank(value: &Tensor, rank: usize) -> lowp_ir::Result<Tensor> {
    if value.rank() >= rank {
        return Ok(value.clone());
    }
    let mut dims = vec![1; rank - value.rank()];
    dims.extend_from_slice(value.shape());
    value.reshape(&dims)
}

/// New constant for a dequantization operand: a scalar when every element
/// is equal, `map(value)` otherwise.
pub(crate) fn rebuild_constant(value: &Tensor, map: impl Fn(&Tensor) -> Result<Tensor>) -> Result<NodeRef> {
    let value = match value.scalar_value() {
        Some(scalar) => Tensor::scalar(value.dtype(), scalar),
        None => map(value)?,
    };
    Ok(Constant::create(value)?)
}

/// Rebuild a constant-weights chain `Constant -> Convert -> [Subtract] ->
/// Multiply` on `weights`, passing each dequantization constant through
/// `map`. Returns the last node of the new chain.
pub(crate) fn rebuild_weights_chain(
    chain: &FakeQuantizeDequantization,
    weights: Tensor,
    map: impl Fn(&Tensor) -> Result<Tensor>,
) -> Result<NodeRef> {
    let mut parent = Constant::create(weights)?.output(0)?;
    if let Some(convert) = &chain.convert {
        let destination = convert.output_dtype(0)?;
        let rebuilt = Node::new(Convert::new(destination), [parent])?;
        copy_runtime_info(convert, &rebuilt);
        parent = rebuilt.output(0)?;
    }
    if let Some(subtract) = &chain.subtract {
        let value = chain.subtract_values().ok_or_else(|| missing(subtract))?;
        let constant = rebuild_constant(&value, &map)?;
        let rebuilt = Node::new(Subtract, [parent, constant.output(0)?])?;
        copy_runtime_info(subtract, &rebuilt);
        mark_dequantization(&rebuilt);
        parent = rebuilt.output(0)?;
    }
    if let Some(multiply) = &chain.multiply {
        let value = chain.multiply_values().ok_or_else(|| missing(multiply))?;
        let constant = rebuild_constant(&value, &map)?;
        let rebuilt = Node::new(Multiply, [parent, constant.output(0)?])?;
        copy_runtime_info(multiply, &rebuilt);
        mark_dequantization(&rebuilt);
        parent = rebuilt.output(0)?;
    }
    Ok(parent.node().clone())
}

fn missing(node: &NodeRef) -> Error {
    NonConstantOperandSnafu { node: node.friendly_name(), index: 1usize }.build()
}
