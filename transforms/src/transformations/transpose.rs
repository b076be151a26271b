use lowp_ir::ops::{Constant, Multiply, Transpose};
use lowp_ir::{Match, NPat, Node, NodeRef, Tensor};
use snafu::OptionExt;
use tracing::debug;

use crate::config::LowPrecisionParams;
use crate::context::TransformationContext;
use crate::dequantization::get_dequantization;
use crate::error::{NonConstantOperandSnafu, Result};
use crate::layer_transformation::{LayerTransformation, can_be_transformed_base};
use crate::network_helper::{mark_precision_preserved, move_dequantization_after, separate_in_standalone_branch};
use crate::transformations::{as_ints, expand_rank, rebuild_constant};

/// Moves dequantization below `Transpose`, permuting per-channel constants
/// with the same order.
#[derive(Debug, Clone, Default)]
pub struct TransposeTransformation {
    params: LowPrecisionParams,
}

impl TransposeTransformation {
    pub fn new(params: LowPrecisionParams) -> Self {
        Self { params }
    }
}

impl LayerTransformation for TransposeTransformation {
    fn name(&self) -> &'static str {
        "TransposeTransformation"
    }

    fn params(&self) -> &LowPrecisionParams {
        &self.params
    }

    fn patterns(&self) -> Vec<NPat> {
        vec![NPat::wrap_type::<Transpose>(vec![
            NPat::wrap_type::<Multiply>(vec![]),
            NPat::wrap_type::<Constant>(vec![]),
        ])]
    }

    fn can_be_transformed(&self, ctx: &TransformationContext<'_>, node: &NodeRef) -> Result<bool> {
        if !can_be_transformed_base(&self.params, ctx, node)? {
            return Ok(false);
        }
        let chain = get_dequantization(node, 0)?;
        Ok(!chain.is_empty() && node.input_node(1)?.is::<Constant>())
    }

    fn transform(&self, ctx: &mut TransformationContext<'_>, found: &Match) -> Result<bool> {
        let transpose = found.root_node().clone();
        if !self.can_be_transformed(ctx, &transpose)? {
            return Ok(false);
        }
        separate_in_standalone_branch(&transpose)?;
        let chain = get_dequantization(&transpose, 0)?;

        let order = transpose
            .input_node(1)?
            .constant_value()
            .context(NonConstantOperandSnafu { node: transpose.friendly_name(), index: 1usize })?;
        let rank = chain.data.shape().len();
        let permutation = Transpose::permutation(&as_ints(&order), rank)?;
        let permute = |value: &Tensor| -> Result<Tensor> { Ok(expand_rank(value, rank)?.transpose(&permutation)?) };

        let subtract = chain.subtract_values().map(|value| rebuild_constant(&value, &permute)).transpose()?;
        let multiply = chain.multiply_values().map(|value| rebuild_constant(&value, &permute)).transpose()?;
        let chain = chain.with_constants(subtract, multiply);

        let moved = move_dequantization_after(&transpose, &chain, false, true)?;
        mark_precision_preserved(&moved.operation, self.is_precision_preserved(&moved.operation));
        debug!(node = %moved.last.friendly_name(), "transpose transformed");
        Ok(true)
    }

    fn is_precision_preserved(&self, _node: &Node) -> bool {
        true
    }
}
