use lowp_ir::ops::{Constant, Multiply, Reshape};
use lowp_ir::{Match, NPat, Node, NodeRef, Tensor};
use tracing::{debug, trace};

use crate::config::LowPrecisionParams;
use crate::context::TransformationContext;
use crate::dequantization::get_dequantization;
use crate::error::Result;
use crate::layer_transformation::{LayerTransformation, can_be_transformed_base};
use crate::network_helper::{
    mark_precision_preserved, move_dequantization_after, separate_in_standalone_branch, static_dims,
};
use crate::transformations::rebuild_constant;

/// Moves dequantization below `Reshape`.
///
/// Per-tensor constants always survive a reshape. Per-channel constants do
/// when the batch and channel dimensions are kept.
#[derive(Debug, Clone, Default)]
pub struct ReshapeTransformation {
    params: LowPrecisionParams,
}

impl ReshapeTransformation {
    pub fn new(params: LowPrecisionParams) -> Self {
        Self { params }
    }
}

impl LayerTransformation for ReshapeTransformation {
    fn name(&self) -> &'static str {
        "ReshapeTransformation"
    }

    fn params(&self) -> &LowPrecisionParams {
        &self.params
    }

    fn patterns(&self) -> Vec<NPat> {
        vec![NPat::wrap_type::<Reshape>(vec![NPat::wrap_type::<Multiply>(vec![]), NPat::wrap_type::<Constant>(vec![])])]
    }

    fn can_be_transformed(&self, ctx: &TransformationContext<'_>, node: &NodeRef) -> Result<bool> {
        if !can_be_transformed_base(&self.params, ctx, node)? {
            return Ok(false);
        }
        let chain = get_dequantization(node, 0)?;
        if chain.is_empty() {
            return Ok(false);
        }
        let per_tensor = [chain.subtract_values(), chain.multiply_values().map(|value| value.as_ref().clone())]
            .into_iter()
            .flatten()
            .all(|value| value.is_scalar_like());
        if per_tensor {
            return Ok(true);
        }

        let (Some(input), Some(output)) = (static_dims(&node.input_value(0)?), static_dims(&node.output(0)?)) else {
            return Ok(false);
        };
        let keeps_channels = input.len() >= 2 && output.len() >= 2 && input[..2] == output[..2];
        if !keeps_channels {
            trace!(node = %node.friendly_name(), ?input, ?output, "rejected: channels not preserved");
        }
        Ok(keeps_channels)
    }

    fn transform(&self, ctx: &mut TransformationContext<'_>, found: &Match) -> Result<bool> {
        let reshape = found.root_node().clone();
        if !self.can_be_transformed(ctx, &reshape)? {
            return Ok(false);
        }
        separate_in_standalone_branch(&reshape)?;
        let chain = get_dequantization(&reshape, 0)?;

        let rank = reshape.output_shape(0)?.len();
        let to_channels = |value: &Tensor| -> Result<Tensor> {
            // Per-channel values, laid out as [1, C, 1, ...] in the new rank.
            let mut dims = vec![1; rank];
            dims[1] = value.len();
            Ok(value.reshape(&dims)?)
        };

        let subtract = chain.subtract_values().map(|value| rebuild_constant(&value, &to_channels)).transpose()?;
        let multiply = chain.multiply_values().map(|value| rebuild_constant(&value, &to_channels)).transpose()?;
        let chain = chain.with_constants(subtract, multiply);

        let moved = move_dequantization_after(&reshape, &chain, false, true)?;
        mark_precision_preserved(&moved.operation, self.is_precision_preserved(&moved.operation));
        debug!(node = %moved.last.friendly_name(), "reshape transformed");
        Ok(true)
    }

    fn is_precision_preserved(&self, _node: &Node) -> bool {
        true
    }
}
