use lowp_ir::ops::{Clamp, Convert, Multiply};
use lowp_ir::{Match, NPat, Node, NodeRef, TypeRelaxation, replace_node};
use tracing::{debug, trace};

use crate::config::LowPrecisionParams;
use crate::context::TransformationContext;
use crate::dequantization::get_dequantization;
use crate::error::Result;
use crate::layer_transformation::{LayerTransformation, can_be_transformed_base};
use crate::network_helper::{copy_info, mark_precision_preserved, move_dequantization_after, separate_in_standalone_branch};

/// Moves a per-tensor dequantization below `Clamp`, mapping the bounds back
/// onto the quantized grid.
#[derive(Debug, Clone, Default)]
pub struct ClampTransformation {
    params: LowPrecisionParams,
}

impl ClampTransformation {
    pub fn new(params: LowPrecisionParams) -> Self {
        Self { params }
    }
}

impl LayerTransformation for ClampTransformation {
    fn name(&self) -> &'static str {
        "ClampTransformation"
    }

    fn params(&self) -> &LowPrecisionParams {
        &self.params
    }

    fn patterns(&self) -> Vec<NPat> {
        vec![NPat::wrap_type::<Clamp>(vec![NPat::wrap_type::<Multiply>(vec![])])]
    }

    fn can_be_transformed(&self, ctx: &TransformationContext<'_>, node: &NodeRef) -> Result<bool> {
        if !can_be_transformed_base(&self.params, ctx, node)? {
            return Ok(false);
        }
        let chain = get_dequantization(node, 0)?;
        let scale = chain.multiply_values().and_then(|scales| scales.scalar_value());
        if !scale.is_some_and(|scale| scale != 0.0 && scale.is_finite()) {
            trace!(node = %node.friendly_name(), "rejected: scale is not a non-zero scalar");
            return Ok(false);
        }
        Ok(true)
    }

    fn transform(&self, ctx: &mut TransformationContext<'_>, found: &Match) -> Result<bool> {
        let clamp = found.root_node().clone();
        if !self.can_be_transformed(ctx, &clamp)? {
            return Ok(false);
        }
        let Some((min, max)) = clamp.op_as::<Clamp>().map(|op| (op.min(), op.max())) else {
            return Ok(false);
        };

        separate_in_standalone_branch(&clamp)?;
        let chain = get_dequantization(&clamp, 0)?;
        let Some(scale) = chain.multiply_values().and_then(|scales| scales.scalar_value()) else {
            return Ok(false);
        };
        // A per-channel zero point stays in front of the clamp.
        let zero_point = chain.subtract_values().and_then(|values| values.scalar_value());
        let move_subtract = chain.subtract.is_none() || zero_point.is_some();
        let shift = if move_subtract { zero_point.unwrap_or(0.0) } else { 0.0 };

        let precision = chain.precision();
        let moved = move_dequantization_after(&clamp, &chain, false, move_subtract)?;

        let (mut low, mut high) = (min / scale + shift, max / scale + shift);
        if scale < 0.0 {
            std::mem::swap(&mut low, &mut high);
        }
        let replacement = Node::new_relaxed(
            Clamp::new(low, high)?,
            [moved.operation.input_value(0)?],
            TypeRelaxation::new(&[None], &[Some(precision)]),
        )?;
        copy_info(&moved.operation, &replacement);
        replace_node(&moved.operation, &replacement)?;
        drop_identity_converts(&replacement)?;
        mark_precision_preserved(&replacement, self.is_precision_preserved(&replacement));
        debug!(node = %clamp.friendly_name(), low, high, "clamp transformed");
        Ok(true)
    }

    fn is_precision_preserved(&self, _node: &Node) -> bool {
        false
    }
}

/// Bypass converts of `node`'s output to the type it already has.
fn drop_identity_converts(node: &NodeRef) -> Result<()> {
    let output = node.output(0)?;
    for consumer in output.consumers() {
        let convert = consumer.node();
        if convert.op_as::<Convert>().is_some_and(|op| op.destination() == output.dtype()) {
            convert.output(0)?.replace(&output)?;
        }
    }
    Ok(())
}
