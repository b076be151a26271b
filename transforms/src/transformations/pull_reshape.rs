use lowp_ir::ops::{Constant, Multiply, Reshape};
use lowp_ir::{Match, NPat, Node, NodeRef, Tensor, replace_node};
use snafu::OptionExt;
use tracing::debug;

use crate::config::LowPrecisionParams;
use crate::context::TransformationContext;
use crate::dequantization::get_dequantization;
use crate::error::{NonConstantOperandSnafu, Result};
use crate::layer_transformation::LayerTransformation;
use crate::network_helper::{copy_info, static_dims};
use crate::transformations::rebuild_weights_chain;

/// Moves a `Reshape` of dequantized constant weights in front of the
/// dequantization by reshaping the weights and constants themselves.
#[derive(Debug, Clone, Default)]
pub struct PullReshapeThroughDequantization {
    params: LowPrecisionParams,
}

impl PullReshapeThroughDequantization {
    pub fn new(params: LowPrecisionParams) -> Self {
        Self { params }
    }
}

impl LayerTransformation for PullReshapeThroughDequantization {
    fn name(&self) -> &'static str {
        "PullReshapeThroughDequantization"
    }

    fn params(&self) -> &LowPrecisionParams {
        &self.params
    }

    fn patterns(&self) -> Vec<NPat> {
        vec![NPat::wrap_type::<Reshape>(vec![NPat::wrap_type::<Multiply>(vec![]), NPat::wrap_type::<Constant>(vec![])])]
    }

    fn can_be_transformed(&self, _ctx: &TransformationContext<'_>, node: &NodeRef) -> Result<bool> {
        let chain = get_dequantization(node, 0)?;
        Ok(chain.convert.is_some()
            && chain.multiply.is_some()
            && chain.data.node().is::<Constant>()
            && !chain.broadcasts_data()
            && static_dims(&chain.output()).is_some()
            && static_dims(&node.output(0)?).is_some())
    }

    fn transform(&self, ctx: &mut TransformationContext<'_>, found: &Match) -> Result<bool> {
        let reshape = found.root_node().clone();
        if !self.can_be_transformed(ctx, &reshape)? {
            return Ok(false);
        }
        let chain = get_dequantization(&reshape, 0)?;
        let (Some(input), Some(output)) = (static_dims(&chain.output()), static_dims(&reshape.output(0)?)) else {
            return Ok(false);
        };
        let weights = chain
            .data
            .node()
            .constant_value()
            .context(NonConstantOperandSnafu { node: chain.data.node().friendly_name(), index: 0usize })?;

        let reshape_value = |value: &Tensor| -> Result<Tensor> {
            let full = Tensor::new(value.dtype(), &input, value.broadcast_to(&input)?)?;
            Ok(full.reshape(&output)?)
        };
        let last = rebuild_weights_chain(&chain, weights.reshape(&output)?, reshape_value)?;
        copy_info(&reshape, &last);
        replace_node(&reshape, &last)?;
        debug!(node = %last.friendly_name(), "reshape pulled through dequantization");
        Ok(true)
    }

    fn is_precision_preserved(&self, _node: &Node) -> bool {
        false
    }
}
