use lowp_ir::ops::{Constant, Multiply, Transpose};
use lowp_ir::{Match, NPat, Node, NodeRef, Tensor, replace_node};
use snafu::OptionExt;
use tracing::debug;

use crate::config::LowPrecisionParams;
use crate::context::TransformationContext;
use crate::dequantization::get_dequantization;
use crate::error::{NonConstantOperandSnafu, Result};
use crate::layer_transformation::LayerTransformation;
use crate::network_helper::copy_info;
use crate::transformations::{as_ints, expand_rank, rebuild_weights_chain};

/// Moves a `Transpose` of dequantized constant weights in front of the
/// dequantization by permuting the weights and constants themselves.
#[derive(Debug, Clone, Default)]
pub struct PullTransposeThroughDequantization {
    params: LowPrecisionParams,
}

impl PullTransposeThroughDequantization {
    pub fn new(params: LowPrecisionParams) -> Self {
        Self { params }
    }
}

impl LayerTransformation for PullTransposeThroughDequantization {
    fn name(&self) -> &'static str {
        "PullTransposeThroughDequantization"
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

    fn can_be_transformed(&self, _ctx: &TransformationContext<'_>, node: &NodeRef) -> Result<bool> {
        let chain = get_dequantization(node, 0)?;
        Ok(chain.convert.is_some() && chain.multiply.is_some() && chain.data.node().is::<Constant>())
    }

    fn transform(&self, ctx: &mut TransformationContext<'_>, found: &Match) -> Result<bool> {
        let transpose = found.root_node().clone();
        if !self.can_be_transformed(ctx, &transpose)? {
            return Ok(false);
        }
        let chain = get_dequantization(&transpose, 0)?;
        let operand = |node: &NodeRef, index: usize| NonConstantOperandSnafu { node: node.friendly_name(), index };
        let weights = chain.data.node().constant_value().context(operand(chain.data.node(), 0))?;
        let order = transpose.input_node(1)?.constant_value().context(operand(&transpose, 1))?;

        let rank = weights.rank();
        let permutation = Transpose::permutation(&as_ints(&order), rank)?;
        let permute = |value: &Tensor| -> Result<Tensor> { Ok(expand_rank(value, rank)?.transpose(&permutation)?) };
        let last = rebuild_weights_chain(&chain, weights.transpose(&permutation)?, permute)?;
        copy_info(&transpose, &last);
        replace_node(&transpose, &last)?;
        debug!(node = %last.friendly_name(), "transpose pulled through dequantization");
        Ok(true)
    }

    fn is_precision_preserved(&self, _node: &Node) -> bool {
        false
    }
}
