use lowp_ir::ops::{MaxPool, Multiply};
use lowp_ir::{Match, NPat, Node, NodeRef};
use tracing::{debug, trace};

use crate::config::LowPrecisionParams;
use crate::context::TransformationContext;
use crate::dequantization::get_dequantization;
use crate::error::Result;
use crate::layer_transformation::{LayerTransformation, can_be_transformed_base};
use crate::network_helper::{mark_precision_preserved, move_dequantization_after, separate_in_standalone_branch};

/// Moves dequantization below `MaxPool`. The maximum commutes with a
/// non-negative scale only, so negative scales are rejected.
#[derive(Debug, Clone, Default)]
pub struct MaxPoolTransformation {
    params: LowPrecisionParams,
}

impl MaxPoolTransformation {
    pub fn new(params: LowPrecisionParams) -> Self {
        Self { params }
    }
}

impl LayerTransformation for MaxPoolTransformation {
    fn name(&self) -> &'static str {
        "MaxPoolTransformation"
    }

    fn params(&self) -> &LowPrecisionParams {
        &self.params
    }

    fn patterns(&self) -> Vec<NPat> {
        vec![NPat::wrap_type::<MaxPool>(vec![NPat::wrap_type::<Multiply>(vec![])])]
    }

    fn can_be_transformed(&self, ctx: &TransformationContext<'_>, node: &NodeRef) -> Result<bool> {
        if !can_be_transformed_base(&self.params, ctx, node)? {
            return Ok(false);
        }
        let chain = get_dequantization(node, 0)?;
        let Some(scales) = chain.multiply_values() else {
            trace!(node = %node.friendly_name(), "rejected: no scale");
            return Ok(false);
        };
        if scales.values().iter().any(|&scale| scale < 0.0) {
            trace!(node = %node.friendly_name(), "rejected: negative scale");
            return Ok(false);
        }
        Ok(true)
    }

    fn transform(&self, ctx: &mut TransformationContext<'_>, found: &Match) -> Result<bool> {
        let pool = found.root_node().clone();
        if !self.can_be_transformed(ctx, &pool)? {
            return Ok(false);
        }
        separate_in_standalone_branch(&pool)?;
        let chain = get_dequantization(&pool, 0)?;
        let moved = move_dequantization_after(&pool, &chain, false, true)?;
        mark_precision_preserved(&moved.operation, self.is_precision_preserved(&moved.operation));
        debug!(node = %moved.last.friendly_name(), "max pool transformed");
        Ok(true)
    }

    fn is_precision_preserved(&self, _node: &Node) -> bool {
        true
    }
}
