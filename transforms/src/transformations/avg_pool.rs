use lowp_ir::ops::{AvgPool, FakeQuantize, Multiply};
use lowp_ir::{Match, NPat, Node, NodeRef, TypeRelaxation};
use tracing::debug;

use crate::config::LowPrecisionParams;
use crate::context::TransformationContext;
use crate::dequantization::get_dequantization;
use crate::error::Result;
use crate::layer_transformation::LayerTransformation;
use crate::network_helper::{mark_precision_preserved, move_dequantization_after, separate_in_standalone_branch};

/// Moves dequantization below `AvgPool`.
///
/// The pool is relaxed so it averages the low-precision data into the
/// dequantized type. With `update_precisions` on and only `FakeQuantize`
/// consumers the average stays in the data's type, since those consumers
/// requantize the value anyway.
#[derive(Debug, Clone, Default)]
pub struct AvgPoolTransformation {
    params: LowPrecisionParams,
}

impl AvgPoolTransformation {
    pub fn new(params: LowPrecisionParams) -> Self {
        Self { params }
    }
}

impl LayerTransformation for AvgPoolTransformation {
    fn name(&self) -> &'static str {
        "AvgPoolTransformation"
    }

    fn params(&self) -> &LowPrecisionParams {
        &self.params
    }

    fn patterns(&self) -> Vec<NPat> {
        vec![NPat::wrap_type::<AvgPool>(vec![NPat::wrap_type::<Multiply>(vec![])])]
    }

    fn transform(&self, ctx: &mut TransformationContext<'_>, found: &Match) -> Result<bool> {
        let pool = found.root_node().clone();
        if !self.can_be_transformed(ctx, &pool)? {
            return Ok(false);
        }
        let chain = get_dequantization(&pool, 0)?;
        if chain.is_empty() {
            return Ok(false);
        }

        separate_in_standalone_branch(&pool)?;
        if !pool.is_type_relaxed() {
            pool.set_relaxation(Some(TypeRelaxation::default()))?;
        }
        let chain = get_dequantization(&pool, 0)?;
        let update_precision = self.params.update_precisions && only_requantized(&pool)?;
        let moved = move_dequantization_after(&pool, &chain, update_precision, true)?;
        mark_precision_preserved(&moved.operation, self.is_precision_preserved(&moved.operation));
        debug!(node = %moved.last.friendly_name(), update_precision, "avg pool transformed");
        Ok(true)
    }

    fn is_precision_preserved(&self, _node: &Node) -> bool {
        false
    }
}

fn only_requantized(pool: &NodeRef) -> Result<bool> {
    let consumers = pool.consumers(0)?;
    Ok(!consumers.is_empty() && consumers.iter().all(|input| input.node().is::<FakeQuantize>()))
}
