use lowp_ir::ops::{Constant, Multiply, Mvn};
use lowp_ir::rt_info::copy_runtime_info;
use lowp_ir::{Match, NPat, Node, NodeRef, TypeRelaxation, replace_node};
use smallvec::smallvec;
use snafu::OptionExt;
use tracing::{debug, trace};

use crate::config::LowPrecisionParams;
use crate::context::TransformationContext;
use crate::dequantization::get_dequantization;
use crate::error::{NonConstantOperandSnafu, Result, UnexpectedElementTypeSnafu};
use crate::layer_transformation::{LayerTransformation, can_be_transformed_base};
use crate::network_helper::{is_scalar_like, mark_dequantization, mark_precision_preserved};

/// Moves a scale below mean-variance normalization.
///
/// Centering commutes with any scale. Variance normalization cancels the
/// magnitude of the scale and keeps only its sign.
#[derive(Debug, Clone, Default)]
pub struct MvnTransformation {
    params: LowPrecisionParams,
}

impl MvnTransformation {
    pub fn new(params: LowPrecisionParams) -> Self {
        Self { params }
    }
}

impl LayerTransformation for MvnTransformation {
    fn name(&self) -> &'static str {
        "MvnTransformation"
    }

    fn params(&self) -> &LowPrecisionParams {
        &self.params
    }

    fn patterns(&self) -> Vec<NPat> {
        vec![NPat::wrap_type::<Mvn>(vec![NPat::wrap_type::<Multiply>(vec![])])]
    }

    fn can_be_transformed(&self, ctx: &TransformationContext<'_>, node: &NodeRef) -> Result<bool> {
        if !can_be_transformed_base(&self.params, ctx, node)? {
            return Ok(false);
        }
        let Some(mvn) = node.op_as::<Mvn>() else {
            return Ok(false);
        };
        let chain = get_dequantization(node, 0)?;
        let Some(scales) = &chain.multiply_constant else {
            return Ok(false);
        };
        if chain.subtract.is_some() {
            trace!(node = %node.friendly_name(), "rejected: zero point");
            return Ok(false);
        }

        let axes = mvn.reduction_axes();
        if !axes.contains(&1) {
            return Ok(true);
        }
        // Reducing over channels mixes per-channel scales.
        let rank = chain.data.shape().len();
        let per_tensor = (2..rank).all(|axis| axes.contains(&axis));
        Ok(per_tensor && is_scalar_like(scales))
    }

    fn transform(&self, ctx: &mut TransformationContext<'_>, found: &Match) -> Result<bool> {
        let mvn = found.root_node().clone();
        if !self.can_be_transformed(ctx, &mvn)? {
            return Ok(false);
        }
        let Some(op) = mvn.op_as::<Mvn>() else {
            return Ok(false);
        };
        let chain = get_dequantization(&mvn, 0)?;
        let scales = chain.multiply_values().context(NonConstantOperandSnafu { node: mvn.friendly_name(), index: 0usize })?;
        if !scales.dtype().is_real() {
            return UnexpectedElementTypeSnafu {
                transformation: self.name(),
                node: mvn.friendly_name(),
                dtype: scales.dtype(),
            }
            .fail();
        }

        let deq_precision = self.params.deq_precision;
        let scales = if op.normalize_variance() {
            scales.map(|scale| if scale < 0.0 { -1.0 } else { 1.0 })
        } else {
            scales.as_ref().clone()
        };

        let relaxation = TypeRelaxation::new(&[Some(deq_precision)], &[Some(deq_precision)]);
        let normalized = Node::from_op(mvn.op().clone(), smallvec![chain.data.clone()], Some(relaxation))?;
        copy_runtime_info(&mvn, &normalized);

        let scales = Constant::create(scales.cast(deq_precision))?;
        let output_type = mvn.output_dtype(0)?;
        let multiply = Node::new_relaxed(
            Multiply,
            [normalized.output(0)?, scales.output(0)?],
            TypeRelaxation::new(&[None, None], &[Some(output_type)]),
        )?;
        mark_dequantization(&multiply);

        let name = mvn.friendly_name();
        normalized.set_friendly_name(format!("{name}_original"));
        multiply.set_friendly_name(name);
        replace_node(&mvn, &multiply)?;
        mark_precision_preserved(&normalized, self.is_precision_preserved(&normalized));
        debug!(node = %multiply.friendly_name(), normalize_variance = op.normalize_variance(), "mvn transformed");
        Ok(true)
    }

    fn is_precision_preserved(&self, _node: &Node) -> bool {
        false
    }
}
