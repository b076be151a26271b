//! The per-operation transformation interface.
//!
//! A layer transformation moves the dequantization chain feeding one kind of
//! operation to its output. Its life cycle for one node:
//!
//! 1. **Registered**: [`LayerTransformation::register_matcher_in`] adds one
//!    matcher per pattern to a [`GraphRewrite`].
//! 2. **Matched**: the engine hands the match to
//!    [`LayerTransformation::transform`].
//! 3. **Transformed** or **Rejected**: `transform` first asks
//!    [`LayerTransformation::can_be_transformed`]; a rejected node is left
//!    untouched and the callback returns `Ok(false)`.

use lowp_ir::shape::is_static;
use lowp_ir::{GraphRewrite, Match, Matcher, NPat, Node, NodeRef, TypeInfo};
use tracing::trace;

use crate::config::LowPrecisionParams;
use crate::context::TransformationContext;
use crate::dequantization::get_dequantization;
use crate::error::{Error, Result};
use crate::network_helper::is_per_tensor_or_per_channel;

pub trait LayerTransformation {
    fn name(&self) -> &'static str;

    fn params(&self) -> &LowPrecisionParams;

    /// Patterns whose root is the transformed operation.
    fn patterns(&self) -> Vec<NPat>;

    /// Whether `node` may be transformed in the current graph.
    fn can_be_transformed(&self, ctx: &TransformationContext<'_>, node: &NodeRef) -> Result<bool> {
        can_be_transformed_base(self.params(), ctx, node)
    }

    /// Rewrite a match. Returns `Ok(false)` when the node was rejected.
    fn transform(&self, ctx: &mut TransformationContext<'_>, found: &Match) -> Result<bool>;

    /// Whether the transformed operation keeps its input on the integer grid.
    /// Depends on the kind of `node` only.
    fn is_precision_preserved(&self, node: &Node) -> bool;

    /// Kinds the patterns can be rooted at.
    fn kinds(&self) -> Vec<TypeInfo> {
        let mut kinds = Vec::new();
        for pattern in self.patterns() {
            for kind in pattern.root_kinds().into_iter().flatten() {
                if !kinds.contains(&kind) {
                    kinds.push(kind);
                }
            }
        }
        kinds
    }

    fn register_matcher_in<'r, 'a>(
        &'r self,
        rewrite: &mut GraphRewrite<'r, TransformationContext<'a>, Error>,
    ) -> Result<()> {
        for (index, pattern) in self.patterns().into_iter().enumerate() {
            let matcher = Matcher::new(format!("{}#{index}", self.name()), pattern)?;
            rewrite.add_matcher(matcher, move |ctx: &mut TransformationContext<'a>, found: &Match| {
                self.transform(ctx, found)
            })?;
        }
        Ok(())
    }
}

/// Checks shared by every layer transformation.
///
/// Rejects dynamic shapes, chains whose constants broadcast the data,
/// dequantization constants that are neither per-tensor nor per-channel,
/// data types the params manager does not admit and zero points when
/// asymmetric quantization is off. A node without a dequantization chain
/// passes.
pub fn can_be_transformed_base(
    params: &LowPrecisionParams,
    ctx: &TransformationContext<'_>,
    node: &NodeRef,
) -> Result<bool> {
    let name = node.friendly_name();
    if let Some(input) = node.inputs().iter().find(|input| !is_static(&input.shape())) {
        trace!(node = %name, input = ?input, "rejected: dynamic shape");
        return Ok(false);
    }

    let chain = get_dequantization(node, 0)?;
    if chain.is_empty() {
        return Ok(true);
    }

    if chain.broadcasts_data() {
        trace!(node = %name, "rejected: constants broadcast the data");
        return Ok(false);
    }

    let rank = chain.data.shape().len();
    for constant in [&chain.subtract_constant, &chain.multiply_constant].into_iter().flatten() {
        let per_channel = constant.constant_value().is_some_and(|value| is_per_tensor_or_per_channel(&value, rank));
        if !per_channel {
            trace!(node = %name, constant = %constant.friendly_name(), "rejected: constant layout");
            return Ok(false);
        }
    }

    if chain.convert.is_some() && !ctx.params_manager().precisions_on_activations(node).contains(chain.data_precision())
    {
        trace!(node = %name, dtype = %chain.data_precision(), "rejected: precision not admitted");
        return Ok(false);
    }

    if chain.subtract.is_some() && !params.support_asymmetric_quantization {
        trace!(node = %name, "rejected: asymmetric quantization disabled");
        return Ok(false);
    }
    Ok(true)
}
