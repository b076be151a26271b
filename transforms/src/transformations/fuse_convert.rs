use lowp_dtype::DType;
use lowp_ir::ops::{Add, Constant, Convert, Multiply, Subtract};
use lowp_ir::pattern::type_matches_any;
use lowp_ir::rt_info::copy_runtime_info_from_many;
use lowp_ir::{Match, NPat, Node, NodeRef, OpDef, TypeRelaxation, replace_node};
use smallvec::smallvec;
use tracing::{debug, trace};

use crate::config::LowPrecisionParams;
use crate::context::TransformationContext;
use crate::error::Result;
use crate::layer_transformation::LayerTransformation;
use crate::network_helper::{check_constant_value_precision, fold_convert};

/// Fuses a widening `Convert` into the arithmetic consuming it.
///
/// `Op(Convert(x), c)` becomes a type-relaxed `Op(x, c)` that reads `x` in
/// the convert's destination type. A constant `x` is folded instead.
#[derive(Debug, Clone, Default)]
pub struct FuseConvertTransformation {
    params: LowPrecisionParams,
}

impl FuseConvertTransformation {
    pub fn new(params: LowPrecisionParams) -> Self {
        Self { params }
    }

    fn pattern<T: OpDef>() -> NPat {
        NPat::wrap_type::<T>(vec![
            NPat::wrap_type::<Convert>(vec![]).with_predicate(type_matches_any(&[DType::Float16, DType::Float32])),
            NPat::wrap_type::<Constant>(vec![]),
        ])
    }
}

impl LayerTransformation for FuseConvertTransformation {
    fn name(&self) -> &'static str {
        "FuseConvertTransformation"
    }

    fn params(&self) -> &LowPrecisionParams {
        &self.params
    }

    fn patterns(&self) -> Vec<NPat> {
        vec![Self::pattern::<Multiply>(), Self::pattern::<Subtract>(), Self::pattern::<Add>()]
    }

    fn can_be_transformed(&self, _ctx: &TransformationContext<'_>, node: &NodeRef) -> Result<bool> {
        let convert = node.input_node(0)?;
        let constant = node.input_node(1)?;
        if !convert.is::<Convert>() || !constant.is::<Constant>() {
            return Ok(false);
        }
        // Relaxing the subtraction reads the zero point next to the raw data.
        if node.is::<Subtract>() && !check_constant_value_precision(convert.input_dtype(0)?, &constant) {
            trace!(node = %node.friendly_name(), "rejected: zero point outside the data type");
            return Ok(false);
        }
        Ok(true)
    }

    fn transform(&self, ctx: &mut TransformationContext<'_>, found: &Match) -> Result<bool> {
        let op = found.root_node().clone();
        if !self.can_be_transformed(ctx, &op)? {
            return Ok(false);
        }
        let convert = op.input_node(0)?;
        if let Some(folded) = fold_convert(&convert)? {
            replace_node(&convert, &folded)?;
            debug!(node = %op.friendly_name(), "constant convert folded");
            return Ok(true);
        }

        let destination = convert.output_dtype(0)?;
        let relaxation = TypeRelaxation::new(&[Some(destination), Some(destination)], &[Some(op.output_dtype(0)?)]);
        let fused = Node::from_op(
            op.op().clone(),
            smallvec![convert.input_value(0)?, op.input_value(1)?],
            Some(relaxation),
        )?;
        copy_runtime_info_from_many(&[convert.clone(), op.clone()], &fused);
        fused.set_friendly_name(op.friendly_name());
        replace_node(&op, &fused)?;
        debug!(node = %fused.friendly_name(), kind = %op.type_info(), "convert fused");
        Ok(true)
    }

    fn is_precision_preserved(&self, _node: &Node) -> bool {
        false
    }
}
