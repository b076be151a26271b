use lowp_ir::ops::{Constant, Convert, Subtract};
use lowp_ir::{Match, NPat, Node, NodeRef, replace_node};
use tracing::debug;

use crate::config::LowPrecisionParams;
use crate::context::TransformationContext;
use crate::error::Result;
use crate::layer_transformation::LayerTransformation;
use crate::network_helper::fold_convert;

/// Folds `Convert(Constant)` on the zero-point input of a subtraction into a
/// single constant.
#[derive(Debug, Clone, Default)]
pub struct FoldConvertTransformation {
    params: LowPrecisionParams,
}

impl FoldConvertTransformation {
    pub fn new(params: LowPrecisionParams) -> Self {
        Self { params }
    }
}

impl LayerTransformation for FoldConvertTransformation {
    fn name(&self) -> &'static str {
        "FoldConvertTransformation"
    }

    fn params(&self) -> &LowPrecisionParams {
        &self.params
    }

    fn patterns(&self) -> Vec<NPat> {
        vec![NPat::wrap_type::<Subtract>(vec![
            NPat::any_input(),
            NPat::wrap_type::<Convert>(vec![NPat::wrap_type::<Constant>(vec![])]),
        ])]
    }

    fn can_be_transformed(&self, _ctx: &TransformationContext<'_>, node: &NodeRef) -> Result<bool> {
        let convert = node.input_node(1)?;
        Ok(convert.is::<Convert>() && convert.input_node(0)?.is::<Constant>())
    }

    fn transform(&self, ctx: &mut TransformationContext<'_>, found: &Match) -> Result<bool> {
        let subtract = found.root_node().clone();
        if !self.can_be_transformed(ctx, &subtract)? {
            return Ok(false);
        }
        let convert = subtract.input_node(1)?;
        let Some(folded) = fold_convert(&convert)? else {
            return Ok(false);
        };
        replace_node(&convert, &folded)?;
        debug!(node = %subtract.friendly_name(), "zero point convert folded");
        Ok(true)
    }

    fn is_precision_preserved(&self, _node: &Node) -> bool {
        false
    }
}
