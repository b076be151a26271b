//! Collapse of an explicit quantize/dequantize round trip.
//!
//! ```text
//! FakeQuantize ─► Convert(i8|u8) ─► Convert(f32) ─► Subtract(zp) ─► Multiply(scale)
//! ```
//!
//! becomes one `FakeQuantize` whose output range is already dequantized:
//! `(output_low - zp) * scale` and `(output_high - zp) * scale`.

use lowp_dtype::DType;
use lowp_ir::ops::{Constant, Convert, FakeQuantize, Multiply, Subtract};
use lowp_ir::pattern::{consumers_count, type_matches, type_matches_any};
use lowp_ir::rt_info::copy_runtime_info_from_many;
use lowp_ir::{Function, FunctionPass, GraphRewrite, Match, Matcher, NPat, Node, OpRegistry, Output};
use lowp_ir::{RewriteConfig, replace_node};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::network_helper::fold_constant;

/// Fuses `FakeQuantize -> Convert -> Convert -> Subtract -> Multiply` into a
/// single `FakeQuantize`.
#[derive(Debug, Clone)]
pub struct ConvertQuantizeDequantize<'r> {
    registry: &'r OpRegistry,
    config: RewriteConfig,
}

impl<'r> ConvertQuantizeDequantize<'r> {
    pub fn new(registry: &'r OpRegistry) -> Self {
        Self { registry, config: RewriteConfig::default() }
    }

    pub fn with_config(mut self, config: RewriteConfig) -> Self {
        self.config = config;
        self
    }

    pub fn pattern() -> NPat {
        let fake_quantize = NPat::wrap_type::<FakeQuantize>(vec![
            NPat::label("data"),
            NPat::label("input_low"),
            NPat::label("input_high"),
            NPat::wrap_type::<Constant>(vec![]).named("output_low"),
            NPat::wrap_type::<Constant>(vec![]).named("output_high"),
        ])
        .named("fake_quantize");
        let to_low_precision = NPat::wrap_type::<Convert>(vec![fake_quantize])
            .with_predicate(type_matches_any(&[DType::Int8, DType::UInt8]))
            .named("convert1");
        let to_float = NPat::wrap_type::<Convert>(vec![to_low_precision])
            .with_predicate(type_matches(DType::Float32))
            .named("convert2");
        let subtract = NPat::wrap_type::<Subtract>(vec![to_float, NPat::label("zero_point")])
            .with_predicate(consumers_count(1))
            .named("subtract");
        NPat::wrap_type::<Multiply>(vec![subtract, NPat::label("scale")]).named("multiply")
    }

    pub fn register_in<C>(&self, rewrite: &mut GraphRewrite<'_, C, Error>) -> Result<()> {
        let matcher = Matcher::new("ConvertQuantizeDequantize", Self::pattern())?;
        rewrite.add_matcher(matcher, |_: &mut C, found: &Match| fuse(found))
    }
}

impl FunctionPass<Error> for ConvertQuantizeDequantize<'_> {
    fn name(&self) -> &str {
        "ConvertQuantizeDequantize"
    }

    fn run_on_function(&self, function: &Function) -> Result<bool> {
        let mut rewrite: GraphRewrite<'_, (), Error> =
            GraphRewrite::new("ConvertQuantizeDequantize", self.registry).with_config(self.config);
        self.register_in(&mut rewrite)?;
        rewrite.run(function, &mut ())
    }
}

fn fuse(found: &Match) -> Result<bool> {
    let (
        Some(data),
        Some(input_low),
        Some(input_high),
        Some(output_low),
        Some(output_high),
        Some(zero_point),
        Some(scale),
    ) = (
        found.get("data"),
        found.get("input_low"),
        found.get("input_high"),
        found.get("output_low"),
        found.get("output_high"),
        found.get("zero_point"),
        found.get("scale"),
    )
    else {
        return Ok(false);
    };
    let (Some(fake_quantize), Some(convert1), Some(convert2)) =
        (found.node("fake_quantize"), found.node("convert1"), found.node("convert2"))
    else {
        return Ok(false);
    };
    let multiply = found.root_node();

    if convert1.consumer_count() != 1 || convert2.consumer_count() != 1 {
        trace!(node = %multiply.friendly_name(), "rejected: converts are shared");
        return Ok(false);
    }
    let Some(levels) = fake_quantize.op_as::<FakeQuantize>().map(FakeQuantize::levels) else {
        return Ok(false);
    };
    let range = |output: &Output| output.node().constant_value().and_then(|value| value.scalar_value());
    let (Some(low), Some(high)) = (range(output_low), range(output_high)) else {
        return Ok(false);
    };
    let expected = match convert1.output_dtype(0)? {
        DType::Int8 => (-128.0, 127.0),
        DType::UInt8 => (0.0, 255.0),
        _ => return Ok(false),
    };
    if levels != 256 || (low, high) != expected {
        trace!(node = %multiply.friendly_name(), levels, low, high, "rejected: not a full 8-bit range");
        return Ok(false);
    }
    if scale.shape().len() > data.shape().len() {
        return Ok(false);
    }

    let rescale = |bound: &Output| -> Result<Output> {
        let shifted = Node::new(Subtract, [bound.clone(), zero_point.clone()])?;
        let shifted = fold_constant(&shifted)?.unwrap_or(shifted);
        let scaled = Node::new(Multiply, [shifted.output(0)?, scale.clone()])?;
        let scaled = fold_constant(&scaled)?.unwrap_or(scaled);
        Ok(scaled.output(0)?)
    };
    let new_low = rescale(output_low)?;
    let new_high = rescale(output_high)?;

    let fused = Node::new(
        FakeQuantize::new(levels)?,
        [data.clone(), input_low.clone(), input_high.clone(), new_low, new_high],
    )?;
    copy_runtime_info_from_many(&[fake_quantize.clone(), convert1.clone(), convert2.clone()], &fused);
    fused.set_friendly_name(multiply.friendly_name());
    replace_node(multiply, &fused)?;
    debug!(node = %fused.friendly_name(), "quantize/dequantize pair fused");
    Ok(true)
}
