//! Orchestration of a low-precision run.
//!
//! Three rewrite steps run in order over the function:
//!
//! 1. **prerequisites** - pull layout changes of constant weights in front
//!    of their dequantization
//! 2. **main** - move dequantization below every supported operation
//! 3. **cleanup** - fold and fuse the converts left behind

use bon::bon;
use lowp_dtype::DTypeSet;
use lowp_ir::ops::{Convert, FakeQuantize};
use lowp_ir::{Function, GraphRewrite, Node, OpRegistry, RewriteConfig};
use tracing::{debug, info_span};

use crate::config::LowPrecisionParams;
use crate::context::TransformationContext;
use crate::error::{Error, Result};
use crate::layer_transformation::LayerTransformation;
use crate::params_manager::{LayerTransformationsManager, ParamsManager};
use crate::transformations::{
    AvgPoolTransformation, ClampTransformation, FoldConvertTransformation, FuseConvertTransformation,
    MaxPoolTransformation, MvnTransformation, PullReshapeThroughDequantization, PullTransposeThroughDequantization,
    ReshapeTransformation, TransposeTransformation,
};

/// Which rewrite step a transformation runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Prerequisites,
    Main,
    Cleanup,
}

pub struct LowPrecisionTransformer {
    params: LowPrecisionParams,
    registry: OpRegistry,
    config: RewriteConfig,
    prerequisites: Vec<Box<dyn LayerTransformation>>,
    transformations: Vec<Box<dyn LayerTransformation>>,
    cleanup: Vec<Box<dyn LayerTransformation>>,
}

#[bon]
impl LowPrecisionTransformer {
    /// Transformer holding the built-in transformations.
    #[builder]
    pub fn builder(
        #[builder(default)] params: LowPrecisionParams,
        #[builder(default = OpRegistry::opset1())] registry: OpRegistry,
        #[builder(default)] config: RewriteConfig,
    ) -> Self {
        let mut transformer = Self {
            params,
            registry,
            config,
            prerequisites: Vec::new(),
            transformations: Vec::new(),
            cleanup: Vec::new(),
        };
        transformer.add(Step::Prerequisites, PullReshapeThroughDequantization::new(params));
        transformer.add(Step::Prerequisites, PullTransposeThroughDequantization::new(params));

        transformer.add(Step::Main, MaxPoolTransformation::new(params));
        transformer.add(Step::Main, AvgPoolTransformation::new(params));
        transformer.add(Step::Main, MvnTransformation::new(params));
        transformer.add(Step::Main, ClampTransformation::new(params));
        transformer.add(Step::Main, TransposeTransformation::new(params));
        transformer.add(Step::Main, ReshapeTransformation::new(params));

        transformer.add(Step::Cleanup, FoldConvertTransformation::new(params));
        transformer.add(Step::Cleanup, FuseConvertTransformation::new(params));
        transformer
    }

    pub fn new(params: LowPrecisionParams) -> Self {
        Self::builder().params(params).build()
    }

    pub fn params(&self) -> &LowPrecisionParams {
        &self.params
    }

    pub fn registry(&self) -> &OpRegistry {
        &self.registry
    }

    /// Append a transformation to `step`.
    pub fn add(&mut self, step: Step, transformation: impl LayerTransformation + 'static) {
        let list = match step {
            Step::Prerequisites => &mut self.prerequisites,
            Step::Main => &mut self.transformations,
            Step::Cleanup => &mut self.cleanup,
        };
        list.push(Box::new(transformation));
    }

    /// Names of the transformations of `step` in registration order.
    pub fn names(&self, step: Step) -> Vec<&'static str> {
        self.step(step).iter().map(|transformation| transformation.name()).collect()
    }

    fn step(&self, step: Step) -> &[Box<dyn LayerTransformation>] {
        match step {
            Step::Prerequisites => &self.prerequisites,
            Step::Main => &self.transformations,
            Step::Cleanup => &self.cleanup,
        }
    }

    /// Run every step over `function`. Returns whether anything changed.
    pub fn transform(&self, function: &Function) -> Result<bool> {
        let mut ctx = TransformationContext::new(function, self);
        self.run(&mut ctx)
    }

    /// Run every step with caller-owned bookkeeping.
    #[tracing::instrument(skip_all, fields(function = ctx.function().name()))]
    pub fn run(&self, ctx: &mut TransformationContext<'_>) -> Result<bool> {
        self.mark_quantized_fake_quantizes(ctx);
        let mut changed = false;
        for (name, step) in [("prerequisites", Step::Prerequisites), ("main", Step::Main), ("cleanup", Step::Cleanup)] {
            let span = info_span!("step", name);
            let _guard = span.enter();
            let step_changed = self.run_step(name, self.step(step), ctx)?;
            debug!(changed = step_changed, "step finished");
            changed |= step_changed;
        }
        Ok(changed)
    }

    fn run_step<'a>(
        &self,
        name: &str,
        transformations: &[Box<dyn LayerTransformation>],
        ctx: &mut TransformationContext<'a>,
    ) -> Result<bool> {
        let mut rewrite: GraphRewrite<'_, TransformationContext<'a>, Error> =
            GraphRewrite::new(name, &self.registry).with_config(self.config);
        for transformation in transformations {
            transformation.register_matcher_in(&mut rewrite)?;
        }
        let function = ctx.function();
        rewrite.run(function, ctx)
    }

    /// Record fake-quantize nodes whose every consumer stores the result in
    /// an admissible low-precision type.
    fn mark_quantized_fake_quantizes(&self, ctx: &mut TransformationContext<'_>) {
        for node in ctx.function().ordered_ops() {
            if !node.is::<FakeQuantize>() {
                continue;
            }
            let admissible = self.precisions_on_activations(&node);
            let consumers = node.outputs().iter().flat_map(|output| output.consumers()).collect::<Vec<_>>();
            let quantized = !consumers.is_empty()
                && consumers.iter().all(|input| {
                    input.node().op_as::<Convert>().is_some_and(|convert| admissible.contains(convert.destination()))
                });
            if quantized {
                ctx.mark_quantized(&node);
            }
        }
    }

    fn handler(&self, node: &Node) -> Option<&dyn LayerTransformation> {
        let kind = node.type_info();
        self.transformations
            .iter()
            .find(|transformation| transformation.kinds().contains(&kind))
            .map(|transformation| transformation.as_ref())
    }
}

impl Default for LowPrecisionTransformer {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ParamsManager for LowPrecisionTransformer {
    fn precisions_on_activations(&self, _node: &Node) -> DTypeSet {
        self.params.precisions_on_activations
    }
}

impl LayerTransformationsManager for LowPrecisionTransformer {
    fn is_quantized(&self, node: &Node) -> bool {
        self.handler(node).is_some()
    }

    fn is_precision_preserved(&self, node: &Node) -> bool {
        self.handler(node).is_some_and(|transformation| transformation.is_precision_preserved(node))
    }
}

impl std::fmt::Debug for LowPrecisionTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LowPrecisionTransformer")
            .field("params", &self.params)
            .field("prerequisites", &self.names(Step::Prerequisites))
            .field("transformations", &self.names(Step::Main))
            .field("cleanup", &self.names(Step::Cleanup))
            .finish()
    }
}
