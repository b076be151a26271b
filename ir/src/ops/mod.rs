//! Built-in operation set.
//!
//! - `data`: graph sources and sinks (Parameter, Constant, Result)
//! - `elementwise`: Convert, arithmetic and Clamp
//! - `pooling`: MaxPool, AvgPool
//! - `normalization`: Mvn
//! - `movement`: Reshape, Transpose, StridedSlice, VariadicSplit
//! - `quantize`: FakeQuantize

use std::sync::Arc;

use smallvec::smallvec;
use snafu::{OptionExt, ensure};

use crate::error::{DynamicShapeSnafu, InputCountMismatchSnafu, NonConstantInputSnafu, Result};
use crate::node::OutputDesc;
use crate::op::{InferInput, InferredOutputs};
use crate::shape::{self, StaticShape};
use crate::tensor::Tensor;

/// `type_info` and `as_any` for kinds implementing `OpDef`.
macro_rules! op_common {
    () => {
        fn type_info(&self) -> $crate::op::TypeInfo {
            <Self as $crate::op::OpDef>::TYPE_INFO
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    };
}
pub(crate) use op_common;

pub mod data;
pub mod elementwise;
pub mod movement;
pub mod normalization;
pub mod pooling;
pub mod quantize;

pub use data::{Constant, Parameter, ResultOp};
pub use elementwise::{Add, Clamp, Convert, Multiply, Subtract};
pub use movement::{Reshape, SliceAxis, StridedSlice, Transpose, VariadicSplit};
pub use normalization::{Mvn, MvnEpsMode};
pub use pooling::{AvgPool, MaxPool, RoundingType};
pub use quantize::FakeQuantize;

/// Opset version string shared by the built-in kinds.
pub const OPSET: &str = "opset1";

pub(crate) fn expect_inputs(op: &'static str, inputs: &[InferInput], expected: usize) -> Result<()> {
    ensure!(inputs.len() == expected, InputCountMismatchSnafu { op, expected, actual: inputs.len() });
    Ok(())
}

pub(crate) fn single(desc: OutputDesc) -> InferredOutputs {
    smallvec![desc]
}

pub(crate) fn constant_input<'a>(op: &'static str, inputs: &'a [InferInput], index: usize) -> Result<&'a Arc<Tensor>> {
    inputs.get(index).and_then(|input| input.value.as_ref()).context(NonConstantInputSnafu { op, index })
}

pub(crate) fn static_dims(op: &'static str, desc: &OutputDesc) -> Result<StaticShape> {
    shape::to_static(&desc.shape).context(DynamicShapeSnafu { op })
}

/// First `N` evaluation inputs as an array.
pub(crate) fn args<'a, const N: usize>(op: &'static str, inputs: &'a [Tensor]) -> Result<&'a [Tensor; N]> {
    inputs
        .get(..N)
        .and_then(|prefix| <&[Tensor; N]>::try_from(prefix).ok())
        .context(InputCountMismatchSnafu { op, expected: N, actual: inputs.len() })
}

/// Inferred output descriptor `index`, required to be static for evaluation.
pub(crate) fn output_dims(op: &'static str, outputs: &[OutputDesc], index: usize) -> Result<StaticShape> {
    let desc = outputs.get(index).context(DynamicShapeSnafu { op })?;
    static_dims(op, desc)
}
