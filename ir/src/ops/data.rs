use std::sync::Arc;

use lowp_dtype::DType;
use smallvec::smallvec;

use super::{OPSET, args, expect_inputs, op_common, single};
use crate::error::{EvaluationUnsupportedSnafu, Result};
use crate::node::{NodeRef, Output, OutputDesc};
use crate::op::{AttributeMap, EvaluatedOutputs, InferInput, InferredOutputs, OpDef, Operation, TypeInfo};
use crate::shape::Shape;
use crate::tensor::Tensor;

/// Graph input. Its value is supplied when the function is evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    dtype: DType,
    shape: Shape,
}

impl Parameter {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self { dtype, shape }
    }

    pub fn create(dtype: DType, shape: Shape) -> Result<NodeRef> {
        crate::Node::new(Self::new(dtype, shape), [])
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }
}

impl OpDef for Parameter {
    const TYPE_INFO: TypeInfo = TypeInfo::new("Parameter", OPSET);

    fn from_attributes(attributes: &AttributeMap) -> Result<Self> {
        let op = Self::TYPE_INFO.name;
        Ok(Self { dtype: attributes.dtype(op, "element_type")?, shape: attributes.shape(op, "shape")? })
    }
}

impl Operation for Parameter {
    op_common!();

    fn infer(&self, inputs: &[InferInput]) -> Result<InferredOutputs> {
        expect_inputs(Self::TYPE_INFO.name, inputs, 0)?;
        Ok(single(OutputDesc::new(self.dtype, self.shape.clone())))
    }

    fn evaluate(&self, _inputs: &[Tensor], _outputs: &[OutputDesc]) -> Result<EvaluatedOutputs> {
        EvaluationUnsupportedSnafu { op: Self::TYPE_INFO.name }.fail()
    }

    fn visit_attributes(&self) -> AttributeMap {
        AttributeMap::new().with("element_type", self.dtype).with("shape", self.shape.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    value: Arc<Tensor>,
}

impl Constant {
    pub fn new(value: Tensor) -> Self {
        Self { value: Arc::new(value) }
    }

    pub fn create(value: Tensor) -> Result<NodeRef> {
        crate::Node::new(Self::new(value), [])
    }

    pub fn value(&self) -> &Arc<Tensor> {
        &self.value
    }
}

impl OpDef for Constant {
    const TYPE_INFO: TypeInfo = TypeInfo::new("Constant", OPSET);

    fn from_attributes(attributes: &AttributeMap) -> Result<Self> {
        Ok(Self { value: attributes.tensor(Self::TYPE_INFO.name, "value")? })
    }
}

impl Operation for Constant {
    op_common!();

    fn infer(&self, inputs: &[InferInput]) -> Result<InferredOutputs> {
        expect_inputs(Self::TYPE_INFO.name, inputs, 0)?;
        Ok(single(OutputDesc::new(self.value.dtype(), self.value.dims())))
    }

    fn evaluate(&self, _inputs: &[Tensor], _outputs: &[OutputDesc]) -> Result<EvaluatedOutputs> {
        Ok(smallvec![self.value.as_ref().clone()])
    }

    fn visit_attributes(&self) -> AttributeMap {
        AttributeMap::new().with("value", self.value.clone())
    }
}

/// Graph output sink. Mirrors its single input.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResultOp;

impl ResultOp {
    pub fn create(value: impl Into<Output>) -> Result<NodeRef> {
        crate::Node::new(Self, [value.into()])
    }
}

impl OpDef for ResultOp {
    const TYPE_INFO: TypeInfo = TypeInfo::new("Result", OPSET);

    fn from_attributes(_attributes: &AttributeMap) -> Result<Self> {
        Ok(Self)
    }
}

impl Operation for ResultOp {
    op_common!();

    fn infer(&self, inputs: &[InferInput]) -> Result<InferredOutputs> {
        expect_inputs(Self::TYPE_INFO.name, inputs, 1)?;
        Ok(single(inputs[0].desc.clone()))
    }

    fn evaluate(&self, inputs: &[Tensor], _outputs: &[OutputDesc]) -> Result<EvaluatedOutputs> {
        let [value] = args::<1>(Self::TYPE_INFO.name, inputs)?;
        Ok(smallvec![value.clone()])
    }
}
