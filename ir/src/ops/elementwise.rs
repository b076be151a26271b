use lowp_dtype::DType;
use smallvec::smallvec;
use snafu::{OptionExt, ensure};

use super::{OPSET, args, expect_inputs, op_common, single};
use crate::error::{DTypeMismatchSnafu, InvalidAttributeSnafu, Result};
use crate::node::OutputDesc;
use crate::op::{AttributeMap, EvaluatedOutputs, InferInput, InferredOutputs, OpDef, Operation, TypeInfo};
use crate::shape::broadcast_shapes;
use crate::tensor::Tensor;

/// Element type conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Convert {
    destination: DType,
}

impl Convert {
    pub fn new(destination: DType) -> Self {
        Self { destination }
    }

    pub fn destination(&self) -> DType {
        self.destination
    }
}

impl OpDef for Convert {
    const TYPE_INFO: TypeInfo = TypeInfo::new("Convert", OPSET);

    fn from_attributes(attributes: &AttributeMap) -> Result<Self> {
        Ok(Self { destination: attributes.dtype(Self::TYPE_INFO.name, "destination_type")? })
    }
}

impl Operation for Convert {
    op_common!();

    fn infer(&self, inputs: &[InferInput]) -> Result<InferredOutputs> {
        expect_inputs(Self::TYPE_INFO.name, inputs, 1)?;
        Ok(single(OutputDesc::new(self.destination, inputs[0].desc.shape.clone())))
    }

    fn evaluate(&self, inputs: &[Tensor], _outputs: &[OutputDesc]) -> Result<EvaluatedOutputs> {
        let [value] = args::<1>(Self::TYPE_INFO.name, inputs)?;
        Ok(smallvec![value.cast(self.destination)])
    }

    fn visit_attributes(&self) -> AttributeMap {
        AttributeMap::new().with("destination_type", self.destination)
    }
}

/// Numpy-broadcast binary inference shared by the arithmetic kinds.
fn infer_binary(op: &'static str, inputs: &[InferInput]) -> Result<InferredOutputs> {
    expect_inputs(op, inputs, 2)?;
    let (lhs, rhs) = (&inputs[0].desc, &inputs[1].desc);
    let dtype = lhs.dtype.merge(rhs.dtype).context(DTypeMismatchSnafu { op, lhs: lhs.dtype, rhs: rhs.dtype })?;
    Ok(single(OutputDesc::new(dtype, broadcast_shapes(&lhs.shape, &rhs.shape)?)))
}

macro_rules! binary_op {
    ($(#[$meta:meta])* $name:ident, |$a:ident, $b:ident| $body:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq)]
        pub struct $name;

        impl OpDef for $name {
            const TYPE_INFO: TypeInfo = TypeInfo::new(stringify!($name), OPSET);

            fn from_attributes(_attributes: &AttributeMap) -> Result<Self> {
                Ok(Self)
            }
        }

        impl Operation for $name {
            op_common!();

            fn infer(&self, inputs: &[InferInput]) -> Result<InferredOutputs> {
                infer_binary(Self::TYPE_INFO.name, inputs)
            }

            fn evaluate(&self, inputs: &[Tensor], outputs: &[OutputDesc]) -> Result<EvaluatedOutputs> {
                let [lhs, rhs] = args::<2>(Self::TYPE_INFO.name, inputs)?;
                let dtype = outputs.first().map_or(lhs.dtype(), |desc| desc.dtype);
                Ok(smallvec![lhs.zip_broadcast(rhs, dtype, |$a, $b| $body)?])
            }
        }
    };
}

binary_op!(Add, |a, b| a + b);
binary_op!(
    /// `lhs - rhs`; in a dequantization chain the right operand is the zero point.
    Subtract,
    |a, b| a - b
);
binary_op!(
    /// `lhs * rhs`; in a dequantization chain the right operand is the scale.
    Multiply,
    |a, b| a * b
);

/// Saturate values into `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clamp {
    min: f64,
    max: f64,
}

impl Clamp {
    pub fn new(min: f64, max: f64) -> Result<Self> {
        ensure!(
            min <= max,
            InvalidAttributeSnafu { op: Self::TYPE_INFO.name, name: "min", reason: format!("{min} exceeds max {max}") }
        );
        Ok(Self { min, max })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

impl OpDef for Clamp {
    const TYPE_INFO: TypeInfo = TypeInfo::new("Clamp", OPSET);

    fn from_attributes(attributes: &AttributeMap) -> Result<Self> {
        let op = Self::TYPE_INFO.name;
        Self::new(attributes.float(op, "min")?, attributes.float(op, "max")?)
    }
}

impl Operation for Clamp {
    op_common!();

    fn infer(&self, inputs: &[InferInput]) -> Result<InferredOutputs> {
        expect_inputs(Self::TYPE_INFO.name, inputs, 1)?;
        Ok(single(inputs[0].desc.clone()))
    }

    fn evaluate(&self, inputs: &[Tensor], outputs: &[OutputDesc]) -> Result<EvaluatedOutputs> {
        let [value] = args::<1>(Self::TYPE_INFO.name, inputs)?;
        let dtype = outputs.first().map_or(value.dtype(), |desc| desc.dtype);
        // Integer outputs round the bounds inwards.
        let (lo, hi) = if dtype.is_int() { (self.min.ceil(), self.max.floor()) } else { (self.min, self.max) };
        let values = value.values().iter().map(|v| v.max(lo).min(hi)).collect();
        Ok(smallvec![Tensor::new(dtype, value.shape(), values)?])
    }

    fn visit_attributes(&self) -> AttributeMap {
        AttributeMap::new().with("min", self.min).with("max", self.max)
    }
}
