use smallvec::smallvec;
use snafu::{OptionExt, ensure};

use super::{OPSET, args, expect_inputs, op_common, output_dims, single};
use crate::error::{InvalidAttributeSnafu, Result, UnexpectedDTypeSnafu};
use crate::node::OutputDesc;
use crate::op::{AttributeMap, EvaluatedOutputs, InferInput, InferredOutputs, OpDef, Operation, TypeInfo};
use crate::shape::broadcast_shapes;
use crate::tensor::Tensor;

/// Snap `data` onto `levels` evenly spaced values.
///
/// Inputs: `data, input_low, input_high, output_low, output_high`, all
/// numpy-broadcast against each other.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FakeQuantize {
    levels: usize,
}

impl FakeQuantize {
    pub fn new(levels: usize) -> Result<Self> {
        ensure!(
            levels >= 2,
            InvalidAttributeSnafu {
                op: Self::TYPE_INFO.name,
                name: "levels",
                reason: format!("{levels} levels cannot form a grid"),
            }
        );
        Ok(Self { levels })
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    /// Quantize a single value against its (broadcast) ranges.
    pub fn quantize(&self, x: f64, input_low: f64, input_high: f64, output_low: f64, output_high: f64) -> f64 {
        let steps = (self.levels - 1) as f64;
        if x <= input_low.min(input_high) {
            output_low
        } else if x > input_low.max(input_high) {
            output_high
        } else {
            let level = ((x - input_low) / (input_high - input_low) * steps).round_ties_even();
            level * (output_high - output_low) / steps + output_low
        }
    }
}

impl OpDef for FakeQuantize {
    const TYPE_INFO: TypeInfo = TypeInfo::new("FakeQuantize", OPSET);

    fn from_attributes(attributes: &AttributeMap) -> Result<Self> {
        let op = Self::TYPE_INFO.name;
        let levels = attributes.int(op, "levels")?;
        let levels = usize::try_from(levels)
            .ok()
            .context(InvalidAttributeSnafu { op, name: "levels", reason: format!("negative value {levels}") })?;
        Self::new(levels)
    }
}

impl Operation for FakeQuantize {
    op_common!();

    fn infer(&self, inputs: &[InferInput]) -> Result<InferredOutputs> {
        let op = Self::TYPE_INFO.name;
        expect_inputs(op, inputs, 5)?;
        let data = &inputs[0].desc;
        ensure!(
            data.dtype.is_real() || !data.dtype.is_static(),
            UnexpectedDTypeSnafu { op, dtype: data.dtype, expected: "a floating point type" }
        );
        let shape = inputs[1..]
            .iter()
            .try_fold(data.shape.clone(), |acc, input| broadcast_shapes(&acc, &input.desc.shape))?;
        Ok(single(OutputDesc::new(data.dtype, shape)))
    }

    fn evaluate(&self, inputs: &[Tensor], outputs: &[OutputDesc]) -> Result<EvaluatedOutputs> {
        let op = Self::TYPE_INFO.name;
        let [data, il, ih, ol, oh] = args::<5>(op, inputs)?;
        let shape = output_dims(op, outputs, 0)?;
        let [x, il, ih, ol, oh] = [data, il, ih, ol, oh].map(|t| t.broadcast_to(&shape));
        let (x, il, ih, ol, oh) = (x?, il?, ih?, ol?, oh?);
        let values = (0..x.len()).map(|i| self.quantize(x[i], il[i], ih[i], ol[i], oh[i])).collect();
        let dtype = outputs.first().map_or(data.dtype(), |desc| desc.dtype);
        Ok(smallvec![Tensor::new(dtype, &shape, values)?])
    }

    fn visit_attributes(&self) -> AttributeMap {
        AttributeMap::new().with("levels", self.levels as i64).with("auto_broadcast", "numpy".to_string())
    }
}
