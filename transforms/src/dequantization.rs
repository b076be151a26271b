//! Recognition of dequantization chains.
//!
//! A dequantization chain undoes a quantized encoding right before the
//! value is consumed:
//!
//! ```text
//! data ─► [Convert] ─► [Subtract(zero point)] ─► [Multiply(scale)] ─► op
//! ```
//!
//! Every link is optional, but present links appear in this order. The zero
//! point may reach the subtraction through its own `Convert`.

use std::sync::Arc;

use lowp_dtype::DType;
use lowp_ir::ops::{Constant, Convert, Multiply, Subtract};
use lowp_ir::{NodeRef, Output, Tensor};
use tracing::trace;

use crate::error::Result;

/// The dequantization chain feeding one operation input.
#[derive(Debug, Clone)]
pub struct FakeQuantizeDequantization {
    /// Value entering the chain.
    pub data: Output,
    pub convert: Option<NodeRef>,
    pub subtract: Option<NodeRef>,
    /// `Convert` between the zero-point constant and the subtraction.
    pub subtract_convert: Option<NodeRef>,
    pub subtract_constant: Option<NodeRef>,
    pub multiply: Option<NodeRef>,
    pub multiply_constant: Option<NodeRef>,
}

impl FakeQuantizeDequantization {
    /// Chain without links; the operation consumes `data` directly.
    pub fn empty(data: Output) -> Self {
        Self {
            data,
            convert: None,
            subtract: None,
            subtract_convert: None,
            subtract_constant: None,
            multiply: None,
            multiply_constant: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.convert.is_none() && self.subtract.is_none() && self.multiply.is_none()
    }

    /// Last link of the chain.
    pub fn last(&self) -> Option<&NodeRef> {
        self.multiply.as_ref().or(self.subtract.as_ref()).or(self.convert.as_ref())
    }

    /// The value the operation consumes.
    pub fn output(&self) -> Output {
        match self.last() {
            Some(node) => Output::new(node.clone(), 0),
            None => self.data.clone(),
        }
    }

    pub fn data_precision(&self) -> DType {
        self.data.dtype()
    }

    /// Element type of the dequantized value.
    pub fn precision(&self) -> DType {
        self.output().dtype()
    }

    pub fn is_low_precision(&self) -> bool {
        self.data_precision().is_quantized()
    }

    /// Some link also feeds something besides the next link.
    pub fn is_shared(&self) -> bool {
        self.links().any(|node| node.consumer_count() > 1)
    }

    /// The constants broadcast the data to a larger shape, so the chain
    /// cannot be re-applied to the data alone.
    pub fn broadcasts_data(&self) -> bool {
        self.output().shape() != self.data.shape()
    }

    pub fn links(&self) -> impl Iterator<Item = &NodeRef> {
        [&self.convert, &self.subtract, &self.multiply].into_iter().flatten()
    }

    pub fn multiply_values(&self) -> Option<Arc<Tensor>> {
        self.multiply_constant.as_ref()?.constant_value()
    }

    /// Zero point in the precision the subtraction runs in.
    pub fn subtract_values(&self) -> Option<Tensor> {
        let value = self.subtract_constant.as_ref()?.constant_value()?;
        let convert = self.subtract_convert.as_ref().and_then(|node| node.op_as::<Convert>().map(Convert::destination));
        Some(match convert {
            Some(dtype) => value.cast(dtype),
            None => value.as_ref().clone(),
        })
    }

    /// Same links with replacement constants. A replaced zero point is used
    /// as is, without the zero-point `Convert`.
    pub fn with_constants(&self, subtract_constant: Option<NodeRef>, multiply_constant: Option<NodeRef>) -> Self {
        let mut chain = self.clone();
        if subtract_constant.is_some() {
            chain.subtract_convert = None;
            chain.subtract_constant = subtract_constant;
        }
        if multiply_constant.is_some() {
            chain.multiply_constant = multiply_constant;
        }
        chain
    }
}

/// Dequantization chain feeding input `input_index` of `node`.
///
/// The query does not touch the graph. A link whose operand is not a
/// compile-time constant ends the recognized chain. The scale may sit on
/// either side of the multiplication; the zero point must be the right-hand
/// operand of the subtraction.
pub fn get_dequantization(node: &NodeRef, input_index: usize) -> Result<FakeQuantizeDequantization> {
    let mut current = node.input_value(input_index)?;

    let (mut multiply, mut multiply_constant) = (None, None);
    if current.node().is::<Multiply>()
        && let Some((data, constant)) = split_constant(current.node())?
    {
        multiply = Some(current.node().clone());
        multiply_constant = Some(constant);
        current = data;
    }

    let (mut subtract, mut subtract_convert, mut subtract_constant) = (None, None, None);
    if current.node().is::<Subtract>() {
        let candidate = current.node().clone();
        let operand = candidate.input_node(1)?;
        if operand.is::<Constant>() {
            subtract_constant = Some(operand);
        } else if operand.is::<Convert>() && operand.input_node(0)?.is::<Constant>() {
            subtract_constant = Some(operand.input_node(0)?);
            subtract_convert = Some(operand);
        }
        if subtract_constant.is_some() {
            current = candidate.input_value(0)?;
            subtract = Some(candidate);
        }
    }

    let mut convert = None;
    if let Some(destination) = current.node().op_as::<Convert>().map(Convert::destination) {
        let source = current.node().input_dtype(0)?;
        if source.is_quantized() || destination.is_real() {
            let candidate = current.node().clone();
            current = candidate.input_value(0)?;
            convert = Some(candidate);
        }
    }

    let chain = FakeQuantizeDequantization {
        data: current,
        convert,
        subtract,
        subtract_convert,
        subtract_constant,
        multiply,
        multiply_constant,
    };
    trace!(node = %node.friendly_name(), input = input_index, empty = chain.is_empty(), "dequantization");
    Ok(chain)
}

/// Non-constant operand and constant of a binary node.
fn split_constant(node: &NodeRef) -> Result<Option<(Output, NodeRef)>> {
    let (lhs, rhs) = (node.input_value(0)?, node.input_value(1)?);
    Ok(if rhs.node().is::<Constant>() {
        Some((lhs, rhs.node().clone()))
    } else if lhs.node().is::<Constant>() {
        Some((rhs, lhs.node().clone()))
    } else {
        None
    })
}
