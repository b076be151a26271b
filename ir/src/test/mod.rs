pub mod property;

use crate::node::NodeRef;
use crate::ops::{Constant, Parameter, ResultOp};
use crate::shape::static_shape;
use crate::tensor::Tensor;
use crate::{DType, Function};

pub fn param(dtype: DType, dims: &[usize]) -> NodeRef {
    Parameter::create(dtype, static_shape(dims)).unwrap()
}

pub fn constant(dtype: DType, dims: &[usize], values: &[f64]) -> NodeRef {
    Constant::create(Tensor::new(dtype, dims, values.to_vec()).unwrap()).unwrap()
}

pub fn scalar(dtype: DType, value: f64) -> NodeRef {
    Constant::create(Tensor::scalar(dtype, value)).unwrap()
}

pub fn ints(values: &[i64]) -> NodeRef {
    let data = values.iter().map(|&v| v as f64).collect();
    Constant::create(Tensor::new(DType::Int64, &[values.len()], data).unwrap()).unwrap()
}

/// Single-result function over `parameters`.
pub fn function(output: &NodeRef, parameters: &[NodeRef]) -> Function {
    let result = ResultOp::create(output).unwrap();
    Function::new("test", vec![result], parameters.to_vec()).unwrap()
}

/// Evaluate `output` with one value per parameter.
pub fn run(output: &NodeRef, parameters: &[NodeRef], inputs: Vec<Tensor>) -> Tensor {
    function(output, parameters).evaluate(&inputs).unwrap().remove(0)
}
