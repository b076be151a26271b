
use lowp_ir::ops::{AvgPool, Constant, Convert, MaxPool, Multiply, Parameter, ResultOp, RoundingType, Subtract};
use lowp_ir::shape::static_shape;
use lowp_ir::{DType, Function, GraphRewrite, Node, NodeRef, OpRegistry, Output, Tensor};

use crate::config::LowPrecisionParams;
use crate::context::TransformationContext;
use crate::layer_transformation::LayerTransformation;

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

pub fn tensor(dtype: DType, dims: &[usize], values: &[f64]) -> Tensor {
    Tensor::new(dtype, dims, values.to_vec()).unwrap()
}

pub fn out(node: &NodeRef) -> Output {
    node.output(0).unwrap()
}

/// `Convert(f32) -> [Subtract(zero_point)] -> Multiply(scale)` over `data`.
pub fn dequantize(data: &NodeRef, zero_point: Option<&NodeRef>, scale: &NodeRef) -> NodeRef {
    let mut parent = out(&Node::new(Convert::new(DType::Float32), [out(data)]).unwrap());
    if let Some(zero_point) = zero_point {
        parent = out(&Node::new(Subtract, [parent, out(zero_point)]).unwrap());
    }
    Node::new(Multiply, [parent, out(scale)]).unwrap()
}

/// 2x2 max pool with stride 2.
pub fn max_pool(input: &NodeRef) -> NodeRef {
    let op = MaxPool::new(vec![2, 2], vec![2, 2], vec![0, 0], vec![0, 0], RoundingType::Floor).unwrap();
    Node::new(op, [out(input)]).unwrap()
}

/// 2x2 average pool with stride 2.
pub fn avg_pool(input: &NodeRef) -> NodeRef {
    let op = AvgPool::new(vec![2, 2], vec![2, 2], vec![0, 0], vec![0, 0], RoundingType::Floor, true).unwrap();
    Node::new(op, [out(input)]).unwrap()
}

/// Single-result function over `parameters`.
pub fn function(output: &NodeRef, parameters: &[NodeRef]) -> Function {
    functions(&[output], parameters)
}

pub fn functions(outputs: &[&NodeRef], parameters: &[NodeRef]) -> Function {
    let results = outputs.iter().map(|output| ResultOp::create(out(output)).unwrap()).collect();
    Function::new("test", results, parameters.to_vec()).unwrap()
}

/// Producer of the first result of `function`.
pub fn result_input(function: &Function) -> NodeRef {
    function.results()[0].input_node(0).unwrap()
}

pub fn evaluate(function: &Function, inputs: &[Tensor]) -> Vec<Tensor> {
    function.evaluate(inputs).unwrap()
}

/// Run one transformation until nothing matches.
pub fn apply(transformation: &dyn LayerTransformation, function: &Function) -> bool {
    apply_with(transformation, &LowPrecisionParams::default(), function)
}

pub fn apply_with(transformation: &dyn LayerTransformation, params: &LowPrecisionParams, function: &Function) -> bool {
    let registry = OpRegistry::opset1();
    let mut ctx = TransformationContext::new(function, params);
    let mut rewrite = GraphRewrite::new("test", &registry);
    transformation.register_matcher_in(&mut rewrite).unwrap();
    rewrite.run(function, &mut ctx).unwrap()
}

/// Element-wise equality within a relative tolerance of `1e-4`.
pub fn is_close(actual: &Tensor, expected: &Tensor) -> bool {
    actual.shape() == expected.shape()
        && actual.values().iter().zip(expected.values()).all(|(a, e)| (a - e).abs() <= 1e-4 * e.abs().max(1.0))
}

#[track_caller]
pub fn assert_close(actual: &Tensor, expected: &Tensor) {
    assert_eq!(actual.shape(), expected.shape(), "shape mismatch");
    for (i, (a, e)) in actual.values().iter().zip(expected.values()).enumerate() {
        let tolerance = 1e-4 * e.abs().max(1.0);
        assert!((a - e).abs() <= tolerance, "element {i}: {a} vs {e}");
    }
}

#[track_caller]
pub fn assert_all_close(actual: &[Tensor], expected: &[Tensor]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert_close(a, e);
    }
}
