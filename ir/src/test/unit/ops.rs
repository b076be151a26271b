use test_case::test_case;

use crate::error::Error;
use crate::node::Node;
use crate::ops::*;
use crate::shape::static_shape;
use crate::tensor::Tensor;
use crate::test::{constant, ints, param, run};
use crate::DType;

fn f32s(dims: &[usize], values: &[f64]) -> Tensor {
    Tensor::new(DType::Float32, dims, values.to_vec()).unwrap()
}

// =========================================================================
// Elementwise
// =========================================================================

#[test]
fn test_convert_saturates_and_rounds_half_even() {
    let data = param(DType::Float32, &[4]);
    let convert = Node::new(Convert::new(DType::UInt8), [data.output(0).unwrap()]).unwrap();
    let out = run(&convert, &[data], vec![f32s(&[4], &[300.0, -5.0, 2.5, 3.5])]);
    assert_eq!(out.dtype(), DType::UInt8);
    assert_eq!(out.values(), &[255.0, 0.0, 2.0, 4.0]);
}

#[test]
fn test_binary_broadcast() {
    let data = param(DType::Float32, &[2, 3]);
    let bias = constant(DType::Float32, &[1, 3], &[10.0, 20.0, 30.0]);
    let add = Node::new(Add, [data.output(0).unwrap(), bias.output(0).unwrap()]).unwrap();
    assert_eq!(add.output_shape(0).unwrap(), static_shape(&[2, 3]));

    let out = run(&add, &[data], vec![f32s(&[2, 3], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0])]);
    assert_eq!(out.values(), &[10.0, 21.0, 32.0, 13.0, 24.0, 35.0]);
}

#[test]
fn test_binary_broadcast_mismatch() {
    let a = param(DType::Float32, &[2, 3]);
    let b = param(DType::Float32, &[2]);
    let result = Node::new(Subtract, [a.output(0).unwrap(), b.output(0).unwrap()]);
    assert!(matches!(result, Err(Error::BroadcastShapeMismatch { .. })));
}

#[test_case(DType::Int32, &[0.0, 1.0, 2.0, 3.0], &[1.0, 1.0, 2.0, 2.0] ; "integer bounds round inwards")]
#[test_case(DType::Float32, &[0.0, 1.0, 3.0, -1.0], &[0.5, 1.0, 2.5, 0.5] ; "float bounds are exact")]
fn test_clamp(dtype: DType, input: &[f64], expected: &[f64]) {
    let data = param(dtype, &[4]);
    let clamp = Node::new(Clamp::new(0.5, 2.5).unwrap(), [data.output(0).unwrap()]).unwrap();
    let out = run(&clamp, &[data], vec![Tensor::new(dtype, &[4], input.to_vec()).unwrap()]);
    assert_eq!(out.values(), expected);
}

#[test]
fn test_clamp_rejects_inverted_bounds() {
    assert!(matches!(Clamp::new(2.0, 1.0), Err(Error::InvalidAttribute { name: "min", .. })));
}

// =========================================================================
// Pooling
// =========================================================================

#[test_case(4, 2, 2, 0, 0, RoundingType::Floor, 2)]
#[test_case(5, 2, 2, 0, 0, RoundingType::Floor, 2)]
#[test_case(5, 2, 2, 0, 0, RoundingType::Ceil, 3)]
#[test_case(4, 3, 1, 1, 1, RoundingType::Floor, 4)]
#[test_case(6, 3, 2, 0, 1, RoundingType::Ceil, 3)]
#[test_case(2, 1, 2, 0, 1, RoundingType::Ceil, 1 ; "last window starting in end padding is dropped")]
fn test_pool_output_extent(size: usize, kernel: usize, stride: usize, pb: usize, pe: usize, rounding: RoundingType, out: usize) {
    let data = param(DType::Float32, &[1, 2, size]);
    let pool = MaxPool::new(vec![kernel], vec![stride], vec![pb], vec![pe], rounding).unwrap();
    let node = Node::new(pool, [data.output(0).unwrap()]).unwrap();
    assert_eq!(node.output_shape(0).unwrap(), static_shape(&[1, 2, out]));
}

#[test]
fn test_max_pool_evaluate() {
    let data = param(DType::Float32, &[1, 1, 4, 4]);
    let pool = MaxPool::new(vec![2, 2], vec![2, 2], vec![0, 0], vec![0, 0], RoundingType::Floor).unwrap();
    let node = Node::new(pool, [data.output(0).unwrap()]).unwrap();
    let values: Vec<f64> = (0..16).map(f64::from).collect();
    let out = run(&node, &[data], vec![f32s(&[1, 1, 4, 4], &values)]);
    assert_eq!(out.shape(), &[1, 1, 2, 2]);
    assert_eq!(out.values(), &[5.0, 7.0, 13.0, 15.0]);
}

#[test]
fn test_max_pool_rank_mismatch() {
    let data = param(DType::Float32, &[4, 4]);
    let pool = MaxPool::new(vec![2, 2], vec![2, 2], vec![0, 0], vec![0, 0], RoundingType::Floor).unwrap();
    let result = Node::new(pool, [data.output(0).unwrap()]);
    assert!(matches!(result, Err(Error::RankMismatch { actual: 2, .. })));
}

#[test]
fn test_pool_attribute_lengths_must_agree() {
    let result = MaxPool::new(vec![2, 2], vec![2], vec![0, 0], vec![0, 0], RoundingType::Floor);
    assert!(matches!(result, Err(Error::InvalidAttribute { name: "strides", .. })));
}

#[test_case(true, &[1.5, 3.0] ; "padding excluded")]
#[test_case(false, &[1.5, 1.5] ; "padding counted")]
fn test_avg_pool_exclude_pad(exclude_pad: bool, expected: &[f64]) {
    let data = param(DType::Float32, &[1, 1, 3]);
    let pool = AvgPool::new(vec![2], vec![2], vec![0], vec![1], RoundingType::Floor, exclude_pad).unwrap();
    let node = Node::new(pool, [data.output(0).unwrap()]).unwrap();
    let out = run(&node, &[data], vec![f32s(&[1, 1, 3], &[1.0, 2.0, 3.0])]);
    assert_eq!(out.values(), expected);
}

// =========================================================================
// Normalization
// =========================================================================

#[test_case(false, &[-1.0, 1.0, -2.0, 2.0] ; "centering only")]
#[test_case(true, &[-1.0, 1.0, -1.0, 1.0] ; "variance normalized")]
fn test_mvn_over_last_axis(normalize_variance: bool, expected: &[f64]) {
    let data = param(DType::Float32, &[1, 2, 2]);
    let mvn = Mvn::new(vec![2], normalize_variance, 0.0, MvnEpsMode::InsideSqrt).unwrap();
    let node = Node::new(mvn, [data.output(0).unwrap()]).unwrap();
    let out = run(&node, &[data], vec![f32s(&[1, 2, 2], &[1.0, 3.0, 2.0, 6.0])]);
    assert_eq!(out.values(), expected);
}

#[test]
fn test_mvn_eps_outside_sqrt() {
    let data = param(DType::Float32, &[1, 2]);
    let mvn = Mvn::new(vec![1], true, 1.0, MvnEpsMode::OutsideSqrt).unwrap();
    let node = Node::new(mvn, [data.output(0).unwrap()]).unwrap();
    // mean 2, std 1: (x - 2) / (1 + 1)
    let out = run(&node, &[data], vec![f32s(&[1, 2], &[1.0, 3.0])]);
    assert_eq!(out.values(), &[-0.5, 0.5]);
}

#[test]
fn test_mvn_rejects_integer_input() {
    let data = param(DType::UInt8, &[1, 2]);
    let mvn = Mvn::new(vec![1], true, 1e-9, MvnEpsMode::InsideSqrt).unwrap();
    let result = Node::new(mvn, [data.output(0).unwrap()]);
    assert!(matches!(result, Err(Error::UnexpectedDType { dtype: DType::UInt8, .. })));
}

#[test]
fn test_mvn_axis_out_of_range() {
    let data = param(DType::Float32, &[1, 2]);
    let mvn = Mvn::new(vec![2], false, 0.0, MvnEpsMode::InsideSqrt).unwrap();
    let result = Node::new(mvn, [data.output(0).unwrap()]);
    assert!(matches!(result, Err(Error::AxisOutOfRange { axis: 2, rank: 2, .. })));
}

// =========================================================================
// Movement
// =========================================================================

#[test_case(&[0, -1], true, Some(&[2, 12]) ; "special zero copies dims")]
#[test_case(&[-1, 4], false, Some(&[6, 4]) ; "minus one is inferred")]
#[test_case(&[4, 6], false, Some(&[4, 6]) ; "plain target")]
#[test_case(&[5, -1], false, None ; "indivisible size")]
#[test_case(&[-1, -1], false, None ; "two inferred dims")]
#[test_case(&[0, 24], false, None ; "zero without special zero")]
fn test_reshape_resolve(pattern: &[i64], special_zero: bool, expected: Option<&[usize]>) {
    let input = static_shape(&[2, 3, 4]);
    let result = Reshape::new(special_zero).resolve(&input, pattern);
    match expected {
        Some(dims) => assert_eq!(result.unwrap(), static_shape(dims)),
        None => assert!(result.is_err()),
    }
}

#[test]
fn test_reshape_requires_constant_target() {
    let data = param(DType::Float32, &[2, 3]);
    let target = param(DType::Int64, &[2]);
    let result = Node::new(Reshape::new(false), [data.output(0).unwrap(), target.output(0).unwrap()]);
    assert!(matches!(result, Err(Error::NonConstantInput { index: 1, .. })));
}

#[test]
fn test_transpose_evaluate() {
    let data = param(DType::Float32, &[2, 3]);
    let node = Node::new(Transpose, [data.output(0).unwrap(), ints(&[1, 0]).output(0).unwrap()]).unwrap();
    assert_eq!(node.output_shape(0).unwrap(), static_shape(&[3, 2]));
    let out = run(&node, &[data], vec![f32s(&[2, 3], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0])]);
    assert_eq!(out.values(), &[0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
}

#[test_case(&[], 3, Some(vec![2, 1, 0]) ; "empty order reverses")]
#[test_case(&[0, 2, 1], 3, Some(vec![0, 2, 1]) ; "explicit order")]
#[test_case(&[0, 0, 1], 3, None ; "repeated axis")]
#[test_case(&[0, 1], 3, None ; "short order")]
#[test_case(&[0, 1, 3], 3, None ; "axis out of range")]
fn test_transpose_permutation(order: &[i64], rank: usize, expected: Option<Vec<usize>>) {
    let result = Transpose::permutation(order, rank);
    match expected {
        Some(p) => assert_eq!(result.unwrap(), p),
        None => assert!(matches!(result, Err(Error::InvalidPermutation { .. }))),
    }
}

#[test_case(&[2, -1], 5, Some(vec![2, 3]))]
#[test_case(&[5, 0], 5, Some(vec![5, 0]))]
#[test_case(&[-1], 4, Some(vec![4]))]
#[test_case(&[1, 1], 3, None ; "lengths do not cover the axis")]
#[test_case(&[-1, -1], 4, None ; "two inferred lengths")]
#[test_case(&[6, -1], 5, None ; "lengths exceed the axis")]
fn test_variadic_split_lengths(lengths: &[i64], dim: usize, expected: Option<Vec<usize>>) {
    let result = VariadicSplit::resolve_lengths(lengths, dim);
    match expected {
        Some(l) => assert_eq!(result.unwrap(), l),
        None => assert!(matches!(result, Err(Error::SplitLengthMismatch { .. }))),
    }
}

#[test]
fn test_variadic_split_evaluate() {
    let data = constant(DType::Float32, &[2, 3], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    let split = Node::new(
        VariadicSplit,
        [data.output(0).unwrap(), ints(&[-1]).output(0).unwrap(), ints(&[1, 2]).output(0).unwrap()],
    )
    .unwrap();
    assert_eq!(split.output_count(), 2);
    assert_eq!(split.output_shape(1).unwrap(), static_shape(&[2, 2]));

    let inputs: Vec<Tensor> = split
        .inputs()
        .iter()
        .map(|input| input.node().constant_value().unwrap().as_ref().clone())
        .collect();
    let outputs = split.evaluate(&inputs).unwrap();
    assert_eq!(outputs[0].values(), &[0.0, 3.0]);
    assert_eq!(outputs[1].values(), &[1.0, 2.0, 4.0, 5.0]);
}

// =========================================================================
// FakeQuantize
// =========================================================================

#[test_case(256, 3.4, 0.0, 255.0, 0.0, 255.0, 3.0 ; "identity grid rounds")]
#[test_case(3, 0.6, 0.0, 2.0, 0.0, 2.0, 1.0 ; "three levels")]
#[test_case(3, -1.0, 0.0, 2.0, -4.0, 4.0, -4.0 ; "below range saturates low")]
#[test_case(3, 5.0, 0.0, 2.0, -4.0, 4.0, 4.0 ; "above range saturates high")]
#[test_case(256, 127.5, 0.0, 255.0, -128.0, 127.0, 0.0 ; "rescaled output range")]
fn test_fake_quantize_value(levels: usize, x: f64, il: f64, ih: f64, ol: f64, oh: f64, expected: f64) {
    let fq = FakeQuantize::new(levels).unwrap();
    assert_eq!(fq.quantize(x, il, ih, ol, oh), expected);
}

#[test]
fn test_fake_quantize_per_channel_ranges() {
    let data = param(DType::Float32, &[1, 2, 2]);
    let il = constant(DType::Float32, &[1, 2, 1], &[0.0, 0.0]);
    let ih = constant(DType::Float32, &[1, 2, 1], &[1.0, 10.0]);
    let node = Node::new(
        FakeQuantize::new(11).unwrap(),
        [
            data.output(0).unwrap(),
            il.output(0).unwrap(),
            ih.output(0).unwrap(),
            il.output(0).unwrap(),
            ih.output(0).unwrap(),
        ],
    )
    .unwrap();
    let out = run(&node, &[data], vec![f32s(&[1, 2, 2], &[0.24, 0.26, 2.4, 2.6])]);
    let expected = [0.2f32, 0.3, 2.0, 3.0].map(f64::from);
    assert_eq!(out.values(), &expected);
}

#[test]
fn test_fake_quantize_needs_two_levels() {
    assert!(matches!(FakeQuantize::new(1), Err(Error::InvalidAttribute { name: "levels", .. })));
}
