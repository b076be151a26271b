use std::sync::Arc;

use lowp_dtype::DTypeSet;
use lowp_ir::ops::{Convert, MaxPool, Multiply};
use lowp_ir::rt_info::{RtValue, keys};
use lowp_ir::{DType, Node};
use test_case::test_case;

use crate::config::LowPrecisionParams;
use crate::layer_transformation::LayerTransformation;
use crate::test::{
    apply, apply_with, assert_all_close, constant, dequantize, evaluate, function, functions, max_pool, out, param,
    result_input, scalar, tensor,
};
use crate::transformations::{MaxPoolTransformation, MvnTransformation};

#[test]
fn test_positive_scale_moves_below_pool() {
    let data = param(DType::Float32, &[1, 1, 2, 2]);
    let scale = scalar(DType::Float32, 2.0);
    let multiply = Node::new(Multiply, [out(&data), out(&scale)]).unwrap();
    let pool = max_pool(&multiply);
    let f = function(&pool, &[data.clone()]);
    let inputs = [tensor(DType::Float32, &[1, 1, 2, 2], &[1.0, -3.0, 2.5, 0.5])];
    let expected = evaluate(&f, &inputs);

    assert!(apply(&MaxPoolTransformation::default(), &f));

    let last = result_input(&f);
    assert!(last.is::<Multiply>());
    assert_eq!(last.input_node(1).unwrap().constant_value().unwrap().scalar_value(), Some(2.0));
    let moved_pool = last.input_node(0).unwrap();
    assert!(moved_pool.is::<MaxPool>());
    assert!(Arc::ptr_eq(&moved_pool.input_node(0).unwrap(), &data));
    assert_eq!(f.count_ops_of::<Multiply>(), 1);
    assert_all_close(&evaluate(&f, &inputs), &expected);
}

#[test]
fn test_pool_runs_on_low_precision_data() {
    let data = param(DType::UInt8, &[1, 2, 2, 2]);
    let multiply = dequantize(&data, Some(&scalar(DType::Float32, 128.0)), &scalar(DType::Float32, 0.1));
    let pool = max_pool(&multiply);
    pool.set_friendly_name("pool");
    let f = function(&pool, &[data.clone()]);
    let inputs = [tensor(DType::UInt8, &[1, 2, 2, 2], &[0.0, 255.0, 128.0, 7.0, 9.0, 1.0, 200.0, 100.0])];
    let expected = evaluate(&f, &inputs);

    assert!(apply(&MaxPoolTransformation::default(), &f));

    let moved_pool = f.find_by_name("pool_original").unwrap();
    assert_eq!(moved_pool.output_dtype(0).unwrap(), DType::UInt8);
    assert!(Arc::ptr_eq(&moved_pool.input_node(0).unwrap(), &data));
    assert_eq!(moved_pool.rt_value(keys::PRECISION_PRESERVED), Some(RtValue::Bool(true)));
    assert!(moved_pool.consumers(0).unwrap()[0].node().is::<Convert>());
    assert_eq!(result_input(&f).friendly_name(), "pool");
    assert_all_close(&evaluate(&f, &inputs), &expected);
}

#[test_case(&[], &[-1.0] ; "negative scalar")]
#[test_case(&[1, 2, 1, 1], &[0.5, -0.5] ; "one negative channel")]
fn test_negative_scale_is_rejected(dims: &[usize], scales: &[f64]) {
    let data = param(DType::UInt8, &[1, 2, 2, 2]);
    let multiply = dequantize(&data, None, &constant(DType::Float32, dims, scales));
    let pool = max_pool(&multiply);
    let f = function(&pool, &[data]);
    let ops = f.ordered_ops().len();

    assert!(!apply(&MaxPoolTransformation::default(), &f));
    assert!(Arc::ptr_eq(&result_input(&f), &pool));
    assert!(Arc::ptr_eq(&pool.input_node(0).unwrap(), &multiply));
    assert_eq!(f.ordered_ops().len(), ops);
}

#[test]
fn test_zero_point_rejected_without_asymmetric_support() {
    let data = param(DType::UInt8, &[1, 1, 2, 2]);
    let multiply = dequantize(&data, Some(&scalar(DType::Float32, 3.0)), &scalar(DType::Float32, 0.5));
    let pool = max_pool(&multiply);
    let f = function(&pool, &[data]);

    let params = LowPrecisionParams::builder().support_asymmetric_quantization(false).build();
    assert!(!apply_with(&MaxPoolTransformation::new(params), &params, &f));
    assert!(Arc::ptr_eq(&result_input(&f), &pool));
}

#[test]
fn test_precision_outside_admitted_set_is_rejected() {
    let data = param(DType::UInt8, &[1, 1, 2, 2]);
    let multiply = dequantize(&data, None, &scalar(DType::Float32, 0.5));
    let pool = max_pool(&multiply);
    let f = function(&pool, &[data]);

    let params = LowPrecisionParams::builder().precisions_on_activations(DTypeSet::only(DType::Int8)).build();
    assert!(!apply_with(&MaxPoolTransformation::new(params), &params, &f));
    assert!(Arc::ptr_eq(&result_input(&f), &pool));
}

#[test]
fn test_shared_chain_feeds_both_pools() {
    let data = param(DType::UInt8, &[1, 1, 2, 2]);
    let multiply = dequantize(&data, None, &scalar(DType::Float32, 0.25));
    let first = max_pool(&multiply);
    let second = max_pool(&multiply);
    let f = functions(&[&first, &second], &[data]);
    let inputs = [tensor(DType::UInt8, &[1, 1, 2, 2], &[4.0, 8.0, 12.0, 16.0])];
    let expected = evaluate(&f, &inputs);

    assert!(apply(&MaxPoolTransformation::default(), &f));
    assert_eq!(f.count_ops_of::<Multiply>(), 2);
    for result in f.results() {
        assert!(result.input_node(0).unwrap().is::<Multiply>());
    }
    assert_all_close(&evaluate(&f, &inputs), &expected);
}

#[test]
fn test_precision_preserved_query_is_pure() {
    let data = param(DType::Float32, &[1, 1, 2, 2]);
    let multiply = Node::new(Multiply, [out(&data), out(&scalar(DType::Float32, 2.0))]).unwrap();
    let pool = max_pool(&multiply);
    let f = function(&pool, &[data]);
    let ops = f.ordered_ops().len();

    let transformation = MaxPoolTransformation::default();
    assert!(transformation.is_precision_preserved(&pool));
    assert!(transformation.is_precision_preserved(&pool));
    assert!(!MvnTransformation::default().is_precision_preserved(&pool));
    assert_eq!(f.ordered_ops().len(), ops);
    assert!(pool.rt_value(keys::PRECISION_PRESERVED).is_none());
}

#[test]
fn test_kinds_and_matcher_names() {
    let transformation = MaxPoolTransformation::default();
    assert_eq!(transformation.kinds(), vec![<MaxPool as lowp_ir::OpDef>::TYPE_INFO]);
    assert_eq!(transformation.name(), "MaxPoolTransformation");
}
