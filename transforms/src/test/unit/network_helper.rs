use std::sync::Arc;

use lowp_ir::ops::{Add, Constant, Convert, Multiply, ResultOp, Subtract};
use lowp_ir::rt_info::{RtValue, keys};
use lowp_ir::{DType, Node};
use test_case::test_case;

use crate::dequantization::{FakeQuantizeDequantization, get_dequantization};
use crate::error::Error;
use crate::network_helper::{
    check_constant_value_precision, fold_constant, fold_convert, is_per_tensor_or_per_channel, move_dequantization_after,
    separate_in_standalone_branch, to_scalar,
};
use crate::test::{
    assert_all_close, constant, dequantize, evaluate, functions, max_pool, out, param, scalar, tensor,
};

#[test_case(&[], 4, true ; "scalar")]
#[test_case(&[1, 3, 1, 1], 4, true ; "channel axis")]
#[test_case(&[3, 1, 1], 4, true ; "channel axis right aligned")]
#[test_case(&[1, 3], 2, true ; "rank two channels")]
#[test_case(&[1, 1, 1, 3], 4, false ; "spatial axis")]
#[test_case(&[3, 1, 1, 1], 4, false ; "batch axis")]
#[test_case(&[1, 3, 1, 1, 1], 4, false ; "rank exceeds data")]
fn test_per_tensor_or_per_channel(dims: &[usize], rank: usize, expected: bool) {
    let len = dims.iter().product::<usize>();
    let values = (0..len).map(|i| i as f64 + 1.0).collect::<Vec<_>>();
    let value = tensor(DType::Float32, dims, &values);
    assert_eq!(is_per_tensor_or_per_channel(&value, rank), expected);
}

#[test]
fn test_repeated_value_counts_as_per_tensor() {
    let value = tensor(DType::Float32, &[1, 1, 2, 2], &[0.5; 4]);
    assert!(is_per_tensor_or_per_channel(&value, 4));
}

#[test_case(DType::UInt8, 128.0, true ; "fits u8")]
#[test_case(DType::UInt8, 300.0, false ; "above u8")]
#[test_case(DType::UInt8, -1.0, false ; "negative for u8")]
#[test_case(DType::Int8, -128.0, true ; "i8 minimum")]
#[test_case(DType::UInt8, 1.5, false ; "fractional")]
fn test_check_constant_value_precision(dtype: DType, value: f64, expected: bool) {
    assert_eq!(check_constant_value_precision(dtype, &scalar(DType::Float32, value)), expected);
}

#[test]
fn test_fold_convert() {
    let source = constant(DType::UInt8, &[2], &[3.0, 250.0]);
    let convert = Node::new(Convert::new(DType::Float32), [out(&source)]).unwrap();
    convert.set_friendly_name("zero_point");
    convert.insert_rt_value(keys::DEQUANTIZATION, true);

    let folded = fold_convert(&convert).unwrap().unwrap();
    let value = folded.constant_value().unwrap();
    assert_eq!(value.dtype(), DType::Float32);
    assert_eq!(value.values(), &[3.0, 250.0]);
    assert_eq!(folded.friendly_name(), "zero_point");
    assert_eq!(folded.rt_value(keys::DEQUANTIZATION), Some(RtValue::Bool(true)));

    let data = param(DType::UInt8, &[2]);
    let live = Node::new(Convert::new(DType::Float32), [out(&data)]).unwrap();
    assert!(fold_convert(&live).unwrap().is_none());
}

#[test]
fn test_fold_constant() {
    let product = Node::new(Multiply, [out(&scalar(DType::Float32, 3.0)), out(&scalar(DType::Float32, 0.5))]).unwrap();
    let folded = fold_constant(&product).unwrap().unwrap();
    assert!(folded.is::<Constant>());
    assert_eq!(folded.constant_value().unwrap().scalar_value(), Some(1.5));

    let data = param(DType::Float32, &[1]);
    let live = Node::new(Add, [out(&data), out(&scalar(DType::Float32, 1.0))]).unwrap();
    assert!(fold_constant(&live).unwrap().is_none());
}

#[test]
fn test_to_scalar() {
    let splat = constant(DType::Float32, &[1, 3, 1, 1], &[2.0; 3]);
    let value = to_scalar(&splat).unwrap().constant_value().unwrap();
    assert_eq!(value.rank(), 0);
    assert_eq!(value.scalar_value(), Some(2.0));

    let varied = constant(DType::Float32, &[3], &[1.0, 2.0, 3.0]);
    assert!(matches!(to_scalar(&varied), Err(Error::NotScalarLike { .. })));
}

#[test]
fn test_separate_shared_branch() {
    let data = param(DType::UInt8, &[1, 1, 2, 2]);
    let multiply = dequantize(&data, None, &scalar(DType::Float32, 0.5));
    let first = max_pool(&multiply);
    let second = max_pool(&multiply);
    let _f = functions(&[&first, &second], &[data.clone()]);

    assert!(separate_in_standalone_branch(&first).unwrap());
    let private = first.input_node(0).unwrap();
    assert!(!Arc::ptr_eq(&private, &multiply));
    assert!(private.is::<Multiply>());
    assert!(Arc::ptr_eq(&second.input_node(0).unwrap(), &multiply));
    assert_eq!(multiply.consumer_count(), 1);

    // Data and constants stay shared.
    let chain = get_dequantization(&first, 0).unwrap();
    assert_eq!(chain.data, out(&data));
    assert!(Arc::ptr_eq(chain.multiply_constant.as_ref().unwrap(), &multiply.input_node(1).unwrap()));

    assert!(!separate_in_standalone_branch(&first).unwrap());
}

#[test]
fn test_move_repoints_every_consumer() {
    let data = param(DType::UInt8, &[1, 1, 2, 2]);
    let multiply = dequantize(&data, Some(&scalar(DType::Float32, 1.0)), &scalar(DType::Float32, 2.0));
    let pool = max_pool(&multiply);
    pool.set_friendly_name("pool");
    let shifted = Node::new(Add, [out(&pool), out(&scalar(DType::Float32, 10.0))]).unwrap();
    let f = functions(&[&pool, &shifted], &[data.clone()]);
    let inputs = [tensor(DType::UInt8, &[1, 1, 2, 2], &[1.0, 7.0, 3.0, 4.0])];
    let expected = evaluate(&f, &inputs);

    let chain = get_dequantization(&pool, 0).unwrap();
    let moved = move_dequantization_after(&pool, &chain, false, true).unwrap();

    assert!(moved.last.is::<Multiply>());
    assert_eq!(moved.last.friendly_name(), "pool");
    assert_eq!(moved.operation.friendly_name(), "pool_original");
    assert!(Arc::ptr_eq(&moved.operation.input_node(0).unwrap(), &data));
    assert_eq!(moved.last.rt_value(keys::DEQUANTIZATION), Some(RtValue::Bool(true)));
    assert_eq!(pool.consumer_count(), 0);

    for input in moved.last.output(0).unwrap().consumers() {
        assert!(input.node().is::<ResultOp>() || input.node().is::<Add>());
    }
    assert_eq!(moved.last.consumer_count(), 2);
    assert_all_close(&evaluate(&f, &inputs), &expected);
}

#[test]
fn test_move_keeps_zero_point_in_front() {
    let data = param(DType::UInt8, &[1, 1, 2, 2]);
    let multiply = dequantize(&data, Some(&scalar(DType::Float32, 1.0)), &scalar(DType::Float32, 2.0));
    let pool = max_pool(&multiply);
    let f = functions(&[&pool], &[data.clone()]);
    let inputs = [tensor(DType::UInt8, &[1, 1, 2, 2], &[1.0, 7.0, 3.0, 4.0])];
    let expected = evaluate(&f, &inputs);

    let chain = get_dequantization(&pool, 0).unwrap();
    let moved = move_dequantization_after(&pool, &chain, false, false).unwrap();
    assert!(moved.operation.input_node(0).unwrap().is::<Subtract>());
    assert!(Arc::ptr_eq(&moved.last.input_node(0).unwrap(), &moved.operation));
    assert_all_close(&evaluate(&f, &inputs), &expected);
}

#[test]
fn test_move_rejects_detached_chain() {
    let data = param(DType::Float32, &[1, 1, 2, 2]);
    let multiply = Node::new(Multiply, [out(&data), out(&scalar(DType::Float32, 2.0))]).unwrap();
    let pool = max_pool(&multiply);
    let other = max_pool(&data);
    let _f = functions(&[&pool, &other], &[data.clone()]);

    let empty = FakeQuantizeDequantization::empty(out(&data));
    assert!(matches!(
        move_dequantization_after(&pool, &empty, false, true),
        Err(Error::DetachedDequantization { .. })
    ));

    let chain = get_dequantization(&pool, 0).unwrap();
    assert!(matches!(
        move_dequantization_after(&other, &chain, false, true),
        Err(Error::DetachedDequantization { .. })
    ));
}
