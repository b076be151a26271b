//! Strategies for shapes, tensors and quantization ranges.

use proptest::prelude::*;

use crate::tensor::Tensor;
use crate::DType;

/// Static dims of rank 1..=`max_rank`, each in 1..=4.
pub fn arb_dims(max_rank: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..=4, 1..=max_rank)
}

/// Float32 tensor of the given dims with values in [-100, 100].
pub fn arb_tensor(dims: Vec<usize>) -> impl Strategy<Value = Tensor> {
    let len = dims.iter().product::<usize>();
    prop::collection::vec(-100.0f64..100.0, len)
        .prop_map(move |values| Tensor::new(DType::Float32, &dims, values).expect("sized by dims"))
}

pub fn arb_dims_and_tensor(max_rank: usize) -> impl Strategy<Value = (Vec<usize>, Tensor)> {
    arb_dims(max_rank).prop_flat_map(|dims| (Just(dims.clone()), arb_tensor(dims)))
}

/// Permutation of `0..rank`.
pub fn arb_permutation(rank: usize) -> impl Strategy<Value = Vec<usize>> {
    Just((0..rank).collect::<Vec<_>>()).prop_shuffle()
}

/// Ordered `(low, high)` range with a non-trivial width.
pub fn arb_range() -> impl Strategy<Value = (f64, f64)> {
    (-50.0f64..50.0, 0.5f64..100.0).prop_map(|(low, width)| (low, low + width))
}

/// Common quantization level counts.
pub fn arb_levels() -> impl Strategy<Value = usize> {
    prop_oneof![Just(2usize), Just(16), Just(255), Just(256), 3usize..64]
}
