//! Strategies for quantized data and dequantization constants.

use proptest::prelude::*;

use lowp_ir::{DType, Tensor};

/// `u8` tensor of the given dims.
pub fn arb_u8_tensor(dims: Vec<usize>) -> impl Strategy<Value = Tensor> {
    let len = dims.iter().product::<usize>();
    prop::collection::vec(0u8..=255, len).prop_map(move |values| {
        Tensor::new(DType::UInt8, &dims, values.into_iter().map(f64::from).collect()).expect("sized by dims")
    })
}

/// Zero point on the `u8` grid.
pub fn arb_zero_point() -> impl Strategy<Value = f64> {
    (0u8..=255).prop_map(f64::from)
}

/// Strictly positive scale.
pub fn arb_scale() -> impl Strategy<Value = f64> {
    0.01f64..4.0
}

/// Non-zero scale of either sign.
pub fn arb_signed_scale() -> impl Strategy<Value = f64> {
    prop_oneof![0.01f64..4.0, -4.0f64..-0.01]
}

/// Per-channel scales for `channels` channels.
pub fn arb_channel_scales(channels: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(arb_signed_scale(), channels)
}

/// Ordered clamp bounds.
pub fn arb_bounds() -> impl Strategy<Value = (f64, f64)> {
    (-20.0f64..20.0, 0.0f64..40.0).prop_map(|(low, width)| (low, low + width))
}
