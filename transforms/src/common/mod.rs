//! Whole-function optimizations that do not depend on a dequantization
//! chain.

pub mod convert_quantize_dequantize;
pub mod strided_slice;

pub use convert_quantize_dequantize::ConvertQuantizeDequantize;
pub use strided_slice::{
    GroupedStridedSliceOptimizer, SharedStridedSliceEraser, StridedSliceOptimization, UselessStridedSliceEraser,
};
