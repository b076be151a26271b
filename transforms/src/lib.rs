//! Low-precision transformations for the lowp graph IR.
//!
//! Quantized graphs carry values in `u8`/`i8` and restore real values with a
//! dequantization chain (`Convert -> Subtract -> Multiply`) right before
//! they are consumed. The transformations here move those chains below
//! operations that commute with them, so the operations run on
//! low-precision data.
//!
//! # Module Organization
//!
//! - [`dequantization`] - recognizing dequantization chains
//! - [`network_helper`] - branch separation, propagation and constant helpers
//! - [`layer_transformation`] - the per-operation transformation trait
//! - [`transformations`] - the built-in layer transformations
//! - [`common`] - strided-slice and quantize/dequantize clean-ups
//! - [`low_precision`] - the three-step orchestrator
//!
//! # Example
//!
//! ```ignore
//! use lowp_transforms::{LowPrecisionParams, LowPrecisionTransformer};
//!
//! let transformer = LowPrecisionTransformer::new(LowPrecisionParams::from_env());
//! transformer.transform(&function)?;
//! ```

pub mod common;
pub mod config;
pub mod context;
pub mod dequantization;
pub mod error;
pub mod layer_transformation;
pub mod low_precision;
pub mod network_helper;
pub mod params_manager;
pub mod transformations;

#[cfg(test)]
pub mod test;

pub use config::LowPrecisionParams;
pub use context::TransformationContext;
pub use dequantization::{FakeQuantizeDequantization, get_dequantization};
pub use error::{Error, Result};
pub use layer_transformation::LayerTransformation;
pub use low_precision::{LowPrecisionTransformer, Step};
pub use params_manager::{LayerTransformationsManager, ParamsManager};
