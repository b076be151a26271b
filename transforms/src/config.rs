use bon::bon;
use lowp_dtype::{DType, DTypeSet};

/// Knobs shared by every layer transformation of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowPrecisionParams {
    /// Let transformed operations compute in the low-precision type of their
    /// data instead of the dequantized one.
    pub update_precisions: bool,
    /// Accept chains with a zero-point subtraction.
    pub support_asymmetric_quantization: bool,
    /// Element type of dequantized values.
    pub deq_precision: DType,
    /// Admissible low-precision types of activations.
    pub precisions_on_activations: DTypeSet,
}

impl Default for LowPrecisionParams {
    fn default() -> Self {
        Self {
            update_precisions: true,
            support_asymmetric_quantization: true,
            deq_precision: DType::Float32,
            precisions_on_activations: DType::UInt8 | DType::Int8,
        }
    }
}

#[bon]
impl LowPrecisionParams {
    #[builder]
    pub fn builder(
        #[builder(default = true)] update_precisions: bool,
        #[builder(default = true)] support_asymmetric_quantization: bool,
        #[builder(default = DType::Float32)] deq_precision: DType,
        #[builder(default = DType::UInt8 | DType::Int8)] precisions_on_activations: DTypeSet,
    ) -> Self {
        Self { update_precisions, support_asymmetric_quantization, deq_precision, precisions_on_activations }
    }

    /// Parameters from environment variables.
    ///
    /// * `LOWP_UPDATE_PRECISIONS` - `0`/`false` disables precision updates (default: on)
    /// * `LOWP_ASYMMETRIC` - `0`/`false` rejects zero points (default: on)
    /// * `LOWP_DEQ_PRECISION` - dequantization type name such as `f16` (default: `f32`)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let deq_precision = std::env::var("LOWP_DEQ_PRECISION")
            .ok()
            .and_then(|name| DType::from_name(name.trim()))
            .filter(DType::is_real)
            .unwrap_or(defaults.deq_precision);
        Self {
            update_precisions: env_flag("LOWP_UPDATE_PRECISIONS").unwrap_or(defaults.update_precisions),
            support_asymmetric_quantization: env_flag("LOWP_ASYMMETRIC")
                .unwrap_or(defaults.support_asymmetric_quantization),
            deq_precision,
            precisions_on_activations: defaults.precisions_on_activations,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}
