//! Element types for the lowp graph IR.
//!
//! [`DType`] describes the element type of a tensor flowing along a graph edge.
//! Quantized graphs mix low-precision integer storage (`u8`, `i8`, 4-bit types)
//! with floating-point dequantization arithmetic, so the type also carries the
//! range information needed for saturating conversions.

pub mod cast;
pub mod ext;


use std::fmt;

pub use enumset::EnumSet;
pub use ext::HasDType;

/// Set of admissible element types (e.g. precisions allowed on activations).
pub type DTypeSet = EnumSet<DType>;

/// Tensor element type.
#[derive(Debug, Hash, PartialOrd, Ord)]
#[derive(strum::EnumCount, strum::EnumIter, strum::VariantArray, strum::FromRepr)]
#[derive(enumset::EnumSetType)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[enumset(repr = "u32")]
pub enum DType {
    Bool = 0,

    // Interleaved signed/unsigned for correct LUB priority (lower = more specific)
    Int4 = 1,
    UInt4 = 2,
    Int8 = 3,
    UInt8 = 4,
    Int16 = 5,
    UInt16 = 6,
    Int32 = 7,
    UInt32 = 8,
    Int64 = 9,
    UInt64 = 10,

    Float16 = 11,
    BFloat16 = 12,
    Float32 = 13,
    Float64 = 14,

    /// Not yet known; produced by front ends before type inference.
    Dynamic = 15,
}

impl DType {
    pub const fn bitwidth(&self) -> usize {
        match self {
            Self::Bool => 8,
            Self::Int4 | Self::UInt4 => 4,
            Self::Int8 | Self::UInt8 => 8,
            Self::Int16 | Self::UInt16 | Self::Float16 | Self::BFloat16 => 16,
            Self::Int32 | Self::UInt32 | Self::Float32 => 32,
            Self::Int64 | Self::UInt64 | Self::Float64 => 64,
            Self::Dynamic => 0,
        }
    }

    /// Storage size in bytes (sub-byte types round up).
    pub const fn bytes(&self) -> usize {
        self.bitwidth().div_ceil(8)
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int4 | Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt4 | Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_int(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float16 | Self::BFloat16 | Self::Float32 | Self::Float64)
    }

    /// Real-valued (floating point) types, the precision class of dequantized data.
    pub const fn is_real(&self) -> bool {
        self.is_float()
    }

    pub const fn is_static(&self) -> bool {
        !matches!(self, Self::Dynamic)
    }

    /// Low-precision integer storage types produced by quantization.
    pub const fn is_quantized(&self) -> bool {
        matches!(self, Self::Int4 | Self::UInt4 | Self::Int8 | Self::UInt8)
    }

    /// Smallest representable value, used for saturating conversions.
    pub const fn min_value(&self) -> f64 {
        match self {
            Self::Bool => 0.0,
            Self::Int4 => -8.0,
            Self::Int8 => i8::MIN as f64,
            Self::Int16 => i16::MIN as f64,
            Self::Int32 => i32::MIN as f64,
            Self::Int64 => i64::MIN as f64,
            Self::UInt4 | Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64 => 0.0,
            Self::Float16 => -65504.0,
            Self::BFloat16 => -3.389_531_389_251_535_5e38,
            Self::Float32 => f32::MIN as f64,
            Self::Float64 | Self::Dynamic => f64::MIN,
        }
    }

    /// Largest representable value, used for saturating conversions.
    pub const fn max_value(&self) -> f64 {
        match self {
            Self::Bool => 1.0,
            Self::Int4 => 7.0,
            Self::UInt4 => 15.0,
            Self::Int8 => i8::MAX as f64,
            Self::UInt8 => u8::MAX as f64,
            Self::Int16 => i16::MAX as f64,
            Self::UInt16 => u16::MAX as f64,
            Self::Int32 => i32::MAX as f64,
            Self::UInt32 => u32::MAX as f64,
            Self::Int64 => i64::MAX as f64,
            Self::UInt64 => u64::MAX as f64,
            Self::Float16 => 65504.0,
            Self::BFloat16 => 3.389_531_389_251_535_5e38,
            Self::Float32 => f32::MAX as f64,
            Self::Float64 | Self::Dynamic => f64::MAX,
        }
    }

    /// Short conventional name (`f32`, `u8`, ...).
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Bool => "boolean",
            Self::Int4 => "i4",
            Self::UInt4 => "u4",
            Self::Int8 => "i8",
            Self::UInt8 => "u8",
            Self::Int16 => "i16",
            Self::UInt16 => "u16",
            Self::Int32 => "i32",
            Self::UInt32 => "u32",
            Self::Int64 => "i64",
            Self::UInt64 => "u64",
            Self::Float16 => "f16",
            Self::BFloat16 => "bf16",
            Self::Float32 => "f32",
            Self::Float64 => "f64",
            Self::Dynamic => "dynamic",
        }
    }

    /// Parse a short name produced by [`DType::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        use strum::VariantArray;
        Self::VARIANTS.iter().copied().find(|dtype| dtype.name() == name)
    }

    /// Merge two element types the way type inference does: `Dynamic` unifies
    /// with anything, other types must be equal.
    pub fn merge(self, other: Self) -> Option<Self> {
        match (self, other) {
            (Self::Dynamic, t) | (t, Self::Dynamic) => Some(t),
            (a, b) if a == b => Some(a),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
