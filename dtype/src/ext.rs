//! Native scalar types with a fixed [`DType`].

use super::*;

pub trait HasDType: Copy {
    const DTYPE: DType;
}

macro_rules! has_dtype {
    ($($dtype:ident => $($ty:ty),+);* $(;)?) => {
        $($(impl HasDType for $ty { const DTYPE: DType = DType::$dtype; })+)*
    };
}

has_dtype! {
    Bool => bool;
    Int8 => i8;
    UInt8 => u8;
    Int16 => i16;
    UInt16 => u16;
    Int32 => i32;
    UInt32 => u32;
    Int64 => i64;
    UInt64 => u64;
    Float32 => f32;
    Float64 => f64;
}
