use proptest::prelude::*;
use proptest::sample::select;
use strum::VariantArray;

use crate::*;

pub fn int_dtype() -> impl Strategy<Value = DType> {
    select(DType::VARIANTS.iter().copied().filter(DType::is_int).collect::<Vec<_>>())
}

pub fn float_dtype() -> impl Strategy<Value = DType> {
    select(DType::VARIANTS.iter().copied().filter(DType::is_float).collect::<Vec<_>>())
}

pub fn static_dtype() -> impl Strategy<Value = DType> {
    prop_oneof![Just(DType::Bool), int_dtype(), float_dtype()]
}
