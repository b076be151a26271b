use lowp_dtype::DTypeSet;
use lowp_ir::DType;

use crate::config::LowPrecisionParams;
use crate::params_manager::ParamsManager;
use crate::test::param;

#[test]
fn test_defaults() {
    let params = LowPrecisionParams::default();
    assert!(params.update_precisions);
    assert!(params.support_asymmetric_quantization);
    assert_eq!(params.deq_precision, DType::Float32);
    assert_eq!(params.precisions_on_activations, DType::UInt8 | DType::Int8);
    assert_eq!(LowPrecisionParams::builder().build(), params);
}

#[test]
fn test_builder_overrides() {
    let params = LowPrecisionParams::builder()
        .update_precisions(false)
        .deq_precision(DType::Float16)
        .precisions_on_activations(DTypeSet::only(DType::UInt8))
        .build();
    assert!(!params.update_precisions);
    assert!(params.support_asymmetric_quantization);
    assert_eq!(params.deq_precision, DType::Float16);

    let node = param(DType::UInt8, &[1]);
    assert_eq!(params.precisions_on_activations(&node), DTypeSet::only(DType::UInt8));
}

#[test]
fn test_from_env() {
    // SAFETY: no other test touches these variables.
    unsafe {
        std::env::set_var("LOWP_UPDATE_PRECISIONS", "false");
        std::env::set_var("LOWP_ASYMMETRIC", "garbage");
        std::env::set_var("LOWP_DEQ_PRECISION", "f16");
    }
    let params = LowPrecisionParams::from_env();
    assert!(!params.update_precisions);
    assert!(params.support_asymmetric_quantization);
    assert_eq!(params.deq_precision, DType::Float16);

    // Integer types cannot hold dequantized values.
    unsafe {
        std::env::set_var("LOWP_DEQ_PRECISION", "u8");
    }
    assert_eq!(LowPrecisionParams::from_env().deq_precision, DType::Float32);

    unsafe {
        std::env::remove_var("LOWP_UPDATE_PRECISIONS");
        std::env::remove_var("LOWP_ASYMMETRIC");
        std::env::remove_var("LOWP_DEQ_PRECISION");
    }
}
