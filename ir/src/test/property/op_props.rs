//! Numeric properties of individual operations.

use proptest::prelude::*;

use crate::node::Node;
use crate::ops::{FakeQuantize, Mvn, MvnEpsMode};
use crate::tensor::Tensor;
use crate::test::param;
use crate::DType;

use super::generators::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Quantized values stay inside the output range.
    #[test]
    fn fake_quantize_stays_in_output_range(
        levels in arb_levels(),
        (il, ih) in arb_range(),
        (ol, oh) in arb_range(),
        x in -200.0f64..200.0,
    ) {
        let fq = FakeQuantize::new(levels).unwrap();
        let y = fq.quantize(x, il, ih, ol, oh);
        prop_assert!(y >= ol - 1e-9 && y <= oh + 1e-9, "{y} outside [{ol}, {oh}]");
    }

    /// With equal input and output ranges, quantizing twice changes nothing.
    #[test]
    fn fake_quantize_is_idempotent(levels in arb_levels(), (low, high) in arb_range(), x in -200.0f64..200.0) {
        let fq = FakeQuantize::new(levels).unwrap();
        let once = fq.quantize(x, low, high, low, high);
        let twice = fq.quantize(once, low, high, low, high);
        prop_assert_eq!(once, twice);
    }

    /// Integer conversion saturates to the type range and yields integers.
    #[test]
    fn cast_saturates(values in prop::collection::vec(-1000.0f64..1000.0, 1..16)) {
        let len = values.len();
        let tensor = Tensor::new(DType::Float32, &[len], values).unwrap();
        for dtype in [DType::UInt8, DType::Int8] {
            for &v in tensor.cast(dtype).values() {
                prop_assert!(v >= dtype.min_value() && v <= dtype.max_value());
                prop_assert_eq!(v.fract(), 0.0);
            }
        }
    }

    /// Broadcasting addition does not depend on operand order.
    #[test]
    fn broadcast_add_commutes((dims, lhs) in arb_dims_and_tensor(3), mask in prop::collection::vec(any::<bool>(), 3)) {
        let rhs_dims: Vec<usize> = dims.iter().zip(&mask).map(|(&d, &keep)| if keep { d } else { 1 }).collect();
        let rhs_len = rhs_dims.iter().product::<usize>();
        let rhs = Tensor::new(DType::Float32, &rhs_dims, (0..rhs_len).map(|i| i as f64 * 0.5).collect()).unwrap();

        let ab = lhs.zip_broadcast(&rhs, DType::Float32, |a, b| a + b).unwrap();
        let ba = rhs.zip_broadcast(&lhs, DType::Float32, |a, b| b + a).unwrap();
        prop_assert_eq!(ab, ba);
    }

    /// Centering along the last axis leaves every row with zero mean.
    #[test]
    fn mvn_centers_rows(rows in 1usize..4, cols in 1usize..6, seed in prop::collection::vec(-50.0f64..50.0, 24)) {
        let data = param(DType::Float64, &[rows, cols]);
        let mvn = Mvn::new(vec![1], false, 0.0, MvnEpsMode::InsideSqrt).unwrap();
        let node = Node::new(mvn, [data.output(0).unwrap()]).unwrap();

        let input = Tensor::new(DType::Float64, &[rows, cols], seed[..rows * cols].to_vec()).unwrap();
        let out = node.evaluate(&[input]).unwrap().remove(0);
        for row in out.values().chunks(cols) {
            let mean = row.iter().sum::<f64>() / cols as f64;
            prop_assert!(mean.abs() < 1e-9, "row mean {mean}");
        }
    }
}
