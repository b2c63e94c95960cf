//! Tests for fake-quantize nodes and range observers.

use super::*;
use crate::Tensor;
use approx::assert_abs_diff_eq;
use ndarray::{arr1, arr2};
use proptest::prelude::*;

fn tensor(values: &[f32]) -> Tensor {
    arr1(values).into_dyn()
}

// ========================================================================
// Properties
// ========================================================================

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(200))]

    #[test]
    fn prop_ste_passes_gradient_through(
        grad in prop::collection::vec(-10.0f32..10.0, 1..32),
    ) {
        let grad_tensor = tensor(&grad);
        let fq = FakeQuantize::q8();

        let backward = fq.backward(&grad_tensor);

        prop_assert_eq!(backward, grad_tensor);
    }

    /// Outputs land on the integer grid
    #[test]
    fn prop_output_on_grid(
        values in prop::collection::vec(-5.0f32..5.0, 4..32),
        bits in 4u8..9,
    ) {
        let input = tensor(&values);
        let mut fq = FakeQuantize::new(FakeQuantConfig::symmetric(bits), ObserverKind::MinMax, 0.1);

        let output = fq.forward(&input);

        let scale = fq.scale();
        for &val in output.iter() {
            let q = (val / scale).round();
            prop_assert!(
                (val - q * scale).abs() < 1e-5,
                "{} is off grid (q={}, scale={})",
                val, q, scale
            );
        }
    }

    /// Outputs stay inside the representable range
    #[test]
    fn prop_output_in_range(
        values in prop::collection::vec(-100.0f32..100.0, 4..32),
        bits in 4u8..9,
    ) {
        let input = tensor(&values);
        let mut fq = FakeQuantize::new(FakeQuantConfig::symmetric(bits), ObserverKind::MinMax, 0.1);

        let output = fq.forward(&input);

        let qmin_float = fq.config.qmin as f32 * fq.scale();
        let qmax_float = fq.config.qmax as f32 * fq.scale();
        for &val in output.iter() {
            prop_assert!(
                val >= qmin_float - 1e-4 && val <= qmax_float + 1e-4,
                "{} outside [{}, {}]",
                val, qmin_float, qmax_float
            );
        }
    }

    /// Re-applying with frozen min-max statistics is a no-op
    #[test]
    fn prop_fake_quantize_idempotent_under_min_max(
        values in prop::collection::vec(-10.0f32..10.0, 4..32),
    ) {
        let input = tensor(&values);
        let mut fq = FakeQuantize::q8();

        let once = fq.forward(&input);
        let twice = fq.forward(&once);

        for (a, b) in once.iter().zip(twice.iter()) {
            prop_assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn prop_restricted_range_levels(bits in 2u8..10) {
        let config = FakeQuantConfig::symmetric(bits);
        // Restricted symmetric range: 2 * (2^(bits-1) - 1) + 1 = 2^bits - 1
        prop_assert_eq!(config.num_levels(), (1usize << bits) - 1);
    }
}

// ========================================================================
// Ranges, calibration and switches
// ========================================================================

#[test]
fn test_signed_ranges() {
    let config = FakeQuantConfig::symmetric(4);
    assert_eq!(config.bits, 4);
    assert!(config.symmetric);
    assert_eq!(config.qmin, -7);
    assert_eq!(config.qmax, 7);

    let full_range = FakeQuantConfig::new(
        QuantDtype::QInt8,
        8,
        true,
        false,
        QuantGranularity::PerTensor,
    );
    assert_eq!(full_range.qmin, -128);
    assert_eq!(full_range.qmax, 127);
}

#[test]
fn test_unsigned_range() {
    let config = FakeQuantConfig::asymmetric(8);
    assert!(!config.symmetric);
    assert_eq!(config.dtype, QuantDtype::QUInt8);
    assert_eq!(config.qmin, 0);
    assert_eq!(config.qmax, 255);
}

#[test]
fn test_symmetric_qparams() {
    let mut fq = FakeQuantize::q8();
    fq.calibrate(&tensor(&[0.0, 1.0, -2.0, 1.5, -1.5]));

    // max_abs = 2.0, (qmax - qmin) / 2 = 127
    assert_abs_diff_eq!(fq.scale(), 2.0 / 127.0, epsilon = 1e-6);
    assert_eq!(fq.zero_point(), 0);
}

#[test]
fn test_affine_qparams() {
    let mut fq = FakeQuantize::new(FakeQuantConfig::asymmetric(8), ObserverKind::MinMax, 0.1);
    fq.calibrate(&tensor(&[-1.0, 0.0, 1.0, 2.0, 3.0]));

    assert_abs_diff_eq!(fq.scale(), 4.0 / 255.0, epsilon = 1e-6);
    // zero_point = qmin - round(min / scale) = round(63.75)
    assert_eq!(fq.zero_point(), 64);
}

#[test]
fn test_quint8_symmetric_zero_point_is_midpoint() {
    let config = FakeQuantConfig::new(
        QuantDtype::QUInt8,
        8,
        true,
        false,
        QuantGranularity::PerTensor,
    );
    let mut fq = FakeQuantize::new(config, ObserverKind::MinMax, 0.1);
    fq.calibrate(&tensor(&[-1.0, 1.0]));
    assert_eq!(fq.zero_point(), 128);
}

#[test]
fn test_disabled_fake_quant_is_identity() {
    let input = tensor(&[0.123, -0.456, 0.789]);
    let mut fq = FakeQuantize::q8();
    fq.enable_fake_quant(false);

    let output = fq.forward(&input);

    assert_eq!(output, input);
    // Observer still ran
    assert!(fq.is_initialized());
}

#[test]
fn test_disabled_observer_keeps_params() {
    let mut fq = FakeQuantize::q8();
    fq.forward(&tensor(&[-1.0, 1.0]));
    let scale = fq.scale();

    fq.enable_observer(false);
    fq.forward(&tensor(&[-100.0, 100.0]));

    assert_abs_diff_eq!(fq.scale(), scale, epsilon = 1e-9);
    assert!(!fq.is_observer_enabled());
}

#[test]
fn test_moving_average_observer() {
    let mut fq = FakeQuantize::new(
        FakeQuantConfig::symmetric(8),
        ObserverKind::MovingAverageMinMax,
        0.5,
    );
    fq.calibrate(&tensor(&[-1.0, 1.0]));
    fq.calibrate(&tensor(&[-3.0, 3.0]));

    // 1 + 0.5 * (3 - 1) = 2
    assert_abs_diff_eq!(fq.observer().max_vals()[0], 2.0, epsilon = 1e-6);
    assert_abs_diff_eq!(fq.observer().min_vals()[0], -2.0, epsilon = 1e-6);
}

#[test]
fn test_min_max_observer_accumulates() {
    let mut observer = Observer::new(ObserverKind::MinMax, 0.1, 0);
    observer.observe(&tensor(&[-1.0, 2.0]));
    observer.observe(&tensor(&[-0.5, 4.0]));

    assert_eq!(observer.min_vals(), &[-1.0]);
    assert_eq!(observer.max_vals(), &[4.0]);
}

#[test]
fn test_per_channel_scales() {
    let config = FakeQuantConfig::symmetric(8).per_channel(0);
    let mut fq = FakeQuantize::new(config, ObserverKind::PerChannelMinMax, 0.1);
    let weight = arr2(&[[1.0f32, -0.5], [10.0, 2.0]]).into_dyn();

    let output = fq.forward(&weight);

    assert_eq!(fq.scales().len(), 2);
    assert_abs_diff_eq!(fq.scales()[0], 1.0 / 127.0, epsilon = 1e-7);
    assert_abs_diff_eq!(fq.scales()[1], 10.0 / 127.0, epsilon = 1e-7);
    // Channel maxima are representable exactly
    assert_abs_diff_eq!(output[[0, 0]], 1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(output[[1, 0]], 10.0, epsilon = 1e-5);
}

#[test]
fn test_observer_kind_parsing() {
    assert_eq!(
        "mmrazor.PerChannelMinMaxObserver".parse::<ObserverKind>().unwrap(),
        ObserverKind::PerChannelMinMax
    );
    assert_eq!(
        "MovingAverageMinMaxObserver".parse::<ObserverKind>().unwrap(),
        ObserverKind::MovingAverageMinMax
    );
    assert!("HistogramObserver".parse::<ObserverKind>().is_err());
    assert!(ObserverKind::MovingAveragePerChannelMinMax.is_per_channel());
    assert_eq!(ObserverKind::MinMax.granularity(), QuantGranularity::PerTensor);
}

#[test]
fn test_empty_tensor_leaves_defaults() {
    let mut fq = FakeQuantize::q8();
    fq.calibrate(&Tensor::zeros(ndarray::IxDyn(&[0])));
    assert!(!fq.is_initialized());
    assert_eq!(fq.scale(), 1.0);
}

#[test]
fn test_all_zero_tensor_keeps_positive_scale() {
    let mut fq = FakeQuantize::q8();
    fq.calibrate(&tensor(&[0.0, 0.0, 0.0]));

    assert!(fq.scale() > 0.0);
    assert!(fq.is_initialized());
}

#[test]
fn test_round_trip_error_within_half_step() {
    let input = tensor(&[0.0, 0.5, 1.0, -0.5, -1.0]);
    let mut fq = FakeQuantize::q8();

    let output = fq.forward(&input);

    for (&x, &y) in input.iter().zip(output.iter()) {
        assert_abs_diff_eq!(x, y, epsilon = 0.01);
    }
}
