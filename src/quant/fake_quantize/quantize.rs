//! Fake quantization node with observer and Straight-Through Estimator (STE).

use crate::Tensor;

use super::config::{FakeQuantConfig, QuantGranularity};
use super::observer::{Observer, ObserverKind};
use super::ops::{fake_quantize_per_channel, fake_quantize_per_tensor, ste_backward};

/// Fake quantization operation with Straight-Through Estimator (STE)
///
/// Holds the observer that calibrates scale/zero-point and the two switches
/// a QAT loop flips: observation (statistics update) and fake quantization
/// (quantize → dequantize). With fake quantization disabled the forward pass
/// is the identity.
#[derive(Clone, Debug, PartialEq)]
pub struct FakeQuantize {
    /// Quantization configuration
    pub config: FakeQuantConfig,
    observer: Observer,
    scales: Vec<f32>,
    zero_points: Vec<i32>,
    fake_quant_enabled: bool,
    observer_enabled: bool,
}

impl FakeQuantize {
    /// Create new fake quantization operation
    pub fn new(config: FakeQuantConfig, observer_kind: ObserverKind, averaging_constant: f32) -> Self {
        let observer = Observer::new(observer_kind, averaging_constant, config.ch_axis);
        Self {
            config,
            observer,
            scales: vec![1.0],
            zero_points: vec![0],
            fake_quant_enabled: true,
            observer_enabled: true,
        }
    }

    /// Create with 8-bit symmetric per-tensor min-max quantization
    pub fn q8() -> Self {
        Self::new(FakeQuantConfig::q8_symmetric(), ObserverKind::MinMax, 0.1)
    }

    /// Forward pass: observe (if enabled), then fake quantize (if enabled)
    pub fn forward(&mut self, input: &Tensor) -> Tensor {
        if self.observer_enabled {
            self.calibrate(input);
        }
        if !self.fake_quant_enabled {
            return input.clone();
        }
        self.quantize(input)
    }

    /// Update observer statistics and recompute scale/zero-point
    pub fn calibrate(&mut self, input: &Tensor) {
        self.observer.observe(input);
        let (scales, zero_points) = self.observer.calculate_qparams(&self.config);
        self.scales = scales;
        self.zero_points = zero_points;
    }

    /// Quantize → dequantize with the current parameters, no statistics update
    pub fn quantize(&self, input: &Tensor) -> Tensor {
        match self.config.granularity {
            QuantGranularity::PerChannel if input.ndim() > self.config.ch_axis => {
                fake_quantize_per_channel(
                    input,
                    &self.scales,
                    &self.zero_points,
                    self.config.ch_axis,
                    self.config.qmin,
                    self.config.qmax,
                )
            }
            _ => fake_quantize_per_tensor(
                input,
                self.scales[0],
                self.zero_points[0],
                self.config.qmin,
                self.config.qmax,
            ),
        }
    }

    /// Backward pass: Straight-Through Estimator (STE)
    ///
    /// ∂L/∂x = ∂L/∂y (where y = fake_quantize(x))
    pub fn backward(&self, grad_output: &Tensor) -> Tensor {
        ste_backward(grad_output)
    }

    /// Turn quantize → dequantize on or off
    pub fn enable_fake_quant(&mut self, enabled: bool) {
        self.fake_quant_enabled = enabled;
    }

    /// Turn statistics collection on or off
    pub fn enable_observer(&mut self, enabled: bool) {
        self.observer_enabled = enabled;
    }

    /// Whether forward applies fake quantization
    pub fn is_fake_quant_enabled(&self) -> bool {
        self.fake_quant_enabled
    }

    /// Whether forward updates statistics
    pub fn is_observer_enabled(&self) -> bool {
        self.observer_enabled
    }

    /// The range observer
    pub fn observer(&self) -> &Observer {
        &self.observer
    }

    /// Current scale(s)
    pub fn scales(&self) -> &[f32] {
        &self.scales
    }

    /// Current zero point(s)
    pub fn zero_points(&self) -> &[i32] {
        &self.zero_points
    }

    /// First (per-tensor) scale
    pub fn scale(&self) -> f32 {
        self.scales[0]
    }

    /// First (per-tensor) zero point
    pub fn zero_point(&self) -> i32 {
        self.zero_points[0]
    }

    /// Check if calibrated
    pub fn is_initialized(&self) -> bool {
        self.observer.is_initialized()
    }

    /// Get number of quantization levels
    pub fn num_levels(&self) -> usize {
        self.config.num_levels()
    }
}
