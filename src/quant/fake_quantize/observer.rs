//! Range observers that derive scale/zero-point from tensor statistics.

use std::fmt;
use std::str::FromStr;

use ndarray::Axis;

use crate::error::QuantizerError;
use crate::Tensor;

use super::config::{FakeQuantConfig, QuantGranularity};

/// Smallest scale ever produced, prevents division by zero
const MIN_SCALE: f32 = f32::EPSILON;

/// Observer algorithm
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObserverKind {
    /// Running min/max over everything seen
    MinMax,
    /// Exponential moving average of per-batch min/max
    MovingAverageMinMax,
    /// Running min/max per channel
    PerChannelMinMax,
    /// Exponential moving average of per-batch min/max per channel
    MovingAveragePerChannelMinMax,
}

impl ObserverKind {
    /// Whether this observer produces per-channel parameters
    pub fn is_per_channel(&self) -> bool {
        matches!(
            self,
            ObserverKind::PerChannelMinMax | ObserverKind::MovingAveragePerChannelMinMax
        )
    }

    /// Whether statistics are smoothed with the averaging constant
    pub fn is_moving_average(&self) -> bool {
        matches!(
            self,
            ObserverKind::MovingAverageMinMax | ObserverKind::MovingAveragePerChannelMinMax
        )
    }

    /// Granularity of the parameters this observer produces
    pub fn granularity(&self) -> QuantGranularity {
        if self.is_per_channel() {
            QuantGranularity::PerChannel
        } else {
            QuantGranularity::PerTensor
        }
    }

    /// Canonical type name
    pub fn name(&self) -> &'static str {
        match self {
            ObserverKind::MinMax => "MinMaxObserver",
            ObserverKind::MovingAverageMinMax => "MovingAverageMinMaxObserver",
            ObserverKind::PerChannelMinMax => "PerChannelMinMaxObserver",
            ObserverKind::MovingAveragePerChannelMinMax => {
                "MovingAveragePerChannelMinMaxObserver"
            }
        }
    }
}

impl fmt::Display for ObserverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ObserverKind {
    type Err = QuantizerError;

    /// Parses registry-style names; any `scope.` prefix is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.rsplit('.').next().unwrap_or(s);
        match name {
            "MinMaxObserver" => Ok(ObserverKind::MinMax),
            "MovingAverageMinMaxObserver" => Ok(ObserverKind::MovingAverageMinMax),
            "PerChannelMinMaxObserver" => Ok(ObserverKind::PerChannelMinMax),
            "MovingAveragePerChannelMinMaxObserver" => {
                Ok(ObserverKind::MovingAveragePerChannelMinMax)
            }
            _ => Err(QuantizerError::InvalidConfig(format!(
                "unknown observer type: {s}"
            ))),
        }
    }
}

/// Stateful observer tracking tensor ranges
#[derive(Clone, Debug, PartialEq)]
pub struct Observer {
    kind: ObserverKind,
    averaging_constant: f32,
    ch_axis: usize,
    min_vals: Vec<f32>,
    max_vals: Vec<f32>,
}

impl Observer {
    /// Create an observer; `averaging_constant` is only used by moving-average kinds
    pub fn new(kind: ObserverKind, averaging_constant: f32, ch_axis: usize) -> Self {
        Self {
            kind,
            averaging_constant,
            ch_axis,
            min_vals: Vec::new(),
            max_vals: Vec::new(),
        }
    }

    /// Observer algorithm
    pub fn kind(&self) -> ObserverKind {
        self.kind
    }

    /// Whether any statistics have been collected
    pub fn is_initialized(&self) -> bool {
        !self.min_vals.is_empty()
    }

    /// Observed minima (one entry per-tensor, one per channel otherwise)
    pub fn min_vals(&self) -> &[f32] {
        &self.min_vals
    }

    /// Observed maxima
    pub fn max_vals(&self) -> &[f32] {
        &self.max_vals
    }

    /// Update statistics from a batch
    pub fn observe(&mut self, x: &Tensor) {
        if x.is_empty() {
            return;
        }

        let (mins, maxs) = if self.kind.is_per_channel() {
            if self.ch_axis >= x.ndim() {
                return;
            }
            x.axis_iter(Axis(self.ch_axis))
                .map(|lane| {
                    let min = lane.iter().copied().fold(f32::INFINITY, f32::min);
                    let max = lane.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                    (min, max)
                })
                .unzip()
        } else {
            let min = x.iter().copied().fold(f32::INFINITY, f32::min);
            let max = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            (vec![min], vec![max])
        };

        if !self.is_initialized() || self.min_vals.len() != mins.len() {
            self.min_vals = mins;
            self.max_vals = maxs;
            return;
        }

        if self.kind.is_moving_average() {
            let c = self.averaging_constant;
            for (running, new) in self.min_vals.iter_mut().zip(&mins) {
                *running += c * (new - *running);
            }
            for (running, new) in self.max_vals.iter_mut().zip(&maxs) {
                *running += c * (new - *running);
            }
        } else {
            for (running, new) in self.min_vals.iter_mut().zip(&mins) {
                *running = running.min(*new);
            }
            for (running, new) in self.max_vals.iter_mut().zip(&maxs) {
                *running = running.max(*new);
            }
        }
    }

    /// Compute scale/zero-point for the observed ranges
    ///
    /// For symmetric: scale = max(|min|, |max|) / ((qmax - qmin) / 2)
    /// For asymmetric: scale = (max - min) / (qmax - qmin)
    pub fn calculate_qparams(&self, config: &FakeQuantConfig) -> (Vec<f32>, Vec<i32>) {
        if !self.is_initialized() {
            return (vec![1.0], vec![0]);
        }

        self.min_vals
            .iter()
            .zip(&self.max_vals)
            .map(|(&min, &max)| {
                let min_neg = min.min(0.0);
                let max_pos = max.max(0.0);
                if config.symmetric {
                    let max_abs = (-min_neg).max(max_pos);
                    let scale = (max_abs / ((config.qmax - config.qmin) as f32 / 2.0))
                        .max(MIN_SCALE);
                    let zero_point = if config.dtype.is_signed() {
                        0
                    } else {
                        (config.qmin + config.qmax + 1) / 2
                    };
                    (scale, zero_point)
                } else {
                    let scale =
                        ((max_pos - min_neg) / (config.qmax - config.qmin) as f32).max(MIN_SCALE);
                    let zero_point = (config.qmin as f32 - (min_neg / scale).round()) as i32;
                    (scale, zero_point.clamp(config.qmin, config.qmax))
                }
            })
            .unzip()
    }
}
