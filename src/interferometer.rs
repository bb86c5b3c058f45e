#![warn(clippy::pedantic)]
#![allow(clippy::needless_range_loop)]

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::{PhaseSample, CHANNELS};

/// Conditions that invalidate a calibration run or a calibration parameter
/// set. Unlike `FrameError`, these are fatal: no partial model is ever
/// published.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CalibrationError {
    #[error("zero intensity span on channel {channel}")]
    ZeroSpan { channel: usize },
    #[error("channel {channel} never sweeps through zero; not enough phase coverage")]
    NoPhaseSweep { channel: usize },
    #[error("minimizer stopped after {iterations} iterations without meeting the gradient test (objective {objective:.3e})")]
    Convergence { iterations: u32, objective: f64 },
    #[error("not enough samples to characterise")]
    NotEnoughSamples,
    #[error("calibration value on channel {channel} is not finite")]
    NotFinite { channel: usize },
    #[error("output phase {value} on channel {channel} outside [0, 2pi)")]
    PhaseOutOfRange { channel: usize, value: f64 },
    #[error("min intensity is not below max intensity on channel {channel}")]
    InvertedBounds { channel: usize },
}

/// Calibrated constants of one detector channel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChannelCalibration {
    pub min_intensity: f64,
    pub max_intensity: f64,
    /// Geometric phase offset of the channel, in [0, 2pi). Zero on channel 1
    /// by convention.
    pub output_phase: f64,
    /// Phase delay of the channel's AC demodulation path. Zero on channel 1
    /// by convention.
    pub system_phase: f64,
}

/// The complete calibration parameter set of the interferometer. Either all
/// fields of all three channels are present and valid, or construction fails;
/// the model is immutable afterwards and can be shared freely across worker
/// threads.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationModel {
    channels: [ChannelCalibration; CHANNELS],
    swapped: bool,
}

impl CalibrationModel {
    /// # Errors
    /// Rejects non-finite fields, inverted or zero-width intensity bounds and
    /// output phases outside [0, 2pi).
    pub fn new(
        channels: [ChannelCalibration; CHANNELS],
        swapped: bool,
    ) -> Result<Self, CalibrationError> {
        for (index, calibration) in channels.iter().enumerate() {
            let channel = index + 1;
            let finite = calibration.min_intensity.is_finite()
                && calibration.max_intensity.is_finite()
                && calibration.output_phase.is_finite()
                && calibration.system_phase.is_finite();
            if !finite {
                return Err(CalibrationError::NotFinite { channel });
            }
            if calibration.min_intensity >= calibration.max_intensity {
                return Err(CalibrationError::InvertedBounds { channel });
            }
            if !(0.0..TAU).contains(&calibration.output_phase) {
                return Err(CalibrationError::PhaseOutOfRange {
                    channel,
                    value: calibration.output_phase,
                });
            }
        }
        Ok(CalibrationModel { channels, swapped })
    }

    #[inline]
    #[must_use]
    pub fn channel(&self, index: usize) -> &ChannelCalibration {
        &self.channels[index]
    }

    /// True if channels 2 and 3 were found physically exchanged relative to
    /// the nominal wiring during characterisation. Frames must then be fed
    /// through `LockInResult::swap_channels` before phase recovery.
    #[inline]
    #[must_use]
    pub fn swapped(&self) -> bool {
        self.swapped
    }

    /// Min-max scales one DC intensity into [-1, 1] using the channel's
    /// calibrated bounds.
    #[inline]
    #[must_use]
    pub fn scale_intensity(&self, channel: usize, intensity: f64) -> f64 {
        let calibration = &self.channels[channel];
        2.0 * (intensity - calibration.min_intensity)
            / (calibration.max_intensity - calibration.min_intensity)
            - 1.0
    }

    #[must_use]
    pub fn scale_triple(&self, dc: [f64; CHANNELS]) -> [f64; CHANNELS] {
        let mut scaled = [0.0; CHANNELS];
        for (channel, value) in scaled.iter_mut().enumerate() {
            *value = self.scale_intensity(channel, dc[channel]);
        }
        scaled
    }

    /// Recovers the interferometric phase from one triple of DC means.
    ///
    /// Each scaled intensity pins the signal point to one of two spots on the
    /// unit circle (the inverse-cosine sign ambiguity), giving two candidates
    /// per channel for the x and y coordinates. All three channels see the
    /// same point, so the ambiguity is resolved by picking, independently for
    /// x and for y, the one-candidate-per-channel combination with the
    /// smallest total pairwise deviation.
    #[must_use]
    pub fn interferometric_phase(&self, dc: [f64; CHANNELS]) -> PhaseSample {
        let scaled = self.scale_triple(dc);
        let mut x = [[0.0; 2]; CHANNELS];
        let mut y = [[0.0; 2]; CHANNELS];
        for channel in 0..CHANNELS {
            let (sin_out, cos_out) = self.channels[channel].output_phase.sin_cos();
            let value = scaled[channel];
            // intensities slightly out of range would make the root go NaN
            let root = (1.0 - value * value).max(0.0).sqrt();
            x[channel][0] = value * cos_out + root * sin_out;
            x[channel][1] = value * cos_out - root * sin_out;
            y[channel][0] = value * sin_out + root * cos_out;
            y[channel][1] = value * sin_out - root * cos_out;
        }
        let mean_x = select_consistent(&x);
        let mean_y = select_consistent(&y);
        PhaseSample {
            radians: mean_y.atan2(mean_x),
        }
    }
}

/// Mean of the candidate triple (one candidate per channel) with the lowest
/// total pairwise absolute deviation. Ties keep the first combination found.
fn select_consistent(candidates: &[[f64; 2]; CHANNELS]) -> f64 {
    let mut best_deviation = f64::INFINITY;
    let mut best_mean = 0.0;
    for first in candidates[0] {
        for second in candidates[1] {
            for third in candidates[2] {
                let deviation = (first - second).abs()
                    + (first - third).abs()
                    + (second - third).abs();
                if deviation < best_deviation {
                    best_deviation = deviation;
                    best_mean = (first + second + third) / 3.0;
                }
            }
        }
    }
    best_mean
}

/// Flat serialization layout matching the on-disk calibration sections.
#[derive(Serialize, Deserialize, Debug)]
struct CalibrationSerialize {
    min_intensities: [f64; CHANNELS],
    max_intensities: [f64; CHANNELS],
    output_phases: [f64; CHANNELS],
    system_phases: [f64; CHANNELS],
    phases_swapped: bool,
}

impl CalibrationSerialize {
    fn into_model(self) -> Result<CalibrationModel, CalibrationError> {
        let mut channels = [ChannelCalibration::default(); CHANNELS];
        for (index, channel) in channels.iter_mut().enumerate() {
            channel.min_intensity = self.min_intensities[index];
            channel.max_intensity = self.max_intensities[index];
            channel.output_phase = self.output_phases[index];
            channel.system_phase = self.system_phases[index];
        }
        CalibrationModel::new(channels, self.phases_swapped)
    }

    fn from_model(model: &CalibrationModel) -> Self {
        let mut serialize = CalibrationSerialize {
            min_intensities: [0.0; CHANNELS],
            max_intensities: [0.0; CHANNELS],
            output_phases: [0.0; CHANNELS],
            system_phases: [0.0; CHANNELS],
            phases_swapped: model.swapped,
        };
        for (index, channel) in model.channels.iter().enumerate() {
            serialize.min_intensities[index] = channel.min_intensity;
            serialize.max_intensities[index] = channel.max_intensity;
            serialize.output_phases[index] = channel.output_phase;
            serialize.system_phases[index] = channel.system_phase;
        }
        serialize
    }
}

impl<'de> Deserialize<'de> for CalibrationModel {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        CalibrationSerialize::deserialize(d)?
            .into_model()
            .map_err(serde::de::Error::custom)
    }
}

impl Serialize for CalibrationModel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        CalibrationSerialize::from_model(self).serialize(serializer)
    }
}
