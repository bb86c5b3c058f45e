#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss, clippy::needless_range_loop)]

use std::f64::consts::{PI, TAU};

use log::info;

use crate::circlefit::{FitResult, FitSetup, NOMINAL_PHASES};
use crate::frame::CHANNELS;
use crate::interferometer::{CalibrationError, CalibrationModel, ChannelCalibration};

/// Best achievable symmetry of an ideal 120-degree three-detector
/// interferometer, in percent; reference point for the relative figure.
pub const OPTIMAL_SYMMETRY: f64 = 86.58;

/// One-shot characterisation of the interferometer from a batch of per-frame
/// DC triples collected while the phase sweeps. Determines per-channel
/// intensity bounds, the two free output phases (channel 1 is the zero
/// reference), the channel ordering and the pair of system phases.
#[derive(Debug, Clone, Copy)]
pub struct Characterization {
    /// Trailing samples excluded from the intensity extrema, to keep edge
    /// artifacts of the sweep out of the scaling bounds.
    pub edge_margin: usize,
    pub fit: FitSetup,
}

/// A finished characterisation: the calibration parameter set plus the
/// figures of merit of the run.
#[derive(Debug, Clone)]
pub struct CharacterizationReport {
    pub model: CalibrationModel,
    pub fit: FitResult,
    /// Worst-to-best ratio of the summed phase sensitivity over the batch,
    /// in percent.
    pub absolute_symmetry: f64,
    /// `absolute_symmetry` relative to the ideal instrument.
    pub relative_symmetry: f64,
}

impl Default for Characterization {
    fn default() -> Self {
        Self::new()
    }
}

impl Characterization {
    #[must_use]
    pub fn new() -> Self {
        Characterization {
            edge_margin: 0,
            fit: FitSetup::new(),
        }
    }

    pub fn edge_margin(&mut self, samples: usize) -> &mut Self {
        self.edge_margin = samples;
        self
    }

    /// Runs the full characterisation over a batch of DC triples.
    ///
    /// # Errors
    /// Any `CalibrationError`; no partial model is published.
    pub fn characterize(
        &self,
        batch: &[[f64; CHANNELS]],
    ) -> Result<CharacterizationReport, CalibrationError> {
        // the sweep tail tends to carry turnaround artifacts; everything
        // downstream works on the trimmed view
        let cutoff = batch.len().saturating_sub(self.edge_margin);
        if cutoff == 0 {
            return Err(CalibrationError::NotEnoughSamples);
        }
        let batch = &batch[..cutoff];
        let (min, max) = intensity_extrema(batch)?;
        let scaled: Vec<[f64; CHANNELS]> = batch
            .iter()
            .map(|dc| {
                let mut sample = [0.0; CHANNELS];
                for channel in 0..CHANNELS {
                    sample[channel] =
                        2.0 * (dc[channel] - min[channel]) / (max[channel] - min[channel]) - 1.0;
                }
                sample
            })
            .collect();

        let bands_2 = phase_bands(&scaled, 1);
        let bands_3 = phase_bands(&scaled, 2);
        let crossing_2 = first_zero_crossing(&scaled, 1)
            .ok_or(CalibrationError::NoPhaseSweep { channel: 2 })?;
        let crossing_3 = first_zero_crossing(&scaled, 2)
            .ok_or(CalibrationError::NoPhaseSweep { channel: 3 })?;

        // The banding admits two mirrored solutions per channel; whichever
        // channel sweeps through zero first owns the upper half-plane. Slot 2
        // of the model always receives the [0, pi] band, so an early channel
        // 2 means the physical ordering is exchanged.
        let swapped = crossing_2 < crossing_3;
        let (lower_band, upper_band) = if swapped {
            (restrict(&bands_3, false), restrict(&bands_2, true))
        } else {
            (restrict(&bands_2, false), restrict(&bands_3, true))
        };
        if lower_band.is_empty() {
            return Err(CalibrationError::NoPhaseSweep {
                channel: if swapped { 3 } else { 2 },
            });
        }
        if upper_band.is_empty() {
            return Err(CalibrationError::NoPhaseSweep {
                channel: if swapped { 2 } else { 3 },
            });
        }
        let output_phase_2 = histogram_mode(&lower_band);
        let output_phase_3 = histogram_mode(&upper_band);

        // logical order for the circle fit: slot indices, not wiring indices
        let order: [usize; CHANNELS] = if swapped { [0, 2, 1] } else { [0, 1, 2] };
        let mut logical = [
            Vec::with_capacity(scaled.len()),
            Vec::with_capacity(scaled.len()),
            Vec::with_capacity(scaled.len()),
        ];
        for sample in &scaled {
            for slot in 0..CHANNELS {
                logical[slot].push(sample[order[slot]]);
            }
        }
        let fit = self.fit.fit(
            [&logical[0], &logical[1], &logical[2]],
            NOMINAL_PHASES,
        )?;

        let mut channels = [ChannelCalibration::default(); CHANNELS];
        let output_phases = [0.0, output_phase_2, output_phase_3];
        let system_phases = [0.0, fit.phases[0], fit.phases[1]];
        for slot in 0..CHANNELS {
            channels[slot] = ChannelCalibration {
                min_intensity: min[order[slot]],
                max_intensity: max[order[slot]],
                output_phase: output_phases[slot],
                system_phase: system_phases[slot],
            };
        }
        let model = CalibrationModel::new(channels, swapped)?;

        let (absolute_symmetry, relative_symmetry) = symmetry(&model, batch);
        info!(
            "characterisation finished: output phases ({output_phase_2:.4}, {output_phase_3:.4}), \
             system phases ({:.4}, {:.4}), swapped {swapped}, symmetry {absolute_symmetry:.1}%",
            fit.phases[0], fit.phases[1]
        );

        Ok(CharacterizationReport {
            model,
            fit,
            absolute_symmetry,
            relative_symmetry,
        })
    }
}

fn intensity_extrema(
    batch: &[[f64; CHANNELS]],
) -> Result<([f64; CHANNELS], [f64; CHANNELS]), CalibrationError> {
    let mut min = [f64::INFINITY; CHANNELS];
    let mut max = [f64::NEG_INFINITY; CHANNELS];
    for sample in batch {
        for channel in 0..CHANNELS {
            min[channel] = min[channel].min(sample[channel]);
            max[channel] = max[channel].max(sample[channel]);
        }
    }
    for channel in 0..CHANNELS {
        if max[channel] <= min[channel] {
            return Err(CalibrationError::ZeroSpan {
                channel: channel + 1,
            });
        }
    }
    Ok((min, max))
}

/// The four phase-band candidates `+-acos(s1) +- acos(sk)` of every sample,
/// wrapped into [0, 2pi).
fn phase_bands(scaled: &[[f64; CHANNELS]], channel: usize) -> Vec<f64> {
    let mut bands = Vec::with_capacity(4 * scaled.len());
    for sample in scaled {
        let first = sample[0].clamp(-1.0, 1.0).acos();
        let other = sample[channel].clamp(-1.0, 1.0).acos();
        for first_sign in [1.0, -1.0] {
            for other_sign in [1.0, -1.0] {
                bands.push((first_sign * first + other_sign * other).rem_euclid(TAU));
            }
        }
    }
    bands
}

fn restrict(bands: &[f64], upper: bool) -> Vec<f64> {
    bands
        .iter()
        .copied()
        .filter(|&phase| (phase > PI) == upper)
        .collect()
}

/// Index of the earliest sign change of one scaled channel.
fn first_zero_crossing(scaled: &[[f64; CHANNELS]], channel: usize) -> Option<usize> {
    scaled.windows(2).position(|pair| {
        (pair[0][channel] > 0.0 && pair[1][channel] < 0.0)
            || (pair[0][channel] < 0.0 && pair[1][channel] > 0.0)
    })
}

/// Center of the most-populated bin of a sqrt(N)-bin histogram over the
/// value range. The first maximum wins on ties.
fn histogram_mode(values: &[f64]) -> f64 {
    let bins = (values.len() as f64).sqrt() as usize;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if bins == 0 || max <= min {
        return min;
    }
    let width = (max - min) / bins as f64;
    let mut counts = vec![0_usize; bins];
    for &value in values {
        let index = (((value - min) / width) as usize).min(bins - 1);
        counts[index] += 1;
    }
    let mut best_count = 0;
    let mut best_index = 0;
    for (index, &count) in counts.iter().enumerate() {
        if count > best_count {
            best_count = count;
            best_index = index;
        }
    }
    min + (best_index as f64 + 0.5) * width
}

/// Worst-to-best ratio of the total phase sensitivity over the batch. A
/// figure near the optimum means the three output phases cover the circle
/// evenly enough that no interferometer state goes blind.
fn symmetry(model: &CalibrationModel, batch: &[[f64; CHANNELS]]) -> (f64, f64) {
    let mut worst = f64::INFINITY;
    let mut best = f64::NEG_INFINITY;
    for dc in batch {
        let mut triple = *dc;
        if model.swapped() {
            triple.swap(1, 2);
        }
        let phase = model.interferometric_phase(triple).radians;
        let mut total = 0.0;
        for channel in 0..CHANNELS {
            let calibration = model.channel(channel);
            let amplitude = (calibration.max_intensity - calibration.min_intensity) / 2.0;
            total += amplitude * (phase - calibration.output_phase).sin().abs();
        }
        worst = worst.min(total);
        best = best.max(total);
    }
    let absolute = worst / best * 100.0;
    (absolute, absolute / OPTIMAL_SYMMETRY * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFSETS: [f64; CHANNELS] = [2.0, 1.5, 1.8];
    const AMPLITUDES: [f64; CHANNELS] = [1.0, 0.8, 1.2];

    /// A downward phase sweep over a few fringes; channel 3 crosses zero
    /// before channel 2, matching the nominal wiring order.
    fn sweep_batch(swap_wiring: bool) -> Vec<[f64; CHANNELS]> {
        let phases = [0.0, NOMINAL_PHASES[0], NOMINAL_PHASES[1]];
        (0..4000)
            .map(|step| {
                let theta = -0.004 * f64::from(step);
                let mut dc = [0.0; CHANNELS];
                for channel in 0..CHANNELS {
                    dc[channel] =
                        OFFSETS[channel] + AMPLITUDES[channel] * (theta - phases[channel]).cos();
                }
                if swap_wiring {
                    dc.swap(1, 2);
                }
                dc
            })
            .collect()
    }

    #[test]
    fn recovers_output_phases_and_bounds() {
        let report = Characterization::new()
            .characterize(&sweep_batch(false))
            .unwrap();
        let model = &report.model;
        assert!(!model.swapped());
        assert!((model.channel(0).output_phase).abs() < 1e-12);
        assert!((model.channel(1).output_phase - NOMINAL_PHASES[0]).abs() < 0.05);
        assert!((model.channel(2).output_phase - NOMINAL_PHASES[1]).abs() < 0.05);
        for channel in 0..CHANNELS {
            let calibration = model.channel(channel);
            assert!(
                (calibration.min_intensity - (OFFSETS[channel] - AMPLITUDES[channel])).abs() < 1e-4
            );
            assert!(
                (calibration.max_intensity - (OFFSETS[channel] + AMPLITUDES[channel])).abs() < 1e-4
            );
        }
        // the sweep is generated with nominal 120-degree phases, so the
        // circle fit should stay at its starting point
        assert!((model.channel(1).system_phase - NOMINAL_PHASES[0]).abs() < 1e-3);
        assert!((model.channel(2).system_phase - NOMINAL_PHASES[1]).abs() < 1e-3);
    }

    #[test]
    fn swapped_wiring_is_detected() {
        let nominal = Characterization::new()
            .characterize(&sweep_batch(false))
            .unwrap();
        let swapped = Characterization::new()
            .characterize(&sweep_batch(true))
            .unwrap();
        assert!(swapped.model.swapped());
        // up to the label exchange, both runs see the same instrument
        for channel in 0..CHANNELS {
            let deviation = swapped.model.channel(channel).output_phase
                - nominal.model.channel(channel).output_phase;
            assert!(deviation.abs() < 1e-9);
        }
    }

    #[test]
    fn ideal_sweep_is_symmetric() {
        // equal amplitudes and exact 120-degree phases: the ideal instrument
        let phases = [0.0, NOMINAL_PHASES[0], NOMINAL_PHASES[1]];
        let batch: Vec<[f64; CHANNELS]> = (0..4000)
            .map(|step| {
                let theta = -0.004 * f64::from(step);
                let mut dc = [0.0; CHANNELS];
                for channel in 0..CHANNELS {
                    dc[channel] = 2.0 + (theta - phases[channel]).cos();
                }
                dc
            })
            .collect();
        let report = Characterization::new().characterize(&batch).unwrap();
        assert!((report.relative_symmetry - 100.0).abs() < 2.0);
        assert!((report.absolute_symmetry - OPTIMAL_SYMMETRY).abs() < 2.0);
    }

    #[test]
    fn unequal_amplitudes_lower_the_symmetry() {
        let report = Characterization::new()
            .characterize(&sweep_batch(false))
            .unwrap();
        assert!(report.absolute_symmetry < 80.0);
        assert!(report.absolute_symmetry > 60.0);
    }

    #[test]
    fn flat_channel_has_zero_span() {
        let mut batch = sweep_batch(false);
        for sample in &mut batch {
            sample[1] = 1.5;
        }
        assert_eq!(
            Characterization::new().characterize(&batch).unwrap_err(),
            CalibrationError::ZeroSpan { channel: 2 }
        );
    }

    #[test]
    fn edge_margin_shields_extrema() {
        let mut batch = sweep_batch(false);
        let tail = batch.len() - 1;
        batch[tail] = [100.0, 100.0, 100.0];
        let report = Characterization::new()
            .edge_margin(10)
            .characterize(&batch)
            .unwrap();
        for channel in 0..CHANNELS {
            assert!(report.model.channel(channel).max_intensity < 10.0);
        }
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert_eq!(
            Characterization::new().characterize(&[]).unwrap_err(),
            CalibrationError::NotEnoughSamples
        );
    }
}
