#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::needless_range_loop)]

use std::f64::consts::PI;

use crate::frame::{FrameError, LockInResult, RawFrame, CHANNELS};

/// Gain and edge-detection parameters for the decimation stage. The
/// amplification factor is the fixed hardware gain of the AC signal path; the
/// thresholds are fractions of the reference channel's observed range.
#[derive(Debug, Clone, Copy)]
pub struct DecimationSetup {
    pub amplification: f64,
    low_threshold: f64,
    high_threshold: f64,
}

impl Default for DecimationSetup {
    fn default() -> Self {
        Self::new()
    }
}

impl DecimationSetup {
    #[must_use]
    pub fn new() -> Self {
        DecimationSetup {
            amplification: 100.0,
            low_threshold: 0.1,
            high_threshold: 0.9,
        }
    }

    pub fn amplification(&mut self, gain: f64) -> &mut Self {
        self.amplification = gain;
        self
    }

    pub fn thresholds(&mut self, low: f64, high: f64) -> &mut Self {
        self.low_threshold = low;
        self.high_threshold = high;
        self
    }

    /// Synthesizes the sine/cosine lock-in references from the digital
    /// modulation reference of one frame. Transition indices of the
    /// (normalized) reference give the phase-shift origin; the modulation
    /// period is twice the mean spacing between consecutive transitions,
    /// which averages out clock jitter.
    ///
    /// # Errors
    /// `FrameError::NoModulation` if fewer than two threshold transitions are
    /// found (flat reference included).
    pub fn synthesize_references(
        &self,
        reference: &[f64],
    ) -> Result<(Vec<f64>, Vec<f64>), FrameError> {
        let transitions = self.reference_transitions(reference);
        if transitions.len() < 2 {
            return Err(FrameError::NoModulation);
        }
        let phase_shift = transitions[0] as f64;
        let spacing: usize = transitions.windows(2).map(|pair| pair[1] - pair[0]).sum();
        let period = 2.0 * spacing as f64 / (transitions.len() - 1) as f64;
        let omega = 2.0 * PI / period;
        let in_phase = (0..reference.len())
            .map(|i| (omega * (i as f64 - phase_shift)).sin())
            .collect();
        let quadrature = (0..reference.len())
            .map(|i| (omega * (i as f64 - phase_shift)).cos())
            .collect();
        Ok((in_phase, quadrature))
    }

    fn reference_transitions(&self, reference: &[f64]) -> Vec<usize> {
        let min = reference.iter().copied().fold(f64::INFINITY, f64::min);
        let max = reference.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if max <= min {
            return Vec::new();
        }
        let low = min + self.low_threshold * (max - min);
        let high = min + self.high_threshold * (max - min);
        let mut transitions = Vec::new();
        for (index, pair) in reference.windows(2).enumerate() {
            let rising = pair[0] < low && pair[1] > high;
            let falling = pair[0] > high && pair[1] < low;
            if rising || falling {
                transitions.push(index);
            }
        }
        transitions
    }

    /// Runs the full decimation pass over one frame: DC averaging,
    /// common-mode noise rejection, reference synthesis and lock-in
    /// correlation of all three AC channels.
    ///
    /// # Errors
    /// `FrameError::NoLight` for a frame with zero total DC intensity,
    /// `FrameError::NoModulation` if the reference never crosses the
    /// detection thresholds.
    pub fn demodulate(&self, frame: &RawFrame) -> Result<LockInResult, FrameError> {
        let dc = dc_means(frame);
        let ac = reject_common_noise(frame, &dc)?;
        let (in_phase, quadrature) = self.synthesize_references(frame.reference())?;
        let norm = frame.samples() as f64 * self.amplification;
        let mut result = LockInResult {
            dc,
            ..LockInResult::default()
        };
        for channel in 0..CHANNELS {
            let mut x = 0.0;
            let mut y = 0.0;
            for ((sample, reference_i), reference_q) in
                ac[channel].iter().zip(&in_phase).zip(&quadrature)
            {
                x += sample * reference_i;
                y += sample * reference_q;
            }
            result.in_phase[channel] = x / norm;
            result.quadrature[channel] = y / norm;
        }
        Ok(result)
    }
}

/// Plain mean of each DC channel over the frame.
#[must_use]
pub fn dc_means(frame: &RawFrame) -> [f64; CHANNELS] {
    let samples = frame.samples() as f64;
    let mut means = [0.0; CHANNELS];
    for (channel, mean) in means.iter_mut().enumerate() {
        *mean = frame.dc(channel).iter().sum::<f64>() / samples;
    }
    means
}

/// Removes intensity noise correlated with the total optical power. Each
/// channel's share of the summed AC disturbance is taken proportional to its
/// share of the total DC intensity. Returns corrected copies; the caller's
/// frame is left untouched.
///
/// # Errors
/// `FrameError::NoLight` if the summed DC intensity is zero.
pub fn reject_common_noise(
    frame: &RawFrame,
    dc: &[f64; CHANNELS],
) -> Result<[Vec<f64>; CHANNELS], FrameError> {
    let total_dc: f64 = dc.iter().sum();
    if total_dc == 0.0 {
        return Err(FrameError::NoLight);
    }
    let mut corrected = [
        frame.ac(0).to_vec(),
        frame.ac(1).to_vec(),
        frame.ac(2).to_vec(),
    ];
    for sample in 0..frame.samples() {
        let noise = frame.ac(0)[sample] + frame.ac(1)[sample] + frame.ac(2)[sample];
        for (channel, buffer) in corrected.iter_mut().enumerate() {
            buffer[sample] -= dc[channel] / total_dc * noise;
        }
    }
    Ok(corrected)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: usize = 1000;
    const PERIOD: usize = 100;

    fn square_reference() -> Vec<f64> {
        (0..SAMPLES)
            .map(|i| if i % PERIOD < PERIOD / 2 { 1.0 } else { 0.0 })
            .collect()
    }

    /// Three AC channels 120 degrees apart sum to zero at every sample, so
    /// the common-mode rejection leaves them untouched.
    fn three_phase_frame(amplitude: f64, theta: f64) -> RawFrame {
        let omega = 2.0 * PI / PERIOD as f64;
        let phase_shift = 49.0;
        let ac_channel = |offset: f64| -> Vec<f64> {
            (0..SAMPLES)
                .map(|i| amplitude * (omega * (i as f64 - phase_shift) + theta + offset).sin())
                .collect()
        };
        RawFrame::new(
            [vec![1.0; SAMPLES], vec![1.0; SAMPLES], vec![1.0; SAMPLES]],
            [
                ac_channel(0.0),
                ac_channel(2.0 * PI / 3.0),
                ac_channel(4.0 * PI / 3.0),
            ],
            square_reference(),
        )
        .unwrap()
    }

    #[test]
    fn recovers_period_and_phase_origin() {
        let setup = DecimationSetup::new();
        let (in_phase, _) = setup.synthesize_references(&square_reference()).unwrap();
        // first transition is between samples 49 and 50
        assert!(in_phase[49].abs() < 1e-12);
        // one full synthesized period later the reference repeats
        assert!((in_phase[149] - in_phase[49]).abs() < 1e-9);
    }

    #[test]
    fn demodulation_round_trip() {
        let theta = 0.7;
        let mut setup = DecimationSetup::new();
        // gain of 1/2 cancels the factor 2 of sine-against-sine correlation
        setup.amplification(0.5);
        let result = setup.demodulate(&three_phase_frame(1.0, theta)).unwrap();
        for channel in 0..CHANNELS {
            let expected_phase = theta + channel as f64 * 2.0 * PI / 3.0;
            assert!((result.amplitude(channel) - 1.0).abs() < 1e-6);
            let deviation = result.response_phase(channel) - expected_phase;
            assert!(deviation.sin().abs() < 1e-6 && deviation.cos() > 0.0);
            assert!((result.dc[channel] - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn round_trip_survives_detector_noise() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let theta = -0.4;
        let clean = three_phase_frame(1.0, theta);
        let mut noisy_ac = [
            clean.ac(0).to_vec(),
            clean.ac(1).to_vec(),
            clean.ac(2).to_vec(),
        ];
        for channel in &mut noisy_ac {
            for sample in channel.iter_mut() {
                *sample += rng.gen_range(-0.01..0.01);
            }
        }
        let frame = RawFrame::new(
            [vec![1.0; SAMPLES], vec![1.0; SAMPLES], vec![1.0; SAMPLES]],
            noisy_ac,
            square_reference(),
        )
        .unwrap();
        let mut setup = DecimationSetup::new();
        setup.amplification(0.5);
        let result = setup.demodulate(&frame).unwrap();
        for channel in 0..CHANNELS {
            let expected_phase = theta + channel as f64 * 2.0 * PI / 3.0;
            assert!((result.amplitude(channel) - 1.0).abs() < 0.01);
            let deviation = result.response_phase(channel) - expected_phase;
            assert!(deviation.sin().abs() < 0.01 && deviation.cos() > 0.0);
        }
    }

    #[test]
    fn common_disturbance_is_cancelled() {
        let clean = three_phase_frame(1.0, 0.3);
        let mut noisy_ac = [
            clean.ac(0).to_vec(),
            clean.ac(1).to_vec(),
            clean.ac(2).to_vec(),
        ];
        for sample in 0..SAMPLES {
            // slow common-mode drift on every detector
            let disturbance = 0.5 * (0.013 * sample as f64).sin();
            for channel in &mut noisy_ac {
                channel[sample] += disturbance;
            }
        }
        let noisy = RawFrame::new(
            [vec![1.0; SAMPLES], vec![1.0; SAMPLES], vec![1.0; SAMPLES]],
            noisy_ac,
            square_reference(),
        )
        .unwrap();
        let dc = dc_means(&noisy);
        let corrected = reject_common_noise(&noisy, &dc).unwrap();
        for channel in 0..CHANNELS {
            for (corrected_sample, clean_sample) in corrected[channel].iter().zip(clean.ac(channel))
            {
                assert!((corrected_sample - clean_sample).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn dark_frame_is_degenerate() {
        let frame = RawFrame::new(
            [vec![0.0; SAMPLES], vec![0.0; SAMPLES], vec![0.0; SAMPLES]],
            [vec![0.0; SAMPLES], vec![0.0; SAMPLES], vec![0.0; SAMPLES]],
            square_reference(),
        )
        .unwrap();
        assert_eq!(
            DecimationSetup::new().demodulate(&frame).unwrap_err(),
            FrameError::NoLight
        );
    }

    #[test]
    fn flat_reference_is_degenerate() {
        let frame = RawFrame::new(
            [vec![1.0; SAMPLES], vec![1.0; SAMPLES], vec![1.0; SAMPLES]],
            [vec![0.0; SAMPLES], vec![0.0; SAMPLES], vec![0.0; SAMPLES]],
            vec![0.5; SAMPLES],
        )
        .unwrap();
        assert_eq!(
            DecimationSetup::new().demodulate(&frame).unwrap_err(),
            FrameError::NoModulation
        );
    }

    #[test]
    fn subthreshold_reference_is_degenerate() {
        // slowly drifting reference: no adjacent-sample swing ever spans the
        // 0.1/0.9 band edges
        let reference: Vec<f64> = (0..SAMPLES).map(|i| (0.01 * i as f64).sin()).collect();
        let frame = RawFrame::new(
            [vec![1.0; SAMPLES], vec![1.0; SAMPLES], vec![1.0; SAMPLES]],
            [vec![0.0; SAMPLES], vec![0.0; SAMPLES], vec![0.0; SAMPLES]],
            reference,
        )
        .unwrap();
        assert_eq!(
            DecimationSetup::new().demodulate(&frame).unwrap_err(),
            FrameError::NoModulation
        );
    }
}
