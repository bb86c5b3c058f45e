#![warn(clippy::pedantic)]

use chrono::{DateTime, Local};
use thiserror::Error;

/// Three-detector interferometer; every per-channel array in the crate has
/// exactly this many entries.
pub const CHANNELS: usize = 3;

/// Per-frame conditions that make a single measurement cycle unusable. These
/// are reported and the frame is skipped; they are never fatal to a batch.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum FrameError {
    #[error("no light detected: total DC intensity is zero")]
    NoLight,
    #[error("no modulation signal found on the reference channel")]
    NoModulation,
    #[error("all channels near an insensitive point (total weight {weight:.3e})")]
    InsensitivePhase { weight: f64 },
    #[error("channel sample count mismatch: expected {expected}, got {got}")]
    ChannelMismatch { expected: usize, got: usize },
    #[error("frame contains no samples")]
    Empty,
}

/// One acquisition cycle of raw detector samples: three DC-coupled channels,
/// three AC-coupled channels and the digital modulation reference, all sampled
/// synchronously. Owned by the caller and read-only to the processing core.
#[derive(Debug, Clone)]
pub struct RawFrame {
    dc: [Vec<f64>; CHANNELS],
    ac: [Vec<f64>; CHANNELS],
    reference: Vec<f64>,
}

impl RawFrame {
    /// # Errors
    /// `FrameError::Empty` if the reference channel holds no samples,
    /// `FrameError::ChannelMismatch` if any channel disagrees on sample count.
    pub fn new(
        dc: [Vec<f64>; CHANNELS],
        ac: [Vec<f64>; CHANNELS],
        reference: Vec<f64>,
    ) -> Result<Self, FrameError> {
        let expected = reference.len();
        if expected == 0 {
            return Err(FrameError::Empty);
        }
        for buffer in dc.iter().chain(ac.iter()) {
            if buffer.len() != expected {
                return Err(FrameError::ChannelMismatch {
                    expected,
                    got: buffer.len(),
                });
            }
        }
        Ok(RawFrame { dc, ac, reference })
    }

    #[inline]
    #[must_use]
    pub fn samples(&self) -> usize {
        self.reference.len()
    }

    #[inline]
    #[must_use]
    pub fn dc(&self, channel: usize) -> &[f64] {
        &self.dc[channel]
    }

    #[inline]
    #[must_use]
    pub fn ac(&self, channel: usize) -> &[f64] {
        &self.ac[channel]
    }

    #[inline]
    #[must_use]
    pub fn reference(&self) -> &[f64] {
        &self.reference
    }
}

/// Output of the lock-in stage for one frame: the in-phase and quadrature
/// amplitudes of each AC channel plus the plain mean of each DC channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockInResult {
    pub in_phase: [f64; CHANNELS],
    pub quadrature: [f64; CHANNELS],
    pub dc: [f64; CHANNELS],
}

impl LockInResult {
    #[inline]
    #[must_use]
    pub fn amplitude(&self, channel: usize) -> f64 {
        self.in_phase[channel].hypot(self.quadrature[channel])
    }

    /// Response phase of one AC channel, in (-pi, pi].
    #[inline]
    #[must_use]
    pub fn response_phase(&self, channel: usize) -> f64 {
        self.quadrature[channel].atan2(self.in_phase[channel])
    }

    /// Exchanges channels 2 and 3, for frames captured with the detector
    /// wiring swapped relative to the characterised order.
    #[must_use]
    pub fn swap_channels(mut self) -> Self {
        self.in_phase.swap(1, 2);
        self.quadrature.swap(1, 2);
        self.dc.swap(1, 2);
        self
    }
}

/// One recovered interferometric phase, wrapped via `atan2` into (-pi, pi].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseSample {
    pub radians: f64,
}

/// Per-channel intermediate values of the inversion, carried only when
/// verbose diagnostics are requested.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelDiagnostics {
    /// Lock-in amplitude R of each channel.
    pub amplitude: [f64; CHANNELS],
    /// Response phase atan2(Y, X) of each channel.
    pub response_phase: [f64; CHANNELS],
    /// Demodulated contribution of each channel before sign weighting.
    pub demodulated: [f64; CHANNELS],
}

/// The final record for one measurement cycle.
#[derive(Debug, Clone)]
pub struct PtiSample {
    pub time: DateTime<Local>,
    pub pti_signal: f64,
    pub interferometric_phase: f64,
    pub diagnostics: Option<ChannelDiagnostics>,
}
