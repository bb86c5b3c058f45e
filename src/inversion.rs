#![warn(clippy::pedantic)]

use chrono::Local;

use crate::frame::{ChannelDiagnostics, FrameError, LockInResult, PhaseSample, PtiSample, CHANNELS};
use crate::interferometer::CalibrationModel;

/// Below this total weight every channel sits at an insensitive point of its
/// transfer curve and the inversion would divide by noise.
const WEIGHT_FLOOR: f64 = 1e-9;

/// Combines the lock-in result of one frame with the resolved interferometric
/// phase into the PTI signal.
///
/// Each channel contributes its demodulated amplitude, phase-corrected by the
/// channel's system phase and signed by which side of the channel's output
/// phase the interferometer sits on. Channels are weighted by their local
/// phase sensitivity, so a channel near the flat top of its fringe drops out
/// of the average on its own.
///
/// # Errors
/// `FrameError::InsensitivePhase` if the summed weight is vanishingly small.
pub fn invert(
    model: &CalibrationModel,
    phase: PhaseSample,
    lock_in: &LockInResult,
    verbose: bool,
) -> Result<PtiSample, FrameError> {
    let mut pti = 0.0;
    let mut weight = 0.0;
    let mut diagnostics = verbose.then(ChannelDiagnostics::default);
    for channel in 0..CHANNELS {
        let calibration = model.channel(channel);
        let amplitude = lock_in.amplitude(channel);
        let response_phase = lock_in.response_phase(channel);
        let demodulated = amplitude * (response_phase - calibration.system_phase).cos();
        let sensitivity = (phase.radians - calibration.output_phase).sin();
        let sign = if sensitivity >= 0.0 { 1.0 } else { -1.0 };
        pti += demodulated * sign;
        weight +=
            (calibration.max_intensity - calibration.min_intensity) / 2.0 * sensitivity.abs();
        if let Some(diagnostics) = diagnostics.as_mut() {
            diagnostics.amplitude[channel] = amplitude;
            diagnostics.response_phase[channel] = response_phase;
            diagnostics.demodulated[channel] = demodulated;
        }
    }
    if weight < WEIGHT_FLOOR {
        return Err(FrameError::InsensitivePhase { weight });
    }
    Ok(PtiSample {
        time: Local::now(),
        pti_signal: -pti / weight,
        interferometric_phase: phase.radians,
        diagnostics,
    })
}
