#![warn(clippy::pedantic)]

use log::{info, warn};
use rayon::prelude::*;

use crate::decimation::DecimationSetup;
use crate::frame::{FrameError, PtiSample, RawFrame};
use crate::interferometer::CalibrationModel;
use crate::inversion;

/// The per-frame production pipeline: decimation, phase recovery and
/// inversion against one immutable calibration parameter set.
#[derive(Debug, Clone)]
pub struct Pipeline {
    decimation: DecimationSetup,
    model: CalibrationModel,
    verbose: bool,
}

/// Outcome of one batch run. Degenerate frames are skipped, not fatal; the
/// samples of the surviving frames keep their input order.
#[derive(Debug)]
pub struct BatchReport {
    pub samples: Vec<PtiSample>,
    pub skipped: usize,
}

impl Pipeline {
    #[must_use]
    pub fn new(decimation: DecimationSetup, model: CalibrationModel) -> Self {
        Pipeline {
            decimation,
            model,
            verbose: false,
        }
    }

    /// Enables the per-channel diagnostic fields on every emitted sample.
    pub fn verbose(&mut self, verbose: bool) -> &mut Self {
        self.verbose = verbose;
        self
    }

    #[inline]
    #[must_use]
    pub fn model(&self) -> &CalibrationModel {
        &self.model
    }

    /// Processes a single frame into one PTI sample.
    ///
    /// # Errors
    /// Any per-frame `FrameError`; the caller decides whether to skip.
    pub fn process_frame(&self, frame: &RawFrame) -> Result<PtiSample, FrameError> {
        let mut lock_in = self.decimation.demodulate(frame)?;
        if self.model.swapped() {
            lock_in = lock_in.swap_channels();
        }
        let phase = self.model.interferometric_phase(lock_in.dc);
        inversion::invert(&self.model, phase, &lock_in, self.verbose)
    }

    /// Processes a batch of frames in parallel. Frames are independent, so
    /// the work fans out over the rayon pool; the shared model is read-only.
    #[must_use]
    pub fn process_batch(&self, frames: &[RawFrame]) -> BatchReport {
        let results: Vec<Result<PtiSample, FrameError>> = frames
            .par_iter()
            .map(|frame| self.process_frame(frame))
            .collect();
        let mut samples = Vec::with_capacity(results.len());
        let mut skipped = 0;
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(sample) => samples.push(sample),
                Err(error) => {
                    warn!("skipping frame {index}: {error}");
                    skipped += 1;
                }
            }
        }
        if skipped > 0 {
            info!(
                "batch finished: {} samples, {skipped} of {} frames skipped",
                samples.len(),
                frames.len()
            );
        }
        BatchReport { samples, skipped }
    }
}
