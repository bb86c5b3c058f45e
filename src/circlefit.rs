#![warn(clippy::pedantic)]
#![allow(clippy::similar_names)]
#![allow(clippy::cast_precision_loss)]

use std::f64::consts::TAU;

use crate::frame::CHANNELS;
use crate::interferometer::CalibrationError;

/// Minimizes the circle-variance objective over a pair of phase offsets.
///
/// For candidate offsets (x, y) the three scaled detector intensities of one
/// sample combine into the point
/// `P = (s1 + s2 cos x + s3 cos y, s2 sin x + s3 sin y)`. On a correctly
/// phased interferometer every sample lands on a circle of fixed radius, so
/// the variance of `|P|^2` over the batch is minimal at the true offsets. The
/// objective is smooth with an exact analytic gradient, which drives a
/// Fletcher-Reeves conjugate-gradient descent with a backtracking line
/// search.
#[derive(Debug, Clone, Copy)]
pub struct FitSetup {
    pub step_size: f64,
    pub armijo_tolerance: f64,
    pub gradient_tolerance: f64,
    pub max_iterations: u32,
}

/// Nominal design phases of the three-detector interferometer, 120 degrees
/// apart; the standard starting point of the descent.
pub const NOMINAL_PHASES: [f64; 2] = [TAU / 3.0, 2.0 * TAU / 3.0];

const MAX_HALVINGS: u32 = 60;

#[derive(Debug, Clone, Copy)]
pub struct FitResult {
    /// Converged phase offsets, wrapped into [0, 2pi).
    pub phases: [f64; 2],
    /// Final value of the circle-variance objective.
    pub objective: f64,
    pub n_iterations: u32,
}

impl Default for FitSetup {
    fn default() -> Self {
        Self::new()
    }
}

impl FitSetup {
    #[must_use]
    pub fn new() -> Self {
        FitSetup {
            step_size: 8e-2,
            armijo_tolerance: 1e-4,
            gradient_tolerance: 1e-4,
            max_iterations: 1000,
        }
    }

    pub fn step_size(&mut self, step: f64) -> &mut Self {
        self.step_size = step;
        self
    }

    pub fn gradient_tolerance(&mut self, tolerance: f64) -> &mut Self {
        self.gradient_tolerance = tolerance;
        self
    }

    pub fn max_iterations(&mut self, iterations: u32) -> &mut Self {
        self.max_iterations = iterations;
        self
    }

    /// Runs the descent from `guess` over a batch of scaled intensity
    /// triples, one slice per channel.
    ///
    /// # Errors
    /// `CalibrationError::Convergence` if the gradient test is still not met
    /// after `max_iterations`, carrying the last achieved objective value.
    pub fn fit(
        &self,
        signals: [&[f64]; CHANNELS],
        guess: [f64; 2],
    ) -> Result<FitResult, CalibrationError> {
        let mut point = guess;
        let (mut value, mut gradient) = objective_and_gradient(signals, point);
        let mut direction = [-gradient[0], -gradient[1]];
        let mut gradient_norm_sq = gradient[0] * gradient[0] + gradient[1] * gradient[1];

        for iteration in 0..self.max_iterations {
            if gradient_norm_sq.sqrt() < self.gradient_tolerance {
                return Ok(FitResult {
                    phases: [point[0].rem_euclid(TAU), point[1].rem_euclid(TAU)],
                    objective: value,
                    n_iterations: iteration,
                });
            }

            let mut slope = gradient[0] * direction[0] + gradient[1] * direction[1];
            if slope >= 0.0 {
                // conjugacy lost; restart along steepest descent
                direction = [-gradient[0], -gradient[1]];
                slope = -gradient_norm_sq;
            }

            let mut step = self.step_size;
            let mut next = step_along(point, direction, step);
            let mut next_value = objective(signals, next);
            let mut halvings = 0;
            while next_value > value + self.armijo_tolerance * step * slope
                && halvings < MAX_HALVINGS
            {
                step *= 0.5;
                next = step_along(point, direction, step);
                next_value = objective(signals, next);
                halvings += 1;
            }
            if next_value > value {
                // no usable step in this direction; retry from steepest descent
                direction = [-gradient[0], -gradient[1]];
                continue;
            }

            point = next;
            let (new_value, new_gradient) = objective_and_gradient(signals, point);
            let new_norm_sq = new_gradient[0] * new_gradient[0] + new_gradient[1] * new_gradient[1];
            let beta = new_norm_sq / gradient_norm_sq;
            direction = [
                beta * direction[0] - new_gradient[0],
                beta * direction[1] - new_gradient[1],
            ];
            value = new_value;
            gradient = new_gradient;
            gradient_norm_sq = new_norm_sq;
        }

        Err(CalibrationError::Convergence {
            iterations: self.max_iterations,
            objective: value,
        })
    }
}

#[inline]
fn step_along(point: [f64; 2], direction: [f64; 2], step: f64) -> [f64; 2] {
    [point[0] + step * direction[0], point[1] + step * direction[1]]
}

/// Squared radius of one sample's combined point, together with its partial
/// derivatives with respect to the two phase offsets.
#[inline]
fn point_terms(s1: f64, s2: f64, s3: f64, trig: [f64; 4]) -> (f64, f64, f64) {
    let [sin_x, cos_x, sin_y, cos_y] = trig;
    let px = s1 + s2 * cos_x + s3 * cos_y;
    let py = s2 * sin_x + s3 * sin_y;
    let phi = px * px + py * py;
    let psi_x = 2.0 * s2 * (py * cos_x - px * sin_x);
    let psi_y = 2.0 * s3 * (py * cos_y - px * sin_y);
    (phi, psi_x, psi_y)
}

#[inline]
fn trig(point: [f64; 2]) -> [f64; 4] {
    let (sin_x, cos_x) = point[0].sin_cos();
    let (sin_y, cos_y) = point[1].sin_cos();
    [sin_x, cos_x, sin_y, cos_y]
}

fn objective(signals: [&[f64]; CHANNELS], point: [f64; 2]) -> f64 {
    let trig = trig(point);
    let count = signals[0].len() as f64;
    let mut mean = 0.0;
    for i in 0..signals[0].len() {
        mean += point_terms(signals[0][i], signals[1][i], signals[2][i], trig).0;
    }
    mean /= count;
    let mut variance = 0.0;
    for i in 0..signals[0].len() {
        let phi = point_terms(signals[0][i], signals[1][i], signals[2][i], trig).0;
        variance += (phi - mean) * (phi - mean);
    }
    variance / count
}

/// Variance of the squared radii and its exact gradient. Both the radii and
/// their derivatives enter centred, since the batch mean itself moves with
/// the offsets.
fn objective_and_gradient(signals: [&[f64]; CHANNELS], point: [f64; 2]) -> (f64, [f64; 2]) {
    let trig = trig(point);
    let count = signals[0].len() as f64;
    let mut mean_phi = 0.0;
    let mut mean_psi_x = 0.0;
    let mut mean_psi_y = 0.0;
    for i in 0..signals[0].len() {
        let (phi, psi_x, psi_y) =
            point_terms(signals[0][i], signals[1][i], signals[2][i], trig);
        mean_phi += phi;
        mean_psi_x += psi_x;
        mean_psi_y += psi_y;
    }
    mean_phi /= count;
    mean_psi_x /= count;
    mean_psi_y /= count;

    let mut variance = 0.0;
    let mut gradient_x = 0.0;
    let mut gradient_y = 0.0;
    for i in 0..signals[0].len() {
        let (phi, psi_x, psi_y) =
            point_terms(signals[0][i], signals[1][i], signals[2][i], trig);
        let centred = phi - mean_phi;
        variance += centred * centred;
        gradient_x += centred * (psi_x - mean_psi_x);
        gradient_y += centred * (psi_y - mean_psi_y);
    }
    (
        variance / count,
        [2.0 * gradient_x / count, 2.0 * gradient_y / count],
    )
}
