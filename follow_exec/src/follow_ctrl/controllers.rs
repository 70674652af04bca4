//! # Follow controllers module
//!
//! This module provides the PID controllers used for FollowCtrl.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;
use util::maths::clamp;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A PID controller with a saturated output.
///
/// The integral is only accumulated while the output is not saturated, or when the error would
/// bring the output back out of saturation (conditional integration anti-windup).
#[derive(Debug, Serialize, Clone)]
pub struct PidController {
    /// Proportional gain
    k_p: f64,

    /// Integral gain
    k_i: f64,

    /// Dervative gain
    k_d: f64,

    /// Lower bound of the output
    out_min: f64,

    /// Upper bound of the output
    out_max: f64,

    /// Previous error
    prev_error: Option<f64>,

    /// The integral accumulation
    integral: f64,

    /// True if the last output was limited
    saturated: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PidController {

    /// Create a new controller with the given gains and output bounds.
    pub fn new(k_p: f64, k_i: f64, k_d: f64, out_min: f64, out_max: f64) -> Self {
        Self {
            k_p, k_i, k_d,
            out_min, out_max,
            prev_error: None,
            integral: 0f64,
            saturated: false,
        }
    }

    /// Get the value of the controller for the given error after `dt` seconds.
    ///
    /// A non-finite error, or a non-positive `dt`, leaves the controller's state untouched and
    /// produces the output for a zero error.
    pub fn get(&mut self, error: f64, dt: f64) -> f64 {
        if !error.is_finite() || !dt.is_finite() || dt <= 0.0 {
            return clamp(&(self.k_i * self.integral), &self.out_min, &self.out_max)
        }

        // Derivative is zero on the first sample, a jump from nothing isn't a rate
        let deriv = match self.prev_error {
            Some(e) => (error - e) / dt,
            None => 0f64
        };

        let candidate_integral = self.integral + error * dt;

        let unsat =
            self.k_p * error
            + self.k_i * candidate_integral
            + self.k_d * deriv;
        let out = clamp(&unsat, &self.out_min, &self.out_max);

        // Only keep integrating if not saturated, or if the integral would unwind the saturation
        let winding_up =
            (unsat > self.out_max && error * self.k_i > 0.0)
            || (unsat < self.out_min && error * self.k_i < 0.0);
        if !winding_up && candidate_integral.is_finite() {
            self.integral = candidate_integral;
        }

        self.saturated = unsat != out;
        self.prev_error = Some(error);

        out
    }

    /// Clear the integral and derivative history.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = None;
        self.saturated = false;
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn is_saturated(&self) -> bool {
        self.saturated
    }
}
