// ────────────────────── UNIT CELL ──────────────────────
// One programmable element. Current state chases the target by first-order smoothing.

use std::f64::consts::TAU;

use num_complex::Complex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SMOOTHING: f64 = 0.1;

/// Clamp into `[0, max]`, mapping NaN to 0.
fn bounded(value: f64, max: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitCell {
    x: f64,
    y: f64,
    z: f64,
    max_phase: f64,
    max_amplitude: f64,
    phase: f64,
    amplitude: f64,
    target_phase: f64,
    target_amplitude: f64,
    rate: f64,
}

impl UnitCell {
    pub fn new(x: f64, y: f64) -> Self {
        Self::at(x, y, 0.0)
    }

    pub fn at(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            max_phase: TAU,
            max_amplitude: 1.0,
            phase: 0.0,
            amplitude: 1.0,
            target_phase: 0.0,
            target_amplitude: 1.0,
            rate: DEFAULT_SMOOTHING,
        }
    }

    /// Fraction of the remaining distance covered per `update`. Caller keeps it in (0, 1].
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    pub fn position(&self) -> (f64, f64, f64) {
        (self.x, self.y, self.z)
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn amplitude(&self) -> f64 {
        self.amplitude
    }

    pub fn target(&self) -> (f64, f64) {
        (self.target_phase, self.target_amplitude)
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn max_phase(&self) -> f64 {
        self.max_phase
    }

    pub fn max_amplitude(&self) -> f64 {
        self.max_amplitude
    }

    pub fn set_target(&mut self, phase: f64, amplitude: f64, immediate: bool) {
        self.target_phase = bounded(phase, self.max_phase);
        self.target_amplitude = bounded(amplitude, self.max_amplitude);
        if immediate {
            self.phase = self.target_phase;
            self.amplitude = self.target_amplitude;
        }
    }

    /// One smoothing step toward the target.
    pub fn update(&mut self) {
        self.phase += self.rate * (self.target_phase - self.phase);
        self.amplitude += self.rate * (self.target_amplitude - self.amplitude);
        self.phase = bounded(self.phase, self.max_phase);
        self.amplitude = bounded(self.amplitude, self.max_amplitude);
    }

    /// Complex aperture field `amplitude · e^{iφ}`.
    pub fn field(&self) -> Complex<f64> {
        Complex::from_polar(self.amplitude, self.phase)
    }

    /// Reciprocal two-port transmission matrix of the cell.
    pub fn scattering_matrix(&self) -> [[Complex<f64>; 2]; 2] {
        let t = self.field();
        let zero = Complex::new(0.0, 0.0);
        [[zero, t], [t, zero]]
    }
}
