// ────────────────────── CONFIGURATION ──────────────────────
// Every recognised option, with defaults. Validated once, before any tick runs.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::beam::BeamCommand;
use crate::control::BeamPresets;
use crate::error::{MetasurfaceError, MetasurfaceResult};
use crate::filter::FilterBand;
use crate::grid::GridSpec;

/// Fastest supported control loop, in Hz.
pub const MAX_UPDATE_RATE: f64 = 1000.0;
/// Longest supported EEG analysis buffer, in seconds.
pub const MAX_BUFFER_SECONDS: f64 = 600.0;
/// Longest `stop()` is allowed to block, in milliseconds.
pub const MAX_STOP_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Array rows, fixed at construction.
    pub rows: usize,
    /// Array columns, fixed at construction.
    pub cols: usize,
    /// Element pitch as a fraction of the wavelength.
    pub cell_spacing: f64,
    /// Carrier frequency in Hz.
    pub carrier_frequency: f64,
    /// Control loop frequency in Hz.
    pub update_rate: f64,
    /// EEG sample rate in Hz, fixed for the session.
    pub sample_rate: f64,
    /// EEG channel count, fixed for the session.
    pub channels: usize,
    /// Length of the EEG analysis buffer in seconds.
    pub buffer_seconds: f64,
    /// Per-tick interpolation fraction in (0, 1].
    pub smoothing_rate: f64,
    /// Scores below this are `Low`.
    pub low_threshold: f64,
    /// Scores above this are `High`.
    pub high_threshold: f64,
    /// Upper bound on how long `stop()` waits for the worker.
    pub stop_timeout_ms: u64,
    pub presets: BeamPresets,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            rows: 16,
            cols: 16,
            cell_spacing: 0.5,
            carrier_frequency: 10e9,
            update_rate: 10.0,
            sample_rate: 256.0,
            channels: 8,
            buffer_seconds: 2.0,
            smoothing_rate: 0.1,
            low_threshold: 30.0,
            high_threshold: 70.0,
            stop_timeout_ms: 1000,
            presets: BeamPresets::default(),
        }
    }
}

fn check_command(name: &str, command: &BeamCommand) -> MetasurfaceResult<()> {
    match *command {
        BeamCommand::Steer {
            azimuth,
            elevation,
            focus,
        } => {
            if !(azimuth.is_finite() && elevation.is_finite()) {
                return Err(MetasurfaceError::Config(format!(
                    "{name} preset angles must be finite"
                )));
            }
            if !(0.0..=1.0).contains(&focus) {
                return Err(MetasurfaceError::Config(format!(
                    "{name} preset focus must be in [0, 1], got {focus}"
                )));
            }
        }
        BeamCommand::Vortex { radius, .. } => {
            if let Some(r) = radius {
                if !(r.is_finite() && r > 0.0) {
                    return Err(MetasurfaceError::Config(format!(
                        "{name} preset vortex radius must be > 0, got {r}"
                    )));
                }
            }
        }
    }
    Ok(())
}

impl ControllerConfig {
    pub fn grid_spec(&self) -> GridSpec {
        GridSpec {
            rows: self.rows,
            cols: self.cols,
            cell_spacing: self.cell_spacing,
            carrier_frequency: self.carrier_frequency,
            smoothing_rate: self.smoothing_rate,
        }
    }

    /// Period of one tick. Saturates for rates `validate()` would reject.
    pub fn tick_interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.update_rate).unwrap_or(Duration::MAX)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> MetasurfaceResult<()> {
        self.grid_spec().validate()?;

        if !(self.update_rate > 0.0 && self.update_rate <= MAX_UPDATE_RATE) {
            return Err(MetasurfaceError::Config(format!(
                "update_rate must be in (0, {MAX_UPDATE_RATE}] Hz, got {}",
                self.update_rate
            )));
        }
        if Duration::try_from_secs_f64(1.0 / self.update_rate).is_err() {
            return Err(MetasurfaceError::Config(format!(
                "update_rate {} gives an unrepresentable tick period",
                self.update_rate
            )));
        }
        let (_, top) = FilterBand::Gamma.edges();
        if !(self.sample_rate.is_finite() && self.sample_rate > 2.0 * top) {
            return Err(MetasurfaceError::Config(format!(
                "sample_rate must exceed {} Hz to resolve the gamma band, got {}",
                2.0 * top,
                self.sample_rate
            )));
        }
        if self.channels == 0 {
            return Err(MetasurfaceError::Config("channels must be > 0".to_string()));
        }
        if !(0.5..=MAX_BUFFER_SECONDS).contains(&self.buffer_seconds) {
            return Err(MetasurfaceError::Config(format!(
                "buffer_seconds must be in [0.5, {MAX_BUFFER_SECONDS}], got {}",
                self.buffer_seconds
            )));
        }
        if !(0.0 <= self.low_threshold
            && self.low_threshold <= self.high_threshold
            && self.high_threshold <= 100.0)
        {
            return Err(MetasurfaceError::Config(format!(
                "thresholds must satisfy 0 <= low <= high <= 100, got {} / {}",
                self.low_threshold, self.high_threshold
            )));
        }
        if !(1..=MAX_STOP_TIMEOUT_MS).contains(&self.stop_timeout_ms) {
            return Err(MetasurfaceError::Config(format!(
                "stop_timeout_ms must be in [1, {MAX_STOP_TIMEOUT_MS}], got {}",
                self.stop_timeout_ms
            )));
        }
        check_command("low", &self.presets.low)?;
        check_command("medium", &self.presets.medium)?;
        check_command("high", &self.presets.high)?;
        Ok(())
    }

    /// Load from JSON string. Missing fields take their defaults.
    pub fn from_json(json: &str) -> MetasurfaceResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| MetasurfaceError::Config(format!("JSON parse error: {e}")))
    }

    pub fn load(path: impl AsRef<Path>) -> MetasurfaceResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            MetasurfaceError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
    }
}
