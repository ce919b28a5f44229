// ────────────────────── EEG FRAMES ──────────────────────
// One frame from the acquisition side: C channels × N samples at a fixed rate.

use num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

use crate::error::{MetasurfaceError, MetasurfaceResult};

/// Cortical rhythm bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BrainwaveBand {
    /// 0.5–4 Hz, deep sleep.
    Delta,
    /// 4–8 Hz, drowsiness and meditation.
    Theta,
    /// 8–13 Hz, relaxed alertness.
    Alpha,
    /// 13–30 Hz, active thinking.
    Beta,
    /// 30–100 Hz, peak concentration.
    Gamma,
}

impl BrainwaveBand {
    pub const ALL: [BrainwaveBand; 5] = [
        BrainwaveBand::Delta,
        BrainwaveBand::Theta,
        BrainwaveBand::Alpha,
        BrainwaveBand::Beta,
        BrainwaveBand::Gamma,
    ];

    /// Inclusive spectral range in Hz used for FFT band power.
    pub fn range(self) -> (f64, f64) {
        match self {
            BrainwaveBand::Delta => (0.5, 4.0),
            BrainwaveBand::Theta => (4.0, 8.0),
            BrainwaveBand::Alpha => (8.0, 13.0),
            BrainwaveBand::Beta => (13.0, 30.0),
            BrainwaveBand::Gamma => (30.0, 100.0),
        }
    }
}

/// A block of EEG samples with a capture timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EegSample {
    /// Monotonic capture time in seconds.
    pub timestamp: f64,
    /// `channels[c][n]` in microvolts.
    pub channels: Vec<Vec<f64>>,
    /// Hz.
    pub sample_rate: f64,
}

impl EegSample {
    pub fn new(timestamp: f64, channels: Vec<Vec<f64>>, sample_rate: f64) -> Self {
        Self {
            timestamp,
            channels,
            sample_rate,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel. Zero for a frame with no channels.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frobenius norm of the channel matrix.
    pub fn norm(&self) -> f64 {
        self.channels
            .iter()
            .flatten()
            .map(|v| v * v)
            .sum::<f64>()
            .sqrt()
    }

    /// Checks the frame is rectangular, non-empty and finite.
    pub fn validate_shape(&self) -> MetasurfaceResult<()> {
        if self.channels.is_empty() {
            return Err(MetasurfaceError::InvalidSample(
                "frame has no channels".to_string(),
            ));
        }
        let n = self.len();
        if n == 0 {
            return Err(MetasurfaceError::InvalidSample(
                "frame has no samples".to_string(),
            ));
        }
        if let Some(c) = self.channels.iter().position(|ch| ch.len() != n) {
            return Err(MetasurfaceError::InvalidSample(format!(
                "channel {c} has {} samples, expected {n}",
                self.channels[c].len()
            )));
        }
        if !self.timestamp.is_finite() {
            return Err(MetasurfaceError::InvalidSample(format!(
                "non-finite timestamp {}",
                self.timestamp
            )));
        }
        if self.channels.iter().flatten().any(|v| !v.is_finite()) {
            return Err(MetasurfaceError::InvalidSample(
                "frame contains NaN/Inf".to_string(),
            ));
        }
        Ok(())
    }

    /// Spectral power in `band`, summed over channels.
    ///
    /// Sums `|X[k]|²` over the non-negative FFT bins whose frequency falls inside
    /// the band. A single-sample channel contributes its squared value.
    pub fn band_power(&self, band: BrainwaveBand) -> f64 {
        let (low, high) = band.range();
        let mut planner = FftPlanner::<f64>::new();
        let mut total = 0.0;

        for channel in &self.channels {
            let n = channel.len();
            if n == 0 {
                continue;
            }
            if n == 1 {
                total += channel[0] * channel[0];
                continue;
            }

            let fft = planner.plan_fft_forward(n);
            let mut buf: Vec<Complex<f64>> =
                channel.iter().map(|&v| Complex::new(v, 0.0)).collect();
            fft.process(&mut buf);

            // Only bins 0..=(n-1)/2 carry non-negative frequencies.
            let resolution = self.sample_rate / n as f64;
            total += buf
                .iter()
                .take((n - 1) / 2 + 1)
                .enumerate()
                .filter(|(k, _)| {
                    let f = *k as f64 * resolution;
                    f >= low && f <= high
                })
                .map(|(_, x)| x.norm_sqr())
                .sum::<f64>();
        }

        total
    }

    /// Power in every band, in `BrainwaveBand::ALL` order.
    pub fn band_spectrum(&self) -> Vec<(BrainwaveBand, f64)> {
        BrainwaveBand::ALL
            .iter()
            .map(|&b| (b, self.band_power(b)))
            .collect()
    }

    /// Band with the highest spectral power, if any channel carries signal.
    pub fn dominant_band(&self) -> Option<BrainwaveBand> {
        self.band_spectrum()
            .into_iter()
            .filter(|(_, p)| *p > 0.0)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(band, _)| band)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    fn tone(freq: f64, fs: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| (TAU * freq * i as f64 / fs).sin()).collect()
    }

    #[test]
    fn test_band_power_locates_tone() {
        let fs = 256.0;
        let sample = EegSample::new(0.0, vec![tone(10.0, fs, 256)], fs);
        let alpha = sample.band_power(BrainwaveBand::Alpha);
        let beta = sample.band_power(BrainwaveBand::Beta);
        assert!(alpha > 1000.0, "alpha={alpha}");
        assert!(beta < 1e-6 * alpha, "beta={beta} leaked");
        assert_eq!(sample.dominant_band(), Some(BrainwaveBand::Alpha));
    }

    #[test]
    fn test_band_power_single_sample_channel() {
        let sample = EegSample::new(0.0, vec![vec![3.0], vec![-2.0]], 256.0);
        assert!((sample.band_power(BrainwaveBand::Beta) - 13.0).abs() < 1e-12);
    }

    #[test]
    fn test_validate_shape_rejects_ragged() {
        let sample = EegSample::new(0.0, vec![vec![0.0; 4], vec![0.0; 3]], 256.0);
        assert!(matches!(
            sample.validate_shape(),
            Err(MetasurfaceError::InvalidSample(_))
        ));
    }

    #[test]
    fn test_validate_shape_rejects_nan() {
        let sample = EegSample::new(0.0, vec![vec![0.0, f64::NAN]], 256.0);
        assert!(sample.validate_shape().is_err());
        let empty = EegSample::new(0.0, vec![], 256.0);
        assert!(empty.validate_shape().is_err());
    }

    #[test]
    fn test_norm() {
        let sample = EegSample::new(0.0, vec![vec![3.0], vec![4.0]], 256.0);
        assert!((sample.norm() - 5.0).abs() < 1e-12);
    }
}
