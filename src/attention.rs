// ────────────────────── ATTENTION EXTRACTOR ──────────────────────
// Bounded frame buffer → alpha/beta/gamma band power → bounded [0, 100] score.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::eeg::EegSample;
use crate::error::{MetasurfaceError, MetasurfaceResult};
use crate::filter::{BandFilterBank, FilterBand};

/// Score reported while the buffer holds less than `MIN_SECONDS` of data.
pub const NEUTRAL_SCORE: f64 = 50.0;
const MIN_SECONDS: f64 = 0.5;
/// Upper bound on buffered frames.
pub const MAX_BUFFER_FRAMES: usize = 1 << 22;
const WINDOW_SECONDS: f64 = 1.0;
const HISTORY_CAPACITY: usize = 100;
const TREND_POINTS: usize = 10;
const TREND_SLOPE: f64 = 0.5;
const BASELINE_RETENTION: f64 = 0.9;
const GAMMA_EPSILON: f64 = 1e-10;

/// Direction of the recent attention history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

/// One attention estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttentionScore {
    /// Always within [0, 100].
    pub value: f64,
    /// Timestamp of the frame that produced it.
    pub timestamp: f64,
    pub trend: Trend,
}

/// Linear-fit summary over the last ten scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub trend: Trend,
    pub slope: f64,
    pub mean: f64,
    pub current: f64,
    /// `1 / (1 + stddev)`, in (0, 1].
    pub stability: f64,
}

impl TrendReport {
    fn insufficient() -> Self {
        Self {
            trend: Trend::InsufficientData,
            slope: 0.0,
            mean: 0.0,
            current: 0.0,
            stability: 0.0,
        }
    }
}

/// Intermediate metrics behind the most recent non-neutral score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandFeatures {
    pub alpha_power: f64,
    pub beta_power: f64,
    pub gamma_power: f64,
    pub beta_alpha_ratio: f64,
    pub gamma_norm: f64,
    pub coherence: f64,
}

pub struct AttentionExtractor {
    sample_rate: f64,
    channels: usize,
    capacity: usize,
    min_frames: usize,
    window_frames: usize,
    /// One entry per time point, `channels` values each.
    buffer: VecDeque<Vec<f64>>,
    history: VecDeque<f64>,
    baseline_alpha: Option<f64>,
    baseline_beta: Option<f64>,
    last_timestamp: Option<f64>,
    last_features: Option<BandFeatures>,
    bank: BandFilterBank,
}

impl AttentionExtractor {
    pub fn new(sample_rate: f64, channels: usize, buffer_seconds: f64) -> MetasurfaceResult<Self> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(MetasurfaceError::Config(format!(
                "sample_rate must be > 0, got {sample_rate}"
            )));
        }
        if channels == 0 {
            return Err(MetasurfaceError::Config("channels must be > 0".to_string()));
        }
        let frames = sample_rate * buffer_seconds;
        if !(frames.is_finite() && frames <= MAX_BUFFER_FRAMES as f64) {
            return Err(MetasurfaceError::Config(format!(
                "buffer of {buffer_seconds} s at {sample_rate} Hz \
                 exceeds {MAX_BUFFER_FRAMES} frames"
            )));
        }
        let capacity = frames as usize;
        let min_frames = (sample_rate * MIN_SECONDS) as usize;
        if capacity < min_frames.max(1) {
            return Err(MetasurfaceError::Config(format!(
                "buffer_seconds must hold at least {MIN_SECONDS} s of data, got {buffer_seconds}"
            )));
        }

        Ok(Self {
            sample_rate,
            channels,
            capacity,
            min_frames,
            window_frames: (sample_rate * WINDOW_SECONDS) as usize,
            buffer: VecDeque::with_capacity(capacity),
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            baseline_alpha: None,
            baseline_beta: None,
            last_timestamp: None,
            last_features: None,
            bank: BandFilterBank::new(sample_rate)?,
        })
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Buffered frames, oldest first.
    pub fn buffered(&self) -> impl Iterator<Item = &[f64]> {
        self.buffer.iter().map(Vec::as_slice)
    }

    pub fn history(&self) -> impl Iterator<Item = f64> + '_ {
        self.history.iter().copied()
    }

    pub fn baselines(&self) -> Option<(f64, f64)> {
        self.baseline_alpha.zip(self.baseline_beta)
    }

    pub fn last_features(&self) -> Option<BandFeatures> {
        self.last_features
    }

    fn check(&self, sample: &EegSample) -> MetasurfaceResult<()> {
        sample.validate_shape()?;
        if (sample.sample_rate - self.sample_rate).abs() > 1e-9 {
            return Err(MetasurfaceError::InvalidSample(format!(
                "sample rate {} Hz does not match session rate {} Hz",
                sample.sample_rate, self.sample_rate
            )));
        }
        if sample.channel_count() != self.channels {
            return Err(MetasurfaceError::InvalidSample(format!(
                "expected {} channels, got {}",
                self.channels,
                sample.channel_count()
            )));
        }
        if let Some(prev) = self.last_timestamp {
            if sample.timestamp <= prev {
                return Err(MetasurfaceError::InvalidSample(format!(
                    "timestamp {} is not after {prev}",
                    sample.timestamp
                )));
            }
        }
        Ok(())
    }

    /// Ingest a frame and return the current attention estimate.
    ///
    /// The frame is validated before anything is buffered, so a rejected frame
    /// leaves the extractor exactly as it was.
    pub fn update(&mut self, sample: &EegSample) -> MetasurfaceResult<AttentionScore> {
        self.check(sample)?;

        for n in 0..sample.len() {
            self.buffer
                .push_back(sample.channels.iter().map(|ch| ch[n]).collect());
            if self.buffer.len() > self.capacity {
                self.buffer.pop_front();
            }
        }
        self.last_timestamp = Some(sample.timestamp);

        if self.buffer.len() < self.min_frames {
            return Ok(AttentionScore {
                value: NEUTRAL_SCORE,
                timestamp: sample.timestamp,
                trend: self.get_trend().trend,
            });
        }

        let start = self.buffer.len().saturating_sub(self.window_frames);
        let window: Vec<&Vec<f64>> = self.buffer.range(start..).collect();

        // Channel-major concatenation: all of channel 0, then channel 1, ...
        let data: Vec<f64> = (0..self.channels)
            .flat_map(|c| window.iter().map(move |frame| frame[c]))
            .collect();

        let alpha = self.bank.band_power(FilterBand::Alpha, &data);
        let beta = self.bank.band_power(FilterBand::Beta, &data);
        let gamma = self.bank.band_power(FilterBand::Gamma, &data);

        let baseline_alpha = match self.baseline_alpha {
            Some(b) => BASELINE_RETENTION * b + (1.0 - BASELINE_RETENTION) * alpha,
            None => alpha,
        };
        let baseline_beta = match self.baseline_beta {
            Some(b) => BASELINE_RETENTION * b + (1.0 - BASELINE_RETENTION) * beta,
            None => beta,
        };
        self.baseline_alpha = Some(baseline_alpha);
        self.baseline_beta = Some(baseline_beta);

        let ratio = if baseline_alpha > 0.0 {
            beta / baseline_alpha
        } else {
            1.0
        };
        let gamma_norm = gamma / (alpha + beta + GAMMA_EPSILON);
        let coherence = if self.channels >= 2 {
            let left: Vec<f64> = window.iter().map(|f| f[0]).collect();
            let right: Vec<f64> = window.iter().map(|f| f[1]).collect();
            pearson(&left, &right)
        } else {
            0.0
        };

        let raw = 0.6 * (ratio - 1.0).tanh() + 0.3 * (10.0 * gamma_norm).tanh() + 0.1 * coherence;
        let mut value = (50.0 * (raw + 1.0)).clamp(0.0, 100.0);
        if !value.is_finite() {
            value = NEUTRAL_SCORE;
        }

        let features = BandFeatures {
            alpha_power: alpha,
            beta_power: beta,
            gamma_power: gamma,
            beta_alpha_ratio: ratio,
            gamma_norm,
            coherence,
        };
        debug!(?features, score = value, "attention update");
        self.last_features = Some(features);

        self.history.push_back(value);
        if self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }

        Ok(AttentionScore {
            value,
            timestamp: sample.timestamp,
            trend: self.get_trend().trend,
        })
    }

    pub fn get_trend(&self) -> TrendReport {
        if self.history.len() < TREND_POINTS {
            return TrendReport::insufficient();
        }
        let recent: Vec<f64> = self
            .history
            .iter()
            .skip(self.history.len() - TREND_POINTS)
            .copied()
            .collect();

        let n = recent.len() as f64;
        let x_mean = (n - 1.0) / 2.0;
        let y_mean = recent.iter().sum::<f64>() / n;
        let (mut sxy, mut sxx) = (0.0, 0.0);
        for (i, y) in recent.iter().enumerate() {
            let dx = i as f64 - x_mean;
            sxy += dx * (y - y_mean);
            sxx += dx * dx;
        }
        let slope = sxy / sxx;
        let std = (recent.iter().map(|y| (y - y_mean).powi(2)).sum::<f64>() / n).sqrt();

        let trend = if slope > TREND_SLOPE {
            Trend::Increasing
        } else if slope < -TREND_SLOPE {
            Trend::Decreasing
        } else {
            Trend::Stable
        };

        TrendReport {
            trend,
            slope,
            mean: y_mean,
            current: recent[recent.len() - 1],
            stability: 1.0 / (1.0 + std),
        }
    }
}

/// Pearson correlation; 0.0 when either series is flat or too short.
fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }
    let nf = n as f64;
    let mx = x[..n].iter().sum::<f64>() / nf;
    let my = y[..n].iter().sum::<f64>() / nf;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for i in 0..n {
        let (dx, dy) = (x[i] - mx, y[i] - my);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    let denom = (sxx * syy).sqrt();
    if !(denom > 0.0) || !denom.is_finite() {
        return 0.0;
    }
    (sxy / denom).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::TAU;

    const FS: f64 = 256.0;

    fn chunk(start: usize, len: usize, freq: f64, channels: usize) -> EegSample {
        let ch: Vec<f64> = (start..start + len)
            .map(|i| (TAU * freq * i as f64 / FS).sin())
            .collect();
        EegSample::new(start as f64 / FS, vec![ch; channels], FS)
    }

    fn drive(ex: &mut AttentionExtractor, freq: f64, frames: usize, step: usize) -> AttentionScore {
        let mut last = None;
        for start in (0..frames).step_by(step) {
            last = Some(ex.update(&chunk(start, step, freq, 2)).unwrap());
        }
        last.unwrap()
    }

    #[test]
    fn test_neutral_below_half_second() {
        let mut ex = AttentionExtractor::new(FS, 2, 2.0).unwrap();
        let score = ex.update(&chunk(0, 127, 10.0, 2)).unwrap();
        assert_eq!(score.value, NEUTRAL_SCORE);
        assert_eq!(score.trend, Trend::InsufficientData);
        assert_eq!(ex.history().count(), 0);
    }

    #[test]
    fn test_buffer_is_bounded_fifo() {
        let mut ex = AttentionExtractor::new(FS, 1, 2.0).unwrap();
        assert_eq!(ex.capacity(), 512);
        for k in 0..10 {
            let ch: Vec<f64> = (0..100).map(|i| (k * 100 + i) as f64).collect();
            ex.update(&EegSample::new(k as f64, vec![ch], FS)).unwrap();
            assert!(ex.buffered_len() <= 512);
        }
        assert_eq!(ex.buffered_len(), 512);
        // 1000 frames in, the oldest 488 evicted.
        let first = ex.buffered().next().unwrap()[0];
        let last = ex.buffered().last().unwrap()[0];
        assert_eq!(first, 488.0);
        assert_eq!(last, 999.0);
    }

    #[test]
    fn test_beta_dominant_scores_high() {
        let mut ex = AttentionExtractor::new(FS, 2, 2.0).unwrap();
        let score = drive(&mut ex, 20.0, 256, 64);
        assert!(score.value > 70.0, "beta score {}", score.value);

        let mut ex = AttentionExtractor::new(FS, 2, 2.0).unwrap();
        let score = drive(&mut ex, 10.0, 256, 64);
        assert!(score.value < 50.0, "alpha score {}", score.value);
        let features = ex.last_features().unwrap();
        assert!((features.coherence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_score_bounded_for_noise() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut ex = AttentionExtractor::new(FS, 3, 2.0).unwrap();
        for k in 0..40 {
            let scale = if k % 5 == 0 { 1e6 } else { 1.0 };
            let channels: Vec<Vec<f64>> = (0..3)
                .map(|_| (0..32).map(|_| rng.gen_range(-1.0..1.0) * scale).collect())
                .collect();
            let score = ex.update(&EegSample::new(k as f64, channels, FS)).unwrap();
            assert!((0.0..=100.0).contains(&score.value), "{}", score.value);
        }
    }

    #[test]
    fn test_single_channel_has_zero_coherence() {
        let mut ex = AttentionExtractor::new(FS, 1, 2.0).unwrap();
        let ch: Vec<f64> = (0..200).map(|i| (TAU * 15.0 * i as f64 / FS).sin()).collect();
        ex.update(&EegSample::new(0.0, vec![ch], FS)).unwrap();
        assert_eq!(ex.last_features().unwrap().coherence, 0.0);
    }

    #[test]
    fn test_flat_signal_uses_neutral_ratio() {
        let mut ex = AttentionExtractor::new(FS, 2, 2.0).unwrap();
        let score = ex
            .update(&EegSample::new(0.0, vec![vec![0.0; 200]; 2], FS))
            .unwrap();
        let f = ex.last_features().unwrap();
        assert_eq!(f.beta_alpha_ratio, 1.0);
        assert_eq!(f.coherence, 0.0);
        assert!((score.value - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejected_frames_leave_state_untouched() {
        let mut ex = AttentionExtractor::new(FS, 2, 2.0).unwrap();
        ex.update(&chunk(0, 64, 10.0, 2)).unwrap();

        let wrong_rate = EegSample::new(10.0, vec![vec![0.0; 8]; 2], 128.0);
        let wrong_channels = EegSample::new(10.0, vec![vec![0.0; 8]; 3], FS);
        let stale = EegSample::new(0.0, vec![vec![0.0; 8]; 2], FS);
        for bad in [wrong_rate, wrong_channels, stale] {
            assert!(matches!(
                ex.update(&bad),
                Err(MetasurfaceError::InvalidSample(_))
            ));
            assert_eq!(ex.buffered_len(), 64);
        }
    }

    #[test]
    fn test_history_bounded() {
        let mut ex = AttentionExtractor::new(FS, 1, 2.0).unwrap();
        for k in 0..150 {
            ex.update(&EegSample::new(k as f64, vec![vec![0.1 * k as f64; 128]], FS))
                .unwrap();
        }
        assert_eq!(ex.history().count(), HISTORY_CAPACITY);
    }

    #[test]
    fn test_trend_fit() {
        let mut ex = AttentionExtractor::new(FS, 1, 2.0).unwrap();
        assert_eq!(ex.get_trend().trend, Trend::InsufficientData);

        ex.history.extend((0..10).map(|i| i as f64 * 2.0));
        let report = ex.get_trend();
        assert_eq!(report.trend, Trend::Increasing);
        assert!((report.slope - 2.0).abs() < 1e-12);
        assert!((report.mean - 9.0).abs() < 1e-12);
        assert_eq!(report.current, 18.0);
        let std = 2.0 * (8.25f64).sqrt();
        assert!((report.stability - 1.0 / (1.0 + std)).abs() < 1e-12);

        ex.history.extend(std::iter::repeat(40.0).take(10));
        let report = ex.get_trend();
        assert_eq!(report.trend, Trend::Stable);
        assert_eq!(report.stability, 1.0);

        ex.history.extend((0..10).map(|i| 40.0 - i as f64));
        assert_eq!(ex.get_trend().trend, Trend::Decreasing);
    }

    #[test]
    fn test_rejects_bad_config() {
        assert!(AttentionExtractor::new(0.0, 2, 2.0).is_err());
        assert!(AttentionExtractor::new(FS, 0, 2.0).is_err());
        assert!(AttentionExtractor::new(FS, 2, 0.1).is_err());
        assert!(AttentionExtractor::new(FS, 2, f64::NAN).is_err());
        assert!(AttentionExtractor::new(FS, 2, 1e12).is_err());
        assert!(AttentionExtractor::new(1e300, 2, 2.0).is_err());
    }
}
