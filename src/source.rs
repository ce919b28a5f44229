// ────────────────────── SAMPLE SOURCES ──────────────────────
// Producer side of the loop. Reads never block: `Ok(None)` means nothing is ready.

use std::f64::consts::TAU;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::eeg::EegSample;
use crate::error::{MetasurfaceError, MetasurfaceResult};

pub trait SampleSource: Send {
    /// Next frame if one is ready. Must return promptly.
    fn next_sample(&mut self) -> MetasurfaceResult<Option<EegSample>>;
}

// ── channel-fed source ──────────────────────────────────────────────────────

/// Frames pushed by an acquisition thread through an `mpsc` channel.
pub struct ChannelSource {
    rx: Receiver<EegSample>,
}

impl ChannelSource {
    pub fn new(rx: Receiver<EegSample>) -> Self {
        Self { rx }
    }

    /// Sender for the acquisition side plus the matching source.
    pub fn pair() -> (Sender<EegSample>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self::new(rx))
    }
}

impl SampleSource for ChannelSource {
    fn next_sample(&mut self) -> MetasurfaceResult<Option<EegSample>> {
        match self.rx.try_recv() {
            Ok(sample) => Ok(Some(sample)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(MetasurfaceError::Source(
                "acquisition side disconnected".to_string(),
            )),
        }
    }
}

// ── synthetic source ────────────────────────────────────────────────────────

/// Sine amplitudes per rhythm plus white noise, in microvolts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalProfile {
    pub theta: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub noise: f64,
}

impl SignalProfile {
    const THETA_HZ: f64 = 6.0;
    const ALPHA_HZ: f64 = 10.0;
    const BETA_HZ: f64 = 20.0;
    const GAMMA_HZ: f64 = 40.0;

    /// Theta-dominant.
    pub fn drowsy() -> Self {
        Self {
            theta: 0.8,
            alpha: 0.2,
            beta: 0.1,
            gamma: 0.05,
            noise: 0.05,
        }
    }

    /// Alpha-dominant.
    pub fn relaxed() -> Self {
        Self {
            theta: 0.2,
            alpha: 0.7,
            beta: 0.2,
            gamma: 0.1,
            noise: 0.05,
        }
    }

    /// Beta and gamma dominant.
    pub fn focused() -> Self {
        Self {
            theta: 0.1,
            alpha: 0.2,
            beta: 0.6,
            gamma: 0.5,
            noise: 0.05,
        }
    }

    fn clean(&self, t: f64) -> f64 {
        self.theta * (TAU * Self::THETA_HZ * t).sin()
            + self.alpha * (TAU * Self::ALPHA_HZ * t).sin()
            + self.beta * (TAU * Self::BETA_HZ * t).sin()
            + self.gamma * (TAU * Self::GAMMA_HZ * t).sin()
    }
}

/// Seeded band-limited test signal. Every channel carries the same rhythms
/// with independent noise.
pub struct SyntheticSource {
    rng: StdRng,
    unit_noise: Normal<f64>,
    sample_rate: f64,
    channels: usize,
    frame_len: usize,
    /// Index of the next sample.
    cursor: usize,
    schedule: Vec<SignalProfile>,
    dwell_samples: usize,
}

impl SyntheticSource {
    pub fn new(
        sample_rate: f64,
        channels: usize,
        frame_len: usize,
        seed: u64,
    ) -> MetasurfaceResult<Self> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) || channels == 0 || frame_len == 0 {
            return Err(MetasurfaceError::Config(format!(
                "synthetic source needs rate > 0, channels > 0, frame_len > 0 \
                 (got {sample_rate}, {channels}, {frame_len})"
            )));
        }
        let unit_noise = Normal::new(0.0, 1.0)
            .map_err(|e| MetasurfaceError::Config(format!("noise distribution: {e}")))?;
        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            unit_noise,
            sample_rate,
            channels,
            frame_len,
            cursor: 0,
            schedule: vec![SignalProfile::relaxed()],
            dwell_samples: usize::MAX,
        })
    }

    /// Cycle through `profiles`, holding each for `dwell_seconds`.
    pub fn with_schedule(mut self, profiles: Vec<SignalProfile>, dwell_seconds: f64) -> Self {
        if !profiles.is_empty() {
            self.schedule = profiles;
        }
        self.dwell_samples = ((dwell_seconds * self.sample_rate) as usize).max(1);
        self
    }

    fn profile_at(&self, index: usize) -> SignalProfile {
        let slot = (index / self.dwell_samples) % self.schedule.len();
        self.schedule[slot]
    }

    /// Produces the next frame unconditionally.
    pub fn generate(&mut self) -> EegSample {
        let start = self.cursor;
        let mut channels = vec![Vec::with_capacity(self.frame_len); self.channels];
        for n in start..start + self.frame_len {
            let t = n as f64 / self.sample_rate;
            let profile = self.profile_at(n);
            let clean = profile.clean(t);
            for channel in channels.iter_mut() {
                let noise = profile.noise * self.unit_noise.sample(&mut self.rng);
                channel.push(clean + noise);
            }
        }
        self.cursor += self.frame_len;
        EegSample::new(start as f64 / self.sample_rate, channels, self.sample_rate)
    }
}

impl SampleSource for SyntheticSource {
    fn next_sample(&mut self) -> MetasurfaceResult<Option<EegSample>> {
        Ok(Some(self.generate()))
    }
}
