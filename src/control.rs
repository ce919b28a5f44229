// ────────────────────── CONTROL LOOP ──────────────────────
// Fixed-rate worker: sample → attention → state → beam preset → surface targets
// → one smoothing step → publish a whole status snapshot for readers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::attention::{AttentionExtractor, AttentionScore, TrendReport};
use crate::beam::BeamCommand;
use crate::config::ControllerConfig;
use crate::error::{MetasurfaceError, MetasurfaceResult};
use crate::grid::{ArrayGrid, Surface, SurfaceSnapshot};
use crate::source::SampleSource;

const COMMAND_HISTORY: usize = 64;

/// Attention band that selects a beam preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlState {
    Low,
    Medium,
    High,
}

impl ControlState {
    /// `score < low` is Low, `score > high` is High, both bounds inclusive for Medium.
    pub fn classify(score: f64, low: f64, high: f64) -> Self {
        if score < low {
            ControlState::Low
        } else if score > high {
            ControlState::High
        } else {
            ControlState::Medium
        }
    }
}

/// Beam issued for each control state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeamPresets {
    pub low: BeamCommand,
    pub medium: BeamCommand,
    pub high: BeamCommand,
}

impl Default for BeamPresets {
    fn default() -> Self {
        Self {
            low: BeamCommand::steer(0.0, 0.0, 0.3),
            medium: BeamCommand::steer(30.0, 10.0, 0.6),
            high: BeamCommand::steer(60.0, 30.0, 0.9),
        }
    }
}

impl BeamPresets {
    pub fn command(&self, state: ControlState) -> BeamCommand {
        match state {
            ControlState::Low => self.low,
            ControlState::Medium => self.medium,
            ControlState::High => self.high,
        }
    }
}

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// The producer had nothing ready; nothing was mutated.
    Idle,
    Applied {
        score: AttentionScore,
        state: ControlState,
        command: BeamCommand,
    },
}

/// Everything an external reader may observe, published whole after each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlStatus {
    pub ticks: u64,
    pub errors: u64,
    pub attention: Option<AttentionScore>,
    pub state: Option<ControlState>,
    pub command: Option<BeamCommand>,
    pub trend: TrendReport,
    pub surface: SurfaceSnapshot,
}

// ── tick body ───────────────────────────────────────────────────────────────

/// Owns one session's extractor, surface and producer. Drives them one tick at a time.
pub struct Controller<S: Surface> {
    config: ControllerConfig,
    extractor: AttentionExtractor,
    surface: S,
    source: Box<dyn SampleSource>,
    attention: Option<AttentionScore>,
    state: Option<ControlState>,
    ticks: u64,
    errors: u64,
    history: VecDeque<(ControlState, BeamCommand)>,
}

impl Controller<ArrayGrid> {
    /// Planar surface built from the configuration.
    pub fn new(config: ControllerConfig, source: Box<dyn SampleSource>) -> MetasurfaceResult<Self> {
        config.validate()?;
        let surface = ArrayGrid::new(config.grid_spec())?;
        Self::with_surface(config, surface, source)
    }
}

impl<S: Surface> Controller<S> {
    pub fn with_surface(
        config: ControllerConfig,
        surface: S,
        source: Box<dyn SampleSource>,
    ) -> MetasurfaceResult<Self> {
        config.validate()?;
        let extractor =
            AttentionExtractor::new(config.sample_rate, config.channels, config.buffer_seconds)?;
        Ok(Self {
            config,
            extractor,
            surface,
            source,
            attention: None,
            state: None,
            ticks: 0,
            errors: 0,
            history: VecDeque::with_capacity(COMMAND_HISTORY),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn extractor(&self) -> &AttentionExtractor {
        &self.extractor
    }

    pub fn state(&self) -> Option<ControlState> {
        self.state
    }

    /// Applied (state, command) pairs, oldest first.
    pub fn command_history(&self) -> impl Iterator<Item = &(ControlState, BeamCommand)> {
        self.history.iter()
    }

    /// Classify a score, apply the matching preset and advance smoothing once.
    pub fn apply_score(&mut self, score: f64) -> (ControlState, BeamCommand) {
        let state = ControlState::classify(
            score,
            self.config.low_threshold,
            self.config.high_threshold,
        );
        if self.state != Some(state) {
            info!(?state, score, "control state changed");
        }
        let command = self.config.presets.command(state);

        self.surface.apply_command(&command);
        self.surface.update();

        self.state = Some(state);
        self.history.push_back((state, command));
        if self.history.len() > COMMAND_HISTORY {
            self.history.pop_front();
        }
        (state, command)
    }

    fn step(&mut self) -> MetasurfaceResult<TickOutcome> {
        let sample = match self.source.next_sample()? {
            Some(sample) => sample,
            None => return Ok(TickOutcome::Idle),
        };
        let score = self.extractor.update(&sample)?;
        self.attention = Some(score);
        let (state, command) = self.apply_score(score.value);
        Ok(TickOutcome::Applied {
            score,
            state,
            command,
        })
    }

    /// One full tick. A failed tick leaves the surface exactly as the last good tick left it.
    pub fn tick(&mut self) -> MetasurfaceResult<TickOutcome> {
        self.ticks += 1;
        let outcome = self.step();
        if outcome.is_err() {
            self.errors += 1;
        }
        outcome
    }

    pub fn status(&self) -> ControlStatus {
        ControlStatus {
            ticks: self.ticks,
            errors: self.errors,
            attention: self.attention,
            state: self.state,
            command: self.surface.beam(),
            trend: self.extractor.get_trend(),
            surface: self.surface.snapshot(),
        }
    }
}

// ── periodic worker ─────────────────────────────────────────────────────────

/// Runs a [`Controller`] on one background thread at `update_rate` Hz.
///
/// While running, the worker thread owns the controller outright; readers only
/// ever see the status published at the end of a tick.
pub struct ControlLoop<S: Surface + 'static> {
    running: Arc<AtomicBool>,
    status: Arc<RwLock<ControlStatus>>,
    idle: Mutex<Option<Controller<S>>>,
    worker: Mutex<Option<JoinHandle<Controller<S>>>>,
    interval: Duration,
    stop_timeout: Duration,
}

impl<S: Surface + 'static> ControlLoop<S> {
    pub fn new(controller: Controller<S>) -> Self {
        let interval = controller.config.tick_interval();
        let stop_timeout = controller.config.stop_timeout();
        Self {
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(RwLock::new(controller.status())),
            idle: Mutex::new(Some(controller)),
            worker: Mutex::new(None),
            interval,
            stop_timeout,
        }
    }

    /// Spawns the worker. No-op while the loop is running.
    ///
    /// A worker left behind by a timed-out [`stop`](Self::stop) is joined first,
    /// waiting at most `stop_timeout`; if it is still busy the call fails.
    pub fn start(&self) -> MetasurfaceResult<()> {
        let mut worker = self.worker.lock();
        if let Some(handle) = worker.as_ref() {
            if self.is_running() && !handle.is_finished() {
                debug!("control loop already running");
                return Ok(());
            }
        }
        if let Some(handle) = worker.take() {
            match self.join_within(handle) {
                Ok(Some(controller)) => *self.idle.lock() = Some(controller),
                Ok(None) => {
                    return Err(MetasurfaceError::Worker(
                        "previous worker panicked".to_string(),
                    ))
                }
                Err(handle) => {
                    *worker = Some(handle);
                    return Err(MetasurfaceError::Worker(
                        "previous worker still stopping".to_string(),
                    ));
                }
            }
        }

        let controller = self
            .idle
            .lock()
            .take()
            .ok_or_else(|| MetasurfaceError::Worker("controller unavailable".to_string()))?;

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let status = Arc::clone(&self.status);
        let interval = self.interval;

        let handle = thread::Builder::new()
            .name("metasurface-control".to_string())
            .spawn(move || run(controller, running, status, interval))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                MetasurfaceError::Worker(format!("failed to spawn control worker: {e}"))
            })?;
        *worker = Some(handle);

        info!(interval_ms = interval.as_millis() as u64, "control loop started");
        Ok(())
    }

    /// Signals the worker and waits up to `stop_timeout` for it to exit.
    ///
    /// Returns `true` if the worker was joined. On timeout the worker is left to
    /// finish its current tick on its own.
    pub fn stop(&self) -> bool {
        self.running.store(false, Ordering::SeqCst);

        let mut worker = self.worker.lock();
        let Some(handle) = worker.take() else {
            return true;
        };
        handle.thread().unpark();

        match self.join_within(handle) {
            Ok(Some(controller)) => {
                *self.idle.lock() = Some(controller);
                info!("control loop stopped");
                true
            }
            Ok(None) => {
                error!("control worker panicked");
                true
            }
            Err(handle) => {
                warn!(
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "control worker did not stop in time; abandoning join"
                );
                *worker = Some(handle);
                false
            }
        }
    }

    /// Joins `handle` if it exits within `stop_timeout`, handing it back otherwise.
    /// `Ok(None)` means the worker panicked.
    fn join_within(
        &self,
        handle: JoinHandle<Controller<S>>,
    ) -> Result<Option<Controller<S>>, JoinHandle<Controller<S>>> {
        let deadline = Instant::now() + self.stop_timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                return Err(handle);
            }
            thread::sleep(Duration::from_millis(2));
        }
        Ok(handle.join().ok())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Latest published status.
    pub fn status(&self) -> ControlStatus {
        self.status.read().clone()
    }

    pub fn attention(&self) -> Option<AttentionScore> {
        self.status.read().attention
    }

    pub fn snapshot(&self) -> SurfaceSnapshot {
        self.status.read().surface.clone()
    }

    /// Takes the controller back once the loop is stopped.
    pub fn into_controller(self) -> Option<Controller<S>> {
        self.stop();
        self.idle.lock().take()
    }
}

impl<S: Surface + 'static> Drop for ControlLoop<S> {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

fn run<S: Surface>(
    mut controller: Controller<S>,
    running: Arc<AtomicBool>,
    status: Arc<RwLock<ControlStatus>>,
    interval: Duration,
) -> Controller<S> {
    let mut next = Instant::now();

    while running.load(Ordering::SeqCst) {
        match controller.tick() {
            Ok(TickOutcome::Applied { score, state, .. }) => {
                debug!(score = score.value, ?state, "tick applied");
            }
            Ok(TickOutcome::Idle) => debug!("no sample ready"),
            Err(e) => warn!(error = %e, "tick failed; surface keeps last good state"),
        }
        *status.write() = controller.status();

        next += interval;
        let now = Instant::now();
        if now > next + interval {
            // Fell more than a tick behind; resynchronise rather than burst.
            next = now;
        }
        while running.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= next {
                break;
            }
            thread::park_timeout(next - now);
        }
    }

    controller
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eeg::EegSample;
    use crate::source::{ChannelSource, SyntheticSource};

    fn small_config() -> ControllerConfig {
        ControllerConfig {
            rows: 4,
            cols: 4,
            channels: 2,
            update_rate: 100.0,
            smoothing_rate: 1.0,
            ..ControllerConfig::default()
        }
    }

    #[test]
    fn test_classify_thresholds() {
        assert_eq!(ControlState::classify(29.99, 30.0, 70.0), ControlState::Low);
        assert_eq!(ControlState::classify(30.0, 30.0, 70.0), ControlState::Medium);
        assert_eq!(ControlState::classify(70.0, 30.0, 70.0), ControlState::Medium);
        assert_eq!(ControlState::classify(70.01, 30.0, 70.0), ControlState::High);
    }

    #[test]
    fn test_no_hysteresis_near_threshold() {
        let (_tx, source) = ChannelSource::pair();
        let mut c = Controller::new(small_config(), Box::new(source)).unwrap();
        let states: Vec<ControlState> = [29.9, 30.1, 29.9, 30.1]
            .iter()
            .map(|&s| c.apply_score(s).0)
            .collect();
        assert_eq!(
            states,
            vec![ControlState::Low, ControlState::Medium, ControlState::Low, ControlState::Medium]
        );
    }

    #[test]
    fn test_idle_tick_mutates_nothing() {
        let (_tx, source) = ChannelSource::pair();
        let mut c = Controller::new(small_config(), Box::new(source)).unwrap();
        let before = c.surface().snapshot();
        assert_eq!(c.tick().unwrap(), TickOutcome::Idle);
        assert_eq!(c.surface().snapshot(), before);
        assert_eq!(c.status().ticks, 1);
    }

    #[test]
    fn test_bad_sample_keeps_last_good_state() {
        let (tx, source) = ChannelSource::pair();
        let mut c = Controller::new(small_config(), Box::new(source)).unwrap();

        tx.send(EegSample::new(0.0, vec![vec![0.0; 16]; 2], 256.0)).unwrap();
        assert!(matches!(c.tick().unwrap(), TickOutcome::Applied { .. }));
        let good = c.surface().snapshot();

        // Wrong channel count.
        tx.send(EegSample::new(1.0, vec![vec![0.0; 16]; 3], 256.0)).unwrap();
        assert!(matches!(c.tick(), Err(MetasurfaceError::InvalidSample(_))));
        assert_eq!(c.surface().snapshot(), good);

        let status = c.status();
        assert_eq!(status.ticks, 2);
        assert_eq!(status.errors, 1);

        // The loop carries on with the next well-formed frame.
        tx.send(EegSample::new(2.0, vec![vec![0.0; 16]; 2], 256.0)).unwrap();
        assert!(c.tick().is_ok());
    }

    #[test]
    fn test_neutral_score_selects_medium() {
        let (tx, source) = ChannelSource::pair();
        let mut c = Controller::new(small_config(), Box::new(source)).unwrap();
        tx.send(EegSample::new(0.0, vec![vec![0.0; 8]; 2], 256.0)).unwrap();
        match c.tick().unwrap() {
            TickOutcome::Applied {
                score,
                state,
                command,
            } => {
                assert_eq!(score.value, 50.0);
                assert_eq!(state, ControlState::Medium);
                assert_eq!(command, BeamPresets::default().medium);
            }
            TickOutcome::Idle => panic!("expected a tick"),
        }
    }

    #[test]
    fn test_start_is_idempotent_and_stop_bounded() {
        let source = SyntheticSource::new(256.0, 2, 16, 3).unwrap();
        let c = Controller::new(small_config(), Box::new(source)).unwrap();
        let control = ControlLoop::new(c);

        control.start().unwrap();
        control.start().unwrap();
        assert!(control.is_running());
        thread::sleep(Duration::from_millis(100));

        let began = Instant::now();
        assert!(control.stop());
        assert!(began.elapsed() < Duration::from_millis(1000) + Duration::from_millis(10));
        assert!(!control.is_running());

        let status = control.status();
        assert!(status.ticks > 0);
        assert_eq!(status.errors, 0);

        // Restart reuses the same session state.
        control.start().unwrap();
        thread::sleep(Duration::from_millis(30));
        let controller = control.into_controller().unwrap();
        assert!(controller.status().ticks > status.ticks);
    }

    struct SlowSource {
        inner: SyntheticSource,
        delay: Duration,
    }

    impl SampleSource for SlowSource {
        fn next_sample(&mut self) -> MetasurfaceResult<Option<EegSample>> {
            thread::sleep(self.delay);
            self.inner.next_sample()
        }
    }

    #[test]
    fn test_start_after_timed_out_stop_really_restarts() {
        let source = SlowSource {
            inner: SyntheticSource::new(256.0, 2, 16, 4).unwrap(),
            delay: Duration::from_millis(300),
        };
        let config = ControllerConfig {
            stop_timeout_ms: 50,
            ..small_config()
        };
        let control = ControlLoop::new(Controller::new(config, Box::new(source)).unwrap());

        control.start().unwrap();
        thread::sleep(Duration::from_millis(20));
        // Worker is blocked inside the first read.
        assert!(!control.stop());
        assert!(!control.is_running());

        // Still inside that read after another bounded wait.
        assert!(matches!(control.start(), Err(MetasurfaceError::Worker(_))));
        assert!(!control.is_running());

        // Once the old worker has drained, start spawns a fresh one.
        thread::sleep(Duration::from_millis(400));
        let before = control.status().ticks;
        control.start().unwrap();
        assert!(control.is_running());
        thread::sleep(Duration::from_millis(700));
        assert!(control.status().ticks > before);
        assert!(control.is_running());
        control.stop();
    }

    #[test]
    fn test_readers_see_whole_snapshots() {
        let rate = 0.05;
        let preset = BeamCommand::steer(20.0, 0.0, 0.5);
        let config = ControllerConfig {
            smoothing_rate: rate,
            presets: BeamPresets {
                low: preset,
                medium: preset,
                high: preset,
            },
            ..small_config()
        };

        // Targets: the same command applied with a single full step.
        let mut reference = ArrayGrid::new(crate::grid::GridSpec {
            smoothing_rate: 1.0,
            ..config.grid_spec()
        })
        .unwrap();
        reference.apply_command(&preset);
        reference.update();
        let targets: Vec<f64> = reference.snapshot().elements.iter().map(|e| e.phase).collect();
        assert!(targets.iter().any(|&t| t > 1e-3));

        let source = SyntheticSource::new(256.0, 2, 16, 9).unwrap();
        let control = Arc::new(ControlLoop::new(
            Controller::new(config, Box::new(source)).unwrap(),
        ));
        control.start().unwrap();

        let reader = {
            let control = Arc::clone(&control);
            thread::spawn(move || {
                for _ in 0..200 {
                    let status = control.status();
                    assert_eq!(status.errors, 0);
                    // Every tick is one smoothing step toward a fixed target, so a
                    // whole snapshot has every cell at 1 - (1 - rate)^ticks of its target.
                    let progress = 1.0 - (1.0 - rate).powi(status.ticks as i32);
                    for (e, &target) in status.surface.elements.iter().zip(&targets) {
                        if target > 1e-3 {
                            let seen = e.phase / target;
                            assert!(
                                (seen - progress).abs() < 1e-9,
                                "tick {} cell ({}, {}): {seen} vs {progress}",
                                status.ticks,
                                e.row,
                                e.col
                            );
                        }
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            })
        };
        reader.join().unwrap();
        assert!(control.stop());
    }
}
