//! Attention-driven metasurface control.
//!
//! A live multi-channel EEG stream is reduced to a bounded attention score
//! (band-limited power ratios plus inter-hemispheric coherence). The score picks
//! one of three beam presets, whose phase profile is written to a programmable
//! phased-array surface and approached by per-cell first-order smoothing.
//!
//! ```text
//! samples ─▶ AttentionExtractor ─▶ ControlState ─▶ BeamCommand ─▶ Surface ─▶ smoothed cells
//! ```
//!
//! # Example
//!
//! ```rust
//! use neuro_metasurface::{ControlState, Controller, ControllerConfig, SyntheticSource};
//!
//! let config = ControllerConfig { rows: 8, cols: 8, channels: 2, ..Default::default() };
//! let source = SyntheticSource::new(config.sample_rate, config.channels, 32, 7).unwrap();
//! let mut controller = Controller::new(config, Box::new(source)).unwrap();
//!
//! let (state, _command) = controller.apply_score(85.0);
//! assert_eq!(state, ControlState::High);
//! ```

pub mod attention;
pub mod beam;
pub mod cell;
pub mod config;
pub mod control;
pub mod eeg;
pub mod error;
pub mod filter;
pub mod grid;
pub mod source;

pub use attention::{AttentionExtractor, AttentionScore, BandFeatures, Trend, TrendReport};
pub use beam::{calculate_far_field, peak_direction, BeamCommand};
pub use cell::UnitCell;
pub use config::ControllerConfig;
pub use control::{BeamPresets, ControlLoop, ControlState, ControlStatus, Controller, TickOutcome};
pub use eeg::{BrainwaveBand, EegSample};
pub use error::{MetasurfaceError, MetasurfaceResult};
pub use filter::{BandFilterBank, FilterBand};
pub use grid::{ArrayGrid, Geometry, GridSpec, LayeredGrid, Surface, SurfaceSnapshot};
pub use source::{ChannelSource, SampleSource, SignalProfile, SyntheticSource};
