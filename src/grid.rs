// ────────────────────── SURFACES ──────────────────────
// Planar array of unit cells, and a volumetric stack built from planar layers.
// Dimensions and spacing are fixed at construction; only targets and smoothed
// state change afterwards.

use serde::{Deserialize, Serialize};

use crate::beam::{uniform_amplitude, BeamCommand};
use crate::cell::UnitCell;
use crate::error::{MetasurfaceError, MetasurfaceResult};

/// Free-space propagation speed used for λ = c / f.
pub const SPEED_OF_LIGHT: f64 = 3e8;

/// Upper bound on `rows × cols` for one planar layer.
pub const MAX_ELEMENTS: usize = 1 << 16;

/// Construction parameters for a planar grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub rows: usize,
    pub cols: usize,
    /// Element pitch as a fraction of the wavelength.
    pub cell_spacing: f64,
    /// Hz.
    pub carrier_frequency: f64,
    /// Per-tick interpolation fraction in (0, 1].
    pub smoothing_rate: f64,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            rows: 16,
            cols: 16,
            cell_spacing: 0.5,
            carrier_frequency: 10e9,
            smoothing_rate: 0.1,
        }
    }
}

impl GridSpec {
    pub fn validate(&self) -> MetasurfaceResult<()> {
        if self.rows == 0 || self.cols == 0 {
            return Err(MetasurfaceError::Config(format!(
                "grid dimensions must be > 0, got {}x{}",
                self.rows, self.cols
            )));
        }
        match self.rows.checked_mul(self.cols) {
            Some(n) if n <= MAX_ELEMENTS => {}
            _ => {
                return Err(MetasurfaceError::Config(format!(
                    "grid of {}x{} exceeds {MAX_ELEMENTS} elements",
                    self.rows, self.cols
                )))
            }
        }
        if !(self.cell_spacing.is_finite() && self.cell_spacing > 0.0) {
            return Err(MetasurfaceError::Config(format!(
                "cell_spacing must be > 0, got {}",
                self.cell_spacing
            )));
        }
        if !(self.carrier_frequency.is_finite() && self.carrier_frequency > 0.0) {
            return Err(MetasurfaceError::Config(format!(
                "carrier_frequency must be > 0, got {}",
                self.carrier_frequency
            )));
        }
        if !(self.smoothing_rate > 0.0 && self.smoothing_rate <= 1.0) {
            return Err(MetasurfaceError::Config(format!(
                "smoothing_rate must be in (0, 1], got {}",
                self.smoothing_rate
            )));
        }
        Ok(())
    }

    pub fn wavelength(&self) -> f64 {
        SPEED_OF_LIGHT / self.carrier_frequency
    }
}

/// Physical layout reported by a surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub rows: usize,
    pub cols: usize,
    pub layers: usize,
    pub cell_spacing: f64,
    pub carrier_frequency: f64,
    /// Metres.
    pub wavelength: f64,
}

impl Geometry {
    /// Pitch in metres.
    pub fn pitch(&self) -> f64 {
        self.cell_spacing * self.wavelength
    }

    /// In-plane centre of the aperture in metres.
    pub fn center(&self) -> (f64, f64) {
        let p = self.pitch();
        (
            (self.cols - 1) as f64 * p / 2.0,
            (self.rows - 1) as f64 * p / 2.0,
        )
    }
}

/// Published state of one element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementState {
    pub layer: usize,
    pub row: usize,
    pub col: usize,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub phase: f64,
    pub amplitude: f64,
}

/// Consistent copy of every element, taken between ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceSnapshot {
    pub rows: usize,
    pub cols: usize,
    pub layers: usize,
    pub wavelength: f64,
    /// Layer-major, then row-major.
    pub elements: Vec<ElementState>,
}

impl SurfaceSnapshot {
    pub fn element(&self, layer: usize, row: usize, col: usize) -> Option<&ElementState> {
        if layer >= self.layers || row >= self.rows || col >= self.cols {
            return None;
        }
        self.elements
            .get((layer * self.rows + row) * self.cols + col)
    }

    /// `rows × cols` grid of (phase, amplitude) for one layer, as handed to an actuator.
    pub fn grid(&self, layer: usize) -> Vec<Vec<(f64, f64)>> {
        (0..self.rows)
            .map(|row| {
                (0..self.cols)
                    .filter_map(|col| self.element(layer, row, col))
                    .map(|e| (e.phase, e.amplitude))
                    .collect()
            })
            .collect()
    }
}

/// Shared capability of every programmable surface.
pub trait Surface: Send {
    fn geometry(&self) -> Geometry;

    /// Sets every cell's target from its in-plane position.
    fn apply_phase_profile(
        &mut self,
        phase: &dyn Fn(f64, f64) -> f64,
        amplitude: &dyn Fn(f64, f64) -> f64,
    );

    /// Advances every cell one smoothing step.
    fn update(&mut self);

    fn snapshot(&self) -> SurfaceSnapshot;

    /// Last command applied through [`apply_command`](Self::apply_command).
    fn beam(&self) -> Option<BeamCommand>;

    /// Synthesizes the command's phase profile under uniform illumination.
    fn apply_command(&mut self, command: &BeamCommand);
}

/// Planar `rows × cols` array.
#[derive(Debug, Clone)]
pub struct ArrayGrid {
    spec: GridSpec,
    wavelength: f64,
    z: f64,
    /// Row-major.
    cells: Vec<UnitCell>,
    beam: Option<BeamCommand>,
}

impl ArrayGrid {
    pub fn new(spec: GridSpec) -> MetasurfaceResult<Self> {
        Self::at_height(spec, 0.0)
    }

    fn at_height(spec: GridSpec, z: f64) -> MetasurfaceResult<Self> {
        spec.validate()?;
        let wavelength = spec.wavelength();
        let pitch = spec.cell_spacing * wavelength;
        let cells = (0..spec.rows)
            .flat_map(|i| {
                (0..spec.cols).map(move |j| {
                    UnitCell::at(j as f64 * pitch, i as f64 * pitch, z)
                        .with_rate(spec.smoothing_rate)
                })
            })
            .collect();

        Ok(Self {
            spec,
            wavelength,
            z,
            cells,
            beam: None,
        })
    }

    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }

    pub fn wavelength(&self) -> f64 {
        self.wavelength
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&UnitCell> {
        if row >= self.spec.rows || col >= self.spec.cols {
            return None;
        }
        self.cells.get(row * self.spec.cols + col)
    }

    /// Row-major iteration over cells.
    pub fn cells(&self) -> impl Iterator<Item = &UnitCell> {
        self.cells.iter()
    }

    pub fn steer_beam(&mut self, azimuth: f64, elevation: f64, focus: f64) {
        self.apply_command(&BeamCommand::steer(azimuth, elevation, focus));
    }

    pub fn generate_vortex_beam(&mut self, topological_charge: i32, radius: Option<f64>) {
        self.apply_command(&BeamCommand::vortex(topological_charge, radius));
    }

    fn elements(&self, layer: usize) -> impl Iterator<Item = ElementState> + '_ {
        let cols = self.spec.cols;
        self.cells.iter().enumerate().map(move |(idx, cell)| {
            let (x, y, z) = cell.position();
            ElementState {
                layer,
                row: idx / cols,
                col: idx % cols,
                x,
                y,
                z,
                phase: cell.phase(),
                amplitude: cell.amplitude(),
            }
        })
    }
}

impl Surface for ArrayGrid {
    fn geometry(&self) -> Geometry {
        Geometry {
            rows: self.spec.rows,
            cols: self.spec.cols,
            layers: 1,
            cell_spacing: self.spec.cell_spacing,
            carrier_frequency: self.spec.carrier_frequency,
            wavelength: self.wavelength,
        }
    }

    fn apply_phase_profile(
        &mut self,
        phase: &dyn Fn(f64, f64) -> f64,
        amplitude: &dyn Fn(f64, f64) -> f64,
    ) {
        for cell in &mut self.cells {
            let (x, y, _) = cell.position();
            cell.set_target(phase(x, y), amplitude(x, y), false);
        }
    }

    fn update(&mut self) {
        self.cells.iter_mut().for_each(UnitCell::update);
    }

    fn snapshot(&self) -> SurfaceSnapshot {
        SurfaceSnapshot {
            rows: self.spec.rows,
            cols: self.spec.cols,
            layers: 1,
            wavelength: self.wavelength,
            elements: self.elements(0).collect(),
        }
    }

    fn beam(&self) -> Option<BeamCommand> {
        self.beam
    }

    fn apply_command(&mut self, command: &BeamCommand) {
        let profile = command.phase_profile(&self.geometry());
        self.apply_phase_profile(&*profile, &uniform_amplitude);
        self.beam = Some(*command);
    }
}

/// Stack of identical planar layers spaced along z, driven with one profile.
#[derive(Debug, Clone)]
pub struct LayeredGrid {
    layers: Vec<ArrayGrid>,
    /// Layer separation as a fraction of the wavelength.
    layer_spacing: f64,
    beam: Option<BeamCommand>,
}

impl LayeredGrid {
    pub fn new(spec: GridSpec, layers: usize, layer_spacing: f64) -> MetasurfaceResult<Self> {
        if layers == 0 {
            return Err(MetasurfaceError::Config("layers must be > 0".to_string()));
        }
        if !(layer_spacing.is_finite() && layer_spacing >= 0.0) {
            return Err(MetasurfaceError::Config(format!(
                "layer_spacing must be >= 0, got {layer_spacing}"
            )));
        }
        spec.validate()?;
        let step = layer_spacing * spec.wavelength();
        let layers = (0..layers)
            .map(|l| ArrayGrid::at_height(spec, l as f64 * step))
            .collect::<MetasurfaceResult<Vec<_>>>()?;

        Ok(Self {
            layers,
            layer_spacing,
            beam: None,
        })
    }

    pub fn layer(&self, index: usize) -> Option<&ArrayGrid> {
        self.layers.get(index)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layer_spacing(&self) -> f64 {
        self.layer_spacing
    }

    /// Height of a layer in metres.
    pub fn layer_height(&self, index: usize) -> Option<f64> {
        self.layers.get(index).map(|l| l.z)
    }
}

impl Surface for LayeredGrid {
    fn geometry(&self) -> Geometry {
        Geometry {
            layers: self.layers.len(),
            ..self.layers[0].geometry()
        }
    }

    fn apply_phase_profile(
        &mut self,
        phase: &dyn Fn(f64, f64) -> f64,
        amplitude: &dyn Fn(f64, f64) -> f64,
    ) {
        for layer in &mut self.layers {
            layer.apply_phase_profile(phase, amplitude);
        }
    }

    fn update(&mut self) {
        for layer in &mut self.layers {
            layer.update();
        }
    }

    fn snapshot(&self) -> SurfaceSnapshot {
        let base = &self.layers[0];
        SurfaceSnapshot {
            rows: base.spec.rows,
            cols: base.spec.cols,
            layers: self.layers.len(),
            wavelength: base.wavelength,
            elements: self
                .layers
                .iter()
                .enumerate()
                .flat_map(|(l, layer)| layer.elements(l))
                .collect(),
        }
    }

    fn beam(&self) -> Option<BeamCommand> {
        self.beam
    }

    fn apply_command(&mut self, command: &BeamCommand) {
        let profile = command.phase_profile(&self.geometry());
        self.apply_phase_profile(&*profile, &uniform_amplitude);
        self.beam = Some(*command);
    }
}
