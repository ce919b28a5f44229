// ────────────────────── BEAM SYNTHESIS ──────────────────────
// Phase profiles (steer + focus, vortex) as functions of cell position, and the
// far-field array factor of a surface snapshot.
//
// Far-field convention: each element radiates with e^{+i k̂·r}, so a linear
// steering gradient k·x·sin(az) places the main lobe at θ = −az in the φ = 0 cut.

use std::f64::consts::TAU;

use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::grid::{Geometry, SurfaceSnapshot};

/// One commanded beam state. Angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BeamCommand {
    /// `focus` runs from 0 (fully diffuse) to 1 (planar steered beam).
    Steer {
        azimuth: f64,
        elevation: f64,
        focus: f64,
    },
    /// Helical wavefront; `radius` (in wavelengths) windows the aperture.
    Vortex {
        topological_charge: i32,
        radius: Option<f64>,
    },
}

impl BeamCommand {
    pub fn steer(azimuth: f64, elevation: f64, focus: f64) -> Self {
        BeamCommand::Steer {
            azimuth,
            elevation,
            focus,
        }
    }

    pub fn vortex(topological_charge: i32, radius: Option<f64>) -> Self {
        BeamCommand::Vortex {
            topological_charge,
            radius,
        }
    }

    /// Phase function for this command on the given surface geometry.
    pub fn phase_profile(&self, geometry: &Geometry) -> Box<dyn Fn(f64, f64) -> f64 + Send + Sync> {
        match *self {
            BeamCommand::Steer {
                azimuth,
                elevation,
                focus,
            } => Box::new(steer_profile(geometry, azimuth, elevation, focus)),
            BeamCommand::Vortex {
                topological_charge,
                radius,
            } => Box::new(vortex_profile(geometry, topological_charge, radius)),
        }
    }
}

/// Wrap into [0, 2π).
pub fn wrap_phase(phase: f64) -> f64 {
    let w = phase.rem_euclid(TAU);
    if w >= TAU {
        0.0
    } else {
        w
    }
}

/// Uniform illumination.
pub fn uniform_amplitude(_x: f64, _y: f64) -> f64 {
    1.0
}

/// Linear steering gradient plus an optional spherical lens term.
///
/// For `focus < 1` the lens phase `k(√(r² + f²) − f)` about the array centre is
/// blended in with weight `1 − focus`, with focal length `f = 10λ / (1 + 9·focus)`.
pub fn steer_profile(
    geometry: &Geometry,
    azimuth: f64,
    elevation: f64,
    focus: f64,
) -> impl Fn(f64, f64) -> f64 + Send + Sync {
    let lambda = geometry.wavelength;
    let k = TAU / lambda;
    let (sin_az, sin_el) = (azimuth.to_radians().sin(), elevation.to_radians().sin());
    let (x0, y0) = geometry.center();
    let focal = 10.0 * lambda / (1.0 + 9.0 * focus);

    move |x, y| {
        let steering = k * (x * sin_az + y * sin_el);
        let total = if focus < 1.0 {
            let r2 = (x - x0).powi(2) + (y - y0).powi(2);
            let lens = k * ((r2 + focal * focal).sqrt() - focal);
            steering + (1.0 - focus) * lens
        } else {
            steering
        };
        wrap_phase(total)
    }
}

/// Azimuthal phase winding `charge · atan2(dy, dx)` about the array centre.
///
/// Cells farther than `radius · λ` from the centre are forced to zero phase.
pub fn vortex_profile(
    geometry: &Geometry,
    topological_charge: i32,
    radius: Option<f64>,
) -> impl Fn(f64, f64) -> f64 + Send + Sync {
    let (x0, y0) = geometry.center();
    let cutoff = radius.map(|r| r * geometry.wavelength);
    let charge = f64::from(topological_charge);

    move |x, y| {
        let (dx, dy) = (x - x0, y - y0);
        if let Some(limit) = cutoff {
            if dx.hypot(dy) > limit {
                return 0.0;
            }
        }
        wrap_phase(charge * dy.atan2(dx))
    }
}

/// θ from −90° to 90° in 1° steps.
pub fn default_theta_sweep() -> Vec<f64> {
    (-90..=90).map(f64::from).collect()
}

/// Radiated intensity `|Σ a·e^{iφ}·e^{i k̂·r}|²` for every (θ, φ) pair, in degrees.
///
/// Returns `intensity[theta_index][phi_index]`.
pub fn calculate_far_field(
    snapshot: &SurfaceSnapshot,
    thetas: &[f64],
    phis: &[f64],
) -> Vec<Vec<f64>> {
    let k = TAU / snapshot.wavelength;
    let fields: Vec<(Complex<f64>, f64, f64, f64)> = snapshot
        .elements
        .iter()
        .map(|e| (Complex::from_polar(e.amplitude, e.phase), e.x, e.y, e.z))
        .collect();

    thetas
        .iter()
        .map(|theta| {
            let (sin_t, cos_t) = theta.to_radians().sin_cos();
            phis.iter()
                .map(|phi| {
                    let (sin_p, cos_p) = phi.to_radians().sin_cos();
                    let (kx, ky, kz) = (k * sin_t * cos_p, k * sin_t * sin_p, k * cos_t);
                    let sum: Complex<f64> = fields
                        .iter()
                        .map(|&(a, x, y, z)| a * Complex::from_polar(1.0, kx * x + ky * y + kz * z))
                        .sum();
                    sum.norm_sqr()
                })
                .collect()
        })
        .collect()
}

/// Far field over the default θ sweep at φ = 0.
pub fn far_field_cut(snapshot: &SurfaceSnapshot) -> Vec<(f64, f64)> {
    let thetas = default_theta_sweep();
    let pattern = calculate_far_field(snapshot, &thetas, &[0.0]);
    thetas
        .into_iter()
        .zip(pattern)
        .map(|(t, row)| (t, row[0]))
        .collect()
}

/// θ (degrees) and intensity of the strongest direction in the default cut.
pub fn peak_direction(snapshot: &SurfaceSnapshot) -> Option<(f64, f64)> {
    far_field_cut(snapshot)
        .into_iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{ArrayGrid, GridSpec, Surface};

    fn grid(rows: usize, cols: usize) -> ArrayGrid {
        ArrayGrid::new(GridSpec {
            rows,
            cols,
            cell_spacing: 0.5,
            carrier_frequency: 10e9,
            smoothing_rate: 1.0,
        })
        .unwrap()
    }

    fn settle(g: &mut ArrayGrid, cmd: BeamCommand) {
        g.apply_command(&cmd);
        g.update();
    }

    #[test]
    fn test_broadside_planar_steer_is_zero() {
        let mut g = grid(8, 8);
        settle(&mut g, BeamCommand::steer(0.0, 0.0, 1.0));
        assert!(g.cells().all(|c| c.phase() == 0.0));
    }

    #[test]
    fn test_focus_adds_lens_curvature() {
        let g = grid(8, 8);
        let geometry = g.geometry();
        let profile = steer_profile(&geometry, 0.0, 0.0, 0.3);
        let (x0, y0) = geometry.center();
        assert!(profile(x0, y0).abs() < 1e-12);
        let lambda = geometry.wavelength;
        let focal = 10.0 * lambda / (1.0 + 9.0 * 0.3);
        let r: f64 = 1.5 * lambda;
        let expected = wrap_phase(0.7 * (TAU / lambda) * ((r * r + focal * focal).sqrt() - focal));
        assert!((profile(x0 + r, y0) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_vortex_phase_follows_azimuth() {
        let g = grid(9, 9);
        let geometry = g.geometry();
        let (x0, y0) = geometry.center();
        for charge in [-2, 1, 3] {
            let profile = vortex_profile(&geometry, charge, None);
            for angle in [0.3_f64, 1.2, 2.8, -2.0, -0.7] {
                let expected = wrap_phase(f64::from(charge) * angle);
                for r in [0.01, 0.1, 2.0] {
                    let (x, y) = (x0 + r * angle.cos(), y0 + r * angle.sin());
                    assert!((profile(x, y) - expected).abs() < 1e-9, "charge {charge} r {r}");
                }
            }
        }
    }

    #[test]
    fn test_vortex_radius_windows_aperture() {
        let mut g = grid(8, 8);
        let radius = 1.0;
        settle(&mut g, BeamCommand::vortex(2, Some(radius)));
        let geometry = g.geometry();
        let (x0, y0) = geometry.center();
        let mut outside = 0;
        for cell in g.cells() {
            let (x, y, _) = cell.position();
            if (x - x0).hypot(y - y0) > radius * geometry.wavelength {
                assert_eq!(cell.phase(), 0.0);
                outside += 1;
            }
        }
        assert!(outside > 0);
    }

    #[test]
    fn test_far_field_non_negative_and_broadside_peak() {
        let mut g = grid(8, 8);
        settle(&mut g, BeamCommand::steer(0.0, 0.0, 1.0));
        let snapshot = g.snapshot();
        let pattern = calculate_far_field(&snapshot, &default_theta_sweep(), &[0.0, 45.0, 90.0]);
        assert!(pattern.iter().flatten().all(|&v| v >= 0.0));

        let (theta, peak) = peak_direction(&snapshot).unwrap();
        assert_eq!(theta, 0.0);
        // Coherent sum of 64 unit elements.
        assert!((peak - 64.0 * 64.0).abs() < 1e-6);
    }

    #[test]
    fn test_steered_lobe_position() {
        let mut g = grid(8, 8);
        settle(&mut g, BeamCommand::steer(20.0, 0.0, 1.0));
        let (theta, _) = peak_direction(&g.snapshot()).unwrap();
        assert_eq!(theta, -20.0);
    }

    #[test]
    fn test_command_serde_shape() {
        let json = r#"{"kind":"vortex","topological_charge":2,"radius":null}"#;
        let cmd: BeamCommand = serde_json::from_str(json).unwrap();
        assert_eq!(cmd, BeamCommand::vortex(2, None));
    }
}
