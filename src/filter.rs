// ────────────────────── BAND FILTER BANK ──────────────────────
// 4th-order Butterworth band-pass filters run forward and backward (zero phase).
// Band power is the population variance of the filtered window.

use num_complex::Complex;

use crate::error::{MetasurfaceError, MetasurfaceResult};

const PROTOTYPE_ORDER: usize = 4;

/// Bands the attention estimate is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterBand {
    Alpha,
    Beta,
    Gamma,
}

impl FilterBand {
    pub const ALL: [FilterBand; 3] = [FilterBand::Alpha, FilterBand::Beta, FilterBand::Gamma];

    /// Pass band edges in Hz.
    pub fn edges(self) -> (f64, f64) {
        match self {
            FilterBand::Alpha => (8.0, 13.0),
            FilterBand::Beta => (13.0, 30.0),
            FilterBand::Gamma => (30.0, 45.0),
        }
    }
}

/// IIR transfer function `b(z) / a(z)` with `a[0] == 1`.
#[derive(Debug, Clone)]
pub struct BandFilter {
    b: Vec<f64>,
    a: Vec<f64>,
    zi: Vec<f64>,
}

impl BandFilter {
    /// Digital Butterworth band-pass of the given prototype order.
    ///
    /// Analog prototype → pre-warped low-pass/band-pass transform → bilinear
    /// transform, giving `2 * order` poles.
    pub fn butterworth(order: usize, low: f64, high: f64, fs: f64) -> MetasurfaceResult<Self> {
        if order == 0 {
            return Err(MetasurfaceError::Config("filter order must be > 0".to_string()));
        }
        if !(fs > 0.0) {
            return Err(MetasurfaceError::Config(format!(
                "sample rate must be > 0, got {fs}"
            )));
        }
        if !(0.0 < low && low < high && high < fs / 2.0) {
            return Err(MetasurfaceError::Config(format!(
                "band {low}-{high} Hz must satisfy 0 < low < high < {} Hz (Nyquist)",
                fs / 2.0
            )));
        }

        // Analog prototype poles on the left half unit circle.
        let n = order as f64;
        let proto: Vec<Complex<f64>> = (0..order)
            .map(|i| {
                let m = -(n - 1.0) + 2.0 * i as f64;
                -Complex::from_polar(1.0, std::f64::consts::PI * m / (2.0 * n))
            })
            .collect();

        // Work at normalised fs = 2, so the bilinear constant is 4.
        let fs2 = 4.0;
        let warp = |f: f64| fs2 * (std::f64::consts::PI * f / fs).tan();
        let (w1, w2) = (warp(low), warp(high));
        let bw = w2 - w1;
        let w0 = (w1 * w2).sqrt();

        // Low-pass → band-pass: each pole splits in two, `order` zeros land at s = 0.
        let mut poles = Vec::with_capacity(2 * order);
        for &p in &proto {
            let p_lp = p * (bw / 2.0);
            let disc = (p_lp * p_lp - w0 * w0).sqrt();
            poles.push(p_lp + disc);
            poles.push(p_lp - disc);
        }
        let mut gain = bw.powi(order as i32);

        // Bilinear transform. Zeros at s = 0 map to z = 1, zeros at infinity to z = -1.
        let num: Complex<f64> = (0..order).map(|_| Complex::new(fs2, 0.0)).product();
        let den: Complex<f64> = poles.iter().map(|&p| Complex::new(fs2, 0.0) - p).product();
        gain *= (num / den).re;

        let z_poles: Vec<Complex<f64>> = poles
            .iter()
            .map(|&p| (Complex::new(fs2, 0.0) + p) / (Complex::new(fs2, 0.0) - p))
            .collect();
        let mut z_zeros = vec![Complex::new(1.0, 0.0); order];
        z_zeros.extend(std::iter::repeat(Complex::new(-1.0, 0.0)).take(order));

        let b: Vec<f64> = poly(&z_zeros).iter().map(|c| c.re * gain).collect();
        let a: Vec<f64> = poly(&z_poles).iter().map(|c| c.re).collect();
        let zi = steady_state(&b, &a);

        Ok(Self { b, a, zi })
    }

    pub fn numerator(&self) -> &[f64] {
        &self.b
    }

    pub fn denominator(&self) -> &[f64] {
        &self.a
    }

    /// Edge padding used by [`filtfilt`](Self::filtfilt).
    pub fn padlen(&self) -> usize {
        3 * self.b.len().max(self.a.len())
    }

    /// Direct form II transposed, starting from state `zi`.
    fn lfilter(&self, x: &[f64], zi: &[f64]) -> Vec<f64> {
        let order = self.a.len() - 1;
        let mut z = zi.to_vec();
        let mut y = Vec::with_capacity(x.len());
        for &xn in x {
            let yn = self.b[0] * xn + z[0];
            for i in 0..order {
                let next = if i + 1 < order { z[i + 1] } else { 0.0 };
                z[i] = self.b[i + 1] * xn - self.a[i + 1] * yn + next;
            }
            y.push(yn);
        }
        y
    }

    /// Zero-phase filtering with odd extension at both ends.
    ///
    /// Returns `None` when `x` is not longer than [`padlen`](Self::padlen).
    pub fn filtfilt(&self, x: &[f64]) -> Option<Vec<f64>> {
        let edge = self.padlen();
        let n = x.len();
        if n <= edge {
            return None;
        }

        let mut ext = Vec::with_capacity(n + 2 * edge);
        ext.extend((1..=edge).rev().map(|i| 2.0 * x[0] - x[i]));
        ext.extend_from_slice(x);
        ext.extend((1..=edge).map(|i| 2.0 * x[n - 1] - x[n - 1 - i]));

        let zi: Vec<f64> = self.zi.iter().map(|z| z * ext[0]).collect();
        let mut y = self.lfilter(&ext, &zi);
        y.reverse();

        let zi: Vec<f64> = self.zi.iter().map(|z| z * y[0]).collect();
        let mut y = self.lfilter(&y, &zi);
        y.reverse();

        Some(y[edge..edge + n].to_vec())
    }
}

/// Monic polynomial coefficients (highest power first) from its roots.
fn poly(roots: &[Complex<f64>]) -> Vec<Complex<f64>> {
    let mut c = vec![Complex::new(1.0, 0.0)];
    for &r in roots {
        let mut next = vec![Complex::new(0.0, 0.0); c.len() + 1];
        for (i, &ci) in c.iter().enumerate() {
            next[i] += ci;
            next[i + 1] -= ci * r;
        }
        c = next;
    }
    c
}

/// Initial state giving the step response's steady state: solves
/// `(I - Aᵀ) zi = b[1..] - a[1..] * b[0]` where `A` is the companion matrix of `a`.
fn steady_state(b: &[f64], a: &[f64]) -> Vec<f64> {
    let m = a.len() - 1;
    let mut mat = vec![vec![0.0; m]; m];
    let mut rhs = vec![0.0; m];
    for i in 0..m {
        mat[i][i] = 1.0;
        mat[i][0] += a[i + 1];
        if i + 1 < m {
            mat[i][i + 1] -= 1.0;
        }
        rhs[i] = b[i + 1] - a[i + 1] * b[0];
    }
    solve(mat, rhs)
}

/// Gaussian elimination with partial pivoting. Singular pivots resolve to zero.
fn solve(mut mat: Vec<Vec<f64>>, mut rhs: Vec<f64>) -> Vec<f64> {
    let n = rhs.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| mat[i][col].abs().total_cmp(&mat[j][col].abs()))
            .unwrap_or(col);
        mat.swap(col, pivot);
        rhs.swap(col, pivot);

        let diag = mat[col][col];
        if diag.abs() < 1e-300 {
            continue;
        }
        for row in col + 1..n {
            let factor = mat[row][col] / diag;
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                mat[row][k] -= factor * mat[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let diag = mat[row][row];
        if diag.abs() < 1e-300 {
            continue;
        }
        let tail: f64 = (row + 1..n).map(|k| mat[row][k] * x[k]).sum();
        x[row] = (rhs[row] - tail) / diag;
    }
    x
}

fn variance(x: &[f64]) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    let n = x.len() as f64;
    let mean = x.iter().sum::<f64>() / n;
    x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

/// Alpha, beta and gamma band-pass filters designed for one sample rate.
#[derive(Debug, Clone)]
pub struct BandFilterBank {
    sample_rate: f64,
    alpha: BandFilter,
    beta: BandFilter,
    gamma: BandFilter,
}

impl BandFilterBank {
    pub fn new(sample_rate: f64) -> MetasurfaceResult<Self> {
        let design = |band: FilterBand| {
            let (low, high) = band.edges();
            BandFilter::butterworth(PROTOTYPE_ORDER, low, high, sample_rate)
        };
        Ok(Self {
            sample_rate,
            alpha: design(FilterBand::Alpha)?,
            beta: design(FilterBand::Beta)?,
            gamma: design(FilterBand::Gamma)?,
        })
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn filter(&self, band: FilterBand) -> &BandFilter {
        match band {
            FilterBand::Alpha => &self.alpha,
            FilterBand::Beta => &self.beta,
            FilterBand::Gamma => &self.gamma,
        }
    }

    /// Variance of `window` after zero-phase band-pass filtering.
    ///
    /// Windows too short to pad are treated as "no signal yet" and give 0.0.
    pub fn band_power(&self, band: FilterBand, window: &[f64]) -> f64 {
        let filter = self.filter(band);
        if window.len() < 3 * filter.numerator().len() {
            return 0.0;
        }
        match filter.filtfilt(window) {
            Some(filtered) => variance(&filtered),
            None => 0.0,
        }
    }
}
