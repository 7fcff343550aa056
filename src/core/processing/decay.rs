//! Exponential coherence-decay model and its per-pixel fit.
//!
//! `C(t) = (1 - rho) * exp(-t / tau) + rho`, with `t` the repeat interval
//! in days, `rho` the long-term coherence and `tau` the decay constant.
//!
//! Fitting runs an unconstrained Levenberg–Marquardt first. A physically
//! invalid result (`rho` outside `[0, 1]` or `tau <= 0`) is re-fit with a
//! projected, box-constrained variant. Pixels with fewer than
//! `min_observations` valid samples, and pixels whose fit fails, keep the
//! "not fit" parameters `(0, 0)`.
use nalgebra::{Matrix2, Vector2};
use ndarray::{ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Smallest admissible tau in the bounded fit.
pub const TAU_FLOOR: f64 = 1e-6;

const MAX_ITERATIONS: usize = 200;
const MAX_DAMPING: f64 = 1e12;

#[derive(Copy, Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct DecayParams {
    pub rho: f64,
    pub tau: f64,
}

impl DecayParams {
    pub const NOT_FIT: DecayParams = DecayParams { rho: 0.0, tau: 0.0 };

    pub fn is_fit(&self) -> bool {
        self.tau > 0.0
    }

    pub fn is_physical(&self) -> bool {
        (0.0..=1.0).contains(&self.rho) && self.tau > 0.0 && self.tau.is_finite()
    }
}

#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct FitOptions {
    pub initial: DecayParams,
    pub min_observations: usize,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            initial: DecayParams { rho: 0.5, tau: 4.0 },
            min_observations: 4,
        }
    }
}

#[inline]
pub fn coherence(t: f64, p: DecayParams) -> f64 {
    if p.tau == 0.0 {
        // exp(-t/0) -> 0 for t > 0
        return p.rho;
    }
    (1.0 - p.rho) * (-t / p.tau).exp() + p.rho
}

#[derive(Copy, Clone)]
struct Bounds {
    rho: (f64, f64),
    tau: (f64, f64),
}

impl Bounds {
    const PHYSICAL: Bounds = Bounds {
        rho: (0.0, 1.0),
        tau: (TAU_FLOOR, f64::INFINITY),
    };

    fn project(&self, p: Vector2<f64>) -> Vector2<f64> {
        Vector2::new(p[0].clamp(self.rho.0, self.rho.1), p[1].clamp(self.tau.0, self.tau.1))
    }
}

fn cost(t: &[f64], y: &[f64], p: Vector2<f64>) -> f64 {
    let params = DecayParams { rho: p[0], tau: p[1] };
    t.iter()
        .zip(y)
        .map(|(&ti, &yi)| {
            let r = coherence(ti, params) - yi;
            r * r
        })
        .sum::<f64>()
        * 0.5
}

/// Normal equations `JᵀJ` and gradient `Jᵀr` at `p`.
fn normal_equations(t: &[f64], y: &[f64], p: Vector2<f64>) -> (Matrix2<f64>, Vector2<f64>) {
    let (rho, tau) = (p[0], p[1]);
    let mut jtj = Matrix2::zeros();
    let mut jtr = Vector2::zeros();
    for (&ti, &yi) in t.iter().zip(y) {
        let e = (-ti / tau).exp();
        let r = (1.0 - rho) * e + rho - yi;
        let j = Vector2::new(1.0 - e, (1.0 - rho) * e * ti / (tau * tau));
        jtj += j * j.transpose();
        jtr += j * r;
    }
    (jtj, jtr)
}

fn levenberg_marquardt(
    t: &[f64],
    y: &[f64],
    start: DecayParams,
    bounds: Option<Bounds>,
) -> Result<DecayParams> {
    let project = |p: Vector2<f64>| bounds.map_or(p, |b| b.project(p));
    let mut p = project(Vector2::new(start.rho, start.tau));
    let mut current = cost(t, y, p);
    if !current.is_finite() {
        return Err(Error::FitNonConvergence { iterations: 0 });
    }
    let mut damping = 1e-3;

    for iteration in 0..MAX_ITERATIONS {
        let (jtj, jtr) = normal_equations(t, y, p);
        if !jtj.iter().chain(jtr.iter()).all(|v| v.is_finite()) {
            return Err(Error::FitNonConvergence { iterations: iteration });
        }

        let mut accepted = None;
        while damping <= MAX_DAMPING {
            let mut a = jtj;
            for k in 0..2 {
                a[(k, k)] += damping * jtj[(k, k)].max(1e-12);
            }
            let step = a.lu().solve(&(-jtr));
            if let Some(step) = step {
                let candidate = project(p + step);
                let next = cost(t, y, candidate);
                if next.is_finite() && next < current {
                    accepted = Some((candidate, next));
                    damping = (damping / 10.0).max(1e-15);
                    break;
                }
            }
            damping *= 10.0;
        }

        let Some((candidate, next)) = accepted else {
            // no downhill step left: local minimum
            return Ok(DecayParams { rho: p[0], tau: p[1] });
        };

        let moved = (candidate - p).norm();
        let improvement = current - next;
        p = candidate;
        current = next;
        if moved <= 1e-10 * (p.norm() + 1e-10) || improvement <= 1e-15 * current.max(1e-30) {
            return Ok(DecayParams { rho: p[0], tau: p[1] });
        }
    }
    Err(Error::FitNonConvergence {
        iterations: MAX_ITERATIONS,
    })
}

/// Fit `(rho, tau)` to observations `y` at repeat intervals `t`.
pub fn fit_decay(t: &[f64], y: &[f64], initial: DecayParams) -> Result<DecayParams> {
    let free = levenberg_marquardt(t, y, initial, None);
    match free {
        Ok(p) if p.is_physical() => Ok(p),
        other => {
            if let Ok(p) = other {
                debug!("unconstrained fit out of bounds (rho={}, tau={}), refitting", p.rho, p.tau);
            }
            let p = levenberg_marquardt(t, y, initial, Some(Bounds::PHYSICAL))?;
            if p.is_physical() {
                Ok(p)
            } else {
                Err(Error::FitNonConvergence { iterations: MAX_ITERATIONS })
            }
        }
    }
}

/// Fit one pixel column of a median stack; invalid (zero) entries are dropped.
pub fn fit_pixel(t: &[f64], column: ArrayView1<f32>, options: &FitOptions) -> DecayParams {
    let (ts, ys): (Vec<f64>, Vec<f64>) = t
        .iter()
        .zip(column.iter())
        .filter(|&(_, &v)| v > 0.0 && v.is_finite())
        .map(|(&ti, &v)| (ti, v as f64))
        .unzip();
    if ys.len() < options.min_observations {
        return DecayParams::NOT_FIT;
    }
    fit_decay(&ts, &ys, options.initial).unwrap_or(DecayParams::NOT_FIT)
}

/// Fit every pixel of a `repeat intervals × pixels` median stack. Results
/// are in pixel-index order regardless of scheduling.
pub fn fit_stack(stack: ArrayView2<f32>, t: &[f64], options: &FitOptions) -> Result<Vec<DecayParams>> {
    if stack.nrows() != t.len() {
        return Err(Error::DimensionMismatch {
            expected_rows: t.len(),
            expected_cols: stack.ncols(),
            rows: stack.nrows(),
            cols: stack.ncols(),
        });
    }
    Ok((0..stack.ncols())
        .into_par_iter()
        .map(|p| fit_pixel(t, stack.column(p), options))
        .collect())
}

/// Spread (population standard deviation) of model residuals over the full
/// per-pair stack. Unfit pixels and pixels without valid observations get 0.
pub fn residual_spread(stack: ArrayView2<f32>, t: &[f64], params: &[DecayParams]) -> Result<Vec<f64>> {
    if stack.nrows() != t.len() || stack.ncols() != params.len() {
        return Err(Error::DimensionMismatch {
            expected_rows: t.len(),
            expected_cols: params.len(),
            rows: stack.nrows(),
            cols: stack.ncols(),
        });
    }
    Ok((0..stack.ncols())
        .into_par_iter()
        .map(|p| {
            let model = params[p];
            if !model.is_fit() {
                return 0.0;
            }
            let residuals: Vec<f64> = t
                .iter()
                .zip(stack.column(p).iter())
                .filter(|&(_, &v)| v > 0.0 && v.is_finite())
                .map(|(&ti, &v)| coherence(ti, model) - v as f64)
                .collect();
            if residuals.is_empty() {
                return 0.0;
            }
            let n = residuals.len() as f64;
            let mean = residuals.iter().sum::<f64>() / n;
            (residuals.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n).sqrt()
        })
        .collect())
}

/// Fixed-point encoding for model rasters: `ceil(clamp(v * 1000, 0, 65535))`.
pub fn encode_parameter(value: f64) -> u16 {
    if !value.is_finite() {
        return if value > 0.0 { u16::MAX } else { 0 };
    }
    (value * 1000.0).clamp(0.0, 65535.0).ceil() as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    const T: [f64; 6] = [6.0, 12.0, 18.0, 24.0, 36.0, 48.0];

    fn synthetic(p: DecayParams) -> Vec<f64> {
        T.iter().map(|&t| coherence(t, p)).collect()
    }

    #[test]
    fn recovers_noise_free_parameters() {
        let truth = DecayParams { rho: 0.3, tau: 10.0 };
        let fit = fit_decay(&T, &synthetic(truth), FitOptions::default().initial).unwrap();
        assert_abs_diff_eq!(fit.rho, 0.3, epsilon = 1e-4);
        assert_abs_diff_eq!(fit.tau, 10.0, epsilon = 1e-3);
    }

    #[test]
    fn negative_asymptote_is_refit_within_bounds() {
        // Decays below zero: the unconstrained optimum has rho < 0
        let y: Vec<f64> = T.iter().map(|&t| 1.2 * (-t / 15.0).exp() - 0.2).map(|v: f64| v.max(0.01)).collect();
        let fit = fit_decay(&T, &y, DecayParams { rho: 0.1, tau: 4.0 }).unwrap();
        assert!(fit.is_physical(), "{fit:?}");
        assert!(fit.rho >= 0.0 && fit.rho <= 1.0);
        assert!(fit.tau > 0.0);
    }

    #[test]
    fn fewer_than_four_observations_are_not_fit() {
        let column = ndarray::arr1(&[0.6f32, 0.5, 0.0, 0.4, 0.0, 0.0]);
        let p = fit_pixel(&T, column.view(), &FitOptions::default());
        assert_eq!(p, DecayParams::NOT_FIT);
    }

    #[test]
    fn stack_fit_keeps_pixel_order() {
        let pixels = [
            DecayParams { rho: 0.2, tau: 8.0 },
            DecayParams { rho: 0.5, tau: 20.0 },
            DecayParams { rho: 0.05, tau: 5.0 },
        ];
        let mut stack = Array2::<f32>::zeros((T.len(), pixels.len() + 1));
        for (p, params) in pixels.iter().enumerate() {
            for (i, &t) in T.iter().enumerate() {
                stack[[i, p]] = coherence(t, *params) as f32;
            }
        }
        let fits = fit_stack(stack.view(), &T, &FitOptions::default()).unwrap();
        assert_eq!(fits.len(), 4);
        for (fit, truth) in fits.iter().zip(&pixels) {
            assert_abs_diff_eq!(fit.rho, truth.rho, epsilon = 1e-3);
            assert_abs_diff_eq!(fit.tau, truth.tau, epsilon = 1e-2);
        }
        assert_eq!(fits[3], DecayParams::NOT_FIT);
    }

    #[test]
    fn residual_spread_is_zero_for_exact_model_and_unfit_pixels() {
        let params = [DecayParams { rho: 0.3, tau: 10.0 }, DecayParams::NOT_FIT];
        let mut stack = Array2::<f32>::zeros((T.len(), 2));
        for (i, &t) in T.iter().enumerate() {
            stack[[i, 0]] = coherence(t, params[0]) as f32;
            stack[[i, 1]] = 0.4;
        }
        let spread = residual_spread(stack.view(), &T, &params).unwrap();
        assert_abs_diff_eq!(spread[0], 0.0, epsilon = 1e-6);
        assert_eq!(spread[1], 0.0);
    }

    #[test]
    fn encoding_scales_clamps_and_rounds_up() {
        assert_eq!(encode_parameter(0.0), 0);
        assert_eq!(encode_parameter(0.3), 300);
        assert_eq!(encode_parameter(0.0301), 31);
        assert_eq!(encode_parameter(70.0), 65535);
        assert_eq!(encode_parameter(-1.0), 0);
        assert_eq!(encode_parameter(f64::INFINITY), 65535);
    }
}
