//! Stateless skewed-distribution fit for most-probable values.
//!
//! Every call builds its own simplex from the initial guesses it is given
//! and returns a plain value, so fits of different bins share nothing.

use argmin::core::{CostFunction, Executor, State, TerminationReason, TerminationStatus};
use argmin::solver::neldermead::NelderMead;

use crate::stats::ValueHistogram;

const MAX_ITERATIONS: u64 = 2000;
/// Stop once the standard deviation of the simplex costs drops below this.
const COST_TOLERANCE: f64 = 1e-9;

/// Moyal density, a closed-form approximation of the Landau distribution.
///
/// The mode sits at `mpv`.
#[inline]
#[must_use]
pub fn moyal_pdf(x: f64, mpv: f64, width: f64) -> f64 {
    let lambda = (x - mpv) / width;
    (-0.5 * (lambda + (-lambda).exp())).exp() / (width * (2.0 * std::f64::consts::PI).sqrt())
}

/// Initial parameters for [`fit_landau`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandauGuess {
    pub mpv: f64,
    pub width: f64,
    /// Total weight under the curve.
    pub norm: f64,
}

/// Result of a skewed-distribution fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandauFit {
    pub mpv: f64,
    pub width: f64,
    pub norm: f64,
    pub chi2: f64,
    pub ndf: usize,
}

/// Least-squares cost of a Moyal curve against populated histogram bins.
struct MoyalChi2 {
    /// `(bin center, content)` of every populated bin.
    points: Vec<(f64, f64)>,
    bin_width: f64,
}

impl CostFunction for MoyalChi2 {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, p: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let (mpv, width, norm) = (p[0], p[1], p[2]);
        if !(width > 0.0 && norm > 0.0) {
            return Ok(f64::MAX);
        }
        Ok(self
            .points
            .iter()
            .map(|&(x, count)| {
                let expected = norm * self.bin_width * moyal_pdf(x, mpv, width);
                (count - expected).powi(2) / count.max(1.0)
            })
            .sum())
    }
}

/// Fits a Moyal curve to a histogram by least squares.
///
/// Bin errors are `sqrt(max(content, 1))`. Returns `None` when there are
/// fewer populated bins than parameters plus one, when the simplex does not
/// converge, or when the fitted mode falls outside the histogram range.
#[must_use]
pub fn fit_landau(histogram: &ValueHistogram, guess: LandauGuess) -> Option<LandauFit> {
    let bin_width = histogram.bin_width();
    let points: Vec<(f64, f64)> = histogram
        .counts()
        .iter()
        .enumerate()
        .filter(|(_, c)| **c > 0.0)
        .map(|(i, c)| (histogram.bin_center(i), *c))
        .collect();
    if points.len() < 4 || !(guess.width > 0.0 && guess.norm > 0.0) {
        return None;
    }
    let ndf = points.len() - 3;

    let start = vec![guess.mpv, guess.width, guess.norm];
    let steps = [guess.width, 0.5 * guess.width, 0.2 * guess.norm];
    let mut simplex = vec![start.clone()];
    for (i, step) in steps.iter().enumerate() {
        let mut vertex = start.clone();
        vertex[i] += step;
        simplex.push(vertex);
    }
    let solver = NelderMead::new(simplex)
        .with_sd_tolerance(COST_TOLERANCE)
        .ok()?;

    let problem = MoyalChi2 { points, bin_width };
    let res = Executor::new(problem, solver)
        .configure(|state| state.max_iters(MAX_ITERATIONS))
        .run()
        .ok()?;
    let state = res.state();
    let converged = matches!(
        state.get_termination_status(),
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
    );
    let best = state.get_best_param()?;
    let (mpv, width, norm) = (best[0], best[1], best[2]);

    let (lo, hi) = (
        histogram.bin_center(0) - 0.5 * bin_width,
        histogram.bin_center(histogram.num_bins() - 1) + 0.5 * bin_width,
    );
    if !converged || !mpv.is_finite() || mpv < lo || mpv >= hi || width <= 0.0 {
        return None;
    }
    Some(LandauFit {
        mpv,
        width,
        norm,
        chi2: state.get_best_cost(),
        ndf,
    })
}
