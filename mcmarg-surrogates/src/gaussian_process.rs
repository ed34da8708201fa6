//! Zero-mean Gaussian-process surrogate with a squared-exponential kernel.
//!
//! The kernel is `C · exp(-|x - x'|² / 2ℓ²)` with a small diagonal nugget, plus the reported
//! variance of each point when requested. `C` and `ℓ` are chosen by maximising the log marginal
//! likelihood with Nelder–Mead in `(ln C, ln ℓ)`, starting from `(1, 1)` and from a number of
//! random points inside the bounds.

use argmin::{
    core::{CostFunction, Error, Executor},
    solver::neldermead::NelderMead,
};
use log::{debug, warn};
use mcmarg_core::errors::{MarginalError, MarginalResult};
use mcmarg_core::evaluation::check_dimension;
use mcmarg_core::surrogate::Surrogate;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Bounds shared by the amplitude `C` and the length scale `ℓ`.
pub const HYPERPARAMETER_BOUNDS: (f64, f64) = (1e-3, 10.0);

/// Diagonal jitter added to every kernel matrix.
pub const NUGGET: f64 = 1e-10;

const MAX_ITERS: u64 = 500;
const SD_TOLERANCE: f64 = 1e-8;

fn default_restarts() -> usize {
    9
}

/// Hyperparameter search settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianProcessConfig {
    /// Random starting points tried after the default one
    #[serde(default = "default_restarts")]
    pub restarts: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for GaussianProcessConfig {
    fn default() -> Self {
        Self {
            restarts: default_restarts(),
            seed: None,
        }
    }
}

fn squared_exponential(
    a: ArrayView1<f64>,
    b: ArrayView1<f64>,
    amplitude: f64,
    length: f64,
) -> f64 {
    let r_sq: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
    amplitude * (-r_sq / (2.0 * length * length)).exp()
}

fn kernel_matrix(x: ArrayView2<f64>, amplitude: f64, length: f64, noise: &[f64]) -> DMatrix<f64> {
    let n = x.nrows();
    DMatrix::from_fn(n, n, |i, j| {
        let k = squared_exponential(x.row(i), x.row(j), amplitude, length);
        if i == j {
            k + noise[i]
        } else {
            k
        }
    })
}

/// Hyperparameter from its log, clamped to the bounds after exponentiating.
fn bounded_exp(theta: f64) -> f64 {
    theta
        .exp()
        .clamp(HYPERPARAMETER_BOUNDS.0, HYPERPARAMETER_BOUNDS.1)
}

/// Negative log marginal likelihood over `(ln C, ln ℓ)`.
struct MarginalLikelihoodCost<'a> {
    x: ArrayView2<'a, f64>,
    y: &'a DVector<f64>,
    noise: &'a [f64],
}

impl MarginalLikelihoodCost<'_> {
    fn negative_log_marginal_likelihood(&self, amplitude: f64, length: f64) -> Option<f64> {
        let k = kernel_matrix(self.x, amplitude, length, self.noise);
        let cholesky = k.cholesky()?;
        let alpha = cholesky.solve(self.y);
        let log_det: f64 = cholesky.l_dirty().diagonal().iter().map(|d| d.ln()).sum();
        let n = self.y.len() as f64;
        let value = 0.5 * self.y.dot(&alpha)
            + log_det
            + 0.5 * n * (2.0 * std::f64::consts::PI).ln();
        if value.is_finite() {
            Some(value)
        } else {
            None
        }
    }
}

impl CostFunction for MarginalLikelihoodCost<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> Result<Self::Output, Error> {
        let amplitude = bounded_exp(theta[0]);
        let length = bounded_exp(theta[1]);
        Ok(self
            .negative_log_marginal_likelihood(amplitude, length)
            .unwrap_or(f64::INFINITY))
    }
}

/// Gaussian-process regression of the log-likelihood.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianProcessSurrogate {
    /// Training coordinates: shape (n_points, n_dims)
    training: Array2<f64>,
    /// `(K + noise)^-1 y`
    alpha: Vec<f64>,
    pub amplitude: f64,
    pub length_scale: f64,
}

#[typetag::serde]
impl Surrogate for GaussianProcessSurrogate {
    fn n_dims(&self) -> usize {
        self.training.ncols()
    }

    fn predict(&self, x: ArrayView1<f64>) -> f64 {
        self.training
            .outer_iter()
            .zip(&self.alpha)
            .map(|(row, a)| a * squared_exponential(x, row, self.amplitude, self.length_scale))
            .sum()
    }
}

/// Run Nelder–Mead from `start` (in log space), returning the best `(cost, theta)`.
fn optimise_from(
    cost: MarginalLikelihoodCost<'_>,
    start: [f64; 2],
) -> Result<(f64, Vec<f64>), Error> {
    let simplex = vec![
        start.to_vec(),
        vec![start[0] + 0.5, start[1]],
        vec![start[0], start[1] + 0.5],
    ];
    let solver: NelderMead<Vec<f64>, f64> =
        NelderMead::new(simplex).with_sd_tolerance(SD_TOLERANCE)?;
    let res = Executor::new(cost, solver)
        .configure(|state| state.max_iters(MAX_ITERS))
        .run()?;
    let best = res
        .state
        .best_param
        .ok_or_else(|| Error::msg("Nelder-Mead returned no parameters"))?;
    Ok((res.state.best_cost, best))
}

/// Fit a GP to `ln_likelihood` at the rows of `coordinates`.
///
/// With `sigma` set, `σ²` is added to each point's diagonal entry. Fails if every candidate
/// hyperparameter pair leaves the kernel matrix without a Cholesky factorisation.
pub fn fit_gaussian_process(
    coordinates: ArrayView2<f64>,
    ln_likelihood: &[f64],
    sigma: Option<&[f64]>,
    config: &GaussianProcessConfig,
) -> MarginalResult<GaussianProcessSurrogate> {
    let n = coordinates.nrows();
    check_dimension(n, ln_likelihood.len())?;
    if n == 0 {
        return Err(MarginalError::Input(
            "Cannot fit a Gaussian process to no points".to_string(),
        ));
    }
    let noise: Vec<f64> = match sigma {
        Some(sigma) => {
            check_dimension(n, sigma.len())?;
            sigma.iter().map(|s| NUGGET + s * s).collect()
        }
        None => vec![NUGGET; n],
    };
    let y = DVector::from_column_slice(ln_likelihood);

    let mut rng = match config.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };
    let (low, high) = (HYPERPARAMETER_BOUNDS.0.ln(), HYPERPARAMETER_BOUNDS.1.ln());
    let mut starts = vec![[0.0, 0.0]];
    starts.extend(
        (0..config.restarts).map(|_| [rng.gen_range(low..high), rng.gen_range(low..high)]),
    );

    let mut best: Option<(f64, Vec<f64>)> = None;
    for start in starts {
        let cost = MarginalLikelihoodCost {
            x: coordinates.view(),
            y: &y,
            noise: &noise,
        };
        match optimise_from(cost, start) {
            Ok((value, theta)) if value.is_finite() => {
                debug!("GP restart from {:?}: -ln ML = {}", start, value);
                if best.as_ref().map_or(true, |(b, _)| value < *b) {
                    best = Some((value, theta));
                }
            }
            Ok(_) => debug!("GP restart from {:?} found no usable kernel", start),
            Err(e) => warn!("GP restart from {:?} failed: {}", start, e),
        }
    }

    let (_, theta) = best.ok_or_else(|| {
        MarginalError::Fit("No hyperparameters give a positive-definite kernel matrix".to_string())
    })?;
    let amplitude = bounded_exp(theta[0]);
    let length_scale = bounded_exp(theta[1]);

    let cholesky = kernel_matrix(coordinates, amplitude, length_scale, &noise)
        .cholesky()
        .ok_or_else(|| MarginalError::Fit("Kernel matrix is not positive definite".to_string()))?;
    let alpha = cholesky.solve(&y);

    Ok(GaussianProcessSurrogate {
        training: coordinates.to_owned(),
        alpha: alpha.iter().copied().collect(),
        amplitude,
        length_scale,
    })
}
