//! Adaptive importance-sampling Monte Carlo integrator.
//!
//! The integrator estimates `Z = ∫ I(x) π(x) dx` over the registered [`CoordinateSpace`] by
//! drawing batches from a product of per-dimension [`HistogramProposal`]s and averaging the
//! importance weights `w = I(x) π(x) / q(x)`. After every batch the proposals of adaptive
//! dimensions are re-fit to the batch's tempered weights, so later batches concentrate where
//! the integrand is large.
//!
//! All weight bookkeeping is done relative to a running log scale, so integrands of order
//! `exp(1000)` neither overflow nor lose precision.

use crate::convergence::ConvergenceTest;
use crate::errors::{MarginalError, MarginalResult};
use crate::evaluation::check_dimension;
use crate::history::{ln_weight, DrawHistory};
use crate::proposal::HistogramProposal;
use crate::registry::{CoordinateSpace, SamplingInit};
use crate::surrogate::{Integrand, Surrogate, SurrogateIntegrand};
use indexmap::IndexMap;
use log::{debug, info, warn};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

fn default_batch_size() -> usize {
    10_000
}

fn default_max_draws() -> usize {
    300_000
}

fn default_target_effective_samples() -> f64 {
    3000.0
}

fn default_tempering_exponent() -> f64 {
    0.1
}

fn default_weight_floor() -> f64 {
    1e-3
}

fn default_n_bins() -> usize {
    100
}

/// Tunable parameters of an integration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegratorConfig {
    /// Draws per round
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Hard cap on the total number of draws
    #[serde(default = "default_max_draws")]
    pub max_draws: usize,

    /// Effective sample size required for convergence
    #[serde(default = "default_target_effective_samples")]
    pub target_effective_samples: f64,

    /// Exponent `β < 1` applied to the weights when re-fitting proposals.
    ///
    /// Damps proposal adaptation and never enters the estimate. Must lie in `(0, 1)`.
    #[serde(default = "default_tempering_exponent")]
    pub tempering_exponent: f64,

    /// Fraction of each adapted proposal mixed back in as a flat density.
    ///
    /// Keeps every bin's sampling density positive, so it must lie in `(0, 1)`.
    #[serde(default = "default_weight_floor")]
    pub weight_floor: f64,

    /// Histogram bins per proposal
    #[serde(default = "default_n_bins")]
    pub n_bins: usize,

    /// Seed for the random number generator; drawn from entropy when unset
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_draws: default_max_draws(),
            target_effective_samples: default_target_effective_samples(),
            tempering_exponent: default_tempering_exponent(),
            weight_floor: default_weight_floor(),
            n_bins: default_n_bins(),
            seed: None,
        }
    }
}

impl IntegratorConfig {
    pub fn validate(&self) -> MarginalResult<()> {
        if self.batch_size == 0 || self.max_draws == 0 || self.n_bins == 0 {
            return Err(MarginalError::Config(
                "batch_size, max_draws and n_bins must all be positive".to_string(),
            ));
        }
        if !(self.tempering_exponent > 0.0 && self.tempering_exponent < 1.0) {
            return Err(MarginalError::Config(format!(
                "tempering_exponent must be in (0, 1), got {}",
                self.tempering_exponent
            )));
        }
        if !(self.weight_floor > 0.0 && self.weight_floor < 1.0) {
            return Err(MarginalError::Config(format!(
                "weight_floor must be in (0, 1), got {}",
                self.weight_floor
            )));
        }
        if !(self.target_effective_samples > 0.0) {
            return Err(MarginalError::Config(format!(
                "target_effective_samples must be positive, got {}",
                self.target_effective_samples
            )));
        }
        Ok(())
    }
}

/// Running state of an integration: proposals and weight accumulators.
///
/// The weight sums are stored divided by `exp(ln_scale)` (and `exp(2 ln_scale)` for the sum of
/// squares), where `ln_scale` is the largest log weight seen so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerState {
    /// One proposal per dimension, in registration order
    pub proposals: Vec<HistogramProposal>,

    /// Which proposals may be re-fit
    pub adaptive: Vec<bool>,

    scaled_sum: f64,
    scaled_sum_sq: f64,
    ln_scale: f64,

    /// Total draws made, including those with zero weight
    pub n_draws: usize,

    /// Rounds completed
    pub n_rounds: usize,

    /// Rounds in which no draw had a positive weight
    pub n_degenerate_rounds: usize,

    /// Draws with positive prior but zero sampling density
    pub n_excluded: usize,

    /// Draws whose integrand was NaN or `+inf`
    pub n_non_finite: usize,
}

impl SamplerState {
    /// Fresh state with each proposal initialised per its dimension's [`SamplingInit`].
    pub fn new(space: &CoordinateSpace, n_bins: usize) -> Self {
        let proposals = space
            .dimensions()
            .map(|dim| match dim.sampling_init {
                SamplingInit::Uniform => HistogramProposal::uniform(dim.interval, n_bins),
                SamplingInit::Prior => {
                    HistogramProposal::from_prior(dim.interval, n_bins, dim.prior.as_ref())
                }
            })
            .collect();
        Self {
            proposals,
            adaptive: space.dimensions().map(|dim| dim.adaptive).collect(),
            scaled_sum: 0.0,
            scaled_sum_sq: 0.0,
            ln_scale: f64::NEG_INFINITY,
            n_draws: 0,
            n_rounds: 0,
            n_degenerate_rounds: 0,
            n_excluded: 0,
            n_non_finite: 0,
        }
    }

    /// Add a batch of log weights to the running sums.
    ///
    /// Every entry counts as a draw; `-inf` entries contribute zero weight.
    pub fn accumulate(&mut self, ln_weights: &[f64]) {
        let batch_max = ln_weights
            .iter()
            .copied()
            .filter(|w| w.is_finite())
            .fold(f64::NEG_INFINITY, f64::max);

        if batch_max > self.ln_scale {
            let factor = (self.ln_scale - batch_max).exp();
            self.scaled_sum *= factor;
            self.scaled_sum_sq *= factor * factor;
            self.ln_scale = batch_max;
        }

        for &ln_w in ln_weights {
            if ln_w.is_finite() {
                let w = (ln_w - self.ln_scale).exp();
                self.scaled_sum += w;
                self.scaled_sum_sq += w * w;
            }
        }
        self.n_draws += ln_weights.len();
    }

    /// Natural log of the current integral estimate, `-inf` while every weight is zero.
    pub fn ln_estimate(&self) -> f64 {
        if self.n_draws == 0 || self.scaled_sum <= 0.0 {
            return f64::NEG_INFINITY;
        }
        self.ln_scale + (self.scaled_sum / self.n_draws as f64).ln()
    }

    /// Current integral estimate `Σw / n`.
    pub fn estimate(&self) -> f64 {
        self.ln_estimate().exp()
    }

    /// Variance of the estimate, `(Σw²/n - (Σw/n)²) / n`.
    pub fn variance(&self) -> f64 {
        if self.n_draws == 0 || self.scaled_sum <= 0.0 {
            return 0.0;
        }
        let n = self.n_draws as f64;
        let mean = self.scaled_sum / n;
        let scaled = ((self.scaled_sum_sq / n - mean * mean) / n).max(0.0);
        scaled * (2.0 * self.ln_scale).exp()
    }

    /// Effective sample size `(Σw)² / Σw²`.
    pub fn effective_samples(&self) -> f64 {
        if self.scaled_sum_sq <= 0.0 {
            return 0.0;
        }
        self.scaled_sum * self.scaled_sum / self.scaled_sum_sq
    }
}

/// What happened in a single round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Proposals of adaptive dimensions were re-fit to the round's weights
    Adapted,
    /// At least one positive weight, but no adaptive dimensions
    Sampled,
    /// No draw had a positive weight; proposals were left alone
    Degenerate,
}

/// Why an integration run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalStatus {
    /// The effective sample size target was met and every test passed
    Converged,
    /// The draw cap was reached first
    DrawCapReached,
}

/// Progress of a run, passed to the callback after each round.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Round number (0-indexed)
    pub round: usize,

    pub n_draws: usize,

    pub max_draws: usize,

    pub ln_estimate: f64,

    pub effective_samples: f64,
}

/// Outcome of [`Integrator::integrate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationResult {
    pub estimate: f64,

    /// Natural log of the estimate; finite even when `estimate` overflows
    pub ln_estimate: f64,

    pub variance: f64,

    pub effective_samples: f64,

    pub status: TerminalStatus,

    /// Final verdict of each convergence test, keyed by test name
    pub test_outcomes: IndexMap<String, bool>,

    /// Proposals and counters at the end of the run
    pub state: SamplerState,

    pub history: DrawHistory,
}

impl IntegrationResult {
    pub fn converged(&self) -> bool {
        self.status == TerminalStatus::Converged
    }

    pub fn n_draws(&self) -> usize {
        self.state.n_draws
    }
}

/// Adaptive Monte Carlo integrator over a borrowed coordinate space.
pub struct Integrator<'a> {
    space: &'a CoordinateSpace,
    config: IntegratorConfig,
}

impl<'a> Integrator<'a> {
    pub fn new(space: &'a CoordinateSpace, config: IntegratorConfig) -> MarginalResult<Self> {
        if space.is_empty() {
            return Err(MarginalError::Config(
                "Cannot integrate over an empty coordinate space".to_string(),
            ));
        }
        config.validate()?;
        Ok(Self { space, config })
    }

    pub fn config(&self) -> &IntegratorConfig {
        &self.config
    }

    /// Integrate `integrand` until convergence or the draw cap.
    pub fn integrate<I>(
        &self,
        integrand: &I,
        tests: &[Box<dyn ConvergenceTest>],
    ) -> MarginalResult<IntegrationResult>
    where
        I: Integrand + ?Sized,
    {
        self.integrate_with_progress(integrand, tests, None::<fn(&ProgressInfo)>)
    }

    /// Integrate `exp(surrogate)`, checking the surrogate matches the coordinate space first.
    pub fn integrate_surrogate(
        &self,
        surrogate: &dyn Surrogate,
        tests: &[Box<dyn ConvergenceTest>],
    ) -> MarginalResult<IntegrationResult> {
        self.integrate_surrogate_with_progress(surrogate, tests, None::<fn(&ProgressInfo)>)
    }

    pub fn integrate_surrogate_with_progress<F>(
        &self,
        surrogate: &dyn Surrogate,
        tests: &[Box<dyn ConvergenceTest>],
        progress_callback: Option<F>,
    ) -> MarginalResult<IntegrationResult>
    where
        F: FnMut(&ProgressInfo),
    {
        check_dimension(self.space.len(), surrogate.n_dims())?;
        self.integrate_with_progress(&SurrogateIntegrand::new(surrogate), tests, progress_callback)
    }

    /// Integrate, calling `progress_callback` after every round.
    pub fn integrate_with_progress<I, F>(
        &self,
        integrand: &I,
        tests: &[Box<dyn ConvergenceTest>],
        mut progress_callback: Option<F>,
    ) -> MarginalResult<IntegrationResult>
    where
        I: Integrand + ?Sized,
        F: FnMut(&ProgressInfo),
    {
        for test in tests {
            test.validate()?;
            if test.min_draws() > self.config.max_draws {
                warn!(
                    "Convergence test '{}' needs at least {} draws but max_draws is {}; \
                     the run cannot converge",
                    test.name(),
                    test.min_draws(),
                    self.config.max_draws
                );
            }
        }

        let mut rng = match self.config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let names: Vec<String> = self.space.names().iter().map(|s| s.to_string()).collect();
        let mut state = SamplerState::new(self.space, self.config.n_bins);
        let mut history = DrawHistory::new(names);
        let mut test_outcomes: IndexMap<String, bool> = tests
            .iter()
            .map(|test| (test.name().to_string(), false))
            .collect();
        let mut converged = false;

        while state.n_draws < self.config.max_draws {
            let n = self
                .config
                .batch_size
                .min(self.config.max_draws - state.n_draws);
            let outcome = self.run_round(&mut state, &mut history, integrand, n, &mut rng)?;
            debug!(
                "Round {}: {:?}, {} draws, ln Z = {:.6}, n_eff = {:.1}",
                state.n_rounds,
                outcome,
                state.n_draws,
                state.ln_estimate(),
                state.effective_samples()
            );

            for test in tests {
                test_outcomes.insert(test.name().to_string(), test.passed(&history));
            }
            converged = state.effective_samples() >= self.config.target_effective_samples
                && test_outcomes.values().all(|&passed| passed);

            if let Some(ref mut callback) = progress_callback {
                let info = ProgressInfo {
                    round: state.n_rounds - 1,
                    n_draws: state.n_draws,
                    max_draws: self.config.max_draws,
                    ln_estimate: state.ln_estimate(),
                    effective_samples: state.effective_samples(),
                };
                callback(&info);
            }

            if converged {
                break;
            }
        }

        let status = if converged {
            TerminalStatus::Converged
        } else {
            TerminalStatus::DrawCapReached
        };
        info!(
            "Integration finished ({:?}) after {} draws in {} rounds: ln Z = {:.6}, n_eff = {:.1}",
            status,
            state.n_draws,
            state.n_rounds,
            state.ln_estimate(),
            state.effective_samples()
        );
        if state.n_degenerate_rounds > 0 {
            warn!(
                "{} of {} rounds had no positive weight",
                state.n_degenerate_rounds, state.n_rounds
            );
        }
        if state.n_non_finite > 0 {
            warn!(
                "{} draws had a non-finite integrand and were given zero weight",
                state.n_non_finite
            );
        }

        Ok(IntegrationResult {
            estimate: state.estimate(),
            ln_estimate: state.ln_estimate(),
            variance: state.variance(),
            effective_samples: state.effective_samples(),
            status,
            test_outcomes,
            state,
            history,
        })
    }

    /// Draw `n` points, weigh them, record them and re-fit the proposals.
    fn run_round<I, R>(
        &self,
        state: &mut SamplerState,
        history: &mut DrawHistory,
        integrand: &I,
        n: usize,
        rng: &mut R,
    ) -> MarginalResult<RoundOutcome>
    where
        I: Integrand + ?Sized,
        R: Rng + ?Sized,
    {
        let n_dims = self.space.len();
        let mut coordinates = Array2::zeros((n, n_dims));
        for mut row in coordinates.outer_iter_mut() {
            for (value, proposal) in row.iter_mut().zip(&state.proposals) {
                *value = proposal.sample(rng);
            }
        }

        let ln_integrand: Vec<f64> = (0..n)
            .into_par_iter()
            .map(|i| integrand.ln_value(coordinates.row(i)))
            .collect();

        let mut joint_prior = Vec::with_capacity(n);
        let mut joint_sampling = Vec::with_capacity(n);
        for row in coordinates.outer_iter() {
            let mut prior = 1.0;
            let mut sampling = 1.0;
            for ((dim, proposal), &x) in self.space.dimensions().zip(&state.proposals).zip(&row) {
                prior *= dim.prior.density(x);
                sampling *= proposal.density(x);
            }
            joint_prior.push(prior);
            joint_sampling.push(sampling);
        }

        let mut ln_weights = Vec::with_capacity(n);
        for i in 0..n {
            if joint_prior[i] > 0.0 && !(joint_sampling[i] > 0.0 && joint_sampling[i].is_finite())
            {
                state.n_excluded += 1;
            }
            if ln_integrand[i].is_nan() || ln_integrand[i] == f64::INFINITY {
                state.n_non_finite += 1;
            }
            ln_weights.push(ln_weight(ln_integrand[i], joint_prior[i], joint_sampling[i]));
        }

        state.accumulate(&ln_weights);
        state.n_rounds += 1;

        let batch_max = ln_weights
            .iter()
            .copied()
            .filter(|w| w.is_finite())
            .fold(f64::NEG_INFINITY, f64::max);

        let outcome = if !batch_max.is_finite() {
            state.n_degenerate_rounds += 1;
            RoundOutcome::Degenerate
        } else if state.adaptive.iter().any(|&a| a) {
            let beta = self.config.tempering_exponent;
            let tempered: Vec<f64> = ln_weights
                .iter()
                .map(|w| (beta * (w - batch_max)).exp())
                .collect();
            for (j, proposal) in state.proposals.iter_mut().enumerate() {
                if state.adaptive[j] {
                    let column = coordinates.column(j).to_vec();
                    proposal.adapt(&column, &tempered, self.config.weight_floor);
                }
            }
            RoundOutcome::Adapted
        } else {
            RoundOutcome::Sampled
        };

        history.push_round(coordinates, ln_integrand, joint_prior, joint_sampling)?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergence::{MostSignificantPoint, NormalSubIntegrals};
    use crate::prior::{Prior, Uniform};
    use crate::registry::Interval;
    use approx::assert_relative_eq;
    use ndarray::ArrayView1;
    use std::sync::Arc;

    fn unit_square(adaptive: bool) -> CoordinateSpace {
        let mut space = CoordinateSpace::new();
        for name in ["x", "y"] {
            let prior: Arc<dyn Prior> = Arc::new(Uniform::new(0.0, 1.0));
            space
                .register(name, prior, Interval::new(0.0, 1.0), adaptive)
                .unwrap();
        }
        space
    }

    fn config(batch_size: usize, max_draws: usize, target: f64) -> IntegratorConfig {
        IntegratorConfig {
            batch_size,
            max_draws,
            target_effective_samples: target,
            seed: Some(42),
            ..Default::default()
        }
    }

    fn flat(_x: ArrayView1<f64>) -> f64 {
        0.0
    }

    fn linear(x: ArrayView1<f64>) -> f64 {
        (2.0 * x[0]).ln()
    }

    fn gaussian(x: ArrayView1<f64>) -> f64 {
        let sigma: f64 = 0.05;
        -((x[0] - 0.3).powi(2) + (x[1] - 0.6).powi(2)) / (2.0 * sigma * sigma)
    }

    fn huge(x: ArrayView1<f64>) -> f64 {
        1000.0 + gaussian(x)
    }

    fn nowhere(_x: ArrayView1<f64>) -> f64 {
        f64::NEG_INFINITY
    }

    #[test]
    fn test_config_validation() {
        let space = unit_square(true);
        let bad = [
            IntegratorConfig {
                batch_size: 0,
                ..Default::default()
            },
            IntegratorConfig {
                tempering_exponent: 0.0,
                ..Default::default()
            },
            IntegratorConfig {
                tempering_exponent: 1.0,
                ..Default::default()
            },
            IntegratorConfig {
                weight_floor: 1.0,
                ..Default::default()
            },
            // A zero floor lets unvisited bins lose all sampling density
            IntegratorConfig {
                weight_floor: 0.0,
                ..Default::default()
            },
            IntegratorConfig {
                weight_floor: f64::NAN,
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(matches!(
                Integrator::new(&space, config),
                Err(MarginalError::Config(_))
            ));
        }
        assert!(Integrator::new(&CoordinateSpace::new(), IntegratorConfig::default()).is_err());
    }

    #[test]
    fn test_sparse_rounds_keep_every_bin_reachable() {
        let mut space = CoordinateSpace::new();
        space
            .register("x", Arc::new(Uniform::new(0.0, 1.0)), Interval::new(0.0, 1.0), true)
            .unwrap();
        // Far fewer draws per round than bins, so most bins go unvisited each round
        let config = IntegratorConfig {
            batch_size: 30,
            max_draws: 3000,
            seed: Some(1),
            ..Default::default()
        };
        let floor = config.weight_floor / config.n_bins as f64;
        let result = Integrator::new(&space, config)
            .unwrap()
            .integrate(&flat, &[])
            .unwrap();

        let masses = result.state.proposals[0].masses();
        assert!(masses.iter().all(|&m| m >= floor * (1.0 - 1e-9)));
        assert_eq!(result.state.n_excluded, 0);
    }

    #[derive(Debug, serde::Serialize, serde::Deserialize)]
    struct Bowl {
        n_dims: usize,
    }

    #[typetag::serde]
    impl Surrogate for Bowl {
        fn n_dims(&self) -> usize {
            self.n_dims
        }

        fn predict(&self, x: ArrayView1<f64>) -> f64 {
            -(0..self.n_dims).map(|i| x[i] * x[i]).sum::<f64>()
        }
    }

    #[test]
    fn test_surrogate_dimension_checked() {
        let space = unit_square(false);
        let integrator = Integrator::new(&space, config(2000, 2000, 10.0)).unwrap();

        let err = integrator
            .integrate_surrogate(&Bowl { n_dims: 3 }, &[])
            .unwrap_err();
        assert_eq!(
            err,
            MarginalError::DimensionMismatch {
                expected: 2,
                found: 3
            }
        );

        let result = integrator
            .integrate_surrogate(&Bowl { n_dims: 2 }, &[])
            .unwrap();
        // ∫∫ exp(-x² - y²) over the unit square
        assert_relative_eq!(result.estimate, 0.557746, max_relative = 0.05);
    }

    #[test]
    fn test_config_defaults_from_partial_toml() {
        let config: IntegratorConfig = toml::from_str("max_draws = 500\n").unwrap();
        assert_eq!(config.max_draws, 500);
        assert_eq!(config.n_bins, 100);
        assert_eq!(config.tempering_exponent, 0.1);
    }

    #[test]
    fn test_flat_integrand_is_exact() {
        let space = unit_square(false);
        let integrator = Integrator::new(&space, config(1000, 10_000, 2000.0)).unwrap();
        let result = integrator.integrate(&flat, &[]).unwrap();

        assert!(result.converged());
        assert_eq!(result.n_draws(), 2000);
        assert_relative_eq!(result.estimate, 1.0, epsilon = 1e-12);
        assert_relative_eq!(result.effective_samples, 2000.0, epsilon = 1e-9);
        assert!(result.variance.abs() < 1e-15);
        assert_eq!(result.history.len(), 2000);
    }

    #[test]
    fn test_linear_integrand_is_unbiased() {
        let space = unit_square(false);
        let integrator = Integrator::new(&space, config(10_000, 100_000, 1e12)).unwrap();
        let result = integrator.integrate(&linear, &[]).unwrap();

        // Var(2x) = 1/3 per draw
        let expected_sd = (1.0 / 3.0 / 100_000.0_f64).sqrt();
        assert_eq!(result.status, TerminalStatus::DrawCapReached);
        assert!((result.estimate - 1.0).abs() < 5.0 * expected_sd);
        assert!((result.variance / expected_sd.powi(2) - 1.0).abs() < 0.1);
    }

    #[test]
    fn test_variance_shrinks_with_more_draws() {
        let space = unit_square(false);
        let small = Integrator::new(&space, config(1000, 1000, 1e12))
            .unwrap()
            .integrate(&linear, &[])
            .unwrap();
        let large = Integrator::new(&space, config(10_000, 100_000, 1e12))
            .unwrap()
            .integrate(&linear, &[])
            .unwrap();
        assert!(large.variance < small.variance / 10.0);
    }

    #[test]
    fn test_adaptation_improves_efficiency() {
        let expected = 2.0 * std::f64::consts::PI * 0.05 * 0.05;

        let adaptive = Integrator::new(&unit_square(true), config(5000, 100_000, 1e12))
            .unwrap()
            .integrate(&gaussian, &[])
            .unwrap();
        let fixed = Integrator::new(&unit_square(false), config(5000, 100_000, 1e12))
            .unwrap()
            .integrate(&gaussian, &[])
            .unwrap();

        assert_relative_eq!(adaptive.estimate, expected, max_relative = 0.05);
        assert_relative_eq!(fixed.estimate, expected, max_relative = 0.1);
        assert!(adaptive.effective_samples > 2.0 * fixed.effective_samples);

        // The adapted proposal concentrates near the peak
        let x_proposal = &adaptive.state.proposals[0];
        assert!(x_proposal.density(0.3) > 10.0 * x_proposal.density(0.9));
        assert!(x_proposal.density(0.9) > 0.0);
    }

    #[test]
    fn test_large_log_integrand_does_not_overflow() {
        let space = unit_square(true);
        let result = Integrator::new(&space, config(5000, 50_000, 1e12))
            .unwrap()
            .integrate(&huge, &[])
            .unwrap();
        let expected_ln = 1000.0 + (2.0 * std::f64::consts::PI * 0.05 * 0.05_f64).ln();

        assert!(result.estimate.is_infinite());
        assert!(result.ln_estimate.is_finite());
        assert_relative_eq!(result.ln_estimate, expected_ln, epsilon = 0.1);
        assert!(result.effective_samples > 0.0);
    }

    #[test]
    fn test_degenerate_rounds_are_counted() {
        let space = unit_square(true);
        let result = Integrator::new(&space, config(100, 500, 10.0))
            .unwrap()
            .integrate(&nowhere, &[])
            .unwrap();

        assert_eq!(result.status, TerminalStatus::DrawCapReached);
        assert_eq!(result.n_draws(), 500);
        assert_eq!(result.state.n_rounds, 5);
        assert_eq!(result.state.n_degenerate_rounds, 5);
        assert_eq!(result.estimate, 0.0);
        assert_eq!(result.effective_samples, 0.0);
        // Proposals were never re-fit
        assert_eq!(
            result.state.proposals[0],
            HistogramProposal::uniform(Interval::new(0.0, 1.0), 100)
        );
    }

    #[test]
    fn test_convergence_tests_gate_termination() {
        let space = unit_square(false);
        let tests: Vec<Box<dyn ConvergenceTest>> = vec![
            Box::new(MostSignificantPoint::new(0.01)),
            Box::new(NormalSubIntegrals::new(25, 0.01, 0.1).unwrap()),
        ];

        // n_eff is met after the first round, but the sub-integral test needs 250 draws
        let result = Integrator::new(&space, config(100, 10_000, 50.0))
            .unwrap()
            .integrate(&flat, &tests)
            .unwrap();
        assert!(result.converged());
        assert_eq!(result.n_draws(), 300);
        assert!(result.test_outcomes.values().all(|&p| p));

        // The cap is below what the sub-integral test can ever accept
        let result = Integrator::new(&space, config(100, 200, 50.0))
            .unwrap()
            .integrate(&flat, &tests)
            .unwrap();
        assert_eq!(result.status, TerminalStatus::DrawCapReached);
        assert!(!result.test_outcomes["normal_sub_integrals"]);
        assert!(result.test_outcomes["most_significant_point"]);
    }

    #[test]
    fn test_last_round_is_truncated_to_cap() {
        let space = unit_square(false);
        let result = Integrator::new(&space, config(300, 1000, 1e12))
            .unwrap()
            .integrate(&flat, &[])
            .unwrap();
        assert_eq!(result.n_draws(), 1000);
        assert_eq!(result.state.n_rounds, 4);
        assert_eq!(result.history.n_rounds(), 4);
    }

    #[test]
    fn test_seed_reproducibility() {
        let space = unit_square(true);
        let a = Integrator::new(&space, config(1000, 5000, 1e12))
            .unwrap()
            .integrate(&gaussian, &[])
            .unwrap();
        let b = Integrator::new(&space, config(1000, 5000, 1e12))
            .unwrap()
            .integrate(&gaussian, &[])
            .unwrap();
        assert_eq!(a.estimate, b.estimate);
        assert_eq!(a.history.flat_coordinates(), b.history.flat_coordinates());
    }

    #[test]
    fn test_progress_callback() {
        let space = unit_square(false);
        let mut rounds = Vec::new();
        Integrator::new(&space, config(100, 300, 1e12))
            .unwrap()
            .integrate_with_progress(
                &flat,
                &[],
                Some(|info: &ProgressInfo| rounds.push((info.round, info.n_draws))),
            )
            .unwrap();
        assert_eq!(rounds, vec![(0, 100), (1, 200), (2, 300)]);
    }

    #[test]
    fn test_accumulate_rescales() {
        let space = unit_square(false);
        let mut state = SamplerState::new(&space, 10);
        state.accumulate(&[0.0, f64::NEG_INFINITY]);
        state.accumulate(&[2.0_f64.ln()]);
        assert_eq!(state.n_draws, 3);
        assert_relative_eq!(state.estimate(), 1.0, epsilon = 1e-12);
        // (1 + 2)^2 / (1 + 4)
        assert_relative_eq!(state.effective_samples(), 1.8, epsilon = 1e-12);
    }
}
