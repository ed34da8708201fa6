//! Convergence tests run by the integrator after every round.
//!
//! A run converges once the effective sample size reaches its target *and* every registered
//! test passes. Tests only see the draw history; they never modify it.

use crate::errors::{MarginalError, MarginalResult};
use crate::history::DrawHistory;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A pass/fail check over the draws made so far.
#[typetag::serde(tag = "type")]
pub trait ConvergenceTest: Debug + Send + Sync {
    /// Short identifier used in logs and results.
    fn name(&self) -> &str;

    /// Number of draws below which the test can never pass.
    fn min_draws(&self) -> usize {
        0
    }

    /// Check the test's own parameters.
    fn validate(&self) -> MarginalResult<()> {
        Ok(())
    }

    fn passed(&self, history: &DrawHistory) -> bool;
}

/// Passes while no single draw dominates the integral.
///
/// The largest weight must be strictly less than `max_fraction` of the summed weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MostSignificantPoint {
    pub max_fraction: f64,
}

impl MostSignificantPoint {
    pub fn new(max_fraction: f64) -> Self {
        Self { max_fraction }
    }
}

impl Default for MostSignificantPoint {
    fn default() -> Self {
        Self { max_fraction: 0.01 }
    }
}

#[typetag::serde]
impl ConvergenceTest for MostSignificantPoint {
    fn name(&self) -> &str {
        "most_significant_point"
    }

    fn validate(&self) -> MarginalResult<()> {
        if !(self.max_fraction > 0.0 && self.max_fraction <= 1.0) {
            return Err(MarginalError::Config(format!(
                "max_fraction must be in (0, 1], got {}",
                self.max_fraction
            )));
        }
        Ok(())
    }

    fn passed(&self, history: &DrawHistory) -> bool {
        // Relative weights peak at exactly one
        match history.relative_weights() {
            Some(weights) => {
                let total: f64 = weights.iter().sum();
                1.0 / total < self.max_fraction
            }
            None => false,
        }
    }
}

const DEFAULT_DRAWS_PER_SUB_INTEGRAL: usize = 10;

fn default_draws_per_sub_integral() -> usize {
    DEFAULT_DRAWS_PER_SUB_INTEGRAL
}

/// Splits the draws into contiguous sub-integrals and checks that their estimates look
/// normally distributed with a small relative spread.
///
/// Passes when the D'Agostino–Pearson normality p-value is at least `min_p_value` and
/// `std(sub-integrals) / sqrt(n_sub_integrals) / mean(sub-integrals)` is below
/// `max_relative_error`. Identical sub-integrals pass the normality check trivially.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalSubIntegrals {
    pub n_sub_integrals: usize,
    pub min_p_value: f64,
    pub max_relative_error: f64,
    #[serde(default = "default_draws_per_sub_integral")]
    pub min_draws_per_sub_integral: usize,
}

impl NormalSubIntegrals {
    /// Fewest sub-integrals for which the normality test is meaningful.
    pub const MIN_SUB_INTEGRALS: usize = 20;

    pub fn new(
        n_sub_integrals: usize,
        min_p_value: f64,
        max_relative_error: f64,
    ) -> MarginalResult<Self> {
        let test = Self {
            n_sub_integrals,
            min_p_value,
            max_relative_error,
            min_draws_per_sub_integral: DEFAULT_DRAWS_PER_SUB_INTEGRAL,
        };
        test.validate()?;
        Ok(test)
    }

    /// Mean weight of each contiguous chunk, sizes differing by at most one.
    fn sub_integrals(&self, weights: &[f64]) -> Vec<f64> {
        let n = weights.len();
        let k = self.n_sub_integrals;
        let (base, extra) = (n / k, n % k);
        let mut start = 0;
        (0..k)
            .map(|i| {
                let size = base + usize::from(i < extra);
                let chunk = &weights[start..start + size];
                start += size;
                chunk.iter().sum::<f64>() / size as f64
            })
            .collect()
    }
}

impl Default for NormalSubIntegrals {
    fn default() -> Self {
        Self {
            n_sub_integrals: 25,
            min_p_value: 0.01,
            max_relative_error: 0.1,
            min_draws_per_sub_integral: DEFAULT_DRAWS_PER_SUB_INTEGRAL,
        }
    }
}

#[typetag::serde]
impl ConvergenceTest for NormalSubIntegrals {
    fn name(&self) -> &str {
        "normal_sub_integrals"
    }

    fn min_draws(&self) -> usize {
        self.n_sub_integrals * self.min_draws_per_sub_integral.max(1)
    }

    fn validate(&self) -> MarginalResult<()> {
        if self.n_sub_integrals < Self::MIN_SUB_INTEGRALS {
            return Err(MarginalError::Config(format!(
                "At least {} sub-integrals are needed for a normality test, got {}",
                Self::MIN_SUB_INTEGRALS,
                self.n_sub_integrals
            )));
        }
        if !(0.0..=1.0).contains(&self.min_p_value) {
            return Err(MarginalError::Config(format!(
                "min_p_value must be in [0, 1], got {}",
                self.min_p_value
            )));
        }
        if !(self.max_relative_error > 0.0) {
            return Err(MarginalError::Config(format!(
                "max_relative_error must be positive, got {}",
                self.max_relative_error
            )));
        }
        Ok(())
    }

    fn passed(&self, history: &DrawHistory) -> bool {
        if history.len() < self.min_draws() {
            return false;
        }
        let weights = match history.relative_weights() {
            Some(weights) => weights,
            None => return false,
        };

        let values = self.sub_integrals(&weights);
        let k = values.len() as f64;
        let mean = values.iter().sum::<f64>() / k;
        if !(mean > 0.0) {
            return false;
        }
        let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / k).sqrt();
        let relative_error = std / k.sqrt() / mean;

        let normal = match normal_test_p_value(&values) {
            Some(p) => p >= self.min_p_value,
            None => true,
        };

        normal && relative_error < self.max_relative_error
    }
}

/// D'Agostino–Pearson omnibus normality test.
///
/// Combines the skewness and kurtosis z-scores into `K² = Z_s² + Z_k²` and returns the
/// chi-squared (two degrees of freedom) survival probability `exp(-K²/2)`. Returns `None` for
/// fewer than eight values or when all values are identical.
pub fn normal_test_p_value(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 8 {
        return None;
    }
    let nf = n as f64;
    let mean = values.iter().sum::<f64>() / nf;
    let central_moment =
        |order: i32| values.iter().map(|v| (v - mean).powi(order)).sum::<f64>() / nf;
    let m2 = central_moment(2);
    if !(m2 > f64::EPSILON * mean.abs().max(f64::MIN_POSITIVE).powi(2)) {
        return None;
    }
    let skewness = central_moment(3) / m2.powf(1.5);
    let kurtosis = central_moment(4) / (m2 * m2);

    let k2 = skew_z(skewness, nf).powi(2) + kurtosis_z(kurtosis, nf).powi(2);
    let p = (-k2 / 2.0).exp();
    if p.is_nan() {
        None
    } else {
        Some(p)
    }
}

fn skew_z(skewness: f64, n: f64) -> f64 {
    let y = skewness * ((n + 1.0) * (n + 3.0) / (6.0 * (n - 2.0))).sqrt();
    let beta2 = 3.0 * (n * n + 27.0 * n - 70.0) * (n + 1.0) * (n + 3.0)
        / ((n - 2.0) * (n + 5.0) * (n + 7.0) * (n + 9.0));
    let w2 = -1.0 + (2.0 * (beta2 - 1.0)).sqrt();
    let delta = 1.0 / (0.5 * w2.ln()).sqrt();
    let alpha = (2.0 / (w2 - 1.0)).sqrt();
    let y = if y == 0.0 { 1.0 } else { y };
    let ratio = y / alpha;
    delta * (ratio + (ratio * ratio + 1.0).sqrt()).ln()
}

fn kurtosis_z(kurtosis: f64, n: f64) -> f64 {
    let expected = 3.0 * (n - 1.0) / (n + 1.0);
    let variance = 24.0 * n * (n - 2.0) * (n - 3.0)
        / ((n + 1.0).powi(2) * (n + 3.0) * (n + 5.0));
    let x = (kurtosis - expected) / variance.sqrt();
    let sqrt_beta1 = 6.0 * (n * n - 5.0 * n + 2.0) / ((n + 7.0) * (n + 9.0))
        * (6.0 * (n + 3.0) * (n + 5.0) / (n * (n - 2.0) * (n - 3.0))).sqrt();
    let a = 6.0
        + 8.0 / sqrt_beta1 * (2.0 / sqrt_beta1 + (1.0 + 4.0 / (sqrt_beta1 * sqrt_beta1)).sqrt());
    let term1 = 1.0 - 2.0 / (9.0 * a);
    let denom = 1.0 + x * (2.0 / (a - 4.0)).sqrt();
    if denom == 0.0 {
        return f64::NAN;
    }
    let term2 = denom.signum() * ((1.0 - 2.0 / a) / denom.abs()).cbrt();
    (term1 - term2) / (2.0 / (9.0 * a)).sqrt()
}
