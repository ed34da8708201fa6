//! Weighted posterior samples assembled from an integration history.

use crate::errors::{MarginalError, MarginalResult};
use crate::history::DrawHistory;
use log::info;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Draws kept for the posterior, with weights normalised so the largest is exactly one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosteriorSamples {
    dimension_names: Vec<String>,

    /// Surviving draws: shape (n_samples, n_dims)
    coordinates: Array2<f64>,

    ln_integrand: Array1<f64>,

    weights: Array1<f64>,

    /// Draws dropped for a non-positive or non-finite prior-to-sampling ratio
    pub n_discarded_ratio: usize,

    /// Draws dropped for falling more than the offset below the peak log integrand
    pub n_discarded_offset: usize,
}

impl PosteriorSamples {
    /// Select and weight the draws of `history`.
    ///
    /// A draw survives if `prior / sampling` is positive and finite, and its log integrand
    /// exceeds `max ln I - ln_offset`, where the maximum runs over every draw with a finite log
    /// integrand. The weight of a survivor is `exp(ln I) · prior / sampling`, divided by the
    /// largest such weight.
    pub fn assemble(history: &DrawHistory, ln_offset: f64) -> MarginalResult<Self> {
        if !(ln_offset > 0.0) {
            return Err(MarginalError::Config(format!(
                "Posterior log-integrand offset must be positive, got {}",
                ln_offset
            )));
        }

        let ln_integrand = history.ln_integrand();
        let max_ln_integrand = ln_integrand
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(f64::NEG_INFINITY, f64::max);
        let threshold = max_ln_integrand - ln_offset;

        let mut kept = Vec::new();
        let mut ln_weights = Vec::new();
        let mut n_discarded_ratio = 0;
        let mut n_discarded_offset = 0;
        for (i, (&prior, &sampling)) in history
            .joint_prior()
            .iter()
            .zip(history.joint_sampling())
            .enumerate()
        {
            let ratio = if sampling > 0.0 {
                prior / sampling
            } else {
                f64::NAN
            };
            if !(ratio > 0.0 && ratio.is_finite()) {
                n_discarded_ratio += 1;
            } else if !(ln_integrand[i] > threshold && ln_integrand[i].is_finite()) {
                n_discarded_offset += 1;
            } else {
                kept.push(i);
                ln_weights.push(ln_integrand[i] + ratio.ln());
            }
        }

        if kept.is_empty() {
            return Err(MarginalError::Input(format!(
                "No draws survive posterior assembly ({} dropped for their sampling ratio, {} \
                 below the offset)",
                n_discarded_ratio, n_discarded_offset
            )));
        }

        let max_ln_weight = ln_weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let weights: Array1<f64> = ln_weights
            .iter()
            .map(|w| (w - max_ln_weight).exp())
            .collect();
        let coordinates = history.flat_coordinates().select(Axis(0), &kept);
        let ln_integrand: Array1<f64> = kept.iter().map(|&i| ln_integrand[i]).collect();

        info!(
            "Posterior: {} of {} draws kept ({} by ratio, {} by offset dropped)",
            kept.len(),
            history.len(),
            n_discarded_ratio,
            n_discarded_offset
        );

        Ok(Self {
            dimension_names: history.dimension_names().to_vec(),
            coordinates,
            ln_integrand,
            weights,
            n_discarded_ratio,
            n_discarded_offset,
        })
    }

    pub fn dimension_names(&self) -> &[String] {
        &self.dimension_names
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn coordinates(&self) -> &Array2<f64> {
        &self.coordinates
    }

    pub fn ln_integrand(&self) -> &Array1<f64> {
        &self.ln_integrand
    }

    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    /// Samples of a dimension by name.
    pub fn column(&self, name: &str) -> Option<ArrayView1<f64>> {
        let index = self.dimension_names.iter().position(|n| n == name)?;
        Some(self.coordinates.column(index))
    }

    fn checked_column(&self, dim: usize) -> MarginalResult<ArrayView1<f64>> {
        if dim >= self.dimension_names.len() {
            return Err(MarginalError::DimensionMismatch {
                expected: self.dimension_names.len(),
                found: dim + 1,
            });
        }
        Ok(self.coordinates.column(dim))
    }

    /// Kish effective sample size `(Σw)² / Σw²`.
    pub fn effective_samples(&self) -> f64 {
        let sum = self.weights.sum();
        let sum_sq = self.weights.dot(&self.weights);
        if sum_sq > 0.0 {
            sum * sum / sum_sq
        } else {
            0.0
        }
    }

    /// Weighted mean of a dimension.
    pub fn mean(&self, dim: usize) -> MarginalResult<f64> {
        let column = self.checked_column(dim)?;
        Ok(column.dot(&self.weights) / self.weights.sum())
    }

    /// Weighted marginal CDF of one dimension.
    ///
    /// Evaluated on `n_points` evenly spaced values from the smallest to the largest sample as
    /// `Σ w[x < g] / Σ w`. Returns `(grid, cdf)`.
    pub fn marginal_cdf(
        &self,
        dim: usize,
        n_points: usize,
    ) -> MarginalResult<(Vec<f64>, Vec<f64>)> {
        if n_points < 2 {
            return Err(MarginalError::Config(format!(
                "A marginal CDF needs at least two grid points, got {}",
                n_points
            )));
        }
        let column = self.checked_column(dim)?;
        let low = column.iter().copied().fold(f64::INFINITY, f64::min);
        let high = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let total = self.weights.sum();

        let step = (high - low) / (n_points - 1) as f64;
        let grid: Vec<f64> = (0..n_points).map(|k| low + k as f64 * step).collect();
        let cdf = grid
            .iter()
            .map(|&g| {
                column
                    .iter()
                    .zip(&self.weights)
                    .filter(|&(&x, _)| x < g)
                    .map(|(_, &w)| w)
                    .sum::<f64>()
                    / total
            })
            .collect();
        Ok((grid, cdf))
    }

    /// Weighted quantile of one dimension: the smallest sample whose cumulative weight reaches
    /// `q` of the total.
    pub fn quantile(&self, dim: usize, q: f64) -> MarginalResult<f64> {
        if !(0.0..=1.0).contains(&q) {
            return Err(MarginalError::Config(format!(
                "Quantile must be in [0, 1], got {}",
                q
            )));
        }
        let column = self.checked_column(dim)?;
        let mut order: Vec<usize> = (0..column.len()).collect();
        order.sort_by(|&a, &b| column[a].total_cmp(&column[b]));

        let target = q * self.weights.sum();
        let mut cumulative = 0.0;
        for &i in &order {
            cumulative += self.weights[i];
            if cumulative >= target {
                return Ok(column[i]);
            }
        }
        // Rounding left the running sum just short of the total
        Ok(column[order[order.len() - 1]])
    }

    /// Draw `n` equally weighted samples, with replacement, proportionally to the weights.
    pub fn resample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Array2<f64> {
        let mut cumulative = Vec::with_capacity(self.len());
        let mut running = 0.0;
        for &w in &self.weights {
            running += w;
            cumulative.push(running);
        }

        let mut picked = Vec::with_capacity(n);
        for _ in 0..n {
            let u = rng.gen::<f64>() * running;
            let i = cumulative.partition_point(|&c| c <= u).min(self.len() - 1);
            picked.push(i);
        }
        self.coordinates.select(Axis(0), &picked)
    }
}
