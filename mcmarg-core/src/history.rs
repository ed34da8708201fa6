//! Storage for every draw made by the integrator.

use crate::errors::{MarginalError, MarginalResult};
use crate::evaluation::check_dimension;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Per-draw record of an integration run.
///
/// Draws are stored round by round, in the order they were made. For each draw the history
/// keeps the coordinates, the natural log of the integrand, the joint prior density and the
/// joint sampling density. The importance weight of a draw is
/// `exp(ln_integrand) · joint_prior / joint_sampling`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawHistory {
    dimension_names: Vec<String>,

    /// Coordinates of each round: shape (n_round_draws, n_dims)
    rounds: Vec<Array2<f64>>,

    ln_integrand: Vec<f64>,
    joint_prior: Vec<f64>,
    joint_sampling: Vec<f64>,
}

impl DrawHistory {
    pub fn new(dimension_names: Vec<String>) -> Self {
        Self {
            dimension_names,
            rounds: Vec::new(),
            ln_integrand: Vec::new(),
            joint_prior: Vec::new(),
            joint_sampling: Vec::new(),
        }
    }

    /// Append the draws of one round.
    pub fn push_round(
        &mut self,
        coordinates: Array2<f64>,
        ln_integrand: Vec<f64>,
        joint_prior: Vec<f64>,
        joint_sampling: Vec<f64>,
    ) -> MarginalResult<()> {
        check_dimension(self.n_dims(), coordinates.ncols())?;
        let n = coordinates.nrows();
        if ln_integrand.len() != n || joint_prior.len() != n || joint_sampling.len() != n {
            return Err(MarginalError::Input(format!(
                "Round has {} draws but {} integrand, {} prior and {} sampling values",
                n,
                ln_integrand.len(),
                joint_prior.len(),
                joint_sampling.len()
            )));
        }

        self.rounds.push(coordinates);
        self.ln_integrand.extend(ln_integrand);
        self.joint_prior.extend(joint_prior);
        self.joint_sampling.extend(joint_sampling);
        Ok(())
    }

    pub fn dimension_names(&self) -> &[String] {
        &self.dimension_names
    }

    pub fn n_dims(&self) -> usize {
        self.dimension_names.len()
    }

    /// Total number of stored draws.
    pub fn len(&self) -> usize {
        self.ln_integrand.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ln_integrand.is_empty()
    }

    pub fn n_rounds(&self) -> usize {
        self.rounds.len()
    }

    /// All coordinates, shape (n_draws, n_dims).
    pub fn flat_coordinates(&self) -> Array2<f64> {
        let mut flat = Array2::zeros((self.len(), self.n_dims()));
        let mut offset = 0;
        for round in &self.rounds {
            for (i, row) in round.outer_iter().enumerate() {
                flat.row_mut(offset + i).assign(&row);
            }
            offset += round.nrows();
        }
        flat
    }

    /// Coordinates of a single dimension across every draw.
    pub fn column(&self, dim: usize) -> Array1<f64> {
        self.rounds
            .iter()
            .flat_map(|round| round.column(dim).to_vec())
            .collect()
    }

    pub fn ln_integrand(&self) -> &[f64] {
        &self.ln_integrand
    }

    /// Integrand values, `exp(ln_integrand)`.
    pub fn integrand(&self) -> Vec<f64> {
        self.ln_integrand.iter().map(|v| v.exp()).collect()
    }

    pub fn joint_prior(&self) -> &[f64] {
        &self.joint_prior
    }

    pub fn joint_sampling(&self) -> &[f64] {
        &self.joint_sampling
    }

    /// Natural log of each draw's importance weight.
    ///
    /// Draws without a usable weight get `-inf`: a non-positive prior, a non-positive or
    /// non-finite sampling density, or a NaN/`+inf` integrand.
    pub fn ln_weights(&self) -> Vec<f64> {
        self.ln_integrand
            .iter()
            .zip(&self.joint_prior)
            .zip(&self.joint_sampling)
            .map(|((&ln_i, &p), &q)| ln_weight(ln_i, p, q))
            .collect()
    }

    /// Importance weights divided by the largest weight, so the largest is exactly one.
    ///
    /// Returns `None` if no draw has a positive weight.
    pub fn relative_weights(&self) -> Option<Vec<f64>> {
        let ln_weights = self.ln_weights();
        let max = ln_weights
            .iter()
            .copied()
            .filter(|w| w.is_finite())
            .fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return None;
        }
        Some(ln_weights.iter().map(|w| (w - max).exp()).collect())
    }
}

/// Log importance weight of a single draw, `-inf` when the draw carries no usable weight.
pub fn ln_weight(ln_integrand: f64, prior: f64, sampling: f64) -> f64 {
    let usable = prior > 0.0
        && prior.is_finite()
        && sampling > 0.0
        && sampling.is_finite()
        && !ln_integrand.is_nan()
        && ln_integrand != f64::INFINITY;
    if usable {
        ln_integrand + prior.ln() - sampling.ln()
    } else {
        f64::NEG_INFINITY
    }
}
