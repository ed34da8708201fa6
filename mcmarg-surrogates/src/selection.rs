//! Choosing which evaluations the surrogate is fit to.

use log::debug;
use mcmarg_core::errors::{MarginalError, MarginalResult};
use serde::{Deserialize, Serialize};

fn default_ln_likelihood_offset() -> f64 {
    10.0
}

fn default_sanity_floor() -> f64 {
    10.0
}

fn default_min_points() -> usize {
    10
}

/// Window of log-likelihoods near the peak.
///
/// Points within `ln_likelihood_offset` of the best log-likelihood are kept. If the best
/// log-likelihood is below `sanity_floor` there is no clear peak and every point is kept. If
/// fewer than `min_points` land in the window, the `min_points` highest points are used instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionPolicy {
    #[serde(default = "default_ln_likelihood_offset")]
    pub ln_likelihood_offset: f64,
    #[serde(default = "default_sanity_floor")]
    pub sanity_floor: f64,
    #[serde(default = "default_min_points")]
    pub min_points: usize,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            ln_likelihood_offset: default_ln_likelihood_offset(),
            sanity_floor: default_sanity_floor(),
            min_points: default_min_points(),
        }
    }
}

impl SelectionPolicy {
    /// Indices of the selected points.
    ///
    /// Window selections keep the input order. The fallback returns indices sorted by
    /// descending log-likelihood, with ties in input order.
    pub fn select(&self, ln_likelihood: &[f64]) -> MarginalResult<Vec<usize>> {
        if ln_likelihood.is_empty() {
            return Err(MarginalError::Input(
                "Cannot select fit points from an empty evaluation set".to_string(),
            ));
        }
        if ln_likelihood.iter().any(|v| v.is_nan()) {
            return Err(MarginalError::Input(
                "Log-likelihoods must not be NaN".to_string(),
            ));
        }

        let max = ln_likelihood
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        if max < self.sanity_floor {
            debug!(
                "Peak ln L {} is below the sanity floor {}; using all {} points",
                max,
                self.sanity_floor,
                ln_likelihood.len()
            );
            return Ok((0..ln_likelihood.len()).collect());
        }

        let threshold = max - self.ln_likelihood_offset;
        let window: Vec<usize> = ln_likelihood
            .iter()
            .enumerate()
            .filter(|&(_, &v)| v > threshold)
            .map(|(i, _)| i)
            .collect();
        if window.len() >= self.min_points {
            return Ok(window);
        }

        debug!(
            "Only {} points within {} of the peak; using the top {}",
            window.len(),
            self.ln_likelihood_offset,
            self.min_points
        );
        let mut order: Vec<usize> = (0..ln_likelihood.len()).collect();
        // Stable, so equal log-likelihoods keep their input order
        order.sort_by(|&a, &b| ln_likelihood[b].total_cmp(&ln_likelihood[a]));
        order.truncate(self.min_points);
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window() {
        let policy = SelectionPolicy {
            min_points: 2,
            ..Default::default()
        };
        let ln_l = [50.0, 35.0, 45.0, 41.0, 40.0];
        assert_eq!(policy.select(&ln_l).unwrap(), vec![0, 2, 3]);
    }

    #[test]
    fn test_below_sanity_floor_uses_everything() {
        let policy = SelectionPolicy::default();
        let ln_l = [5.0, -100.0, 9.9];
        assert_eq!(policy.select(&ln_l).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_fallback_takes_top_ten() {
        let policy = SelectionPolicy::default();
        // One dominant point, the rest far below the window
        let mut ln_l: Vec<f64> = (0..15).map(|i| i as f64).collect();
        ln_l[7] = 100.0;
        let selected = policy.select(&ln_l).unwrap();
        assert_eq!(selected.len(), 10);
        assert_eq!(selected, vec![7, 14, 13, 12, 11, 10, 9, 8, 6, 5]);
    }

    #[test]
    fn test_fallback_ties_keep_input_order() {
        let policy = SelectionPolicy {
            min_points: 3,
            ..Default::default()
        };
        let ln_l = [100.0, 20.0, 20.0, 30.0, 20.0];
        assert_eq!(policy.select(&ln_l).unwrap(), vec![0, 3, 1]);
    }

    #[test]
    fn test_fallback_with_too_few_points() {
        let policy = SelectionPolicy::default();
        let ln_l = [100.0, 1.0, 2.0];
        assert_eq!(policy.select(&ln_l).unwrap(), vec![0, 2, 1]);
    }

    #[test]
    fn test_invalid_input() {
        let policy = SelectionPolicy::default();
        assert!(matches!(policy.select(&[]), Err(MarginalError::Input(_))));
        assert!(matches!(
            policy.select(&[1.0, f64::NAN]),
            Err(MarginalError::Input(_))
        ));
    }
}
