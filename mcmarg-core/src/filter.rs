//! Sanity cuts applied to raw evaluations before any fitting.

use crate::evaluation::EvaluationPoint;
use log::debug;
use serde::{Deserialize, Serialize};

/// In-plane spin magnitude (squared, summed over both bodies) above which a point is treated
/// as precessing.
pub const PRECESSION_THRESHOLD: f64 = 0.01;

fn default_max_total_mass() -> f64 {
    1e5
}

fn default_max_sigma() -> f64 {
    0.6
}

fn default_ln_likelihood_ceiling() -> f64 {
    f64::INFINITY
}

fn default_exclude_precessing() -> bool {
    true
}

/// Cutoffs applied to each evaluation.
///
/// A point survives when
/// - its total mass (if known) is at most `max_total_mass`,
/// - its reported uncertainty is at most `max_sigma`,
/// - its log-likelihood is strictly below `ln_likelihood_ceiling`, and
/// - it is not precessing, when `exclude_precessing` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleFilter {
    #[serde(default = "default_max_total_mass")]
    pub max_total_mass: f64,
    #[serde(default = "default_max_sigma")]
    pub max_sigma: f64,
    /// Log-likelihoods at or above this are physically implausible
    #[serde(default = "default_ln_likelihood_ceiling")]
    pub ln_likelihood_ceiling: f64,
    #[serde(default = "default_exclude_precessing")]
    pub exclude_precessing: bool,
}

impl Default for SampleFilter {
    fn default() -> Self {
        Self {
            max_total_mass: default_max_total_mass(),
            max_sigma: default_max_sigma(),
            ln_likelihood_ceiling: default_ln_likelihood_ceiling(),
            exclude_precessing: default_exclude_precessing(),
        }
    }
}

/// Why a point was dropped. Checks run in declaration order and the first failure wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    Precessing,
    TooMassive,
    UncertaintyTooLarge,
    InsaneLikelihood,
}

/// Number of points dropped for each reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterReport {
    pub n_input: usize,
    pub n_kept: usize,
    pub precessing: usize,
    pub too_massive: usize,
    pub uncertainty_too_large: usize,
    pub insane_likelihood: usize,
}

impl FilterReport {
    fn record(&mut self, reason: RejectionReason) {
        match reason {
            RejectionReason::Precessing => self.precessing += 1,
            RejectionReason::TooMassive => self.too_massive += 1,
            RejectionReason::UncertaintyTooLarge => self.uncertainty_too_large += 1,
            RejectionReason::InsaneLikelihood => self.insane_likelihood += 1,
        }
    }
}

impl SampleFilter {
    /// Reason `point` fails the cuts, or `None` if it passes.
    pub fn check(&self, point: &EvaluationPoint) -> Option<RejectionReason> {
        if self.exclude_precessing && point.in_plane_spin_sq > PRECESSION_THRESHOLD {
            return Some(RejectionReason::Precessing);
        }
        if point.total_mass.is_some_and(|m| m > self.max_total_mass) {
            return Some(RejectionReason::TooMassive);
        }
        if point.sigma.is_nan() || point.sigma > self.max_sigma {
            return Some(RejectionReason::UncertaintyTooLarge);
        }
        if point.ln_likelihood.is_nan() || point.ln_likelihood >= self.ln_likelihood_ceiling {
            return Some(RejectionReason::InsaneLikelihood);
        }
        None
    }

    /// Keep the points passing every cut, in their original order.
    pub fn apply(&self, points: &[EvaluationPoint]) -> (Vec<EvaluationPoint>, FilterReport) {
        let mut report = FilterReport {
            n_input: points.len(),
            ..Default::default()
        };

        let kept: Vec<EvaluationPoint> = points
            .iter()
            .filter(|point| match self.check(point) {
                Some(reason) => {
                    debug!("Skipping {:?}: {:?}", point.coordinates, reason);
                    report.record(reason);
                    false
                }
                None => true,
            })
            .cloned()
            .collect();

        report.n_kept = kept.len();
        (kept, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(x: f64, ln_l: f64, sigma: f64) -> EvaluationPoint {
        EvaluationPoint::new(vec![x], ln_l, sigma)
    }

    #[test]
    fn test_default_cuts() {
        let filter = SampleFilter::default();
        assert_eq!(filter.max_total_mass, 1e5);
        assert_eq!(filter.max_sigma, 0.6);
        assert!(filter.ln_likelihood_ceiling.is_infinite());
        assert!(filter.exclude_precessing);
    }

    #[test]
    fn test_each_cut() {
        let filter = SampleFilter {
            max_total_mass: 100.0,
            max_sigma: 0.5,
            ln_likelihood_ceiling: 1000.0,
            exclude_precessing: true,
        };

        assert_eq!(filter.check(&point(0.0, 10.0, 0.1)), None);
        assert_eq!(
            filter.check(&point(0.0, 10.0, 0.1).with_total_mass(150.0)),
            Some(RejectionReason::TooMassive)
        );
        assert_eq!(
            filter.check(&point(0.0, 10.0, 0.9)),
            Some(RejectionReason::UncertaintyTooLarge)
        );
        assert_eq!(
            filter.check(&point(0.0, 1000.0, 0.1)),
            Some(RejectionReason::InsaneLikelihood)
        );
        assert_eq!(
            filter.check(&point(0.0, 10.0, 0.1).with_in_plane_spins(0.2, 0.0, 0.0, 0.0)),
            Some(RejectionReason::Precessing)
        );
        assert_eq!(
            filter.check(&point(0.0, 10.0, f64::NAN)),
            Some(RejectionReason::UncertaintyTooLarge)
        );
    }

    #[test]
    fn test_precessing_points_kept_when_allowed() {
        let filter = SampleFilter {
            exclude_precessing: false,
            ..Default::default()
        };
        let p = point(0.0, 10.0, 0.1).with_in_plane_spins(0.5, 0.5, 0.0, 0.0);
        assert_eq!(filter.check(&p), None);
    }

    #[test]
    fn test_apply_is_order_preserving_subset() {
        let filter = SampleFilter::default();
        let points: Vec<EvaluationPoint> = (0..20)
            .map(|i| point(i as f64, i as f64, if i % 3 == 0 { 1.0 } else { 0.1 }))
            .collect();

        let (kept, report) = filter.apply(&points);

        assert_eq!(report.n_input, 20);
        assert_eq!(report.uncertainty_too_large, 7);
        assert_eq!(report.n_kept, kept.len());
        assert_eq!(kept.len(), 13);
        assert!(kept.iter().all(|k| points.contains(k)));
        let xs: Vec<f64> = kept.iter().map(|p| p.coordinates[0]).collect();
        assert!(xs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_empty_result_is_not_an_error() {
        let filter = SampleFilter {
            max_sigma: 0.0,
            ..Default::default()
        };
        let (kept, report) = filter.apply(&[point(0.0, 1.0, 0.1)]);
        assert!(kept.is_empty());
        assert_eq!(report.uncertainty_too_large, 1);
    }
}
