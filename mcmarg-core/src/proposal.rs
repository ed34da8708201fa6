//! Piecewise-constant proposal densities used by the adaptive integrator.

use crate::prior::Prior;
use crate::registry::Interval;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A normalised histogram density over a closed interval.
///
/// Bin `i` covers `[low + i·h, low + (i+1)·h)` with `h = (high - low) / n_bins`; the last bin
/// also includes `high`. The density is zero outside the interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramProposal {
    interval: Interval,
    /// Probability mass of each bin, summing to one
    masses: Vec<f64>,
    /// Cumulative mass at the upper edge of each bin
    cumulative: Vec<f64>,
}

impl HistogramProposal {
    /// Flat density over `interval`.
    pub fn uniform(interval: Interval, n_bins: usize) -> Self {
        let n_bins = n_bins.max(1);
        Self::from_masses(interval, vec![1.0; n_bins])
    }

    /// The prior evaluated at each bin centre, normalised.
    ///
    /// Falls back to a flat density when the prior vanishes at every bin centre.
    pub fn from_prior(interval: Interval, n_bins: usize, prior: &dyn Prior) -> Self {
        let n_bins = n_bins.max(1);
        let width = interval.width() / n_bins as f64;
        let centres: Vec<f64> = (0..n_bins)
            .map(|i| interval.low + (i as f64 + 0.5) * width)
            .collect();
        let masses: Vec<f64> = prior
            .density_batch(&centres)
            .into_iter()
            .map(|d| if d.is_finite() && d > 0.0 { d } else { 0.0 })
            .collect();

        if masses.iter().sum::<f64>() > 0.0 {
            Self::from_masses(interval, masses)
        } else {
            Self::uniform(interval, n_bins)
        }
    }

    /// Build from unnormalised, non-negative bin masses with a positive sum.
    fn from_masses(interval: Interval, masses: Vec<f64>) -> Self {
        let total: f64 = masses.iter().sum();
        let masses: Vec<f64> = masses.into_iter().map(|m| m / total).collect();
        let mut cumulative = Vec::with_capacity(masses.len());
        let mut running = 0.0;
        for m in &masses {
            running += m;
            cumulative.push(running);
        }
        Self {
            interval,
            masses,
            cumulative,
        }
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn n_bins(&self) -> usize {
        self.masses.len()
    }

    pub fn masses(&self) -> &[f64] {
        &self.masses
    }

    fn bin_width(&self) -> f64 {
        self.interval.width() / self.n_bins() as f64
    }

    fn bin_of(&self, x: f64) -> usize {
        let raw = ((x - self.interval.low) / self.bin_width()).floor();
        (raw.max(0.0) as usize).min(self.n_bins() - 1)
    }

    /// Normalised density at `x`.
    pub fn density(&self, x: f64) -> f64 {
        if !self.interval.contains(x) {
            return 0.0;
        }
        self.masses[self.bin_of(x)] / self.bin_width()
    }

    /// Draw by inverting the piecewise-linear cumulative distribution.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let u: f64 = rng.gen();
        // First bin whose upper cumulative edge exceeds u; the clamp guards against the last
        // cumulative value rounding to just below one.
        let bin = self
            .cumulative
            .partition_point(|&c| c <= u)
            .min(self.n_bins() - 1);
        let lower = if bin == 0 { 0.0 } else { self.cumulative[bin - 1] };
        let fraction = if self.masses[bin] > 0.0 {
            ((u - lower) / self.masses[bin]).clamp(0.0, 1.0)
        } else {
            0.5
        };
        let x = self.interval.low + (bin as f64 + fraction) * self.bin_width();
        x.min(self.interval.high)
    }

    /// Replace the density with a weighted histogram of `points`, mixed with a flat floor.
    ///
    /// The new bin masses are `(1 - floor) · p + floor / n_bins` where `p` is the normalised
    /// weighted histogram, so every bin keeps at least `floor / n_bins` of the mass. Returns
    /// `false`, leaving the density unchanged, when no point in the interval carries a positive
    /// finite weight.
    pub fn adapt(&mut self, points: &[f64], weights: &[f64], floor: f64) -> bool {
        let n_bins = self.n_bins();
        let mut histogram = vec![0.0; n_bins];
        for (&x, &w) in points.iter().zip(weights) {
            if self.interval.contains(x) && w.is_finite() && w > 0.0 {
                histogram[self.bin_of(x)] += w;
            }
        }

        let total: f64 = histogram.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return false;
        }

        let floor = floor.clamp(0.0, 1.0);
        let masses = histogram
            .into_iter()
            .map(|h| (1.0 - floor) * h / total + floor / n_bins as f64)
            .collect();
        *self = Self::from_masses(self.interval, masses);
        true
    }
}
