//! Prior densities over a single dimension.
//!
//! Priors are only ever compared to sampling densities, so they need not integrate to one
//! over the sampling interval. The marginal-likelihood estimate *does* carry the prior's
//! normalisation though, so every prior documents the fixed constant it is normalised by.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A one-dimensional prior density.
///
/// Implementations must return a non-negative finite value for every finite input and zero
/// where the prior has no support.
#[typetag::serde(tag = "type")]
pub trait Prior: Debug + Send + Sync {
    fn density(&self, x: f64) -> f64;

    /// Evaluate the density over a slice of values.
    fn density_batch(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&x| self.density(x)).collect()
    }
}

/// Uniform density `1 / (high - low)` on `[low, high]`, zero outside. Normalised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Uniform {
    pub low: f64,
    pub high: f64,
}

impl Uniform {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }
}

#[typetag::serde]
impl Prior for Uniform {
    fn density(&self, x: f64) -> f64 {
        if x >= self.low && x <= self.high {
            1.0 / (self.high - self.low)
        } else {
            0.0
        }
    }
}

/// A constant density everywhere, normalised by construction to `value`.
///
/// Used for flat priors whose normalisation is fixed by convention rather than by the
/// sampling interval (e.g. `1/2` for a spin component on `[-1, 1]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constant {
    pub value: f64,
}

#[typetag::serde]
impl Prior for Constant {
    fn density(&self, _x: f64) -> f64 {
        self.value
    }
}

/// `scale * x^exponent` for `x > 0`, zero otherwise.
///
/// Normalisation is exactly `scale`; no interval-dependent constant is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerLaw {
    pub exponent: f64,
    pub scale: f64,
}

#[typetag::serde]
impl Prior for PowerLaw {
    fn density(&self, x: f64) -> f64 {
        if x > 0.0 {
            self.scale * x.powf(self.exponent)
        } else {
            0.0
        }
    }
}

/// Mass-ratio prior `q / (1 + q)^2` for `q > 0`. Unnormalised (constant 1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MassRatio {}

#[typetag::serde]
impl Prior for MassRatio {
    fn density(&self, q: f64) -> f64 {
        if q > 0.0 {
            q / (1.0 + q).powi(2)
        } else {
            0.0
        }
    }
}

/// Symmetric-mass-ratio prior `η^(-6/5) (1 - 4η)^(-1/2) / 1.44` on `0 < η < 1/4`.
///
/// The `1/1.44` constant is fixed; the density is not normalised on any particular interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SymmetricMassRatio {}

#[typetag::serde]
impl Prior for SymmetricMassRatio {
    fn density(&self, eta: f64) -> f64 {
        if eta > 0.0 && eta < 0.25 {
            1.0 / eta.powf(1.2) / (1.0 - 4.0 * eta).sqrt() / 1.44
        } else {
            0.0
        }
    }
}

/// Prior and default sampling range for a commonly used coordinate.
///
/// Names follow the evaluator's parameter names: `mtot`, `mc`, `m1`, `m2`, `q`, `eta`, `s1z`,
/// `s2z`, `xi` and `chi_eff`. Returns `None` for anything else.
pub fn standard_prior(name: &str) -> Option<(Box<dyn Prior>, (f64, f64))> {
    let entry: (Box<dyn Prior>, (f64, f64)) = match name {
        "mtot" => (
            Box::new(PowerLaw {
                exponent: 1.0,
                scale: 1.0 / (200.0 - 1.0),
            }),
            (1.0, 200.0),
        ),
        "mc" => (
            Box::new(PowerLaw {
                exponent: 1.0,
                scale: 1.0 / (90.0 - 0.9),
            }),
            (0.9, 90.0),
        ),
        "m1" | "m2" => (Box::new(Constant { value: 1.0 / 200.0 }), (1.0, 200.0)),
        "q" => (Box::new(MassRatio {}), (0.01, 1.0)),
        "eta" => (Box::new(SymmetricMassRatio {}), (0.01, 0.2499999)),
        "s1z" | "s2z" => (Box::new(Constant { value: 0.5 }), (-0.99, 0.99)),
        "xi" | "chi_eff" => (Box::new(Constant { value: 1.0 }), (-1.0, 1.0)),
        _ => return None,
    };
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;

    #[test]
    fn test_uniform_density() {
        let prior = Uniform::new(0.0, 4.0);
        assert!(is_close!(prior.density(1.0), 0.25));
        assert_eq!(prior.density(-1.0), 0.0);
        assert_eq!(prior.density(4.5), 0.0);
        assert_eq!(prior.density_batch(&[0.0, 2.0, 5.0]), vec![0.25, 0.25, 0.0]);
    }

    #[test]
    fn test_mass_ratio_peaks_at_equal_mass() {
        let prior = MassRatio {};
        assert!(is_close!(prior.density(1.0), 0.25));
        assert!(prior.density(0.5) < prior.density(1.0));
        assert_eq!(prior.density(0.0), 0.0);
    }

    #[test]
    fn test_symmetric_mass_ratio_support() {
        let prior = SymmetricMassRatio {};
        assert_eq!(prior.density(0.25), 0.0);
        assert_eq!(prior.density(0.0), 0.0);
        assert!(prior.density(0.1).is_finite());
        assert!(prior.density(0.1) > 0.0);
    }

    #[test]
    fn test_power_law() {
        let prior = PowerLaw {
            exponent: 2.0,
            scale: 0.5,
        };
        assert!(is_close!(prior.density(3.0), 4.5));
        assert_eq!(prior.density(-3.0), 0.0);
    }

    #[test]
    fn test_standard_priors() {
        let (prior, range) = standard_prior("s1z").unwrap();
        assert_eq!(range, (-0.99, 0.99));
        assert_eq!(prior.density(0.3), 0.5);

        let (prior, range) = standard_prior("mc").unwrap();
        assert_eq!(range, (0.9, 90.0));
        assert!(is_close!(prior.density(10.0), 10.0 / 89.1));

        assert!(standard_prior("distance").is_none());
    }

    #[test]
    fn test_prior_serialization() {
        let prior: Box<dyn Prior> = Box::new(Uniform::new(-1.0, 1.0));
        let json = serde_json::to_string(&prior).unwrap();
        assert!(json.contains("\"type\":\"Uniform\""));

        let restored: Box<dyn Prior> = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.density(0.0), 0.5);
    }
}
