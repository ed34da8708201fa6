//! Surrogate models of the log-likelihood and the integrands built from them.

use ndarray::{Array1, ArrayView1, ArrayView2};
use std::fmt::Debug;

/// A fitted, smooth approximation to the log-likelihood.
///
/// Surrogates are fit once and then only read, so they must be shareable across the
/// integrator's worker threads.
#[typetag::serde(tag = "type")]
pub trait Surrogate: Debug + Send + Sync {
    /// Number of coordinates the surrogate expects.
    fn n_dims(&self) -> usize;

    /// Predicted log-likelihood at a single coordinate vector.
    fn predict(&self, x: ArrayView1<f64>) -> f64;

    /// Predicted log-likelihood for each row of `xs`.
    fn predict_batch(&self, xs: ArrayView2<f64>) -> Array1<f64> {
        xs.outer_iter().map(|row| self.predict(row)).collect()
    }
}

/// Function being integrated, expressed through its natural logarithm.
///
/// Working in log space keeps `exp(ln L)` from overflowing for the large log-likelihoods
/// typical of loud signals. The integrand itself is `exp(ln_value(x))`.
pub trait Integrand: Sync {
    fn ln_value(&self, x: ArrayView1<f64>) -> f64;
}

impl<F> Integrand for F
where
    F: Fn(ArrayView1<f64>) -> f64 + Sync,
{
    fn ln_value(&self, x: ArrayView1<f64>) -> f64 {
        self(x)
    }
}

/// The integrand `exp(surrogate(x))`.
#[derive(Debug, Clone, Copy)]
pub struct SurrogateIntegrand<'a> {
    surrogate: &'a dyn Surrogate,
}

impl<'a> SurrogateIntegrand<'a> {
    pub fn new(surrogate: &'a dyn Surrogate) -> Self {
        Self { surrogate }
    }
}

impl Integrand for SurrogateIntegrand<'_> {
    fn ln_value(&self, x: ArrayView1<f64>) -> f64 {
        self.surrogate.predict(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Plane {
        slope: f64,
    }

    #[typetag::serde]
    impl Surrogate for Plane {
        fn n_dims(&self) -> usize {
            2
        }

        fn predict(&self, x: ArrayView1<f64>) -> f64 {
            self.slope * (x[0] + x[1])
        }
    }

    #[test]
    fn test_predict_batch_matches_predict() {
        let plane = Plane { slope: 2.0 };
        let xs = array![[0.0, 1.0], [1.0, 1.0], [-1.0, 0.5]];
        assert_eq!(plane.predict_batch(xs.view()), array![2.0, 4.0, -1.0]);
    }

    #[test]
    fn test_surrogate_integrand_is_log_space() {
        let plane = Plane { slope: 1.0 };
        let integrand = SurrogateIntegrand::new(&plane);
        assert_eq!(integrand.ln_value(array![1.0, 2.0].view()), 3.0);
    }

    fn neg_square(x: ArrayView1<f64>) -> f64 {
        -x.dot(&x)
    }

    #[test]
    fn test_function_integrand() {
        assert_eq!(Integrand::ln_value(&neg_square, array![1.0, 2.0].view()), -5.0);
    }
}
