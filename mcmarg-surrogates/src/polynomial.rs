//! Degree-2 polynomial surrogate fit by (weighted) least squares.
//!
//! Coordinates are centred on their mean and divided by their standard deviation before the
//! fit. Both the regression and [`QuadraticSummary`] work on the scaled basis, and results
//! are transformed back to the caller's coordinates.

use mcmarg_core::errors::{MarginalError, MarginalResult};
use mcmarg_core::evaluation::check_dimension;
use mcmarg_core::surrogate::Surrogate;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

/// Feature map `1, x_0, .., x_{d-1}, x_0², x_0 x_1, .., x_{d-1}²`.
///
/// Cross terms run over `i ≤ j` with `i` outermost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuadraticFeatures {
    pub n_dims: usize,
}

impl QuadraticFeatures {
    pub fn new(n_dims: usize) -> Self {
        Self { n_dims }
    }

    pub fn n_features(&self) -> usize {
        1 + self.n_dims + self.n_dims * (self.n_dims + 1) / 2
    }

    pub fn transform(&self, x: &[f64]) -> Vec<f64> {
        let mut features = Vec::with_capacity(self.n_features());
        features.push(1.0);
        features.extend_from_slice(x);
        for i in 0..self.n_dims {
            for j in i..self.n_dims {
                features.push(x[i] * x[j]);
            }
        }
        features
    }
}

/// Quadratic model of the log-likelihood.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolynomialSurrogate {
    features: QuadraticFeatures,
    /// Per-dimension mean of the training coordinates
    center: Vec<f64>,
    /// Per-dimension standard deviation of the training coordinates
    scale: Vec<f64>,
    /// Coefficients on the scaled feature basis
    coefficients: Vec<f64>,
}

/// Best-fit quadratic, restated around its extremum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuadraticSummary {
    /// Surrogate value at the stationary point
    pub peak_ln_likelihood: f64,
    pub best_point: Vec<f64>,
    /// `Γ = -∇² ln L`: shape (n_dims, n_dims)
    pub fisher: Array2<f64>,
    /// Gradient of the surrogate at the coordinate origin
    pub linear_term: Vec<f64>,
}

impl PolynomialSurrogate {
    fn scaled(&self, x: ArrayView1<f64>) -> Vec<f64> {
        x.iter()
            .zip(self.center.iter().zip(&self.scale))
            .map(|(v, (c, s))| (v - c) / s)
            .collect()
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Constant, gradient and Hessian of the model in scaled coordinates.
    fn scaled_terms(&self) -> (f64, DVector<f64>, DMatrix<f64>) {
        let d = self.features.n_dims;
        let constant = self.coefficients[0];
        let gradient = DVector::from_fn(d, |i, _| self.coefficients[1 + i]);
        let mut hessian = DMatrix::zeros(d, d);
        let mut k = 1 + d;
        for i in 0..d {
            for j in i..d {
                let c = self.coefficients[k];
                if i == j {
                    hessian[(i, i)] = 2.0 * c;
                } else {
                    hessian[(i, j)] = c;
                    hessian[(j, i)] = c;
                }
                k += 1;
            }
        }
        (constant, gradient, hessian)
    }

    /// Stationary point, peak value, Fisher matrix and linear term in the input coordinates.
    ///
    /// Fails if the quadratic part is singular, so that no unique stationary point exists.
    pub fn summary(&self) -> MarginalResult<QuadraticSummary> {
        let d = self.features.n_dims;
        let (constant, gradient, hessian) = self.scaled_terms();

        // Stationary point in scaled coordinates: H z = -g
        let z_best = hessian
            .clone()
            .lu()
            .solve(&(-&gradient))
            .ok_or_else(|| MarginalError::Fit("Quadratic term is singular".to_string()))?;
        let peak_ln_likelihood = constant + 0.5 * gradient.dot(&z_best);
        let best_point = (0..d)
            .map(|i| self.center[i] + self.scale[i] * z_best[i])
            .collect();

        // Chain rule through z = (x - center) / scale
        let fisher = Array2::from_shape_fn((d, d), |(i, j)| {
            -hessian[(i, j)] / (self.scale[i] * self.scale[j])
        });
        let z_origin = DVector::from_fn(d, |i, _| -self.center[i] / self.scale[i]);
        let gradient_origin = &gradient + &hessian * z_origin;
        let linear_term = (0..d).map(|i| gradient_origin[i] / self.scale[i]).collect();

        Ok(QuadraticSummary {
            peak_ln_likelihood,
            best_point,
            fisher,
            linear_term,
        })
    }
}

#[typetag::serde]
impl Surrogate for PolynomialSurrogate {
    fn n_dims(&self) -> usize {
        self.features.n_dims
    }

    fn predict(&self, x: ArrayView1<f64>) -> f64 {
        self.features
            .transform(&self.scaled(x))
            .iter()
            .zip(&self.coefficients)
            .map(|(f, c)| f * c)
            .sum()
    }
}

/// Least-squares quadratic through `ln_likelihood` at the rows of `coordinates`.
///
/// With `sigma` set, each residual is weighted by `1/σ²`. Fails when there are fewer points
/// than features, when the design matrix is rank deficient, or when a weight is unusable.
pub fn fit_quadratic(
    coordinates: ArrayView2<f64>,
    ln_likelihood: &[f64],
    sigma: Option<&[f64]>,
) -> MarginalResult<PolynomialSurrogate> {
    let (n, d) = coordinates.dim();
    check_dimension(n, ln_likelihood.len())?;
    let features = QuadraticFeatures::new(d);
    let p = features.n_features();
    if n < p {
        return Err(MarginalError::Fit(format!(
            "{} points cannot determine {} quadratic coefficients",
            n, p
        )));
    }

    let sqrt_weights: Vec<f64> = match sigma {
        Some(sigma) => {
            check_dimension(n, sigma.len())?;
            if let Some(bad) = sigma.iter().find(|s| !(**s > 0.0 && s.is_finite())) {
                return Err(MarginalError::Fit(format!(
                    "Reported uncertainty {} cannot be used as a weight",
                    bad
                )));
            }
            sigma.iter().map(|s| 1.0 / s).collect()
        }
        None => vec![1.0; n],
    };

    let center: Vec<f64> = (0..d)
        .map(|j| coordinates.column(j).sum() / n as f64)
        .collect();
    let scale: Vec<f64> = (0..d)
        .map(|j| {
            let var = coordinates
                .column(j)
                .iter()
                .map(|v| (v - center[j]).powi(2))
                .sum::<f64>()
                / n as f64;
            // A constant column leaves the design rank deficient; caught below
            if var > 0.0 {
                var.sqrt()
            } else {
                1.0
            }
        })
        .collect();

    let mut model = PolynomialSurrogate {
        features,
        center,
        scale,
        coefficients: vec![0.0; p],
    };

    let mut design = DMatrix::zeros(n, p);
    let mut target = DVector::zeros(n);
    for (i, row) in coordinates.outer_iter().enumerate() {
        let basis = features.transform(&model.scaled(row));
        for (k, f) in basis.iter().enumerate() {
            design[(i, k)] = f * sqrt_weights[i];
        }
        target[i] = ln_likelihood[i] * sqrt_weights[i];
    }

    let svd = design.svd(true, true);
    let max_singular = svd.singular_values.max();
    let tolerance = max_singular * n.max(p) as f64 * f64::EPSILON;
    if svd.rank(tolerance) < p {
        return Err(MarginalError::Fit(format!(
            "Quadratic design matrix is rank deficient ({} of {} coefficients determined)",
            svd.rank(tolerance),
            p
        )));
    }
    let solution = svd
        .solve(&target, tolerance)
        .map_err(|e| MarginalError::Fit(e.to_string()))?;
    model.coefficients = solution.iter().copied().collect();
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn truth(x: f64, y: f64) -> f64 {
        let (u, v) = (x - 1.0, y + 0.5);
        3.0 - u * u - 2.0 * v * v + 0.5 * u * v
    }

    fn scattered(n: usize, seed: u64) -> (Array2<f64>, Vec<f64>) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let coordinates =
            Array2::from_shape_fn((n, 2), |(_, j)| rng.gen_range(-3.0..3.0) + j as f64);
        let ln_l = coordinates
            .outer_iter()
            .map(|row| truth(row[0], row[1]))
            .collect();
        (coordinates, ln_l)
    }

    #[test]
    fn test_feature_order() {
        let features = QuadraticFeatures::new(2);
        assert_eq!(features.n_features(), 6);
        assert_eq!(
            features.transform(&[2.0, 3.0]),
            vec![1.0, 2.0, 3.0, 4.0, 6.0, 9.0]
        );
        assert_eq!(QuadraticFeatures::new(3).n_features(), 10);
    }

    #[test]
    fn test_exact_quadratic_is_reproduced() {
        let (coordinates, ln_l) = scattered(30, 1);
        let model = fit_quadratic(coordinates.view(), &ln_l, None).unwrap();

        let predicted = model.predict_batch(coordinates.view());
        for (p, e) in predicted.iter().zip(&ln_l) {
            assert_relative_eq!(*p, *e, epsilon = 1e-9);
        }
        assert_relative_eq!(
            model.predict(array![0.25, 0.75].view()),
            truth(0.25, 0.75),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_weighted_fit_of_exact_data() {
        let (coordinates, ln_l) = scattered(20, 2);
        let sigma: Vec<f64> = (0..20).map(|i| 0.1 + 0.05 * i as f64).collect();
        let model = fit_quadratic(coordinates.view(), &ln_l, Some(&sigma)).unwrap();
        assert_relative_eq!(model.predict(array![1.0, -0.5].view()), 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_summary() {
        let (coordinates, ln_l) = scattered(25, 3);
        let summary = fit_quadratic(coordinates.view(), &ln_l, None)
            .unwrap()
            .summary()
            .unwrap();

        assert_relative_eq!(summary.peak_ln_likelihood, 3.0, epsilon = 1e-8);
        assert_relative_eq!(summary.best_point[0], 1.0, epsilon = 1e-8);
        assert_relative_eq!(summary.best_point[1], -0.5, epsilon = 1e-8);
        let expected_fisher = array![[2.0, -0.5], [-0.5, 4.0]];
        for (f, e) in summary.fisher.iter().zip(expected_fisher.iter()) {
            assert_relative_eq!(*f, *e, epsilon = 1e-8);
        }
        // ∂/∂x at the origin: -2(0 - 1) + 0.5 * 0.5, ∂/∂y: -4(0.5) + 0.5 * (-1)
        assert_relative_eq!(summary.linear_term[0], 2.25, epsilon = 1e-8);
        assert_relative_eq!(summary.linear_term[1], -2.5, epsilon = 1e-8);
    }

    #[test]
    fn test_too_few_points() {
        let (coordinates, ln_l) = scattered(5, 4);
        assert!(matches!(
            fit_quadratic(coordinates.view(), &ln_l, None),
            Err(MarginalError::Fit(_))
        ));
    }

    #[test]
    fn test_rank_deficient_design() {
        // Every point on the line y = x
        let coordinates = Array2::from_shape_fn((10, 2), |(i, _)| i as f64);
        let ln_l: Vec<f64> = (0..10).map(|i| -(i as f64)).collect();
        assert!(matches!(
            fit_quadratic(coordinates.view(), &ln_l, None),
            Err(MarginalError::Fit(_))
        ));
    }

    #[test]
    fn test_bad_sigma() {
        let (coordinates, ln_l) = scattered(10, 5);
        let mut sigma = vec![0.1; 10];
        sigma[3] = 0.0;
        assert!(fit_quadratic(coordinates.view(), &ln_l, Some(&sigma)).is_err());
    }

    #[test]
    fn test_serialization() {
        let (coordinates, ln_l) = scattered(12, 6);
        let model: Box<dyn Surrogate> =
            Box::new(fit_quadratic(coordinates.view(), &ln_l, None).unwrap());
        let json = serde_json::to_string(&model).unwrap();
        let restored: Box<dyn Surrogate> = serde_json::from_str(&json).unwrap();
        let x = array![0.3, 0.1];
        assert_relative_eq!(
            restored.predict(x.view()),
            model.predict(x.view()),
            epsilon = 1e-12
        );
    }
}
