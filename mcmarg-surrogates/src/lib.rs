//! Surrogate models fit to scattered log-likelihood evaluations.

pub mod gaussian_process;
pub mod polynomial;
pub mod selection;

use log::info;
use mcmarg_core::errors::{MarginalError, MarginalResult};
use mcmarg_core::evaluation::check_dimension;
use mcmarg_core::surrogate::Surrogate;
use ndarray::{ArrayView2, Axis};
use serde::{Deserialize, Serialize};

pub use gaussian_process::{fit_gaussian_process, GaussianProcessConfig, GaussianProcessSurrogate};
pub use polynomial::{fit_quadratic, PolynomialSurrogate, QuadraticFeatures, QuadraticSummary};
pub use selection::SelectionPolicy;

/// Model family used for the surrogate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum FitMethod {
    /// Degree-2 polynomial least squares
    #[default]
    Quadratic,
    /// Squared-exponential Gaussian process
    GaussianProcess {
        #[serde(default)]
        gaussian_process: GaussianProcessConfig,
    },
}

/// A surrogate together with the points it was fit to.
#[derive(Debug, Serialize, Deserialize)]
pub struct FittedSurrogate {
    pub model: Box<dyn Surrogate>,

    /// Indices into the fitter's input of the points used for the fit
    pub selected: Vec<usize>,

    /// Root-mean-square residual of the model over the selected points
    pub residual_std: f64,
}

/// Selects evaluations near the peak and fits a surrogate to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SurrogateFitter {
    #[serde(default)]
    pub method: FitMethod,

    #[serde(default)]
    pub selection: SelectionPolicy,

    /// Weight the fit by the reported uncertainty of each point
    #[serde(default)]
    pub use_reported_error: bool,
}

impl SurrogateFitter {
    pub fn new(method: FitMethod) -> Self {
        Self {
            method,
            ..Default::default()
        }
    }

    /// Common validation and selection, returning the selected rows.
    fn select(
        &self,
        coordinates: ArrayView2<f64>,
        ln_likelihood: &[f64],
        sigma: Option<&[f64]>,
    ) -> MarginalResult<Selection> {
        check_dimension(coordinates.nrows(), ln_likelihood.len())?;
        if let Some(sigma) = sigma {
            check_dimension(coordinates.nrows(), sigma.len())?;
        }
        let sigma = match (self.use_reported_error, sigma) {
            (true, Some(sigma)) => Some(sigma),
            (true, None) => {
                return Err(MarginalError::Input(
                    "Fit requested to use reported errors but none were given".to_string(),
                ))
            }
            (false, _) => None,
        };

        let indices = self.selection.select(ln_likelihood)?;
        info!(
            "Fitting surrogate to {} of {} evaluations",
            indices.len(),
            ln_likelihood.len()
        );
        Ok(Selection {
            coordinates: coordinates.select(Axis(0), &indices),
            ln_likelihood: indices.iter().map(|&i| ln_likelihood[i]).collect(),
            sigma: sigma.map(|s| indices.iter().map(|&i| s[i]).collect()),
            indices,
        })
    }

    /// Fit the configured surrogate.
    ///
    /// `coordinates` has one row per evaluation. `sigma` is only read when
    /// `use_reported_error` is set, and is then required.
    pub fn fit(
        &self,
        coordinates: ArrayView2<f64>,
        ln_likelihood: &[f64],
        sigma: Option<&[f64]>,
    ) -> MarginalResult<FittedSurrogate> {
        let selection = self.select(coordinates, ln_likelihood, sigma)?;
        let x = selection.coordinates.view();
        let sigma = selection.sigma.as_deref();

        let model: Box<dyn Surrogate> = match &self.method {
            FitMethod::Quadratic => Box::new(fit_quadratic(x, &selection.ln_likelihood, sigma)?),
            FitMethod::GaussianProcess { gaussian_process } => Box::new(fit_gaussian_process(
                x,
                &selection.ln_likelihood,
                sigma,
                gaussian_process,
            )?),
        };

        let predicted = model.predict_batch(x);
        let n = selection.ln_likelihood.len() as f64;
        let residual_std = (predicted
            .iter()
            .zip(&selection.ln_likelihood)
            .map(|(p, y)| (p - y).powi(2))
            .sum::<f64>()
            / n)
            .sqrt();
        info!("Surrogate residual std: {:.6}", residual_std);

        Ok(FittedSurrogate {
            model,
            selected: selection.indices,
            residual_std,
        })
    }

    /// Quadratic fit over the selected points, restated around its peak.
    ///
    /// Always uses the quadratic model, whatever `method` is configured.
    pub fn quadratic_summary(
        &self,
        coordinates: ArrayView2<f64>,
        ln_likelihood: &[f64],
        sigma: Option<&[f64]>,
    ) -> MarginalResult<QuadraticSummary> {
        let selection = self.select(coordinates, ln_likelihood, sigma)?;
        let model = fit_quadratic(
            selection.coordinates.view(),
            &selection.ln_likelihood,
            selection.sigma.as_deref(),
        )?;
        let summary = model.summary()?;
        info!(
            "Quadratic peak ln L = {:.6} at {:?}",
            summary.peak_ln_likelihood, summary.best_point
        );
        Ok(summary)
    }
}

struct Selection {
    indices: Vec<usize>,
    coordinates: ndarray::Array2<f64>,
    ln_likelihood: Vec<f64>,
    sigma: Option<Vec<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;
    use ndarray::Array2;

    fn paraboloid() -> (Array2<f64>, Vec<f64>) {
        // 7x7 grid around a peak of 100 at (0.5, -0.2)
        let coordinates = Array2::from_shape_fn((49, 2), |(i, j)| {
            let index = if j == 0 { i / 7 } else { i % 7 };
            (index as f64 - 3.0) * 0.5
        });
        let ln_l = coordinates
            .outer_iter()
            .map(|r| 100.0 - (r[0] - 0.5).powi(2) - 3.0 * (r[1] + 0.2).powi(2))
            .collect();
        (coordinates, ln_l)
    }

    #[test]
    fn test_quadratic_fit_is_exact() {
        let (coordinates, ln_l) = paraboloid();
        let fitted = SurrogateFitter::default()
            .fit(coordinates.view(), &ln_l, None)
            .unwrap();
        assert!(fitted.residual_std < 1e-9);
        assert!(!fitted.selected.is_empty());
        assert!(fitted.selected.iter().all(|&i| ln_l[i] > 89.0));
    }

    #[test]
    fn test_quadratic_summary() {
        let (coordinates, ln_l) = paraboloid();
        let summary = SurrogateFitter::default()
            .quadratic_summary(coordinates.view(), &ln_l, None)
            .unwrap();
        assert!(is_close!(summary.peak_ln_likelihood, 100.0));
        assert!((summary.best_point[0] - 0.5).abs() < 1e-8);
        assert!((summary.best_point[1] + 0.2).abs() < 1e-8);
        assert!((summary.fisher[[1, 1]] - 6.0).abs() < 1e-8);
    }

    #[test]
    fn test_reported_error_required_when_requested() {
        let (coordinates, ln_l) = paraboloid();
        let fitter = SurrogateFitter {
            use_reported_error: true,
            ..Default::default()
        };
        assert!(matches!(
            fitter.fit(coordinates.view(), &ln_l, None),
            Err(MarginalError::Input(_))
        ));
        let sigma = vec![0.1; ln_l.len()];
        assert!(fitter.fit(coordinates.view(), &ln_l, Some(&sigma)).is_ok());
    }

    #[test]
    fn test_length_mismatch() {
        let (coordinates, ln_l) = paraboloid();
        assert!(matches!(
            SurrogateFitter::default().fit(coordinates.view(), &ln_l[..10], None),
            Err(MarginalError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_gaussian_process_method() {
        let (coordinates, ln_l) = paraboloid();
        // Shift so the values sit near zero, where a zero-mean GP with bounded amplitude copes
        let shifted: Vec<f64> = ln_l.iter().map(|v| v - 100.0).collect();
        let fitter = SurrogateFitter {
            method: FitMethod::GaussianProcess {
                gaussian_process: GaussianProcessConfig {
                    restarts: 3,
                    seed: Some(1),
                },
            },
            ..Default::default()
        };
        let fitted = fitter.fit(coordinates.view(), &shifted, None).unwrap();
        assert!(fitted.residual_std < 0.05);
    }

    #[test]
    fn test_config_from_toml() {
        let fitter: SurrogateFitter = toml::from_str(
            r#"
            use_reported_error = true

            [method]
            method = "gaussian_process"

            [selection]
            min_points = 20
            "#,
        )
        .unwrap();
        assert!(fitter.use_reported_error);
        assert_eq!(fitter.selection.min_points, 20);
        assert_eq!(fitter.selection.ln_likelihood_offset, 10.0);
        assert!(matches!(
            fitter.method,
            FitMethod::GaussianProcess { ref gaussian_process } if gaussian_process.restarts == 9
        ));
    }
}
