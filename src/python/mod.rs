use crate::config::PipelineConfig;
use crate::pipeline::Pipeline;
use mcmarg_core::evaluation::EvaluationPoint;
use mcmarg_surrogates::SurrogateFitter;
use numpy::{PyReadonlyArray1, PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyString};

fn value_error(e: impl std::fmt::Display) -> PyErr {
    PyValueError::new_err(format!("{}", e))
}

/// Accepts either a TOML document or a dict with the same structure.
fn extract_config(config: &Bound<'_, PyAny>) -> PyResult<PipelineConfig> {
    if let Ok(text) = config.downcast::<PyString>() {
        return PipelineConfig::from_toml_str(&text.to_cow()?).map_err(value_error);
    }
    pythonize::depythonize_bound::<PipelineConfig>(config.clone()).map_err(value_error)
}

fn evaluation_points(
    coordinates: &PyReadonlyArray2<'_, f64>,
    ln_likelihood: &PyReadonlyArray1<'_, f64>,
    sigma: &PyReadonlyArray1<'_, f64>,
) -> PyResult<Vec<EvaluationPoint>> {
    let coordinates = coordinates.as_array();
    let ln_likelihood = ln_likelihood.as_array();
    let sigma = sigma.as_array();
    if coordinates.nrows() != ln_likelihood.len() || coordinates.nrows() != sigma.len() {
        return Err(PyValueError::new_err(
            "coordinates, ln_likelihood and sigma must have the same number of rows",
        ));
    }
    Ok(coordinates
        .outer_iter()
        .zip(ln_likelihood.iter().zip(sigma.iter()))
        .map(|(row, (&l, &s))| EvaluationPoint::new(row.to_vec(), l, s))
        .collect())
}

/// Filter, fit, integrate and assemble a posterior.
///
/// Returns a dict with the evidence estimate, convergence status, weighted posterior draws and
/// the marginal CDF of each dimension.
#[pyfunction]
#[pyo3(signature = (config, coordinates, ln_likelihood, sigma))]
fn run_pipeline<'py>(
    py: Python<'py>,
    config: &Bound<'py, PyAny>,
    coordinates: PyReadonlyArray2<'py, f64>,
    ln_likelihood: PyReadonlyArray1<'py, f64>,
    sigma: PyReadonlyArray1<'py, f64>,
) -> PyResult<Bound<'py, PyDict>> {
    let config = extract_config(config)?;
    let points = evaluation_points(&coordinates, &ln_likelihood, &sigma)?;
    let pipeline = Pipeline::from_config(config).map_err(value_error)?;
    let output = pipeline.run(&points).map_err(value_error)?;

    let result = PyDict::new_bound(py);
    let integration = &output.integration;
    result.set_item("estimate", integration.estimate)?;
    result.set_item("ln_estimate", integration.ln_estimate)?;
    result.set_item("variance", integration.variance)?;
    result.set_item("effective_samples", integration.effective_samples)?;
    result.set_item("converged", integration.converged())?;
    result.set_item("n_draws", integration.n_draws())?;
    let test_outcomes = PyDict::new_bound(py);
    for (name, passed) in &integration.test_outcomes {
        test_outcomes.set_item(name, *passed)?;
    }
    result.set_item("test_outcomes", test_outcomes)?;
    result.set_item("residual_std", output.surrogate.residual_std)?;
    result.set_item("n_kept", output.filter_report.n_kept)?;

    let posterior = &output.posterior;
    result.set_item("dimension_names", posterior.dimension_names().to_vec())?;
    result.set_item("samples", posterior.coordinates().to_pyarray_bound(py))?;
    result.set_item("weights", posterior.weights().to_pyarray_bound(py))?;
    result.set_item("ln_integrand", posterior.ln_integrand().to_pyarray_bound(py))?;

    let marginals = PyDict::new_bound(py);
    for (name, marginal) in &output.marginals {
        marginals.set_item(
            name,
            (
                marginal.grid.to_pyarray_bound(py),
                marginal.cdf.to_pyarray_bound(py),
            ),
        )?;
    }
    result.set_item("marginals", marginals)?;

    if let Some(resampled) = &output.resampled {
        result.set_item("resampled", resampled.to_pyarray_bound(py))?;
    }
    Ok(result)
}

/// Quadratic fit around the log-likelihood peak.
///
/// `fitter` is an optional dict of surrogate fitter settings.
#[pyfunction]
#[pyo3(signature = (coordinates, ln_likelihood, sigma=None, fitter=None))]
fn fit_quadratic_summary<'py>(
    py: Python<'py>,
    coordinates: PyReadonlyArray2<'py, f64>,
    ln_likelihood: PyReadonlyArray1<'py, f64>,
    sigma: Option<PyReadonlyArray1<'py, f64>>,
    fitter: Option<Bound<'py, PyAny>>,
) -> PyResult<Bound<'py, PyDict>> {
    let fitter = match fitter {
        Some(fitter) => {
            pythonize::depythonize_bound::<SurrogateFitter>(fitter).map_err(value_error)?
        }
        None => SurrogateFitter::default(),
    };
    let ln_likelihood = ln_likelihood.as_array().to_vec();
    let sigma = sigma.map(|s| s.as_array().to_vec());
    let summary = fitter
        .quadratic_summary(coordinates.as_array(), &ln_likelihood, sigma.as_deref())
        .map_err(value_error)?;

    let result = PyDict::new_bound(py);
    result.set_item("peak_ln_likelihood", summary.peak_ln_likelihood)?;
    result.set_item("best_point", summary.best_point.to_pyarray_bound(py))?;
    result.set_item("fisher", summary.fisher.to_pyarray_bound(py))?;
    Ok(result)
}

#[pymodule]
#[pyo3(name = "_lib")]
fn mcmarg(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add_function(wrap_pyfunction!(run_pipeline, m)?)?;
    m.add_function(wrap_pyfunction!(fit_quadratic_summary, m)?)?;
    Ok(())
}
