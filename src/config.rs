//! Run configuration, usually loaded from TOML.
//!
//! ```toml
//! [[dimensions]]
//! name = "mc"
//!
//! [[dimensions]]
//! name = "x"
//! low = 0.0
//! high = 1.0
//! prior = { type = "Uniform", low = 0.0, high = 1.0 }
//! adaptive = false
//!
//! [fit.method]
//! method = "quadratic"
//!
//! [integrator]
//! max_draws = 100000
//! seed = 42
//!
//! [[convergence]]
//! type = "NormalSubIntegrals"
//! n_sub_integrals = 25
//! min_p_value = 0.01
//! max_relative_error = 0.1
//! ```

use mcmarg_core::convergence::{ConvergenceTest, MostSignificantPoint, NormalSubIntegrals};
use mcmarg_core::errors::{MarginalError, MarginalResult};
use mcmarg_core::filter::SampleFilter;
use mcmarg_core::integrator::IntegratorConfig;
use mcmarg_core::prior::{standard_prior, Prior};
use mcmarg_core::registry::{CoordinateSpace, Dimension, Interval, SamplingInit};
use mcmarg_surrogates::SurrogateFitter;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

fn default_adaptive() -> bool {
    true
}

/// One integration dimension.
///
/// Any of `prior`, `low` and `high` left unset is taken from the standard prior of the same
/// name; for names without a standard prior all three must be given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionConfig {
    pub name: String,
    #[serde(default)]
    pub prior: Option<Arc<dyn Prior>>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default = "default_adaptive")]
    pub adaptive: bool,
    #[serde(default)]
    pub sampling_init: SamplingInit,
}

impl DimensionConfig {
    pub fn standard(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prior: None,
            low: None,
            high: None,
            adaptive: true,
            sampling_init: SamplingInit::Uniform,
        }
    }

    /// Fully specified dimension.
    pub fn new(name: impl Into<String>, prior: Arc<dyn Prior>, low: f64, high: f64) -> Self {
        Self {
            name: name.into(),
            prior: Some(prior),
            low: Some(low),
            high: Some(high),
            adaptive: true,
            sampling_init: SamplingInit::Uniform,
        }
    }

    pub fn with_adaptive(mut self, adaptive: bool) -> Self {
        self.adaptive = adaptive;
        self
    }

    pub fn with_sampling_init(mut self, sampling_init: SamplingInit) -> Self {
        self.sampling_init = sampling_init;
        self
    }

    fn resolve(&self) -> MarginalResult<Dimension> {
        let (standard, default_range) = match standard_prior(&self.name) {
            Some((prior, range)) => (Some(prior), Some(range)),
            None => (None, None),
        };
        let missing = || {
            MarginalError::Config(format!(
                "Dimension '{}' has no standard prior, so prior, low and high must all be set",
                self.name
            ))
        };

        let prior: Arc<dyn Prior> = match (&self.prior, standard) {
            (Some(prior), _) => prior.clone(),
            (None, Some(prior)) => Arc::from(prior),
            (None, None) => return Err(missing()),
        };
        let low = self
            .low
            .or(default_range.map(|r| r.0))
            .ok_or_else(missing)?;
        let high = self
            .high
            .or(default_range.map(|r| r.1))
            .ok_or_else(missing)?;

        Ok(Dimension {
            name: self.name.clone(),
            prior,
            interval: Interval::new(low, high),
            adaptive: self.adaptive,
            sampling_init: self.sampling_init,
        })
    }
}

fn default_ln_offset() -> f64 {
    10.0
}

fn default_n_cdf_points() -> usize {
    200
}

/// Posterior pruning and reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorConfig {
    /// Draws more than this far below the peak log integrand are dropped
    #[serde(default = "default_ln_offset")]
    pub ln_offset: f64,

    /// Grid size of each marginal CDF
    #[serde(default = "default_n_cdf_points")]
    pub n_cdf_points: usize,

    /// Number of equally weighted samples to resample, if any
    #[serde(default)]
    pub n_output_samples: Option<usize>,
}

impl Default for PosteriorConfig {
    fn default() -> Self {
        Self {
            ln_offset: default_ln_offset(),
            n_cdf_points: default_n_cdf_points(),
            n_output_samples: None,
        }
    }
}

fn default_convergence() -> Vec<Box<dyn ConvergenceTest>> {
    vec![
        Box::new(NormalSubIntegrals::default()),
        Box::new(MostSignificantPoint::default()),
    ]
}

/// Everything needed to go from raw evaluations to a posterior.
#[derive(Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub filter: SampleFilter,

    #[serde(default)]
    pub fit: SurrogateFitter,

    /// Integration dimensions, in the order of the evaluation coordinates
    pub dimensions: Vec<DimensionConfig>,

    #[serde(default)]
    pub integrator: IntegratorConfig,

    #[serde(default = "default_convergence")]
    pub convergence: Vec<Box<dyn ConvergenceTest>>,

    #[serde(default)]
    pub posterior: PosteriorConfig,
}

impl PipelineConfig {
    /// Default settings over the given dimensions.
    pub fn new(dimensions: Vec<DimensionConfig>) -> Self {
        Self {
            filter: SampleFilter::default(),
            fit: SurrogateFitter::default(),
            dimensions,
            integrator: IntegratorConfig::default(),
            convergence: default_convergence(),
            posterior: PosteriorConfig::default(),
        }
    }

    pub fn from_toml_str(content: &str) -> MarginalResult<Self> {
        toml::from_str(content).map_err(|e| MarginalError::Config(e.to_string()))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> MarginalResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MarginalError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> MarginalResult<String> {
        toml::to_string(self).map_err(|e| MarginalError::Config(e.to_string()))
    }

    /// Register every configured dimension, in order.
    pub fn coordinate_space(&self) -> MarginalResult<CoordinateSpace> {
        let mut space = CoordinateSpace::new();
        for dimension in &self.dimensions {
            space.register_dimension(dimension.resolve()?)?;
        }
        Ok(space)
    }

    pub fn dimension_names(&self) -> Vec<String> {
        self.dimensions.iter().map(|d| d.name.clone()).collect()
    }
}
