//! End-to-end run: filter, fit, integrate, assemble.

use crate::config::PipelineConfig;
use indexmap::IndexMap;
use log::{info, warn};
use mcmarg_core::errors::{MarginalError, MarginalResult};
use mcmarg_core::evaluation::{ColumnLayout, EvaluationPoint, EvaluationSet};
use mcmarg_core::filter::FilterReport;
use mcmarg_core::integrator::{IntegrationResult, Integrator, ProgressInfo};
use mcmarg_core::posterior::PosteriorSamples;
use mcmarg_core::registry::CoordinateSpace;
use mcmarg_core::surrogate::Surrogate;
use mcmarg_surrogates::FittedSurrogate;
use ndarray::{Array2, ArrayView2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Step of the pipeline an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Filter,
    Fit,
    Setup,
    Integrate,
    Assemble,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Filter => "filter",
            Stage::Fit => "fit",
            Stage::Setup => "setup",
            Stage::Integrate => "integrate",
            Stage::Assemble => "assemble",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Pipeline aborted in the {stage} stage: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: MarginalError,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, PipelineError>;
}

impl<T> AtStage<T> for MarginalResult<T> {
    fn at(self, stage: Stage) -> Result<T, PipelineError> {
        self.map_err(|source| PipelineError { stage, source })
    }
}

/// Weighted marginal CDF of a single dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginalCdf {
    pub grid: Vec<f64>,
    pub cdf: Vec<f64>,
}

/// Everything a run produces.
#[derive(Debug, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub filter_report: FilterReport,
    pub surrogate: FittedSurrogate,
    pub integration: IntegrationResult,
    pub posterior: PosteriorSamples,
    /// Keyed by dimension name, in registration order
    pub marginals: IndexMap<String, MarginalCdf>,
    /// Equally weighted draws, when `n_output_samples` is set
    pub resampled: Option<Array2<f64>>,
}

/// A configured run over a fixed coordinate space.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    space: CoordinateSpace,
}

impl Pipeline {
    pub fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        let space = config.coordinate_space().at(Stage::Setup)?;
        if space.is_empty() {
            return Err(PipelineError {
                stage: Stage::Setup,
                source: MarginalError::Config("No dimensions configured".to_string()),
            });
        }
        config.integrator.validate().at(Stage::Setup)?;
        Ok(Self { config, space })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn space(&self) -> &CoordinateSpace {
        &self.space
    }

    /// Run over evaluations whose coordinates follow the configured dimension order.
    pub fn run(&self, points: &[EvaluationPoint]) -> Result<PipelineOutput, PipelineError> {
        self.run_with_progress(points, None::<fn(&ProgressInfo)>)
    }

    /// Extract evaluations from a numeric table, then [`Pipeline::run`].
    pub fn run_table(
        &self,
        table: ArrayView2<f64>,
        layout: &ColumnLayout,
    ) -> Result<PipelineOutput, PipelineError> {
        let points = layout.extract(table).at(Stage::Filter)?;
        self.run(&points)
    }

    pub fn run_with_progress<F>(
        &self,
        points: &[EvaluationPoint],
        progress_callback: Option<F>,
    ) -> Result<PipelineOutput, PipelineError>
    where
        F: FnMut(&ProgressInfo),
    {
        let names: Vec<String> = self.space.names().iter().map(|s| s.to_string()).collect();

        let (kept, filter_report) = self.config.filter.apply(points);
        info!(
            "Kept {} of {} evaluations",
            filter_report.n_kept, filter_report.n_input
        );
        let evaluations = EvaluationSet::new(names, kept).at(Stage::Filter)?;
        if evaluations.is_empty() {
            return Err(PipelineError {
                stage: Stage::Filter,
                source: MarginalError::Input("No evaluations survived the filter".to_string()),
            });
        }

        let coordinates = evaluations.coordinates();
        let ln_likelihood = evaluations.ln_likelihoods().to_vec();
        let sigma = evaluations.sigmas().to_vec();
        let surrogate = self
            .config
            .fit
            .fit(coordinates.view(), &ln_likelihood, Some(&sigma))
            .at(Stage::Fit)?;

        let integration = self
            .marginalise_with_progress(surrogate.model.as_ref(), progress_callback)?;

        let (posterior, marginals, resampled) = self.assemble(&integration).at(Stage::Assemble)?;

        Ok(PipelineOutput {
            filter_report,
            surrogate,
            integration,
            posterior,
            marginals,
            resampled,
        })
    }

    /// Integrate `exp(surrogate)` over the coordinate space.
    pub fn marginalise(&self, surrogate: &dyn Surrogate) -> Result<IntegrationResult, PipelineError> {
        self.marginalise_with_progress(surrogate, None::<fn(&ProgressInfo)>)
    }

    fn marginalise_with_progress<F>(
        &self,
        surrogate: &dyn Surrogate,
        progress_callback: Option<F>,
    ) -> Result<IntegrationResult, PipelineError>
    where
        F: FnMut(&ProgressInfo),
    {
        let integrator =
            Integrator::new(&self.space, self.config.integrator.clone()).at(Stage::Setup)?;
        let result = integrator
            .integrate_surrogate_with_progress(surrogate, &self.config.convergence, progress_callback)
            .map_err(|source| {
                let stage = match source {
                    MarginalError::DimensionMismatch { .. } => Stage::Setup,
                    _ => Stage::Integrate,
                };
                PipelineError { stage, source }
            })?;
        if result.converged() {
            info!(
                "Converged after {} draws: ln Z = {:.6}, n_eff = {:.1}",
                result.n_draws(),
                result.ln_estimate,
                result.effective_samples
            );
        } else {
            warn!(
                "Draw cap of {} reached before convergence: ln Z = {:.6}, n_eff = {:.1}",
                self.config.integrator.max_draws, result.ln_estimate, result.effective_samples
            );
        }
        Ok(result)
    }

    fn assemble(
        &self,
        integration: &IntegrationResult,
    ) -> MarginalResult<(
        PosteriorSamples,
        IndexMap<String, MarginalCdf>,
        Option<Array2<f64>>,
    )> {
        let settings = &self.config.posterior;
        let posterior = PosteriorSamples::assemble(&integration.history, settings.ln_offset)?;
        info!(
            "Posterior keeps {} draws (n_eff = {:.1})",
            posterior.len(),
            posterior.effective_samples()
        );

        let mut marginals = IndexMap::new();
        for (dim, name) in posterior.dimension_names().iter().enumerate() {
            let (grid, cdf) = posterior.marginal_cdf(dim, settings.n_cdf_points)?;
            marginals.insert(name.clone(), MarginalCdf { grid, cdf });
        }

        let resampled = settings.n_output_samples.map(|n| {
            let mut rng = match self.config.integrator.seed {
                Some(seed) => ChaCha8Rng::seed_from_u64(seed),
                None => ChaCha8Rng::from_entropy(),
            };
            posterior.resample(n, &mut rng)
        });

        Ok((posterior, marginals, resampled))
    }
}
