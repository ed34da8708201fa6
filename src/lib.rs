//! Marginalise sparse log-likelihood evaluations.
//!
//! A run drops unusable evaluations, fits a smooth surrogate to the points near the peak,
//! integrates `exp(surrogate) × prior` with an adaptive importance sampler and turns the
//! retained draws into a weighted posterior. The building blocks live in [`mcmarg_core`] and
//! [`mcmarg_surrogates`]; this crate wires them together behind [`PipelineConfig`].

pub mod config;
pub mod pipeline;

#[cfg(feature = "python")]
mod python;

pub use config::{DimensionConfig, PipelineConfig, PosteriorConfig};
pub use mcmarg_core::{MarginalError, MarginalResult};
pub use pipeline::{MarginalCdf, Pipeline, PipelineError, PipelineOutput, Stage};
