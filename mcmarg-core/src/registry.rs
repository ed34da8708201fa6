//! Named, ordered dimensions of the coordinate space.
//!
//! The [`CoordinateSpace`] is the prior registry consumed by the integrator. Registration is the
//! only way to mutate it, and the integrator only ever borrows it immutably, so priors and
//! intervals cannot change once a run has started.

use crate::errors::{MarginalError, MarginalResult};
use crate::evaluation::check_dimension;
use crate::prior::{standard_prior, Prior};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Field names the integrator uses for its own per-draw bookkeeping.
pub const RESERVED_NAMES: [&str; 4] = ["integrand", "joint_prior", "joint_s_prior", "weights"];

/// Inclusive sampling interval `[low, high]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub low: f64,
    pub high: f64,
}

impl Interval {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    pub fn contains(&self, x: f64) -> bool {
        x >= self.low && x <= self.high
    }

    fn validate(&self, name: &str) -> MarginalResult<()> {
        if !(self.low.is_finite() && self.high.is_finite()) || self.low >= self.high {
            return Err(MarginalError::InvalidInterval {
                name: name.to_string(),
                low: self.low,
                high: self.high,
            });
        }
        Ok(())
    }
}

/// Shape of a dimension's proposal before any adaptation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplingInit {
    /// Flat over the interval
    #[default]
    Uniform,
    /// The prior, tabulated on the proposal's bins
    Prior,
}

/// One registered dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub prior: Arc<dyn Prior>,
    pub interval: Interval,
    /// Whether the integrator may reshape this dimension's proposal
    pub adaptive: bool,
    #[serde(default)]
    pub sampling_init: SamplingInit,
}

/// Ordered collection of named dimensions with their priors and sampling intervals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinateSpace {
    dimensions: IndexMap<String, Dimension>,
}

impl CoordinateSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dimension after all existing ones.
    ///
    /// Fails with a configuration error if the name is reserved, already registered, or the
    /// interval is empty or not finite.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        prior: Arc<dyn Prior>,
        interval: Interval,
        adaptive: bool,
    ) -> MarginalResult<&mut Self> {
        self.register_dimension(Dimension {
            name: name.into(),
            prior,
            interval,
            adaptive,
            sampling_init: SamplingInit::Uniform,
        })
    }

    /// Register a fully specified dimension.
    pub fn register_dimension(&mut self, dimension: Dimension) -> MarginalResult<&mut Self> {
        let name = dimension.name.as_str();
        if RESERVED_NAMES.contains(&name) {
            return Err(MarginalError::ReservedName(name.to_string()));
        }
        if self.dimensions.contains_key(name) {
            return Err(MarginalError::Config(format!(
                "Dimension '{}' is already registered",
                name
            )));
        }
        dimension.interval.validate(name)?;

        self.dimensions.insert(dimension.name.clone(), dimension);
        Ok(self)
    }

    /// Register one of the [`standard_prior`] coordinates with its default range.
    pub fn register_standard(&mut self, name: &str, adaptive: bool) -> MarginalResult<&mut Self> {
        let (prior, (low, high)) = standard_prior(name)
            .ok_or_else(|| MarginalError::Config(format!("No standard prior for '{}'", name)))?;
        self.register(name, Arc::from(prior), Interval::new(low, high), adaptive)
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.dimensions.keys().map(|k| k.as_str()).collect()
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &Dimension> {
        self.dimensions.values()
    }

    pub fn get(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.get(name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.dimensions.get_index_of(name)
    }

    fn lookup(&self, name: &str) -> MarginalResult<&Dimension> {
        self.get(name)
            .ok_or_else(|| MarginalError::Config(format!("Unknown dimension '{}'", name)))
    }

    /// Prior density of a single dimension at `value`.
    pub fn prior_density(&self, name: &str, value: f64) -> MarginalResult<f64> {
        Ok(self.lookup(name)?.prior.density(value))
    }

    pub fn interval(&self, name: &str) -> MarginalResult<Interval> {
        Ok(self.lookup(name)?.interval)
    }

    /// Product of the per-dimension prior densities.
    ///
    /// Values outside a dimension's interval have zero joint prior.
    pub fn joint_prior(&self, x: &[f64]) -> MarginalResult<f64> {
        check_dimension(self.len(), x.len())?;
        Ok(self
            .dimensions
            .values()
            .zip(x)
            .map(|(dim, &value)| {
                if dim.interval.contains(value) {
                    dim.prior.density(value)
                } else {
                    0.0
                }
            })
            .product())
    }
}
