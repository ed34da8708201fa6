//! Log-likelihood evaluations produced by an external evaluator.
//!
//! An [`EvaluationPoint`] is one row of evaluator output reduced to the coordinates the caller
//! cares about. The physical meaning of each coordinate is opaque here: the only physically
//! motivated fields are the optional total mass and in-plane spin magnitude, which exist so the
//! [`crate::filter::SampleFilter`] can apply the usual sanity cuts.

use crate::errors::{MarginalError, MarginalResult};
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// A single evaluation of the expensive log-likelihood.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationPoint {
    /// Coordinates in dimension order
    pub coordinates: Vec<f64>,
    /// Natural log of the (marginalised) likelihood
    pub ln_likelihood: f64,
    /// Reported standard error on `ln_likelihood`
    pub sigma: f64,
    /// Number of effective samples the evaluator used, if reported
    pub effective_samples: Option<f64>,
    /// Total mass of the evaluated configuration, if known
    pub total_mass: Option<f64>,
    /// Sum of the squared in-plane spin components (`s1x² + s1y² + s2x² + s2y²`)
    pub in_plane_spin_sq: f64,
}

impl EvaluationPoint {
    pub fn new(coordinates: Vec<f64>, ln_likelihood: f64, sigma: f64) -> Self {
        Self {
            coordinates,
            ln_likelihood,
            sigma,
            effective_samples: None,
            total_mass: None,
            in_plane_spin_sq: 0.0,
        }
    }

    pub fn with_effective_samples(mut self, effective_samples: f64) -> Self {
        self.effective_samples = Some(effective_samples);
        self
    }

    pub fn with_total_mass(mut self, total_mass: f64) -> Self {
        self.total_mass = Some(total_mass);
        self
    }

    /// Record the in-plane spin components of both bodies.
    pub fn with_in_plane_spins(mut self, s1x: f64, s1y: f64, s2x: f64, s2y: f64) -> Self {
        self.in_plane_spin_sq = s1x * s1x + s1y * s1y + s2x * s2x + s2y * s2y;
        self
    }

    pub fn n_dims(&self) -> usize {
        self.coordinates.len()
    }
}

/// Named dimensions together with evaluations over them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSet {
    dimension_names: Vec<String>,
    points: Vec<EvaluationPoint>,
}

impl EvaluationSet {
    /// Create a set, checking every coordinate vector against the dimension count.
    pub fn new(dimension_names: Vec<String>, points: Vec<EvaluationPoint>) -> MarginalResult<Self> {
        if dimension_names.is_empty() {
            return Err(MarginalError::Input(
                "An evaluation set needs at least one dimension".to_string(),
            ));
        }
        for point in &points {
            check_dimension(dimension_names.len(), point.n_dims())?;
        }
        Ok(Self {
            dimension_names,
            points,
        })
    }

    pub fn dimension_names(&self) -> &[String] {
        &self.dimension_names
    }

    pub fn n_dims(&self) -> usize {
        self.dimension_names.len()
    }

    pub fn points(&self) -> &[EvaluationPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Coordinates as an `(n_points, n_dims)` array.
    pub fn coordinates(&self) -> Array2<f64> {
        stack_coordinates(&self.points, self.n_dims())
    }

    pub fn ln_likelihoods(&self) -> Array1<f64> {
        self.points.iter().map(|p| p.ln_likelihood).collect()
    }

    pub fn sigmas(&self) -> Array1<f64> {
        self.points.iter().map(|p| p.sigma).collect()
    }
}

/// Stack coordinate vectors into rows of an array.
///
/// Callers are responsible for having validated the dimension count.
pub fn stack_coordinates(points: &[EvaluationPoint], n_dims: usize) -> Array2<f64> {
    let mut coords = Array2::zeros((points.len(), n_dims));
    for (mut row, point) in coords.outer_iter_mut().zip(points) {
        for (target, value) in row.iter_mut().zip(&point.coordinates) {
            *target = *value;
        }
    }
    coords
}

pub fn check_dimension(expected: usize, found: usize) -> MarginalResult<()> {
    if expected != found {
        return Err(MarginalError::DimensionMismatch { expected, found });
    }
    Ok(())
}

/// Column indices used to pull evaluations out of an already-parsed numeric table.
///
/// Reading the table from disk is left to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnLayout {
    pub coordinate_columns: Vec<usize>,
    pub ln_likelihood_column: usize,
    pub sigma_column: usize,
    #[serde(default)]
    pub effective_samples_column: Option<usize>,
    /// Columns whose sum is the total mass
    #[serde(default)]
    pub mass_columns: Vec<usize>,
    /// In-plane spin columns `[s1x, s1y, s2x, s2y]`
    #[serde(default)]
    pub in_plane_spin_columns: Option<[usize; 4]>,
}

impl ColumnLayout {
    /// The standard evaluator layout:
    /// `index m1 m2 s1x s1y s1z s2x s2y s2z lnL sigma neff`.
    ///
    /// Coordinates still have to be chosen by the caller, as the columns are physical
    /// quantities and not necessarily the coordinates being fit.
    pub fn standard(coordinate_columns: Vec<usize>) -> Self {
        Self {
            coordinate_columns,
            ln_likelihood_column: 9,
            sigma_column: 10,
            effective_samples_column: Some(11),
            mass_columns: vec![1, 2],
            in_plane_spin_columns: Some([3, 4, 6, 7]),
        }
    }

    fn max_column(&self) -> usize {
        self.coordinate_columns
            .iter()
            .chain(self.mass_columns.iter())
            .chain(self.in_plane_spin_columns.iter().flatten())
            .chain(self.effective_samples_column.iter())
            .copied()
            .chain([self.ln_likelihood_column, self.sigma_column])
            .max()
            .unwrap_or(0)
    }

    /// Extract one [`EvaluationPoint`] per table row.
    pub fn extract(&self, table: ArrayView2<f64>) -> MarginalResult<Vec<EvaluationPoint>> {
        if self.coordinate_columns.is_empty() {
            return Err(MarginalError::Input(
                "Column layout selects no coordinate columns".to_string(),
            ));
        }
        let needed = self.max_column() + 1;
        if table.ncols() < needed {
            return Err(MarginalError::Input(format!(
                "Evaluation table has {} columns but the layout needs {}",
                table.ncols(),
                needed
            )));
        }

        let points = table
            .outer_iter()
            .map(|row| {
                let coordinates = self.coordinate_columns.iter().map(|&c| row[c]).collect();
                let mut point = EvaluationPoint::new(
                    coordinates,
                    row[self.ln_likelihood_column],
                    row[self.sigma_column],
                );
                if let Some(column) = self.effective_samples_column {
                    point = point.with_effective_samples(row[column]);
                }
                if !self.mass_columns.is_empty() {
                    point = point.with_total_mass(self.mass_columns.iter().map(|&c| row[c]).sum());
                }
                if let Some([s1x, s1y, s2x, s2y]) = self.in_plane_spin_columns {
                    point = point.with_in_plane_spins(row[s1x], row[s1y], row[s2x], row[s2y]);
                }
                point
            })
            .collect();

        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_in_plane_spin_magnitude() {
        let point =
            EvaluationPoint::new(vec![1.0], 0.0, 0.1).with_in_plane_spins(0.1, 0.2, 0.0, 0.3);
        assert!((point.in_plane_spin_sq - 0.14).abs() < 1e-12);
    }

    #[test]
    fn test_evaluation_set_rejects_wrong_dimension() {
        let points = vec![
            EvaluationPoint::new(vec![1.0, 2.0], 0.0, 0.1),
            EvaluationPoint::new(vec![1.0], 0.0, 0.1),
        ];
        let result = EvaluationSet::new(vec!["a".to_string(), "b".to_string()], points);
        assert_eq!(
            result.unwrap_err(),
            MarginalError::DimensionMismatch {
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn test_evaluation_set_arrays() {
        let points = vec![
            EvaluationPoint::new(vec![1.0, 2.0], -1.0, 0.1),
            EvaluationPoint::new(vec![3.0, 4.0], -2.0, 0.2),
        ];
        let set = EvaluationSet::new(vec!["a".to_string(), "b".to_string()], points).unwrap();

        assert_eq!(set.coordinates(), array![[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(set.ln_likelihoods(), array![-1.0, -2.0]);
        assert_eq!(set.sigmas(), array![0.1, 0.2]);
    }

    #[test]
    fn test_standard_layout_extraction() {
        let table = array![
            [0.0, 10.0, 5.0, 0.0, 0.1, 0.2, 0.0, 0.0, -0.1, 50.0, 0.05, 300.0],
            [1.0, 12.0, 6.0, 0.0, 0.0, 0.3, 0.0, 0.0, 0.1, 48.0, 0.10, 250.0],
        ];
        let layout = ColumnLayout::standard(vec![1, 2, 5]);
        let points = layout.extract(table.view()).unwrap();

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].coordinates, vec![10.0, 5.0, 0.2]);
        assert_eq!(points[0].ln_likelihood, 50.0);
        assert_eq!(points[0].sigma, 0.05);
        assert_eq!(points[0].effective_samples, Some(300.0));
        assert_eq!(points[0].total_mass, Some(15.0));
        assert!((points[0].in_plane_spin_sq - 0.01).abs() < 1e-12);
        assert_eq!(points[1].total_mass, Some(18.0));
    }

    #[test]
    fn test_layout_rejects_narrow_table() {
        let table = array![[0.0, 1.0, 2.0]];
        let layout = ColumnLayout::standard(vec![1]);
        assert!(matches!(
            layout.extract(table.view()),
            Err(MarginalError::Input(_))
        ));
    }
}
