//! Gaussian mixture segmentation over standardized RFML features

use crate::config::SegmentConfig;
use crate::data::{rfml_matrix, StandardScaler, CLUSTER_LABEL};
use crate::error::RfmlError;
use linfa::prelude::*;
use linfa_clustering::GaussianMixtureModel;
use ndarray::{Array1, Array2};
use polars::prelude::{DataFrame, NamedFrom, Series};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Two-phase lifecycle of a stateful component
#[derive(Debug, Clone)]
pub enum ModelState<T> {
    Unfitted,
    Fitted(T),
}

impl<T> Default for ModelState<T> {
    fn default() -> Self {
        Self::Unfitted
    }
}

impl<T> ModelState<T> {
    pub fn is_fitted(&self) -> bool {
        matches!(self, Self::Fitted(_))
    }

    /// Borrow the fitted state or fail with [`RfmlError::NotFitted`]
    pub fn fitted(&self, component: &'static str) -> crate::Result<&T> {
        match self {
            Self::Fitted(state) => Ok(state),
            Self::Unfitted => Err(RfmlError::NotFitted(component)),
        }
    }
}

/// Frozen scaler plus mixture model, fitted together
#[derive(Debug)]
pub struct SegmentModel {
    scaler: StandardScaler,
    mixture: GaussianMixtureModel<f64>,
    n_segments: usize,
    /// Segment of each training row
    labels: Array1<usize>,
}

impl SegmentModel {
    /// Fit the scaler and the mixture on raw RFML rows
    pub fn fit(features: &Array2<f64>, config: &SegmentConfig) -> crate::Result<Self> {
        config.validate()?;
        check_fit_input(features, config.n_segments)?;

        let scaler = StandardScaler::fit(features)?;
        let training = scaler.transform(features)?;

        let dataset = DatasetBase::from(training.clone());
        let mixture = GaussianMixtureModel::params(config.n_segments)
            .n_runs(config.n_runs)
            .max_n_iterations(config.max_iterations)
            .tolerance(config.tolerance)
            .reg_covariance(config.reg_covariance)
            .with_rng(StdRng::seed_from_u64(config.seed))
            .fit(&dataset)?;

        let labels: Array1<usize> = mixture.predict(&training);

        debug!(
            rows = features.nrows(),
            segments = config.n_segments,
            seed = config.seed,
            "Fitted gaussian mixture"
        );

        Ok(Self {
            scaler,
            mixture,
            n_segments: config.n_segments,
            labels,
        })
    }

    /// Most likely segment per raw RFML row
    pub fn assign(&self, features: &Array2<f64>) -> crate::Result<Array1<usize>> {
        self.standardize_and_assign(features).map(|(_, labels)| labels)
    }

    /// Standardized rows together with their segments
    pub fn standardize_and_assign(
        &self,
        features: &Array2<f64>,
    ) -> crate::Result<(Array2<f64>, Array1<usize>)> {
        let scaled = self.scaler.transform(features)?;
        if scaled.nrows() == 0 {
            return Ok((scaled, Array1::zeros(0)));
        }
        let labels: Array1<usize> = self.mixture.predict(&scaled);
        Ok((scaled, labels))
    }

    pub fn n_segments(&self) -> usize {
        self.n_segments
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    /// Segments of the training rows
    pub fn training_labels(&self) -> &Array1<usize> {
        &self.labels
    }

    /// Number of training rows per segment
    pub fn segment_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_segments];
        for &label in self.labels.iter() {
            if label < self.n_segments {
                sizes[label] += 1;
            }
        }
        sizes
    }
}

/// Assigns customers to behavioral segments.
///
/// Construct, [`fit`](SegmentAssigner::fit) once on an RFML table, then call
/// [`assign`](SegmentAssigner::assign) any number of times. Assignment reuses
/// the scaler frozen at fit time.
#[derive(Debug)]
pub struct SegmentAssigner {
    config: SegmentConfig,
    state: ModelState<SegmentModel>,
}

impl Default for SegmentAssigner {
    fn default() -> Self {
        Self {
            config: SegmentConfig::default(),
            state: ModelState::Unfitted,
        }
    }
}

impl SegmentAssigner {
    pub fn new(config: SegmentConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: ModelState::Unfitted,
        })
    }

    /// Fit on the `Recency`, `Frequency`, `Monetary` and `Loyalty` columns.
    ///
    /// Fails with [`RfmlError::DegenerateFit`] when the table has fewer rows
    /// or distinct feature vectors than configured segments. A failed fit
    /// leaves any previous fitted state untouched.
    ///
    /// # Arguments
    /// * `rfml` - Customer table from [`RfmlBuilder`](crate::data::RfmlBuilder)
    ///
    /// # Returns
    /// * The fitted assigner, ready for [`assign`](SegmentAssigner::assign)
    pub fn fit(&mut self, rfml: &DataFrame) -> crate::Result<&mut Self> {
        let features = rfml_matrix(rfml)?;
        let model = SegmentModel::fit(&features, &self.config)?;

        info!(
            customers = features.nrows(),
            segments = self.config.n_segments,
            sizes = ?model.segment_sizes(),
            "Segment assigner fitted"
        );

        self.state = ModelState::Fitted(model);
        Ok(self)
    }

    /// Segment label for every row
    ///
    /// # Arguments
    /// * `rfml` - Table with the four RFML columns
    ///
    /// # Returns
    /// * One label in `[0, n_segments)` per row, in row order
    pub fn assign(&self, rfml: &DataFrame) -> crate::Result<Vec<usize>> {
        let model = self.state.fitted("segment assigner")?;
        let features = rfml_matrix(rfml)?;
        Ok(model.assign(&features)?.to_vec())
    }

    /// Same as [`SegmentAssigner::assign`]
    pub fn predict(&self, rfml: &DataFrame) -> crate::Result<Vec<usize>> {
        self.assign(rfml)
    }

    pub fn fit_assign(&mut self, rfml: &DataFrame) -> crate::Result<Vec<usize>> {
        self.fit(rfml)?.assign(rfml)
    }

    /// Copy of the table with a `cluster_label` column
    pub fn transform(&self, rfml: &DataFrame) -> crate::Result<DataFrame> {
        let labels: Vec<i64> = self
            .assign(rfml)?
            .into_iter()
            .map(|label| label as i64)
            .collect();
        let mut labelled = rfml.clone();
        labelled.with_column(Series::new(CLUSTER_LABEL, labels))?;
        Ok(labelled)
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_fitted()
    }

    pub fn config(&self) -> &SegmentConfig {
        &self.config
    }

    /// Fitted model, for diagnostics
    pub fn model(&self) -> crate::Result<&SegmentModel> {
        self.state.fitted("segment assigner")
    }
}

/// Reject inputs a mixture of `n_segments` components cannot be fitted on
fn check_fit_input(features: &Array2<f64>, n_segments: usize) -> crate::Result<()> {
    if features.iter().any(|v| !v.is_finite()) {
        return Err(RfmlError::schema("RFML features must be finite"));
    }

    if features.nrows() < n_segments {
        return Err(RfmlError::DegenerateFit {
            what: "rows",
            available: features.nrows(),
            segments: n_segments,
        });
    }

    // +0.0 folds -0.0 into 0.0 so both hash to the same bits
    let distinct: BTreeSet<Vec<u64>> = features
        .outer_iter()
        .map(|row| row.iter().map(|v| (v + 0.0).to_bits()).collect())
        .collect();
    if distinct.len() < n_segments {
        return Err(RfmlError::DegenerateFit {
            what: "distinct feature vectors",
            available: distinct.len(),
            segments: n_segments,
        });
    }

    Ok(())
}
