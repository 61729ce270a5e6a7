//! Cluster-aware lifetime contribution regression

use crate::config::{ForestConfig, PipelineConfig, SegmentConfig};
use crate::data::{rfml_matrix, target_values, TOTAL_SALES};
use crate::error::RfmlError;
use crate::forest::RandomForestRegressor;
use crate::model::{ModelState, SegmentModel};
use ndarray::{concatenate, Array1, Array2, Axis};
use polars::prelude::DataFrame;
use tracing::{debug, info};

#[derive(Debug)]
struct FittedContribution {
    segments: SegmentModel,
    forest: RandomForestRegressor,
}

/// Predicts a customer's total sales from RFML features and segment.
///
/// The predictor fits its own scaler and mixture model rather than reusing a
/// [`SegmentAssigner`](crate::model::SegmentAssigner), so the two may label
/// the same customer differently.
#[derive(Debug)]
pub struct ContributionPredictor {
    segment_config: SegmentConfig,
    forest_config: ForestConfig,
    state: ModelState<FittedContribution>,
}

impl Default for ContributionPredictor {
    fn default() -> Self {
        Self {
            segment_config: SegmentConfig::default(),
            forest_config: ForestConfig::default(),
            state: ModelState::Unfitted,
        }
    }
}

impl ContributionPredictor {
    pub fn new(segment_config: SegmentConfig, forest_config: ForestConfig) -> crate::Result<Self> {
        segment_config.validate()?;
        forest_config.validate()?;
        Ok(Self {
            segment_config,
            forest_config,
            state: ModelState::Unfitted,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> crate::Result<Self> {
        Self::new(config.segments.clone(), config.forest.clone())
    }

    /// Fit the internal segmentation and the forest against `targets`
    ///
    /// # Arguments
    /// * `rfml` - Table with the four RFML columns
    /// * `targets` - Total sales per row, finite and row aligned with `rfml`
    ///
    /// # Returns
    /// * The fitted predictor; a failed fit keeps the previous state
    pub fn fit(&mut self, rfml: &DataFrame, targets: &[f64]) -> crate::Result<&mut Self> {
        let features = rfml_matrix(rfml)?;
        if targets.len() != features.nrows() {
            return Err(RfmlError::ShapeMismatch {
                expected: features.nrows(),
                actual: targets.len(),
            });
        }
        if let Some(row) = targets.iter().position(|t| !t.is_finite()) {
            return Err(RfmlError::schema(format!(
                "target at row {row} is not finite"
            )));
        }

        let segments = SegmentModel::fit(&features, &self.segment_config)?;
        let design = design_matrix(&segments, &features)?;
        let targets = Array1::from(targets.to_vec());
        let forest = RandomForestRegressor::fit(&design, &targets, &self.forest_config)?;

        info!(
            customers = features.nrows(),
            segments = segments.n_segments(),
            estimators = forest.n_estimators(),
            "Contribution predictor fitted"
        );

        self.state = ModelState::Fitted(FittedContribution { segments, forest });
        Ok(self)
    }

    /// Fit against the table's own `total_sales` column
    pub fn fit_table(&mut self, rfml: &DataFrame) -> crate::Result<&mut Self> {
        let targets = target_values(rfml, TOTAL_SALES)?;
        self.fit(rfml, &targets)
    }

    /// Predicted total sales per row
    ///
    /// # Arguments
    /// * `rfml` - Table with the four RFML columns
    ///
    /// # Returns
    /// * One prediction per row, empty for an empty table
    pub fn predict(&self, rfml: &DataFrame) -> crate::Result<Vec<f64>> {
        let fitted = self.state.fitted("contribution predictor")?;
        let features = rfml_matrix(rfml)?;
        if features.nrows() == 0 {
            return Ok(Vec::new());
        }

        let design = design_matrix(&fitted.segments, &features)?;
        let predictions = fitted.forest.predict(&design)?;
        debug!(rows = predictions.len(), "Predicted contributions");
        Ok(predictions.to_vec())
    }

    /// Coefficient of determination of the predictions against `targets`
    pub fn score(&self, rfml: &DataFrame, targets: &[f64]) -> crate::Result<f64> {
        let predictions = self.predict(rfml)?;
        if predictions.len() != targets.len() {
            return Err(RfmlError::ShapeMismatch {
                expected: predictions.len(),
                actual: targets.len(),
            });
        }
        Ok(r2_score(targets, &predictions))
    }

    /// Segment labels from the predictor's own mixture model
    pub fn segments(&self, rfml: &DataFrame) -> crate::Result<Vec<usize>> {
        let fitted = self.state.fitted("contribution predictor")?;
        let features = rfml_matrix(rfml)?;
        Ok(fitted.segments.assign(&features)?.to_vec())
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_fitted()
    }
}

/// `[z(Recency), z(Frequency), z(Monetary), z(Loyalty), segment]`
fn design_matrix(segments: &SegmentModel, features: &Array2<f64>) -> crate::Result<Array2<f64>> {
    let (scaled, labels) = segments.standardize_and_assign(features)?;
    let labels = labels.mapv(|label| label as f64).insert_axis(Axis(1));
    Ok(concatenate(Axis(1), &[scaled.view(), labels.view()])?)
}

/// 1 - SS_res / SS_tot; a constant target scores 1.0 when matched exactly, else 0.0
pub fn r2_score(targets: &[f64], predictions: &[f64]) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    let mean = targets.iter().sum::<f64>() / targets.len() as f64;
    let ss_res: f64 = targets
        .iter()
        .zip(predictions)
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    let ss_tot: f64 = targets.iter().map(|t| (t - mean).powi(2)).sum();

    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}
