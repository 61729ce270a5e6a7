//! Hyperparameters for the segmentation and contribution models

use crate::error::RfmlError;
use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Full pipeline configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub segments: SegmentConfig,
    pub forest: ForestConfig,
}

/// Gaussian mixture settings shared by the segment assigner and the
/// predictor's internal segmentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Number of mixture components (segments)
    pub n_segments: usize,
    /// Seed for the mixture initialisation
    pub seed: u64,
    /// Number of EM restarts, the best lower bound wins
    pub n_runs: u64,
    /// EM iteration cap per run
    pub max_iterations: u64,
    /// Lower bound convergence tolerance
    pub tolerance: f64,
    /// Non-negative regularisation added to covariance diagonals
    pub reg_covariance: f64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            n_segments: 5,
            seed: 42,
            n_runs: 1,
            max_iterations: 100,
            tolerance: 1e-3,
            reg_covariance: 1e-6,
        }
    }
}

/// Random forest regressor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub n_estimators: usize,
    /// `None` grows trees until the other stopping rules apply
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features drawn per split, `None` means all of them
    pub max_features: Option<usize>,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: Some(10),
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            bootstrap: true,
            seed: 42,
        }
    }
}

impl SegmentConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.n_segments == 0 {
            return Err(RfmlError::invalid_config("n_segments must be at least 1"));
        }
        if self.n_runs == 0 || self.max_iterations == 0 {
            return Err(RfmlError::invalid_config(
                "n_runs and max_iterations must be at least 1",
            ));
        }
        if self.tolerance.is_nan() || self.tolerance <= 0.0 {
            return Err(RfmlError::invalid_config("tolerance must be positive"));
        }
        if self.reg_covariance.is_nan() || self.reg_covariance < 0.0 {
            return Err(RfmlError::invalid_config(
                "reg_covariance must be non-negative",
            ));
        }
        Ok(())
    }
}

impl ForestConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.n_estimators == 0 {
            return Err(RfmlError::invalid_config("n_estimators must be at least 1"));
        }
        if self.max_depth == Some(0) {
            return Err(RfmlError::invalid_config("max_depth must be at least 1"));
        }
        if self.min_samples_split < 2 {
            return Err(RfmlError::invalid_config(
                "min_samples_split must be at least 2",
            ));
        }
        if self.min_samples_leaf == 0 {
            return Err(RfmlError::invalid_config(
                "min_samples_leaf must be at least 1",
            ));
        }
        if self.max_features == Some(0) {
            return Err(RfmlError::invalid_config("max_features must be at least 1"));
        }
        Ok(())
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML, YAML or JSON file
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let config: Self = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.segments.validate()?;
        self.forest.validate()
    }
}
