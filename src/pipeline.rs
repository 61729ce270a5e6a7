//! End-to-end composition of feature building, segmentation and prediction

use crate::config::PipelineConfig;
use crate::data::{RfmlBuilder, CUSTOMER_ID, TOTAL_SALES};
use crate::error::RfmlError;
use crate::model::SegmentAssigner;
use crate::predictor::ContributionPredictor;
use polars::prelude::DataFrame;
use tracing::info;

/// Segment and predicted contribution for one customer
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerInsight {
    pub customer_id: String,
    pub segment: usize,
    pub contribution: f64,
}

/// Raw orders in, customer insights out
#[derive(Debug)]
pub struct RfmlPipeline {
    config: PipelineConfig,
    builder: RfmlBuilder,
    assigner: SegmentAssigner,
    predictor: ContributionPredictor,
}

impl RfmlPipeline {
    pub fn new(config: &PipelineConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
            builder: RfmlBuilder::new(),
            assigner: SegmentAssigner::new(config.segments.clone())?,
            predictor: ContributionPredictor::from_config(config)?,
        })
    }

    /// Build RFML features from historical orders and fit both models on them.
    ///
    /// The raw table must carry `price` or `freight_value` so that
    /// `total_sales` can serve as the regression target. Both models are
    /// replaced only when both fits succeed.
    ///
    /// # Arguments
    /// * `raw` - Historical order rows, one per purchase
    ///
    /// # Returns
    /// * The fitted pipeline, or the first feature, segmentation or forest error
    pub fn fit(&mut self, raw: &DataFrame) -> crate::Result<&mut Self> {
        let rfml = self.builder.build(raw)?;
        if rfml.column(TOTAL_SALES).is_err() {
            return Err(RfmlError::schema(
                "training orders need `price` or `freight_value` to derive `total_sales`",
            ));
        }

        let mut assigner = SegmentAssigner::new(self.config.segments.clone())?;
        assigner.fit(&rfml)?;
        let mut predictor = ContributionPredictor::from_config(&self.config)?;
        predictor.fit_table(&rfml)?;

        self.assigner = assigner;
        self.predictor = predictor;

        info!(customers = rfml.height(), "Pipeline fitted");
        Ok(self)
    }

    /// Segment and contribution for every customer in `raw`
    ///
    /// # Arguments
    /// * `raw` - Order rows to score; without `customer_unique_id` all rows
    ///   form one customer
    ///
    /// # Returns
    /// * One [`CustomerInsight`] per customer, in order of first appearance
    pub fn infer(&self, raw: &DataFrame) -> crate::Result<Vec<CustomerInsight>> {
        let rfml = self.builder.build(raw)?;
        let segments = self.assigner.assign(&rfml)?;
        let contributions = self.predictor.predict(&rfml)?;

        let ids = rfml.column(CUSTOMER_ID)?.str()?;
        Ok(ids
            .into_iter()
            .zip(segments)
            .zip(contributions)
            .map(|((id, segment), contribution)| CustomerInsight {
                customer_id: id.unwrap_or_default().to_string(),
                segment,
                contribution,
            })
            .collect())
    }

    pub fn is_fitted(&self) -> bool {
        self.assigner.is_fitted() && self.predictor.is_fitted()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn builder(&self) -> &RfmlBuilder {
        &self.builder
    }

    pub fn assigner(&self) -> &SegmentAssigner {
        &self.assigner
    }

    pub fn predictor(&self) -> &ContributionPredictor {
        &self.predictor
    }
}
