//! RFMLForge: customer segmentation and lifetime contribution prediction
//!
//! Raw e-commerce orders are aggregated into Recency, Frequency, Monetary and
//! Loyalty (RFML) features per customer. A Gaussian mixture assigns each
//! customer to a segment, and a random forest predicts total sales from the
//! standardized features plus the segment label.

pub mod config;
pub mod data;
pub mod error;
pub mod forest;
pub mod model;
pub mod pipeline;
pub mod predictor;

// Re-export public items for easier access
pub use config::{ForestConfig, PipelineConfig, SegmentConfig};
pub use data::{orders_frame, rfml_matrix, CustomerRfml, RawOrder, RfmlBuilder, StandardScaler};
pub use error::RfmlError;
pub use forest::RandomForestRegressor;
pub use model::{ModelState, SegmentAssigner, SegmentModel};
pub use pipeline::{CustomerInsight, RfmlPipeline};
pub use predictor::{r2_score, ContributionPredictor};

/// Common result type used throughout the crate
pub type Result<T> = std::result::Result<T, RfmlError>;
