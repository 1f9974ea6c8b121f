//! SegmentForge: customer segmentation from e-commerce transactions
//!
//! Aggregates cleaned transactions into Recency/Frequency/Monetary metrics,
//! scores them by population quantiles, assigns rule-based business segments,
//! and partitions the standardized metrics with K-Means.

pub mod cli;
pub mod data;
pub mod error;
pub mod export;
pub mod features;
pub mod model;
pub mod pipeline;
pub mod rfm;
pub mod scoring;
pub mod segment;
pub mod viz;

// Re-export public items for easier access
pub use cli::Args;
pub use data::{load_transactions, load_transactions_file, CleaningReport, Transaction};
pub use error::{Result, SegmentationError};
pub use features::{prepare_features, RfmFeatures, ScalingParams};
pub use model::{
    add_cluster_labels, cluster_profiles, find_optimal_clusters, fit_kmeans, predict_cluster,
    ClusterSweep, ClusteredRecord, KMeansConfig, KMeansModel,
};
pub use pipeline::{run_segmentation, SegmentationConfig, SegmentationReport};
pub use rfm::{calculate_rfm, ReferenceDate, RfmRecord};
pub use scoring::{score_customers, ScoreBoundaries, ScoredRecord};
pub use segment::{classify, segment_customers, Segment, SegmentedRecord};
