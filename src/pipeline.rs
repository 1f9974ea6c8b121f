//! End-to-end segmentation run over a materialized transaction snapshot

use std::path::Path;

use chrono::NaiveDateTime;
use tracing::info;

use crate::data::Transaction;
use crate::error::Result;
use crate::export::{self, ClusterRow, DiagnosticRow, RfmRow, SegmentRow};
use crate::features::{prepare_features, RfmFeatures};
use crate::model::{
    add_cluster_labels, find_optimal_clusters, fit_kmeans, ClusterSweep, ClusteredRecord,
    KMeansConfig, KMeansModel, DEFAULT_MAX_CLUSTERS,
};
use crate::rfm::{calculate_rfm_at, ReferenceDate, RfmRecord};
use crate::scoring::{score_customers_with, ScoreBoundaries, DEFAULT_SCORE_LEVELS};
use crate::segment::{segment_customers, SegmentedRecord};

pub const RFM_FILE: &str = "rfm.csv";
pub const SEGMENTED_FILE: &str = "rfm_segmented.csv";
pub const CLUSTERED_FILE: &str = "clustered.csv";
pub const DIAGNOSTICS_FILE: &str = "cluster_diagnostics.csv";

/// Settings for one segmentation run.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationConfig {
    /// Ordinal score levels N
    pub score_levels: usize,
    /// Largest k in the diagnostic sweep
    pub max_clusters: usize,
    /// Externally chosen k for the final partition
    pub n_clusters: usize,
    pub kmeans: KMeansConfig,
    /// `None` uses one day after the latest transaction
    pub reference_date: Option<NaiveDateTime>,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            score_levels: DEFAULT_SCORE_LEVELS,
            max_clusters: DEFAULT_MAX_CLUSTERS,
            n_clusters: 4,
            kmeans: KMeansConfig::default(),
            reference_date: None,
        }
    }
}

/// Everything a run produces, including the population-level contexts.
#[derive(Debug)]
pub struct SegmentationReport {
    pub reference_date: ReferenceDate,
    pub rfm: Vec<RfmRecord>,
    pub boundaries: ScoreBoundaries,
    pub segmented: Vec<SegmentedRecord>,
    pub features: RfmFeatures,
    pub sweep: ClusterSweep,
    pub model: KMeansModel,
    pub clustered: Vec<ClusteredRecord>,
}

impl SegmentationReport {
    /// Write the RFM, segmented, clustered and diagnostics checkpoints into `dir`.
    pub fn write_checkpoints(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        export::write_rows_to_file(dir.join(RFM_FILE), self.rfm.iter().map(RfmRow::from))?;
        export::write_rows_to_file(
            dir.join(SEGMENTED_FILE),
            self.segmented.iter().map(SegmentRow::from),
        )?;
        export::write_rows_to_file(
            dir.join(CLUSTERED_FILE),
            self.clustered.iter().map(ClusterRow::from),
        )?;
        export::write_rows_to_file(
            dir.join(DIAGNOSTICS_FILE),
            self.sweep.diagnostics.iter().map(DiagnosticRow::from),
        )?;
        info!(dir = %dir.display(), "wrote checkpoints");
        Ok(())
    }
}

/// Run RFM, scoring, segmentation, the k sweep and the final fit.
pub fn run_segmentation(
    transactions: &[Transaction],
    config: &SegmentationConfig,
) -> Result<SegmentationReport> {
    let reference_date = ReferenceDate::resolve(transactions, config.reference_date)?;
    let rfm = calculate_rfm_at(transactions, reference_date)?;

    let boundaries = ScoreBoundaries::fit(&rfm, config.score_levels)?;
    let scored = score_customers_with(&rfm, &boundaries)?;
    let segmented = segment_customers(&scored, config.score_levels);

    let features = prepare_features(&rfm)?;
    let sweep = find_optimal_clusters(&features.features, config.max_clusters, &config.kmeans)?;
    let model = fit_kmeans(&features.features, config.n_clusters, &config.kmeans)?;
    let clustered = add_cluster_labels(&rfm, &features, &model)?;

    info!(
        customers = rfm.len(),
        clusters = config.n_clusters,
        inertia = model.inertia,
        "segmentation run complete"
    );

    Ok(SegmentationReport {
        reference_date,
        rfm,
        boundaries,
        segmented,
        features,
        sweep,
        model,
        clustered,
    })
}
