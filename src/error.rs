//! Error taxonomy for the segmentation core
//!
//! Every failure is terminal for the run that produced it: the core never drops
//! customers or substitutes default scores, because quantile scores and scaled
//! features are relative to the whole cohort.

use std::io;

use thiserror::Error;

/// Errors raised by ingestion, RFM aggregation, scoring and clustering.
#[derive(Debug, Error)]
pub enum SegmentationError {
    /// Missing or malformed required field.
    #[error("input error in '{field}': {reason}")]
    Input { field: String, reason: String },

    /// Fewer distinct quantile boundaries than requested score levels.
    #[error(
        "cannot bin {metric} into {levels} quantile groups: only {distinct_edges} distinct boundaries"
    )]
    Binning {
        metric: &'static str,
        levels: usize,
        distinct_edges: usize,
    },

    /// Degenerate clustering input.
    #[error("clustering fit failed: {reason}")]
    Fit { reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl SegmentationError {
    pub(crate) fn input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Input {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn fit(reason: impl Into<String>) -> Self {
        Self::Fit {
            reason: reason.into(),
        }
    }
}

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, SegmentationError>;
