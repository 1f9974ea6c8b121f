//! Feature preparation for clustering
//!
//! Standardizes recency, frequency and monetary jointly over the population and
//! keeps the fitted [`ScalingParams`] so new customers can be projected into the
//! same space later.

use ndarray::{Array1, Array2, Axis};
use tracing::{info, warn};

use crate::error::{Result, SegmentationError};
use crate::rfm::RfmRecord;

/// Feature column names, in matrix column order.
pub const FEATURE_NAMES: [&str; 3] = ["Recency", "Frequency", "Monetary"];

/// Standard deviations at or below this are treated as zero variance.
const MIN_STD: f64 = 1e-10;

/// Population mean and standard deviation (ddof = 0) per feature.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingParams {
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
}

impl ScalingParams {
    pub fn fit(raw: &Array2<f64>) -> Result<Self> {
        let mean = raw
            .mean_axis(Axis(0))
            .ok_or_else(|| SegmentationError::input("features", "no customers to scale"))?;
        let std = raw.std_axis(Axis(0), 0.0);
        Ok(Self { mean, std })
    }

    /// Whether feature `j` has no spread in the fitted population.
    pub fn is_constant(&self, j: usize) -> bool {
        self.std[j] <= MIN_STD
    }

    /// Number of features with non-zero variance.
    pub fn informative_features(&self) -> usize {
        (0..self.std.len()).filter(|&j| !self.is_constant(j)).count()
    }

    /// Standardize rows; zero-variance features become exactly 0.
    pub fn transform(&self, raw: &Array2<f64>) -> Array2<f64> {
        let mut scaled = raw.clone();
        for (j, mut column) in scaled.columns_mut().into_iter().enumerate() {
            if self.is_constant(j) {
                column.fill(0.0);
            } else {
                column.mapv_inplace(|x| (x - self.mean[j]) / self.std[j]);
            }
        }
        scaled
    }

    /// Standardize a single `[recency, frequency, monetary]` vector.
    pub fn transform_one(&self, rfm: &[f64; 3]) -> Array1<f64> {
        Array1::from_iter(rfm.iter().enumerate().map(|(j, &x)| {
            if self.is_constant(j) {
                0.0
            } else {
                (x - self.mean[j]) / self.std[j]
            }
        }))
    }
}

/// Scaled feature matrix for a customer population.
#[derive(Debug, Clone)]
pub struct RfmFeatures {
    /// Standardized features (n_customers, 3)
    pub features: Array2<f64>,
    /// Customer id of each row
    pub customer_ids: Vec<i64>,
    /// Parameters fitted on this population
    pub scaler: ScalingParams,
    /// Unscaled features (n_customers, 3)
    pub raw_features: Array2<f64>,
}

impl RfmFeatures {
    pub fn len(&self) -> usize {
        self.customer_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customer_ids.is_empty()
    }

    /// Scale new RFM values with the population's parameters.
    pub fn scale_new_data(&self, rfm: &[f64; 3]) -> Array1<f64> {
        self.scaler.transform_one(rfm)
    }
}

/// Select and standardize `(recency, frequency, monetary)` for every customer.
pub fn prepare_features(records: &[RfmRecord]) -> Result<RfmFeatures> {
    if records.is_empty() {
        return Err(SegmentationError::input("records", "no customers to scale"));
    }

    let raw: Vec<f64> = records.iter().flat_map(|r| r.as_features()).collect();
    let raw_features = Array2::from_shape_vec((records.len(), FEATURE_NAMES.len()), raw)
        .map_err(|e| SegmentationError::input("features", e.to_string()))?;

    let scaler = ScalingParams::fit(&raw_features)?;
    for (j, name) in FEATURE_NAMES.iter().enumerate() {
        if scaler.is_constant(j) {
            warn!(feature = *name, "feature has zero variance; scaling it to 0");
        }
    }
    let features = scaler.transform(&raw_features);

    info!(
        customers = records.len(),
        informative_features = scaler.informative_features(),
        "prepared scaled features"
    );
    Ok(RfmFeatures {
        features,
        customer_ids: records.iter().map(|r| r.customer_id).collect(),
        scaler,
        raw_features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn record(customer_id: i64, recency: i64, frequency: u32, monetary: f64) -> RfmRecord {
        RfmRecord {
            customer_id,
            recency,
            frequency,
            monetary,
        }
    }

    #[test]
    fn test_standardized_mean_and_std() {
        let records = vec![
            record(1, 5, 1, 100.0),
            record(2, 30, 4, 250.0),
            record(3, 12, 2, 80.0),
            record(4, 90, 7, 1200.0),
            record(5, 1, 3, 40.0),
        ];
        let data = prepare_features(&records).unwrap();

        assert_eq!(data.features.shape(), &[5, 3]);
        for column in data.features.columns() {
            let mean = column.mean().unwrap();
            let std = column.std(0.0);
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(std, 1.0, epsilon = 1e-12);
        }
        assert_eq!(data.customer_ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_zero_variance_feature_is_exactly_zero() {
        let records = vec![
            record(1, 5, 1, 100.0),
            record(2, 30, 1, 250.0),
            record(3, 12, 1, 80.0),
        ];
        let data = prepare_features(&records).unwrap();

        assert!(data.scaler.is_constant(1));
        assert_eq!(data.scaler.informative_features(), 2);
        assert!(data.features.column(1).iter().all(|&v| v == 0.0));
        assert!(data.features.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_scale_new_data_matches_population_transform() {
        let records = vec![
            record(1, 5, 1, 100.0),
            record(2, 30, 4, 250.0),
            record(3, 12, 2, 80.0),
        ];
        let data = prepare_features(&records).unwrap();

        let projected = data.scale_new_data(&[30.0, 4.0, 250.0]);
        for j in 0..3 {
            assert_abs_diff_eq!(projected[j], data.features[[1, j]], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_empty_population_rejected() {
        assert!(prepare_features(&[]).is_err());
    }
}
