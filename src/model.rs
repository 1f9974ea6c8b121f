//! K-Means clustering over scaled RFM features
//!
//! Every fit is seeded from `(seed, k)` through [`derive_seed`], so the candidate
//! sweep can run its fits in parallel and still reproduce the exact partition
//! the final fit for the chosen `k` produces.

use std::collections::HashSet;

use linfa::prelude::*;
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{Result, SegmentationError};
use crate::features::RfmFeatures;
use crate::rfm::RfmRecord;

/// Largest candidate k evaluated by the sweep when none is configured.
pub const DEFAULT_MAX_CLUSTERS: usize = 10;

/// Solver settings shared by the sweep and the final fit.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansConfig {
    /// Global seed; each k derives its own generator from it
    pub seed: u64,
    /// Restarts per fit, best inertia kept
    pub n_runs: usize,
    pub max_iterations: u64,
    /// Centroid shift below which a run is considered converged
    pub tolerance: f64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            n_runs: 10,
            max_iterations: 300,
            tolerance: 1e-4,
        }
    }
}

/// Fitted K-Means partition
#[derive(Debug)]
pub struct KMeansModel {
    /// Fitted K-Means model from linfa
    pub model: KMeans<f64, L2Dist>,
    pub n_clusters: usize,
    /// Cluster of each training row
    pub labels: Array1<usize>,
    /// Centroids in scaled feature space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squared distances
    pub inertia: f64,
}

impl KMeansModel {
    /// Nearest centroid for an already scaled feature vector.
    pub fn predict(&self, features: &Array1<f64>) -> Result<usize> {
        if features.len() != self.centroids.ncols() {
            return Err(SegmentationError::input(
                "features",
                format!(
                    "expected {} dimensions, got {}",
                    self.centroids.ncols(),
                    features.len()
                ),
            ));
        }

        let mut min_distance = f64::INFINITY;
        let mut closest_cluster = 0;
        for (cluster_idx, centroid) in self.centroids.outer_iter().enumerate() {
            let distance = squared_distance(&features.view(), &centroid);
            if distance < min_distance {
                min_distance = distance;
                closest_cluster = cluster_idx;
            }
        }

        Ok(closest_cluster)
    }

    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            if label < self.n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }

    /// Mean silhouette coefficient of the training partition.
    pub fn silhouette(&self, features: &Array2<f64>) -> f64 {
        silhouette_score(features, &self.labels, self.n_clusters)
    }
}

/// Per-k generator seed, independent of the order fits are executed in.
pub fn derive_seed(seed: u64, k: usize) -> u64 {
    // splitmix64 finalizer
    let mut z = seed ^ (k as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Fit K-Means with k-means++ seeding and `config.n_runs` restarts.
///
/// Fails when `n_clusters < 2`, when it is not smaller than the number of rows,
/// or when there are fewer distinct points than clusters.
pub fn fit_kmeans(
    features: &Array2<f64>,
    n_clusters: usize,
    config: &KMeansConfig,
) -> Result<KMeansModel> {
    let n_samples = features.nrows();
    if n_clusters < 2 {
        return Err(SegmentationError::fit(format!(
            "need at least 2 clusters, got {}",
            n_clusters
        )));
    }
    if n_clusters >= n_samples {
        return Err(SegmentationError::fit(format!(
            "{} clusters requested for {} customers",
            n_clusters, n_samples
        )));
    }
    let distinct = distinct_rows(features);
    if distinct < n_clusters {
        return Err(SegmentationError::fit(format!(
            "only {} distinct feature vectors for {} clusters",
            distinct, n_clusters
        )));
    }

    let dataset = DatasetBase::from(features.clone());
    let rng = StdRng::seed_from_u64(derive_seed(config.seed, n_clusters));

    // linfa initializes with k-means++ unless told otherwise
    let model = KMeans::params_with(n_clusters, rng, L2Dist)
        .n_runs(config.n_runs)
        .max_n_iterations(config.max_iterations)
        .tolerance(config.tolerance)
        .fit(&dataset)
        .map_err(|e| SegmentationError::fit(e.to_string()))?;

    let labels: Array1<usize> = model.predict(features);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(features, &labels, &centroids);

    Ok(KMeansModel {
        model,
        n_clusters,
        labels,
        centroids,
        inertia,
    })
}

/// Model-selection diagnostics for one candidate k.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterDiagnostic {
    pub k: usize,
    pub inertia: f64,
    pub silhouette: f64,
}

/// Diagnostics for `k = 2..=max_clusters`, ordered by k.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSweep {
    pub diagnostics: Vec<ClusterDiagnostic>,
}

impl ClusterSweep {
    pub fn ks(&self) -> Vec<usize> {
        self.diagnostics.iter().map(|d| d.k).collect()
    }

    /// Elbow curve values, aligned with [`ClusterSweep::ks`].
    pub fn inertia(&self) -> Vec<f64> {
        self.diagnostics.iter().map(|d| d.inertia).collect()
    }

    pub fn silhouette(&self) -> Vec<f64> {
        self.diagnostics.iter().map(|d| d.silhouette).collect()
    }

    /// Candidate with the highest silhouette; a hint for picking k, not a decision.
    pub fn best_silhouette(&self) -> Option<ClusterDiagnostic> {
        self.diagnostics
            .iter()
            .copied()
            .max_by(|a, b| a.silhouette.total_cmp(&b.silhouette))
    }
}

/// Fit every candidate k and record inertia and mean silhouette.
///
/// Fits run in parallel; results do not depend on scheduling.
pub fn find_optimal_clusters(
    features: &Array2<f64>,
    max_clusters: usize,
    config: &KMeansConfig,
) -> Result<ClusterSweep> {
    if max_clusters < 2 {
        return Err(SegmentationError::fit(format!(
            "max clusters must be at least 2, got {}",
            max_clusters
        )));
    }

    let diagnostics = (2..=max_clusters)
        .into_par_iter()
        .map(|k| {
            let model = fit_kmeans(features, k, config)?;
            let silhouette = model.silhouette(features);
            debug!(k, inertia = model.inertia, silhouette, "evaluated candidate");
            Ok(ClusterDiagnostic {
                k,
                inertia: model.inertia,
                silhouette,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    info!(candidates = diagnostics.len(), "finished cluster sweep");
    Ok(ClusterSweep { diagnostics })
}

/// Mean silhouette coefficient over all points.
///
/// Points alone in their cluster score 0; with fewer than two non-empty
/// clusters the score is 0.
pub fn silhouette_score(features: &Array2<f64>, labels: &Array1<usize>, n_clusters: usize) -> f64 {
    let n_samples = features.nrows();
    let mut cluster_sizes = vec![0usize; n_clusters];
    for &label in labels.iter() {
        if label < n_clusters {
            cluster_sizes[label] += 1;
        }
    }
    if n_samples < 2 || cluster_sizes.iter().filter(|&&s| s > 0).count() < 2 {
        return 0.0;
    }

    let per_point: Vec<f64> = (0..n_samples)
        .into_par_iter()
        .map(|i| {
            let own = labels[i];
            if cluster_sizes[own] < 2 {
                return 0.0;
            }

            let point = features.row(i);
            let mut distance_sums = vec![0.0; n_clusters];
            for (j, other) in features.outer_iter().enumerate() {
                if i != j {
                    distance_sums[labels[j]] += squared_distance(&point, &other).sqrt();
                }
            }

            let a_i = distance_sums[own] / (cluster_sizes[own] - 1) as f64;
            let b_i = (0..n_clusters)
                .filter(|&c| c != own && cluster_sizes[c] > 0)
                .map(|c| distance_sums[c] / cluster_sizes[c] as f64)
                .fold(f64::INFINITY, f64::min);

            let denominator = a_i.max(b_i);
            if denominator == 0.0 {
                0.0
            } else {
                (b_i - a_i) / denominator
            }
        })
        .collect();

    per_point.iter().sum::<f64>() / n_samples as f64
}

/// RFM record with its scaled features and cluster assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusteredRecord {
    pub rfm: RfmRecord,
    /// Standardized `[recency, frequency, monetary]`
    pub scaled: [f64; 3],
    pub cluster: usize,
}

/// Attach cluster ids and scaled features to the records the model was fitted on.
pub fn add_cluster_labels(
    records: &[RfmRecord],
    data: &RfmFeatures,
    model: &KMeansModel,
) -> Result<Vec<ClusteredRecord>> {
    if records.len() != data.len() || model.labels.len() != data.len() {
        return Err(SegmentationError::input(
            "records",
            format!(
                "{} records, {} feature rows, {} labels",
                records.len(),
                data.len(),
                model.labels.len()
            ),
        ));
    }

    records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            if data.customer_ids[i] != record.customer_id {
                return Err(SegmentationError::input(
                    "customer_id",
                    format!(
                        "row {} holds customer {} but record is {}",
                        i, data.customer_ids[i], record.customer_id
                    ),
                ));
            }
            let row = data.features.row(i);
            Ok(ClusteredRecord {
                rfm: record.clone(),
                scaled: [row[0], row[1], row[2]],
                cluster: model.labels[i],
            })
        })
        .collect()
}

/// Predict the cluster of a new customer from raw `[recency, frequency, monetary]`.
pub fn predict_cluster(
    model: &KMeansModel,
    data: &RfmFeatures,
    rfm_values: &[f64; 3],
) -> Result<usize> {
    let scaled_features = data.scale_new_data(rfm_values);
    model.predict(&scaled_features)
}

/// Size and mean raw metrics of one cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterProfile {
    pub cluster: usize,
    pub customers: usize,
    pub mean_recency: f64,
    pub mean_frequency: f64,
    pub mean_monetary: f64,
}

/// Profiles of the non-empty clusters, ordered by cluster id.
pub fn cluster_profiles(records: &[ClusteredRecord], n_clusters: usize) -> Vec<ClusterProfile> {
    let mut totals = vec![(0usize, [0.0f64; 3]); n_clusters];
    for record in records {
        if let Some((count, sums)) = totals.get_mut(record.cluster) {
            *count += 1;
            for (acc, value) in sums.iter_mut().zip(record.rfm.as_features()) {
                *acc += value;
            }
        }
    }

    totals
        .into_iter()
        .enumerate()
        .filter(|(_, (count, _))| *count > 0)
        .map(|(cluster, (count, sums))| {
            let n = count as f64;
            ClusterProfile {
                cluster,
                customers: count,
                mean_recency: sums[0] / n,
                mean_frequency: sums[1] / n,
                mean_monetary: sums[2] / n,
            }
        })
        .collect()
}

/// Compute within-cluster sum of squares (inertia)
fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    labels
        .iter()
        .enumerate()
        .filter(|&(_, &cluster)| cluster < centroids.nrows())
        .map(|(i, &cluster)| squared_distance(&features.row(i), &centroids.row(cluster)))
        .sum()
}

fn squared_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

fn distinct_rows(features: &Array2<f64>) -> usize {
    features
        .outer_iter()
        .map(|row| row.iter().map(|v| v.to_bits()).collect::<Vec<u64>>())
        .collect::<HashSet<_>>()
        .len()
}
