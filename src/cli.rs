//! Command-line interface definitions and argument parsing

use clap::Parser;

use crate::data::parse_timestamp;
use crate::error::SegmentationError;
use crate::model::KMeansConfig;
use crate::pipeline::SegmentationConfig;

/// Customer segmentation CLI: RFM scoring, rule-based segments and K-Means clusters
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input transactions CSV file
    #[arg(short, long, default_value = "data/raw/ecommerce_data.csv")]
    pub input: String,

    /// Directory for CSV checkpoints and charts
    #[arg(short, long, default_value = "results")]
    pub output_dir: String,

    /// Number of clusters for the final K-Means fit
    #[arg(short = 'k', long, default_value = "4")]
    pub clusters: usize,

    /// Largest k evaluated by the elbow/silhouette sweep
    #[arg(long, default_value = "10")]
    pub max_clusters: usize,

    /// Number of ordinal score levels per RFM metric
    #[arg(long, default_value = "5")]
    pub score_levels: usize,

    /// Reference date for recency (defaults to the day after the latest invoice)
    #[arg(long)]
    pub reference_date: Option<String>,

    /// Seed for K-Means initialization
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// K-Means restarts per fit
    #[arg(long, default_value = "10")]
    pub n_runs: usize,

    /// Maximum iterations for K-Means algorithm
    #[arg(long, default_value = "300")]
    pub max_iters: u64,

    /// Tolerance for K-Means convergence
    #[arg(long, default_value = "1e-4")]
    pub tolerance: f64,

    /// Prediction mode: provide R,F,M values as comma-separated string
    /// Example: --predict "30,10,500.0" for Recency=30, Frequency=10, Monetary=500.0
    #[arg(short, long)]
    pub predict: Option<String>,

    /// Skip chart rendering
    #[arg(long)]
    pub no_plots: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Parse RFM values from the predict string
    /// Expected format: "recency,frequency,monetary"
    pub fn parse_rfm_values(&self) -> crate::Result<Option<[f64; 3]>> {
        let Some(ref predict_str) = self.predict else {
            return Ok(None);
        };

        let parts: Vec<&str> = predict_str.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return Err(SegmentationError::input(
                "predict",
                "values must be in format 'recency,frequency,monetary'",
            ));
        }

        let mut values = [0.0; 3];
        for (slot, (part, name)) in values
            .iter_mut()
            .zip(parts.iter().zip(["recency", "frequency", "monetary"]))
        {
            *slot = part
                .parse()
                .map_err(|_| SegmentationError::input(name, format!("invalid value: {}", part)))?;
        }

        Ok(Some(values))
    }

    /// Build the run configuration from the parsed flags.
    pub fn to_config(&self) -> crate::Result<SegmentationConfig> {
        let reference_date = match self.reference_date.as_deref() {
            Some(raw) => Some(parse_timestamp(raw).ok_or_else(|| {
                SegmentationError::input("reference_date", format!("cannot parse '{}'", raw))
            })?),
            None => None,
        };

        Ok(SegmentationConfig {
            score_levels: self.score_levels,
            max_clusters: self.max_clusters,
            n_clusters: self.clusters,
            kmeans: KMeansConfig {
                seed: self.seed,
                n_runs: self.n_runs,
                max_iterations: self.max_iters,
                tolerance: self.tolerance,
            },
            reference_date,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["segmentforge"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_parse_rfm_values() {
        let mut args = args(&["--predict", "30,10,500.0"]);

        let result = args.parse_rfm_values().unwrap();
        assert_eq!(result, Some([30.0, 10.0, 500.0]));

        args.predict = None;
        assert_eq!(args.parse_rfm_values().unwrap(), None);

        args.predict = Some("invalid".to_string());
        assert!(args.parse_rfm_values().is_err());

        args.predict = Some("1,x,3".to_string());
        assert!(matches!(
            args.parse_rfm_values(),
            Err(SegmentationError::Input { ref field, .. }) if field == "frequency"
        ));
    }

    #[test]
    fn test_defaults_match_config_defaults() {
        let config = args(&[]).to_config().unwrap();
        assert_eq!(config, SegmentationConfig::default());
    }

    #[test]
    fn test_reference_date_flag() {
        let config = args(&["--reference-date", "2011-12-10", "-k", "3"])
            .to_config()
            .unwrap();
        assert_eq!(config.n_clusters, 3);
        assert_eq!(config.reference_date, parse_timestamp("2011-12-10T00:00:00"));

        assert!(args(&["--reference-date", "someday"]).to_config().is_err());
    }
}
