//! SegmentForge: RFM customer segmentation CLI
//!
//! Loads and cleans transactions, then either runs the full scoring,
//! segmentation and clustering pipeline or predicts the cluster of one customer.

use std::fs;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use segmentforge::data::load_transactions_file;
use segmentforge::export::{self, TransactionRow};
use segmentforge::model::{cluster_profiles, predict_cluster};
use segmentforge::segment::segment_summary;
use segmentforge::{
    calculate_rfm, fit_kmeans, prepare_features, run_segmentation, viz, Args, SegmentationConfig,
    SegmentationReport, Transaction,
};
use tracing_subscriber::EnvFilter;

const CLEANED_FILE: &str = "cleaned_transactions.csv";

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = args.to_config().context("invalid arguments")?;

    let load_start = Instant::now();
    let (transactions, cleaning) = load_transactions_file(&args.input)
        .with_context(|| format!("loading transactions from {}", args.input))?;
    tracing::info!(
        rows_read = cleaning.rows_read,
        rows_kept = cleaning.rows_kept,
        duplicates = cleaning.duplicates,
        missing_fields = cleaning.missing_fields,
        non_positive_quantity = cleaning.non_positive_quantity,
        non_positive_price = cleaning.non_positive_price,
        elapsed_ms = load_start.elapsed().as_millis() as u64,
        "loaded transactions"
    );

    if let Some(rfm_values) = args.parse_rfm_values()? {
        run_prediction_mode(&transactions, &config, rfm_values)
    } else {
        run_full_pipeline(&args, &transactions, &config)
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

/// Fit the final partition and place one new customer in it
fn run_prediction_mode(
    transactions: &[Transaction],
    config: &SegmentationConfig,
    rfm_values: [f64; 3],
) -> Result<()> {
    println!("=== Prediction Mode ===");
    println!(
        "Input RFM values: R={}, F={}, M={}",
        rfm_values[0], rfm_values[1], rfm_values[2]
    );

    let rfm = calculate_rfm(transactions, config.reference_date).context("RFM stage")?;
    let data = prepare_features(&rfm).context("feature preparation")?;
    let model = fit_kmeans(&data.features, config.n_clusters, &config.kmeans)
        .context("K-Means fit")?;
    let cluster = predict_cluster(&model, &data, &rfm_values)?;

    let cluster_sizes = model.cluster_sizes();
    let share = cluster_sizes[cluster] as f64 / data.len() as f64 * 100.0;
    println!("\nPredicted Cluster: {}", cluster);
    println!(
        "  Size: {} customers ({:.1}% of total)",
        cluster_sizes[cluster], share
    );
    println!(
        "  Centroid (scaled): R={:.2}, F={:.2}, M={:.2}",
        model.centroids[[cluster, 0]],
        model.centroids[[cluster, 1]],
        model.centroids[[cluster, 2]]
    );

    Ok(())
}

/// Run the complete pipeline and write checkpoints and charts
fn run_full_pipeline(
    args: &Args,
    transactions: &[Transaction],
    config: &SegmentationConfig,
) -> Result<()> {
    let start_time = Instant::now();
    let output_dir = Path::new(&args.output_dir);
    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating output directory {}", output_dir.display()))?;

    export::write_rows_to_file(
        output_dir.join(CLEANED_FILE),
        transactions.iter().map(TransactionRow::from),
    )
    .context("writing cleaned transactions")?;

    let report = run_segmentation(transactions, config).context("segmentation pipeline")?;
    report
        .write_checkpoints(output_dir)
        .context("writing checkpoints")?;

    print_summary(&report);

    if !args.no_plots {
        viz::generate_visualization_report(&report, output_dir)?;
    }

    println!(
        "\nAnalysis complete in {:.2}s. Results saved to {}",
        start_time.elapsed().as_secs_f64(),
        output_dir.display()
    );
    Ok(())
}

fn print_summary(report: &SegmentationReport) {
    println!("\n=== RFM Segments ===");
    println!("Reference date: {}", report.reference_date.as_datetime());
    println!(
        "  {:<20} | {:>9} | {:>8} | {:>9} | {:>10}",
        "Segment", "Customers", "Recency", "Frequency", "Monetary"
    );
    for s in segment_summary(&report.segmented) {
        println!(
            "  {:<20} | {:>9} | {:>8.1} | {:>9.1} | {:>10.2}",
            s.segment.label(),
            s.customers,
            s.mean_recency,
            s.mean_frequency,
            s.mean_monetary
        );
    }

    println!("\n=== Cluster Diagnostics ===");
    println!("  {:>2} | {:>12} | {:>10}", "k", "Inertia", "Silhouette");
    for d in &report.sweep.diagnostics {
        println!("  {:>2} | {:>12.2} | {:>10.3}", d.k, d.inertia, d.silhouette);
    }
    if let Some(best) = report.sweep.best_silhouette() {
        println!("Highest silhouette at k={} ({:.3})", best.k, best.silhouette);
    }

    println!("\n=== Cluster Profiles (k={}) ===", report.model.n_clusters);
    println!(
        "  {:>7} | {:>9} | {:>8} | {:>9} | {:>10}",
        "Cluster", "Customers", "Recency", "Frequency", "Monetary"
    );
    for p in cluster_profiles(&report.clustered, report.model.n_clusters) {
        println!(
            "  {:>7} | {:>9} | {:>8.1} | {:>9.1} | {:>10.2}",
            p.cluster, p.customers, p.mean_recency, p.mean_frequency, p.mean_monetary
        );
    }
}
