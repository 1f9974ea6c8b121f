//! Static charts for cluster diagnostics, clusters and segments using Plotters

use std::path::Path;

use anyhow::Context;
use plotters::coord::Shift;
use plotters::prelude::*;
use tracing::info;

use crate::features::{RfmFeatures, FEATURE_NAMES};
use crate::model::{cluster_profiles, ClusterProfile, ClusterSweep, KMeansModel};
use crate::pipeline::SegmentationReport;
use crate::rfm::RfmRecord;
use crate::segment::{segment_summary, Segment, SegmentSummary, SegmentedRecord};

pub const ELBOW_CHART: &str = "clustering_analysis.png";
pub const CLUSTER_CHART: &str = "clusters.png";
pub const CLUSTER_SIZE_CHART: &str = "cluster_sizes.png";
pub const SEGMENT_CHART: &str = "segment_distribution.png";
pub const RFM_DISTRIBUTION_CHART: &str = "rfm_distributions.png";
pub const CLUSTER_PROFILE_CHART: &str = "cluster_profiles.png";
pub const SEGMENT_BOXPLOT_CHART: &str = "segment_rfm_boxplots.png";

const HISTOGRAM_BINS: usize = 30;
const METRIC_COLORS: [RGBColor; 3] = [BLUE, GREEN, RED];

/// Axis range covering `values` with `pad` on each side; (-1, 1) when empty.
pub fn padded_range(values: &[f64], pad: f64) -> (f64, f64) {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !min.is_finite() || !max.is_finite() {
        return (-1.0, 1.0);
    }
    (min - pad, max + pad)
}

fn cluster_color(cluster: usize) -> PaletteColor<Palette99> {
    Palette99::pick(cluster)
}

fn draw_line_panel(
    area: &DrawingArea<BitMapBackend<'_>, Shift>,
    title: &str,
    y_desc: &str,
    ks: &[usize],
    values: &[f64],
    color: &RGBColor,
) -> anyhow::Result<()> {
    let (y_min, y_max) = padded_range(values, 0.05 * padded_span(values));
    let x_max = ks.iter().copied().max().unwrap_or(2) as f64;

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(1.5f64..(x_max + 0.5), y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc("Number of clusters")
        .y_desc(y_desc)
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    let points: Vec<(f64, f64)> = ks.iter().map(|&k| k as f64).zip(values.iter().copied()).collect();
    chart.draw_series(LineSeries::new(points.clone(), color))?;
    chart.draw_series(points.into_iter().map(|p| Circle::new(p, 4, color.filled())))?;
    Ok(())
}

fn padded_span(values: &[f64]) -> f64 {
    let (lo, hi) = padded_range(values, 0.0);
    (hi - lo).max(1e-6)
}

/// Equal-width histogram: `(lower edge, bin width, counts)`.
///
/// The maximum falls in the last bin. A constant column gets a single bin of width 1.
pub fn histogram_counts(values: &[f64], bins: usize) -> (f64, f64, Vec<usize>) {
    let bins = bins.max(1);
    let (min, max) = padded_range(values, 0.0);
    if values.is_empty() {
        return (min, 1.0, vec![0; bins]);
    }
    if max - min <= f64::EPSILON {
        return (min, 1.0, vec![values.len()]);
    }

    let width = (max - min) / bins as f64;
    let mut counts = vec![0; bins];
    for &value in values {
        let idx = (((value - min) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    (min, width, counts)
}

/// Box-plot statistics with linearly interpolated quartiles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxStats {
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

impl BoxStats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let quantile = |q: f64| {
            let position = q * (sorted.len() - 1) as f64;
            let lower = position.floor() as usize;
            let upper = position.ceil() as usize;
            sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64)
        };
        Some(Self {
            min: sorted[0],
            q1: quantile(0.25),
            median: quantile(0.5),
            q3: quantile(0.75),
            max: sorted[sorted.len() - 1],
        })
    }
}

/// Raw values of metric `j` (0 = recency, 1 = frequency, 2 = monetary) per segment,
/// in segment order.
pub fn segment_metric_values(records: &[SegmentedRecord], j: usize) -> Vec<(Segment, Vec<f64>)> {
    let mut grouped: Vec<(Segment, Vec<f64>)> = Vec::new();
    for record in records {
        let value = record.scored.rfm.as_features()[j];
        match grouped.iter_mut().find(|(segment, _)| *segment == record.segment) {
            Some((_, values)) => values.push(value),
            None => grouped.push((record.segment, vec![value])),
        }
    }
    grouped.sort_by_key(|(segment, _)| *segment);
    grouped
}

/// Side-by-side elbow (inertia) and silhouette curves over the candidate k.
pub fn create_elbow_chart(sweep: &ClusterSweep, output_path: &Path) -> anyhow::Result<()> {
    let ks = sweep.ks();
    let root = BitMapBackend::new(output_path, (1200, 500)).into_drawing_area();
    root.fill(&WHITE)?;

    let (left, right) = root.split_horizontally(600);
    draw_line_panel(&left, "Elbow Method", "Inertia", &ks, &sweep.inertia(), &BLUE)?;
    draw_line_panel(
        &right,
        "Silhouette Score Analysis",
        "Silhouette",
        &ks,
        &sweep.silhouette(),
        &RED,
    )?;

    root.present()?;
    info!(path = %output_path.display(), "saved elbow chart");
    Ok(())
}

/// Scatter of scaled frequency vs monetary, colored by cluster, with centroids.
pub fn create_cluster_visualization(
    data: &RfmFeatures,
    model: &KMeansModel,
    output_path: &Path,
    plot_title: Option<&str>,
) -> anyhow::Result<()> {
    let title = plot_title.unwrap_or("Customer Clusters: Frequency vs Monetary (scaled)");

    let frequency_values: Vec<f64> = data.features.column(1).to_vec();
    let monetary_values: Vec<f64> = data.features.column(2).to_vec();
    let (freq_min, freq_max) = padded_range(&frequency_values, 0.5);
    let (mon_min, mon_max) = padded_range(&monetary_values, 0.5);

    let root = BitMapBackend::new(output_path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 26))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(freq_min..freq_max, mon_min..mon_max)?;

    chart
        .configure_mesh()
        .x_desc("Frequency (scaled)")
        .y_desc("Monetary (scaled)")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    chart.draw_series(
        frequency_values
            .iter()
            .zip(monetary_values.iter())
            .zip(model.labels.iter())
            .map(|((&freq, &mon), &cluster)| {
                Circle::new((freq, mon), 3, cluster_color(cluster).filled())
            }),
    )?;

    for (cluster_id, centroid) in model.centroids.outer_iter().enumerate() {
        let (freq, mon) = (centroid[1], centroid[2]);
        let color = cluster_color(cluster_id);
        chart
            .draw_series(std::iter::once(Rectangle::new(
                [(freq - 0.1, mon - 0.1), (freq + 0.1, mon + 0.1)],
                color.filled(),
            )))?
            .label(format!("Cluster {}", cluster_id))
            .legend(move |(x, y)| Rectangle::new([(x, y), (x + 10, y + 10)], color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    info!(path = %output_path.display(), "saved cluster chart");
    Ok(())
}

/// Bar chart of customers per cluster.
pub fn create_cluster_size_chart(model: &KMeansModel, output_path: &Path) -> anyhow::Result<()> {
    let cluster_sizes = model.cluster_sizes();
    let max_size = cluster_sizes.iter().copied().max().unwrap_or(1) as f64;

    let root = BitMapBackend::new(output_path, (600, 400)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Cluster Sizes", ("sans-serif", 26))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(-0.5f64..(model.n_clusters as f64 - 0.5), 0f64..(max_size * 1.1))?;

    chart
        .configure_mesh()
        .x_desc("Cluster ID")
        .y_desc("Number of Customers")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    chart.draw_series(cluster_sizes.iter().enumerate().map(|(cluster_id, &size)| {
        Rectangle::new(
            [(cluster_id as f64 - 0.4, 0.0), (cluster_id as f64 + 0.4, size as f64)],
            cluster_color(cluster_id).filled(),
        )
    }))?;

    root.present()?;
    info!(path = %output_path.display(), "saved cluster size chart");
    Ok(())
}

/// Bar chart of customers per business segment, largest first.
pub fn create_segment_distribution_chart(
    summary: &[SegmentSummary],
    output_path: &Path,
) -> anyhow::Result<()> {
    let labels: Vec<String> = summary.iter().map(|s| s.segment.to_string()).collect();
    let max_count = summary.iter().map(|s| s.customers).max().unwrap_or(1);

    let root = BitMapBackend::new(output_path, (1000, 500)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Distribution of Customer Segments", ("sans-serif", 26))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d((0usize..labels.len()).into_segmented(), 0usize..(max_count + 1))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(labels.len())
        .x_label_formatter(&|value| match value {
            SegmentValue::CenterOf(idx) => labels.get(*idx).cloned().unwrap_or_default(),
            _ => String::new(),
        })
        .y_desc("Number of Customers")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    chart.draw_series(
        Histogram::vertical(&chart)
            .style(BLUE.mix(0.7).filled())
            .margin(8)
            .data(summary.iter().enumerate().map(|(idx, s)| (idx, s.customers))),
    )?;

    root.present()?;
    info!(path = %output_path.display(), "saved segment chart");
    Ok(())
}

/// Histograms of raw recency, frequency and monetary side by side.
pub fn create_rfm_distribution_chart(records: &[RfmRecord], output_path: &Path) -> anyhow::Result<()> {
    let root = BitMapBackend::new(output_path, (1500, 500)).into_drawing_area();
    root.fill(&WHITE)?;

    for (j, area) in root.split_evenly((1, 3)).iter().enumerate() {
        let values: Vec<f64> = records.iter().map(|r| r.as_features()[j]).collect();
        let (lower, width, counts) = histogram_counts(&values, HISTOGRAM_BINS);
        let max_count = counts.iter().copied().max().unwrap_or(1) as f64;
        let upper = lower + width * counts.len() as f64;

        let mut chart = ChartBuilder::on(area)
            .caption(format!("{} Distribution", FEATURE_NAMES[j]), ("sans-serif", 24))
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(lower..upper, 0f64..(max_count * 1.1))?;

        chart
            .configure_mesh()
            .x_desc(FEATURE_NAMES[j])
            .y_desc("Customers")
            .axis_desc_style(("sans-serif", 15))
            .draw()?;

        let color = METRIC_COLORS[j];
        chart.draw_series(counts.iter().enumerate().map(|(bin, &count)| {
            let x0 = lower + width * bin as f64;
            Rectangle::new([(x0, 0.0), (x0 + width, count as f64)], color.mix(0.7).filled())
        }))?;
    }

    root.present()?;
    info!(path = %output_path.display(), "saved RFM distribution chart");
    Ok(())
}

/// Grouped bars of mean raw recency, frequency and monetary per cluster.
pub fn create_cluster_profile_chart(
    profiles: &[ClusterProfile],
    output_path: &Path,
) -> anyhow::Result<()> {
    let means = |p: &ClusterProfile| [p.mean_recency, p.mean_frequency, p.mean_monetary];
    let max_value = profiles
        .iter()
        .flat_map(means)
        .fold(0.0f64, f64::max)
        .max(1.0);
    let n_clusters = profiles.iter().map(|p| p.cluster + 1).max().unwrap_or(1);

    let root = BitMapBackend::new(output_path, (900, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Cluster Profiles", ("sans-serif", 26))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(-0.5f64..(n_clusters as f64 - 0.5), 0f64..(max_value * 1.1))?;

    chart
        .configure_mesh()
        .x_desc("Cluster")
        .y_desc("Average Value")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for (j, name) in FEATURE_NAMES.iter().enumerate() {
        let color = METRIC_COLORS[j];
        let offset = -0.3 + 0.2 * j as f64;
        chart
            .draw_series(profiles.iter().map(|p| {
                let x = p.cluster as f64 + offset;
                Rectangle::new([(x, 0.0), (x + 0.2, means(p)[j])], color.filled())
            }))?
            .label(*name)
            .legend(move |(x, y)| Rectangle::new([(x, y), (x + 10, y + 10)], color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    info!(path = %output_path.display(), "saved cluster profile chart");
    Ok(())
}

/// Box plots of raw recency, frequency and monetary for each segment.
pub fn create_segment_boxplot_chart(
    records: &[SegmentedRecord],
    output_path: &Path,
) -> anyhow::Result<()> {
    let root = BitMapBackend::new(output_path, (1800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    for (j, area) in root.split_evenly((1, 3)).iter().enumerate() {
        let groups: Vec<(Segment, BoxStats)> = segment_metric_values(records, j)
            .into_iter()
            .filter_map(|(segment, values)| BoxStats::from_values(&values).map(|b| (segment, b)))
            .collect();
        let labels: Vec<String> = groups.iter().map(|(s, _)| s.to_string()).collect();
        let extremes: Vec<f64> = groups.iter().flat_map(|(_, b)| [b.min, b.max]).collect();
        let (y_min, y_max) = padded_range(&extremes, 0.05 * padded_span(&extremes));

        let mut chart = ChartBuilder::on(area)
            .caption(format!("{} by Segment", FEATURE_NAMES[j]), ("sans-serif", 22))
            .margin(10)
            .x_label_area_size(60)
            .y_label_area_size(60)
            .build_cartesian_2d(-0.5f64..(groups.len() as f64 - 0.5), y_min..y_max)?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(groups.len().max(1))
            .x_label_formatter(&|x| {
                let idx = x.round();
                if (x - idx).abs() < 1e-6 && idx >= 0.0 {
                    labels.get(idx as usize).cloned().unwrap_or_default()
                } else {
                    String::new()
                }
            })
            .y_desc(FEATURE_NAMES[j])
            .axis_desc_style(("sans-serif", 15))
            .draw()?;

        let color = METRIC_COLORS[j];
        for (idx, (_, stats)) in groups.iter().enumerate() {
            let x = idx as f64;
            chart.draw_series(std::iter::once(Rectangle::new(
                [(x - 0.3, stats.q1), (x + 0.3, stats.q3)],
                color.mix(0.4).filled(),
            )))?;
            chart.draw_series(
                [
                    vec![(x - 0.3, stats.median), (x + 0.3, stats.median)],
                    vec![(x, stats.min), (x, stats.q1)],
                    vec![(x, stats.q3), (x, stats.max)],
                    vec![(x - 0.15, stats.min), (x + 0.15, stats.min)],
                    vec![(x - 0.15, stats.max), (x + 0.15, stats.max)],
                ]
                .into_iter()
                .map(|line| PathElement::new(line, BLACK)),
            )?;
        }
    }

    root.present()?;
    info!(path = %output_path.display(), "saved segment box plot chart");
    Ok(())
}

/// Render every chart of a run into `output_dir`.
pub fn generate_visualization_report(
    report: &SegmentationReport,
    output_dir: &Path,
) -> anyhow::Result<()> {
    create_elbow_chart(&report.sweep, &output_dir.join(ELBOW_CHART))
        .context("rendering elbow chart")?;
    create_cluster_visualization(
        &report.features,
        &report.model,
        &output_dir.join(CLUSTER_CHART),
        None,
    )
    .context("rendering cluster chart")?;
    create_cluster_size_chart(&report.model, &output_dir.join(CLUSTER_SIZE_CHART))
        .context("rendering cluster size chart")?;
    create_segment_distribution_chart(
        &segment_summary(&report.segmented),
        &output_dir.join(SEGMENT_CHART),
    )
    .context("rendering segment chart")?;
    create_rfm_distribution_chart(&report.rfm, &output_dir.join(RFM_DISTRIBUTION_CHART))
        .context("rendering RFM distribution chart")?;
    create_cluster_profile_chart(
        &cluster_profiles(&report.clustered, report.model.n_clusters),
        &output_dir.join(CLUSTER_PROFILE_CHART),
    )
    .context("rendering cluster profile chart")?;
    create_segment_boxplot_chart(&report.segmented, &output_dir.join(SEGMENT_BOXPLOT_CHART))
        .context("rendering segment box plot chart")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_range() {
        assert_eq!(padded_range(&[1.0, -2.0, 3.0], 0.5), (-2.5, 3.5));
        assert_eq!(padded_range(&[], 0.5), (-1.0, 1.0));
    }

    #[test]
    fn test_padded_span_never_zero() {
        assert_eq!(padded_span(&[2.0, 6.0]), 4.0);
        assert!(padded_span(&[3.0, 3.0]) > 0.0);
    }

    #[test]
    fn test_histogram_counts() {
        let (lower, width, counts) = histogram_counts(&[0.0, 1.0, 2.0, 3.0, 4.0], 2);
        assert_eq!(lower, 0.0);
        assert_eq!(width, 2.0);
        assert_eq!(counts, vec![2, 3]);

        let (_, _, constant) = histogram_counts(&[7.0, 7.0, 7.0], 30);
        assert_eq!(constant, vec![3]);
        assert_eq!(histogram_counts(&[], 4).2, vec![0; 4]);
    }

    #[test]
    fn test_box_stats() {
        let stats = BoxStats::from_values(&[5.0, 1.0, 3.0, 2.0, 4.0]).unwrap();
        assert_eq!(
            stats,
            BoxStats {
                min: 1.0,
                q1: 2.0,
                median: 3.0,
                q3: 4.0,
                max: 5.0
            }
        );

        let even = BoxStats::from_values(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(even.median, 2.5);
        assert_eq!(even.q1, 1.75);
        assert!(BoxStats::from_values(&[]).is_none());
    }

    #[test]
    fn test_segment_metric_values_groups_by_segment() {
        use crate::scoring::ScoredRecord;

        let record = |customer_id: i64, monetary: f64, segment: Segment| SegmentedRecord {
            scored: ScoredRecord {
                rfm: RfmRecord {
                    customer_id,
                    recency: 10,
                    frequency: 2,
                    monetary,
                },
                r_score: 3,
                f_score: 3,
                m_score: 3,
                rfm_score: "333".to_string(),
                rfm_numeric: 333,
            },
            segment,
        };
        let records = vec![
            record(1, 100.0, Segment::Lost),
            record(2, 50.0, Segment::Champions),
            record(3, 300.0, Segment::Lost),
        ];

        let grouped = segment_metric_values(&records, 2);
        assert_eq!(
            grouped,
            vec![
                (Segment::Champions, vec![50.0]),
                (Segment::Lost, vec![100.0, 300.0]),
            ]
        );
    }

    #[test]
    fn test_cluster_colors_distinct() {
        let first = cluster_color(0).rgb();
        let second = cluster_color(1).rgb();
        assert_ne!(first, second);
    }
}
