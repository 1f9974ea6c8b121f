//! Integration tests for SegmentForge

use std::io::Write;

use approx::assert_abs_diff_eq;
use chrono::{Duration, NaiveDate};
use segmentforge::pipeline::{CLUSTERED_FILE, DIAGNOSTICS_FILE, RFM_FILE, SEGMENTED_FILE};
use segmentforge::{
    calculate_rfm, load_transactions, load_transactions_file, run_segmentation, KMeansConfig,
    SegmentationConfig, SegmentationError, Transaction,
};
use tempfile::{tempdir, NamedTempFile};

const HEADER: &str =
    "InvoiceNo,StockCode,Description,Quantity,InvoiceDate,UnitPrice,CustomerID,Country";

/// 30 customers with spread-out recency, invoice counts and spend, plus noise rows
/// the cleaner must drop.
fn create_test_csv() -> NamedTempFile {
    let start = NaiveDate::from_ymd_opt(2011, 1, 1)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap();

    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{}", HEADER).unwrap();

    let mut invoice = 540000;
    for c in 0..30i64 {
        let customer_id = 12000 + c;
        let last_day = (c * 37) % 300;
        let invoices = 1 + c % 6;
        let price = 1.0 + c as f64 * 0.75;
        for i in 0..invoices {
            invoice += 1;
            let date = start + Duration::days(last_day - i * 3);
            for line in 0..2 {
                writeln!(
                    file,
                    "{},SKU{},ITEM {},{},{},{:.2},{},United Kingdom",
                    invoice,
                    line,
                    line,
                    1 + (c + line) % 4,
                    date.format("%Y-%m-%d %H:%M:%S"),
                    price,
                    customer_id
                )
                .unwrap();
            }
        }
    }

    // Cancelled line, missing customer and zero price
    writeln!(file, "C599999,SKU0,ITEM 0,-3,2011-06-01 10:00:00,2.50,12001,United Kingdom").unwrap();
    writeln!(file, "599998,SKU0,ITEM 0,3,2011-06-01 10:00:00,2.50,,United Kingdom").unwrap();
    writeln!(file, "599997,SKU0,ITEM 0,3,2011-06-01 10:00:00,0,12002,United Kingdom").unwrap();

    file
}

fn test_config() -> SegmentationConfig {
    SegmentationConfig {
        max_clusters: 6,
        n_clusters: 3,
        ..SegmentationConfig::default()
    }
}

#[test]
fn test_end_to_end_pipeline() {
    let test_file = create_test_csv();
    let (transactions, cleaning) = load_transactions_file(test_file.path()).unwrap();
    assert_eq!(cleaning.rows_dropped(), 3);

    let report = run_segmentation(&transactions, &test_config()).unwrap();

    // RFM invariants
    assert_eq!(report.rfm.len(), 30);
    assert!(report.rfm.iter().all(|r| r.frequency >= 1 && r.recency >= 1));
    let monetary: f64 = report.rfm.iter().map(|r| r.monetary).sum();
    let line_totals: f64 = transactions.iter().map(|t| t.line_total).sum();
    assert_abs_diff_eq!(monetary, line_totals, epsilon = 1e-6);

    // Scores and segments
    assert_eq!(report.segmented.len(), 30);
    for s in &report.segmented {
        let scored = &s.scored;
        for score in [scored.r_score, scored.f_score, scored.m_score] {
            assert!((1..=5).contains(&score));
        }
        assert_eq!(
            scored.rfm_numeric,
            scored.r_score as u32 * 100 + scored.f_score as u32 * 10 + scored.m_score as u32
        );
    }

    // Clustering
    assert_eq!(report.sweep.diagnostics.len(), 5);
    assert_eq!(report.clustered.len(), 30);
    assert!(report.clustered.iter().all(|c| c.cluster < 3));
    for (clustered, rfm) in report.clustered.iter().zip(&report.rfm) {
        assert_eq!(&clustered.rfm, rfm);
    }
    for column in report.features.features.columns() {
        assert_abs_diff_eq!(column.mean().unwrap(), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(column.std(0.0), 1.0, epsilon = 1e-9);
    }
}

#[test]
fn test_checkpoints_written_with_headers() {
    let test_file = create_test_csv();
    let (transactions, _) = load_transactions_file(test_file.path()).unwrap();
    let report = run_segmentation(&transactions, &test_config()).unwrap();

    let dir = tempdir().unwrap();
    report.write_checkpoints(dir.path()).unwrap();

    let expected_headers = [
        (RFM_FILE, "CustomerID,Recency,Frequency,Monetary"),
        (
            SEGMENTED_FILE,
            "CustomerID,Recency,Frequency,Monetary,R_Score,F_Score,M_Score,RFM_Score,RFM_Numeric,Segment",
        ),
        (
            CLUSTERED_FILE,
            "CustomerID,Recency,Frequency,Monetary,Cluster,Scaled_Recency,Scaled_Frequency,Scaled_Monetary",
        ),
        (DIAGNOSTICS_FILE, "Clusters,Inertia,Silhouette"),
    ];
    for (name, header) in expected_headers {
        let text = std::fs::read_to_string(dir.path().join(name)).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(header), "header of {}", name);
        let expected_rows = if name == DIAGNOSTICS_FILE { 5 } else { 30 };
        assert_eq!(lines.count(), expected_rows, "rows of {}", name);
    }
}

#[test]
fn test_pipeline_is_reproducible() {
    let test_file = create_test_csv();
    let (transactions, _) = load_transactions_file(test_file.path()).unwrap();
    let config = test_config();

    let first = run_segmentation(&transactions, &config).unwrap();
    let second = run_segmentation(&transactions, &config).unwrap();

    assert_eq!(first.rfm, second.rfm);
    assert_eq!(first.segmented, second.segmented);
    assert_eq!(first.clustered, second.clustered);
    assert_eq!(first.model.labels, second.model.labels);
    assert_eq!(first.sweep, second.sweep);
}

#[test]
fn test_reference_date_example() {
    let text = format!(
        "{}\n{}\n{}\n{}",
        HEADER,
        "A,S1,ITEM,2,2024-01-01,10,1001,UK",
        "A,S2,ITEM,1,2024-01-05,5,1001,UK",
        "B,S3,ITEM,1,2024-02-01,20,1001,UK"
    );
    let (transactions, _) = load_transactions(text.as_bytes()).unwrap();
    let reference = NaiveDate::from_ymd_opt(2024, 2, 2)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();

    let rfm = calculate_rfm(&transactions, Some(reference)).unwrap();
    assert_eq!(rfm.len(), 1);
    assert_eq!(rfm[0].recency, 1);
    assert_eq!(rfm[0].frequency, 2);
    assert_abs_diff_eq!(rfm[0].monetary, 45.0, epsilon = 1e-9);
}

#[test]
fn test_small_cohort_fails_binning() {
    let day = NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let transactions = vec![
        Transaction::new(1, "A", day, 1, 10.0),
        Transaction::new(2, "B", day, 1, 10.0),
        Transaction::new(3, "C", day + Duration::days(2), 1, 10.0),
    ];

    let err = run_segmentation(&transactions, &SegmentationConfig::default()).unwrap_err();
    assert!(matches!(err, SegmentationError::Binning { .. }));
}

#[test]
fn test_too_many_clusters_fails_fit() {
    let test_file = create_test_csv();
    let (transactions, _) = load_transactions_file(test_file.path()).unwrap();
    let config = SegmentationConfig {
        max_clusters: 4,
        n_clusters: 30,
        kmeans: KMeansConfig {
            n_runs: 2,
            ..KMeansConfig::default()
        },
        ..SegmentationConfig::default()
    };

    let err = run_segmentation(&transactions, &config).unwrap_err();
    assert!(matches!(err, SegmentationError::Fit { .. }));
}

#[test]
fn test_three_score_levels() {
    let test_file = create_test_csv();
    let (transactions, _) = load_transactions_file(test_file.path()).unwrap();
    let config = SegmentationConfig {
        score_levels: 3,
        ..test_config()
    };

    let report = run_segmentation(&transactions, &config).unwrap();

    assert_eq!(report.segmented.len(), 30);
    for s in &report.segmented {
        for score in [s.scored.r_score, s.scored.f_score, s.scored.m_score] {
            assert!((1..=3).contains(&score));
        }
        assert_eq!(s.scored.rfm_score.len(), 3);
    }
    assert!(report
        .segmented
        .iter()
        .any(|s| s.segment == segmentforge::Segment::Champions));
}
