//! Quantile-based RFM scoring
//!
//! Scores are rank-relative to the cohort: boundaries are fitted once over the
//! whole population and carried in an explicit [`ScoreBoundaries`] context.

use tracing::info;

use crate::error::{Result, SegmentationError};
use crate::rfm::RfmRecord;

/// Number of ordinal score levels used when none is configured.
pub const DEFAULT_SCORE_LEVELS: usize = 5;

const MIN_SCORE_LEVELS: usize = 2;
const MAX_SCORE_LEVELS: usize = 9;

/// Equal-population bin edges for one metric.
///
/// Edges are the `i / levels` quantiles of the fitted values, linearly
/// interpolated between order statistics. A value `x` falls in bin `i` when
/// `edges[i] < x <= edges[i + 1]`; the lowest bin also includes `edges[0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantileBins {
    edges: Vec<f64>,
}

impl QuantileBins {
    /// Fit edges, failing when they do not yield `levels` distinct bins.
    pub fn fit(values: &[f64], levels: usize, metric: &'static str) -> Result<Self> {
        if values.is_empty() {
            return Err(SegmentationError::input(metric, "no values to bin"));
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(SegmentationError::input(metric, format!("non-finite value {}", bad)));
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let last = (sorted.len() - 1) as f64;
        let edges: Vec<f64> = (0..=levels)
            .map(|i| {
                let position = last * i as f64 / levels as f64;
                let lower = position.floor() as usize;
                let upper = position.ceil() as usize;
                let fraction = position - lower as f64;
                sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
            })
            .collect();

        let mut distinct = edges.clone();
        distinct.dedup();
        if distinct.len() < edges.len() {
            return Err(SegmentationError::Binning {
                metric,
                levels,
                distinct_edges: distinct.len(),
            });
        }

        Ok(Self { edges })
    }

    pub fn levels(&self) -> usize {
        self.edges.len() - 1
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Zero-based bin index; values beyond the outer edges land in the end bins.
    pub fn bin(&self, value: f64) -> usize {
        let inner = &self.edges[1..self.edges.len() - 1];
        inner.partition_point(|&edge| edge < value)
    }
}

/// Ranks `1..=n` by ascending value, ties broken by position (first come first served).
pub fn first_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    for (rank, idx) in order.into_iter().enumerate() {
        ranks[idx] = (rank + 1) as f64;
    }
    ranks
}

/// Population-level quantile boundaries for all three metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBoundaries {
    pub levels: usize,
    /// Cohort size the boundaries were fitted on
    pub population: usize,
    pub recency: QuantileBins,
    /// Fitted on first-come ranks, not raw frequencies
    pub frequency_rank: QuantileBins,
    pub monetary: QuantileBins,
}

impl ScoreBoundaries {
    pub fn fit(records: &[RfmRecord], levels: usize) -> Result<Self> {
        if !(MIN_SCORE_LEVELS..=MAX_SCORE_LEVELS).contains(&levels) {
            return Err(SegmentationError::input(
                "score_levels",
                format!(
                    "{} is outside {}..={}",
                    levels, MIN_SCORE_LEVELS, MAX_SCORE_LEVELS
                ),
            ));
        }

        let (recency, frequency, monetary) = metric_columns(records);

        Ok(Self {
            levels,
            population: records.len(),
            recency: QuantileBins::fit(&recency, levels, "recency")?,
            frequency_rank: QuantileBins::fit(&first_ranks(&frequency), levels, "frequency")?,
            monetary: QuantileBins::fit(&monetary, levels, "monetary")?,
        })
    }
}

/// RFM record with ordinal scores attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub rfm: RfmRecord,
    pub r_score: u8,
    pub f_score: u8,
    pub m_score: u8,
    /// Digits R, F, M concatenated, e.g. "545"
    pub rfm_score: String,
    /// `r * 100 + f * 10 + m`
    pub rfm_numeric: u32,
}

impl ScoredRecord {
    fn new(rfm: RfmRecord, r_score: u8, f_score: u8, m_score: u8) -> Self {
        Self {
            rfm,
            r_score,
            f_score,
            m_score,
            rfm_score: format!("{}{}{}", r_score, f_score, m_score),
            rfm_numeric: r_score as u32 * 100 + f_score as u32 * 10 + m_score as u32,
        }
    }
}

/// Fit boundaries on `records` and score every customer with them.
pub fn score_customers(records: &[RfmRecord], levels: usize) -> Result<Vec<ScoredRecord>> {
    let boundaries = ScoreBoundaries::fit(records, levels)?;
    score_customers_with(records, &boundaries)
}

/// Score a cohort with boundaries previously fitted on that same cohort.
///
/// Frequency is scored by rank within `records`, so scoring a different
/// population against old boundaries is rejected.
pub fn score_customers_with(
    records: &[RfmRecord],
    boundaries: &ScoreBoundaries,
) -> Result<Vec<ScoredRecord>> {
    if records.len() != boundaries.population {
        return Err(SegmentationError::input(
            "records",
            format!(
                "boundaries were fitted on {} customers, got {}",
                boundaries.population,
                records.len()
            ),
        ));
    }

    let levels = boundaries.levels;
    let (_, frequency, _) = metric_columns(records);
    let frequency_ranks = first_ranks(&frequency);

    let scored: Vec<ScoredRecord> = records
        .iter()
        .zip(frequency_ranks)
        .map(|(record, f_rank)| {
            let r_bin = boundaries.recency.bin(record.recency as f64);
            let f_bin = boundaries.frequency_rank.bin(f_rank);
            let m_bin = boundaries.monetary.bin(record.monetary);

            // Smaller recency is better, so its labels run from `levels` down.
            ScoredRecord::new(
                record.clone(),
                (levels - r_bin) as u8,
                (f_bin + 1) as u8,
                (m_bin + 1) as u8,
            )
        })
        .collect();

    info!(customers = scored.len(), levels, "assigned RFM scores");
    Ok(scored)
}

fn metric_columns(records: &[RfmRecord]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let recency = records.iter().map(|r| r.recency as f64).collect();
    let frequency = records.iter().map(|r| r.frequency as f64).collect();
    let monetary = records.iter().map(|r| r.monetary).collect();
    (recency, frequency, monetary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(customer_id: i64, recency: i64, frequency: u32, monetary: f64) -> RfmRecord {
        RfmRecord {
            customer_id,
            recency,
            frequency,
            monetary,
        }
    }

    fn cohort() -> Vec<RfmRecord> {
        (1..=20)
            .map(|i| record(i, (i * 7) % 23 + 1, (i % 4) as u32 + 1, i as f64 * 13.5))
            .collect()
    }

    #[test]
    fn test_quantile_edges_and_bins() {
        let values: Vec<f64> = (1..=10).map(f64::from).collect();
        let bins = QuantileBins::fit(&values, 5, "test").unwrap();

        let expected = [1.0, 2.8, 4.6, 6.4, 8.2, 10.0];
        for (edge, want) in bins.edges().iter().zip(expected) {
            assert!((edge - want).abs() < 1e-9, "edge {} != {}", edge, want);
        }

        let assigned: Vec<usize> = values.iter().map(|&v| bins.bin(v)).collect();
        assert_eq!(assigned, vec![0, 0, 1, 1, 2, 2, 3, 3, 4, 4]);
        assert_eq!(bins.levels(), 5);
    }

    #[test]
    fn test_first_ranks_break_ties_by_position() {
        let ranks = first_ranks(&[3.0, 1.0, 3.0, 1.0, 2.0]);
        assert_eq!(ranks, vec![4.0, 1.0, 5.0, 2.0, 3.0]);
    }

    #[test]
    fn test_scores_within_range_and_composite() {
        let scored = score_customers(&cohort(), 5).unwrap();

        for s in &scored {
            for score in [s.r_score, s.f_score, s.m_score] {
                assert!((1..=5).contains(&score));
            }
            assert_eq!(
                s.rfm_numeric,
                s.r_score as u32 * 100 + s.f_score as u32 * 10 + s.m_score as u32
            );
            assert_eq!(
                s.rfm_score,
                format!("{}{}{}", s.r_score, s.f_score, s.m_score)
            );
        }
    }

    #[test]
    fn test_recency_is_inverted() {
        let records: Vec<RfmRecord> = (1..=10)
            .map(|i| record(i, i * 10, i as u32, i as f64))
            .collect();
        let scored = score_customers(&records, 5).unwrap();

        assert_eq!(scored[0].r_score, 5);
        assert_eq!(scored[9].r_score, 1);
        assert_eq!(scored[0].m_score, 1);
        assert_eq!(scored[9].m_score, 5);
    }

    #[test]
    fn test_duplicate_frequencies_still_fill_every_level() {
        let frequencies = [1, 1, 1, 1, 1, 1, 2, 2, 3, 9];
        let records: Vec<RfmRecord> = frequencies
            .iter()
            .enumerate()
            .map(|(i, &f)| record(i as i64, i as i64 + 1, f, (i + 1) as f64 * 10.0))
            .collect();
        let scored = score_customers(&records, 5).unwrap();

        let f_scores: Vec<u8> = scored.iter().map(|s| s.f_score).collect();
        assert_eq!(f_scores, vec![1, 1, 2, 2, 3, 3, 4, 4, 5, 5]);
    }

    #[test]
    fn test_low_variety_monetary_fails_binning() {
        let records: Vec<RfmRecord> = (1..=10)
            .map(|i| record(i, i, 1, if i > 8 { 50.0 } else { 10.0 }))
            .collect();

        match score_customers(&records, 5).unwrap_err() {
            SegmentationError::Binning { metric, levels, .. } => {
                assert_eq!(metric, "monetary");
                assert_eq!(levels, 5);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_single_customer_cannot_be_binned() {
        let err = score_customers(&[record(1, 3, 2, 40.0)], 5).unwrap_err();
        assert!(matches!(err, SegmentationError::Binning { .. }));
    }

    #[test]
    fn test_boundaries_reject_other_cohort() {
        let records = cohort();
        let boundaries = ScoreBoundaries::fit(&records, 5).unwrap();
        let err = score_customers_with(&records[..10], &boundaries).unwrap_err();
        assert!(matches!(err, SegmentationError::Input { .. }));
    }

    #[test]
    fn test_invalid_level_count() {
        assert!(ScoreBoundaries::fit(&cohort(), 1).is_err());
        assert!(ScoreBoundaries::fit(&cohort(), 10).is_err());
    }
}
