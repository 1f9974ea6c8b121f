//! Rule-based business segments over RFM scores
//!
//! Rules overlap and are not exhaustive. They are evaluated top to bottom and
//! the first match wins, so the order of [`SEGMENT_RULES`] decides the outcome
//! for ambiguous score triples. Thresholds are written for 5-level scores.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use crate::scoring::ScoredRecord;

/// Score scale the rule thresholds are written against.
pub const RULE_SCORE_LEVELS: usize = 5;

/// Named customer segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Segment {
    #[serde(rename = "Champions")]
    Champions,
    #[serde(rename = "Loyal Customers")]
    LoyalCustomers,
    #[serde(rename = "Potential Loyalists")]
    PotentialLoyalists,
    #[serde(rename = "New Customers")]
    NewCustomers,
    #[serde(rename = "Promising")]
    Promising,
    #[serde(rename = "Needs Attention")]
    NeedsAttention,
    #[serde(rename = "About to Sleep")]
    AboutToSleep,
    #[serde(rename = "At Risk")]
    AtRisk,
    #[serde(rename = "Can't Lose Them")]
    CantLoseThem,
    #[serde(rename = "Hibernating")]
    Hibernating,
    #[serde(rename = "Lost")]
    Lost,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl Segment {
    pub fn label(&self) -> &'static str {
        match self {
            Segment::Champions => "Champions",
            Segment::LoyalCustomers => "Loyal Customers",
            Segment::PotentialLoyalists => "Potential Loyalists",
            Segment::NewCustomers => "New Customers",
            Segment::Promising => "Promising",
            Segment::NeedsAttention => "Needs Attention",
            Segment::AboutToSleep => "About to Sleep",
            Segment::AtRisk => "At Risk",
            Segment::CantLoseThem => "Can't Lose Them",
            Segment::Hibernating => "Hibernating",
            Segment::Lost => "Lost",
            Segment::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One `(predicate, label)` entry of the ordered rule table.
pub struct SegmentRule {
    pub segment: Segment,
    pub matches: fn(u8, u8, u8) -> bool,
}

/// Segment rules in priority order; `Unknown` when none matches.
pub const SEGMENT_RULES: [SegmentRule; 11] = [
    SegmentRule {
        segment: Segment::Champions,
        matches: |r, f, m| r >= 4 && f >= 4 && m >= 4,
    },
    SegmentRule {
        segment: Segment::LoyalCustomers,
        matches: |r, f, m| r >= 3 && f >= 3 && m >= 3,
    },
    SegmentRule {
        segment: Segment::PotentialLoyalists,
        matches: |r, f, m| r >= 3 && f >= 1 && m >= 2,
    },
    SegmentRule {
        segment: Segment::NewCustomers,
        matches: |r, f, _| r >= 4 && f <= 2,
    },
    SegmentRule {
        segment: Segment::Promising,
        matches: |r, f, m| r >= 3 && f <= 2 && m <= 2,
    },
    SegmentRule {
        segment: Segment::NeedsAttention,
        matches: |r, f, m| (2..4).contains(&r) && (2..4).contains(&f) && (2..4).contains(&m),
    },
    SegmentRule {
        segment: Segment::AboutToSleep,
        matches: |r, f, _| (2..4).contains(&r) && f < 2,
    },
    SegmentRule {
        segment: Segment::AtRisk,
        matches: |r, f, m| r < 3 && f >= 3 && m >= 3,
    },
    SegmentRule {
        segment: Segment::CantLoseThem,
        matches: |r, f, m| r < 2 && f >= 4 && m >= 4,
    },
    SegmentRule {
        segment: Segment::Hibernating,
        matches: |r, f, _| r < 2 && (2..4).contains(&f),
    },
    SegmentRule {
        segment: Segment::Lost,
        matches: |r, f, _| r < 2 && f < 2,
    },
];

/// Classify a 5-level score triple.
pub fn classify(r_score: u8, f_score: u8, m_score: u8) -> Segment {
    SEGMENT_RULES
        .iter()
        .find(|rule| (rule.matches)(r_score, f_score, m_score))
        .map(|rule| rule.segment)
        .unwrap_or(Segment::Unknown)
}

/// Map a score on a `levels` scale onto the 5-level rule scale as `ceil(5 * s / levels)`.
pub fn rescale_score(score: u8, levels: usize) -> u8 {
    let scaled = (RULE_SCORE_LEVELS * score as usize).div_ceil(levels);
    scaled.clamp(1, RULE_SCORE_LEVELS) as u8
}

/// Scored record with its segment label.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentedRecord {
    pub scored: ScoredRecord,
    pub segment: Segment,
}

/// Attach a segment to every scored customer.
///
/// `levels` is the scale the scores were assigned on; other scales than 5 are
/// rescaled before the rules are applied.
pub fn segment_customers(scored: &[ScoredRecord], levels: usize) -> Vec<SegmentedRecord> {
    if levels != RULE_SCORE_LEVELS {
        warn!(
            levels,
            "segment rules are defined on 5-level scores; rescaling proportionally"
        );
    }

    let segmented: Vec<SegmentedRecord> = scored
        .iter()
        .map(|record| {
            let (r, f, m) = if levels == RULE_SCORE_LEVELS {
                (record.r_score, record.f_score, record.m_score)
            } else {
                (
                    rescale_score(record.r_score, levels),
                    rescale_score(record.f_score, levels),
                    rescale_score(record.m_score, levels),
                )
            };
            SegmentedRecord {
                scored: record.clone(),
                segment: classify(r, f, m),
            }
        })
        .collect();

    info!(customers = segmented.len(), "segmented customers");
    segmented
}

/// Per-segment size and mean raw metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSummary {
    pub segment: Segment,
    pub customers: usize,
    pub mean_recency: f64,
    pub mean_frequency: f64,
    pub mean_monetary: f64,
}

/// Summaries for every segment present, largest first.
pub fn segment_summary(records: &[SegmentedRecord]) -> Vec<SegmentSummary> {
    let mut sums: BTreeMap<Segment, (usize, [f64; 3])> = BTreeMap::new();
    for record in records {
        let entry = sums.entry(record.segment).or_insert((0, [0.0; 3]));
        entry.0 += 1;
        for (acc, value) in entry.1.iter_mut().zip(record.scored.rfm.as_features()) {
            *acc += value;
        }
    }

    let mut summary: Vec<SegmentSummary> = sums
        .into_iter()
        .map(|(segment, (customers, totals))| {
            let n = customers as f64;
            SegmentSummary {
                segment,
                customers,
                mean_recency: totals[0] / n,
                mean_frequency: totals[1] / n,
                mean_monetary: totals[2] / n,
            }
        })
        .collect();
    summary.sort_by(|a, b| b.customers.cmp(&a.customers).then(a.segment.cmp(&b.segment)));
    summary
}
