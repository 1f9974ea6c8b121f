//! Flat CSV checkpoints
//!
//! Each checkpoint is one header row followed by one row per record. Column
//! names follow the retail dataset vocabulary (`CustomerID`, `Recency`, ...).

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::data::Transaction;
use crate::error::Result;
use crate::model::{ClusterDiagnostic, ClusteredRecord};
use crate::rfm::RfmRecord;
use crate::segment::{Segment, SegmentedRecord};

#[derive(Debug, Serialize)]
pub struct TransactionRow<'a> {
    #[serde(rename = "InvoiceNo")]
    invoice_no: &'a str,
    #[serde(rename = "InvoiceDate")]
    invoice_date: String,
    #[serde(rename = "Quantity")]
    quantity: i64,
    #[serde(rename = "UnitPrice")]
    unit_price: f64,
    #[serde(rename = "CustomerID")]
    customer_id: i64,
    #[serde(rename = "TotalPrice")]
    total_price: f64,
}

impl<'a> From<&'a Transaction> for TransactionRow<'a> {
    fn from(t: &'a Transaction) -> Self {
        Self {
            invoice_no: &t.invoice_id,
            invoice_date: t.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            quantity: t.quantity,
            unit_price: t.unit_price,
            customer_id: t.customer_id,
            total_price: t.line_total,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RfmRow {
    #[serde(rename = "CustomerID")]
    customer_id: i64,
    #[serde(rename = "Recency")]
    recency: i64,
    #[serde(rename = "Frequency")]
    frequency: u32,
    #[serde(rename = "Monetary")]
    monetary: f64,
}

impl From<&RfmRecord> for RfmRow {
    fn from(r: &RfmRecord) -> Self {
        Self {
            customer_id: r.customer_id,
            recency: r.recency,
            frequency: r.frequency,
            monetary: r.monetary,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SegmentRow<'a> {
    #[serde(rename = "CustomerID")]
    customer_id: i64,
    #[serde(rename = "Recency")]
    recency: i64,
    #[serde(rename = "Frequency")]
    frequency: u32,
    #[serde(rename = "Monetary")]
    monetary: f64,
    #[serde(rename = "R_Score")]
    r_score: u8,
    #[serde(rename = "F_Score")]
    f_score: u8,
    #[serde(rename = "M_Score")]
    m_score: u8,
    #[serde(rename = "RFM_Score")]
    rfm_score: &'a str,
    #[serde(rename = "RFM_Numeric")]
    rfm_numeric: u32,
    #[serde(rename = "Segment")]
    segment: Segment,
}

impl<'a> From<&'a SegmentedRecord> for SegmentRow<'a> {
    fn from(s: &'a SegmentedRecord) -> Self {
        let scored = &s.scored;
        Self {
            customer_id: scored.rfm.customer_id,
            recency: scored.rfm.recency,
            frequency: scored.rfm.frequency,
            monetary: scored.rfm.monetary,
            r_score: scored.r_score,
            f_score: scored.f_score,
            m_score: scored.m_score,
            rfm_score: &scored.rfm_score,
            rfm_numeric: scored.rfm_numeric,
            segment: s.segment,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClusterRow {
    #[serde(rename = "CustomerID")]
    customer_id: i64,
    #[serde(rename = "Recency")]
    recency: i64,
    #[serde(rename = "Frequency")]
    frequency: u32,
    #[serde(rename = "Monetary")]
    monetary: f64,
    #[serde(rename = "Cluster")]
    cluster: usize,
    #[serde(rename = "Scaled_Recency")]
    scaled_recency: f64,
    #[serde(rename = "Scaled_Frequency")]
    scaled_frequency: f64,
    #[serde(rename = "Scaled_Monetary")]
    scaled_monetary: f64,
}

impl From<&ClusteredRecord> for ClusterRow {
    fn from(c: &ClusteredRecord) -> Self {
        Self {
            customer_id: c.rfm.customer_id,
            recency: c.rfm.recency,
            frequency: c.rfm.frequency,
            monetary: c.rfm.monetary,
            cluster: c.cluster,
            scaled_recency: c.scaled[0],
            scaled_frequency: c.scaled[1],
            scaled_monetary: c.scaled[2],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DiagnosticRow {
    #[serde(rename = "Clusters")]
    k: usize,
    #[serde(rename = "Inertia")]
    inertia: f64,
    #[serde(rename = "Silhouette")]
    silhouette: f64,
}

impl From<&ClusterDiagnostic> for DiagnosticRow {
    fn from(d: &ClusterDiagnostic) -> Self {
        Self {
            k: d.k,
            inertia: d.inertia,
            silhouette: d.silhouette,
        }
    }
}

/// Serialize rows with a header to any writer.
pub fn write_rows<W, T, I>(writer: W, rows: I) -> Result<()>
where
    W: Write,
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in rows {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Serialize rows with a header to a new file at `path`.
pub fn write_rows_to_file<T, I>(path: impl AsRef<Path>, rows: I) -> Result<()>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let file = File::create(path.as_ref())?;
    write_rows(file, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::ScoredRecord;

    fn rfm() -> RfmRecord {
        RfmRecord {
            customer_id: 17850,
            recency: 3,
            frequency: 2,
            monetary: 45.5,
        }
    }

    fn to_string<T: Serialize>(rows: Vec<T>) -> String {
        let mut buffer = Vec::new();
        write_rows(&mut buffer, rows).unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_rfm_rows_have_header() {
        let record = rfm();
        let text = to_string(vec![RfmRow::from(&record)]);
        assert_eq!(text, "CustomerID,Recency,Frequency,Monetary\n17850,3,2,45.5\n");
    }

    #[test]
    fn test_segment_row_uses_display_labels() {
        let record = SegmentedRecord {
            scored: ScoredRecord {
                rfm: rfm(),
                r_score: 5,
                f_score: 1,
                m_score: 2,
                rfm_score: "512".to_string(),
                rfm_numeric: 512,
            },
            segment: Segment::PotentialLoyalists,
        };
        let text = to_string(vec![SegmentRow::from(&record)]);
        let mut lines = text.lines();

        assert_eq!(
            lines.next(),
            Some("CustomerID,Recency,Frequency,Monetary,R_Score,F_Score,M_Score,RFM_Score,RFM_Numeric,Segment")
        );
        assert_eq!(lines.next(), Some("17850,3,2,45.5,5,1,2,512,512,Potential Loyalists"));
    }

    #[test]
    fn test_cluster_rows() {
        let record = ClusteredRecord {
            rfm: rfm(),
            scaled: [-1.0, 0.5, 0.0],
            cluster: 3,
        };
        let text = to_string(vec![ClusterRow::from(&record)]);
        assert!(text.starts_with(
            "CustomerID,Recency,Frequency,Monetary,Cluster,Scaled_Recency,Scaled_Frequency,Scaled_Monetary\n"
        ));
        assert!(text.contains("17850,3,2,45.5,3,-1.0,0.5,0.0"));
    }
}
