//! RFM aggregation
//!
//! Collapses cleaned transactions into one Recency/Frequency/Monetary record per
//! customer, measured against a [`ReferenceDate`].

use std::collections::{BTreeMap, HashSet};

use chrono::{Duration, NaiveDateTime};
use tracing::info;

use crate::data::Transaction;
use crate::error::{Result, SegmentationError};

/// Point in time recency is measured from.
///
/// Defaults to one day after the latest transaction, so recency is relative to
/// the dataset's own horizon and every customer gets at least one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceDate(NaiveDateTime);

impl ReferenceDate {
    pub fn resolve(transactions: &[Transaction], explicit: Option<NaiveDateTime>) -> Result<Self> {
        let latest = transactions
            .iter()
            .map(|t| t.timestamp)
            .max()
            .ok_or_else(|| SegmentationError::input("transactions", "no transactions to aggregate"))?;

        match explicit {
            Some(date) if date < latest => Err(SegmentationError::input(
                "reference_date",
                format!("{} precedes the latest transaction at {}", date, latest),
            )),
            Some(date) => Ok(Self(date)),
            None => Ok(Self(latest + Duration::days(1))),
        }
    }

    pub fn as_datetime(&self) -> NaiveDateTime {
        self.0
    }
}

/// Per-customer RFM metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct RfmRecord {
    pub customer_id: i64,
    /// Whole days between the reference date and the last purchase
    pub recency: i64,
    /// Distinct invoices
    pub frequency: u32,
    /// Sum of line totals
    pub monetary: f64,
}

impl RfmRecord {
    /// `[recency, frequency, monetary]` as floats, in feature order.
    pub fn as_features(&self) -> [f64; 3] {
        [self.recency as f64, self.frequency as f64, self.monetary]
    }
}

#[derive(Default)]
struct CustomerAccumulator<'a> {
    last_purchase: Option<NaiveDateTime>,
    invoices: HashSet<&'a str>,
    monetary: f64,
}

/// Compute RFM metrics, defaulting the reference date to max timestamp + 1 day.
pub fn calculate_rfm(
    transactions: &[Transaction],
    reference_date: Option<NaiveDateTime>,
) -> Result<Vec<RfmRecord>> {
    let reference = ReferenceDate::resolve(transactions, reference_date)?;
    calculate_rfm_at(transactions, reference)
}

/// Compute RFM metrics against an already resolved reference date.
///
/// Records come back ordered by customer id.
pub fn calculate_rfm_at(
    transactions: &[Transaction],
    reference: ReferenceDate,
) -> Result<Vec<RfmRecord>> {
    let mut customers: BTreeMap<i64, CustomerAccumulator<'_>> = BTreeMap::new();

    for transaction in transactions {
        if transaction.invoice_id.is_empty() {
            return Err(SegmentationError::input(
                "invoice_id",
                format!("empty invoice id for customer {}", transaction.customer_id),
            ));
        }
        if !transaction.line_total.is_finite() {
            return Err(SegmentationError::input(
                "line_total",
                format!("non-finite line total on invoice {}", transaction.invoice_id),
            ));
        }

        let acc = customers.entry(transaction.customer_id).or_default();
        acc.last_purchase = acc.last_purchase.max(Some(transaction.timestamp));
        acc.invoices.insert(transaction.invoice_id.as_str());
        acc.monetary += transaction.line_total;
    }

    let reference = reference.as_datetime();
    let mut records = Vec::with_capacity(customers.len());
    for (customer_id, acc) in customers {
        let last_purchase = acc.last_purchase.ok_or_else(|| {
            SegmentationError::input("timestamp", format!("customer {} has no purchases", customer_id))
        })?;
        let recency = (reference - last_purchase).num_days();
        if recency < 0 {
            return Err(SegmentationError::input(
                "reference_date",
                format!("customer {} purchased after the reference date", customer_id),
            ));
        }

        records.push(RfmRecord {
            customer_id,
            recency,
            frequency: acc.invoices.len() as u32,
            monetary: acc.monetary,
        });
    }

    info!(customers = records.len(), reference = %reference, "computed RFM metrics");
    Ok(records)
}
