//! Transaction ingestion and cleaning
//!
//! Reads raw e-commerce invoice lines, drops rows that cannot take part in RFM
//! analysis, and produces immutable [`Transaction`] records with a computed line
//! total.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::ByteRecord;
use tracing::info;

use crate::error::{Result, SegmentationError};

const COL_INVOICE: &str = "InvoiceNo";
const COL_QUANTITY: &str = "Quantity";
const COL_DATE: &str = "InvoiceDate";
const COL_PRICE: &str = "UnitPrice";
const COL_CUSTOMER: &str = "CustomerID";
const COL_DESCRIPTION: &str = "Description";

/// Accepted timestamp layouts, tried in order after RFC 3339.
const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

/// One cleaned invoice line.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub customer_id: i64,
    pub invoice_id: String,
    pub timestamp: NaiveDateTime,
    pub quantity: i64,
    pub unit_price: f64,
    /// `quantity * unit_price`
    pub line_total: f64,
}

impl Transaction {
    pub fn new(
        customer_id: i64,
        invoice_id: impl Into<String>,
        timestamp: NaiveDateTime,
        quantity: i64,
        unit_price: f64,
    ) -> Self {
        Self {
            customer_id,
            invoice_id: invoice_id.into(),
            timestamp,
            quantity,
            unit_price,
            line_total: quantity as f64 * unit_price,
        }
    }
}

/// Row counts produced while cleaning a transaction file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleaningReport {
    pub rows_read: usize,
    /// Rows without a customer id or description
    pub missing_fields: usize,
    pub duplicates: usize,
    /// Cancellations and returns
    pub non_positive_quantity: usize,
    pub non_positive_price: usize,
    pub rows_kept: usize,
}

impl CleaningReport {
    pub fn rows_dropped(&self) -> usize {
        self.rows_read - self.rows_kept
    }
}

/// Header positions of the columns the cleaner reads.
struct ColumnIndex {
    invoice: usize,
    quantity: usize,
    date: usize,
    price: usize,
    customer: usize,
    description: Option<usize>,
}

impl ColumnIndex {
    fn from_headers(headers: &ByteRecord) -> Result<Self> {
        let headers: Vec<String> = headers.iter().map(decode_field).collect();
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        let require = |name: &str| {
            find(name).ok_or_else(|| SegmentationError::input(name, "required column is missing"))
        };

        Ok(Self {
            invoice: require(COL_INVOICE)?,
            quantity: require(COL_QUANTITY)?,
            date: require(COL_DATE)?,
            price: require(COL_PRICE)?,
            customer: require(COL_CUSTOMER)?,
            description: find(COL_DESCRIPTION),
        })
    }
}

/// Load and clean transactions from any CSV reader.
pub fn load_transactions<R: Read>(reader: R) -> Result<(Vec<Transaction>, CleaningReport)> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns = ColumnIndex::from_headers(csv_reader.byte_headers()?)?;
    let mut report = CleaningReport::default();
    let mut seen: HashSet<Vec<String>> = HashSet::new();
    let mut transactions = Vec::new();

    for result in csv_reader.byte_records() {
        let record = result?;
        report.rows_read += 1;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let fields: Vec<String> = record.iter().map(decode_field).collect();
        let field = |idx: usize| fields.get(idx).map(String::as_str).unwrap_or("");

        let customer_raw = field(columns.customer);
        let description_missing = columns
            .description
            .map(|idx| field(idx).is_empty())
            .unwrap_or(false);
        if customer_raw.is_empty() || description_missing {
            report.missing_fields += 1;
            continue;
        }

        if !seen.insert(fields.clone()) {
            report.duplicates += 1;
            continue;
        }

        let customer_id = parse_customer_id(customer_raw)
            .ok_or_else(|| invalid(COL_CUSTOMER, line, customer_raw))?;
        let quantity_raw = field(columns.quantity);
        let quantity: i64 = quantity_raw
            .parse()
            .map_err(|_| invalid(COL_QUANTITY, line, quantity_raw))?;
        let price_raw = field(columns.price);
        let unit_price: f64 = price_raw
            .parse()
            .map_err(|_| invalid(COL_PRICE, line, price_raw))?;
        let date_raw = field(columns.date);
        let timestamp = parse_timestamp(date_raw).ok_or_else(|| invalid(COL_DATE, line, date_raw))?;

        if quantity <= 0 {
            report.non_positive_quantity += 1;
            continue;
        }
        if unit_price <= 0.0 {
            report.non_positive_price += 1;
            continue;
        }

        let invoice_id = field(columns.invoice);
        if invoice_id.is_empty() {
            return Err(invalid(COL_INVOICE, line, invoice_id));
        }

        transactions.push(Transaction::new(
            customer_id,
            invoice_id,
            timestamp,
            quantity,
            unit_price,
        ));
    }

    report.rows_kept = transactions.len();
    info!(
        rows_read = report.rows_read,
        rows_kept = report.rows_kept,
        "cleaned transaction data"
    );

    Ok((transactions, report))
}

/// Load and clean transactions from a CSV file on disk.
pub fn load_transactions_file(path: impl AsRef<Path>) -> Result<(Vec<Transaction>, CleaningReport)> {
    let file = File::open(path.as_ref())?;
    load_transactions(file)
}

/// Parse an invoice timestamp in any of the accepted layouts.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

// Retail exports are often ISO-8859-1; fields that are not valid UTF-8 are
// decoded byte-per-char as Latin-1.
fn decode_field(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

// Exports sometimes write integer ids as floats ("17850.0").
fn parse_customer_id(raw: &str) -> Option<i64> {
    if let Ok(id) = raw.parse::<i64>() {
        return Some(id);
    }
    let value: f64 = raw.parse().ok()?;
    (value.is_finite() && value.fract() == 0.0).then_some(value as i64)
}

fn invalid(field: &str, line: u64, value: &str) -> SegmentationError {
    SegmentationError::input(field, format!("cannot parse '{}' on line {}", value, line))
}
