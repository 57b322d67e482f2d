//! Source loader: reads the flat sales extract into the canonical `raw_sales` batch.

use crate::schema::get_raw_sales_schema;
use arrow::array::{
    Array, AsArray, Float64Array, Int64Array, StringArray, TimestampMillisecondArray,
};
use arrow::csv::ReaderBuilder;
use arrow::csv::reader::Format;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDateTime;
use common::config::DEFAULT_DATETIME_FORMAT;
use common::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Canonical names of the columns the extract must provide.
pub const REQUIRED_COLUMNS: [&str; 17] = [
    "invoice_id",
    "branch",
    "city",
    "customer_type",
    "gender",
    "product_line",
    "unit_price",
    "quantity",
    "tax_amount",
    "sales",
    "date",
    "time",
    "payment_mode",
    "cogs",
    "gross_margin_percentage",
    "gross_income",
    "rating",
];

const BATCH_SIZE: usize = 8192;

/// Lowercases a header, turns whitespace into `_` and applies the two domain renames.
pub fn canonical_column_name(header: &str) -> String {
    let name: String = header
        .trim_start_matches('\u{feff}')
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();

    match name.as_str() {
        "tax_5%" => "tax_amount".to_string(),
        "payment" => "payment_mode".to_string(),
        _ => name,
    }
}

pub struct SourceLoader {
    datetime_format: String,
}

impl Default for SourceLoader {
    fn default() -> Self {
        Self::new(DEFAULT_DATETIME_FORMAT)
    }
}

impl SourceLoader {
    pub fn new(datetime_format: &str) -> Self {
        Self {
            datetime_format: datetime_format.to_string(),
        }
    }

    pub fn load(&self, path: &Path) -> Result<RecordBatch> {
        info!(path = %path.display(), "Loading sales extract");
        let file = File::open(path).map_err(|e| {
            Error::InputFormat(format!("cannot open {}: {}", path.display(), e))
        })?;
        self.load_from_reader(file)
    }

    pub fn load_from_reader<R: Read + Seek>(&self, mut reader: R) -> Result<RecordBatch> {
        let headers = read_header(&mut reader)?;
        let canonical = validate_header(&headers)?;
        reader.seek(SeekFrom::Start(0))?;

        let text_schema = Schema::new(
            canonical
                .iter()
                .map(|name| Field::new(name, DataType::Utf8, true))
                .collect::<Vec<_>>(),
        );

        let csv_reader = ReaderBuilder::new(Arc::new(text_schema))
            .with_header(true)
            .with_batch_size(BATCH_SIZE)
            .build(reader)?;

        let mut builder = RawSalesBuilder::default();
        for batch in csv_reader {
            let batch = batch.map_err(|e| {
                Error::InputFormat(format!(
                    "malformed CSV after record {}: {}",
                    builder.len(),
                    e
                ))
            })?;
            self.append_batch(&mut builder, &batch)?;
        }

        let raw = builder.finish()?;
        info!(rows = raw.num_rows(), "Sales extract loaded");
        Ok(raw)
    }

    fn append_batch(&self, builder: &mut RawSalesBuilder, batch: &RecordBatch) -> Result<()> {
        let fields = BatchFields::new(batch)?;

        for row in 0..batch.num_rows() {
            let record = builder.len();
            let at = Location { row, record };

            let date = fields.text("date", at)?;
            let time = fields.text("time", at)?;
            let invoice_datetime = self.parse_datetime(&date, &time, record)?;

            builder.source_row.push(record as i64);
            builder.invoice_id.push(fields.text("invoice_id", at)?);
            builder.branch.push(fields.text("branch", at)?);
            builder.city.push(fields.text("city", at)?);
            builder.customer_type.push(fields.text("customer_type", at)?);
            builder.gender.push(fields.text("gender", at)?);
            builder.product_line.push(fields.text("product_line", at)?);
            builder.unit_price.push(fields.number("unit_price", at)?);
            builder.quantity.push(fields.integer("quantity", at)?);
            builder.tax_amount.push(fields.number("tax_amount", at)?);
            builder.sales.push(fields.number("sales", at)?);
            builder.cogs.push(fields.number("cogs", at)?);
            builder
                .gross_margin_percentage
                .push(fields.number("gross_margin_percentage", at)?);
            builder.gross_income.push(fields.number("gross_income", at)?);
            builder.payment_mode.push(fields.text("payment_mode", at)?);
            builder.rating.push(fields.number("rating", at)?);
            builder.invoice_datetime.push(invoice_datetime);
        }

        debug!(rows = batch.num_rows(), total = builder.len(), "Parsed CSV batch");
        Ok(())
    }

    fn parse_datetime(&self, date: &str, time: &str, record: usize) -> Result<i64> {
        let combined = format!("{} {}", date, time);
        NaiveDateTime::parse_from_str(&combined, &self.datetime_format)
            .map(|datetime| datetime.and_utc().timestamp_millis())
            .map_err(|e| {
                Error::InputFormat(format!(
                    "record {}: cannot parse invoice datetime '{}' with '{}': {}",
                    record + 1,
                    combined,
                    self.datetime_format,
                    e
                ))
            })
    }
}

fn read_header<R: Read>(reader: &mut R) -> Result<Vec<String>> {
    let (schema, _) = Format::default()
        .with_header(true)
        .infer_schema(reader, Some(0))
        .map_err(|e| Error::InputFormat(format!("cannot read CSV header: {}", e)))?;

    Ok(schema.fields().iter().map(|f| f.name().clone()).collect())
}

/// Canonicalizes the header and checks it against [`REQUIRED_COLUMNS`].
fn validate_header(headers: &[String]) -> Result<Vec<String>> {
    let canonical: Vec<String> = headers.iter().map(|h| canonical_column_name(h)).collect();

    let mut seen = HashSet::new();
    for name in &canonical {
        if !seen.insert(name.as_str()) {
            return Err(Error::InputFormat(format!(
                "header maps more than one column to '{}'",
                name
            )));
        }
    }

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|required| !seen.contains(required))
        .collect();
    if !missing.is_empty() {
        return Err(Error::InputFormat(format!(
            "header is missing column(s): {}",
            missing.join(", ")
        )));
    }

    let extra: Vec<&str> = canonical
        .iter()
        .map(String::as_str)
        .filter(|name| !REQUIRED_COLUMNS.contains(name))
        .collect();
    if !extra.is_empty() {
        warn!(columns = ?extra, "Ignoring unexpected source columns");
    }

    Ok(canonical)
}

#[derive(Clone, Copy)]
struct Location {
    row: usize,
    record: usize,
}

struct BatchFields<'a> {
    columns: HashMap<&'static str, &'a StringArray>,
}

impl<'a> BatchFields<'a> {
    fn new(batch: &'a RecordBatch) -> Result<Self> {
        let mut columns = HashMap::new();
        for name in REQUIRED_COLUMNS {
            let array = batch.column_by_name(name).ok_or_else(|| {
                Error::InputFormat(format!("column '{}' missing from CSV batch", name))
            })?;
            columns.insert(name, array.as_string::<i32>());
        }
        Ok(Self { columns })
    }

    fn raw(&self, column: &'static str, at: Location) -> Result<&'a str> {
        let array = self.columns[column];
        let value = if array.is_null(at.row) {
            ""
        } else {
            array.value(at.row).trim()
        };

        if value.is_empty() {
            return Err(Error::InputFormat(format!(
                "record {}: column '{}' is empty",
                at.record + 1,
                column
            )));
        }
        Ok(value)
    }

    fn text(&self, column: &'static str, at: Location) -> Result<String> {
        self.raw(column, at).map(str::to_string)
    }

    fn number(&self, column: &'static str, at: Location) -> Result<f64> {
        let value = self.raw(column, at)?;
        // NaN would never compare equal as a join key
        match value.parse::<f64>() {
            Ok(parsed) if parsed.is_finite() => Ok(parsed),
            _ => Err(Error::InputFormat(format!(
                "record {}: column '{}' is not a number: '{}'",
                at.record + 1,
                column,
                value
            ))),
        }
    }

    fn integer(&self, column: &'static str, at: Location) -> Result<i64> {
        let value = self.raw(column, at)?;
        if let Ok(parsed) = value.parse::<i64>() {
            return Ok(parsed);
        }
        match value.parse::<f64>() {
            // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive
            Ok(parsed)
                if parsed.fract() == 0.0
                    && parsed >= i64::MIN as f64
                    && parsed < i64::MAX as f64 =>
            {
                Ok(parsed as i64)
            }
            _ => Err(Error::InputFormat(format!(
                "record {}: column '{}' is not an integer: '{}'",
                at.record + 1,
                column,
                value
            ))),
        }
    }
}

#[derive(Default)]
struct RawSalesBuilder {
    source_row: Vec<i64>,
    invoice_id: Vec<String>,
    branch: Vec<String>,
    city: Vec<String>,
    customer_type: Vec<String>,
    gender: Vec<String>,
    product_line: Vec<String>,
    unit_price: Vec<f64>,
    quantity: Vec<i64>,
    tax_amount: Vec<f64>,
    sales: Vec<f64>,
    cogs: Vec<f64>,
    gross_margin_percentage: Vec<f64>,
    gross_income: Vec<f64>,
    payment_mode: Vec<String>,
    rating: Vec<f64>,
    invoice_datetime: Vec<i64>,
}

impl RawSalesBuilder {
    fn len(&self) -> usize {
        self.source_row.len()
    }

    // Column order follows raw_sales_schema()
    fn finish(self) -> Result<RecordBatch> {
        let batch = RecordBatch::try_new(
            get_raw_sales_schema(),
            vec![
                Arc::new(Int64Array::from(self.source_row)),
                Arc::new(StringArray::from(self.invoice_id)),
                Arc::new(StringArray::from(self.branch)),
                Arc::new(StringArray::from(self.city)),
                Arc::new(StringArray::from(self.customer_type)),
                Arc::new(StringArray::from(self.gender)),
                Arc::new(StringArray::from(self.product_line)),
                Arc::new(Float64Array::from(self.unit_price)),
                Arc::new(Int64Array::from(self.quantity)),
                Arc::new(Float64Array::from(self.tax_amount)),
                Arc::new(Float64Array::from(self.sales)),
                Arc::new(Float64Array::from(self.cogs)),
                Arc::new(Float64Array::from(self.gross_margin_percentage)),
                Arc::new(Float64Array::from(self.gross_income)),
                Arc::new(StringArray::from(self.payment_mode)),
                Arc::new(Float64Array::from(self.rating)),
                Arc::new(TimestampMillisecondArray::from(self.invoice_datetime)),
            ],
        )?;
        Ok(batch)
    }
}
