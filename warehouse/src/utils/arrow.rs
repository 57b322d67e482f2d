use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::{DataType, Float64Type, Int64Type, SchemaRef};
use arrow::record_batch::RecordBatch;
use common::{Error, Result};
use datafusion::dataframe::DataFrame;
use std::sync::Arc;

/// Executes `df` and concatenates its output into a single batch.
pub async fn collect_batch(df: DataFrame) -> Result<RecordBatch> {
    let logical_schema: SchemaRef = Arc::new(df.schema().as_arrow().clone());
    let batches = df.collect().await?;

    let schema = batches
        .first()
        .map(|batch| batch.schema())
        .unwrap_or(logical_schema);

    Ok(concat_batches(&schema, &batches)?)
}

/// Re-shapes `batch` to `schema`: columns are picked by name and cast where the type differs.
pub fn conform_batch(batch: &RecordBatch, schema: SchemaRef) -> Result<RecordBatch> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());

    for field in schema.fields() {
        let column = column(batch, field.name())?;
        let column = if column.data_type() == field.data_type() {
            column.clone()
        } else {
            cast(column, field.data_type())?
        };
        columns.push(column);
    }

    Ok(RecordBatch::try_new(schema, columns)?)
}

pub fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch.column_by_name(name).ok_or_else(|| {
        Error::SchemaMismatch(format!("Column '{}' not found in batch", name))
    })
}

/// Reads a text column, accepting Utf8, LargeUtf8 and Utf8View.
pub fn string_values(batch: &RecordBatch, name: &str) -> Result<Vec<Option<String>>> {
    let utf8 = cast(column(batch, name)?, &DataType::Utf8)?;
    Ok(utf8
        .as_string::<i32>()
        .iter()
        .map(|value| value.map(str::to_string))
        .collect())
}

pub fn i64_values(batch: &RecordBatch, name: &str) -> Result<Vec<Option<i64>>> {
    let ints = cast(column(batch, name)?, &DataType::Int64)?;
    Ok(ints.as_primitive::<Int64Type>().iter().collect())
}

pub fn f64_values(batch: &RecordBatch, name: &str) -> Result<Vec<Option<f64>>> {
    let floats = cast(column(batch, name)?, &DataType::Float64)?;
    Ok(floats.as_primitive::<Float64Type>().iter().collect())
}
