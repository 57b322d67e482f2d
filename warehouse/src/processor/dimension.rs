use crate::schema::{BRANCH_DIM, CUSTOMER_DIM, PRODUCT_DIM};
use crate::utils::arrow::{collect_batch, conform_batch};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use common::config::{KeyMatch, KeyOrder, ModelingConfig};
use common::{Error, Result};
use datafusion::prelude::SessionContext;
use std::sync::Arc;
use tracing::{debug, info};

/// A dimension derived from the raw extract: its table, surrogate key and natural key columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimension {
    pub table: &'static str,
    pub key: &'static str,
    pub natural_key: &'static [&'static str],
}

pub const BRANCH: Dimension = Dimension {
    table: BRANCH_DIM,
    key: "branch_id",
    natural_key: &["branch", "city"],
};

pub const CUSTOMER: Dimension = Dimension {
    table: CUSTOMER_DIM,
    key: "customer_id",
    natural_key: &["customer_type", "gender"],
};

pub const PRODUCT: Dimension = Dimension {
    table: PRODUCT_DIM,
    key: "product_id",
    natural_key: &["product_line", "unit_price"],
};

pub const DIMENSIONS: [Dimension; 3] = [BRANCH, CUSTOMER, PRODUCT];

impl Dimension {
    /// `(key BIGINT NOT NULL, natural key columns...)` with types taken from the source table.
    pub fn schema(&self, source: &Schema) -> Result<SchemaRef> {
        let mut fields = vec![Field::new(self.key, DataType::Int64, false)];
        for column in self.natural_key {
            let field = source.field_with_name(column).map_err(|_| {
                Error::SchemaMismatch(format!(
                    "source table has no column '{}' for {}",
                    column, self.table
                ))
            })?;
            fields.push(Field::new(*column, field.data_type().clone(), false));
        }
        Ok(Arc::new(Schema::new(fields)))
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// The expression natural-key values are compared on, for both deduplication and joins.
/// Only text columns are folded.
pub fn match_expr(column_ref: &str, data_type: &DataType, key_match: KeyMatch) -> String {
    let is_text = matches!(
        data_type,
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View
    );
    match key_match {
        KeyMatch::CaseInsensitive if is_text => format!("lower({})", column_ref),
        _ => column_ref.to_string(),
    }
}

/// Builds the deduplicating query for `dimension`.
///
/// Distinct natural keys are grouped on their match form; the displayed value is the smallest
/// spelling in each group, and the surrogate key is `ROW_NUMBER()` over the configured order.
pub fn dimension_sql(
    dimension: &Dimension,
    source_table: &str,
    source: &Schema,
    options: &ModelingConfig,
) -> Result<String> {
    let mut match_cols = Vec::new();
    let mut value_cols = Vec::new();
    let mut group_by = Vec::new();
    let mut outer = Vec::new();
    let mut natural_order = Vec::new();

    for (i, column) in dimension.natural_key.iter().enumerate() {
        let field = source.field_with_name(column).map_err(|_| {
            Error::SchemaMismatch(format!(
                "source table has no column '{}' for {}",
                column, dimension.table
            ))
        })?;
        let matched = match_expr(&quote_ident(column), field.data_type(), options.key_match);

        match_cols.push(format!("{} AS \"__nk{}\"", matched, i));
        value_cols.push(format!("MIN({}) AS \"__v{}\"", quote_ident(column), i));
        group_by.push(matched);
        outer.push(format!("\"__v{}\" AS {}", i, quote_ident(column)));
        natural_order.push(format!("\"__nk{}\"", i));
    }

    let order = match options.key_order {
        KeyOrder::Natural => natural_order.join(", "),
        KeyOrder::FirstAppearance => "\"__first_row\"".to_string(),
    };
    let key = quote_ident(dimension.key);

    Ok(format!(
        "SELECT CAST(ROW_NUMBER() OVER (ORDER BY {order}) AS BIGINT) AS {key}, {outer} \
         FROM (\
             SELECT {match_cols}, {value_cols}, MIN(\"source_row\") AS \"__first_row\" \
             FROM {source} \
             GROUP BY {group_by}\
         ) AS distinct_keys \
         ORDER BY {key}",
        order = order,
        key = key,
        outer = outer.join(", "),
        match_cols = match_cols.join(", "),
        value_cols = value_cols.join(", "),
        source = quote_ident(source_table),
        group_by = group_by.join(", "),
    ))
}

pub struct DimensionExtractor<'a> {
    ctx: &'a SessionContext,
    options: ModelingConfig,
}

impl<'a> DimensionExtractor<'a> {
    pub fn new(ctx: &'a SessionContext, options: ModelingConfig) -> Self {
        Self { ctx, options }
    }

    /// Projects, deduplicates and numbers the natural keys of `dimension` from `source_table`.
    pub async fn extract(
        &self,
        dimension: &Dimension,
        source_table: &str,
        source: &Schema,
    ) -> Result<RecordBatch> {
        let sql = dimension_sql(dimension, source_table, source, &self.options)?;
        debug!(table = dimension.table, %sql, "Extracting dimension");

        let df = self.ctx.sql(&sql).await?;
        let batch = collect_batch(df).await?;
        let batch = conform_batch(&batch, dimension.schema(source)?)?;

        info!(
            table = dimension.table,
            rows = batch.num_rows(),
            "Dimension extracted"
        );
        Ok(batch)
    }
}
