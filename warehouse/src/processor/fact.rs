use super::dimension::{Dimension, match_expr, quote_ident};
use crate::schema::get_sales_fact_schema;
use crate::utils::arrow::{collect_batch, column, conform_batch};
use arrow::array::Array;
use arrow::record_batch::RecordBatch;
use common::config::{JoinMissPolicy, ModelingConfig};
use common::{Error, Result};
use datafusion::prelude::SessionContext;
use tracing::{debug, info, warn};

/// Fact columns taken straight from the source row, in output order around the foreign keys.
const LEADING_COLUMNS: [&str; 1] = ["invoice_id"];
const MEASURE_COLUMNS: [&str; 9] = [
    "quantity",
    "cogs",
    "tax_amount",
    "sales",
    "gross_income",
    "gross_margin_percentage",
    "invoice_datetime",
    "payment_mode",
    "rating",
];

/// Number of fact rows whose foreign key into a dimension is null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinMiss {
    pub dimension: &'static str,
    pub rows: usize,
}

pub fn fact_sql(
    source_table: &str,
    source: &arrow::datatypes::Schema,
    dimensions: &[Dimension],
    options: &ModelingConfig,
) -> Result<String> {
    let mut select: Vec<String> = LEADING_COLUMNS
        .iter()
        .map(|c| format!("r.{}", quote_ident(c)))
        .collect();
    let mut joins = Vec::new();

    for (i, dimension) in dimensions.iter().enumerate() {
        let alias = format!("d{}", i);
        select.push(format!("{}.{}", alias, quote_ident(dimension.key)));

        let mut conditions = Vec::new();
        for column in dimension.natural_key {
            let data_type = source
                .field_with_name(column)
                .map_err(|_| {
                    Error::SchemaMismatch(format!(
                        "source table has no column '{}' for {}",
                        column, dimension.table
                    ))
                })?
                .data_type();
            let left = match_expr(
                &format!("r.{}", quote_ident(column)),
                data_type,
                options.key_match,
            );
            let right = match_expr(
                &format!("{}.{}", alias, quote_ident(column)),
                data_type,
                options.key_match,
            );
            conditions.push(format!("{} = {}", left, right));
        }

        joins.push(format!(
            "LEFT JOIN {} AS {} ON {}",
            quote_ident(dimension.table),
            alias,
            conditions.join(" AND ")
        ));
    }

    select.extend(MEASURE_COLUMNS.iter().map(|c| format!("r.{}", quote_ident(c))));

    Ok(format!(
        "SELECT {} FROM {} AS r {} ORDER BY r.\"source_row\"",
        select.join(", "),
        quote_ident(source_table),
        joins.join(" ")
    ))
}

pub struct FactBuilder<'a> {
    ctx: &'a SessionContext,
    options: ModelingConfig,
}

impl<'a> FactBuilder<'a> {
    pub fn new(ctx: &'a SessionContext, options: ModelingConfig) -> Self {
        Self { ctx, options }
    }

    /// Left-joins every dimension (already registered under its table name) onto the source rows.
    pub async fn build(
        &self,
        source_table: &str,
        source: &arrow::datatypes::Schema,
        dimensions: &[Dimension],
    ) -> Result<RecordBatch> {
        let sql = fact_sql(source_table, source, dimensions, &self.options)?;
        debug!(%sql, "Building sales fact");

        let df = self.ctx.sql(&sql).await?;
        let batch = collect_batch(df).await?;
        let facts = conform_batch(&batch, get_sales_fact_schema())?;

        info!(rows = facts.num_rows(), "Sales fact built");
        Ok(facts)
    }
}

/// Counts null foreign keys per dimension; dimensions without misses are left out.
pub fn join_misses(facts: &RecordBatch, dimensions: &[Dimension]) -> Result<Vec<JoinMiss>> {
    let mut misses = Vec::new();
    for dimension in dimensions {
        let rows = column(facts, dimension.key)?.null_count();
        if rows > 0 {
            misses.push(JoinMiss {
                dimension: dimension.table,
                rows,
            });
        }
    }
    Ok(misses)
}

/// Under `Fail` the first miss aborts the load; under `Null` each miss is logged and kept.
pub fn apply_join_miss_policy(misses: &[JoinMiss], policy: JoinMissPolicy) -> Result<()> {
    for miss in misses {
        if policy == JoinMissPolicy::Fail {
            return Err(Error::JoinMiss {
                dimension: miss.dimension.to_string(),
                rows: miss.rows,
            });
        }
        warn!(
            dimension = miss.dimension,
            rows = miss.rows,
            "Fact rows left with a null foreign key"
        );
    }
    Ok(())
}
