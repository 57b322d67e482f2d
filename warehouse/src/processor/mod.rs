pub mod dimension;
pub mod fact;
pub mod report;
pub mod source;

pub use dimension::{DIMENSIONS, Dimension, DimensionExtractor};
pub use fact::{FactBuilder, JoinMiss, apply_join_miss_policy};
pub use report::{RankedCategory, RankingReporter};
pub use source::SourceLoader;

use crate::schema::RAW_SALES;
use arrow::record_batch::RecordBatch;
use common::config::ModelingConfig;
use common::{Error, Result};
use datafusion::execution::context::SessionContext;
use tracing::info;

/// One dimension table as derived for the current run.
#[derive(Debug, Clone)]
pub struct DimensionTable {
    pub dimension: Dimension,
    pub batch: RecordBatch,
}

/// The full set of tables derived from one extract.
#[derive(Debug, Clone)]
pub struct StarSchema {
    pub dimensions: Vec<DimensionTable>,
    pub facts: RecordBatch,
    pub join_misses: Vec<JoinMiss>,
}

impl StarSchema {
    pub fn dimension(&self, table: &str) -> Option<&RecordBatch> {
        self.dimensions
            .iter()
            .find(|d| d.dimension.table == table)
            .map(|d| &d.batch)
    }
}

/// Turns the raw extract into dimension and fact tables.
pub struct StarSchemaProcessor {
    ctx: SessionContext,
    options: ModelingConfig,
}

impl StarSchemaProcessor {
    pub fn new(options: ModelingConfig) -> Self {
        Self {
            ctx: SessionContext::new(),
            options,
        }
    }

    pub fn session_context(&self) -> &SessionContext {
        &self.ctx
    }

    pub async fn build(&self, raw: RecordBatch) -> Result<StarSchema> {
        let source_schema = raw.schema();
        let raw_rows = raw.num_rows();
        self.register_batch(RAW_SALES, raw)?;

        let extractor = DimensionExtractor::new(&self.ctx, self.options);
        let mut dimensions = Vec::with_capacity(DIMENSIONS.len());
        for dimension in DIMENSIONS {
            let batch = extractor
                .extract(&dimension, RAW_SALES, &source_schema)
                .await?;
            self.register_batch(dimension.table, batch.clone())?;
            dimensions.push(DimensionTable { dimension, batch });
        }

        let facts = FactBuilder::new(&self.ctx, self.options)
            .build(RAW_SALES, &source_schema, &DIMENSIONS)
            .await?;

        if facts.num_rows() != raw_rows {
            return Err(Error::SchemaMismatch(format!(
                "fact table has {} rows but the extract has {}",
                facts.num_rows(),
                raw_rows
            )));
        }

        let join_misses = fact::join_misses(&facts, &DIMENSIONS)?;
        fact::apply_join_miss_policy(&join_misses, self.options.join_miss)?;

        info!(
            raw_rows,
            fact_rows = facts.num_rows(),
            "Star schema derived"
        );

        Ok(StarSchema {
            dimensions,
            facts,
            join_misses,
        })
    }

    // Replaces any table left over from a previous build on this context
    fn register_batch(&self, table_name: &str, batch: RecordBatch) -> Result<()> {
        self.ctx.deregister_table(table_name)?;
        self.ctx.register_batch(table_name, batch)?;
        Ok(())
    }
}
