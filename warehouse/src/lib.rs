pub mod processor;
pub mod schema;
pub mod storage;
pub mod utils;

use common::Result;
use common::config::Settings;
use datafusion::prelude::SessionContext;
use processor::report::{RankedCategory, RankingReporter, write_csv};
use processor::{SourceLoader, StarSchemaProcessor};
use schema::SALES_FACT;
use std::collections::BTreeMap;
use storage::{SnapshotTableRegistry, Warehouse, register_star_schema};
use tracing::info;

/// What one load wrote.
#[derive(Debug, Clone)]
pub struct LoadSummary {
    pub snapshot_id: String,
    pub raw_rows: usize,
    pub dimension_rows: BTreeMap<String, usize>,
    pub fact_rows: usize,
    /// Fact rows left with a null foreign key, per dimension table.
    pub join_misses: BTreeMap<String, usize>,
}

/// Reads the extract, derives the star schema and replaces the persisted tables.
pub async fn run_load_pipeline(settings: &Settings) -> Result<LoadSummary> {
    let raw = SourceLoader::new(&settings.source.datetime_format).load(&settings.source.path)?;
    let raw_rows = raw.num_rows();

    let star = StarSchemaProcessor::new(settings.modeling).build(raw).await?;

    let warehouse = Warehouse::open(&settings.warehouse.path)?;
    let mut load = warehouse.begin_load()?;
    for dimension in &star.dimensions {
        load.replace_table(dimension.dimension.table, &dimension.batch)?;
    }
    load.replace_table(SALES_FACT, &star.facts)?;
    let manifest = load.commit()?;

    let summary = LoadSummary {
        snapshot_id: manifest.snapshot_id,
        raw_rows,
        dimension_rows: star
            .dimensions
            .iter()
            .map(|d| (d.dimension.table.to_string(), d.batch.num_rows()))
            .collect(),
        fact_rows: star.facts.num_rows(),
        join_misses: star
            .join_misses
            .iter()
            .map(|m| (m.dimension.to_string(), m.rows))
            .collect(),
    };
    info!(summary = ?summary, "Load complete");
    Ok(summary)
}

/// Ranks product lines per branch from the committed snapshot.
pub async fn query_report(settings: &Settings) -> Result<Vec<RankedCategory>> {
    let warehouse = Warehouse::open_read_only(&settings.warehouse.path);
    let registry = SnapshotTableRegistry::new(&warehouse)?;
    info!(snapshot_id = %registry.manifest().snapshot_id, "Reading snapshot");

    let ctx = SessionContext::new();
    register_star_schema(&registry, &ctx).await?;

    RankingReporter::new(settings.report.top_n)?.run(&ctx).await
}

/// Runs [`query_report`] and writes the result to the configured CSV.
pub async fn run_report(settings: &Settings) -> Result<Vec<RankedCategory>> {
    let rows = query_report(settings).await?;
    write_csv(&rows, &settings.report.path)?;
    Ok(rows)
}
