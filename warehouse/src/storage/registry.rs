use super::{SnapshotManifest, Warehouse};
use crate::schema::{STAR_SCHEMA_TABLES, required_columns};
use crate::utils::paths::PathBuilder;
use async_trait::async_trait;
use common::{Error, Result};
use datafusion::datasource::file_format::options::ParquetReadOptions;
use datafusion::prelude::SessionContext;
use tracing::debug;

#[async_trait]
pub trait TableRegistry: Send + Sync {
    async fn register_table(&self, ctx: &SessionContext, table_name: &str) -> Result<()>;

    async fn deregister_table(&self, ctx: &SessionContext, table_name: &str) -> Result<()>;
}

/// Registers the parquet files of one committed snapshot.
pub struct SnapshotTableRegistry {
    paths: PathBuilder,
    manifest: SnapshotManifest,
}

impl SnapshotTableRegistry {
    /// Pins the snapshot that is current at the time of the call.
    pub fn new(warehouse: &Warehouse) -> Result<Self> {
        Ok(Self {
            paths: warehouse.paths().clone(),
            manifest: warehouse.require_manifest()?,
        })
    }

    pub fn manifest(&self) -> &SnapshotManifest {
        &self.manifest
    }
}

#[async_trait]
impl TableRegistry for SnapshotTableRegistry {
    async fn register_table(&self, ctx: &SessionContext, table_name: &str) -> Result<()> {
        let entry = self.manifest.table(table_name).ok_or_else(|| {
            Error::SchemaMissing(format!(
                "table '{}' is not in snapshot {}",
                table_name, self.manifest.snapshot_id
            ))
        })?;

        let path = self.paths.resolve(&entry.file);
        let path = path.canonicalize().map_err(|e| {
            Error::SchemaMissing(format!(
                "file for table '{}' at {} is unreadable: {}",
                table_name,
                path.display(),
                e
            ))
        })?;
        let location = path.to_str().ok_or_else(|| {
            Error::Storage(format!("non UTF-8 table path {}", path.display()))
        })?;

        self.deregister_table(ctx, table_name).await?;
        ctx.register_parquet(table_name, location, ParquetReadOptions::default())
            .await?;

        let missing: Vec<&str> = {
            let registered = ctx.table(table_name).await?;
            let schema = registered.schema().as_arrow();
            required_columns(table_name)
                .iter()
                .copied()
                .filter(|column| schema.field_with_name(column).is_err())
                .collect()
        };
        if !missing.is_empty() {
            self.deregister_table(ctx, table_name).await?;
            return Err(Error::SchemaMismatch(format!(
                "table '{}' is missing column(s): {}",
                table_name,
                missing.join(", ")
            )));
        }

        debug!(table = table_name, location, "Registered table");
        Ok(())
    }

    async fn deregister_table(&self, ctx: &SessionContext, table_name: &str) -> Result<()> {
        ctx.deregister_table(table_name)?;
        Ok(())
    }
}

/// Registers the three dimensions and the fact table.
pub async fn register_star_schema(
    registry: &dyn TableRegistry,
    ctx: &SessionContext,
) -> Result<()> {
    for table_name in STAR_SCHEMA_TABLES {
        registry.register_table(ctx, table_name).await?;
    }
    Ok(())
}
