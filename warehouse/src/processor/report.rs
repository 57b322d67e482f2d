use crate::schema::{BRANCH_DIM, PRODUCT_DIM, SALES_FACT, get_report_schema};
use crate::utils::arrow::{collect_batch, f64_values, i64_values, string_values};
use arrow::array::{Float64Array, StringArray};
use arrow::csv::WriterBuilder;
use arrow::record_batch::RecordBatch;
use common::{Error, Result};
use datafusion::prelude::SessionContext;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// One ranked product line of a branch.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCategory {
    pub branch: String,
    pub product_line: String,
    pub total_sales: f64,
    pub rank: u64,
}

pub struct RankingReporter {
    top_n: usize,
}

impl RankingReporter {
    pub fn new(top_n: usize) -> Result<Self> {
        if top_n == 0 {
            return Err(Error::InvalidInput("top_n must be at least 1".into()));
        }
        Ok(Self { top_n })
    }

    /// Totals are rounded before ranking, so values equal to the cent tie.
    /// Output is ordered by branch, then rank descending, then product line.
    pub fn query(&self) -> String {
        format!(
            "WITH totals AS (\
                 SELECT b.branch AS branch, p.product_line AS product_line, \
                        ROUND(SUM(s.sales), 2) AS total_sales \
                 FROM {fact} s \
                 JOIN {branch} b ON b.branch_id = s.branch_id \
                 JOIN {product} p ON p.product_id = s.product_id \
                 GROUP BY b.branch, p.product_line\
             ), ranked AS (\
                 SELECT branch, product_line, total_sales, \
                        DENSE_RANK() OVER (PARTITION BY branch ORDER BY total_sales DESC) AS sales_rank \
                 FROM totals\
             ) \
             SELECT branch, product_line, total_sales, sales_rank \
             FROM ranked \
             WHERE sales_rank <= {top_n} \
             ORDER BY branch ASC, sales_rank DESC, product_line ASC",
            fact = SALES_FACT,
            branch = BRANCH_DIM,
            product = PRODUCT_DIM,
            top_n = self.top_n,
        )
    }

    /// Runs the ranking against star-schema tables already registered in `ctx`.
    pub async fn run(&self, ctx: &SessionContext) -> Result<Vec<RankedCategory>> {
        let sql = self.query();
        debug!(%sql, "Running ranking query");

        let df = ctx.sql(&sql).await?;
        let batch = collect_batch(df).await?;

        let branches = string_values(&batch, "branch")?;
        let product_lines = string_values(&batch, "product_line")?;
        let totals = f64_values(&batch, "total_sales")?;
        let ranks = i64_values(&batch, "sales_rank")?;

        let mut rows = Vec::with_capacity(batch.num_rows());
        for (((branch, product_line), total_sales), rank) in
            branches.into_iter().zip(product_lines).zip(totals).zip(ranks)
        {
            let (Some(branch), Some(product_line), Some(total_sales), Some(rank)) =
                (branch, product_line, total_sales, rank)
            else {
                return Err(Error::SchemaMismatch(
                    "ranking query returned a null value".into(),
                ));
            };
            rows.push(RankedCategory {
                branch,
                product_line,
                total_sales,
                rank: rank as u64,
            });
        }

        info!(rows = rows.len(), top_n = self.top_n, "Ranking computed");
        Ok(rows)
    }
}

/// `branch, product_line, total_sales` batch in report order.
pub fn report_batch(rows: &[RankedCategory]) -> Result<RecordBatch> {
    let batch = RecordBatch::try_new(
        get_report_schema(),
        vec![
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.branch.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.product_line.as_str()),
            )),
            Arc::new(Float64Array::from_iter_values(
                rows.iter().map(|r| r.total_sales),
            )),
        ],
    )?;
    Ok(batch)
}

/// Writes the report CSV through a temporary file so readers never see a partial report.
pub fn write_csv(rows: &[RankedCategory], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| Error::InvalidInput(format!("{} is not a file path", path.display())))?;
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    let batch = report_batch(rows)?;
    {
        let file = File::create(&temp_path)?;
        let mut writer = WriterBuilder::new().with_header(true).build(file);
        writer.write(&batch)?;
    }
    fs::rename(&temp_path, path)?;

    info!(path = %path.display(), rows = rows.len(), "Report written");
    Ok(())
}
