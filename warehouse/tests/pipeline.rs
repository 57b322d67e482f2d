use common::Error;
use common::config::{KeyMatch, KeyOrder, Settings};
use datafusion::prelude::SessionContext;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use warehouse::processor::RankedCategory;
use warehouse::storage::{SnapshotTableRegistry, Warehouse, register_star_schema};
use warehouse::utils::arrow::{collect_batch, f64_values, i64_values, string_values};
use warehouse::{query_report, run_load_pipeline, run_report};

const HEADER: &str = "Invoice ID,Branch,City,Customer type,Gender,Product line,Unit price,Quantity,Tax 5%,Sales,Date,Time,Payment,cogs,gross margin percentage,gross income,Rating";

struct Sale {
    invoice: &'static str,
    branch: &'static str,
    city: &'static str,
    customer_type: &'static str,
    gender: &'static str,
    product_line: &'static str,
    unit_price: f64,
    sales: f64,
}

const fn sale(
    invoice: &'static str,
    branch: &'static str,
    city: &'static str,
    customer_type: &'static str,
    gender: &'static str,
    product_line: &'static str,
    unit_price: f64,
    sales: f64,
) -> Sale {
    Sale {
        invoice,
        branch,
        city,
        customer_type,
        gender,
        product_line,
        unit_price,
        sales,
    }
}

/// Alex ties Sports and Food at 300, then Home at 100 and Fashion at 50; Electronic falls out.
const SALES: [Sale; 7] = [
    sale("INV-1", "Alex", "Yangon", "Member", "Female", "Sports and travel", 10.0, 300.0),
    sale("INV-2", "Alex", "Yangon", "Normal", "Male", "Food and beverages", 20.0, 200.0),
    sale("INV-3", "Alex", "Yangon", "Member", "Male", "Food and beverages", 20.0, 100.0),
    sale("INV-4", "Alex", "Yangon", "Normal", "Female", "Home and lifestyle", 5.0, 100.0),
    sale("INV-5", "Alex", "Yangon", "Member", "Female", "Fashion accessories", 3.0, 50.0),
    sale("INV-6", "Alex", "Yangon", "Member", "Female", "Electronic accessories", 1.0, 10.0),
    sale("INV-7", "Giza", "Naypyitaw", "Normal", "Female", "Sports and travel", 10.0, 200.0),
];

fn csv(sales: &[Sale]) -> String {
    let mut out = format!("{}\n", HEADER);
    for s in sales {
        let tax = s.sales / 21.0;
        out.push_str(&format!(
            "{},{},{},{},{},{},{},1,{:.4},{},1/5/2019,1:08:00 PM,Cash,{:.4},4.761904762,{:.4},7.5\n",
            s.invoice,
            s.branch,
            s.city,
            s.customer_type,
            s.gender,
            s.product_line,
            s.unit_price,
            tax,
            s.sales,
            s.sales - tax,
            tax
        ));
    }
    out
}

fn settings(dir: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.source.path = dir.path().join("sales.csv");
    settings.warehouse.path = dir.path().join("wh");
    settings.report.path = dir.path().join("out").join("report.csv");
    settings
}

fn write_source(settings: &Settings, content: &str) {
    fs::write(&settings.source.path, content).unwrap();
}

async fn snapshot_context(settings: &Settings) -> SessionContext {
    let warehouse = Warehouse::open(&settings.warehouse.path).unwrap();
    let registry = SnapshotTableRegistry::new(&warehouse).unwrap();
    let ctx = SessionContext::new();
    register_star_schema(&registry, &ctx).await.unwrap();
    ctx
}

async fn query(ctx: &SessionContext, sql: &str) -> arrow::record_batch::RecordBatch {
    collect_batch(ctx.sql(sql).await.unwrap()).await.unwrap()
}

fn snapshot_count(root: &Path) -> usize {
    fs::read_dir(root.join("snapshots")).unwrap().count()
}

fn summary(rows: &[RankedCategory]) -> Vec<(&str, &str, f64, u64)> {
    rows.iter()
        .map(|r| (r.branch.as_str(), r.product_line.as_str(), r.total_sales, r.rank))
        .collect()
}

#[tokio::test]
async fn test_load_builds_dense_unique_dimensions() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(&dir);
    write_source(&settings, &csv(&SALES));

    let summary = run_load_pipeline(&settings).await.unwrap();
    assert_eq!(summary.raw_rows, 7);
    assert_eq!(summary.fact_rows, 7);
    assert_eq!(summary.dimension_rows["branch_dim"], 2);
    assert_eq!(summary.dimension_rows["customer_dim"], 4);
    assert_eq!(summary.dimension_rows["product_dim"], 5);
    assert!(summary.join_misses.is_empty());

    let ctx = snapshot_context(&settings).await;
    for (table, key, natural) in [
        ("branch_dim", "branch_id", "branch, city"),
        ("customer_dim", "customer_id", "customer_type, gender"),
        ("product_dim", "product_id", "product_line, unit_price"),
    ] {
        let keys = query(&ctx, &format!("SELECT {key} FROM {table} ORDER BY {key}")).await;
        let keys = i64_values(&keys, key).unwrap();
        let expected: Vec<Option<i64>> = (1..=keys.len() as i64).map(Some).collect();
        assert_eq!(keys, expected, "{} keys are not dense", table);

        let distinct = query(
            &ctx,
            &format!("SELECT COUNT(*) AS n FROM (SELECT DISTINCT {natural} FROM {table}) AS d"),
        )
        .await;
        assert_eq!(
            i64_values(&distinct, "n").unwrap(),
            vec![Some(keys.len() as i64)],
            "{} has duplicate natural keys",
            table
        );
    }

    // natural ordering of the customer combinations
    let customers = query(
        &ctx,
        "SELECT customer_type, gender FROM customer_dim ORDER BY customer_id",
    )
    .await;
    assert_eq!(
        string_values(&customers, "gender").unwrap(),
        vec![
            Some("Female".to_string()),
            Some("Male".to_string()),
            Some("Female".to_string()),
            Some("Male".to_string())
        ]
    );
}

#[tokio::test]
async fn test_fact_rows_resolve_to_their_natural_keys() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(&dir);
    write_source(&settings, &csv(&SALES));
    run_load_pipeline(&settings).await.unwrap();

    let ctx = snapshot_context(&settings).await;
    let joined = query(
        &ctx,
        "SELECT f.invoice_id, b.branch, b.city, c.customer_type, c.gender, \
                p.product_line, p.unit_price, f.sales \
         FROM sales_fact f \
         LEFT JOIN branch_dim b ON b.branch_id = f.branch_id \
         LEFT JOIN customer_dim c ON c.customer_id = f.customer_id \
         LEFT JOIN product_dim p ON p.product_id = f.product_id \
         ORDER BY f.invoice_id",
    )
    .await;
    assert_eq!(joined.num_rows(), SALES.len());

    let invoices = string_values(&joined, "invoice_id").unwrap();
    let branches = string_values(&joined, "branch").unwrap();
    let cities = string_values(&joined, "city").unwrap();
    let customer_types = string_values(&joined, "customer_type").unwrap();
    let genders = string_values(&joined, "gender").unwrap();
    let lines = string_values(&joined, "product_line").unwrap();
    let prices = f64_values(&joined, "unit_price").unwrap();
    let sales = f64_values(&joined, "sales").unwrap();

    for (i, expected) in SALES.iter().enumerate() {
        assert_eq!(invoices[i].as_deref(), Some(expected.invoice));
        assert_eq!(branches[i].as_deref(), Some(expected.branch));
        assert_eq!(cities[i].as_deref(), Some(expected.city));
        assert_eq!(customer_types[i].as_deref(), Some(expected.customer_type));
        assert_eq!(genders[i].as_deref(), Some(expected.gender));
        assert_eq!(lines[i].as_deref(), Some(expected.product_line));
        assert_eq!(prices[i], Some(expected.unit_price));
        assert_eq!(sales[i], Some(expected.sales));
    }
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(&dir);
    write_source(&settings, &csv(&SALES));

    let first = run_load_pipeline(&settings).await.unwrap();
    let before = {
        let ctx = snapshot_context(&settings).await;
        query(&ctx, "SELECT * FROM sales_fact ORDER BY invoice_id").await
    };

    let second = run_load_pipeline(&settings).await.unwrap();
    let after = {
        let ctx = snapshot_context(&settings).await;
        query(&ctx, "SELECT * FROM sales_fact ORDER BY invoice_id").await
    };

    assert_ne!(first.snapshot_id, second.snapshot_id);
    assert_eq!(first.dimension_rows, second.dimension_rows);
    assert_eq!(before, after);
    assert_eq!(snapshot_count(&settings.warehouse.path), 1);
}

#[tokio::test]
async fn test_report_ranks_top_three_per_branch() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(&dir);
    write_source(&settings, &csv(&SALES));
    run_load_pipeline(&settings).await.unwrap();

    let rows = run_report(&settings).await.unwrap();
    assert_eq!(
        summary(&rows),
        vec![
            ("Alex", "Fashion accessories", 50.0, 3),
            ("Alex", "Home and lifestyle", 100.0, 2),
            ("Alex", "Food and beverages", 300.0, 1),
            ("Alex", "Sports and travel", 300.0, 1),
            ("Giza", "Sports and travel", 200.0, 1),
        ]
    );

    let content = fs::read_to_string(&settings.report.path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], "branch,product_line,total_sales");
    assert_eq!(lines.len(), rows.len() + 1);
    assert!(lines[1].starts_with("Alex,Fashion accessories,50"));
    assert!(lines[5].starts_with("Giza,Sports and travel,200"));
}

#[tokio::test]
async fn test_report_top_n_is_configurable() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(&dir);
    write_source(&settings, &csv(&SALES));
    run_load_pipeline(&settings).await.unwrap();

    settings.report.top_n = 1;
    let rows = query_report(&settings).await.unwrap();
    assert_eq!(
        summary(&rows),
        vec![
            ("Alex", "Food and beverages", 300.0, 1),
            ("Alex", "Sports and travel", 300.0, 1),
            ("Giza", "Sports and travel", 200.0, 1),
        ]
    );
}

#[tokio::test]
async fn test_empty_extract_gives_empty_tables_and_header_only_report() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(&dir);
    write_source(&settings, &format!("{}\n", HEADER));

    let summary = run_load_pipeline(&settings).await.unwrap();
    assert_eq!(summary.raw_rows, 0);
    assert_eq!(summary.fact_rows, 0);
    assert!(summary.dimension_rows.values().all(|rows| *rows == 0));

    let rows = run_report(&settings).await.unwrap();
    assert!(rows.is_empty());
    assert_eq!(
        fs::read_to_string(&settings.report.path).unwrap(),
        "branch,product_line,total_sales\n"
    );
}

#[tokio::test]
async fn test_report_before_any_load_is_schema_missing() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(&dir);

    let err = run_report(&settings).await.unwrap_err();
    assert!(matches!(err, Error::SchemaMissing(_)));
    assert!(err.is_report_query_error());
    assert!(!settings.report.path.exists());
    assert!(!settings.warehouse.path.exists());
}

#[tokio::test]
async fn test_bad_extract_leaves_previous_snapshot_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(&dir);
    write_source(&settings, &csv(&SALES));
    let loaded = run_load_pipeline(&settings).await.unwrap();

    write_source(&settings, &csv(&SALES).replace(",Rating", ""));
    let err = run_load_pipeline(&settings).await.unwrap_err();
    assert!(matches!(err, Error::InputFormat(_)));

    let warehouse = Warehouse::open(&settings.warehouse.path).unwrap();
    let manifest = warehouse.require_manifest().unwrap();
    assert_eq!(manifest.snapshot_id, loaded.snapshot_id);
    assert_eq!(manifest.table("sales_fact").unwrap().row_count, 7);
    assert_eq!(snapshot_count(&settings.warehouse.path), 1);
}

#[tokio::test]
async fn test_case_insensitive_matching_merges_branch_spellings() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(&dir);
    let rows = [
        sale("INV-1", "Alex", "Yangon", "Member", "Female", "Sports and travel", 10.0, 1.0),
        sale("INV-2", "ALEX", "yangon", "Member", "Female", "Sports and travel", 10.0, 2.0),
    ];
    write_source(&settings, &csv(&rows));

    let exact = run_load_pipeline(&settings).await.unwrap();
    assert_eq!(exact.dimension_rows["branch_dim"], 2);

    settings.modeling.key_match = KeyMatch::CaseInsensitive;
    let folded = run_load_pipeline(&settings).await.unwrap();
    assert_eq!(folded.dimension_rows["branch_dim"], 1);
    assert!(folded.join_misses.is_empty());

    let ctx = snapshot_context(&settings).await;
    let keys = query(&ctx, "SELECT branch_id FROM sales_fact ORDER BY invoice_id").await;
    assert_eq!(
        i64_values(&keys, "branch_id").unwrap(),
        vec![Some(1), Some(1)]
    );
}

#[tokio::test]
async fn test_first_appearance_key_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(&dir);
    settings.modeling.key_order = KeyOrder::FirstAppearance;
    let rows = [
        sale("INV-1", "Giza", "Naypyitaw", "Normal", "Male", "Sports and travel", 10.0, 1.0),
        sale("INV-2", "Alex", "Yangon", "Member", "Female", "Sports and travel", 10.0, 2.0),
    ];
    write_source(&settings, &csv(&rows));
    run_load_pipeline(&settings).await.unwrap();

    let ctx = snapshot_context(&settings).await;
    let branches = query(&ctx, "SELECT branch FROM branch_dim ORDER BY branch_id").await;
    assert_eq!(
        string_values(&branches, "branch").unwrap(),
        vec![Some("Giza".to_string()), Some("Alex".to_string())]
    );
}
