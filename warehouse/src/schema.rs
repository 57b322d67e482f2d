use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use lazy_static::lazy_static;
use std::sync::Arc;

pub const RAW_SALES: &str = "raw_sales";
pub const BRANCH_DIM: &str = "branch_dim";
pub const CUSTOMER_DIM: &str = "customer_dim";
pub const PRODUCT_DIM: &str = "product_dim";
pub const SALES_FACT: &str = "sales_fact";

/// Tables a committed snapshot must contain before it can be reported on.
pub const STAR_SCHEMA_TABLES: [&str; 4] = [BRANCH_DIM, CUSTOMER_DIM, PRODUCT_DIM, SALES_FACT];

fn datetime_type() -> DataType {
    DataType::Timestamp(TimeUnit::Millisecond, None)
}

// In-memory source table, after header canonicalization
pub fn raw_sales_schema() -> Schema {
    Schema::new(vec![
        Field::new("source_row", DataType::Int64, false),
        Field::new("invoice_id", DataType::Utf8, false),
        Field::new("branch", DataType::Utf8, false),
        Field::new("city", DataType::Utf8, false),
        Field::new("customer_type", DataType::Utf8, false),
        Field::new("gender", DataType::Utf8, false),
        Field::new("product_line", DataType::Utf8, false),
        Field::new("unit_price", DataType::Float64, false),
        Field::new("quantity", DataType::Int64, false),
        Field::new("tax_amount", DataType::Float64, false),
        Field::new("sales", DataType::Float64, false),
        Field::new("cogs", DataType::Float64, false),
        Field::new("gross_margin_percentage", DataType::Float64, false),
        Field::new("gross_income", DataType::Float64, false),
        Field::new("payment_mode", DataType::Utf8, false),
        Field::new("rating", DataType::Float64, false),
        Field::new("invoice_datetime", datetime_type(), false),
    ])
}

pub fn sales_fact_schema() -> Schema {
    Schema::new(vec![
        Field::new("invoice_id", DataType::Utf8, false),
        Field::new("branch_id", DataType::Int64, true),
        Field::new("customer_id", DataType::Int64, true),
        Field::new("product_id", DataType::Int64, true),
        Field::new("quantity", DataType::Int64, false),
        Field::new("cogs", DataType::Float64, false),
        Field::new("tax_amount", DataType::Float64, false),
        Field::new("sales", DataType::Float64, false),
        Field::new("gross_income", DataType::Float64, false),
        Field::new("gross_margin_percentage", DataType::Float64, false),
        Field::new("invoice_datetime", datetime_type(), false),
        Field::new("payment_mode", DataType::Utf8, false),
        Field::new("rating", DataType::Float64, false),
    ])
}

pub fn report_schema() -> Schema {
    Schema::new(vec![
        Field::new("branch", DataType::Utf8, false),
        Field::new("product_line", DataType::Utf8, false),
        Field::new("total_sales", DataType::Float64, false),
    ])
}

/// Columns each persisted table must expose for the ranking query.
pub fn required_columns(table_name: &str) -> &'static [&'static str] {
    match table_name {
        BRANCH_DIM => &["branch_id", "branch", "city"],
        CUSTOMER_DIM => &["customer_id", "customer_type", "gender"],
        PRODUCT_DIM => &["product_id", "product_line", "unit_price"],
        SALES_FACT => &[
            "invoice_id",
            "branch_id",
            "customer_id",
            "product_id",
            "quantity",
            "cogs",
            "tax_amount",
            "sales",
            "gross_income",
            "gross_margin_percentage",
            "invoice_datetime",
            "payment_mode",
            "rating",
        ],
        _ => &[],
    }
}

pub fn get_raw_sales_schema() -> SchemaRef {
    RAW_SALES_SCHEMA.clone()
}

pub fn get_sales_fact_schema() -> SchemaRef {
    SALES_FACT_SCHEMA.clone()
}

pub fn get_report_schema() -> SchemaRef {
    REPORT_SCHEMA.clone()
}

// Lazy-loaded static schemas
lazy_static! {
    static ref RAW_SALES_SCHEMA: SchemaRef = Arc::new(raw_sales_schema());
    static ref SALES_FACT_SCHEMA: SchemaRef = Arc::new(sales_fact_schema());
    static ref REPORT_SCHEMA: SchemaRef = Arc::new(report_schema());
}
