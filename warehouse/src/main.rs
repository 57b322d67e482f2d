use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command, value_parser};
use common::config::Settings;
use common::telemetry::init_tracing;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, info};

const DEFAULT_CONFIG: &str = "config/warehouse.toml";

fn source_arg() -> Arg {
    Arg::new("source")
        .long("source")
        .value_name("FILE")
        .value_parser(value_parser!(PathBuf))
        .help("Sales extract CSV to load")
}

fn warehouse_arg() -> Arg {
    Arg::new("warehouse")
        .long("warehouse")
        .value_name("DIR")
        .value_parser(value_parser!(PathBuf))
        .help("Warehouse directory")
}

fn output_arg() -> Arg {
    Arg::new("output")
        .short('o')
        .long("output")
        .value_name("FILE")
        .value_parser(value_parser!(PathBuf))
        .help("Report CSV to write")
}

fn top_arg() -> Arg {
    Arg::new("top")
        .long("top")
        .value_name("N")
        .value_parser(value_parser!(usize))
        .help("Keep product lines with dense rank <= N")
}

fn cli() -> Command {
    Command::new("warehouse-cli")
        .version("0.1.0")
        .about("Loads the supermarket sales extract into a star schema and ranks product lines")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .default_value(DEFAULT_CONFIG)
                .help("Sets a custom config file"),
        )
        .subcommand(
            Command::new("load")
                .about("Replace the warehouse tables from the sales extract")
                .arg(source_arg())
                .arg(warehouse_arg()),
        )
        .subcommand(
            Command::new("report")
                .about("Write the top product lines per branch from the warehouse")
                .arg(warehouse_arg())
                .arg(output_arg())
                .arg(top_arg()),
        )
        .subcommand(
            Command::new("run")
                .about("Load, then report")
                .arg(source_arg())
                .arg(warehouse_arg())
                .arg(output_arg())
                .arg(top_arg()),
        )
}

/// Command-line values win over the config file and environment.
fn apply_overrides(settings: &mut Settings, matches: &ArgMatches) {
    // not every subcommand defines every override
    let path = |id: &str| matches.try_get_one::<PathBuf>(id).ok().flatten().cloned();

    if let Some(source) = path("source") {
        settings.source.path = source;
    }
    if let Some(warehouse) = path("warehouse") {
        settings.warehouse.path = warehouse;
    }
    if let Some(output) = path("output") {
        settings.report.path = output;
    }
    if let Some(top) = matches.try_get_one::<usize>("top").ok().flatten() {
        settings.report.top_n = *top;
    }
}

async fn load(settings: &Settings) -> Result<()> {
    let summary = warehouse::run_load_pipeline(settings)
        .await
        .with_context(|| format!("load of {} failed", settings.source.path.display()))?;
    info!(
        snapshot_id = %summary.snapshot_id,
        raw_rows = summary.raw_rows,
        fact_rows = summary.fact_rows,
        dimensions = ?summary.dimension_rows,
        join_misses = ?summary.join_misses,
        "Warehouse loaded"
    );
    Ok(())
}

/// Context for a failed report; a missing or incomplete snapshot points at `load`.
fn report_failure(error: &common::Error, warehouse: &Path) -> String {
    if error.is_report_query_error() {
        format!(
            "warehouse {} has no usable snapshot, run `load` first",
            warehouse.display()
        )
    } else {
        format!("report from {} failed", warehouse.display())
    }
}

async fn report(settings: &Settings) -> Result<()> {
    let rows = match warehouse::run_report(settings).await {
        Ok(rows) => rows,
        Err(e) => {
            let context = report_failure(&e, &settings.warehouse.path);
            return Err(anyhow::Error::new(e).context(context));
        }
    };
    info!(
        rows = rows.len(),
        path = %settings.report.path.display(),
        "Report ready"
    );
    Ok(())
}

async fn execute(command: &str, settings: &Settings) -> Result<()> {
    match command {
        "load" => load(settings).await,
        "report" => report(settings).await,
        "run" => {
            load(settings).await?;
            report(settings).await
        }
        other => anyhow::bail!("unknown subcommand '{}'", other),
    }
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG);

    // logging is configured by the settings, so this error goes to stderr directly
    let mut settings = match Settings::new(config_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Cannot load configuration from {}: {}", config_path, e);
            process::exit(1);
        }
    };

    let Some((command, sub_matches)) = matches.subcommand() else {
        eprintln!("No subcommand specified. Use --help for usage information.");
        process::exit(1);
    };
    apply_overrides(&mut settings, sub_matches);
    init_tracing(&settings.logging);
    info!(command, config = config_path, "Starting");

    if let Err(e) = execute(command, &settings).await {
        error!("Warehouse command failed: {:#}", e);
        process::exit(1);
    }
}
