use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use grapher::explorer::Explorer;
use grapher::fetch::DataSource;
use grapher::params::{RawViewState, constrain};
use grapher::table::CoreTable;
use grapher::{stats, storage, viz};

#[derive(Parser, Debug)]
#[command(
    name = "grapher",
    version,
    about = "Chart, canonicalize & summarize tabular statistical data"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a chart from a CSV dataset and a view query string.
    Chart(ChartArgs),
    /// Canonicalize a view query string (parse, repair, re-encode).
    Params(ParamsArgs),
    /// Print per-entity summary statistics for a column.
    Summary(SummaryArgs),
}

#[derive(Args, Debug)]
struct ChartArgs {
    /// CSV dataset: a file path, or an http(s) URL.
    #[arg(short, long)]
    csv: String,
    /// View state as a URL query string (e.g. "casesMetric=true&interval=daily").
    #[arg(short, long, default_value = "")]
    query: String,
    /// Entities to chart, comma-separated (e.g. "Germany,United States").
    #[arg(short, long)]
    entities: String,
    /// Output path (.svg or .png).
    #[arg(short, long)]
    out: PathBuf,
    /// Chart title. Defaults to the metric label.
    #[arg(long)]
    title: Option<String>,
    #[arg(long, default_value_t = 1000)]
    width: u32,
    #[arg(long, default_value_t = 600)]
    height: u32,
    /// Locale for tick labels (en, de, fr, ...).
    #[arg(long, default_value = "en")]
    locale: String,
    /// Also save the built series as tidy CSV.
    #[arg(long)]
    series_out: Option<PathBuf>,
    /// Also save the chart variable as JSON.
    #[arg(long)]
    variable_out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ParamsArgs {
    /// The query string to canonicalize.
    query: String,
}

#[derive(Args, Debug)]
struct SummaryArgs {
    /// CSV dataset: a file path, or an http(s) URL.
    #[arg(short, long)]
    csv: String,
    /// Column slug to summarize (e.g. "new_cases").
    #[arg(short = 'l', long)]
    column: String,
    /// Print JSON instead of text.
    #[arg(long, default_value_t = false)]
    json: bool,
    /// Save summaries as JSON to this path.
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Chart(args) => cmd_chart(args),
        Command::Params(args) => cmd_params(args),
        Command::Summary(args) => cmd_summary(args),
    }
}

fn load_table(spec: &str) -> Result<CoreTable> {
    if spec.starts_with("http://") || spec.starts_with("https://") {
        DataSource::new().fetch_table(spec)
    } else {
        let file =
            std::fs::File::open(spec).with_context(|| format!("open CSV file `{spec}`"))?;
        CoreTable::from_csv_reader(file).with_context(|| format!("parse CSV file `{spec}`"))
    }
}

fn parse_list(s: &str) -> Vec<String> {
    s.split([',', ';'])
        .map(|x| x.trim().to_string())
        .filter(|x| !x.is_empty())
        .collect()
}

fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(x) if x.is_finite() => {
            let s = format!("{:.4}", x);
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        }
        _ => "NA".to_string(),
    }
}

fn cmd_chart(args: ChartArgs) -> Result<()> {
    let table = load_table(&args.csv)?;
    let explorer = Explorer::new(table);
    explorer.batch(|| {
        explorer.set_query(&args.query);
        explorer.select(parse_list(&args.entities));
    });

    let state = explorer.state();
    let series = explorer.series();
    let title = args
        .title
        .clone()
        .unwrap_or_else(|| state.metric.label().to_string());
    viz::render_chart(
        &series,
        state.chart,
        &args.out,
        args.width,
        args.height,
        &args.locale,
        &title,
        state.aligned,
    )?;
    eprintln!(
        "Wrote {} series to {}",
        series.len(),
        args.out.display()
    );

    if let Some(path) = args.series_out.as_ref() {
        storage::save_series_csv(&series, path)?;
        eprintln!("Saved series to {}", path.display());
    }
    if let Some(path) = args.variable_out.as_ref() {
        let variable = explorer.chart_variable();
        let variable = variable.as_ref().as_ref().map_err(|e| e.clone())?;
        storage::save_variable_json(variable, path)?;
        eprintln!("Saved variable to {}", path.display());
    }
    Ok(())
}

fn cmd_params(args: ParamsArgs) -> Result<()> {
    let canonical = constrain(&RawViewState::parse(&args.query)).to_query_string();
    println!("{canonical}");
    Ok(())
}

fn cmd_summary(args: SummaryArgs) -> Result<()> {
    let table = load_table(&args.csv)?;
    let summaries = stats::entity_summary(&table, &args.column);

    if let Some(path) = args.out.as_ref() {
        storage::save_summaries_json(&summaries, path)?;
        eprintln!("Saved {} summaries to {}", summaries.len(), path.display());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        for s in &summaries {
            println!(
                "{} / {}  count={} missing={}  min={} max={} mean={} median={}",
                s.entity,
                s.column,
                s.count,
                s.missing,
                fmt_opt(s.min),
                fmt_opt(s.max),
                fmt_opt(s.mean),
                fmt_opt(s.median)
            );
        }
    }
    Ok(())
}
