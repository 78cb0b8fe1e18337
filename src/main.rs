use campaign_kpi::config::PipelineConfig;
use campaign_kpi::dimensions::{Dimension, FilterSpec, Granularity};
use campaign_kpi::pipeline::CampaignPipeline;
use campaign_kpi::report::{CsvDirSink, ReportSink, XlsxSink};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "campaign-kpi")]
#[command(about = "Advertising campaign KPI aggregation and report export")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print headline KPIs for the selected rows
    Summary {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Build the multi-sheet report and write it out
    Report {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        filters: FilterArgs,

        /// Output file (xlsx) or directory (csv)
        #[arg(short, long)]
        out: PathBuf,

        #[arg(long, value_enum, default_value_t = OutputFormat::Xlsx)]
        format: OutputFormat,

        /// Period sheet granularity: day, week or month
        #[arg(long, default_value = "day")]
        granularity: Granularity,

        /// Rows dated before this day form the "before" promotion phase
        #[arg(long)]
        promotion_cutoff: Option<NaiveDate>,

        /// Skip the chart sheet
        #[arg(long)]
        no_charts: bool,
    },
}

#[derive(ClapArgs)]
struct InputArgs {
    /// Raw performance sheet exported as CSV
    #[arg(long)]
    raw: PathBuf,

    /// Campaign index sheet exported as CSV
    #[arg(long)]
    index: PathBuf,

    /// Pipeline configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(ClapArgs)]
struct FilterArgs {
    /// First day included (YYYY-MM-DD)
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Last day included (YYYY-MM-DD)
    #[arg(long)]
    end: Option<NaiveDate>,

    #[arg(long)]
    category: Vec<String>,

    #[arg(long)]
    campaign: Vec<String>,

    #[arg(long)]
    ad_group: Vec<String>,

    #[arg(long)]
    media: Vec<String>,

    #[arg(long)]
    region: Vec<String>,

    #[arg(long)]
    campaign_type: Vec<String>,

    #[arg(long)]
    product_type: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Xlsx,
    Csv,
}

fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Summary { input, filters } => run_summary(input, filters),
        Commands::Report {
            input,
            filters,
            out,
            format,
            granularity,
            promotion_cutoff,
            no_charts,
        } => run_report(input, filters, out, format, granularity, promotion_cutoff, no_charts),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.with_env_overrides().context("Invalid environment override")
}

fn filter_spec(args: FilterArgs, pipeline: &CampaignPipeline) -> Result<FilterSpec> {
    let mut filters = FilterSpec::new()
        .with_values(Dimension::Category, args.category)
        .with_values(Dimension::Campaign, args.campaign)
        .with_values(Dimension::AdGroup, args.ad_group)
        .with_values(Dimension::Media, args.media)
        .with_values(Dimension::Region, args.region)
        .with_values(Dimension::CampaignType, args.campaign_type)
        .with_values(Dimension::ProductType, args.product_type);

    if args.start.is_some() || args.end.is_some() {
        let span = pipeline.dataset()?.date_span();
        let start = args.start.or(span.map(|(s, _)| s));
        let end = args.end.or(span.map(|(_, e)| e));
        if let (Some(start), Some(end)) = (start, end) {
            filters = filters.with_date_range(start, end);
        }
    }
    Ok(filters)
}

fn load(input: &InputArgs, config: PipelineConfig) -> Result<CampaignPipeline> {
    let mut pipeline = CampaignPipeline::new(config);
    let data = pipeline
        .load_csv_files(&input.raw, &input.index)
        .with_context(|| format!("Failed to load {} / {}", input.raw.display(), input.index.display()))?;

    if !data.warnings().is_empty() {
        warn!("{} cell(s) could not be parsed; see debug log for details", data.warnings().len());
    }
    Ok(pipeline)
}

fn run_summary(input: InputArgs, filter_args: FilterArgs) -> Result<()> {
    let config = load_config(input.config.as_ref())?;
    let mut pipeline = load(&input, config)?;
    let filters = filter_spec(filter_args, &pipeline)?;

    match pipeline.summary(&filters) {
        Ok(summary) => {
            println!("\n{}", "=".repeat(60));
            println!(" {}", pipeline.config().report_title);
            println!("{}", "=".repeat(60));
            print!("{}", summary);
            Ok(())
        }
        Err(e) if e.is_empty_result() => {
            warn!("{}", e);
            println!("No rows match the selected filters.");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn run_report(
    input: InputArgs,
    filter_args: FilterArgs,
    out: PathBuf,
    format: OutputFormat,
    granularity: Granularity,
    promotion_cutoff: Option<NaiveDate>,
    no_charts: bool,
) -> Result<()> {
    let mut config = load_config(input.config.as_ref())?;
    if promotion_cutoff.is_some() {
        config.promotion_cutoff = promotion_cutoff;
    }
    if no_charts {
        config.include_charts = false;
    }

    let pipeline = load(&input, config)?;
    let filters = filter_spec(filter_args, &pipeline)?;

    let report = match pipeline.build_report(&filters, granularity) {
        Ok(report) => report,
        Err(e) if e.is_empty_result() => {
            warn!("{}", e);
            println!("No rows match the selected filters; nothing written.");
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to build report"),
    };

    let mut sink: Box<dyn ReportSink> = match format {
        OutputFormat::Xlsx => Box::new(XlsxSink::new(&out)),
        OutputFormat::Csv => Box::new(CsvDirSink::new(&out)?),
    };
    pipeline
        .export(&report, sink.as_mut())
        .with_context(|| format!("Failed to write report to {}", out.display()))?;

    info!("✅ Report written to {}", out.display());
    println!("Report written to {}", out.display());
    Ok(())
}
