use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

mod analytics;
mod calendar;
mod dashboard;
mod db;
mod models;
mod report;
mod source;

use calendar::Locale;
use dashboard::{DashboardCache, DashboardParams};
use models::Stage;
use source::{RecordSnapshot, RecordSource};

#[derive(Parser)]
#[command(name = "application-tracker")]
#[command(about = "Job application tracker analytics", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// Read applications from a JSON file instead of Postgres
    #[arg(long)]
    input: Option<PathBuf>,
}

#[derive(Args)]
struct ViewArgs {
    /// Number of months in the rolling timeline
    #[arg(long, default_value_t = analytics::DEFAULT_TIMELINE_MONTHS)]
    months: u32,
    /// Month-name locale for timeline labels (en, fr, de, es)
    #[arg(long, env = "TRACKER_LOCALE", default_value = "en")]
    locale: Locale,
    /// Funnel stages in pipeline order
    #[arg(long, value_delimiter = ',', default_value = "applied,interview,test,offer")]
    stages: Vec<Stage>,
    /// Reference date for the timeline (defaults to today, UTC)
    #[arg(long)]
    as_of: Option<NaiveDate>,
}

impl ViewArgs {
    fn params(&self) -> DashboardParams {
        DashboardParams {
            months: self.months,
            locale: self.locale,
            stages: self.stages.clone(),
        }
    }

    fn as_of(&self) -> NaiveDate {
        self.as_of.unwrap_or_else(|| Utc::now().date_naive())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed applications
    Seed,
    /// Import applications from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print the dashboard summary
    Summary {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        view: ViewArgs,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        view: ViewArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Export the dashboard as JSON
    Export {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        view: ViewArgs,
        #[arg(long, default_value = "dashboard.json")]
        out: PathBuf,
    },
    /// Reprint the summary whenever the stored applications change
    Watch {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        view: ViewArgs,
        #[arg(long, default_value_t = 5)]
        interval_secs: u64,
    },
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance (or pass --input)")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn open_source(args: SourceArgs) -> anyhow::Result<RecordSource> {
    match args.input {
        Some(path) => Ok(RecordSource::File(path)),
        None => Ok(RecordSource::Postgres(connect().await?)),
    }
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match cli.command {
        Commands::InitDb => {
            db::init_db(&connect().await?).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&connect().await?).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&connect().await?, &csv).await?;
            println!("Inserted {inserted} applications from {}.", csv.display());
        }
        Commands::Summary { source, view } => {
            let snapshot = RecordSnapshot::load(open_source(source).await?).await?;
            let dashboard = dashboard::build_dashboard(snapshot.records(), &view.params(), view.as_of());
            print!("{}", report::render_summary(&dashboard));
        }
        Commands::Report { source, view, out } => {
            let snapshot = RecordSnapshot::load(open_source(source).await?).await?;
            let as_of = view.as_of();
            let dashboard = dashboard::build_dashboard(snapshot.records(), &view.params(), as_of);
            let report = report::build_report(&dashboard, snapshot.records(), as_of);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { source, view, out } => {
            let snapshot = RecordSnapshot::load(open_source(source).await?).await?;
            let dashboard = dashboard::build_dashboard(snapshot.records(), &view.params(), view.as_of());
            let json = serde_json::to_string_pretty(&dashboard)?;
            std::fs::write(&out, json)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Dashboard written to {}.", out.display());
        }
        Commands::Watch {
            source,
            view,
            interval_secs,
        } => {
            let mut snapshot = RecordSnapshot::new(open_source(source).await?);
            let mut cache = DashboardCache::new();
            let params = view.params();
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = tokio::signal::ctrl_c() => break,
                }

                if let Err(error) = snapshot.refresh().await {
                    tracing::warn!(%error, "failed to refresh applications");
                    continue;
                }

                let rebuilds = cache.rebuilds();
                let dashboard = cache.get(snapshot.records(), &params, view.as_of());
                if cache.rebuilds() > rebuilds {
                    println!("--- {} ---", Utc::now().format("%Y-%m-%d %H:%M:%S"));
                    print!("{}", report::render_summary(&dashboard));
                }
            }
        }
    }

    Ok(())
}
