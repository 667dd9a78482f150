use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

mod aggregate;
mod config;
mod db;
mod error;
mod grade;
mod models;
mod pipeline;
mod rank;
mod report;

use config::AppConfig;
use models::{Caller, ResultFilter, Role};
use rank::RankingPolicy;
use report::ReportFormat;

#[derive(Parser)]
#[command(name = "school-results")]
#[command(about = "Ranked, graded student result reports", long_about = None)]
struct Cli {
    /// Only log errors
    #[arg(long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Log debug output
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Configuration file (defaults to ./school-results.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ScopeArgs {
    /// School the caller belongs to
    #[arg(long)]
    school: String,
    #[arg(long)]
    class: Option<String>,
    #[arg(long)]
    stream: Option<String>,
    /// Student to report on; required for parent callers
    #[arg(long)]
    student: Option<String>,
    /// Role of the authenticated caller
    #[arg(long, value_enum, default_value_t = Role::Teacher)]
    role: Role,
    /// Override the configured ranking policy
    #[arg(long, value_enum)]
    ranking: Option<RankingPolicy>,
}

impl ScopeArgs {
    fn filter(&self) -> anyhow::Result<ResultFilter> {
        let caller = Caller {
            role: self.role,
            school_id: self.school.clone(),
            student_id: match self.role {
                Role::Student | Role::Parent => self.student.clone(),
                Role::Admin | Role::Teacher => None,
            },
        };
        let filter = ResultFilter::for_caller(
            &caller,
            self.class.clone(),
            self.stream.clone(),
            self.student.clone(),
        )?;
        Ok(filter)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo school data
    Seed,
    /// Import result records from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print the ranked student list
    Rank {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Generate a full results report
    Report {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, value_enum)]
        format: Option<ReportFormat>,
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("school-results error: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose)?;

    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let pool = connect(&config).await?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} result records from {}.", csv.display());
        }
        Commands::Rank { scope, limit } => {
            let filter = scope.filter()?;
            let policy = scope.ranking.unwrap_or(config.ranking.policy);
            let store = db::PgRecordStore::new(pool);
            let students = pipeline::ranked_students(&store, &filter, policy).await?;

            if students.is_empty() {
                println!("No results available for {}.", filter.label());
                return Ok(());
            }

            println!("Ranking for {}:", filter.label());
            for student in students.iter().take(limit) {
                let average = student
                    .overall_average
                    .map_or_else(|| "-".to_string(), |avg| format!("{avg:.2}"));
                println!(
                    "{:>3}. {} ({}, {}) grade {} average {} across {} subjects",
                    student.rank.unwrap_or_default(),
                    student.display_name,
                    student.class_id,
                    student.stream_id,
                    student.tier(),
                    average,
                    student.subjects.len()
                );
            }
        }
        Commands::Report { scope, format, out } => {
            let filter = scope.filter()?;
            let policy = scope.ranking.unwrap_or(config.ranking.policy);
            let format = format.unwrap_or(config.report.default_format);
            let store = db::PgRecordStore::new(pool);

            let view = pipeline::build_report(&store, &filter, policy).await?;
            let rendered = report::render(format, &config.report.title, &filter.label(), &view)?;

            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Report written to {}.", path.display());
                }
                None => print!("{rendered}"),
            }
        }
    }

    Ok(())
}

async fn connect(config: &AppConfig) -> anyhow::Result<PgPool> {
    let database = config.require_database()?;
    tracing::debug!(max_connections = database.max_connections, "connecting to Postgres");

    PgPoolOptions::new()
        .max_connections(database.max_connections)
        .connect(&database.url)
        .await
        .context("failed to connect to Postgres")
}

fn init_tracing(quiet: bool, verbose: bool) -> anyhow::Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("SCHOOL_RESULTS_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}
