use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::fs::File;
use std::path::PathBuf;

use covtrack::config::{Config, CONFIG_FILE};
use covtrack::db::Database;
use covtrack::ingest::{ingest_coverage_reports, ingest_test_reports};
use covtrack::model::{BuildStatus, NewBuild};
use covtrack::TestHealthAnalyzer;

const DEFAULT_BUILD_LIMIT: usize = 20;

#[derive(Parser)]
#[command(name = "covtrack")]
#[command(about = "Track CI test reports, per-test coverage and test health")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (default: covtrack.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a build from JUnit XML reports
    UploadTests {
        /// Branch the build ran on
        #[arg(long)]
        branch: String,

        /// Commit the build ran on
        #[arg(long)]
        commit: String,

        /// Repository slug (defaults to the project slug)
        #[arg(long)]
        slug: Option<String>,

        /// Report files or glob patterns
        #[arg(required = true)]
        reports: Vec<String>,
    },

    /// Attach Jacoco per-test coverage reports to a build
    UploadCoverage {
        /// Build the coverage was recorded in
        #[arg(long)]
        build: i64,

        /// Report files or glob patterns
        #[arg(required = true)]
        reports: Vec<String>,
    },

    /// List recent builds of the project
    Builds {
        #[arg(short, long, default_value_t = DEFAULT_BUILD_LIMIT)]
        limit: usize,
    },

    /// List the test executions of a build
    Executions {
        build: i64,
    },

    /// Check a test execution for flakiness and slowness
    Health {
        execution: i64,

        /// Print warnings as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let (config, base_dir) = load_config(cli.config)?;
    let db_path = config.database_path(&base_dir)?;
    let db = Database::open(&db_path)?;

    match cli.command {
        Commands::UploadTests {
            branch,
            commit,
            slug,
            reports,
        } => cmd_upload_tests(&config, &db, branch, commit, slug, &reports),
        Commands::UploadCoverage { build, reports } => cmd_upload_coverage(&db, build, &reports),
        Commands::Builds { limit } => cmd_builds(&config, &db, limit),
        Commands::Executions { build } => cmd_executions(&db, build),
        Commands::Health { execution, json } => cmd_health(&config, &db, execution, json),
    }
}

/// An explicit `--config` must exist; without one, `covtrack.toml` is optional
fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let explicit = path.is_some();
    let config_path = path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

    if !explicit && !config_path.exists() {
        let cwd = std::env::current_dir().context("Could not determine current directory")?;
        return Ok((Config::default(), cwd));
    }

    let config_path = std::fs::canonicalize(&config_path)
        .with_context(|| format!("Could not find config file: {}", config_path.display()))?;

    let base_dir = config_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::load(&config_path)
        .with_context(|| format!("Could not load {}", config_path.display()))?;

    Ok((config, base_dir))
}

/// Expands glob patterns; every pattern has to match at least one file
fn resolve_reports(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for pattern in patterns {
        let mut matched = false;
        for entry in glob::glob(pattern).with_context(|| format!("Invalid pattern: {}", pattern))? {
            let path = entry?;
            if path.is_file() {
                paths.push(path);
                matched = true;
            }
        }
        if !matched {
            anyhow::bail!("No report found for '{}'", pattern);
        }
    }

    Ok(paths)
}

fn open_reports(paths: &[PathBuf]) -> Result<Vec<File>> {
    paths
        .iter()
        .map(|path| File::open(path).with_context(|| format!("Could not open {}", path.display())))
        .collect()
}

fn cmd_upload_tests(
    config: &Config,
    db: &Database,
    branch: String,
    commit: String,
    slug: Option<String>,
    patterns: &[String],
) -> Result<()> {
    let paths = resolve_reports(patterns)?;
    let files = open_reports(&paths)?;

    let project = db.ensure_project(&config.project_slug(), &config.project.name)?;
    let build = db.create_build(
        project.id,
        &NewBuild {
            branch,
            commit,
            slug: slug.unwrap_or_else(|| project.slug.clone()),
        },
    )?;

    let ingest = ingest_test_reports(db, &build, files)?;

    println!(
        "\n{} Build {} ({} report(s))\n",
        "→".blue(),
        build.id.to_string().bold(),
        paths.len()
    );

    for suite in &ingest.suites {
        let marker = if suite.failures > 0 { "✗".red() } else { "✓".green() };
        println!(
            "  {} {} {}",
            marker,
            suite.name.cyan(),
            format!(
                "{} tests, {} failed, {} skipped, {} errors, {:.3}s",
                suite.tests, suite.failures, suite.skipped, suite.errors, suite.time
            )
            .dimmed()
        );
    }

    println!();
    print_status(ingest.status);
    println!("  {} {}", "executions:".dimmed(), ingest.executions.len());

    Ok(())
}

fn cmd_upload_coverage(db: &Database, build_id: i64, patterns: &[String]) -> Result<()> {
    let paths = resolve_reports(patterns)?;
    let files = open_reports(&paths)?;

    let outcome = ingest_coverage_reports(db, build_id, files)?;

    println!(
        "\n{} Coverage for build {} ({} report(s))\n",
        "→".blue(),
        build_id.to_string().bold(),
        paths.len()
    );

    for execution in &outcome.updated {
        println!(
            "  {} {} {}",
            "✓".green(),
            execution.session_id().cyan(),
            format!("{} file(s) covered", execution.covered_lines.len()).dimmed()
        );
    }

    for session in &outcome.unmatched {
        println!("  {} {} {}", "⚠".yellow(), session, "no matching test execution".dimmed());
    }

    Ok(())
}

fn cmd_builds(config: &Config, db: &Database, limit: usize) -> Result<()> {
    let project = db.ensure_project(&config.project_slug(), &config.project.name)?;
    let builds = db.get_recent_builds(project.id, limit, false)?;

    println!("\n{} {}\n", "📦".cyan(), project.name.bold());

    if builds.is_empty() {
        println!("  {}", "No builds yet".dimmed());
        return Ok(());
    }

    for build in builds {
        println!(
            "  {} {} {} {} {}",
            format!("#{}", build.id).bold(),
            status_label(build.status),
            build.branch.cyan(),
            build.commit.dimmed(),
            build.created_at.format("%Y-%m-%d %H:%M").to_string().dimmed()
        );
    }

    Ok(())
}

fn cmd_executions(db: &Database, build_id: i64) -> Result<()> {
    let build = db
        .get_build(build_id)?
        .ok_or_else(|| anyhow::anyhow!("Build {} not found", build_id))?;

    println!(
        "\n{} Build {} on {}\n",
        "→".blue(),
        build.id.to_string().bold(),
        build.branch.cyan()
    );

    for execution in &build.test_case_executions {
        let marker = if execution.passed { "✓".green() } else { "✗".red() };
        println!(
            "  {} {:>5} {} {}",
            marker,
            execution.id.to_string().dimmed(),
            execution.session_id(),
            format!(
                "{:.3}s, {} covered file(s)",
                execution.time,
                execution.covered_lines.len()
            )
            .dimmed()
        );
        if let Some(ref message) = execution.failure_message {
            println!("          {}", message.red());
        }
    }

    Ok(())
}

fn cmd_health(config: &Config, db: &Database, execution_id: i64, json: bool) -> Result<()> {
    let execution = db
        .get_execution(execution_id)?
        .ok_or_else(|| anyhow::anyhow!("Test execution {} not found", execution_id))?;

    let warnings = TestHealthAnalyzer::new(config.health).investigate(&execution, db)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&warnings)?);
        return Ok(());
    }

    println!("\n{} {}\n", "🩺".cyan(), execution.session_id().bold());

    if warnings.is_empty() {
        println!("  {} {}", "✓".green(), "No health warnings".dimmed());
        return Ok(());
    }

    for warning in &warnings {
        println!("  {} {} {}", "⚠".yellow(), warning.kind().yellow(), warning.describe());
    }

    Ok(())
}

fn status_label(status: BuildStatus) -> colored::ColoredString {
    match status {
        BuildStatus::Pending => status.as_str().dimmed(),
        BuildStatus::Success => status.as_str().green(),
        BuildStatus::TestsFailed => status.as_str().red(),
    }
}

fn print_status(status: BuildStatus) {
    println!("  {} {}", "status:".dimmed(), status_label(status));
}
