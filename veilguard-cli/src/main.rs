//! Veilguard command line tool
//!
//! Runs an anonymization described by a configuration file, checks a rule set
//! against the source schema, or proposes a processing order for the tables.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use veilguard::cascade::ordering::{dependency_graph, misordered, topological_sort};
use veilguard::connection::redact;
use veilguard::{
    validate_rules, Anonymizer, AnonymizerConfig, Database, Endpoints, PostgresDatabase, RunContext, RunReport,
    StrategyRegistry,
};

#[derive(Parser)]
#[command(name = "veilguard")]
#[command(about = "Copy a PostgreSQL schema while anonymizing its rows")]
#[command(version)]
struct Cli {
    /// Configuration file (default: config/veilguard.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Anonymize the configured tables into the destination database
    Run {
        /// Rows per insert batch (overrides the configuration)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Seed for reproducible pseudonyms (overrides the configuration)
        #[arg(long)]
        seed: Option<u64>,

        /// Run even when the rule set has violations
        #[arg(long)]
        skip_validation: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check every rule against the source schema
    Validate,

    /// Print the configured tables in an order where parents precede children
    Order,
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = AnonymizerConfig::load(cli.config.as_deref())
        .context("loading configuration")
        .and_then(|config| match cli.command {
            Commands::Run {
                batch_size,
                seed,
                skip_validation,
                json,
            } => handle_run(config, batch_size, seed, skip_validation, json),
            Commands::Validate => handle_validate(&config),
            Commands::Order => handle_order(&config),
        });

    if let Err(e) = result {
        eprintln!("❌ Error: {e:#}");
        process::exit(1);
    }
}

fn connect(role: &str, url: &str) -> Result<PostgresDatabase> {
    log::info!("connecting to {role} database {}", redact(url));
    let db = PostgresDatabase::connect(url).with_context(|| format!("connecting to the {role} database"))?;
    let healthy = db
        .executor()
        .check_health()
        .with_context(|| format!("health check of the {role} database"))?;
    if !healthy {
        bail!("{role} database at {} failed its health check", redact(url));
    }
    Ok(db)
}

fn handle_run(
    config: AnonymizerConfig,
    batch_size: Option<usize>,
    seed: Option<u64>,
    skip_validation: bool,
    json: bool,
) -> Result<()> {
    if config.tables.is_empty() {
        bail!("no tables configured");
    }
    let source = connect("source", &config.source.url)?;
    let destination = connect("destination", &config.destination.url)?;
    let transformation = connect("transformation", &config.transformation.url)?;
    let endpoints = Endpoints {
        source: &source,
        destination: &destination,
        transformation: &transformation,
    };
    let ctx = RunContext::new(config.schema.clone(), endpoints, seed.or(config.seed));
    let registry = StrategyRegistry::with_defaults();
    let rules = config.to_rules();

    if !skip_validation {
        let violations = validate_rules(&ctx, &registry, &rules);
        if !violations.is_empty() {
            bail!("{} rule violations, see `veilguard validate`", violations.len());
        }
    }

    let report = Anonymizer::new(ctx, registry, rules, config.tables.clone())?
        .with_batch_size(batch_size.unwrap_or(config.batch_size))
        .run()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    if report.failed_batches() > 0 {
        log::warn!("{} batches were not written", report.failed_batches());
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("\n📊 Anonymization Report\n");
    println!(
        "  {:<32} {:>10} {:>10} {:>10} {:>10} {:>8}",
        "table", "read", "written", "by rule", "cascade", "failed"
    );
    for table in &report.tables {
        println!(
            "  {:<32} {:>10} {:>10} {:>10} {:>10} {:>8}",
            table.table,
            table.rows_read,
            table.rows_written,
            table.deleted_by_rule,
            table.deleted_by_cascade,
            table.failed_rows + table.failed_batches
        );
    }
    if !report.summaries.is_empty() {
        println!();
        for line in &report.summaries {
            println!("  • {line}");
        }
    }
    println!(
        "\n📈 Summary: {} tables, {} rows written in {:.1}s",
        report.tables.len(),
        report.rows_written(),
        report.elapsed_seconds
    );
}

fn handle_validate(config: &AnonymizerConfig) -> Result<()> {
    let source = connect("source", &config.source.url)?;
    let transformation = connect("transformation", &config.transformation.url)?;
    // validation only reads source metadata; the destination is never touched
    let endpoints = Endpoints {
        source: &source,
        destination: &source,
        transformation: &transformation,
    };
    let ctx = RunContext::new(config.schema.clone(), endpoints, config.seed);
    let rules = config.to_rules();
    let violations = validate_rules(&ctx, &StrategyRegistry::with_defaults(), &rules);

    if violations.is_empty() {
        println!("✅ {} rules valid", rules.len());
        return Ok(());
    }
    for violation in &violations {
        println!("  ✗ {violation}");
    }
    bail!("{} of {} rules have violations", violations.len(), rules.len())
}

fn handle_order(config: &AnonymizerConfig) -> Result<()> {
    let source = connect("source", &config.source.url)?;
    let scope = if config.tables.is_empty() {
        source.table_names(&config.schema)?
    } else {
        config.tables.clone()
    };
    let graph = dependency_graph(&source.foreign_keys(&config.schema)?, &scope);

    for (child, parent) in misordered(&graph) {
        println!("  ⚠ {child} is configured before its parent {parent}");
    }
    match topological_sort(&graph) {
        Ok(order) => {
            println!("tables = [");
            for table in order {
                println!("    \"{table}\",");
            }
            println!("]");
            Ok(())
        }
        Err(cycle) => bail!("foreign keys form a cycle through {}", cycle.join(", ")),
    }
}
