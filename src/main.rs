use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use identity_reconcile::{
    load_dependents, load_entities, load_overrides, run_cohorts, telemetry, EngineConfig,
    ManualOverride, ReconciliationDriver, ReconciliationReport, SqliteStore, Store,
};

#[derive(Debug, Parser)]
#[command(name = "identity-reconcile")]
#[command(about = "Find duplicate learner records and merge them without losing dependent data")]
struct Cli {
    #[arg(long, default_value = "./learners.db")]
    db: PathBuf,

    #[arg(long, default_value = "./reconcile.json")]
    config: PathBuf,

    /// Emit logs as JSON lines on stderr
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Reconcile one cohort
    Run(RunArgs),
    /// Reconcile every configured cohort
    RunAll(RunAllArgs),
    /// Show what a run would merge, without merging
    Plan(PlanArgs),
    /// List completed merges for a cohort
    Audit(AuditArgs),
    /// Load entities and dependent records from CSV
    Import(ImportArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long)]
    cohort: String,
    #[arg(long)]
    overrides: Option<PathBuf>,
    /// Print the full report as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Debug, Args)]
struct RunAllArgs {
    #[arg(long)]
    overrides: Option<PathBuf>,
    #[arg(long, default_value_t = 4)]
    workers: usize,
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Debug, Args)]
struct PlanArgs {
    #[arg(long)]
    cohort: String,
    #[arg(long)]
    overrides: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct AuditArgs {
    #[arg(long)]
    cohort: String,
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[arg(long)]
    entities: PathBuf,
    /// `<collection>=<csv>`, repeatable
    #[arg(long = "dependents", value_parser = parse_dependents)]
    dependents: Vec<(String, PathBuf)>,
}

fn parse_dependents(value: &str) -> Result<(String, PathBuf), String> {
    match value.split_once('=') {
        Some((collection, path)) if !collection.is_empty() && !path.is_empty() => {
            Ok((collection.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected <collection>=<csv>, got {:?}", value)),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.json_logs);

    let clean = match &cli.command {
        Command::Run(args) => run_cohort(&cli, args)?,
        Command::RunAll(args) => run_all(&cli, args)?,
        Command::Plan(args) => plan_cohort(&cli, args).map(|_| true)?,
        Command::Audit(args) => show_audit(&cli, args).map(|_| true)?,
        Command::Import(args) => import(&cli, args).map(|_| true)?,
    };

    if !clean {
        std::process::exit(1);
    }

    Ok(())
}

fn load_override_list(path: Option<&Path>) -> Result<Vec<ManualOverride>> {
    match path {
        Some(path) => load_overrides(path),
        None => Ok(Vec::new()),
    }
}

fn run_cohort(cli: &Cli, args: &RunArgs) -> Result<bool> {
    let config = EngineConfig::from_file(&cli.config)?;
    let overrides = load_override_list(args.overrides.as_deref())?;
    let store = SqliteStore::open(&cli.db).context("Failed to open database")?;

    let report = ReconciliationDriver::new(&store, &config)
        .with_overrides(&overrides)
        .run(&args.cohort)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(report.failed.is_empty())
}

fn run_all(cli: &Cli, args: &RunAllArgs) -> Result<bool> {
    let config = EngineConfig::from_file(&cli.config)?;
    let overrides = load_override_list(args.overrides.as_deref())?;

    let runs = run_cohorts(&config, &overrides, args.workers, || SqliteStore::open(&cli.db));

    let mut clean = true;
    let mut reports = Vec::new();
    for run in runs {
        match run.outcome {
            Ok(report) => {
                clean &= report.failed.is_empty();
                reports.push(report);
            }
            Err(err) => {
                clean = false;
                eprintln!("❌ Cohort {} failed: {}", run.cohort_key, err);
            }
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print_report(report);
        }
    }

    Ok(clean)
}

fn plan_cohort(cli: &Cli, args: &PlanArgs) -> Result<()> {
    let config = EngineConfig::from_file(&cli.config)?;
    let overrides = load_override_list(args.overrides.as_deref())?;
    let store = SqliteStore::open(&cli.db).context("Failed to open database")?;

    let preview = ReconciliationDriver::new(&store, &config)
        .with_overrides(&overrides)
        .preview(&args.cohort)?;

    println!("🔍 Dry run for cohort {}", preview.cohort_key);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let manual = preview.plans.iter().filter(|p| p.origin.is_manual()).count();
    println!("\n🔀 {} merges planned ({} from overrides):", preview.plans.len(), manual);
    for plan in &preview.plans {
        println!("   {} -> {} [{}]", plan.retired_id, plan.canonical_id, plan.origin.describe());
    }

    println!("\n⚠️  {} ambiguous:", preview.matches.ambiguous.len());
    for ambiguous in &preview.matches.ambiguous {
        println!(
            "   {} ({}) ties between {}",
            ambiguous.record.internal_id,
            ambiguous.record.full_name(),
            ambiguous.candidates.join(", ")
        );
    }

    println!("\n❓ {} unmatched:", preview.matches.unmatched.len());
    for record in &preview.matches.unmatched {
        println!("   {} ({})", record.internal_id, record.full_name());
    }

    for skipped in &preview.skipped_overrides {
        println!("\n✋ override skipped: {}", skipped.reason);
    }

    Ok(())
}

fn show_audit(cli: &Cli, args: &AuditArgs) -> Result<()> {
    let store = SqliteStore::open(&cli.db).context("Failed to open database")?;
    let entries = store.audit_entries(&args.cohort)?;

    println!("📜 {} merges recorded for cohort {}", entries.len(), args.cohort);
    for entry in &entries {
        println!(
            "   {} {} by {}",
            entry.merged_at.format("%Y-%m-%d %H:%M:%S"),
            entry.summary(),
            entry.actor
        );
    }

    Ok(())
}

fn import(cli: &Cli, args: &ImportArgs) -> Result<()> {
    println!("🗄️  Import - CSV → SQLite + WAL");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!("\n📂 Loading entities...");
    let entities = load_entities(&args.entities)?;

    let mut dependents = Vec::new();
    for (collection, path) in &args.dependents {
        println!("📂 Loading {}...", collection);
        dependents.push((collection.as_str(), load_dependents(path)?));
    }

    let store = SqliteStore::open(&cli.db).context("Failed to open database")?;

    // One transaction: a bad row anywhere leaves the database untouched
    let (inserted, imported) = store
        .with_transaction(|store| {
            let inserted = store.insert_entities(&entities)?;
            let mut counts = Vec::new();
            for (collection, records) in &dependents {
                store.create_dependent_collection(collection)?;
                let count = store.insert_dependents(collection, records)?;
                counts.push((*collection, count, records.len()));
            }
            Ok((inserted, counts))
        })
        .context("Import failed, nothing was written")?;

    println!("\n✓ Inserted {} of {} entities", inserted, entities.len());
    for (collection, count, total) in &imported {
        println!("✓ Inserted {} of {} {} records", count, total, collection);
    }

    println!("\n✅ Import complete");
    Ok(())
}

fn print_report(report: &ReconciliationReport) {
    println!("\n🎯 {}", report.summary());

    for entry in &report.merged {
        println!("   ✓ {}", entry.summary());
    }
    for ambiguous in &report.ambiguous {
        println!(
            "   ⚠️  {} ambiguous between {}",
            ambiguous.record.internal_id,
            ambiguous.candidates.join(", ")
        );
    }
    for record in &report.unmatched {
        println!("   ❓ {} ({}) unmatched", record.internal_id, record.full_name());
    }
    for failed in &report.failed {
        println!(
            "   ❌ {} -> {} failed after {} attempts: {}",
            failed.retired_id, failed.canonical_id, failed.attempts, failed.error
        );
    }
    for skipped in &report.skipped_overrides {
        println!("   ✋ {}", skipped.reason);
    }
    if !report.is_clean() {
        println!("   🔎 Needs manual review");
    }
}
