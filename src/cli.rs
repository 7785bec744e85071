use clap::{Args, Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::amount::format_currency;
use crate::config::{parse_seed_override, ErrorPolicy, ImportConfig};
use crate::engine::{recover_positions, Engine};
use crate::format;
use crate::store::sqlite::SqliteStore;

#[derive(Parser)]
#[command(name = "kirjuri", version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a broker export file into a ledger.
    Import(ImportArgs),
    /// Show the positions a service holds according to the ledger.
    Positions(PositionsArgs),
}

#[derive(Args)]
struct ImportArgs {
    /// Ledger sqlite file to import into.
    #[arg(long, value_name = "PATH")]
    ledger: PathBuf,
    /// Import configuration file (JSON).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Source format of the export file.
    #[arg(long)]
    format: String,
    /// The export file.
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// What to do when a group fails classification.
    #[arg(long, value_enum)]
    on_error: Option<ErrorPolicy>,
    /// Run the whole pipeline without writing anything.
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    /// Bypass the import-mark dedup filter.
    #[arg(long, default_value_t = false)]
    force: bool,
    /// Disable realized profit and loss calculation.
    #[arg(long, default_value_t = false)]
    no_profit: bool,
    /// Do not grow positions for assets moved in without payment.
    #[arg(long, default_value_t = false)]
    zero_moves: bool,
    /// Seed an average cost, e.g. `KRAKEN:ETH=89.95`. Repeatable.
    #[arg(long = "set-average", value_name = "SERVICE:SYMBOL=PRICE")]
    set_averages: Vec<String>,
    /// Seed an owned quantity, e.g. `KRAKEN:ETH=2.5`. Repeatable.
    #[arg(long = "set-quantity", value_name = "SERVICE:SYMBOL=QTY")]
    set_quantities: Vec<String>,
}

#[derive(Args)]
struct PositionsArgs {
    /// Ledger sqlite file to read.
    #[arg(long, value_name = "PATH")]
    ledger: PathBuf,
    /// Service tag whose positions to recover.
    #[arg(value_name = "SERVICE")]
    service: String,
}

pub fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Import(args) => run_import(args),
        Commands::Positions(args) => run_positions(args),
    }
}

fn run_import(args: ImportArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut config = match &args.config {
        Some(path) => ImportConfig::from_file(path)?,
        None => ImportConfig::default(),
    };
    let format = format::by_name(&args.format).ok_or_else(|| {
        format!(
            "unknown format `{}` (expected one of: {})",
            args.format,
            format::known_formats().join(", ")
        )
    })?;
    if config.service.is_empty() {
        config.service = format.name().to_uppercase();
    }
    if config.service_name.is_empty() {
        config.service_name = format.service_name().to_string();
    }
    if let Some(policy) = args.on_error {
        config.error_policy = policy;
    }
    config.dry_run |= args.dry_run;
    config.force |= args.force;
    config.no_profit |= args.no_profit;
    config.zero_moves |= args.zero_moves;
    for value in &args.set_averages {
        if let Some((symbol, average)) = parse_seed_override(value, &config.service)? {
            config.seed_averages.insert(symbol, average);
        }
    }
    for value in &args.set_quantities {
        if let Some((symbol, quantity)) = parse_seed_override(value, &config.service)? {
            config.seed_quantities.insert(symbol, quantity);
        }
    }

    let store = SqliteStore::open(&args.ledger)?;
    let report = Engine::new(&store, format.as_ref(), &config).import(&args.file)?;

    println!(
        "{} created, {} duplicates, {} skipped, {} failed",
        report.created,
        report.duplicates,
        report.skipped,
        report.failed.len()
    );
    for failure in &report.failed {
        println!("failed {}: {}", failure.group.id, failure.error);
        for record in &failure.group.records {
            println!("  line {}: {:?}", record.line, record.fields());
        }
    }
    Ok(())
}

fn run_positions(args: PositionsArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    let store = SqliteStore::open(&args.ledger)?;
    let positions = recover_positions(&store, &args.service)?;
    let mut total = 0.0;
    for (symbol, position) in positions {
        let value = position.quantity * position.average;
        total += value;
        println!("{symbol}");
        println!(
            "    {} x {}",
            position.quantity,
            format_currency(position.average, "€")
        );
        println!("    {}", format_currency(value, "€"));
    }
    println!("Total:");
    println!("    {}", format_currency(total, "€"));
    Ok(())
}
