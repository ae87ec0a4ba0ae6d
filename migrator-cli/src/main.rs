//! Command-line front-end for the migration orchestrator.
//!
//! Concrete persistence adapters (a real database pool, a real backup
//! target) are out of scope for this workspace (see the root DESIGN.md), so
//! this binary wires the orchestrator up against the in-memory reference
//! drivers in `migrator::testing`. It is a reference harness for exercising
//! the orchestrator end-to-end against a migrations folder on disk, not a
//! production deployment target.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use migrator::config::Configuration;
use migrator::testing::{InMemoryBackup, InMemoryDb, InMemoryLedger, InMemoryLock};
use migrator::Orchestrator;

#[derive(Parser)]
#[command(name = "migrator")]
#[command(about = "Database schema-migration execution orchestrator")]
#[command(version)]
struct Cli {
    /// Migrations directory path (overrides configuration/env)
    #[arg(long)]
    folder: Option<PathBuf>,

    /// Path to a msr.config.toml/json file
    #[arg(long)]
    config_file: Option<PathBuf>,

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
    /// Apply pending migrations, optionally up to and including a target timestamp
    Migrate {
        /// Preview pending migrations without applying them
        #[arg(long)]
        dry_run: bool,
        /// Stop at this timestamp (inclusive); omit to apply everything pending
        #[arg(long)]
        target: Option<i64>,
    },
    /// Reverse applied migrations down to (not including) the given timestamp
    Down {
        #[arg(long)]
        target: i64,
    },
    /// List discovered migrations and their classification
    List {
        /// Cap each subset to this many entries (defaults to the configured display_limit)
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Run pre-execution and integrity validation without applying anything
    Validate,
    /// Force-release a stuck migration lock
    LockRelease {
        #[arg(long)]
        force: bool,
    },
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn build_orchestrator(cli: &Cli, dry_run: bool) -> anyhow::Result<Orchestrator> {
    let mut config = Configuration::load(cli.config_file.as_deref())?;
    if let Some(folder) = &cli.folder {
        config.folder = folder.clone();
    }
    if dry_run {
        config.dry_run = true;
    }

    let db = Arc::new(InMemoryDb::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let lock = Arc::new(InMemoryLock::new());
    let backup = Arc::new(InMemoryBackup::new());

    Ok(Orchestrator::new(db, ledger, lock, backup, config)?)
}

fn main() {
    let _ = dotenv::dotenv();
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let result = run(&cli);

    match result {
        Ok(()) => {
            if !cli.quiet {
                println!("{}", "done".green());
            }
        }
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Migrate { dry_run, target } => {
            let orchestrator = build_orchestrator(cli, *dry_run)?;
            let result = orchestrator.migrate_up(*target)?;
            print_result(&result);
            if !result.success {
                anyhow::bail!("migration failed: {}", result.errors.join("; "));
            }
            Ok(())
        }
        Commands::Down { target } => {
            let orchestrator = build_orchestrator(cli, false)?;
            let result = orchestrator.down_to(*target)?;
            print_result(&result);
            Ok(())
        }
        Commands::List { limit } => {
            let orchestrator = build_orchestrator(cli, false)?;
            let scan = orchestrator.list(*limit)?;
            println!("{}", "pending:".bold());
            for script in &scan.pending {
                println!("  {} {}", script.timestamp, script.name);
            }
            println!("{}", "migrated:".bold());
            for script in &scan.migrated {
                println!("  {} {}", script.timestamp, script.name);
            }
            println!("{}", "ignored:".bold());
            for script in &scan.ignored {
                println!("  {} {}", script.timestamp, script.name);
            }
            Ok(())
        }
        Commands::Validate => {
            let orchestrator = build_orchestrator(cli, false)?;
            orchestrator.validate()?;
            println!("{}", "all checks passed".green());
            Ok(())
        }
        Commands::LockRelease { force } => {
            if !force {
                anyhow::bail!("refusing to release a lock without --force");
            }
            // The in-memory lock used by this reference CLI holds no state
            // across invocations, so there is nothing to release; production
            // deployments wire a real `LockDriver` here instead.
            println!("{}", "lock released (no-op: in-memory reference driver)".yellow());
            Ok(())
        }
    }
}

fn print_result(result: &migrator::MigrationResult) {
    if result.success {
        println!("{}", "success".green());
    } else {
        println!("{}", "failed".red());
    }
    for info in &result.executed {
        println!("  applied {} {}", info.timestamp, info.name);
    }
    for name in &result.would_execute {
        println!("  would apply {name}");
    }
    for name in &result.rolled_back {
        println!("  rolled back {name}");
    }
    for err in &result.errors {
        println!("  {} {err}", "!".red());
    }
}
