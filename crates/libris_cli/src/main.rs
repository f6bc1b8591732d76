//! Operator CLI for the Libris lending core.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `libris_core` linkage.
//! - Expose the due-date sweep as a manual trigger for operators.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use libris_core::db::open_db;
use libris_core::{DueDateSweeper, LifecycleEngine};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "libris", about = "Libris lending core utilities", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the core crate version.
    Version,
    /// Flag approved loans past their due date as to-return.
    SweepDue {
        /// Path to the SQLite database file.
        #[arg(long)]
        db: PathBuf,
        /// Sweep as of this day (YYYY-MM-DD) instead of today.
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Version => {
            println!("libris_core version={}", libris_core::core_version());
            Ok(())
        }
        Command::SweepDue { db, as_of } => {
            let conn = open_db(&db)?;
            let mut engine = LifecycleEngine::new(conn)?;
            let mut sweeper = DueDateSweeper::new(&mut engine);
            let report = match as_of {
                Some(day) => sweeper.run_as_of(day)?,
                None => sweeper.run()?,
            };
            println!("{}", report.message());
            Ok(())
        }
    }
}
