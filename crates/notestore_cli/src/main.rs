//! Command-line probe for a storage directory.
//!
//! # Responsibility
//! - Verify `notestore_core` linkage.
//! - Run note searches and counts against an existing storage directory.

use clap::{Parser, Subcommand};
use notestore_core::{
    default_log_level, init_logging_for, ListFilters, LocalStorage, NoteSearchQuery,
    StorageConfig, StorageResult,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "notestore")]
#[command(about = "Inspect a local note storage directory")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print crate version and health check
    Version,
    /// Print notebook, tag and note counts
    Stats {
        /// Storage directory
        storage_dir: PathBuf,
    },
    /// Print local ids of notes matching a search query
    Search {
        /// Storage directory
        storage_dir: PathBuf,
        /// Query text, e.g. `notebook:Work tag:urgent -tag:done`
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    let result = match args.command {
        Command::Version => {
            println!("notestore_core version={}", notestore_core::core_version());
            Ok(())
        }
        Command::Stats { storage_dir } => stats(storage_dir),
        Command::Search { storage_dir, query } => search(storage_dir, &query.join(" ")),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error[{}]: {err}", err.log_code());
            ExitCode::FAILURE
        }
    }
}

fn open(storage_dir: PathBuf) -> StorageResult<LocalStorage> {
    let config = StorageConfig::new(storage_dir);
    if let Err(err) = init_logging_for(&config, default_log_level()) {
        eprintln!("logging disabled: {err}");
    }
    LocalStorage::open(config)
}

fn stats(storage_dir: PathBuf) -> StorageResult<()> {
    let storage = open(storage_dir)?;
    let notebooks = storage.notebooks().count(ListFilters::default()).wait()?;
    let tags = storage.tags().count(ListFilters::default()).wait()?;
    let notes = storage.notes().count(ListFilters::default()).wait()?;
    println!("notebooks={notebooks} tags={tags} notes={notes}");
    storage.shutdown();
    Ok(())
}

fn search(storage_dir: PathBuf, text: &str) -> StorageResult<()> {
    let query = NoteSearchQuery::parse(text)?;
    let storage = open(storage_dir)?;
    let local_ids = storage.notes().query_note_local_ids(query).wait()?;
    for local_id in &local_ids {
        println!("{local_id}");
    }
    log::info!(
        "event=cli_search module=cli status=ok matches={}",
        local_ids.len()
    );
    storage.shutdown();
    Ok(())
}
