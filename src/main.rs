//! dist-walker - Distributed File-Tree Walker
//!
//! Entry point for the CLI application. Runs the participant group as
//! threads in this process, with rank 0's list used for reporting.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::Parser;
use dist_walker::config::{validate_participants, CliArgs, Command, WalkConfig};
use dist_walker::{read_cache, walk_path, write_cache, Communicator, FileList, LocalComm, WorkPool};
use humansize::{format_size, BINARY};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();
    setup_logging(args.verbose)?;

    match args.command {
        Command::Walk {
            root,
            stat,
            output,
            participants,
        } => {
            let config = WalkConfig::new(root, stat, output, participants)
                .context("Invalid configuration")?;
            run_walk(config)
        }
        Command::Read {
            cache,
            participants,
            list,
        } => {
            validate_participants(participants).context("Invalid configuration")?;
            run_read(&cache, participants, list)
        }
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;
    Ok(())
}

/// Run a walk across an in-process participant group
fn run_walk(config: WalkConfig) -> Result<()> {
    let walk_start = Utc::now().timestamp() as u64;

    let comms = LocalComm::group(config.participants);
    let pool = WorkPool::group(config.participants);
    let output: Option<PathBuf> = config.output.clone();

    let lists = thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .zip(pool)
            .map(|(comm, worker)| {
                let config = &config;
                let output = output.as_deref();
                s.spawn(move || -> Result<Option<FileList>> {
                    let (mut list, _stats) =
                        walk_path(&config.root, config.use_stat, &comm, worker);
                    list.compute_summary(&comm);

                    if let Some(path) = output {
                        let walk_end = Utc::now().timestamp() as u64;
                        write_cache(path, &list, walk_start, walk_end, &comm)
                            .context("Failed to write cache")?;
                    }

                    Ok((comm.rank() == 0).then_some(list))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("participant panicked"))
            .collect::<Result<Vec<_>>>()
    })?;

    let list = lists.into_iter().flatten().next().expect("rank 0 list");
    print_list_summary(&list, config.participants);

    if let Some(path) = &config.output {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        println!("Cache:        {} ({})", path.display(), format_size(size, BINARY));
    }
    Ok(())
}

/// Read a cache across an in-process participant group
fn run_read(cache: &Path, participants: usize, list_records: bool) -> Result<()> {
    let comms = LocalComm::group(participants);

    let lists = thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                s.spawn(move || -> Result<Option<FileList>> {
                    let mut list =
                        read_cache(cache, &comm).context("Failed to read cache")?;
                    list.compute_summary(&comm);
                    Ok((comm.rank() == 0).then_some(list))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("participant panicked"))
            .collect::<Result<Vec<_>>>()
    })?;

    let list = lists.into_iter().flatten().next().expect("rank 0 list");
    print_list_summary(&list, participants);

    if list_records {
        // Rank 0 holds only its own shard; printing it is still the most
        // useful view the CLI can give without gathering
        for index in 0..list.local_size() {
            let path = list.file_name(index).unwrap_or("?");
            let entry_type = list
                .file_type(index)
                .map(|t| format!("{t:?}"))
                .unwrap_or_else(|_| "?".into());
            if list.have_detail() {
                let size = list.file_size(index).unwrap_or(0);
                let user = list.file_username(index).unwrap_or_else(|_| "?".into());
                println!("{entry_type:<8} {size:>12} {user:<12} {path}");
            } else {
                println!("{entry_type:<8} {path}");
            }
        }
    }
    Ok(())
}

fn print_list_summary(list: &FileList, participants: usize) {
    println!("Participants: {participants}");
    println!("Records:      {}", list.global_size());
    println!("Detail:       {}", if list.have_detail() { "stat" } else { "lite" });
    if list.global_size() > 0 {
        println!("Depth:        {}..{}", list.min_depth(), list.max_depth());
        println!("Longest path: {}", list.file_max_name().saturating_sub(1));
    }
    if list.have_detail() {
        println!("Users:        {}", list.user_count());
        println!("Groups:       {}", list.group_count());
    }
}
