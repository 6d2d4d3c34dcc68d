//! Configuration types for dist-walker
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use thiserror::Error;

/// Maximum reasonable participant count for the in-process group
const MAX_PARTICIPANTS: usize = 512;

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid participant count
    #[error("Invalid participant count {count}: must be between 1 and {max}")]
    InvalidParticipants { count: usize, max: usize },

    /// Walk root problems
    #[error("Invalid walk root '{path}': {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    /// Output path problems
    #[error("Invalid output path '{path}': {reason}")]
    InvalidOutputPath { path: PathBuf, reason: String },
}

/// Distributed file-tree walker with a portable metadata cache
#[derive(Parser, Debug, Clone)]
#[command(
    name = "dist-walker",
    version,
    about = "Distributed file-tree walker with a portable metadata cache",
    long_about = "Walks a directory tree across a group of cooperating participants,\n\
                  gathers per-entry metadata into a distributed list, and saves or\n\
                  restores that list through a single shared binary cache file.",
    after_help = "EXAMPLES:\n    \
        dist-walker walk /data --stat -o walk.cache\n    \
        dist-walker walk /data -n 16\n    \
        dist-walker read walk.cache --list"
)]
pub struct CliArgs {
    /// Subcommand
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output (show per-entry warnings)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Walk a directory tree and optionally write a cache
    Walk {
        /// Root directory to walk
        #[arg(value_name = "PATH")]
        root: PathBuf,

        /// Stat every entry and record user/group tables (v3 cache)
        #[arg(long)]
        stat: bool,

        /// Cache file to write
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Number of participants
        #[arg(short = 'n', long, default_value_t = default_participants(), value_name = "NUM")]
        participants: usize,
    },

    /// Read a cache file and print its summary
    Read {
        /// Cache file to read
        #[arg(value_name = "FILE")]
        cache: PathBuf,

        /// Number of participants
        #[arg(short = 'n', long, default_value_t = default_participants(), value_name = "NUM")]
        participants: usize,

        /// Print every record, one per line
        #[arg(long)]
        list: bool,
    },
}

fn default_participants() -> usize {
    num_cpus::get()
}

/// Validated runtime configuration for a walk
#[derive(Debug, Clone)]
pub struct WalkConfig {
    /// Root directory, as the walk will record it
    pub root: String,

    /// Stat mode flag
    pub use_stat: bool,

    /// Cache file to write, if any
    pub output: Option<PathBuf>,

    /// Number of participants in the group
    pub participants: usize,
}

impl WalkConfig {
    /// Validate walk arguments into a runtime configuration
    pub fn new(
        root: PathBuf,
        use_stat: bool,
        output: Option<PathBuf>,
        participants: usize,
    ) -> Result<Self, ConfigError> {
        validate_participants(participants)?;

        if !root.is_dir() {
            return Err(ConfigError::InvalidRoot {
                path: root,
                reason: "not a directory".into(),
            });
        }

        if let Some(ref output) = output {
            if let Some(parent) = output.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(ConfigError::InvalidOutputPath {
                        path: output.clone(),
                        reason: format!("parent directory '{}' does not exist", parent.display()),
                    });
                }
            }
        }

        // Trailing slashes would double up in assembled child paths
        let mut root = root.to_string_lossy().into_owned();
        while root.len() > 1 && root.ends_with('/') {
            root.pop();
        }

        Ok(Self {
            root,
            use_stat,
            output,
            participants,
        })
    }
}

/// Check a participant count against the supported range
pub fn validate_participants(count: usize) -> Result<(), ConfigError> {
    if count == 0 || count > MAX_PARTICIPANTS {
        return Err(ConfigError::InvalidParticipants {
            count,
            max: MAX_PARTICIPANTS,
        });
    }
    Ok(())
}
