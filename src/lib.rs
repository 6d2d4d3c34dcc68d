//! dist-walker - Distributed Parallel File-Tree Walker
//!
//! A library for walking very large POSIX directory hierarchies across many
//! cooperating participants, gathering per-entry metadata into a distributed
//! file list, and saving/restoring that list through a portable binary cache
//! file written with collective I/O.
//!
//! # Features
//!
//! - **Parallel Walking**: directory tasks are distributed across all
//!   participants through a shared work pool, so wide trees fan out
//!   naturally.
//!
//! - **Two Walk Modes**: a cheap readdir mode that records only name and
//!   type, and a stat mode that records the full stat data for every entry
//!   plus replicated user/group name tables.
//!
//! - **Portable Cache**: the list serializes to a single shared file in a
//!   fixed big-endian layout (format v2 for lite lists, v3 for detailed
//!   lists), so a cache written on one host reads back on any other.
//!
//! - **Even Redistribution**: reading a cache re-shards the records evenly
//!   across however many participants are present, independent of how many
//!   wrote it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Filesystem                           │
//! └───────────────┬─────────────────────────────────────────────┘
//!                 │ readdir / lstat
//!                 ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Participants                            │
//! │  ┌──────────┐  ┌──────────┐          ┌──────────┐           │
//! │  │ rank 0   │  │ rank 1   │   ...    │ rank N-1 │           │
//! │  │ FileList │  │ FileList │          │ FileList │           │
//! │  └────┬─────┘  └────┬─────┘          └────┬─────┘           │
//! │       │             │                     │                 │
//! │       └──────┬──────┴─────────┬───────────┘                 │
//! │              ▼                ▼                             │
//! │      ┌──────────────┐  ┌─────────────────┐                  │
//! │      │  Work Pool   │  │  Communicator   │                  │
//! │      │ (dir tasks)  │  │ (collectives +  │                  │
//! │      └──────────────┘  │  shared file IO)│                  │
//! │                        └────────┬────────┘                  │
//! └─────────────────────────────────┼───────────────────────────┘
//!                                   ▼
//!                          ┌────────────────┐
//!                          │   cache.bin    │
//!                          │  (v2 or v3)    │
//!                          └────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Walk with full stat data on 8 participants, write a cache
//! dist-walker walk /data --stat -n 8 -o walk.cache
//!
//! # Re-read the cache later and print a summary
//! dist-walker read walk.cache -n 4
//! ```

pub mod cache;
pub mod comm;
pub mod config;
pub mod error;
pub mod flist;
pub mod walker;

pub use cache::{read_cache, write_cache};
pub use comm::{local::LocalComm, CacheIo, Communicator, ReduceOp};
pub use config::{CliArgs, WalkConfig};
pub use error::{AccessError, CacheError, NameError, Result, WalkerError};
pub use flist::{EntryType, FileList, FileRecord, StatDetail};
pub use walker::{queue::WorkPool, walk_path, WalkStats};
