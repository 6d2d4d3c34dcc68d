//! Parallel walk driver
//!
//! Seeds and processes directory tasks through the work pool, populating
//! each participant's shard of the distributed list in discovery order.
//!
//! Two modes:
//! - **readdir mode** (`use_stat = false`): records carry only path and
//!   type, taken from the directory entry where the filesystem provides a
//!   usable type and from a single no-follow stat otherwise.
//! - **stat mode** (`use_stat = true`): every discovered path is
//!   individually lstat'd and records carry the full stat data. The
//!   user/group name tables are replicated before traversal begins.
//!
//! Symbolic links are never followed: the metadata call is the no-follow
//! variant, and a link to a directory does not enqueue the target. Per-
//! entry failures (unreadable directory, failed stat, overlong path) are
//! logged, counted, and dropped; they never fail the walk as a whole.

use std::fs;

use tracing::{debug, info, warn};

use crate::comm::{Communicator, ReduceOp};
use crate::flist::{names, EntryType, FileList};

pub mod queue;

use queue::{PoolWorker, TaskHandle, WalkCallbacks, MAX_TASK_LEN};

/// Per-participant counters of dropped entries
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkStats {
    /// Directories whose enumeration was handed out
    pub dirs_processed: u64,

    /// Paths dropped because directory + name overflowed the task limit
    pub paths_too_long: u64,

    /// Paths whose no-follow stat failed
    pub stat_failed: u64,

    /// Directories that could not be opened
    pub dirs_unreadable: u64,
}

/// Walk a directory tree and return this participant's shard
///
/// The walk state lives for exactly one call; only one walk may run per
/// participant at a time, which the by-value pool worker enforces. All
/// participants finish with a collective count so `global_size` is
/// authoritative on return.
pub fn walk_path<C: Communicator>(
    root: &str,
    use_stat: bool,
    comm: &C,
    pool: PoolWorker,
) -> (FileList, WalkStats) {
    let mut list = FileList::new();

    // Name tables come first so records can be attributed while the
    // walk is still running
    if use_stat {
        list.set_detail(true);
        list.set_users(names::fetch_users(comm));
        list.set_groups(names::fetch_groups(comm));
    }

    let mut state = WalkState {
        root: root.to_string(),
        use_stat,
        list: &mut list,
        stats: WalkStats::default(),
    };
    pool.run(&mut state);
    let stats = state.stats;

    let total = comm.allreduce_u64(list.local_size(), ReduceOp::Sum);
    list.set_total_files(total);

    info!(
        rank = comm.rank(),
        local = list.local_size(),
        total,
        dirs = stats.dirs_processed,
        "Walk finished"
    );

    (list, stats)
}

/// State bound for the duration of one `walk_path` call
struct WalkState<'a> {
    root: String,
    use_stat: bool,
    list: &'a mut FileList,
    stats: WalkStats,
}

impl WalkCallbacks for WalkState<'_> {
    fn create(&mut self, handle: &mut TaskHandle) {
        if self.use_stat {
            // Every path gets stat'd by process, the root included
            handle.enqueue(&self.root);
            return;
        }

        // readdir mode: the root is the one path that always gets a
        // real stat; everything below it rides on dirent types
        let root = self.root.clone();
        match fs::symlink_metadata(&root) {
            Ok(md) => {
                use std::os::unix::fs::MetadataExt;
                let mode = md.mode();
                self.list.insert_stat(&root, mode, Some(&md));
                if EntryType::from_mode(mode).is_dir() {
                    self.enumerate_readdir(&root, handle);
                }
            }
            Err(e) => {
                self.stats.stat_failed += 1;
                warn!(path = %root, error = %e, "Failed to stat walk root");
            }
        }
    }

    fn process(&mut self, handle: &mut TaskHandle) {
        let Some(path) = handle.dequeue() else {
            return;
        };
        if self.use_stat {
            self.process_stat(&path, handle);
        } else {
            // Only directories are ever enqueued in readdir mode
            self.enumerate_readdir(&path, handle);
        }
    }
}

impl WalkState<'_> {
    /// stat mode: lstat one path, record it, enqueue children of dirs
    fn process_stat(&mut self, path: &str, handle: &mut TaskHandle) {
        let md = match fs::symlink_metadata(path) {
            Ok(md) => md,
            Err(e) => {
                self.stats.stat_failed += 1;
                warn!(path = %path, error = %e, "Failed to stat entry");
                return;
            }
        };

        use std::os::unix::fs::MetadataExt;
        let mode = md.mode();
        self.list.insert_stat(path, mode, Some(&md));

        if !EntryType::from_mode(mode).is_dir() {
            return;
        }

        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) => {
                self.stats.dirs_unreadable += 1;
                warn!(path = %path, error = %e, "Failed to open directory");
                return;
            }
        };
        self.stats.dirs_processed += 1;

        for entry in entries {
            let Ok(entry) = entry else { continue };
            let name = entry.file_name();
            let Some(child) = self.join(path, &name.to_string_lossy()) else {
                continue;
            };
            handle.enqueue(&child);
        }
    }

    /// readdir mode: enumerate one directory, record every entry, enqueue
    /// subdirectories for descent
    fn enumerate_readdir(&mut self, dir: &str, handle: &mut TaskHandle) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                self.stats.dirs_unreadable += 1;
                warn!(path = %dir, error = %e, "Failed to open directory");
                return;
            }
        };
        self.stats.dirs_processed += 1;

        for entry in entries {
            let Ok(entry) = entry else { continue };
            let name = entry.file_name();
            let Some(child) = self.join(dir, &name.to_string_lossy()) else {
                continue;
            };

            // The dirent type is usable on most filesystems; the fallback
            // stat at least recovers the mode
            let is_dir = match entry.file_type() {
                Ok(ft) => {
                    let entry_type = EntryType::from_fs(ft);
                    self.list.insert_lite(&child, entry_type);
                    entry_type.is_dir()
                }
                Err(_) => match fs::symlink_metadata(&child) {
                    Ok(md) => {
                        use std::os::unix::fs::MetadataExt;
                        let mode = md.mode();
                        self.list.insert_stat(&child, mode, Some(&md));
                        EntryType::from_mode(mode).is_dir()
                    }
                    Err(e) => {
                        self.stats.stat_failed += 1;
                        warn!(path = %child, error = %e, "Failed to stat entry");
                        self.list.insert_lite(&child, EntryType::Unknown);
                        false
                    }
                },
            };

            if is_dir {
                handle.enqueue(&child);
            }
        }

        debug!(path = %dir, "Directory enumerated");
    }

    /// Assemble `dir/name`, dropping combinations that overflow the task
    /// path limit
    fn join(&mut self, dir: &str, name: &str) -> Option<String> {
        // dir + '/' + name + NUL must fit the queue's documented limit
        if dir.len() + 1 + name.len() + 1 > MAX_TASK_LEN {
            self.stats.paths_too_long += 1;
            warn!(
                dir = %dir,
                name = %name,
                limit = MAX_TASK_LEN,
                "Path too long, entry dropped"
            );
            return None;
        }
        if dir.ends_with('/') {
            Some(format!("{dir}{name}"))
        } else {
            Some(format!("{dir}/{name}"))
        }
    }
}
