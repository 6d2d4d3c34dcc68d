//! Collective messaging substrate
//!
//! The file-list core never talks to its peers directly; every cross-
//! participant exchange goes through the [`Communicator`] contract defined
//! here: rank/size introspection, broadcast, exclusive prefix-sum scan,
//! all-reduce, and positioned access to a shared cache file.
//!
//! Every collective is a synchronization point: all participants must enter
//! the same collectives in the same order or the job deadlocks. A
//! participant that fails to reach a collective is a catastrophic failure of
//! the whole job; there is no recovery protocol.
//!
//! The in-process, thread-backed implementation lives in [`local`].

use std::io;
use std::path::Path;

pub mod local;

/// Reduction operator for all-reduce collectives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// Arithmetic sum
    Sum,
    /// Minimum
    Min,
    /// Maximum
    Max,
}

impl ReduceOp {
    fn apply_u64(self, a: u64, b: u64) -> u64 {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
        }
    }

    fn apply_i64(self, a: i64, b: i64) -> i64 {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
        }
    }
}

/// Positioned access to a shared cache file
///
/// Offsets are explicit; there is no cursor. The collective read/write
/// phases of the cache reader and writer are built from these positioned
/// calls plus the communicator's barriers, so the on-disk layout is the
/// same no matter how many participants take part.
pub trait CacheIo {
    /// Read exactly `buf.len()` bytes starting at `offset`
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Write all of `buf` starting at `offset`
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()>;
}

/// The collective operations the file-list core consumes
///
/// Integers travel in fixed-width big-endian form between participants and
/// in the cache file, so the substrate is free of host-endianness concerns.
pub trait Communicator {
    /// Handle to a collectively opened cache file
    type CacheFile: CacheIo;

    /// This participant's rank, in `[0, size)`
    fn rank(&self) -> usize;

    /// Number of participants in the job
    fn size(&self) -> usize;

    /// Block until every participant has entered the barrier
    fn barrier(&self);

    /// Broadcast a byte buffer from `root` to every participant
    ///
    /// On non-root participants the buffer is replaced with the root's
    /// contents (the incoming length wins).
    fn broadcast_bytes(&self, root: usize, buf: &mut Vec<u8>);

    /// Broadcast a fixed-length array of u64 values from `root`
    fn broadcast_u64s(&self, root: usize, vals: &mut [u64]);

    /// All-reduce a single u64 with the given operator
    fn allreduce_u64(&self, value: u64, op: ReduceOp) -> u64;

    /// All-reduce a single i64 with the given operator
    fn allreduce_i64(&self, value: i64, op: ReduceOp) -> i64;

    /// Exclusive prefix sum: rank r receives the sum of values on ranks
    /// `0..r`; rank 0 receives 0
    fn exscan_sum(&self, value: u64) -> u64;

    /// Collectively open an existing cache file for reading
    fn open_read(&self, path: &Path) -> io::Result<Self::CacheFile>;

    /// Collectively create a cache file for writing, truncated to zero
    ///
    /// The truncation is complete on every participant's return, so writes
    /// at any offset are safe immediately.
    fn open_write(&self, path: &Path) -> io::Result<Self::CacheFile>;
}
