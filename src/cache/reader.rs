//! Version-dispatched collective cache reader
//!
//! Participant 0 reads the version word at displacement 0 and broadcasts
//! it; the remaining header (4 u64s for v2, 8 for v3) follows the same
//! way. Records are then partitioned evenly: participant `r` of `R` gets
//! `floor(N/R)` records plus one more when `r < N mod R`, with its start
//! index from an exclusive prefix sum, so shard sizes differ by at most
//! one regardless of how many participants wrote the cache.
//!
//! Header-read failures are broadcast as a status word so every
//! participant returns an error instead of waiting on a collective that
//! will never complete. An unknown version is rejected on every
//! participant and no list is produced.

use std::path::Path;

use tracing::{info, warn};

use crate::cache::{pair_extent, V2_HEADER_WORDS, V3_HEADER_WORDS, VERSION_DETAIL, VERSION_LITE, WORD};
use crate::comm::{CacheIo, Communicator};
use crate::error::{CacheError, CacheResult};
use crate::flist::codec::RecordCodec;
use crate::flist::names::NameTable;
use crate::flist::FileList;

/// Read a cache file into a freshly sharded distributed list
///
/// Collective: every participant must call with the same path. On any
/// error no list is produced.
pub fn read_cache<C: Communicator>(path: &Path, comm: &C) -> CacheResult<FileList> {
    let file = comm.open_read(path).map_err(|source| CacheError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let version = read_header_words(&file, 0, 1, comm)?[0];
    let disp = WORD;

    let list = match version {
        VERSION_LITE => read_cache_v2(&file, disp, comm)?,
        VERSION_DETAIL => read_cache_v3(&file, disp, comm)?,
        other => {
            warn!(path = %path.display(), version = other, "Unknown cache version");
            return Err(CacheError::UnsupportedVersion(other));
        }
    };

    info!(
        path = %path.display(),
        version,
        total = list.global_size(),
        local = list.local_size(),
        "Cache read"
    );
    Ok(list)
}

fn read_cache_v2<C: Communicator>(
    file: &C::CacheFile,
    mut disp: u64,
    comm: &C,
) -> CacheResult<FileList> {
    let mut list = FileList::new();
    list.set_detail(false);

    let header = read_header_words(file, disp, V2_HEADER_WORDS, comm)?;
    disp += V2_HEADER_WORDS * WORD;

    // walk_start and walk_end (header[0], header[1]) are not retained
    let all_count = header[2];
    let path_stride = header[3];
    list.set_total_files(all_count);

    let (count, offset) = partition(all_count, comm);

    if all_count > 0 && path_stride > 0 {
        let codec = RecordCodec::new(path_stride, false);
        let mut buf = vec![0u8; (count * codec.extent()) as usize];
        file.read_at(disp + offset * codec.extent(), &mut buf)?;

        for frame in buf.chunks_exact(codec.extent() as usize) {
            list.insert_record(codec.decode(frame));
        }
    }

    Ok(list)
}

fn read_cache_v3<C: Communicator>(
    file: &C::CacheFile,
    mut disp: u64,
    comm: &C,
) -> CacheResult<FileList> {
    let mut list = FileList::new();
    list.set_detail(true);

    let header = read_header_words(file, disp, V3_HEADER_WORDS, comm)?;
    disp += V3_HEADER_WORDS * WORD;

    let users_count = header[2];
    let users_stride = header[3];
    let groups_count = header[4];
    let groups_stride = header[5];
    let all_count = header[6];
    let path_stride = header[7];
    list.set_total_files(all_count);

    let (users, advance) = read_table(file, disp, users_count, users_stride, comm)?;
    list.set_users(users);
    disp += advance;

    let (groups, advance) = read_table(file, disp, groups_count, groups_stride, comm)?;
    list.set_groups(groups);
    disp += advance;

    let (count, offset) = partition(all_count, comm);

    if all_count > 0 && path_stride > 0 {
        let codec = RecordCodec::new(path_stride, true);
        let mut buf = vec![0u8; (count * codec.extent()) as usize];
        file.read_at(disp + offset * codec.extent(), &mut buf)?;

        for frame in buf.chunks_exact(codec.extent() as usize) {
            list.insert_record(codec.decode(frame));
        }
    }

    Ok(list)
}

/// This participant's record count and starting global index
fn partition<C: Communicator>(all_count: u64, comm: &C) -> (u64, u64) {
    let ranks = comm.size() as u64;
    let rank = comm.rank() as u64;

    let mut count = all_count / ranks;
    if rank < all_count % ranks {
        count += 1;
    }

    let mut offset = comm.exscan_sum(count);
    if rank == 0 {
        offset = 0;
    }
    (count, offset)
}

/// Participant 0 reads one replicated name/id array and broadcasts it;
/// returns the rebuilt table and the shared displacement advance
fn read_table<C: Communicator>(
    file: &C::CacheFile,
    disp: u64,
    count: u64,
    stride: u64,
    comm: &C,
) -> CacheResult<(NameTable, u64)> {
    if count == 0 || stride == 0 {
        return Ok((NameTable::empty(), 0));
    }

    let bytes = count * pair_extent(stride);
    let mut status = [1u64];
    let mut packed = Vec::new();
    if comm.rank() == 0 {
        packed = vec![0u8; bytes as usize];
        if let Err(e) = file.read_at(disp, &mut packed) {
            warn!(error = %e, "Failed to read name table");
            status[0] = 0;
        }
    }
    comm.broadcast_u64s(0, &mut status);
    if status[0] == 0 {
        return Err(CacheError::Header);
    }
    comm.broadcast_bytes(0, &mut packed);

    Ok((NameTable::from_packed(packed, count, stride), bytes))
}

/// Participant 0 reads `words` u64s at `disp`; the values and the read
/// status are broadcast so all participants agree on both
fn read_header_words<C: Communicator>(
    file: &C::CacheFile,
    disp: u64,
    words: u64,
    comm: &C,
) -> CacheResult<Vec<u64>> {
    let mut payload = vec![0u64; words as usize + 1];
    if comm.rank() == 0 {
        let mut bytes = vec![0u8; (words * WORD) as usize];
        match file.read_at(disp, &mut bytes) {
            Ok(()) => {
                payload[0] = 1;
                for (i, chunk) in bytes.chunks_exact(WORD as usize).enumerate() {
                    payload[i + 1] = u64::from_be_bytes(chunk.try_into().unwrap());
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to read cache header");
                payload[0] = 0;
            }
        }
    }
    comm.broadcast_u64s(0, &mut payload);
    if payload[0] == 0 {
        return Err(CacheError::Header);
    }
    Ok(payload.split_off(1))
}
