//! Collective cache writer
//!
//! Picks the format version from the list's detail flag, then:
//! 1. every participant serializes its shard with the collectively agreed
//!    path stride,
//! 2. each participant's starting record offset comes from an exclusive
//!    prefix sum of shard counts,
//! 3. participant 0 writes the header at displacement 0, then a barrier,
//! 4. the replicated user/group arrays (v3 only) are written by
//!    participant 0 while everyone advances the displacement identically,
//! 5. the record frame is written collectively, each participant at
//!    `base + offset * extent`.
//!
//! The file is truncated to zero by the collective open. Walk timestamps
//! are caller-supplied; passing zeros is fine for callers that do not
//! track them.
//!
//! Write failures are carried across the closing barrier rather than
//! returned immediately, so one participant's bad disk cannot strand the
//! others mid-collective.

use std::path::Path;

use tracing::info;

use crate::cache::{pair_extent, VERSION_DETAIL, VERSION_LITE, WORD};
use crate::comm::{CacheIo, Communicator};
use crate::error::{CacheError, CacheResult};
use crate::flist::codec::RecordCodec;
use crate::flist::names::NameTable;
use crate::flist::FileList;

/// Write the distributed list to a single shared cache file
///
/// Collective: every participant must call with the same path and
/// timestamps. Fatal errors are returned; the list is untouched.
pub fn write_cache<C: Communicator>(
    path: &Path,
    list: &FileList,
    walk_start: u64,
    walk_end: u64,
    comm: &C,
) -> CacheResult<()> {
    if list.have_detail() {
        write_cache_v3(path, list, walk_start, walk_end, comm)
    } else {
        write_cache_v2(path, list, walk_start, walk_end, comm)
    }
}

fn write_cache_v2<C: Communicator>(
    path: &Path,
    list: &FileList,
    walk_start: u64,
    walk_end: u64,
    comm: &C,
) -> CacheResult<()> {
    let codec = RecordCodec::negotiate(list.records_slice(), false, comm);
    let buf = codec.encode_all(list.records_slice());

    let count = list.local_size();
    let all_count = list.global_size();
    let offset = comm.exscan_sum(count);

    let file = open_for_write(path, comm)?;

    let header = [
        VERSION_LITE,
        walk_start,
        walk_end,
        all_count,
        codec.path_stride(),
    ];
    write_header(&file, &header, comm)?;
    let mut disp = header.len() as u64 * WORD;

    let mut result = Ok(());
    if codec.path_stride() > 0 {
        result = file.write_at(disp + offset * codec.extent(), &buf);
        disp += all_count * codec.extent();
    }
    comm.barrier();
    result?;

    info!(
        path = %path.display(),
        version = VERSION_LITE,
        records = all_count,
        bytes = disp,
        "Cache written"
    );
    Ok(())
}

fn write_cache_v3<C: Communicator>(
    path: &Path,
    list: &FileList,
    walk_start: u64,
    walk_end: u64,
    comm: &C,
) -> CacheResult<()> {
    let users = list.users();
    let groups = list.groups();

    let codec = RecordCodec::negotiate(list.records_slice(), true, comm);
    let buf = codec.encode_all(list.records_slice());

    let count = list.local_size();
    let all_count = list.global_size();
    let offset = comm.exscan_sum(count);

    let file = open_for_write(path, comm)?;

    let header = [
        VERSION_DETAIL,
        walk_start,
        walk_end,
        users.count(),
        users.stride(),
        groups.count(),
        groups.stride(),
        all_count,
        codec.path_stride(),
    ];
    write_header(&file, &header, comm)?;
    let mut disp = header.len() as u64 * WORD;

    let mut result = Ok(());

    // The name tables are replicated, so one participant writes them and
    // everyone advances the displacement by the same amount
    disp += write_table(&file, users, disp, comm, &mut result);
    disp += write_table(&file, groups, disp, comm, &mut result);

    if codec.path_stride() > 0 {
        if result.is_ok() {
            result = file.write_at(disp + offset * codec.extent(), &buf);
        }
        disp += all_count * codec.extent();
    }
    comm.barrier();
    result?;

    info!(
        path = %path.display(),
        version = VERSION_DETAIL,
        records = all_count,
        users = users.count(),
        groups = groups.count(),
        bytes = disp,
        "Cache written"
    );
    Ok(())
}

/// Participant 0 emits one replicated name/id array; returns the
/// displacement advance shared by every participant
fn write_table<C: Communicator>(
    file: &C::CacheFile,
    table: &NameTable,
    disp: u64,
    comm: &C,
    result: &mut std::io::Result<()>,
) -> u64 {
    if table.count() == 0 || table.stride() == 0 {
        return 0;
    }
    if comm.rank() == 0 && result.is_ok() {
        *result = file.write_at(disp, table.packed());
    }
    table.count() * pair_extent(table.stride())
}

fn open_for_write<C: Communicator>(path: &Path, comm: &C) -> CacheResult<C::CacheFile> {
    comm.open_write(path).map_err(|source| CacheError::Open {
        path: path.to_path_buf(),
        source,
    })
}

/// Participant 0 writes the header words; the status broadcast doubles as
/// the barrier that orders the header ahead of any record data
fn write_header<C: Communicator>(
    file: &C::CacheFile,
    header: &[u64],
    comm: &C,
) -> CacheResult<()> {
    let mut status = [1u64];
    if comm.rank() == 0 {
        let mut bytes = Vec::with_capacity(header.len() * WORD as usize);
        for word in header {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        if file.write_at(0, &bytes).is_err() {
            status[0] = 0;
        }
    }
    comm.broadcast_u64s(0, &mut status);
    if status[0] == 0 {
        return Err(CacheError::Header);
    }
    Ok(())
}
