//! Packed binary layout for file records
//!
//! Two frame shapes exist, both with the path NUL-terminated inside a
//! fixed stride and every integer big-endian:
//!
//! ```text
//! lite:     path[stride] ; type:u32
//! detailed: path[stride] ; mode:u32 ; uid:u32 ; gid:u32 ;
//!           atime:u32 ; mtime:u32 ; ctime:u32 ; size:u64
//! ```
//!
//! The path stride is agreed collectively: the longest local path plus its
//! NUL, rounded up to a multiple of 8, maximized across all participants.
//! A stride of zero means every shard is empty and no frames exist at all.
//!
//! Displacement arithmetic in the cache file always uses [`RecordCodec::extent`],
//! the advance distance between consecutive frames.

use crate::comm::{Communicator, ReduceOp};
use crate::flist::{EntryType, FileRecord, StatDetail};

/// Byte footprint of the detail fields: six u32 then one u64
const DETAIL_BYTES: u64 = 6 * 4 + 8;

/// Byte footprint of the lite type field
const LITE_BYTES: u64 = 4;

/// Fixed-stride codec for one agreed frame shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordCodec {
    path_stride: u64,
    detail: bool,
}

impl RecordCodec {
    /// Build a codec from an agreed stride and detail flag
    pub fn new(path_stride: u64, detail: bool) -> Self {
        Self { path_stride, detail }
    }

    /// Agree on a codec collectively from each participant's records
    pub fn negotiate<C: Communicator>(records: &[FileRecord], detail: bool, comm: &C) -> Self {
        let local_max = records
            .iter()
            .map(|r| r.path.len() as u64 + 1)
            .max()
            .unwrap_or(0);
        let stride = comm.allreduce_u64(round_up8(local_max), ReduceOp::Max);
        Self::new(stride, detail)
    }

    /// Agreed path stride (multiple of 8; zero for an empty list)
    pub fn path_stride(&self) -> u64 {
        self.path_stride
    }

    /// Advance distance between consecutive frames
    pub fn extent(&self) -> u64 {
        self.path_stride
            + if self.detail {
                DETAIL_BYTES
            } else {
                LITE_BYTES
            }
    }

    /// Append one record's frame to `out`
    pub fn encode_into(&self, record: &FileRecord, out: &mut Vec<u8>) {
        let start = out.len();
        out.resize(start + self.path_stride as usize, 0);
        out[start..start + record.path.len()].copy_from_slice(record.path.as_bytes());

        if self.detail {
            // A detailed list can only be serialized from detailed records
            let d = record.detail.unwrap_or(StatDetail {
                mode: 0,
                uid: 0,
                gid: 0,
                atime: 0,
                mtime: 0,
                ctime: 0,
                size: 0,
            });
            out.extend_from_slice(&d.mode.to_be_bytes());
            out.extend_from_slice(&d.uid.to_be_bytes());
            out.extend_from_slice(&d.gid.to_be_bytes());
            out.extend_from_slice(&d.atime.to_be_bytes());
            out.extend_from_slice(&d.mtime.to_be_bytes());
            out.extend_from_slice(&d.ctime.to_be_bytes());
            out.extend_from_slice(&d.size.to_be_bytes());
        } else {
            out.extend_from_slice(&(record.entry_type as u32).to_be_bytes());
        }
    }

    /// Serialize a whole shard into one contiguous buffer
    pub fn encode_all(&self, records: &[FileRecord]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(records.len() * self.extent() as usize);
        for record in records {
            self.encode_into(record, &mut buf);
        }
        buf
    }

    /// Decode one frame back into a record
    ///
    /// `frame` must be exactly one extent long. Detailed frames derive
    /// the entry type from the mode bits, the same bits that produced it.
    pub fn decode(&self, frame: &[u8]) -> FileRecord {
        debug_assert_eq!(frame.len() as u64, self.extent());

        let stride = self.path_stride as usize;
        let path = path_from_stride(&frame[..stride]);
        let depth = super::path_depth(&path);

        if self.detail {
            let mode = be_u32(&frame[stride..]);
            let detail = StatDetail {
                mode,
                uid: be_u32(&frame[stride + 4..]),
                gid: be_u32(&frame[stride + 8..]),
                atime: be_u32(&frame[stride + 12..]),
                mtime: be_u32(&frame[stride + 16..]),
                ctime: be_u32(&frame[stride + 20..]),
                size: be_u64(&frame[stride + 24..]),
            };
            FileRecord {
                path,
                depth,
                entry_type: EntryType::from_mode(mode),
                detail: Some(detail),
            }
        } else {
            FileRecord {
                path,
                depth,
                entry_type: EntryType::from_u32(be_u32(&frame[stride..])),
                detail: None,
            }
        }
    }
}

/// Smallest multiple of 8 that holds `len` bytes
pub fn round_up8(len: u64) -> u64 {
    len.div_ceil(8) * 8
}

fn path_from_stride(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes(bytes[..4].try_into().unwrap())
}

fn be_u64(bytes: &[u8]) -> u64 {
    u64::from_be_bytes(bytes[..8].try_into().unwrap())
}
