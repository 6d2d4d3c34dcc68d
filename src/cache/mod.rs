//! Versioned on-disk cache of a distributed file list
//!
//! The cache is a single shared file, written and read collectively. Every
//! integer is big-endian and every string sits NUL-terminated inside its
//! fixed stride, so the layout is identical on every host.
//!
//! ```text
//! version 2 (lite lists):
//!   u64 version = 2
//!   u64 walk_start            seconds since epoch
//!   u64 walk_end
//!   u64 total_files
//!   u64 path_stride           multiple of 8
//!   N x { byte[path_stride] ; type:u32 }
//!
//! version 3 (detailed lists):
//!   u64 version = 3
//!   u64 walk_start
//!   u64 walk_end
//!   u64 users_count
//!   u64 users_stride          multiple of 4
//!   u64 groups_count
//!   u64 groups_stride         multiple of 4
//!   u64 total_files
//!   u64 path_stride           multiple of 8
//!   users_count  x { byte[users_stride]  ; uid:u32 }
//!   groups_count x { byte[groups_stride] ; gid:u32 }
//!   total_files  x { byte[path_stride] ; mode:u32 ; uid:u32 ; gid:u32 ;
//!                    atime:u32 ; mtime:u32 ; ctime:u32 ; size:u64 }
//! ```
//!
//! A version-1 name-only format exists in the wild; this crate reads and
//! writes v2 and v3 only. The version word is always read first and
//! separately; the rest of the header is 4 (v2) or 8 (v3) further u64s.
//!
//! Records appear in global order: participant 0's records first, then
//! participant 1's, and so on, each shard in its own insertion order.

pub mod reader;
pub mod writer;

pub use reader::read_cache;
pub use writer::write_cache;

/// Cache format version for lite lists
pub const VERSION_LITE: u64 = 2;

/// Cache format version for detailed lists
pub const VERSION_DETAIL: u64 = 3;

/// Bytes per header word
pub const WORD: u64 = 8;

/// Header words after the version prefix, v2
pub const V2_HEADER_WORDS: u64 = 4;

/// Header words after the version prefix, v3
pub const V3_HEADER_WORDS: u64 = 8;

/// Advance distance of one packed name/id frame
pub fn pair_extent(stride: u64) -> u64 {
    stride + 4
}
