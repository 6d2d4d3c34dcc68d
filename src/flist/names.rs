//! Replicated user/group name tables
//!
//! A [`NameTable`] maps numeric ids to names and back, with a packed byte
//! array backing both maps. The packed layout is one frame per entry:
//! `name[stride] ; id:u32be`, the name NUL-terminated inside its stride and
//! the stride the smallest multiple of 4 that fits the longest name plus
//! its NUL. The packed form is what travels between participants and what
//! lands in v3 cache files, so it is big-endian throughout.
//!
//! Exactly one participant enumerates the OS databases; everyone else gets
//! the packed array by broadcast, so the tables are replicated identically.
//!
//! Lookups of ids the table never saw fabricate the id's decimal rendering
//! as the name and cache it, so repeated lookups agree on every
//! participant for the life of the list.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::CStr;
use std::sync::{Mutex, PoisonError};

use tracing::warn;

use crate::comm::Communicator;
use crate::error::NameError;

/// Retry budget for transient name-database read errors
const NAME_DB_RETRIES: u32 = 3;

/// getpwent/getgrent iterate process-global state; one enumeration at a
/// time per process
static NAME_DB_LOCK: Mutex<()> = Mutex::new(());

/// Bidirectional name/id maps plus their packed backing array
#[derive(Debug, Default)]
pub struct NameTable {
    by_name: HashMap<String, u32>,
    by_id: HashMap<u32, String>,
    /// Names fabricated for ids missing from the enumeration; interior
    /// mutability keeps the table shared-read after setup while the
    /// deterministic decimal rendering keeps participants in agreement
    fabricated: RefCell<HashMap<u32, String>>,
    packed: Vec<u8>,
    count: u64,
    stride: u64,
}

impl NameTable {
    /// An empty table with zero stride
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a table from name/id pairs, computing the packed stride
    pub fn from_pairs(pairs: &[(String, u32)]) -> Self {
        let stride = pairs
            .iter()
            .map(|(name, _)| round_up4(name.len() as u64 + 1))
            .max()
            .unwrap_or(0);

        let mut packed = Vec::with_capacity(pairs.len() * (stride as usize + 4));
        for (name, id) in pairs {
            let mut frame = vec![0u8; stride as usize];
            frame[..name.len()].copy_from_slice(name.as_bytes());
            packed.extend_from_slice(&frame);
            packed.extend_from_slice(&id.to_be_bytes());
        }

        let mut table = Self {
            packed,
            count: pairs.len() as u64,
            stride,
            ..Self::default()
        };
        table.rebuild_maps();
        table
    }

    /// Rebuild a table from a packed array received by broadcast or read
    /// from a v3 cache
    pub fn from_packed(packed: Vec<u8>, count: u64, stride: u64) -> Self {
        let mut table = Self {
            packed,
            count,
            stride,
            ..Self::default()
        };
        table.rebuild_maps();
        table
    }

    fn rebuild_maps(&mut self) {
        self.by_name.clear();
        self.by_id.clear();
        let extent = self.stride as usize + 4;
        for i in 0..self.count as usize {
            let frame = &self.packed[i * extent..(i + 1) * extent];
            let name = str_from_stride(&frame[..self.stride as usize]);
            let id = u32::from_be_bytes(frame[self.stride as usize..].try_into().unwrap());
            self.by_name.insert(name.clone(), id);
            self.by_id.insert(id, name);
        }
    }

    /// Number of entries
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Packed frame stride for names (multiple of 4)
    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// The packed backing array
    pub fn packed(&self) -> &[u8] {
        &self.packed
    }

    /// Look up the id for a name
    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// Look up the name for an id, fabricating a decimal name for ids
    /// the enumeration never produced
    ///
    /// The fabrication must fit in `stride - 1` bytes; an id too wide for
    /// the packed layout is an error.
    pub fn name_of(&self, id: u32) -> Result<String, NameError> {
        if let Some(name) = self.by_id.get(&id) {
            return Ok(name.clone());
        }

        let mut fabricated = self.fabricated.borrow_mut();
        if let Some(name) = fabricated.get(&id) {
            return Ok(name.clone());
        }

        let rendered = id.to_string();
        if rendered.len() as u64 + 1 > self.stride {
            return Err(NameError::IdRenderOverflow {
                id,
                stride: self.stride,
            });
        }
        fabricated.insert(id, rendered.clone());
        Ok(rendered)
    }
}

fn round_up4(len: u64) -> u64 {
    len.div_ceil(4) * 4
}

/// Decode a NUL-terminated name out of its fixed stride
fn str_from_stride(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Fetch the user table: participant 0 enumerates, everyone replicates
pub fn fetch_users<C: Communicator>(comm: &C) -> NameTable {
    fetch_table(comm, enumerate_passwd)
}

/// Fetch the group table: participant 0 enumerates, everyone replicates
pub fn fetch_groups<C: Communicator>(comm: &C) -> NameTable {
    fetch_table(comm, enumerate_group)
}

fn fetch_table<C: Communicator>(comm: &C, enumerate: fn() -> Vec<(String, u32)>) -> NameTable {
    let table = if comm.rank() == 0 {
        NameTable::from_pairs(&enumerate())
    } else {
        NameTable::empty()
    };

    let mut dims = [table.count(), table.stride()];
    comm.broadcast_u64s(0, &mut dims);

    let mut packed = table.packed().to_vec();
    comm.broadcast_bytes(0, &mut packed);

    NameTable::from_packed(packed, dims[0], dims[1])
}

#[cfg(target_os = "linux")]
fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

#[cfg(target_os = "linux")]
fn clear_errno() {
    unsafe { *libc::__errno_location() = 0 }
}

#[cfg(target_os = "macos")]
fn errno() -> i32 {
    unsafe { *libc::__error() }
}

#[cfg(target_os = "macos")]
fn clear_errno() {
    unsafe { *libc::__error() = 0 }
}

fn is_transient(err: i32) -> bool {
    err == libc::EIO || err == libc::EINTR
}

/// Enumerate the user database with getpwent
///
/// Transient failures (EIO, EINTR) are retried a few times per entry; on
/// exhaustion the enumeration ends with whatever has been collected.
fn enumerate_passwd() -> Vec<(String, u32)> {
    let _guard = NAME_DB_LOCK
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    let mut pairs = Vec::new();
    unsafe {
        loop {
            let mut retries = NAME_DB_RETRIES;
            let entry = loop {
                clear_errno();
                let p = libc::getpwent();
                if !p.is_null() {
                    break p;
                }
                let err = errno();
                if is_transient(err) && retries > 1 {
                    retries -= 1;
                    continue;
                }
                if is_transient(err) {
                    warn!(errno = err, "User enumeration gave up after retries");
                }
                break std::ptr::null_mut();
            };
            if entry.is_null() {
                break;
            }
            let name = CStr::from_ptr((*entry).pw_name).to_string_lossy().into_owned();
            pairs.push((name, (*entry).pw_uid));
        }
        libc::endpwent();
    }
    pairs
}

/// Enumerate the group database with getgrent
fn enumerate_group() -> Vec<(String, u32)> {
    let _guard = NAME_DB_LOCK
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    let mut pairs = Vec::new();
    unsafe {
        loop {
            let mut retries = NAME_DB_RETRIES;
            let entry = loop {
                clear_errno();
                let g = libc::getgrent();
                if !g.is_null() {
                    break g;
                }
                let err = errno();
                if is_transient(err) && retries > 1 {
                    retries -= 1;
                    continue;
                }
                if is_transient(err) {
                    warn!(errno = err, "Group enumeration gave up after retries");
                }
                break std::ptr::null_mut();
            };
            if entry.is_null() {
                break;
            }
            let name = CStr::from_ptr((*entry).gr_name).to_string_lossy().into_owned();
            pairs.push((name, (*entry).gr_gid));
        }
        libc::endgrent();
    }
    pairs
}
