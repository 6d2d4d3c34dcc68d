//! Thread-backed implementation of the collective substrate
//!
//! [`LocalComm::group`] builds a set of communicators that run the whole
//! parallel job inside one process, one participant per thread. Every
//! collective is rank-0 rooted: values fan in to rank 0 over per-rank
//! mailboxes, rank 0 combines them, and the result fans back out.
//!
//! Packets are tagged with their source rank and buffered per source, so a
//! fast participant entering the next collective early cannot have its
//! packet consumed by the previous one. Within one source the channel is
//! FIFO and all participants enter collectives in the same order, which is
//! exactly the matching the tags need.
//!
//! A disconnected mailbox means a participant thread died mid-job. There
//! is no recovery protocol; the remaining participants abort.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::{CacheIo, Communicator, ReduceOp};

/// A message between participants: payload plus the sender's rank
struct Packet {
    src: usize,
    bytes: Vec<u8>,
}

/// One participant's endpoint in a thread-backed group
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Receiver<Packet>,
    peers: Vec<Sender<Packet>>,
    /// Packets that arrived ahead of the collective that wants them
    pending: RefCell<Vec<VecDeque<Vec<u8>>>>,
}

impl LocalComm {
    /// Build a group of `size` connected communicators, one per participant
    ///
    /// Each returned value is moved onto its participant's thread; the
    /// index in the vector is the rank.
    pub fn group(size: usize) -> Vec<LocalComm> {
        assert!(size > 0, "a group needs at least one participant");

        let mut senders = Vec::with_capacity(size);
        let mut receivers = Vec::with_capacity(size);
        for _ in 0..size {
            let (tx, rx) = unbounded();
            senders.push(tx);
            receivers.push(rx);
        }

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, mailbox)| LocalComm {
                rank,
                size,
                mailbox,
                peers: senders.clone(),
                pending: RefCell::new(vec![VecDeque::new(); size]),
            })
            .collect()
    }

    fn send_to(&self, dst: usize, bytes: Vec<u8>) {
        self.peers[dst]
            .send(Packet {
                src: self.rank,
                bytes,
            })
            .expect("participant lost: collective cannot complete");
    }

    /// Receive the next in-order packet from `src`, buffering strays
    fn recv_from(&self, src: usize) -> Vec<u8> {
        let mut pending = self.pending.borrow_mut();
        if let Some(bytes) = pending[src].pop_front() {
            return bytes;
        }
        loop {
            let packet = self
                .mailbox
                .recv()
                .expect("participant lost: collective cannot complete");
            if packet.src == src {
                return packet.bytes;
            }
            pending[packet.src].push_back(packet.bytes);
        }
    }

    /// Fan a value in to rank 0, combine, and fan the result back out
    fn reduce_bytes<F>(&self, value: Vec<u8>, mut combine: F) -> Vec<u8>
    where
        F: FnMut(Vec<u8>, Vec<u8>) -> Vec<u8>,
    {
        if self.rank == 0 {
            let mut acc = value;
            for src in 1..self.size {
                acc = combine(acc, self.recv_from(src));
            }
            for dst in 1..self.size {
                self.send_to(dst, acc.clone());
            }
            acc
        } else {
            self.send_to(0, value);
            self.recv_from(0)
        }
    }
}

impl Communicator for LocalComm {
    type CacheFile = LocalCacheFile;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        if self.rank == 0 {
            for src in 1..self.size {
                self.recv_from(src);
            }
            for dst in 1..self.size {
                self.send_to(dst, Vec::new());
            }
        } else {
            self.send_to(0, Vec::new());
            self.recv_from(0);
        }
    }

    fn broadcast_bytes(&self, root: usize, buf: &mut Vec<u8>) {
        if self.rank == root {
            for dst in 0..self.size {
                if dst != root {
                    self.send_to(dst, buf.clone());
                }
            }
        } else {
            *buf = self.recv_from(root);
        }
    }

    fn broadcast_u64s(&self, root: usize, vals: &mut [u64]) {
        if self.rank == root {
            let mut bytes = Vec::with_capacity(vals.len() * 8);
            for v in vals.iter() {
                bytes.extend_from_slice(&v.to_be_bytes());
            }
            for dst in 0..self.size {
                if dst != root {
                    self.send_to(dst, bytes.clone());
                }
            }
        } else {
            let bytes = self.recv_from(root);
            assert_eq!(bytes.len(), vals.len() * 8, "broadcast length mismatch");
            for (i, chunk) in bytes.chunks_exact(8).enumerate() {
                vals[i] = u64::from_be_bytes(chunk.try_into().unwrap());
            }
        }
    }

    fn allreduce_u64(&self, value: u64, op: ReduceOp) -> u64 {
        let result = self.reduce_bytes(value.to_be_bytes().to_vec(), |a, b| {
            let x = u64::from_be_bytes(a.try_into().unwrap());
            let y = u64::from_be_bytes(b.try_into().unwrap());
            op.apply_u64(x, y).to_be_bytes().to_vec()
        });
        u64::from_be_bytes(result.try_into().unwrap())
    }

    fn allreduce_i64(&self, value: i64, op: ReduceOp) -> i64 {
        let result = self.reduce_bytes(value.to_be_bytes().to_vec(), |a, b| {
            let x = i64::from_be_bytes(a.try_into().unwrap());
            let y = i64::from_be_bytes(b.try_into().unwrap());
            op.apply_i64(x, y).to_be_bytes().to_vec()
        });
        i64::from_be_bytes(result.try_into().unwrap())
    }

    fn exscan_sum(&self, value: u64) -> u64 {
        if self.rank == 0 {
            let mut values = vec![0u64; self.size];
            values[0] = value;
            for src in 1..self.size {
                let bytes = self.recv_from(src);
                values[src] = u64::from_be_bytes(bytes.try_into().unwrap());
            }
            let mut prefix = 0u64;
            for dst in 1..self.size {
                prefix += values[dst - 1];
                self.send_to(dst, prefix.to_be_bytes().to_vec());
            }
            0
        } else {
            self.send_to(0, value.to_be_bytes().to_vec());
            let bytes = self.recv_from(0);
            u64::from_be_bytes(bytes.try_into().unwrap())
        }
    }

    fn open_read(&self, path: &Path) -> io::Result<LocalCacheFile> {
        let file = File::open(path)?;
        Ok(LocalCacheFile { file })
    }

    fn open_write(&self, path: &Path) -> io::Result<LocalCacheFile> {
        if self.rank == 0 {
            // Create and truncate before anyone else touches the file
            let result = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path);
            self.barrier();
            result.map(|file| LocalCacheFile { file })
        } else {
            self.barrier();
            let file = OpenOptions::new().write(true).open(path)?;
            Ok(LocalCacheFile { file })
        }
    }
}

/// Positioned access to the shared cache file
///
/// Each participant holds its own descriptor; positioned reads and writes
/// never share a cursor, so non-overlapping collective phases need no
/// locking.
pub struct LocalCacheFile {
    file: File,
}

impl CacheIo for LocalCacheFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.read_exact_at(buf, offset)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.file.write_all_at(buf, offset)
    }
}
