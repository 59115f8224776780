//! The shared hash table: a flat, open-addressed table living in a
//! memory-mapped region and touched by the acceptor's workers and the
//! janitor, always under the exclusive lock in [`crate::lock`].
//!
//! Byte layout of one slot (`E` bytes, from [`ttlcached_config::Config::slot_size`]):
//!
//! ```text
//! offset 0            : busy   (u8, 0 or 1)
//! offset 1            : tomb   (u8, 0 or 1)
//! offset 2            : key    (KMAX+1 bytes, NUL-terminated)
//! offset 2+(KMAX+1)   : value  (VMAX+1 bytes, NUL-terminated)
//! offset tick_offset  : ttl    (i32, little-endian)
//! ```
//!
//! `tick_offset` and the total slot size are computed once by
//! [`ttlcached_config::Config`] so every process derives the identical
//! layout from the identical `kmax`/`vmax`/`region_bytes`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use ttlcached_config::Config;

/// The result of a `get` or `set`, carrying everything needed to render
/// the exact wire response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ok { key: String, value: String },
    KeyTooBig,
    ValueTooBig,
    TtlTooSmall,
    KeyNotFound,
    NoEmptyCells,
}

impl Outcome {
    /// Render this outcome as the literal response line the wire protocol
    /// requires, including the trailing `\n` but not the trailing NUL
    /// (that belongs to the worker's send path, not the table).
    pub fn to_wire_line(&self) -> String {
        match self {
            Outcome::Ok { key, value } => format!("ok {key} {value}\n"),
            Outcome::KeyTooBig => "error (too big key)\n".to_string(),
            Outcome::ValueTooBig => "error (too big value)\n".to_string(),
            Outcome::TtlTooSmall => "error (TTL is less than 1)\n".to_string(),
            Outcome::KeyNotFound => "error (key doesn't exist)\n".to_string(),
            Outcome::NoEmptyCells => "error (no empty cells)\n".to_string(),
        }
    }
}

/// A typed view over the mapped region, backed by whatever byte slice the
/// caller hands in (an `&mut [u8]` carved out of a [`memmap2::MmapMut`] in
/// production, or a plain `Vec<u8>` in tests).
pub struct Table<'a> {
    region: &'a mut [u8],
    kmax: usize,
    vmax: usize,
    slot_size: usize,
    tick_offset: usize,
    capacity: usize,
}

impl<'a> Table<'a> {
    /// Build a view over `region` using the slot layout implied by
    /// `config`. `region` must be at least `config.table_capacity() *
    /// config.slot_size()` bytes — callers map exactly `region_bytes`,
    /// which already satisfies this by construction.
    pub fn new(region: &'a mut [u8], config: &Config) -> Self {
        Table {
            region,
            kmax: config.kmax,
            vmax: config.vmax,
            slot_size: config.slot_size(),
            tick_offset: config.tick_offset(),
            capacity: config.table_capacity(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently busy (live or tombstoned). Exposed for
    /// the table-occupancy metric; not part of the cache protocol.
    pub fn occupancy(&self) -> usize {
        (0..self.capacity).filter(|&i| self.busy(i)).count()
    }

    fn slot_offset(&self, index: usize) -> usize {
        index * self.slot_size
    }

    fn busy(&self, index: usize) -> bool {
        self.region[self.slot_offset(index)] != 0
    }

    fn tomb(&self, index: usize) -> bool {
        self.region[self.slot_offset(index) + 1] != 0
    }

    fn set_busy(&mut self, index: usize, value: bool) {
        let off = self.slot_offset(index);
        self.region[off] = value as u8;
    }

    fn set_tomb(&mut self, index: usize, value: bool) {
        let off = self.slot_offset(index) + 1;
        self.region[off] = value as u8;
    }

    fn key_buf(&self, index: usize) -> &[u8] {
        let start = self.slot_offset(index) + 2;
        &self.region[start..start + self.kmax + 1]
    }

    fn value_buf(&self, index: usize) -> &[u8] {
        let start = self.slot_offset(index) + 2 + self.kmax + 1;
        &self.region[start..start + self.vmax + 1]
    }

    fn read_cstr(buf: &[u8]) -> &str {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        std::str::from_utf8(&buf[..end]).unwrap_or("")
    }

    fn key_str(&self, index: usize) -> &str {
        Self::read_cstr(self.key_buf(index))
    }

    fn value_str(&self, index: usize) -> &str {
        Self::read_cstr(self.value_buf(index))
    }

    /// Write a NUL-terminated string into a fixed `field_len`-byte buffer
    /// (`field_len` includes the terminator). Caller guarantees
    /// `text.len() < field_len`.
    fn write_cstr(region: &mut [u8], offset: usize, field_len: usize, text: &str) {
        let bytes = text.as_bytes();
        region[offset..offset + bytes.len()].copy_from_slice(bytes);
        region[offset + bytes.len()] = 0;
        let _ = field_len;
    }

    fn write_key(&mut self, index: usize, key: &str) {
        let offset = self.slot_offset(index) + 2;
        Self::write_cstr(self.region, offset, self.kmax + 1, key);
    }

    fn write_value(&mut self, index: usize, value: &str) {
        let offset = self.slot_offset(index) + 2 + self.kmax + 1;
        Self::write_cstr(self.region, offset, self.vmax + 1, value);
    }

    fn ttl(&self, index: usize) -> i32 {
        let offset = self.slot_offset(index) + self.tick_offset;
        i32::from_le_bytes(self.region[offset..offset + 4].try_into().unwrap())
    }

    fn set_ttl(&mut self, index: usize, ttl: i32) {
        let offset = self.slot_offset(index) + self.tick_offset;
        self.region[offset..offset + 4].copy_from_slice(&ttl.to_le_bytes());
    }

    /// Deterministic 64-bit string hash reduced modulo the table
    /// capacity. `DefaultHasher::new()` is seeded with fixed keys (unlike
    /// `HashMap`'s `RandomState`), so this returns the same index in
    /// every process built from the same binary — required by the
    /// multi-process design.
    fn home_index(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.capacity as u64) as usize
    }

    /// Walk the probe sequence for `key`. Stops with `None` the first
    /// time a free slot is seen; returns the index of a live exact match;
    /// returns `None` after a full loop with neither.
    fn find_entry(&self, key: &str) -> Option<usize> {
        let start = self.home_index(key);
        for step in 0..self.capacity {
            let idx = (start + step) % self.capacity;
            let busy = self.busy(idx);
            let tomb = self.tomb(idx);
            if !busy && !tomb {
                return None;
            }
            if !tomb && self.key_str(idx) == key {
                return Some(idx);
            }
        }
        None
    }

    /// Walk the probe sequence for `key`, returning the first slot that
    /// is neither live nor tombstoned. Tombstones are never reused by
    /// this walk — preserved deliberately, see module docs on the
    /// janitor/tombstone contract.
    fn find_place(&self, key: &str) -> Option<usize> {
        let start = self.home_index(key);
        for step in 0..self.capacity {
            let idx = (start + step) % self.capacity;
            if !self.busy(idx) {
                return Some(idx);
            }
        }
        None
    }

    /// `get KEY`.
    pub fn get(&self, key: &str) -> Outcome {
        if key.len() >= self.kmax {
            return Outcome::KeyTooBig;
        }
        match self.find_entry(key) {
            Some(idx) => Outcome::Ok {
                key: key.to_string(),
                value: self.value_str(idx).to_string(),
            },
            None => Outcome::KeyNotFound,
        }
    }

    /// `set TTL KEY VALUE`.
    pub fn set(&mut self, ttl: i32, key: &str, value: &str) -> Outcome {
        if key.len() >= self.kmax {
            return Outcome::KeyTooBig;
        }
        if value.len() >= self.vmax {
            return Outcome::ValueTooBig;
        }
        if ttl <= 0 {
            return Outcome::TtlTooSmall;
        }

        if let Some(idx) = self.find_entry(key) {
            self.write_value(idx, value);
            self.set_ttl(idx, ttl);
            return Outcome::Ok {
                key: key.to_string(),
                value: value.to_string(),
            };
        }

        match self.find_place(key) {
            Some(idx) => {
                self.set_busy(idx, true);
                self.set_tomb(idx, false);
                self.write_key(idx, key);
                self.write_value(idx, value);
                self.set_ttl(idx, ttl);
                Outcome::Ok {
                    key: key.to_string(),
                    value: value.to_string(),
                }
            }
            None => Outcome::NoEmptyCells,
        }
    }

    /// One janitor sweep: tombstone any live slot whose `ttl` has reached
    /// zero, otherwise decrement it.
    pub fn tick(&mut self) {
        for idx in 0..self.capacity {
            if self.busy(idx) && !self.tomb(idx) {
                if self.ttl(idx) == 0 {
                    self.set_tomb(idx, true);
                } else {
                    let next = self.ttl(idx) - 1;
                    self.set_ttl(idx, next);
                }
            }
        }
    }
}
