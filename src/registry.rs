// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The shared routing registry: a fixed-size binary segment in a memory-mapped
// file, holding the server records (sid -> transport queue) and the type
// records (published type -> subscribing server index).
//
// Layout (host-native byte order, offsets fixed at creation):
//
//   0    u32  total_size
//   4    u16  max_servers
//   6    u16  max_types
//   8    u16  server_offset         (= 14)
//   10   u16  type_section_offset   (= 14 + max_servers * 16)
//   12   u16  server_count
//   14   [ServerRecord; max_servers], 16 bytes each
//   t    u16  type_list_offset      (= t + 4)
//   t+2  u16  type_count
//   t+4  [TypeRecord; max_types], 8 bytes each
//
// Record arrays start at 2-byte-aligned offsets, so all field access goes
// through unaligned byte copies. Capacities never change after creation.
//
// Mutation operations are unsynchronized in-place writes: the bus assumes a
// single administrative writer at a time, with any number of concurrent
// readers. This is a documented precondition, not an oversight.

use std::fmt;
use std::path::Path;

use tracing::warn;

use crate::error::{BusError, Result};
use crate::mmap::MappedRegion;
use crate::msq::MsgQueue;

const OFF_TOTAL_SIZE: usize = 0;
const OFF_MAX_SERVERS: usize = 4;
const OFF_MAX_TYPES: usize = 6;
const OFF_SERVER_OFFSET: usize = 8;
const OFF_TYPE_SECTION: usize = 10;
const OFF_SERVER_COUNT: usize = 12;
const SERVER_BASE: usize = 14;

/// Fixed header bytes before the server record array.
const HEADER_SIZE: usize = SERVER_BASE;
/// Bytes between the type section start and the type record array
/// (type_list_offset word + type_count word).
const TYPE_SECTION_HEADER: usize = 4;

pub const SERVER_RECORD_SIZE: usize = 16;
pub const TYPE_RECORD_SIZE: usize = 8;

/// One server record: a process identity bound to its transport queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerRecord {
    /// Process identity (unique within the registry).
    pub sid: u32,
    /// SysV key of the process's queue.
    pub queue_key: i32,
    /// Cached kernel queue id, resolved when the record was written.
    pub queue_id: i32,
    /// Transport tag the process receives on by default.
    pub queue_tag: u32,
}

impl ServerRecord {
    fn decode(raw: &[u8]) -> Self {
        Self {
            sid: read_u32(raw, 0),
            queue_key: read_u32(raw, 4) as i32,
            queue_id: read_u32(raw, 8) as i32,
            queue_tag: read_u32(raw, 12),
        }
    }

    fn encode(&self, raw: &mut [u8]) {
        write_u32(raw, 0, self.sid);
        write_u32(raw, 4, self.queue_key as u32);
        write_u32(raw, 8, self.queue_id as u32);
        write_u32(raw, 12, self.queue_tag);
    }
}

/// One type record: a published message type and one subscriber, addressed by
/// its server record index. Types are not unique — each `(type, subscriber)`
/// pair is its own record, making the list a multimap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeRecord {
    pub msg_type: u32,
    pub server_index: u16,
}

impl TypeRecord {
    fn decode(raw: &[u8]) -> Self {
        Self {
            msg_type: read_u32(raw, 0),
            server_index: read_u16(raw, 4),
        }
    }

    fn encode(&self, raw: &mut [u8]) {
        write_u32(raw, 0, self.msg_type);
        write_u16(raw, 4, self.server_index);
        // Two pad bytes stay zero.
    }
}

/// All derived offsets and capacities, decoded once from the segment header.
#[derive(Debug, Clone, Copy)]
struct Descriptor {
    max_servers: usize,
    max_types: usize,
    server_base: usize,
    type_count_off: usize,
    type_base: usize,
}

impl Descriptor {
    fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < HEADER_SIZE {
            return Err(BusError::NotInitialized);
        }
        let max_servers = read_u16(raw, OFF_MAX_SERVERS) as usize;
        let max_types = read_u16(raw, OFF_MAX_TYPES) as usize;
        let server_base = read_u16(raw, OFF_SERVER_OFFSET) as usize;
        let type_section = read_u16(raw, OFF_TYPE_SECTION) as usize;
        if type_section + TYPE_SECTION_HEADER > raw.len() {
            return Err(BusError::NotInitialized);
        }
        let type_base = read_u16(raw, type_section) as usize;
        let desc = Self {
            max_servers,
            max_types,
            server_base,
            type_count_off: type_section + 2,
            type_base,
        };
        // The arrays must fit the mapping; beyond that the file is trusted.
        if desc.server_base + max_servers * SERVER_RECORD_SIZE > raw.len()
            || desc.type_base + max_types * TYPE_RECORD_SIZE > raw.len()
        {
            return Err(BusError::NotInitialized);
        }
        Ok(desc)
    }
}

/// Exact file size for the given capacities.
fn segment_size(max_servers: usize, max_types: usize) -> usize {
    HEADER_SIZE + max_servers * SERVER_RECORD_SIZE + TYPE_SECTION_HEADER + max_types * TYPE_RECORD_SIZE
}

/// An open handle on the shared routing registry.
///
/// Every participating process opens the same backing file once at startup;
/// mutations are visible to all of them immediately through the shared
/// mapping. Mutating methods take `&mut self` within a process, but nothing
/// synchronizes between processes — see the single-writer precondition above.
pub struct Registry {
    region: MappedRegion,
    desc: Descriptor,
}

impl Registry {
    /// Create the registry backing file with the given fixed capacities.
    ///
    /// Fails if either capacity exceeds 65535, or if the resulting layout
    /// would not be addressable by the 16-bit header offsets. The file is
    /// written zero-filled with a fully formed header and zero live counts;
    /// an existing file at `path` is truncated.
    pub fn create(path: &Path, max_servers: usize, max_types: usize) -> Result<()> {
        if max_servers > u16::MAX as usize {
            return Err(BusError::InvalidParameter("max_servers exceeds 65535"));
        }
        if max_types > u16::MAX as usize {
            return Err(BusError::InvalidParameter("max_types exceeds 65535"));
        }
        let total = segment_size(max_servers, max_types);
        let type_section = SERVER_BASE + max_servers * SERVER_RECORD_SIZE;
        if type_section + TYPE_SECTION_HEADER > u16::MAX as usize {
            return Err(BusError::OutOfRange("registry layout exceeds 16-bit offsets"));
        }

        let mut image = vec![0u8; total];
        write_u32(&mut image, OFF_TOTAL_SIZE, total as u32);
        write_u16(&mut image, OFF_MAX_SERVERS, max_servers as u16);
        write_u16(&mut image, OFF_MAX_TYPES, max_types as u16);
        write_u16(&mut image, OFF_SERVER_OFFSET, SERVER_BASE as u16);
        write_u16(&mut image, OFF_TYPE_SECTION, type_section as u16);
        write_u16(&mut image, type_section, (type_section + TYPE_SECTION_HEADER) as u16);
        std::fs::write(path, &image).map_err(BusError::Transport)?;
        Ok(())
    }

    /// Map an existing registry file.
    ///
    /// The mapping length comes from the file's own stored size field;
    /// a zero size fails with `NotInitialized`. No further corruption
    /// checking is done — the backing file is trusted.
    pub fn open(path: &Path) -> Result<Self> {
        let stored = MappedRegion::stored_size(path).map_err(BusError::Transport)?;
        if stored == 0 {
            return Err(BusError::NotInitialized);
        }
        let region = MappedRegion::open(path, stored as usize).map_err(BusError::Transport)?;
        let desc = Descriptor::decode(region.as_slice())?;
        Ok(Self { region, desc })
    }

    pub fn total_size(&self) -> usize {
        read_u32(self.region.as_slice(), OFF_TOTAL_SIZE) as usize
    }

    pub fn max_servers(&self) -> usize {
        self.desc.max_servers
    }

    pub fn max_types(&self) -> usize {
        self.desc.max_types
    }

    // ------------------------------------------------------------------
    // Server registry
    // ------------------------------------------------------------------

    pub fn server_count(&self) -> usize {
        read_u16(self.region.as_slice(), OFF_SERVER_COUNT) as usize
    }

    fn set_server_count(&mut self, n: usize) {
        write_u16(self.region.as_mut_slice(), OFF_SERVER_COUNT, n as u16);
    }

    fn server_raw(&self, index: usize) -> &[u8] {
        let off = self.desc.server_base + index * SERVER_RECORD_SIZE;
        &self.region.as_slice()[off..off + SERVER_RECORD_SIZE]
    }

    fn write_server(&mut self, index: usize, record: &ServerRecord) {
        let off = self.desc.server_base + index * SERVER_RECORD_SIZE;
        record.encode(&mut self.region.as_mut_slice()[off..off + SERVER_RECORD_SIZE]);
    }

    /// Register a process: creates (or opens) its transport queue for
    /// `queue_key` and appends the record.
    ///
    /// Fails with `OutOfRange` at capacity and `InvalidParameter` on a
    /// duplicate sid; in both cases nothing is changed.
    pub fn add_server(&mut self, sid: u32, queue_key: i32, queue_tag: u32) -> Result<()> {
        let count = self.server_count();
        if count >= self.desc.max_servers {
            return Err(BusError::OutOfRange("server registry is full"));
        }
        if self.find_server(sid).is_some() {
            return Err(BusError::InvalidParameter("sid already registered"));
        }
        let queue = MsgQueue::create(queue_key).map_err(BusError::Transport)?;
        let record = ServerRecord {
            sid,
            queue_key,
            queue_id: queue.id(),
            queue_tag,
        };
        self.write_server(count, &record);
        self.set_server_count(count + 1);
        Ok(())
    }

    /// Re-point an existing record at a (possibly new) queue key and tag.
    pub fn modify_server(&mut self, sid: u32, queue_key: i32, queue_tag: u32) -> Result<()> {
        let Some(index) = self.find_server(sid) else {
            return Err(BusError::ServerInfoNotFound(sid));
        };
        let queue = MsgQueue::create(queue_key).map_err(BusError::Transport)?;
        let record = ServerRecord {
            sid,
            queue_key,
            queue_id: queue.id(),
            queue_tag,
        };
        self.write_server(index, &record);
        Ok(())
    }

    /// Drop the most recently added server record. Deleting by sid is not
    /// supported — a preserved limitation of the format.
    pub fn remove_last_server(&mut self) {
        let count = self.server_count();
        if count > 0 {
            self.set_server_count(count - 1);
        }
    }

    /// Linear scan for a sid. Returns the record and its index.
    pub fn server_by_sid(&self, sid: u32) -> Result<(ServerRecord, usize)> {
        match self.find_server(sid) {
            Some(index) => Ok((ServerRecord::decode(self.server_raw(index)), index)),
            None => Err(BusError::ServerInfoNotFound(sid)),
        }
    }

    /// Direct record access, bounds-checked against the live count.
    pub fn server_by_index(&self, index: usize) -> Result<ServerRecord> {
        if index >= self.server_count() {
            return Err(BusError::OutOfRange("server index past live count"));
        }
        Ok(ServerRecord::decode(self.server_raw(index)))
    }

    /// Diagnostic: how many live records share a transport key.
    pub fn count_queue_key(&self, queue_key: i32) -> usize {
        self.servers().filter(|r| r.queue_key == queue_key).count()
    }

    /// Enumerate the live server records in index order.
    pub fn servers(&self) -> impl Iterator<Item = ServerRecord> + '_ {
        (0..self.server_count()).map(|i| ServerRecord::decode(self.server_raw(i)))
    }

    fn find_server(&self, sid: u32) -> Option<usize> {
        (0..self.server_count()).position(|i| ServerRecord::decode(self.server_raw(i)).sid == sid)
    }

    // ------------------------------------------------------------------
    // Type registry
    // ------------------------------------------------------------------

    pub fn type_count(&self) -> usize {
        read_u16(self.region.as_slice(), self.desc.type_count_off) as usize
    }

    fn set_type_count(&mut self, n: usize) {
        let off = self.desc.type_count_off;
        write_u16(self.region.as_mut_slice(), off, n as u16);
    }

    fn type_raw(&self, index: usize) -> &[u8] {
        let off = self.desc.type_base + index * TYPE_RECORD_SIZE;
        &self.region.as_slice()[off..off + TYPE_RECORD_SIZE]
    }

    fn write_type(&mut self, index: usize, record: &TypeRecord) {
        let off = self.desc.type_base + index * TYPE_RECORD_SIZE;
        record.encode(&mut self.region.as_mut_slice()[off..off + TYPE_RECORD_SIZE]);
    }

    /// Subscribe `sid` to `msg_type`. Duplicate `(type, sid)` pairs are not
    /// rejected here; each call appends one record.
    pub fn add_type(&mut self, msg_type: u32, sid: u32) -> Result<()> {
        let count = self.type_count();
        if count >= self.desc.max_types {
            return Err(BusError::OutOfRange("type registry is full"));
        }
        let (_, server_index) = self.server_by_sid(sid)?;
        self.write_type(
            count,
            &TypeRecord {
                msg_type,
                server_index: server_index as u16,
            },
        );
        self.set_type_count(count + 1);
        Ok(())
    }

    /// Rewrite the single record matching `(old_type, old_sid)` to
    /// `(new_type, new_sid)`.
    pub fn modify_type(&mut self, old_type: u32, old_sid: u32, new_type: u32, new_sid: u32) -> Result<()> {
        if self.type_index_of(new_type, new_sid).is_some() {
            return Err(BusError::InvalidParameter("type record already exists"));
        }
        let Some(index) = self.type_index_of(old_type, old_sid) else {
            return Err(BusError::TypeInfoNotFound(old_type));
        };
        let (_, server_index) = self.server_by_sid(new_sid)?;
        self.write_type(
            index,
            &TypeRecord {
                msg_type: new_type,
                server_index: server_index as u16,
            },
        );
        Ok(())
    }

    /// Drop the most recently added type record (LIFO only, as with servers).
    pub fn remove_last_type(&mut self) {
        let count = self.type_count();
        if count > 0 {
            self.set_type_count(count - 1);
        }
    }

    /// Find the next record of `msg_type` at or after `start`.
    ///
    /// This is the fanout primitive: calling again with `index + 1` visits
    /// every subscriber exactly once. The record array is dense (LIFO-only
    /// removal leaves no holes), so the resumption never skips a match.
    pub fn find_type_from(&self, msg_type: u32, start: usize) -> Option<(TypeRecord, usize)> {
        (start..self.type_count()).find_map(|i| {
            let record = TypeRecord::decode(self.type_raw(i));
            (record.msg_type == msg_type).then_some((record, i))
        })
    }

    /// Enumerate the live type records in index order.
    pub fn types(&self) -> impl Iterator<Item = TypeRecord> + '_ {
        (0..self.type_count()).map(|i| TypeRecord::decode(self.type_raw(i)))
    }

    fn type_index_of(&self, msg_type: u32, sid: u32) -> Option<usize> {
        let (_, server_index) = self.server_by_sid(sid).ok()?;
        (0..self.type_count()).position(|i| {
            let record = TypeRecord::decode(self.type_raw(i));
            record.msg_type == msg_type && record.server_index as usize == server_index
        })
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Reset the registry: zero both live counts. With `release`, also remove
    /// every server's transport queue from the kernel first.
    pub fn end(&mut self, release: bool) {
        if release {
            for record in self.servers().collect::<Vec<_>>() {
                if let Err(err) = MsgQueue::from_id(record.queue_id).remove() {
                    warn!(sid = record.sid, qid = record.queue_id, %err, "failed to remove queue");
                }
            }
        }
        self.set_server_count(0);
        self.set_type_count(0);
    }
}

impl fmt::Display for Registry {
    /// The administrative table dump: capacities, then one line per record.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "registry: {}/{} servers, {}/{} types",
            self.server_count(),
            self.max_servers(),
            self.type_count(),
            self.max_types()
        )?;
        for (i, r) in self.servers().enumerate() {
            writeln!(
                f,
                "  server[{i}] sid={} qkey={} qid={:#010x} tag={}",
                r.sid, r.queue_key, r.queue_id, r.queue_tag
            )?;
        }
        for (i, t) in self.types().enumerate() {
            let sid = self
                .server_by_index(t.server_index as usize)
                .map(|r| r.sid)
                .unwrap_or(0);
            writeln!(
                f,
                "  type[{i}] type={} server_index={} sid={sid}",
                t.msg_type, t.server_index
            )?;
        }
        Ok(())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("max_servers", &self.desc.max_servers)
            .field("max_types", &self.desc.max_types)
            .field("server_count", &self.server_count())
            .field("type_count", &self.type_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Unaligned word helpers
// ---------------------------------------------------------------------------

fn read_u16(raw: &[u8], off: usize) -> u16 {
    let mut w = [0u8; 2];
    w.copy_from_slice(&raw[off..off + 2]);
    u16::from_ne_bytes(w)
}

fn write_u16(raw: &mut [u8], off: usize, v: u16) {
    raw[off..off + 2].copy_from_slice(&v.to_ne_bytes());
}

fn read_u32(raw: &[u8], off: usize) -> u32 {
    let mut w = [0u8; 4];
    w.copy_from_slice(&raw[off..off + 4]);
    u32::from_ne_bytes(w)
}

fn write_u32(raw: &mut [u8], off: usize, v: u32) {
    raw[off..off + 4].copy_from_slice(&v.to_ne_bytes());
}
