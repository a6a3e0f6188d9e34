// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Fixed-capacity wire message: header, packed property span, body.
//
// Layout (host-native byte order, fixed offsets):
//
//   0   u64  total_len          (header + prop header + props + body-len + body)
//   8   u16  msg_id             (reserved)
//   12  u32  msg_type
//   16  u8   mode               (0 = P2P, 1 = PUB)
//   20  u32  source_sid
//   24  u32  dest_sid
//   28  u32  reply_to_sid
//   32  u64  timestamp          (reserved)
//   40  u64  expiration         (reserved)
//   48  u64  prop_len           (packed property bytes, terminators included)
//   64  u64  body_len
//   72  body bytes, immediately followed by the packed property span
//
// Body and properties share one contiguous tail region (body first), so
// resizing the body relocates the whole property span by the delta. A message
// received off a queue is read through the same accessors with no separate
// deserialization pass.

use std::fmt;

use crate::error::{BusError, Result};
use crate::props;

/// Fixed wire capacity of one message, including all headers.
pub const MESSAGE_CAPACITY: usize = 4096;

/// Fixed header size (total_len through expiration).
pub const HEADER_SIZE: usize = 48;
/// Property-section header size (prop_len plus reserved pad).
pub const PROP_HEADER_SIZE: usize = 16;
/// Size of the body length field.
pub const BODY_LEN_SIZE: usize = 8;
/// Offset of the first body byte.
const DATA_OFFSET: usize = HEADER_SIZE + PROP_HEADER_SIZE + BODY_LEN_SIZE;

/// Total length of a message with no properties and no body.
pub const EMPTY_MESSAGE_LEN: usize = DATA_OFFSET;

const OFF_TOTAL_LEN: usize = 0;
const OFF_MSG_TYPE: usize = 12;
const OFF_MODE: usize = 16;
const OFF_SOURCE: usize = 20;
const OFF_DEST: usize = 24;
const OFF_REPLY_TO: usize = 28;
const OFF_PROP_LEN: usize = 48;
const OFF_BODY_LEN: usize = 64;

/// How a message was (or will be) routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeliveryMode {
    /// Point-to-point: addressed to one destination sid.
    PointToPoint = 0,
    /// Publish: fanned out to every subscriber of the message type.
    Publish = 1,
}

/// A fixed-capacity bus message.
///
/// Zero-initialized by [`Message::new`], mutated through the property/body
/// setters (each re-validates the total size before committing), and sent or
/// received as the leading `total_len` bytes of the backing buffer.
#[derive(Clone)]
pub struct Message {
    buf: [u8; MESSAGE_CAPACITY],
}

impl Message {
    /// A fresh, empty message with all header fields at their defaults.
    pub fn new() -> Self {
        let mut msg = Self { buf: [0u8; MESSAGE_CAPACITY] };
        msg.init();
        msg
    }

    /// Reset to the empty state (zero fields, no properties, no body).
    pub fn init(&mut self) {
        self.buf.fill(0);
        self.write_u64(OFF_TOTAL_LEN, EMPTY_MESSAGE_LEN as u64);
    }

    /// Total encoded length: the stored value, or the recomputed one if the
    /// stored field is zero (e.g. a buffer assembled externally).
    pub fn len(&self) -> usize {
        let stored = self.read_u64(OFF_TOTAL_LEN) as usize;
        if stored != 0 {
            stored
        } else {
            self.computed_len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.body_len() == 0 && self.prop_len() == 0
    }

    /// Recompute the total length from the section lengths and store it.
    pub fn refresh_len(&mut self) -> usize {
        let len = self.computed_len();
        self.write_u64(OFF_TOTAL_LEN, len as u64);
        len
    }

    fn computed_len(&self) -> usize {
        HEADER_SIZE + PROP_HEADER_SIZE + self.prop_len() + BODY_LEN_SIZE + self.body_len()
    }

    // ------------------------------------------------------------------
    // Header accessors
    // ------------------------------------------------------------------

    pub fn msg_type(&self) -> u32 {
        self.read_u32(OFF_MSG_TYPE)
    }

    pub fn set_msg_type(&mut self, msg_type: u32) {
        self.write_u32(OFF_MSG_TYPE, msg_type);
    }

    pub fn mode(&self) -> DeliveryMode {
        if self.buf[OFF_MODE] == DeliveryMode::Publish as u8 {
            DeliveryMode::Publish
        } else {
            DeliveryMode::PointToPoint
        }
    }

    pub fn set_mode(&mut self, mode: DeliveryMode) {
        self.buf[OFF_MODE] = mode as u8;
    }

    pub fn source(&self) -> u32 {
        self.read_u32(OFF_SOURCE)
    }

    pub fn set_source(&mut self, sid: u32) {
        self.write_u32(OFF_SOURCE, sid);
    }

    pub fn dest(&self) -> u32 {
        self.read_u32(OFF_DEST)
    }

    pub fn set_dest(&mut self, sid: u32) {
        self.write_u32(OFF_DEST, sid);
    }

    pub fn reply_to(&self) -> u32 {
        self.read_u32(OFF_REPLY_TO)
    }

    pub fn set_reply_to(&mut self, sid: u32) {
        self.write_u32(OFF_REPLY_TO, sid);
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    /// Encoded property bytes (terminators included).
    pub fn prop_len(&self) -> usize {
        self.read_u64(OFF_PROP_LEN) as usize
    }

    /// Look up a property value. `None` if absent (or not valid UTF-8).
    pub fn get_property(&self, name: &str) -> Option<&str> {
        let start = self.props_start();
        let span = &self.buf[start..start + self.prop_len()];
        props::get(span, name).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Set `name` to `value`, appending or rewriting in place.
    ///
    /// First-seen property order is preserved; a value-length change shifts
    /// the rest of the span. Fails with `OutOfRange` — leaving the message
    /// untouched — when the result would not fit the capacity.
    pub fn set_property(&mut self, name: &str, value: &str) -> Result<()> {
        if name.is_empty() || name.contains('=') || name.contains('\0') {
            return Err(BusError::InvalidParameter("property name"));
        }
        if value.contains('\0') {
            return Err(BusError::InvalidParameter("property value"));
        }
        let start = self.props_start();
        let budget = MESSAGE_CAPACITY - start;
        let len = self.prop_len();
        let new_len = props::set(&mut self.buf[start..], len, budget, name, value)?;
        self.write_u64(OFF_PROP_LEN, new_len as u64);
        self.refresh_len();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Body
    // ------------------------------------------------------------------

    pub fn body_len(&self) -> usize {
        self.read_u64(OFF_BODY_LEN) as usize
    }

    pub fn body(&self) -> &[u8] {
        &self.buf[DATA_OFFSET..DATA_OFFSET + self.body_len()]
    }

    /// Replace the body. The property span, which sits directly behind the
    /// body bytes, is relocated by the length delta. Fails with `OutOfRange`
    /// — message untouched — when the new total would exceed the capacity.
    pub fn set_body(&mut self, body: &[u8]) -> Result<()> {
        let prop_len = self.prop_len();
        let new_total = HEADER_SIZE + PROP_HEADER_SIZE + prop_len + BODY_LEN_SIZE + body.len();
        if new_total > MESSAGE_CAPACITY {
            return Err(BusError::OutOfRange("body does not fit the message"));
        }
        let old_start = self.props_start();
        let new_start = DATA_OFFSET + body.len();
        if prop_len > 0 && new_start != old_start {
            self.buf.copy_within(old_start..old_start + prop_len, new_start);
        }
        self.buf[DATA_OFFSET..DATA_OFFSET + body.len()].copy_from_slice(body);
        self.write_u64(OFF_BODY_LEN, body.len() as u64);
        self.refresh_len();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Raw access for the transport
    // ------------------------------------------------------------------

    /// The encoded wire bytes (leading `len()` bytes of the buffer).
    pub fn wire_bytes(&self) -> &[u8] {
        &self.buf[..self.len().min(MESSAGE_CAPACITY)]
    }

    /// The whole backing buffer, for the transport to receive into.
    pub(crate) fn buf_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    fn props_start(&self) -> usize {
        DATA_OFFSET + self.body_len()
    }

    // ------------------------------------------------------------------
    // Unaligned field helpers
    // ------------------------------------------------------------------

    fn read_u32(&self, off: usize) -> u32 {
        let mut w = [0u8; 4];
        w.copy_from_slice(&self.buf[off..off + 4]);
        u32::from_ne_bytes(w)
    }

    fn write_u32(&mut self, off: usize, v: u32) {
        self.buf[off..off + 4].copy_from_slice(&v.to_ne_bytes());
    }

    fn read_u64(&self, off: usize) -> u64 {
        let mut w = [0u8; 8];
        w.copy_from_slice(&self.buf[off..off + 8]);
        u64::from_ne_bytes(w)
    }

    fn write_u64(&mut self, off: usize, v: u64) {
        self.buf[off..off + 8].copy_from_slice(&v.to_ne_bytes());
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("len", &self.len())
            .field("msg_type", &self.msg_type())
            .field("mode", &self.mode())
            .field("source", &self.source())
            .field("dest", &self.dest())
            .field("reply_to", &self.reply_to())
            .field("prop_len", &self.prop_len())
            .field("body_len", &self.body_len())
            .finish()
    }
}
