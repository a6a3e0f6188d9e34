// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The dispatcher: a per-process bus session tying a process identity (sid) to
// the shared registry, with the send / publish / receive operations on top.
// One session per process lifetime; all routing state lives in the registry,
// so the session itself is just `(sid, registry handle)`.

use std::io;
use std::path::Path;

use tracing::{trace, warn};

use crate::error::{BusError, Result};
use crate::message::{DeliveryMode, Message};
use crate::msq::MsgQueue;
use crate::registry::{Registry, ServerRecord};

/// A connected bus session.
pub struct Bus {
    sid: u32,
    registry: Registry,
}

impl Bus {
    /// Join the bus as `sid`, opening the registry at `path`.
    ///
    /// The sid does not have to be registered yet; sending and receiving
    /// resolve records at call time, so registration may happen after
    /// connect (or in another process entirely).
    pub fn connect(path: &Path, sid: u32) -> Result<Self> {
        if sid == 0 {
            return Err(BusError::InvalidParameter("sid must be positive"));
        }
        let registry = Registry::open(path)?;
        trace!(sid, "bus session connected");
        Ok(Self { sid, registry })
    }

    pub fn sid(&self) -> u32 {
        self.sid
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Administrative access to the registry through this session.
    /// The single-writer precondition of [`Registry`] applies.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    // ------------------------------------------------------------------
    // Send
    // ------------------------------------------------------------------

    /// Point-to-point send to `dest_sid`, tagged with the destination's
    /// default queue tag.
    pub fn send(&self, dest_sid: u32, msg: &mut Message) -> Result<()> {
        self.send_stub(dest_sid, None, msg)
    }

    /// Point-to-point send with an explicit transport tag.
    pub fn send_as(&self, dest_sid: u32, tag: u32, msg: &mut Message) -> Result<()> {
        self.send_stub(dest_sid, Some(tag), msg)
    }

    /// Loop a message back onto this process's own queue under `tag`.
    pub fn send_to_self(&self, tag: u32, msg: &mut Message) -> Result<()> {
        self.send_stub(self.sid, Some(tag), msg)
    }

    /// Loop back under the process's own default tag.
    pub fn send_to_self_default(&self, msg: &mut Message) -> Result<()> {
        self.send_stub(self.sid, None, msg)
    }

    fn send_stub(&self, dest_sid: u32, tag: Option<u32>, msg: &mut Message) -> Result<()> {
        msg.set_mode(DeliveryMode::PointToPoint);
        msg.set_source(self.sid);
        msg.set_dest(dest_sid);
        msg.refresh_len();

        let (record, _) = self.registry.server_by_sid(dest_sid)?;
        let tag = tag.unwrap_or(record.queue_tag);
        trace!(source = self.sid, dest = dest_sid, tag, len = msg.len(), "send");
        MsgQueue::from_id(record.queue_id)
            .send(tag, msg.wire_bytes())
            .map_err(map_send_err)
    }

    // ------------------------------------------------------------------
    // Publish
    // ------------------------------------------------------------------

    /// Fan `msg` out to every subscriber of `msg_type`, in registration
    /// order, each tagged with its own default queue tag.
    ///
    /// With no subscribers at all this fails with `TypeInfoNotFound` and
    /// sends nothing. A failure partway through stops the fanout and reports
    /// how far it got; messages already delivered stay delivered.
    pub fn publish(&self, msg_type: u32, msg: &mut Message) -> Result<()> {
        msg.set_mode(DeliveryMode::Publish);
        msg.set_source(self.sid);
        msg.set_msg_type(msg_type);
        msg.refresh_len();

        let mut delivered = 0usize;
        let mut index = 0usize;
        while let Some((record, at)) = self.registry.find_type_from(msg_type, index) {
            let step = |cause: BusError| BusError::PublishFailed {
                delivered,
                index: at,
                cause: Box::new(cause),
            };
            let server = self
                .registry
                .server_by_index(record.server_index as usize)
                .map_err(&step)?;
            trace!(
                source = self.sid,
                msg_type,
                dest = server.sid,
                subscriber = at,
                "publish"
            );
            MsgQueue::from_id(server.queue_id)
                .send(server.queue_tag, msg.wire_bytes())
                .map_err(|e| step(map_send_err(e)))?;
            delivered += 1;
            index = at + 1;
        }

        if delivered == 0 {
            return Err(BusError::TypeInfoNotFound(msg_type));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Receive
    // ------------------------------------------------------------------

    /// Block until a message tagged with this process's default tag arrives
    /// on its queue. Returns the wire length received.
    pub fn recv(&self, msg: &mut Message) -> Result<usize> {
        let (record, _) = self.registry.server_by_sid(self.sid)?;
        let n = MsgQueue::from_id(record.queue_id)
            .recv_tag(msg.buf_mut(), record.queue_tag, true)
            .map_err(map_recv_err)?;
        trace!(sid = self.sid, len = n, "recv");
        Ok(n)
    }

    /// Non-blocking variant of [`recv`](Self::recv); `NoMessage` when the
    /// queue holds nothing under the tag.
    pub fn recv_nonblock(&self, msg: &mut Message) -> Result<usize> {
        let (record, _) = self.registry.server_by_sid(self.sid)?;
        self.recv_tag_nonblock_on(record, record.queue_tag, msg)
    }

    /// Non-blocking receive under an explicit tag.
    pub fn recv_type_nonblock(&self, tag: u32, msg: &mut Message) -> Result<usize> {
        let (record, _) = self.registry.server_by_sid(self.sid)?;
        self.recv_tag_nonblock_on(record, tag, msg)
    }

    fn recv_tag_nonblock_on(&self, record: ServerRecord, tag: u32, msg: &mut Message) -> Result<usize> {
        let n = MsgQueue::from_id(record.queue_id)
            .recv_tag(msg.buf_mut(), tag, false)
            .map_err(map_recv_err)?;
        trace!(sid = self.sid, tag, len = n, "recv (nonblocking)");
        Ok(n)
    }

    // ------------------------------------------------------------------
    // Health and teardown
    // ------------------------------------------------------------------

    /// Check that this process's transport queue actually exists in the
    /// kernel. The registry caches queue ids, so a queue removed behind the
    /// bus's back is only caught here (by key, not by the cached id).
    pub fn validate(&self) -> Result<()> {
        let (record, _) = self.registry.server_by_sid(self.sid)?;
        match MsgQueue::lookup(record.queue_key) {
            Ok(_) => Ok(()),
            Err(err) if err.raw_os_error() == Some(libc::ENOENT) => {
                warn!(sid = self.sid, key = record.queue_key, "queue is gone");
                Err(BusError::QueueMissing)
            }
            Err(err) => Err(BusError::Transport(err)),
        }
    }

    /// Shut the session down. With `release`, every registered queue is
    /// removed from the kernel; the registry counts are zeroed either way.
    pub fn end(mut self, release: bool) {
        trace!(sid = self.sid, release, "bus session ending");
        self.registry.end(release);
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus").field("sid", &self.sid).finish()
    }
}

// ---------------------------------------------------------------------------
// Errno mapping
// ---------------------------------------------------------------------------

fn map_send_err(err: io::Error) -> BusError {
    match err.raw_os_error() {
        Some(libc::EINTR) => BusError::Interrupted,
        Some(libc::EINVAL) | Some(libc::EIDRM) => {
            warn!(%err, "send failed, queue invalid or removed");
            BusError::QueueMissing
        }
        Some(libc::ENOMEM) | Some(libc::E2BIG) => BusError::MessageTooLarge,
        _ => BusError::Transport(err),
    }
}

fn map_recv_err(err: io::Error) -> BusError {
    match err.raw_os_error() {
        Some(libc::EINTR) => BusError::Interrupted,
        Some(libc::E2BIG) => BusError::ReceiveBufferTooSmall,
        Some(libc::EINVAL) | Some(libc::EIDRM) => {
            warn!(%err, "receive failed, queue invalid or removed");
            BusError::QueueMissing
        }
        Some(libc::ENOMSG) => BusError::NoMessage,
        _ => BusError::Transport(err),
    }
}
