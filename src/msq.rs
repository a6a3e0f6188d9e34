// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// SysV message-queue transport adapter.
// A queue moves tagged byte payloads between processes on one host; the tag
// (SysV `mtype`) allows selective receive. Queues are kernel objects keyed by
// an integer and persist until explicitly removed, so dropping a `MsgQueue`
// never destroys the underlying queue.

use std::io;
use std::mem;

use crate::message::MESSAGE_CAPACITY;

/// Read/write permissions for everyone on the host; participants are trusted
/// (authentication is an explicit non-goal of the bus).
const QUEUE_PERMS: libc::c_int = 0o666;

/// Wire layout expected by msgsnd/msgrcv: the tag word followed by payload.
#[repr(C)]
struct WireBuf {
    mtype: libc::c_long,
    mtext: [u8; MESSAGE_CAPACITY],
}

impl WireBuf {
    fn zeroed(tag: u32) -> Self {
        Self {
            mtype: tag as libc::c_long,
            mtext: [0u8; MESSAGE_CAPACITY],
        }
    }
}

/// Handle to one SysV message queue, identified by the kernel queue id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgQueue {
    id: i32,
}

/// Counters and timestamps from `msgctl(IPC_STAT)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueInfo {
    /// Messages currently on the queue.
    pub message_count: u64,
    /// Maximum number of bytes allowed on the queue.
    pub max_bytes: u64,
    /// Time of the last msgsnd (unix seconds, 0 if never).
    pub last_send: i64,
    /// Time of the last msgrcv (unix seconds, 0 if never).
    pub last_recv: i64,
}

impl MsgQueue {
    /// Open the queue for `key`, creating it if it does not exist.
    pub fn create(key: i32) -> io::Result<Self> {
        let id = unsafe { libc::msgget(key, libc::IPC_CREAT | QUEUE_PERMS) };
        if id < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { id })
    }

    /// Look up an existing queue by key without creating it.
    /// `ENOENT` means the queue is absent.
    pub fn lookup(key: i32) -> io::Result<Self> {
        let id = unsafe { libc::msgget(key, 0) };
        if id < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { id })
    }

    /// Wrap a queue id cached in a registry record.
    pub fn from_id(id: i32) -> Self {
        Self { id }
    }

    /// Kernel queue id.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Send `payload` tagged with `tag`. Blocks if the queue is full.
    pub fn send(&self, tag: u32, payload: &[u8]) -> io::Result<()> {
        if tag == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "tag must be positive"));
        }
        if payload.len() > MESSAGE_CAPACITY {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "payload exceeds message capacity",
            ));
        }
        let mut wire = WireBuf::zeroed(tag);
        wire.mtext[..payload.len()].copy_from_slice(payload);
        let ret = unsafe {
            libc::msgsnd(
                self.id,
                &wire as *const WireBuf as *const libc::c_void,
                payload.len(),
                0,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Receive the next message tagged `tag` into `out`, returning its length.
    ///
    /// With `blocking` the call suspends until a message arrives, the queue is
    /// removed, or the call is interrupted. Without it, an empty queue fails
    /// with `ENOMSG`.
    pub fn recv_tag(&self, out: &mut [u8], tag: u32, blocking: bool) -> io::Result<usize> {
        let mut wire = WireBuf::zeroed(0);
        let flags = if blocking { 0 } else { libc::IPC_NOWAIT };
        let n = unsafe {
            libc::msgrcv(
                self.id,
                &mut wire as *mut WireBuf as *mut libc::c_void,
                MESSAGE_CAPACITY,
                tag as libc::c_long,
                flags,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        let n = n as usize;
        if n > out.len() {
            // The kernel accepted it but the caller's buffer cannot hold it.
            return Err(io::Error::from_raw_os_error(libc::E2BIG));
        }
        out[..n].copy_from_slice(&wire.mtext[..n]);
        Ok(n)
    }

    /// Queue counters and timestamps.
    pub fn info(&self) -> io::Result<QueueInfo> {
        let mut ds: libc::msqid_ds = unsafe { mem::zeroed() };
        let ret = unsafe { libc::msgctl(self.id, libc::IPC_STAT, &mut ds) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(QueueInfo {
            message_count: ds.msg_qnum as u64,
            max_bytes: ds.msg_qbytes as u64,
            last_send: ds.msg_stime as i64,
            last_recv: ds.msg_rtime as i64,
        })
    }

    /// Drain every pending message, regardless of tag.
    pub fn clear(&self) -> io::Result<usize> {
        let mut wire = WireBuf::zeroed(0);
        let mut drained = 0usize;
        loop {
            let n = unsafe {
                libc::msgrcv(
                    self.id,
                    &mut wire as *mut WireBuf as *mut libc::c_void,
                    MESSAGE_CAPACITY,
                    0, // any tag
                    libc::IPC_NOWAIT,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::ENOMSG) {
                    return Ok(drained);
                }
                return Err(err);
            }
            drained += 1;
        }
    }

    /// Remove the queue from the kernel. Pending messages are discarded.
    pub fn remove(&self) -> io::Result<()> {
        let ret = unsafe { libc::msgctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
