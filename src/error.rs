// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error taxonomy for the bus. Every fallible operation returns one of these
// kinds; transport failures that have no specific mapping keep the original
// OS error for diagnostics.

use std::io;

/// Errors surfaced by registry, codec, and dispatcher operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// A caller-supplied argument is invalid (zero sid, duplicate record, ...).
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// The registry backing file carries a non-positive size field.
    #[error("registry segment is not initialized")]
    NotInitialized,

    /// No server record exists for the given sid.
    #[error("no server record for sid {0}")]
    ServerInfoNotFound(u32),

    /// A publish matched no subscriber of the given type.
    #[error("no subscriber for message type {0}")]
    TypeInfoNotFound(u32),

    /// A mutation would exceed a fixed capacity; nothing was changed.
    #[error("out of range: {0}")]
    OutOfRange(&'static str),

    /// A blocking transport call was interrupted; the caller must retry.
    #[error("interrupted while waiting on the message queue")]
    Interrupted,

    /// The destination queue has been removed externally.
    #[error("message queue is missing")]
    QueueMissing,

    /// The transport rejected the message as larger than its limit.
    #[error("message too large for the transport")]
    MessageTooLarge,

    /// A received message does not fit the caller's buffer.
    #[error("receive buffer too small for the queued message")]
    ReceiveBufferTooSmall,

    /// Non-blocking receive found the queue empty.
    #[error("no message on the queue")]
    NoMessage,

    /// A publish fanout failed partway; earlier deliveries are not retracted.
    #[error("publish failed at subscriber index {index} after {delivered} deliveries: {cause}")]
    PublishFailed {
        /// Number of subscribers already delivered to.
        delivered: usize,
        /// Type-record index at which the failure occurred.
        index: usize,
        #[source]
        cause: Box<BusError>,
    },

    /// Any other transport or OS failure, errno preserved.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, BusError>;
