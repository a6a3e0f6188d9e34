// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Single-host inter-process message bus over SysV message queues. Routing
// state lives in a shared memory-mapped registry file: server records map a
// process identity (sid) to its queue, type records map published message
// types to their subscribers. Messages travel in a fixed-capacity buffer
// carrying a header, packed `name=value` properties and an opaque body.

mod error;
pub use error::{BusError, Result};

mod mmap;
pub use mmap::MappedRegion;

mod msq;
pub use msq::{MsgQueue, QueueInfo};

mod props;

mod message;
pub use message::{
    DeliveryMode, Message, EMPTY_MESSAGE_LEN, HEADER_SIZE, MESSAGE_CAPACITY, PROP_HEADER_SIZE,
};

mod registry;
pub use registry::{Registry, ServerRecord, TypeRecord};

mod bus;
pub use bus::Bus;

pub mod config;
