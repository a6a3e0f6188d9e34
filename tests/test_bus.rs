// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Dispatcher tests: the send / publish / receive paths end to end over real
// SysV queues, with routing state in a registry file per test.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use mqbus::{Bus, BusError, DeliveryMode, Message, MsgQueue, Registry};
use tempfile::TempDir;

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_key() -> i32 {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed) as i32;
    ((std::process::id() as i32 & 0x7fff) << 12) | (n & 0xfff)
}

/// Two registered participants: sid 1 (tag 5) and sid 2 (tag 6), with room
/// for two type records.
fn two_party_setup(dir: &TempDir) -> (PathBuf, i32, i32) {
    let path = dir.path().join("bus.reg");
    let (k1, k2) = (unique_key(), unique_key());
    Registry::create(&path, 2, 2).unwrap();
    let mut reg = Registry::open(&path).unwrap();
    reg.add_server(1, k1, 5).unwrap();
    reg.add_server(2, k2, 6).unwrap();
    (path, k1, k2)
}

fn teardown(path: &PathBuf) {
    let mut reg = Registry::open(path).unwrap();
    reg.end(true);
}

#[test]
fn connect_rejects_zero_sid() {
    let dir = TempDir::new().unwrap();
    let (path, ..) = two_party_setup(&dir);

    assert!(matches!(
        Bus::connect(&path, 0),
        Err(BusError::InvalidParameter(_))
    ));
    assert!(Bus::connect(&path, 1).is_ok());

    teardown(&path);
}

#[test]
fn point_to_point_send_and_recv() {
    let dir = TempDir::new().unwrap();
    let (path, ..) = two_party_setup(&dir);
    let alice = Bus::connect(&path, 1).unwrap();
    let bob = Bus::connect(&path, 2).unwrap();

    let mut msg = Message::new();
    msg.set_property("subject", "ping").unwrap();
    msg.set_body(b"hello bob").unwrap();
    alice.send(2, &mut msg).unwrap();

    let mut inbox = Message::new();
    let n = bob.recv(&mut inbox).unwrap();
    assert_eq!(n, msg.len());
    assert_eq!(inbox.mode(), DeliveryMode::PointToPoint);
    assert_eq!(inbox.source(), 1);
    assert_eq!(inbox.dest(), 2);
    assert_eq!(inbox.body(), b"hello bob");
    assert_eq!(inbox.get_property("subject"), Some("ping"));

    teardown(&path);
}

#[test]
fn send_to_unknown_sid_delivers_nothing() {
    let dir = TempDir::new().unwrap();
    let (path, _, k2) = two_party_setup(&dir);
    let alice = Bus::connect(&path, 1).unwrap();

    let mut msg = Message::new();
    let err = alice.send(7, &mut msg).unwrap_err();
    assert!(matches!(err, BusError::ServerInfoNotFound(7)));

    // Routing failed before any transport call.
    let info = MsgQueue::lookup(k2).unwrap().info().unwrap();
    assert_eq!(info.message_count, 0);

    teardown(&path);
}

#[test]
fn send_to_self_uses_explicit_tag() {
    let dir = TempDir::new().unwrap();
    let (path, ..) = two_party_setup(&dir);
    let alice = Bus::connect(&path, 1).unwrap();

    let mut msg = Message::new();
    msg.set_body(b"note to self").unwrap();
    alice.send_to_self(9, &mut msg).unwrap();

    // The default tag (5) sees nothing.
    let mut inbox = Message::new();
    assert!(matches!(
        alice.recv_nonblock(&mut inbox),
        Err(BusError::NoMessage)
    ));
    let n = alice.recv_type_nonblock(9, &mut inbox).unwrap();
    assert_eq!(n, msg.len());
    assert_eq!(inbox.body(), b"note to self");
    assert_eq!(inbox.dest(), 1);

    // And the default-tag loopback.
    alice.send_to_self_default(&mut msg).unwrap();
    alice.recv_nonblock(&mut inbox).unwrap();
    assert_eq!(inbox.body(), b"note to self");

    teardown(&path);
}

#[test]
fn publish_reaches_every_subscriber() {
    let dir = TempDir::new().unwrap();
    let (path, ..) = two_party_setup(&dir);
    {
        let mut reg = Registry::open(&path).unwrap();
        reg.add_type(42, 1).unwrap();
        reg.add_type(42, 2).unwrap();
    }
    let alice = Bus::connect(&path, 1).unwrap();
    let bob = Bus::connect(&path, 2).unwrap();

    let mut msg = Message::new();
    msg.set_body(b"broadcast").unwrap();
    alice.publish(42, &mut msg).unwrap();
    assert_eq!(msg.mode(), DeliveryMode::Publish);
    assert_eq!(msg.msg_type(), 42);

    for bus in [&alice, &bob] {
        let mut inbox = Message::new();
        bus.recv(&mut inbox).unwrap();
        assert_eq!(inbox.mode(), DeliveryMode::Publish);
        assert_eq!(inbox.msg_type(), 42);
        assert_eq!(inbox.source(), 1);
        assert_eq!(inbox.body(), b"broadcast");
    }

    teardown(&path);
}

#[test]
fn publish_without_subscribers_fails() {
    let dir = TempDir::new().unwrap();
    let (path, _, k2) = two_party_setup(&dir);
    {
        let mut reg = Registry::open(&path).unwrap();
        reg.add_type(42, 2).unwrap();
    }
    let alice = Bus::connect(&path, 1).unwrap();

    let mut msg = Message::new();
    let err = alice.publish(99, &mut msg).unwrap_err();
    assert!(matches!(err, BusError::TypeInfoNotFound(99)));
    let info = MsgQueue::lookup(k2).unwrap().info().unwrap();
    assert_eq!(info.message_count, 0);

    teardown(&path);
}

#[test]
fn publish_failure_reports_progress() {
    let dir = TempDir::new().unwrap();
    let (path, _, k2) = two_party_setup(&dir);
    {
        let mut reg = Registry::open(&path).unwrap();
        reg.add_type(42, 1).unwrap();
        reg.add_type(42, 2).unwrap();
    }
    let alice = Bus::connect(&path, 1).unwrap();

    // Pull the second subscriber's queue out from under the fanout.
    MsgQueue::lookup(k2).unwrap().remove().unwrap();

    let mut msg = Message::new();
    let err = alice.publish(42, &mut msg).unwrap_err();
    match err {
        BusError::PublishFailed { delivered, index, cause } => {
            assert_eq!(delivered, 1);
            assert_eq!(index, 1);
            assert!(matches!(*cause, BusError::QueueMissing));
        }
        other => panic!("unexpected error: {other}"),
    }

    // The first delivery stands.
    let mut inbox = Message::new();
    alice.recv(&mut inbox).unwrap();
    assert_eq!(inbox.msg_type(), 42);

    teardown(&path);
}

#[test]
fn recv_nonblock_on_empty_queue() {
    let dir = TempDir::new().unwrap();
    let (path, ..) = two_party_setup(&dir);
    let bob = Bus::connect(&path, 2).unwrap();

    let mut inbox = Message::new();
    assert!(matches!(
        bob.recv_nonblock(&mut inbox),
        Err(BusError::NoMessage)
    ));

    teardown(&path);
}

#[test]
fn validate_detects_missing_queue() {
    let dir = TempDir::new().unwrap();
    let (path, k1, _) = two_party_setup(&dir);
    let alice = Bus::connect(&path, 1).unwrap();

    alice.validate().unwrap();
    MsgQueue::lookup(k1).unwrap().remove().unwrap();
    assert!(matches!(alice.validate(), Err(BusError::QueueMissing)));

    // An unregistered sid cannot validate at all.
    let ghost = Bus::connect(&path, 9).unwrap();
    assert!(matches!(
        ghost.validate(),
        Err(BusError::ServerInfoNotFound(9))
    ));

    teardown(&path);
}

#[test]
fn queue_inspection_and_drain() {
    let dir = TempDir::new().unwrap();
    let (path, k1, _) = two_party_setup(&dir);
    let alice = Bus::connect(&path, 1).unwrap();

    let mut msg = Message::new();
    alice.send_to_self_default(&mut msg).unwrap();
    alice.send_to_self_default(&mut msg).unwrap();

    let queue = MsgQueue::lookup(k1).unwrap();
    assert_eq!(queue.info().unwrap().message_count, 2);
    assert_eq!(queue.clear().unwrap(), 2);
    assert_eq!(queue.info().unwrap().message_count, 0);

    teardown(&path);
}

#[test]
fn end_with_release_tears_the_bus_down() {
    let dir = TempDir::new().unwrap();
    let (path, k1, k2) = two_party_setup(&dir);
    let alice = Bus::connect(&path, 1).unwrap();

    alice.end(true);
    assert_eq!(MsgQueue::lookup(k1).unwrap_err().raw_os_error(), Some(libc::ENOENT));
    assert_eq!(MsgQueue::lookup(k2).unwrap_err().raw_os_error(), Some(libc::ENOENT));
    let reg = Registry::open(&path).unwrap();
    assert_eq!(reg.server_count(), 0);
}
