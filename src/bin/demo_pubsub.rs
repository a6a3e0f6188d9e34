// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// End-to-end bus walkthrough in a single process:
// create a registry, register two participants, subscribe the second one to
// a message type, publish from the first, receive at the second, tear down.
//
// Usage:
//   demo_pubsub [registry-file]
//
// The registry file defaults to /tmp/mqbus_demo.reg. Queue keys are derived
// from the pid so repeated runs do not collide.

use std::path::PathBuf;

use mqbus::{Bus, DeliveryMode, Message, Registry};

const PUBLISHER: u32 = 1;
const SUBSCRIBER: u32 = 2;
const NEWS_TYPE: u32 = 42;

fn main() {
    let path: PathBuf = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/tmp/mqbus_demo.reg".to_string())
        .into();

    let key_base = (std::process::id() as i32 & 0xffff) << 8;

    Registry::create(&path, 8, 8).expect("create registry");
    let mut admin = Registry::open(&path).expect("open registry");
    admin.add_server(PUBLISHER, key_base + 1, 5).expect("register publisher");
    admin.add_server(SUBSCRIBER, key_base + 2, 6).expect("register subscriber");
    admin.add_type(NEWS_TYPE, SUBSCRIBER).expect("subscribe");
    print!("{admin}");

    let publisher = Bus::connect(&path, PUBLISHER).expect("connect publisher");
    let subscriber = Bus::connect(&path, SUBSCRIBER).expect("connect subscriber");

    let mut msg = Message::new();
    msg.set_property("subject", "hello").expect("set property");
    msg.set_body(b"first post").expect("set body");
    publisher.publish(NEWS_TYPE, &mut msg).expect("publish");
    println!("published type {NEWS_TYPE} ({} bytes)", msg.len());

    let mut inbox = Message::new();
    let n = subscriber.recv(&mut inbox).expect("receive");
    println!(
        "received {n} bytes: type={} mode={:?} source={} subject={:?} body={:?}",
        inbox.msg_type(),
        inbox.mode(),
        inbox.source(),
        inbox.get_property("subject"),
        String::from_utf8_lossy(inbox.body()),
    );
    assert_eq!(inbox.mode(), DeliveryMode::Publish);

    // Remove the queues and reset the registry.
    subscriber.end(true);
    let _ = std::fs::remove_file(&path);
}
