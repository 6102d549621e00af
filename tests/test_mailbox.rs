// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Tests for the shared-memory mailbox: ordering, backpressure, receiver
// exclusivity, and pre-bound buffering.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use libsvc::{MailMode, Mailbox};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(tag: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("mbx_{tag}_{n}_{}", std::process::id())
}

#[test]
fn send_recv_roundtrip() {
    let name = unique_name("roundtrip");
    Mailbox::clear_storage(&name);

    let mut rx = Mailbox::connect(&name, 0, MailMode::Receiver).expect("receiver");
    let mut tx = Mailbox::connect(&name, 0, MailMode::Sender).expect("sender");

    assert!(tx.send(b"ping", None, 100).expect("send"));
    let msg = rx.recv(Some(1000)).expect("recv").expect("message");
    assert_eq!(msg.payload(), b"ping");
    assert!(msg.reply_to().is_none());
}

#[test]
fn reply_to_travels_in_the_slot_header() {
    let name = unique_name("replyto");
    Mailbox::clear_storage(&name);

    let mut rx = Mailbox::connect(&name, 0, MailMode::Receiver).expect("receiver");
    let mut tx = Mailbox::connect(&name, 0, MailMode::Sender).expect("sender");

    assert!(tx.send(b"req", Some("client_reply_chan"), 100).expect("send"));
    let msg = rx.recv(Some(1000)).expect("recv").expect("message");
    assert_eq!(msg.payload(), b"req");
    assert_eq!(msg.reply_to(), Some("client_reply_chan"));
}

#[test]
fn fifo_order() {
    let name = unique_name("fifo");
    Mailbox::clear_storage(&name);

    let mut rx = Mailbox::connect(&name, 0, MailMode::Receiver).expect("receiver");
    let mut tx = Mailbox::connect(&name, 0, MailMode::Sender).expect("sender");

    for i in 0..10u8 {
        assert!(tx.send(&[i], None, 100).expect("send"));
    }
    for i in 0..10u8 {
        let msg = rx.recv(Some(1000)).expect("recv").expect("message");
        assert_eq!(msg.payload(), &[i]);
    }
}

#[test]
fn send_without_receiver_is_refused() {
    let name = unique_name("norecv");
    Mailbox::clear_storage(&name);

    let _ring = Mailbox::bind(&name, 0).expect("bind");
    let mut tx = Mailbox::connect(&name, 0, MailMode::Sender).expect("sender");
    assert!(!tx.send(b"lost?", None, 100).expect("send"));
}

#[test]
fn post_buffers_until_receiver_attaches() {
    let name = unique_name("prebound");
    Mailbox::clear_storage(&name);

    // The owner binds the ring; a client posts before any receiver exists.
    let _ring = Mailbox::bind(&name, 0).expect("bind");
    let mut tx = Mailbox::connect(&name, 0, MailMode::Sender).expect("sender");
    assert!(tx.post(b"early", None, 100).expect("post"));

    let mut rx = Mailbox::connect(&name, 0, MailMode::Receiver).expect("receiver");
    let msg = rx.recv(Some(1000)).expect("recv").expect("buffered message");
    assert_eq!(msg.payload(), b"early");
}

#[test]
fn second_receiver_is_refused() {
    let name = unique_name("onerecv");
    Mailbox::clear_storage(&name);

    let _rx = Mailbox::connect(&name, 0, MailMode::Receiver).expect("receiver");
    let err = Mailbox::connect(&name, 0, MailMode::Receiver).expect_err("second receiver");
    assert_eq!(err.kind(), std::io::ErrorKind::AddrInUse);
}

#[test]
fn receiver_slot_frees_on_drop() {
    let name = unique_name("redrop");
    Mailbox::clear_storage(&name);

    let keep = Mailbox::bind(&name, 0).expect("bind");
    {
        let _rx = Mailbox::connect(&name, 0, MailMode::Receiver).expect("receiver");
    }
    let _rx2 = Mailbox::connect(&name, 0, MailMode::Receiver).expect("receiver after drop");
    drop(keep);
}

#[test]
fn oversized_message_is_rejected() {
    let name = unique_name("oversize");
    Mailbox::clear_storage(&name);

    let _rx = Mailbox::connect(&name, 64, MailMode::Receiver).expect("receiver");
    let mut tx = Mailbox::connect(&name, 64, MailMode::Sender).expect("sender");
    let big = vec![0u8; 65];
    let err = tx.send(&big, None, 100).expect_err("oversized");
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
}

#[test]
fn slot_size_mismatch_is_rejected() {
    let name = unique_name("mismatch");
    Mailbox::clear_storage(&name);

    let _ring = Mailbox::bind(&name, 256).expect("bind");
    let err = Mailbox::connect(&name, 1024, MailMode::Sender).expect_err("mismatch");
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
}

#[test]
fn recv_times_out_on_empty_ring() {
    let name = unique_name("rtimeout");
    Mailbox::clear_storage(&name);

    let mut rx = Mailbox::connect(&name, 0, MailMode::Receiver).expect("receiver");
    let start = Instant::now();
    let got = rx.recv(Some(100)).expect("recv");
    assert!(got.is_none());
    assert!(start.elapsed() >= Duration::from_millis(80));
}

#[test]
fn full_ring_send_times_out_then_succeeds_after_drain() {
    let name = unique_name("full");
    Mailbox::clear_storage(&name);

    let mut rx = Mailbox::connect(&name, 16, MailMode::Receiver).expect("receiver");
    let mut tx = Mailbox::connect(&name, 16, MailMode::Sender).expect("sender");

    // Fill the ring to capacity.
    let mut filled = 0u32;
    loop {
        if !tx.send(b"x", None, 0).expect("send") {
            break;
        }
        filled += 1;
        assert!(filled <= 4096, "ring never filled");
    }
    assert!(filled > 0);

    // A timed send on the full ring gives up.
    assert!(!tx.send(b"y", None, 50).expect("send"));

    // Draining one slot lets the next send through.
    assert!(rx.recv(Some(1000)).expect("recv").is_some());
    assert!(tx.send(b"z", None, 1000).expect("send"));
}

#[test]
fn blocked_receiver_wakes_on_send() {
    let name = unique_name("wake");
    Mailbox::clear_storage(&name);

    let mut rx = Mailbox::connect(&name, 0, MailMode::Receiver).expect("receiver");
    let name2 = name.clone();
    let sender = thread::spawn(move || {
        let mut tx = Mailbox::connect(&name2, 0, MailMode::Sender).expect("sender");
        thread::sleep(Duration::from_millis(100));
        assert!(tx.send(b"wakeup", None, 1000).expect("send"));
    });

    let start = Instant::now();
    let msg = rx.recv(Some(5000)).expect("recv").expect("message");
    assert_eq!(msg.payload(), b"wakeup");
    assert!(start.elapsed() < Duration::from_secs(3));
    sender.join().unwrap();
}

#[test]
fn multiple_senders_one_receiver() {
    let name = unique_name("mpsc");
    Mailbox::clear_storage(&name);

    let mut rx = Mailbox::connect(&name, 0, MailMode::Receiver).expect("receiver");

    let mut senders = Vec::new();
    for t in 0..4u8 {
        let n = name.clone();
        senders.push(thread::spawn(move || {
            let mut tx = Mailbox::connect(&n, 0, MailMode::Sender).expect("sender");
            for i in 0..8u8 {
                while !tx.send(&[t, i], None, 1000).expect("send") {
                    thread::yield_now();
                }
            }
        }));
    }

    let mut per_sender = [0u8; 4];
    for _ in 0..32 {
        let msg = rx.recv(Some(5000)).expect("recv").expect("message");
        let [t, i] = msg.payload() else { panic!("bad payload") };
        // Per-sender order is preserved even when senders interleave.
        assert_eq!(*i, per_sender[*t as usize]);
        per_sender[*t as usize] += 1;
    }

    for s in senders {
        s.join().unwrap();
    }
    assert_eq!(per_sender, [8, 8, 8, 8]);
}
