// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Tests for the named waiter the mailboxes and the wait set park on.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use libsvc::Waiter;

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(tag: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("waiter_{tag}_{n}_{}", std::process::id())
}

#[test]
fn wait_returns_when_predicate_already_false() {
    let name = unique_name("nopred");
    Waiter::clear_storage(&name);

    let waiter = Waiter::open(&name).expect("open");
    assert!(waiter.wait_if(|| false, None).expect("wait_if"));
}

#[test]
fn wait_times_out() {
    let name = unique_name("timeout");
    Waiter::clear_storage(&name);

    let waiter = Waiter::open(&name).expect("open");
    let start = Instant::now();
    let woke = waiter.wait_if(|| true, Some(100)).expect("wait_if");
    assert!(!woke, "should report timeout");
    assert!(start.elapsed() >= Duration::from_millis(80));
    assert!(start.elapsed() < Duration::from_millis(1000));
}

#[test]
fn notify_wakes_a_waiter_on_another_instance() {
    let name = unique_name("notify");
    Waiter::clear_storage(&name);

    let flag = Arc::new(AtomicBool::new(false));
    let n = name.clone();
    let f = Arc::clone(&flag);
    let t = thread::spawn(move || {
        let w = Waiter::open(&n).expect("open");
        w.wait_if(|| !f.load(Ordering::Acquire), Some(5000))
            .expect("wait_if")
    });

    thread::sleep(Duration::from_millis(100));
    let waiter = Waiter::open(&name).expect("open");
    flag.store(true, Ordering::Release);
    waiter.notify().expect("notify");

    assert!(t.join().unwrap(), "waiter should be woken, not timed out");
}

#[test]
fn broadcast_wakes_all_waiters() {
    let name = unique_name("broadcast");
    Waiter::clear_storage(&name);

    let gate = Arc::new(AtomicI32::new(0));
    let mut threads = Vec::new();
    for _ in 0..4 {
        let n = name.clone();
        let g = Arc::clone(&gate);
        threads.push(thread::spawn(move || {
            let w = Waiter::open(&n).expect("open");
            w.wait_if(|| g.load(Ordering::Acquire) == 0, Some(5000))
                .expect("wait_if")
        }));
    }

    thread::sleep(Duration::from_millis(100));
    let waiter = Waiter::open(&name).expect("open");
    gate.store(1, Ordering::Release);
    waiter.broadcast().expect("broadcast");

    for t in threads {
        assert!(t.join().unwrap());
    }
}

#[test]
fn quit_waiting_releases_a_blocked_waiter() {
    let name = unique_name("quit");
    Waiter::clear_storage(&name);

    // The quit flag is per-instance, so both threads must share one.
    let waiter = Arc::new(Waiter::open(&name).expect("open"));
    let w2 = Arc::clone(&waiter);
    let t = thread::spawn(move || w2.wait_if(|| true, None).expect("wait_if"));

    thread::sleep(Duration::from_millis(100));
    waiter.quit_waiting().expect("quit_waiting");
    assert!(t.join().unwrap());
}

#[test]
fn reopen_after_clear_storage() {
    let name = unique_name("clear");

    {
        let _w = Waiter::open(&name).expect("open");
    }
    Waiter::clear_storage(&name);
    let _w = Waiter::open(&name).expect("re-open after clear");
}
