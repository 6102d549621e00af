// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Tests for the one-shot idle timer: firing, re-arm replacement, and
// best-effort cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use libsvc::{IdleTimer, Waiter};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(tag: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("timer_{tag}_{n}_{}", std::process::id())
}

fn wake_waiter(tag: &str) -> Arc<Waiter> {
    let name = unique_name(tag);
    Waiter::clear_storage(&name);
    Arc::new(Waiter::open(&name).expect("open waiter"))
}

#[test]
fn fires_after_deadline() {
    let wake = wake_waiter("fires");
    let timer = IdleTimer::create(Arc::clone(&wake)).expect("create");

    timer.arm(Instant::now() + Duration::from_millis(100));
    assert!(!timer.fired());

    let start = Instant::now();
    wake.wait_if(|| !timer.fired(), Some(2000)).expect("wait");
    assert!(timer.fired());
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(80), "fired early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1000), "fired late: {elapsed:?}");
}

#[test]
fn unarmed_timer_never_fires() {
    let wake = wake_waiter("unarmed");
    let timer = IdleTimer::create(wake).expect("create");
    thread::sleep(Duration::from_millis(150));
    assert!(!timer.fired());
}

#[test]
fn rearm_replaces_pending_deadline() {
    let wake = wake_waiter("rearm");
    let timer = IdleTimer::create(Arc::clone(&wake)).expect("create");

    timer.arm(Instant::now() + Duration::from_millis(100));
    thread::sleep(Duration::from_millis(60));
    // Push the deadline out before the first one lands.
    timer.arm(Instant::now() + Duration::from_millis(200));

    thread::sleep(Duration::from_millis(100));
    assert!(!timer.fired(), "old deadline was not replaced");

    wake.wait_if(|| !timer.fired(), Some(2000)).expect("wait");
    assert!(timer.fired());
}

#[test]
fn arm_clears_previous_fire() {
    let wake = wake_waiter("clears");
    let timer = IdleTimer::create(Arc::clone(&wake)).expect("create");

    timer.arm(Instant::now() + Duration::from_millis(50));
    wake.wait_if(|| !timer.fired(), Some(2000)).expect("wait");
    assert!(timer.fired());

    timer.arm(Instant::now() + Duration::from_secs(60));
    assert!(!timer.fired());
}

#[test]
fn cancel_prevents_future_fire() {
    let wake = wake_waiter("cancel");
    let timer = IdleTimer::create(wake).expect("create");

    timer.arm(Instant::now() + Duration::from_millis(150));
    timer.cancel();
    thread::sleep(Duration::from_millis(300));
    assert!(!timer.fired());
}

#[test]
fn cancel_does_not_retract_a_past_fire() {
    let wake = wake_waiter("retract");
    let timer = IdleTimer::create(Arc::clone(&wake)).expect("create");

    timer.arm(Instant::now() + Duration::from_millis(50));
    wake.wait_if(|| !timer.fired(), Some(2000)).expect("wait");
    assert!(timer.fired());

    // Cancellation is best-effort: the fire already happened and stays
    // observable.
    timer.cancel();
    assert!(timer.fired());
}

#[test]
fn drop_joins_the_worker() {
    let wake = wake_waiter("drop");
    let timer = IdleTimer::create(wake).expect("create");
    timer.arm(Instant::now() + Duration::from_secs(60));
    drop(timer);
    // Nothing to assert: dropping while armed must neither hang nor panic.
}
