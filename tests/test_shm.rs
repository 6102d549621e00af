// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Tests for the shared memory segments the mailboxes are built on.

use std::sync::atomic::{AtomicUsize, Ordering};

use libsvc::{ShmMode, ShmSegment};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(tag: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("shm_{tag}_{n}_{}", std::process::id())
}

#[test]
fn acquire_create() {
    let name = unique_name("create");
    ShmSegment::clear_storage(&name);

    let seg = ShmSegment::acquire(&name, 1024, ShmMode::Create).expect("acquire");
    assert_eq!(seg.user_size(), 1024);
    assert!(!seg.get().is_null());
}

#[test]
fn open_nonexistent_fails() {
    let name = unique_name("noexist");
    ShmSegment::clear_storage(&name);

    assert!(ShmSegment::acquire(&name, 1024, ShmMode::Open).is_err());
}

#[test]
fn exclusive_create_fails_on_existing() {
    let name = unique_name("excl");
    ShmSegment::clear_storage(&name);

    let _seg = ShmSegment::acquire(&name, 256, ShmMode::Create).expect("first");
    assert!(ShmSegment::acquire(&name, 256, ShmMode::Create).is_err());
}

#[test]
fn fresh_segment_is_zeroed_and_writable() {
    let name = unique_name("zero");
    ShmSegment::clear_storage(&name);

    let seg = ShmSegment::acquire(&name, 512, ShmMode::Create).expect("acquire");
    let bytes = unsafe { std::slice::from_raw_parts(seg.get(), 512) };
    assert!(bytes.iter().all(|&b| b == 0));

    let data = b"mapped and shared";
    unsafe {
        std::ptr::copy_nonoverlapping(data.as_ptr(), seg.get(), data.len());
    }
    let back = unsafe { std::slice::from_raw_parts(seg.get(), data.len()) };
    assert_eq!(back, data);
}

#[test]
fn second_mapper_sees_first_mappers_writes() {
    let name = unique_name("shared");
    ShmSegment::clear_storage(&name);

    let a = ShmSegment::acquire(&name, 128, ShmMode::CreateOrOpen).expect("a");
    unsafe {
        std::ptr::copy_nonoverlapping(b"42".as_ptr(), a.get(), 2);
    }

    let b = ShmSegment::acquire(&name, 128, ShmMode::CreateOrOpen).expect("b");
    let seen = unsafe { std::slice::from_raw_parts(b.get(), 2) };
    assert_eq!(seen, b"42");
}

#[test]
fn reference_counting() {
    let name = unique_name("refs");
    ShmSegment::clear_storage(&name);

    let a = ShmSegment::acquire(&name, 256, ShmMode::CreateOrOpen).expect("a");
    assert_eq!(a.prev_ref_count(), 0, "first mapper owns initialisation");
    assert_eq!(a.ref_count(), 1);

    let b = ShmSegment::acquire(&name, 256, ShmMode::CreateOrOpen).expect("b");
    assert_eq!(b.prev_ref_count(), 1);
    assert_eq!(a.ref_count(), 2);

    drop(b);
    assert_eq!(a.ref_count(), 1);
}

#[test]
fn last_mapper_unlinks() {
    let name = unique_name("unlink");
    ShmSegment::clear_storage(&name);

    {
        let _seg = ShmSegment::acquire(&name, 64, ShmMode::Create).expect("acquire");
    }
    // The only mapper dropped, so the name is free again.
    assert!(ShmSegment::acquire(&name, 64, ShmMode::Open).is_err());
    let _fresh = ShmSegment::acquire(&name, 64, ShmMode::Create).expect("recreate");
}

#[test]
fn empty_name_and_zero_size_are_rejected() {
    assert!(ShmSegment::acquire("", 64, ShmMode::Create).is_err());
    let name = unique_name("zerosize");
    assert!(ShmSegment::acquire(&name, 0, ShmMode::Create).is_err());
}
