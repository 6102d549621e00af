// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named waiter: a condition variable + mutex pair with a process-local
// quit flag. Mailboxes park their senders and receivers here, and the
// wait set parks the service loop here.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::sync::{NamedCondvar, NamedMutex};

/// A named waiter. Any number of instances may be opened on the same name,
/// in the same process or in others; `notify`/`broadcast` on one wakes
/// waiters blocked on any of them.
#[derive(Debug)]
pub struct Waiter {
    cond: NamedCondvar,
    lock: NamedMutex,
    quit: AtomicBool,
}

impl Waiter {
    /// Open a named waiter, creating the underlying condvar and mutex on
    /// first use of the name.
    pub fn open(name: &str) -> io::Result<Self> {
        let cond = NamedCondvar::open(&format!("{name}_WTC_"))?;
        let lock = NamedMutex::open(&format!("{name}_WTL_"))?;
        Ok(Self {
            cond,
            lock,
            quit: AtomicBool::new(false),
        })
    }

    /// Block while `pred` returns `true`, until woken and the predicate
    /// flips, quit is signalled, or the timeout elapses.
    /// Returns `Ok(false)` on timeout, `Ok(true)` otherwise.
    pub fn wait_if<F>(&self, pred: F, timeout_ms: Option<u64>) -> io::Result<bool>
    where
        F: Fn() -> bool,
    {
        self.lock.lock()?;
        while !self.quit.load(Ordering::Relaxed) && pred() {
            match self.cond.wait(&self.lock, timeout_ms)? {
                false => {
                    self.lock.unlock()?;
                    return Ok(false); // timeout
                }
                true => {} // woken, re-check predicate
            }
        }
        self.lock.unlock()?;
        Ok(true)
    }

    /// Wake one waiter.
    pub fn notify(&self) -> io::Result<()> {
        // Take the lock briefly so a waiter between its predicate check and
        // cond_wait cannot miss the signal.
        self.lock.lock()?;
        self.lock.unlock()?;
        self.cond.notify()
    }

    /// Wake all waiters.
    pub fn broadcast(&self) -> io::Result<()> {
        self.lock.lock()?;
        self.lock.unlock()?;
        self.cond.broadcast()
    }

    /// Set the quit flag on this instance and wake everyone blocked on it.
    pub fn quit_waiting(&self) -> io::Result<()> {
        self.quit.store(true, Ordering::Release);
        self.broadcast()
    }

    /// Remove the backing storage of a named waiter.
    pub fn clear_storage(name: &str) {
        NamedCondvar::clear_storage(&format!("{name}_WTC_"));
        NamedMutex::clear_storage(&format!("{name}_WTL_"));
    }
}
