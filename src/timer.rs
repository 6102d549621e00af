// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// One-shot idle timer.
//
// A dedicated worker thread sleeps until the armed deadline and, on
// expiry, raises a fired flag and broadcasts the wake waiter it was given
// at creation — the same waiter the endpoint's receive path blocks on.
// The fire is therefore indistinguishable from a message wake-up until
// the wait set resolves which member is ready.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use crate::waiter::Waiter;

struct TimerState {
    deadline: Option<Instant>,
    quit: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    cv: Condvar,
    fired: AtomicBool,
}

/// A one-shot countdown timer tied to a wake waiter.
pub struct IdleTimer {
    shared: Arc<TimerShared>,
    worker: Option<JoinHandle<()>>,
}

impl IdleTimer {
    /// Create the timer, unarmed. `wake` is broadcast on every fire.
    pub fn create(wake: Arc<Waiter>) -> io::Result<Self> {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                deadline: None,
                quit: false,
            }),
            cv: Condvar::new(),
            fired: AtomicBool::new(false),
        });
        let shared2 = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("libsvc-idle-timer".into())
            .spawn(move || Self::worker_loop(shared2, wake))?;
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    fn worker_loop(shared: Arc<TimerShared>, wake: Arc<Waiter>) {
        let mut st = shared.state.lock().unwrap();
        loop {
            if st.quit {
                return;
            }
            match st.deadline {
                None => {
                    st = shared.cv.wait(st).unwrap();
                }
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        st.deadline = None;
                        shared.fired.store(true, Ordering::Release);
                        drop(st);
                        let _ = wake.broadcast();
                        st = shared.state.lock().unwrap();
                    } else {
                        let (guard, _) = shared.cv.wait_timeout(st, dl - now).unwrap();
                        st = guard;
                    }
                }
            }
        }
    }

    /// Arm the timer for `deadline`, replacing any pending deadline and
    /// clearing a previous fire. Re-arming is the reset-on-activity
    /// mechanism: every delivered message pushes the deadline out.
    pub fn arm(&self, deadline: Instant) {
        let mut st = self.shared.state.lock().unwrap();
        st.deadline = Some(deadline);
        self.shared.fired.store(false, Ordering::Release);
        self.shared.cv.notify_one();
    }

    /// Cancel a pending deadline. Best-effort: a fire that already
    /// happened stays observable through [`fired`](Self::fired).
    pub fn cancel(&self) {
        let mut st = self.shared.state.lock().unwrap();
        st.deadline = None;
        self.shared.cv.notify_one();
    }

    /// Whether the timer has fired since it was last armed.
    pub fn fired(&self) -> bool {
        self.shared.fired.load(Ordering::Acquire)
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        {
            let mut st = self.shared.state.lock().unwrap();
            st.quit = true;
            self.shared.cv.notify_one();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
