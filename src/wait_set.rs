// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Waitable set: one endpoint mailbox plus, when an idle budget is
// configured, one idle timer, multiplexed behind a single blocking
// receive. Which member woke the call is reported as a tagged event, so
// an idle fire never has to masquerade as a message on the wire.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::mailbox::{Mailbox, Message};
use crate::timer::IdleTimer;
use crate::waiter::Waiter;

/// What a [`WaitSet::recv`] call was woken by.
#[derive(Debug)]
pub enum ReceiveEvent {
    /// The endpoint member: one message, in delivery order.
    Message(Message),
    /// The timer member: the idle budget elapsed with no traffic.
    IdleFired,
}

/// Why a [`WaitSet::recv`] call failed.
#[derive(Debug, Error)]
pub enum WaitError {
    /// The set was destroyed out from under the receive — the stop signal.
    #[error("wait set destroyed")]
    Destroyed,
    /// The underlying receive faulted.
    #[error("receive failed")]
    Receive(#[source] io::Error),
}

/// Thread-safe destroy handle for a [`WaitSet`].
///
/// `destroy` marks the set dead and wakes any outstanding blocking
/// receive, which then returns [`WaitError::Destroyed`]. Safe to call any
/// number of times, from any thread.
#[derive(Clone)]
pub struct WaitSetHandle {
    destroyed: Arc<AtomicBool>,
    wake: Arc<Waiter>,
}

impl WaitSetHandle {
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        let _ = self.wake.broadcast();
    }
}

/// The waitable set. Owns the endpoint and the optional idle timer; both
/// are released on drop, timer first, endpoint last (reverse creation
/// order — the endpoint existed before the set did).
pub struct WaitSet {
    timer: Option<IdleTimer>,
    idle: Duration,
    destroyed: Arc<AtomicBool>,
    wake: Arc<Waiter>,
    endpoint: Mailbox,
}

impl WaitSet {
    /// Assemble the set. With `idle` present the timer member is created
    /// and armed to `now + idle` right away; messages re-arm it via
    /// [`reset_idle`](Self::reset_idle).
    pub fn new(endpoint: Mailbox, idle: Option<Duration>) -> io::Result<Self> {
        let wake = Arc::new(Waiter::open(&endpoint.wake_name())?);
        let timer = match idle {
            Some(budget) => {
                let timer = IdleTimer::create(Arc::clone(&wake))?;
                timer.arm(Instant::now() + budget);
                Some(timer)
            }
            None => None,
        };
        Ok(Self {
            timer,
            idle: idle.unwrap_or_default(),
            destroyed: Arc::new(AtomicBool::new(false)),
            wake,
            endpoint,
        })
    }

    /// A destroy handle for stopping the set from another thread.
    pub fn handle(&self) -> WaitSetHandle {
        WaitSetHandle {
            destroyed: Arc::clone(&self.destroyed),
            wake: Arc::clone(&self.wake),
        }
    }

    /// Re-arm the idle timer to `now + idle`. No-op without a timer member.
    pub fn reset_idle(&self) {
        if let Some(timer) = &self.timer {
            timer.arm(Instant::now() + self.idle);
        }
    }

    /// Block until exactly one member is ready and report which.
    ///
    /// Resolution order on wake: a destroyed set wins over everything; a
    /// pending message wins over a fired timer (the re-arm that follows
    /// every delivery absorbs the stale fire); the timer is reported only
    /// when no traffic is pending.
    pub fn recv(&mut self) -> Result<ReceiveEvent, WaitError> {
        loop {
            if self.destroyed.load(Ordering::Acquire) {
                return Err(WaitError::Destroyed);
            }
            if self.endpoint.has_pending() {
                match self.endpoint.try_recv() {
                    Ok(Some(msg)) => return Ok(ReceiveEvent::Message(msg)),
                    Ok(None) => {}
                    Err(e) => return Err(WaitError::Receive(e)),
                }
            }
            if self.timer.as_ref().is_some_and(|t| t.fired()) {
                return Ok(ReceiveEvent::IdleFired);
            }

            let destroyed = &self.destroyed;
            let endpoint = &self.endpoint;
            let timer = &self.timer;
            self.wake
                .wait_if(
                    || {
                        !destroyed.load(Ordering::Acquire)
                            && !endpoint.has_pending()
                            && !timer.as_ref().is_some_and(|t| t.fired())
                    },
                    None,
                )
                .map_err(WaitError::Receive)?;
        }
    }
}
