// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The service loop: check in, arm the idle timer, block on the wait set,
// dispatch each message, and tear everything down on stop or idle.
//
// A `Service` is a caller-owned instance, not process-global state; two
// independent services can run side by side in one process. Within one
// instance, at most one loop is active at a time — a second `run` fails
// fast instead of queuing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::buffer::MsgBuffer;
use crate::checkin;
use crate::error::ServiceError;
use crate::mailbox::{MailMode, Mailbox, Message};
use crate::protocol;
use crate::wait_set::{ReceiveEvent, WaitError, WaitSet, WaitSetHandle};

/// How long a reply transmission may block on the client's full ring.
const REPLY_TIMEOUT_MS: u64 = 1000;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Settings for one service instance.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Supervisor domain; selects the well-known control channel.
    pub domain: String,
    /// Maximum inbound payload size in bytes; 0 selects the 512-byte default.
    pub max_message_size: u32,
    /// Inactivity budget after which the loop shuts itself down;
    /// `Duration::ZERO` disables idle shutdown.
    pub idle_interval: Duration,
    /// How long check-in waits for the supervisor's reply.
    pub checkin_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            domain: "default".to_owned(),
            max_message_size: 0,
            idle_interval: Duration::ZERO,
            checkin_timeout: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch contract
// ---------------------------------------------------------------------------

/// Reply being assembled by a handler. The loop transmits it to the
/// message's reply-to channel when the handler returns `true`.
#[derive(Debug, Default)]
pub struct ReplyBuffer {
    buf: MsgBuffer,
}

impl ReplyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the reply with a copy of `data`.
    pub fn set(&mut self, data: &[u8]) {
        self.buf = MsgBuffer::from_slice(data);
    }

    /// Append bytes to the reply.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.data_mut().extend_from_slice(data);
    }

    pub fn data(&self) -> &[u8] {
        self.buf.data()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// The caller-supplied message handler.
///
/// Runs synchronously on the loop thread, one invocation at a time.
/// Returning `true` means the reply buffer holds a reply for the loop to
/// transmit. Handlers must not block indefinitely and must not call
/// [`Service::run`] re-entrantly.
pub trait Dispatch {
    fn dispatch(&mut self, msg: &Message, reply: &mut ReplyBuffer) -> bool;
}

impl<F> Dispatch for F
where
    F: FnMut(&Message, &mut ReplyBuffer) -> bool,
{
    fn dispatch(&mut self, msg: &Message, reply: &mut ReplyBuffer) -> bool {
        self(msg, reply)
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Why a [`Service::run`] call returned successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The idle budget elapsed with no traffic.
    Idle,
    /// [`ServiceHandle::stop`] was called.
    Stopped,
}

struct Shared {
    running: AtomicBool,
    stop_requested: AtomicBool,
    wait_handle: Mutex<Option<WaitSetHandle>>,
}

/// A runnable service instance.
pub struct Service {
    name: String,
    config: ServiceConfig,
    shared: Arc<Shared>,
}

/// Stop handle for a [`Service`]. Clone it into any thread; `stop` is
/// effective at most once per run and is a no-op on an inactive instance.
#[derive(Clone)]
pub struct ServiceHandle {
    shared: Arc<Shared>,
}

impl ServiceHandle {
    /// Request the active loop to stop. Never blocks. The loop thread
    /// observes the request promptly, even from inside a blocking receive.
    pub fn stop(&self) {
        self.shared.stop_requested.store(true, Ordering::Release);
        if let Some(handle) = self.shared.wait_handle.lock().unwrap().as_ref() {
            handle.destroy();
        }
    }
}

/// Resets the instance to its reusable idle state when the loop unwinds,
/// whether it exited gracefully, on error, or by panic from a handler.
struct RunGuard<'a> {
    shared: &'a Shared,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.shared.wait_handle.lock().unwrap() = None;
        self.shared.stop_requested.store(false, Ordering::Release);
        self.shared.running.store(false, Ordering::Release);
    }
}

impl Service {
    /// Create an instance serving the supervisor-registered `name`.
    pub fn new(name: &str, config: ServiceConfig) -> Self {
        Self {
            name: name.to_owned(),
            config,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                wait_handle: Mutex::new(None),
            }),
        }
    }

    /// The registered service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A stop handle for this instance.
    pub fn handle(&self) -> ServiceHandle {
        ServiceHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Check in with the supervisor and serve the endpoint until stopped
    /// or idle. Blocks on the calling thread; the handler runs here too.
    ///
    /// On every exit path the timer, wait set, and endpoint are released
    /// and the instance returns to its reusable idle state.
    pub fn run<D: Dispatch + ?Sized>(&self, dispatch: &mut D) -> Result<RunExit, ServiceError> {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ServiceError::AlreadyRunning);
        }
        let _guard = RunGuard {
            shared: &self.shared,
        };
        // A stop left over from before this run targets nothing.
        self.shared.stop_requested.store(false, Ordering::Release);

        let endpoint = checkin::check_in(&self.config, &self.name)?;

        let idle = (self.config.idle_interval > Duration::ZERO).then_some(self.config.idle_interval);
        let mut set = WaitSet::new(endpoint, idle).map_err(ServiceError::ResourceExhausted)?;
        *self.shared.wait_handle.lock().unwrap() = Some(set.handle());

        // A stop that raced in between check-in and handle registration had
        // no wait set to destroy; honour it here.
        if self.shared.stop_requested.load(Ordering::Acquire) {
            return Ok(RunExit::Stopped);
        }

        debug!(service = %self.name, idle = ?idle, "entering receive loop");
        loop {
            match set.recv() {
                Ok(ReceiveEvent::Message(msg)) => {
                    // Re-arm before dispatching so handler time does not
                    // eat into the idle budget.
                    set.reset_idle();
                    let mut reply = ReplyBuffer::new();
                    if dispatch.dispatch(&msg, &mut reply) {
                        self.send_reply(&msg, &reply);
                    }
                    if self.shared.stop_requested.load(Ordering::Acquire) {
                        debug!(service = %self.name, "stop requested during dispatch");
                        return Ok(RunExit::Stopped);
                    }
                }
                Ok(ReceiveEvent::IdleFired) => {
                    debug!(service = %self.name, "idle budget elapsed, shutting down");
                    return Ok(RunExit::Idle);
                }
                Err(WaitError::Destroyed) => {
                    debug!(service = %self.name, "wait set destroyed, shutting down");
                    return Ok(RunExit::Stopped);
                }
                Err(WaitError::Receive(e)) => {
                    error!(service = %self.name, error = %e, "receive fault, shutting down");
                    return Err(ServiceError::Receive(e));
                }
            }
        }
    }

    fn send_reply(&self, msg: &Message, reply: &ReplyBuffer) {
        let Some(reply_to) = msg.reply_to() else {
            warn!(service = %self.name, "handler produced a reply but the message names no reply channel");
            return;
        };
        // An unreachable reply channel is the client's failure, not ours;
        // log and keep serving.
        match Mailbox::connect(reply_to, protocol::REPLY_SLOT_SIZE, MailMode::Sender) {
            Ok(mut tx) => match tx.send(reply.data(), None, REPLY_TIMEOUT_MS) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(service = %self.name, reply_to, "reply not delivered");
                }
                Err(e) => {
                    warn!(service = %self.name, reply_to, error = %e, "reply send failed");
                }
            },
            Err(e) => {
                warn!(service = %self.name, reply_to, error = %e, "reply channel unavailable");
            }
        }
    }
}
