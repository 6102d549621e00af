// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Supervisor-managed IPC service runner.
//
// A process checks in with an external supervisor over a well-known
// control channel, receives the endpoint the supervisor pre-bound for it,
// and serves inbound messages from a single blocking receive loop until
// it is stopped or an idle budget elapses. The endpoint and the check-in
// exchange ride on named shared-memory mailboxes, so the supervisor and
// its services can live in separate processes.

#[cfg(not(unix))]
compile_error!("libsvc relies on POSIX shared memory and pthread process-shared objects");

pub mod shm_name;

mod shm;
pub use shm::{ShmMode, ShmSegment};

mod sync;
pub use sync::{NamedCondvar, NamedMutex};

mod waiter;
pub use waiter::Waiter;

mod buffer;
pub use buffer::MsgBuffer;

mod mailbox;
pub use mailbox::{MailMode, Mailbox, Message, DEFAULT_SLOT_SIZE};

mod timer;
pub use timer::IdleTimer;

mod wait_set;
pub use wait_set::{ReceiveEvent, WaitError, WaitSet, WaitSetHandle};

pub mod protocol;

mod checkin;
pub use checkin::check_in;

mod supervisor;
pub use supervisor::{Supervisor, SupervisorConfig};

mod service;
pub use service::{Dispatch, ReplyBuffer, RunExit, Service, ServiceConfig, ServiceHandle};

mod error;
pub use error::ServiceError;
