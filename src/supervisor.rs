// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Supervisor broker: owns the services table, keeps every configured
// endpoint bound (so traffic queued for a not-yet-started service is not
// lost), and answers check-in requests on the domain's control channel.
//
// The control loop is itself a wait set with a destroy handle — the same
// machinery the services it supervises run on.

use std::collections::HashMap;
use std::io;
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::mailbox::{MailMode, Mailbox, Message};
use crate::protocol::{self, CheckinReply, CheckinRequest};
use crate::wait_set::{ReceiveEvent, WaitError, WaitSet, WaitSetHandle};

/// How long a check-in reply may block on the requester's full ring.
const REPLY_TIMEOUT_MS: u64 = 1000;

/// Supervisor settings: the domain it serves and the services table.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Domain name; selects the well-known control channel.
    pub domain: String,
    /// Slot payload capacity of the endpoints this supervisor binds;
    /// 0 selects the 512-byte default.
    pub max_message_size: u32,
    /// Service name → endpoint channel name.
    pub services: HashMap<String, String>,
}

impl SupervisorConfig {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_owned(),
            max_message_size: 0,
            services: HashMap::new(),
        }
    }
}

/// A running supervisor broker.
pub struct Supervisor {
    stop: WaitSetHandle,
    worker: Option<JoinHandle<()>>,
    // Keeps every configured endpoint ring alive for the supervisor's
    // lifetime, across service restarts.
    _endpoints: Vec<Mailbox>,
}

impl Supervisor {
    /// Bind all configured endpoints, attach to the control channel, and
    /// start answering check-ins on a background thread.
    pub fn spawn(config: SupervisorConfig) -> io::Result<Self> {
        let mut endpoints = Vec::with_capacity(config.services.len());
        for channel in config.services.values() {
            endpoints.push(Mailbox::bind(channel, config.max_message_size)?);
        }

        let control = Mailbox::connect(
            &protocol::control_channel(&config.domain),
            protocol::CONTROL_SLOT_SIZE,
            MailMode::Receiver,
        )?;
        let mut set = WaitSet::new(control, None)?;
        let stop = set.handle();

        let table = serde_json::to_vec(&CheckinReply {
            services: config.services.clone(),
            error: None,
        })
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let refusal = serde_json::to_vec(&CheckinReply {
            services: HashMap::new(),
            error: Some("unrecognised request".to_owned()),
        })
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let domain = config.domain.clone();

        let worker = std::thread::Builder::new()
            .name("libsvc-supervisor".into())
            .spawn(move || {
                debug!(domain = %domain, "supervisor serving check-ins");
                loop {
                    match set.recv() {
                        Ok(ReceiveEvent::Message(msg)) => Self::answer(&msg, &table, &refusal),
                        Ok(ReceiveEvent::IdleFired) => break,
                        Err(WaitError::Destroyed) => break,
                        Err(WaitError::Receive(e)) => {
                            warn!(domain = %domain, error = %e, "control channel fault");
                            break;
                        }
                    }
                }
            })?;

        Ok(Self {
            stop,
            worker: Some(worker),
            _endpoints: endpoints,
        })
    }

    fn answer(msg: &Message, table: &[u8], refusal: &[u8]) {
        let response = match serde_json::from_slice::<CheckinRequest>(msg.payload()) {
            Ok(req) if req.op == protocol::OP_CHECKIN => {
                debug!(pid = req.pid, "check-in request");
                table
            }
            _ => refusal,
        };

        let Some(reply_to) = msg.reply_to() else {
            warn!("check-in request names no reply channel");
            return;
        };
        match Mailbox::connect(reply_to, protocol::REPLY_SLOT_SIZE, MailMode::Sender) {
            Ok(mut tx) => {
                if let Err(e) = tx.send(response, None, REPLY_TIMEOUT_MS) {
                    warn!(reply_to, error = %e, "check-in reply send failed");
                }
            }
            Err(e) => {
                warn!(reply_to, error = %e, "check-in reply channel unavailable");
            }
        }
    }

    /// Stop the control loop and wait for it to exit. Bound endpoints are
    /// released when the supervisor is dropped.
    pub fn shutdown(&mut self) {
        self.stop.destroy();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
