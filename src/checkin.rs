// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Supervisor check-in client.
//
// One attempt per call, no retries: restart policy belongs to whoever
// supervises this process, not to the runner. Every resource created here
// (the private reply channel, the control-channel sender) is dropped on
// any failure path, so a failed check-in leaks nothing.

use tracing::debug;

use crate::error::ServiceError;
use crate::mailbox::{MailMode, Mailbox};
use crate::protocol::{self, CheckinReply, CheckinRequest};
use crate::service::ServiceConfig;

/// How long the control-channel send may block on a full ring.
const SEND_TIMEOUT_MS: u64 = 1000;

/// Check in with the supervisor for `config.domain` and open the endpoint
/// it pre-bound under `service_name`.
pub fn check_in(config: &ServiceConfig, service_name: &str) -> Result<Mailbox, ServiceError> {
    let reply_name = protocol::reply_channel();
    let mut reply_rx = Mailbox::connect(&reply_name, protocol::REPLY_SLOT_SIZE, MailMode::Receiver)
        .map_err(ServiceError::ResourceExhausted)?;

    let control_name = protocol::control_channel(&config.domain);
    let mut control = Mailbox::connect(&control_name, protocol::CONTROL_SLOT_SIZE, MailMode::Sender)
        .map_err(ServiceError::ResourceExhausted)?;

    let request = serde_json::to_vec(&CheckinRequest::new())
        .map_err(|e| ServiceError::Protocol(e.to_string()))?;

    debug!(service = service_name, control = %control_name, "checking in");
    let delivered = control
        .send(&request, Some(&reply_name), SEND_TIMEOUT_MS)
        .map_err(|e| ServiceError::SupervisorUnreachable(e.to_string()))?;
    if !delivered {
        return Err(ServiceError::SupervisorUnreachable(format!(
            "no supervisor attached to `{control_name}`"
        )));
    }

    let timeout_ms = config.checkin_timeout.as_millis() as u64;
    let reply = reply_rx
        .recv(Some(timeout_ms))
        .map_err(|e| ServiceError::SupervisorUnreachable(e.to_string()))?
        .ok_or_else(|| {
            ServiceError::SupervisorUnreachable("check-in reply timed out".to_owned())
        })?;

    let doc: CheckinReply = serde_json::from_slice(reply.payload())
        .map_err(|e| ServiceError::Protocol(e.to_string()))?;
    if let Some(err) = doc.error {
        return Err(ServiceError::Protocol(format!(
            "supervisor refused check-in: {err}"
        )));
    }

    let endpoint_name = doc
        .services
        .get(service_name)
        .ok_or_else(|| ServiceError::NotRegistered(service_name.to_owned()))?;

    debug!(service = service_name, endpoint = %endpoint_name, "check-in complete");
    Mailbox::connect(endpoint_name, config.max_message_size, MailMode::Receiver)
        .map_err(ServiceError::ResourceExhausted)
}
