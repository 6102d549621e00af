// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Check-in wire protocol: the documents exchanged between a service and
// its supervisor, and the channel naming conventions both sides share.
//
// The exchange is one round-trip. The service sends a request document
// over the domain's well-known control channel, carrying a private reply
// channel name in the transport header. The supervisor answers with its
// full services table; the service does the lookup, exactly like a
// checked-in job scanning the services dictionary it got back from its
// launcher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Request operation name.
pub const OP_CHECKIN: &str = "checkin";

/// Slot payload capacity of control and reply channels.
pub const CONTROL_SLOT_SIZE: u32 = 4096;

/// Slot payload capacity every reply-to channel is expected to use.
///
/// Reply channels are created by whoever asks for a reply, so the other
/// side cannot negotiate a size; this constant is the contract.
pub const REPLY_SLOT_SIZE: u32 = 4096;

/// Well-known control channel for a supervisor domain.
pub fn control_channel(domain: &str) -> String {
    if domain.is_empty() {
        "SV_CTL__default".to_owned()
    } else {
        format!("SV_CTL__{domain}")
    }
}

/// A fresh, process-unique reply channel name.
pub fn reply_channel() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let n = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("SV_RPY__{}_{n}", std::process::id())
}

/// Check-in request document.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckinRequest {
    pub op: String,
    pub pid: u32,
}

impl CheckinRequest {
    pub fn new() -> Self {
        Self {
            op: OP_CHECKIN.to_owned(),
            pid: std::process::id(),
        }
    }
}

impl Default for CheckinRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Check-in reply document: the supervisor's services table, mapping
/// service name to endpoint channel name. `error` is set instead when the
/// supervisor refuses the request.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CheckinReply {
    #[serde(default)]
    pub services: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
