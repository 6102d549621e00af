// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Typed failures of the service runner.

use std::io;

use thiserror::Error;

/// Everything that can go wrong while running a service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// `run` was called on an instance whose loop is already active.
    #[error("service loop is already running")]
    AlreadyRunning,

    /// The supervisor's services table has no entry for this service.
    #[error("service `{0}` is not registered with the supervisor")]
    NotRegistered(String),

    /// The check-in request could not be delivered, or no reply arrived.
    #[error("supervisor unreachable: {0}")]
    SupervisorUnreachable(String),

    /// The supervisor's reply was not a usable services table.
    #[error("malformed check-in exchange: {0}")]
    Protocol(String),

    /// Wait-set, timer, or endpoint setup failed.
    #[error("resource setup failed")]
    ResourceExhausted(#[source] io::Error),

    /// The receive loop faulted for a reason other than an intentional stop.
    #[error("receive failed")]
    Receive(#[source] io::Error),
}
