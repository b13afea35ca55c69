// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unified error taxonomy shared by every component of the node.
//!
//! Callers match on variants, so this is a typed enum rather than `anyhow`.
//! Stable string codes (for wire payloads and logs) live in [`NodeError::code`].

use crate::model::QueueStatus;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    // -- Input ----------------------------------------------------------------
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("illegal state transition {from} -> {to}")]
    IllegalStateTransition { from: QueueStatus, to: QueueStatus },

    // -- Resource -------------------------------------------------------------
    #[error("insufficient seats: requested {requested}, available {available}")]
    InsufficientSeats { requested: u32, available: u32 },

    #[error("vehicle {0} is already queued for this destination")]
    VehicleAlreadyQueued(String),

    #[error("vehicle {0} is unknown at this station")]
    VehicleUnknown(String),

    #[error("vehicle {0} is not authorized to operate from this station")]
    VehicleNotAuthorizedHere(String),

    #[error("vehicle {0} is inactive")]
    VehicleInactive(String),

    #[error("vehicle {0} is not in any queue")]
    NotInQueue(String),

    #[error("queue row has {0} outstanding unverified bookings")]
    HasOutstandingBookings(usize),

    #[error("ticket already verified")]
    AlreadyVerified,

    #[error("unknown ticket code")]
    UnknownTicket,

    // -- Auth -----------------------------------------------------------------
    #[error("unauthorized")]
    Unauthorized,

    // -- Concurrency ----------------------------------------------------------
    #[error("concurrent conflict, try again")]
    ConcurrentConflict,

    // -- Transport ------------------------------------------------------------
    #[error("central link is not connected")]
    NotConnected,

    #[error("central request timed out")]
    RequestTimedOut,

    #[error("central rejected the request: {0}")]
    CentralRejected(String),

    // -- Integrity ------------------------------------------------------------
    #[error("stale inbound sync: {0}")]
    StaleInboundSync(String),

    // -- Fatal ----------------------------------------------------------------
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl NodeError {
    /// Stable machine-readable code for acks, logs, and client payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::IllegalStateTransition { .. } => "ILLEGAL_STATE_TRANSITION",
            Self::InsufficientSeats { .. } => "INSUFFICIENT_SEATS",
            Self::VehicleAlreadyQueued(_) => "VEHICLE_ALREADY_QUEUED",
            Self::VehicleUnknown(_) => "VEHICLE_UNKNOWN",
            Self::VehicleNotAuthorizedHere(_) => "VEHICLE_NOT_AUTHORIZED",
            Self::VehicleInactive(_) => "VEHICLE_INACTIVE",
            Self::NotInQueue(_) => "NOT_IN_QUEUE",
            Self::HasOutstandingBookings(_) => "HAS_OUTSTANDING_BOOKINGS",
            Self::AlreadyVerified => "ALREADY_VERIFIED",
            Self::UnknownTicket => "UNKNOWN_TICKET",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::ConcurrentConflict => "CONCURRENT_CONFLICT",
            Self::NotConnected => "NOT_CONNECTED",
            Self::RequestTimedOut => "REQUEST_TIMED_OUT",
            Self::CentralRejected(_) => "CENTRAL_REJECTED",
            Self::StaleInboundSync(_) => "STALE_INBOUND_SYNC",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::ConfigInvalid(_) => "CONFIG_INVALID",
        }
    }

    /// Fatal errors terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::ConfigInvalid(_))
    }

    /// Whether the caller should retry the operation once before surfacing it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentConflict)
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
