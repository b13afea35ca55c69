// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Entity types persisted by the store and carried on the wire.
//!
//! Identity-bearing entities (vehicles, drivers, routes, staff) are owned by
//! the central server and only mutated locally through the reconciler. Queue
//! rows, bookings, and trips are owned by this station.
//!
//! All timestamps are UTC epoch milliseconds.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

// -- Station ------------------------------------------------------------------

/// This station's identity. Loaded at boot, refreshable from the supervisor
/// config file, immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub station_id: String,
    pub station_name: String,
    pub delegation: String,
    pub governorate: String,
}

// -- Fleet entities (central-owned) -------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: String,
    pub license_plate: String,
    pub capacity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub is_active: bool,
    pub is_available: bool,
    /// When this record was last written by an inbound sync.
    pub synced_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub id: String,
    /// National id number, exactly 8 digits, unique.
    pub cin: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_governorate_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_delegation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_address: Option<String>,
    pub account_status: String,
    pub is_active: bool,
    /// 1:1 with [`Vehicle`]; the vehicle has no back-pointer.
    pub vehicle_id: String,
}

/// Join entity: presence means the vehicle may operate from the station.
/// Rewritten en bloc per vehicle on each sync; id is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizedStation {
    pub id: String,
    pub vehicle_id: String,
    pub station_id: String,
}

impl AuthorizedStation {
    pub fn new(vehicle_id: &str, station_id: &str) -> Self {
        Self {
            id: format!("{vehicle_id}_{station_id}"),
            vehicle_id: vehicle_id.to_owned(),
            station_id: station_id.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    /// Destination station this route points at.
    pub station_id: String,
    pub base_price: f64,
    pub is_active: bool,
}

// -- Staff & sessions ---------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StaffRole {
    Worker,
    Supervisor,
    Admin,
}

impl StaffRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Worker => "WORKER",
            Self::Supervisor => "SUPERVISOR",
            Self::Admin => "ADMIN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Staff {
    pub id: String,
    pub cin: String,
    pub first_name: String,
    pub last_name: String,
    pub role: StaffRole,
    pub phone_number: String,
    /// Salted hash, never the cleartext. Defaults to the hashed CIN.
    pub password: String,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<u64>,
}

/// Staff record with the password hash stripped, safe for clients and tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffPublic {
    pub id: String,
    pub cin: String,
    pub first_name: String,
    pub last_name: String,
    pub role: StaffRole,
    pub phone_number: String,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<u64>,
}

impl From<&Staff> for StaffPublic {
    fn from(s: &Staff) -> Self {
        Self {
            id: s.id.clone(),
            cin: s.cin.clone(),
            first_name: s.first_name.clone(),
            last_name: s.last_name.clone(),
            role: s.role,
            phone_number: s.phone_number.clone(),
            is_active: s.is_active,
            last_login: s.last_login,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub staff_id: String,
    /// Stored verbatim; the token is the lookup key.
    pub token: String,
    /// JSON snapshot of the staff record at login time.
    pub staff_data: serde_json::Value,
    pub is_active: bool,
    pub last_activity: u64,
    pub expires_at: u64,
    /// True when the session was issued while the central link was down.
    pub created_offline: bool,
}

// -- Queue rows ---------------------------------------------------------------

/// Overnight rows are serviced before regular rows; the derived order
/// (OVERNIGHT < REGULAR) is what the canonical sort relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueType {
    Overnight,
    Regular,
}

impl QueueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overnight => "OVERNIGHT",
            Self::Regular => "REGULAR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Waiting,
    Loading,
    Ready,
    Departed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Loading => "LOADING",
            Self::Ready => "READY",
            Self::Departed => "DEPARTED",
        }
    }

    /// Legal transitions: WAITING→LOADING, LOADING→READY, READY→DEPARTED,
    /// and WAITING→READY (allowed only when no seats remain; the seat check
    /// is the engine's).
    pub fn can_transition_to(&self, next: QueueStatus) -> bool {
        matches!(
            (self, next),
            (Self::Waiting, Self::Loading)
                | (Self::Loading, Self::Ready)
                | (Self::Ready, Self::Departed)
                | (Self::Waiting, Self::Ready)
        )
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A vehicle positioned at a destination. The heart of the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleQueue {
    pub id: String,
    pub vehicle_id: String,
    pub destination_id: String,
    pub destination_name: String,
    pub queue_type: QueueType,
    /// 1-based, contiguous per destination over non-DEPARTED rows.
    pub queue_position: u32,
    pub status: QueueStatus,
    pub total_seats: u32,
    pub available_seats: u32,
    pub base_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_departure: Option<u64>,
}

impl VehicleQueue {
    /// Whether this row still participates in queue lookups.
    pub fn in_service(&self) -> bool {
        self.status != QueueStatus::Departed
    }
}

/// Canonical queue order: OVERNIGHT before REGULAR, then position ascending.
pub fn canonical_order(a: &VehicleQueue, b: &VehicleQueue) -> Ordering {
    a.queue_type.cmp(&b.queue_type).then(a.queue_position.cmp(&b.queue_position))
}

// -- Bookings -----------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingSource {
    Station,
    Online,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Paid,
    Pending,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
}

/// Created once, optionally verified, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub queue_id: String,
    pub seats_booked: u32,
    pub total_amount: f64,
    pub booking_source: BookingSource,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    /// 6-char base36 uppercase, unique.
    pub verification_code: String,
    pub is_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_by_id: Option<String>,
    /// Staff id of the operator who sold the ticket.
    pub created_by: String,
    pub created_at: u64,
}

// -- Trips --------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
}

/// Created the instant a queue row transitions to READY; shipped to central
/// by the reconciler. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: String,
    pub vehicle_id: String,
    pub license_plate: String,
    pub destination_id: String,
    pub destination_name: String,
    pub queue_id: String,
    pub seats_booked: u32,
    pub start_time: u64,
    pub sync_status: SyncStatus,
    #[serde(default)]
    pub sync_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<u64>,
}

// -- Day passes ---------------------------------------------------------------

/// Only aggregated in reports; not creatable through this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayPass {
    pub id: String,
    pub license_plate: String,
    pub price: f64,
    pub purchase_date: u64,
    pub created_by: String,
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
