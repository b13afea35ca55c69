// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transactional persistence of entities and queue rows.
//!
//! The working set lives in [`Tables`] behind one `tokio::sync::RwLock`.
//! [`Store::transaction`] runs a closure under the write guard, which makes
//! every multi-statement mutation serializable; a failed closure rolls the
//! tables back to their pre-transaction state. Conditional updates (the seat
//! decrement used by the booking allocator) are guarded helpers on `Tables`.
//!
//! Durability is a JSON snapshot written atomically after each commit
//! (write tmp + rename). The relational collaborator behind this interface
//! is out of scope; the snapshot carries node state across restarts.

pub mod snapshot;

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::{NodeError, Result};
use crate::model::{
    canonical_order, AuthorizedStation, Booking, DayPass, Driver, PaymentStatus, QueueStatus,
    Route, Session, Staff, Trip, Vehicle, VehicleQueue,
};

/// Every table, keyed by record id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tables {
    pub vehicles: HashMap<String, Vehicle>,
    pub drivers: HashMap<String, Driver>,
    pub authorized: HashMap<String, AuthorizedStation>,
    pub routes: HashMap<String, Route>,
    pub staff: HashMap<String, Staff>,
    pub sessions: HashMap<String, Session>,
    pub queues: HashMap<String, VehicleQueue>,
    pub bookings: HashMap<String, Booking>,
    pub trips: HashMap<String, Trip>,
    pub day_passes: HashMap<String, DayPass>,
}

impl Tables {
    // -- Fleet lookups --------------------------------------------------------

    pub fn vehicle_by_plate(&self, license_plate: &str) -> Option<&Vehicle> {
        self.vehicles.values().find(|v| v.license_plate == license_plate)
    }

    pub fn driver_for_vehicle(&self, vehicle_id: &str) -> Option<&Driver> {
        self.drivers.values().find(|d| d.vehicle_id == vehicle_id)
    }

    pub fn driver_by_cin(&self, cin: &str) -> Option<&Driver> {
        self.drivers.values().find(|d| d.cin == cin)
    }

    pub fn is_vehicle_authorized(&self, vehicle_id: &str, station_id: &str) -> bool {
        self.authorized.contains_key(&format!("{vehicle_id}_{station_id}"))
    }

    /// Authorized-station row ids for one vehicle, for the en-bloc rewrite.
    pub fn authorized_ids_for_vehicle(&self, vehicle_id: &str) -> Vec<String> {
        self.authorized
            .values()
            .filter(|a| a.vehicle_id == vehicle_id)
            .map(|a| a.id.clone())
            .collect()
    }

    /// The active route whose destination is `destination_id`, if any.
    pub fn route_for_destination(&self, destination_id: &str) -> Option<&Route> {
        self.routes.values().find(|r| r.station_id == destination_id && r.is_active)
    }

    // -- Staff & sessions -----------------------------------------------------

    pub fn staff_by_cin(&self, cin: &str) -> Option<&Staff> {
        self.staff.values().find(|s| s.cin == cin)
    }

    pub fn session_by_token(&self, token: &str) -> Option<&Session> {
        self.sessions.values().find(|s| s.token == token)
    }

    /// Deactivate every active session belonging to `staff_id`.
    /// Returns how many were deactivated.
    pub fn deactivate_sessions_for(&mut self, staff_id: &str) -> usize {
        let mut n = 0;
        for session in self.sessions.values_mut() {
            if session.staff_id == staff_id && session.is_active {
                session.is_active = false;
                n += 1;
            }
        }
        n
    }

    // -- Queue rows -----------------------------------------------------------

    /// Non-DEPARTED rows for a destination, in canonical order.
    pub fn queue_rows_for_destination(&self, destination_id: &str) -> Vec<&VehicleQueue> {
        let mut rows: Vec<&VehicleQueue> = self
            .queues
            .values()
            .filter(|q| q.in_service() && q.destination_id == destination_id)
            .collect();
        rows.sort_by(|a, b| canonical_order(a, b));
        rows
    }

    /// The vehicle's single non-DEPARTED row, if any (any destination).
    pub fn live_row_for_vehicle(&self, vehicle_id: &str) -> Option<&VehicleQueue> {
        self.queues.values().find(|q| q.in_service() && q.vehicle_id == vehicle_id)
    }

    /// Highest position among non-DEPARTED rows at a destination.
    pub fn max_position(&self, destination_id: &str) -> u32 {
        self.queues
            .values()
            .filter(|q| q.in_service() && q.destination_id == destination_id)
            .map(|q| q.queue_position)
            .max()
            .unwrap_or(0)
    }

    /// Close the gap after removing the row at `removed_position`:
    /// every later non-DEPARTED position at the destination shifts down by 1.
    pub fn compact_positions(&mut self, destination_id: &str, removed_position: u32) {
        for q in self.queues.values_mut() {
            if q.in_service()
                && q.destination_id == destination_id
                && q.queue_position > removed_position
            {
                q.queue_position -= 1;
            }
        }
    }

    /// Conditionally decrement `available_seats` by `take`.
    ///
    /// The row-level compare-and-set of the allocation algorithm: the
    /// decrement happens only if the current value still covers the take.
    /// Returns the new seat count, or `ConcurrentConflict`.
    pub fn decrement_seats_if(&mut self, queue_id: &str, take: u32) -> Result<u32> {
        let row = self
            .queues
            .get_mut(queue_id)
            .ok_or(NodeError::ConcurrentConflict)?;
        if row.available_seats < take {
            return Err(NodeError::ConcurrentConflict);
        }
        row.available_seats -= take;
        Ok(row.available_seats)
    }

    // -- Bookings & trips -----------------------------------------------------

    pub fn booking_by_code(&self, verification_code: &str) -> Option<&Booking> {
        self.bookings.values().find(|b| b.verification_code == verification_code)
    }

    pub fn code_in_use(&self, verification_code: &str) -> bool {
        self.booking_by_code(verification_code).is_some()
    }

    pub fn unverified_bookings_for_queue(&self, queue_id: &str) -> usize {
        self.bookings
            .values()
            .filter(|b| b.queue_id == queue_id && !b.is_verified)
            .count()
    }

    /// Seats across PAID/PENDING bookings for a queue row (the trip manifest).
    pub fn booked_seats_for_queue(&self, queue_id: &str) -> u32 {
        self.bookings
            .values()
            .filter(|b| {
                b.queue_id == queue_id
                    && matches!(b.payment_status, PaymentStatus::Paid | PaymentStatus::Pending)
            })
            .map(|b| b.seats_booked)
            .sum()
    }

    /// Oldest-first PENDING trips, at most `limit`.
    pub fn pending_trips(&self, limit: usize) -> Vec<Trip> {
        let mut pending: Vec<Trip> = self
            .trips
            .values()
            .filter(|t| t.sync_status == crate::model::SyncStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.start_time);
        pending.truncate(limit);
        pending
    }
}

/// Shared handle over the tables plus the snapshot location.
pub struct Store {
    tables: RwLock<Tables>,
    snapshot_path: Option<PathBuf>,
}

impl Store {
    /// Open the store, loading the snapshot if one exists.
    ///
    /// A present-but-unreadable snapshot is fatal: silently starting empty
    /// would resurrect sold seats.
    pub fn open(snapshot_path: Option<PathBuf>) -> Result<Self> {
        let tables = match &snapshot_path {
            Some(path) if path.exists() => snapshot::load(path)
                .map_err(|e| NodeError::StoreUnavailable(format!("{}: {e}", path.display())))?,
            _ => Tables::default(),
        };
        Ok(Self { tables: RwLock::new(tables), snapshot_path })
    }

    /// In-memory store for tests and ephemeral runs.
    pub fn in_memory() -> Self {
        Self { tables: RwLock::new(Tables::default()), snapshot_path: None }
    }

    /// Run a read-only closure under the read guard.
    pub async fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let guard = self.tables.read().await;
        f(&guard)
    }

    /// Run a serializable multi-statement transaction.
    ///
    /// The closure gets exclusive access to the tables. On `Err` every
    /// mutation it made is rolled back. On `Ok` the snapshot is written
    /// best-effort (a snapshot failure never fails the commit; the
    /// in-memory tables remain the source of truth).
    pub async fn transaction<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T>) -> Result<T> {
        let mut guard = self.tables.write().await;
        let backup = guard.clone();
        match f(&mut guard) {
            Ok(value) => {
                self.persist(&guard);
                Ok(value)
            }
            Err(e) => {
                *guard = backup;
                Err(e)
            }
        }
    }

    /// Write the snapshot now (used at shutdown).
    pub async fn flush(&self) {
        let guard = self.tables.read().await;
        self.persist(&guard);
    }

    fn persist(&self, tables: &Tables) {
        let Some(ref path) = self.snapshot_path else { return };
        if let Err(e) = snapshot::save(path, tables) {
            warn!(path = %path.display(), err = %e, "store snapshot write failed");
        }
    }
}

/// Whether a queue row satisfies the seat invariants.
/// Exposed for tests and the reconciler's integrity checks.
pub fn seat_invariants_hold(row: &VehicleQueue) -> bool {
    row.available_seats <= row.total_seats
        && (row.status != QueueStatus::Ready || row.available_seats == 0)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
