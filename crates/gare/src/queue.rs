// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Destination queue engine: ordered vehicle queues per destination, status
//! transitions, and seat accounting.
//!
//! Position invariant: non-DEPARTED rows at a destination always hold a
//! contiguous 1..N; [`QueueEngine::exit`] compacts the gap. The READY
//! transition and trip creation are co-owned with the booking allocator:
//! both go through [`ready_row`] inside the mutating transaction, and the
//! `queue.statusChanged` event for READY is emitted only after the trip row
//! is committed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{NodeError, Result};
use crate::events::{EventBus, NodeEvent};
use crate::ids::{epoch_ms, new_id};
use crate::model::{QueueStatus, QueueType, SyncStatus, Trip, VehicleQueue};
use crate::store::{Store, Tables};

pub struct QueueEngine {
    store: Arc<Store>,
    bus: EventBus,
    station_id: String,
}

/// Client request to join a queue. Destination resolution happens in the
/// client layer; this core takes it as given.
#[derive(Debug, Clone, Deserialize)]
pub struct EnterQueueRequest {
    pub license_plate: String,
    pub destination_id: String,
    pub destination_name: String,
    #[serde(default = "default_queue_type")]
    pub queue_type: QueueType,
}

fn default_queue_type() -> QueueType {
    QueueType::Regular
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueJoin {
    pub queue_id: String,
    pub destination_id: String,
    pub position: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DestinationStats {
    pub destination_id: String,
    pub destination_name: String,
    pub vehicles: u32,
    pub waiting: u32,
    pub loading: u32,
    pub ready: u32,
    pub total_available_seats: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub per_destination: Vec<DestinationStats>,
    pub vehicles_in_service: u32,
    pub total_available_seats: u32,
}

impl QueueEngine {
    pub fn new(store: Arc<Store>, bus: EventBus, station_id: impl Into<String>) -> Self {
        Self { store, bus, station_id: station_id.into() }
    }

    /// Join the queue for a destination.
    ///
    /// The new row enters WAITING at position `1 + max(existing)` with all
    /// seats available; the base price comes from the destination's active
    /// route when one is synced.
    pub async fn enter(&self, req: EnterQueueRequest) -> Result<QueueJoin> {
        let station_id = self.station_id.clone();
        let join = self
            .store
            .transaction(move |t| {
                let vehicle = t
                    .vehicle_by_plate(&req.license_plate)
                    .ok_or_else(|| NodeError::VehicleUnknown(req.license_plate.clone()))?
                    .clone();
                if !vehicle.is_active {
                    return Err(NodeError::VehicleInactive(vehicle.license_plate));
                }
                if !t.is_vehicle_authorized(&vehicle.id, &station_id) {
                    return Err(NodeError::VehicleNotAuthorizedHere(vehicle.license_plate));
                }
                if t.live_row_for_vehicle(&vehicle.id).is_some() {
                    return Err(NodeError::VehicleAlreadyQueued(vehicle.license_plate));
                }

                let position = 1 + t.max_position(&req.destination_id);
                let base_price = t
                    .route_for_destination(&req.destination_id)
                    .map(|r| r.base_price)
                    .unwrap_or(0.0);

                let row = VehicleQueue {
                    id: new_id(),
                    vehicle_id: vehicle.id.clone(),
                    destination_id: req.destination_id.clone(),
                    destination_name: req.destination_name.clone(),
                    queue_type: req.queue_type,
                    queue_position: position,
                    status: QueueStatus::Waiting,
                    total_seats: vehicle.capacity,
                    available_seats: vehicle.capacity,
                    base_price,
                    estimated_departure: None,
                };
                let join = QueueJoin {
                    queue_id: row.id.clone(),
                    destination_id: row.destination_id.clone(),
                    position,
                };
                t.queues.insert(row.id.clone(), row);
                Ok((join, vehicle.id))
            })
            .await?;

        let (join, vehicle_id) = join;
        self.bus.emit(NodeEvent::QueueEntered {
            queue_id: join.queue_id.clone(),
            vehicle_id,
            destination_id: join.destination_id.clone(),
            position: join.position,
        });
        Ok(join)
    }

    /// Leave the queue. Refuses while unverified bookings are outstanding;
    /// those must be cancelled through a separate path first.
    pub async fn exit(&self, license_plate: &str) -> Result<()> {
        let plate = license_plate.to_owned();
        let removed = self
            .store
            .transaction(move |t| {
                let vehicle_id = t
                    .vehicle_by_plate(&plate)
                    .map(|v| v.id.clone())
                    .ok_or_else(|| NodeError::NotInQueue(plate.clone()))?;
                let row = t
                    .live_row_for_vehicle(&vehicle_id)
                    .cloned()
                    .ok_or_else(|| NodeError::NotInQueue(plate.clone()))?;

                let outstanding = t.unverified_bookings_for_queue(&row.id);
                if outstanding > 0 {
                    return Err(NodeError::HasOutstandingBookings(outstanding));
                }

                t.queues.remove(&row.id);
                t.compact_positions(&row.destination_id, row.queue_position);
                Ok(row)
            })
            .await?;

        self.bus.emit(NodeEvent::QueueExited {
            queue_id: removed.id,
            vehicle_id: removed.vehicle_id,
            destination_id: removed.destination_id,
        });
        Ok(())
    }

    /// Drive the status machine for a vehicle's live row.
    ///
    /// READY demands zero available seats unless `force` (the cash path
    /// never forces). A READY transition creates the trip record inside the
    /// same transaction.
    pub async fn update_status(
        &self,
        license_plate: &str,
        new_status: QueueStatus,
        force: bool,
    ) -> Result<()> {
        let plate = license_plate.to_owned();
        let (row, old_status, trip) = self
            .store
            .transaction(move |t| {
                let vehicle_id = t
                    .vehicle_by_plate(&plate)
                    .map(|v| v.id.clone())
                    .ok_or_else(|| NodeError::NotInQueue(plate.clone()))?;
                let row_id = t
                    .live_row_for_vehicle(&vehicle_id)
                    .map(|q| q.id.clone())
                    .ok_or_else(|| NodeError::NotInQueue(plate.clone()))?;

                let (old_status, seats) = {
                    let row = t
                        .queues
                        .get(&row_id)
                        .ok_or_else(|| NodeError::NotInQueue(plate.clone()))?;
                    (row.status, row.available_seats)
                };

                if !old_status.can_transition_to(new_status) {
                    return Err(NodeError::IllegalStateTransition { from: old_status, to: new_status });
                }
                if new_status == QueueStatus::Ready && seats > 0 && !force {
                    return Err(NodeError::IllegalStateTransition { from: old_status, to: new_status });
                }

                let trip = if new_status == QueueStatus::Ready {
                    Some(ready_row(t, &row_id)?)
                } else if let Some(row) = t.queues.get_mut(&row_id) {
                    row.status = new_status;
                    None
                } else {
                    None
                };

                let row = t
                    .queues
                    .get(&row_id)
                    .cloned()
                    .ok_or_else(|| NodeError::NotInQueue(plate.clone()))?;
                Ok((row, old_status, trip))
            })
            .await?;

        // Trip is committed at this point; READY's statusChanged follows it.
        if let Some(trip) = trip {
            self.bus.emit(NodeEvent::TripCreated {
                trip_id: trip.id,
                vehicle_id: trip.vehicle_id,
                destination_id: trip.destination_id,
                seats_booked: trip.seats_booked,
            });
        }
        self.bus.emit(NodeEvent::QueueStatusChanged {
            queue_id: row.id,
            old_status,
            new_status,
        });
        Ok(())
    }

    /// Non-DEPARTED rows with seats remaining, canonical order. A missing
    /// destination filter returns every destination's rows.
    pub async fn list_available(&self, destination_id: Option<&str>) -> Vec<VehicleQueue> {
        let filter = destination_id.map(str::to_owned);
        self.store
            .read(move |t| {
                let mut destinations: Vec<String> = match filter {
                    Some(d) => vec![d],
                    None => {
                        let mut all: Vec<String> = t
                            .queues
                            .values()
                            .filter(|q| q.in_service())
                            .map(|q| q.destination_id.clone())
                            .collect();
                        all.sort();
                        all.dedup();
                        all
                    }
                };
                let mut rows = Vec::new();
                for dest in destinations.drain(..) {
                    rows.extend(
                        t.queue_rows_for_destination(&dest)
                            .into_iter()
                            .filter(|q| q.available_seats > 0)
                            .cloned(),
                    );
                }
                rows
            })
            .await
    }

    pub async fn stats(&self) -> QueueStats {
        self.store
            .read(|t| {
                let mut destinations: Vec<String> = t
                    .queues
                    .values()
                    .filter(|q| q.in_service())
                    .map(|q| q.destination_id.clone())
                    .collect();
                destinations.sort();
                destinations.dedup();

                let mut per_destination = Vec::with_capacity(destinations.len());
                let mut vehicles_in_service = 0;
                let mut total_available_seats = 0;
                for dest in destinations {
                    let rows = t.queue_rows_for_destination(&dest);
                    let mut stats = DestinationStats {
                        destination_id: dest,
                        destination_name: rows
                            .first()
                            .map(|r| r.destination_name.clone())
                            .unwrap_or_default(),
                        vehicles: rows.len() as u32,
                        waiting: 0,
                        loading: 0,
                        ready: 0,
                        total_available_seats: 0,
                    };
                    for row in rows {
                        match row.status {
                            QueueStatus::Waiting => stats.waiting += 1,
                            QueueStatus::Loading => stats.loading += 1,
                            QueueStatus::Ready => stats.ready += 1,
                            QueueStatus::Departed => {}
                        }
                        stats.total_available_seats += row.available_seats;
                    }
                    vehicles_in_service += stats.vehicles;
                    total_available_seats += stats.total_available_seats;
                    per_destination.push(stats);
                }
                QueueStats { per_destination, vehicles_in_service, total_available_seats }
            })
            .await
    }
}

/// Transition a row to READY and create its trip record, in-transaction.
///
/// Shared by the engine (`update_status`) and the booking allocator (seat
/// count hit zero during allocation). The trip manifest counts seats across
/// PAID and PENDING bookings on the row.
pub(crate) fn ready_row(t: &mut Tables, queue_id: &str) -> Result<Trip> {
    let now = epoch_ms();
    let row = t
        .queues
        .get_mut(queue_id)
        .ok_or_else(|| NodeError::NotFound(format!("queue row {queue_id}")))?;
    row.status = QueueStatus::Ready;
    row.estimated_departure = Some(now);
    let row = row.clone();

    let license_plate = t
        .vehicles
        .get(&row.vehicle_id)
        .map(|v| v.license_plate.clone())
        .unwrap_or_default();
    let trip = Trip {
        id: new_id(),
        vehicle_id: row.vehicle_id.clone(),
        license_plate,
        destination_id: row.destination_id.clone(),
        destination_name: row.destination_name.clone(),
        queue_id: row.id.clone(),
        seats_booked: t.booked_seats_for_queue(&row.id),
        start_time: now,
        sync_status: SyncStatus::Pending,
        sync_attempts: 0,
        synced_at: None,
    };
    t.trips.insert(trip.id.clone(), trip.clone());
    Ok(trip)
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
