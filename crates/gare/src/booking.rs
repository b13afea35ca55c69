// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic cash-booking allocation and ticket verification.
//!
//! One allocation is one serializable store transaction: plan greedily along
//! the canonical queue order, re-check each row, conditionally decrement its
//! seats, and transition rows that hit zero to READY (creating the trip),
//! all or nothing. Events go out after commit, best-effort.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{NodeError, Result};
use crate::events::{EventBus, NodeEvent};
use crate::ids::{epoch_ms, new_id, ticket_code};
use crate::model::{
    Booking, BookingSource, PaymentMethod, PaymentStatus, QueueStatus, Trip,
};
use crate::queue::ready_row;
use crate::store::{Store, Tables};

/// Attempts at drawing an unused ticket code before giving up. Collisions
/// are vanishingly rare at 36^6 codes; this bounds the pathological case.
const CODE_DRAW_ATTEMPTS: usize = 16;

pub struct BookingAllocator {
    store: Arc<Store>,
    bus: EventBus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CashBookingRequest {
    pub destination_id: String,
    pub seats_requested: u32,
    pub staff_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CashBookingResult {
    pub bookings: Vec<Booking>,
    pub total_amount: f64,
    pub ticket_codes: Vec<String>,
}

/// Seat availability for one destination (`booking.availableDestinations`).
#[derive(Debug, Clone, Serialize)]
pub struct DestinationAvailability {
    pub destination_id: String,
    pub destination_name: String,
    pub vehicle_count: u32,
    pub total_available_seats: u32,
}

/// What one committed allocation changed, for post-commit event emission.
struct AllocationOutcome {
    bookings: Vec<Booking>,
    /// (queue id, seats remaining) per mutated row.
    seat_changes: Vec<(String, u32)>,
    /// (old status, trip) per row that reached READY.
    readied: Vec<(QueueStatus, Trip)>,
}

impl BookingAllocator {
    pub fn new(store: Arc<Store>, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// Sell `seats_requested` cash seats for a destination.
    ///
    /// Earlier positions fill first and OVERNIGHT rows take priority. A
    /// `ConcurrentConflict` is retried once; the second failure surfaces.
    pub async fn create_cash_booking(&self, req: CashBookingRequest) -> Result<CashBookingResult> {
        if req.seats_requested == 0 {
            return Err(NodeError::InvalidArgument("seats_requested must be >= 1".into()));
        }
        if req.staff_id.is_empty() {
            return Err(NodeError::InvalidArgument("staff_id is required".into()));
        }

        let mut attempt = 0;
        let outcome = loop {
            match self.allocate_once(&req).await {
                Ok(outcome) => break outcome,
                Err(e) if e.is_retryable() && attempt == 0 => {
                    debug!(destination = %req.destination_id, "allocation conflict, retrying once");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        // Post-commit, best-effort: the trip rows are already persisted, so
        // READY status events follow them.
        for booking in &outcome.bookings {
            let license_plate = self.plate_for_queue(&booking.queue_id).await;
            self.bus.emit(NodeEvent::BookingCreated {
                booking_id: booking.id.clone(),
                queue_id: booking.queue_id.clone(),
                seats: booking.seats_booked,
                amount: booking.total_amount,
                destination_id: req.destination_id.clone(),
                license_plate,
            });
        }
        for (queue_id, available_seats) in &outcome.seat_changes {
            self.bus.emit(NodeEvent::QueueSeatsChanged {
                queue_id: queue_id.clone(),
                available_seats: *available_seats,
            });
        }
        for (old_status, trip) in &outcome.readied {
            self.bus.emit(NodeEvent::TripCreated {
                trip_id: trip.id.clone(),
                vehicle_id: trip.vehicle_id.clone(),
                destination_id: trip.destination_id.clone(),
                seats_booked: trip.seats_booked,
            });
            self.bus.emit(NodeEvent::QueueStatusChanged {
                queue_id: trip.queue_id.clone(),
                old_status: *old_status,
                new_status: QueueStatus::Ready,
            });
        }

        let total_amount = outcome.bookings.iter().map(|b| b.total_amount).sum();
        let ticket_codes =
            outcome.bookings.iter().map(|b| b.verification_code.clone()).collect();
        Ok(CashBookingResult { bookings: outcome.bookings, total_amount, ticket_codes })
    }

    async fn allocate_once(&self, req: &CashBookingRequest) -> Result<AllocationOutcome> {
        let req = req.clone();
        self.store
            .transaction(move |t| {
                // 1. Canonical-order rows for the destination.
                let rows: Vec<(String, u32, f64, QueueStatus)> = t
                    .queue_rows_for_destination(&req.destination_id)
                    .iter()
                    .map(|r| (r.id.clone(), r.available_seats, r.base_price, r.status))
                    .collect();

                // 2. Feasibility.
                let available: u32 = rows.iter().map(|(_, seats, _, _)| seats).sum();
                if available < req.seats_requested {
                    return Err(NodeError::InsufficientSeats {
                        requested: req.seats_requested,
                        available,
                    });
                }

                // 3. Greedy plan: earlier positions fill first.
                let mut remaining = req.seats_requested;
                let mut plan = Vec::new();
                for (queue_id, seats, row_price, status) in rows {
                    if remaining == 0 {
                        break;
                    }
                    let take = remaining.min(seats);
                    if take == 0 {
                        continue;
                    }
                    plan.push((queue_id, take, row_price, status));
                    remaining -= take;
                }

                // Active route price overrides the rows' own tariff.
                let route_price = t.route_for_destination(&req.destination_id).map(|r| r.base_price);

                // 4. Execute each allocation unit.
                let now = epoch_ms();
                let mut outcome = AllocationOutcome {
                    bookings: Vec::with_capacity(plan.len()),
                    seat_changes: Vec::with_capacity(plan.len()),
                    readied: Vec::new(),
                };
                for (queue_id, take, row_price, old_status) in plan {
                    // 4a. Re-read; the plan must still fit.
                    let current = t
                        .queues
                        .get(&queue_id)
                        .map(|r| r.available_seats)
                        .ok_or(NodeError::ConcurrentConflict)?;
                    if current < take {
                        return Err(NodeError::ConcurrentConflict);
                    }

                    // 4b. Price resolution.
                    let seat_price = route_price.unwrap_or(row_price);

                    // 4c. Booking with a fresh unique code.
                    let code = draw_code(t)?;
                    let booking = Booking {
                        id: new_id(),
                        queue_id: queue_id.clone(),
                        seats_booked: take,
                        total_amount: seat_price * f64::from(take),
                        booking_source: BookingSource::Station,
                        payment_status: PaymentStatus::Paid,
                        payment_method: PaymentMethod::Cash,
                        verification_code: code,
                        is_verified: false,
                        verified_at: None,
                        verified_by_id: None,
                        created_by: req.staff_id.clone(),
                        created_at: now,
                    };
                    t.bookings.insert(booking.id.clone(), booking.clone());
                    outcome.bookings.push(booking);

                    // 4d. Conditional decrement (row-level compare-and-set).
                    let left = t.decrement_seats_if(&queue_id, take)?;
                    outcome.seat_changes.push((queue_id.clone(), left));

                    // 4e. Full vehicle: READY + trip, same transaction.
                    if left == 0 {
                        let trip = ready_row(t, &queue_id)?;
                        outcome.readied.push((old_status, trip));
                    }
                }

                Ok(outcome)
            })
            .await
    }

    /// Verify a passenger ticket exactly once.
    pub async fn verify_ticket(&self, code: &str, staff_id: &str) -> Result<Booking> {
        let code = code.to_owned();
        let staff_id = staff_id.to_owned();
        let verified = self
            .store
            .transaction(move |t| {
                let id = t
                    .booking_by_code(&code)
                    .map(|b| b.id.clone())
                    .ok_or(NodeError::UnknownTicket)?;
                let booking = t
                    .bookings
                    .get_mut(&id)
                    .ok_or(NodeError::UnknownTicket)?;
                if booking.is_verified {
                    return Err(NodeError::AlreadyVerified);
                }
                booking.is_verified = true;
                booking.verified_at = Some(epoch_ms());
                booking.verified_by_id = Some(staff_id.clone());
                Ok(booking.clone())
            })
            .await?;

        self.bus.emit(NodeEvent::BookingVerified {
            booking_id: verified.id.clone(),
            verified_by: staff_id_of(&verified),
        });
        Ok(verified)
    }

    /// Destinations with sellable seats right now.
    pub async fn available_destinations(&self) -> Vec<DestinationAvailability> {
        self.store
            .read(|t| {
                let mut destinations: Vec<String> = t
                    .queues
                    .values()
                    .filter(|q| q.in_service() && q.available_seats > 0)
                    .map(|q| q.destination_id.clone())
                    .collect();
                destinations.sort();
                destinations.dedup();

                destinations
                    .into_iter()
                    .map(|dest| {
                        let rows = t.queue_rows_for_destination(&dest);
                        DestinationAvailability {
                            destination_name: rows
                                .first()
                                .map(|r| r.destination_name.clone())
                                .unwrap_or_default(),
                            vehicle_count: rows.iter().filter(|r| r.available_seats > 0).count()
                                as u32,
                            total_available_seats: rows
                                .iter()
                                .map(|r| r.available_seats)
                                .sum(),
                            destination_id: dest,
                        }
                    })
                    .collect()
            })
            .await
    }

    async fn plate_for_queue(&self, queue_id: &str) -> String {
        let queue_id = queue_id.to_owned();
        self.store
            .read(move |t| {
                t.queues
                    .get(&queue_id)
                    .and_then(|q| t.vehicles.get(&q.vehicle_id))
                    .map(|v| v.license_plate.clone())
                    .unwrap_or_default()
            })
            .await
    }
}

/// Draw a ticket code that is free in this store, retrying on collision.
fn draw_code(t: &Tables) -> Result<String> {
    for _ in 0..CODE_DRAW_ATTEMPTS {
        let code = ticket_code();
        if !t.code_in_use(&code) {
            return Ok(code);
        }
    }
    Err(NodeError::Conflict("ticket code space exhausted".into()))
}

fn staff_id_of(booking: &Booking) -> String {
    booking.verified_by_id.clone().unwrap_or_default()
}

#[cfg(test)]
#[path = "booking_tests.rs"]
mod tests;
