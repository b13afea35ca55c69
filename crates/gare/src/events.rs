// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed event emission to pluggable sinks.
//!
//! Events fan out over a broadcast channel. Each attached sink runs in its
//! own task with its own bounded receiver; a sink that falls behind loses
//! the oldest events (broadcast lag), never the emitter. Delivery is
//! at-least-once, best-effort: sink failures are logged and dropped, they
//! never propagate back into the mutating transaction.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::{QueueStatus, StaffPublic};

/// Default per-sink buffer depth.
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffAction {
    Created,
    Updated,
    StatusToggled,
    Deleted,
}

/// The fixed event taxonomy. Surface-specific aliases belong to the client
/// fan-out layer, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeEvent {
    #[serde(rename = "queue.entered")]
    QueueEntered {
        queue_id: String,
        vehicle_id: String,
        destination_id: String,
        position: u32,
    },
    #[serde(rename = "queue.exited")]
    QueueExited {
        queue_id: String,
        vehicle_id: String,
        destination_id: String,
    },
    #[serde(rename = "queue.statusChanged")]
    QueueStatusChanged {
        queue_id: String,
        old_status: QueueStatus,
        new_status: QueueStatus,
    },
    #[serde(rename = "queue.seatsChanged")]
    QueueSeatsChanged { queue_id: String, available_seats: u32 },
    #[serde(rename = "booking.created")]
    BookingCreated {
        booking_id: String,
        queue_id: String,
        seats: u32,
        amount: f64,
        destination_id: String,
        license_plate: String,
    },
    #[serde(rename = "booking.verified")]
    BookingVerified { booking_id: String, verified_by: String },
    #[serde(rename = "trip.created")]
    TripCreated {
        trip_id: String,
        vehicle_id: String,
        destination_id: String,
        seats_booked: u32,
    },
    #[serde(rename = "staff.updated")]
    StaffUpdated { action: StaffAction, staff: StaffPublic },
}

/// Event kinds, for sink interest registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    QueueEntered,
    QueueExited,
    QueueStatusChanged,
    QueueSeatsChanged,
    BookingCreated,
    BookingVerified,
    TripCreated,
    StaffUpdated,
}

impl NodeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::QueueEntered { .. } => EventKind::QueueEntered,
            Self::QueueExited { .. } => EventKind::QueueExited,
            Self::QueueStatusChanged { .. } => EventKind::QueueStatusChanged,
            Self::QueueSeatsChanged { .. } => EventKind::QueueSeatsChanged,
            Self::BookingCreated { .. } => EventKind::BookingCreated,
            Self::BookingVerified { .. } => EventKind::BookingVerified,
            Self::TripCreated { .. } => EventKind::TripCreated,
            Self::StaffUpdated { .. } => EventKind::StaffUpdated,
        }
    }

    /// Wire name of the event (`queue.entered`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            Self::QueueEntered { .. } => "queue.entered",
            Self::QueueExited { .. } => "queue.exited",
            Self::QueueStatusChanged { .. } => "queue.statusChanged",
            Self::QueueSeatsChanged { .. } => "queue.seatsChanged",
            Self::BookingCreated { .. } => "booking.created",
            Self::BookingVerified { .. } => "booking.verified",
            Self::TripCreated { .. } => "trip.created",
            Self::StaffUpdated { .. } => "staff.updated",
        }
    }
}

/// A delivery target: operator channel bridge, central uplink, test probe.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Interest filter; default accepts everything.
    fn wants(&self, kind: EventKind) -> bool {
        let _ = kind;
        true
    }

    async fn deliver(&self, event: &NodeEvent) -> anyhow::Result<()>;
}

/// Event hub. Cheap to clone; all clones share one channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<NodeEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    /// Emit an event. Never blocks, never fails: with no sinks attached the
    /// event is discarded.
    pub fn emit(&self, event: NodeEvent) {
        debug!(event = event.name(), "emit");
        let _ = self.tx.send(event);
    }

    /// Raw subscription, for tests and ad-hoc consumers.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.tx.subscribe()
    }

    /// Attach a sink: spawns its forwarding task, which runs until `cancel`.
    pub fn attach_sink(&self, sink: Arc<dyn EventSink>, cancel: CancellationToken) {
        let mut rx = self.tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => {
                        let event = match event {
                            Ok(e) => e,
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(sink = sink.name(), dropped = n, "sink lagged, oldest events dropped");
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        };
                        if !sink.wants(event.kind()) {
                            continue;
                        }
                        if let Err(e) = sink.deliver(&event).await {
                            warn!(sink = sink.name(), event = event.name(), err = %e, "sink delivery failed");
                        }
                    }
                }
            }
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
