// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound entity sync: apply `vehicle_sync_*` frames to the local store.
//!
//! All three paths are idempotent: unchanged records are detected and
//! skipped without a single write, and upserts are keyed by stable central
//! ids. Frames for the same vehicle serialize on a per-vehicle lock;
//! different vehicles proceed in parallel. A malformed record never fails
//! its batch; it is skipped, counted, and reported in the ack.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::central::protocol::{
    BookingUpdatePayload, Frame, MessageType, SyncDriver, SyncRequestPayload, SyncVehicle,
    VehicleSyncAckPayload, VehicleSyncDeletePayload, VehicleSyncFullPayload,
    VehicleSyncUpdatePayload,
};
use crate::central::CentralLink;
use crate::error::{NodeError, Result};
use crate::ids::epoch_ms;
use crate::model::{AuthorizedStation, Driver, Vehicle};
use crate::store::Store;

/// Per-key serialization: one mutex per vehicle id, created on demand.
#[derive(Default)]
struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    async fn acquire(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            Arc::clone(map.entry(key.to_owned()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Result of one inbound batch.
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    pub processed: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl SyncOutcome {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// How one vehicle record was applied.
#[derive(Debug, PartialEq)]
enum Applied {
    New,
    Changed,
    Unchanged,
}

pub struct Reconciler {
    store: Arc<Store>,
    link: Arc<CentralLink>,
    station_id: String,
    locks: KeyedLocks,
    /// Dropped malformed inbound records.
    stale_inbound: AtomicU64,
}

impl Reconciler {
    pub fn new(store: Arc<Store>, link: Arc<CentralLink>, station_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            store,
            link,
            station_id: station_id.into(),
            locks: KeyedLocks::default(),
            stale_inbound: AtomicU64::new(0),
        })
    }

    /// Consume entity frames from the link until shutdown.
    pub fn spawn(self: &Arc<Self>, mut rx: mpsc::Receiver<Frame>, cancel: CancellationToken) {
        let reconciler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = rx.recv() => {
                        let Some(frame) = frame else { break };
                        reconciler.handle_frame(frame).await;
                    }
                }
            }
        });
    }

    /// Count of malformed inbound records dropped so far.
    pub fn stale_inbound(&self) -> u64 {
        self.stale_inbound.load(Ordering::Relaxed)
    }

    pub async fn handle_frame(&self, frame: Frame) {
        let message_id = frame.message_id.clone();
        match frame.kind {
            MessageType::VehicleSyncFull => match frame.payload_as::<VehicleSyncFullPayload>() {
                Ok(payload) => {
                    let outcome = self.apply_full(payload).await;
                    self.ack("full", &outcome, message_id).await;
                }
                Err(e) => warn!(err = %e, "malformed vehicle_sync_full dropped"),
            },
            MessageType::VehicleSyncUpdate => {
                match frame.payload_as::<VehicleSyncUpdatePayload>() {
                    Ok(payload) => {
                        let outcome = self.apply_update(payload).await;
                        self.ack("update", &outcome, message_id).await;
                    }
                    Err(e) => warn!(err = %e, "malformed vehicle_sync_update dropped"),
                }
            }
            MessageType::VehicleSyncDelete => {
                match frame.payload_as::<VehicleSyncDeletePayload>() {
                    Ok(payload) => {
                        let outcome = self.apply_delete(&payload.vehicle_id).await;
                        self.ack("delete", &outcome, message_id).await;
                    }
                    Err(e) => warn!(err = %e, "malformed vehicle_sync_delete dropped"),
                }
            }
            MessageType::BookingUpdate => match frame.payload_as::<BookingUpdatePayload>() {
                Ok(payload) => self.apply_booking_update(payload).await,
                Err(e) => warn!(err = %e, "malformed booking_update dropped"),
            },
            MessageType::DataUpdate => {
                // Central signals fresher data; ask for it.
                debug!("central signalled new data, requesting sync");
                let request = Frame::new(MessageType::SyncRequest, SyncRequestPayload {
                    station_id: self.station_id.clone(),
                    entity: Some("vehicles".to_owned()),
                });
                if let Err(e) = self.link.send(request).await {
                    debug!(err = %e, "sync request not sent");
                }
            }
            MessageType::SyncRequest => {
                // Central wants this station's live queue picture.
                self.report_queue_state(frame.message_id.clone()).await;
            }
            MessageType::VehicleSyncError => {
                warn!(payload = %frame.payload, "central reported a sync error");
            }
            MessageType::QueueUpdate | MessageType::VehicleUpdate
            | MessageType::StationStatusUpdate => {
                debug!(kind = ?frame.kind, "informational central frame");
            }
            other => {
                debug!(kind = ?other, "unhandled frame kind in reconciler");
            }
        }
    }

    /// Full sync: classify every inbound vehicle, apply NEW/CHANGED ones.
    /// Vehicles are independent and run concurrently under their own locks.
    pub async fn apply_full(&self, payload: VehicleSyncFullPayload) -> SyncOutcome {
        let applications = payload
            .vehicles
            .into_iter()
            .map(|vehicle| self.apply_one_authorized(vehicle));
        let results = futures_util::future::join_all(applications).await;

        let mut outcome = SyncOutcome::default();
        for result in results {
            match result {
                Ok(Applied::Unchanged) => outcome.skipped += 1,
                Ok(_) => outcome.processed += 1,
                Err(e) => {
                    self.stale_inbound.fetch_add(1, Ordering::Relaxed);
                    warn!(err = %e, "inbound vehicle skipped");
                    outcome.errors.push(e.to_string());
                }
            }
        }
        info!(
            processed = outcome.processed,
            skipped = outcome.skipped,
            errors = outcome.errors.len(),
            "vehicle full sync applied"
        );
        outcome
    }

    /// Single-record update. A vehicle no longer authorized here turns into
    /// a delete.
    pub async fn apply_update(&self, payload: VehicleSyncUpdatePayload) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();
        if !payload.vehicle.authorized_stations.contains(&self.station_id) {
            debug!(vehicle = %payload.vehicle.id, "authorization withdrawn, deleting locally");
            return self.apply_delete(&payload.vehicle.id).await;
        }
        match self.apply_one_authorized(payload.vehicle).await {
            Ok(Applied::Unchanged) => outcome.skipped += 1,
            Ok(_) => outcome.processed += 1,
            Err(e) => {
                self.stale_inbound.fetch_add(1, Ordering::Relaxed);
                warn!(err = %e, "inbound vehicle update skipped");
                outcome.errors.push(e.to_string());
            }
        }
        outcome
    }

    /// Transactional cascade: authorized-station rows, driver, vehicle.
    /// Missing locally is a no-op success.
    pub async fn apply_delete(&self, vehicle_id: &str) -> SyncOutcome {
        let _guard = self.locks.acquire(vehicle_id).await;
        let vehicle_id = vehicle_id.to_owned();
        let mut outcome = SyncOutcome::default();
        let removed: Result<bool> = self
            .store
            .transaction(move |t| {
                let existed = t.vehicles.contains_key(&vehicle_id);
                t.authorized.retain(|_, a| a.vehicle_id != vehicle_id);
                t.drivers.retain(|_, d| d.vehicle_id != vehicle_id);
                t.vehicles.remove(&vehicle_id);
                Ok(existed)
            })
            .await;
        match removed {
            Ok(true) => outcome.processed += 1,
            Ok(false) => outcome.skipped += 1,
            Err(e) => outcome.errors.push(e.to_string()),
        }
        outcome
    }

    /// Apply one vehicle that is (or claims to be) authorized here.
    async fn apply_one_authorized(&self, vehicle: SyncVehicle) -> Result<Applied> {
        if vehicle.id.is_empty() || vehicle.license_plate.is_empty() {
            return Err(NodeError::StaleInboundSync("vehicle without id or plate".into()));
        }
        if let Some(ref driver) = vehicle.driver {
            if driver.id.is_empty() {
                return Err(NodeError::StaleInboundSync(format!(
                    "driver without id on vehicle {}",
                    vehicle.id
                )));
            }
        }
        if !vehicle.authorized_stations.contains(&self.station_id) {
            // Full-sync batches simply skip foreign vehicles.
            return Ok(Applied::Unchanged);
        }

        let _guard = self.locks.acquire(&vehicle.id).await;

        // Classification reads first: an unchanged record costs zero writes.
        let classified = self
            .store
            .read({
                let vehicle = vehicle.clone();
                move |t| match t.vehicles.get(&vehicle.id) {
                    None => Applied::New,
                    Some(local) => {
                        let local_driver = t.driver_for_vehicle(&vehicle.id);
                        if vehicle_matches(local, &vehicle)
                            && driver_matches(local_driver, vehicle.driver.as_ref())
                        {
                            Applied::Unchanged
                        } else {
                            Applied::Changed
                        }
                    }
                }
            })
            .await;
        if classified == Applied::Unchanged {
            debug!(vehicle = %vehicle.id, "inbound vehicle unchanged, skipping");
            return Ok(Applied::Unchanged);
        }

        self.store
            .transaction(move |t| {
                let now = epoch_ms();
                // (a) upsert vehicle
                t.vehicles.insert(vehicle.id.clone(), Vehicle {
                    id: vehicle.id.clone(),
                    license_plate: vehicle.license_plate.clone(),
                    capacity: vehicle.capacity,
                    model: vehicle.model.clone(),
                    year: vehicle.year,
                    color: vehicle.color.clone(),
                    is_active: vehicle.is_active,
                    is_available: vehicle.is_available,
                    synced_at: now,
                });

                // (b) upsert the driver, or drop the local one when the
                // inbound record arrives driverless.
                match vehicle.driver {
                    Some(ref d) => {
                        t.drivers.insert(d.id.clone(), driver_from_sync(d, &vehicle.id));
                        // An older driver row for this vehicle under another
                        // id is stale.
                        let keep = d.id.clone();
                        let vehicle_id = vehicle.id.clone();
                        t.drivers.retain(|id, dr| dr.vehicle_id != vehicle_id || *id == keep);
                    }
                    None => {
                        t.drivers.retain(|_, d| d.vehicle_id != vehicle.id);
                    }
                }

                // (c) clear and rewrite authorized stations, deterministic ids.
                t.authorized.retain(|_, a| a.vehicle_id != vehicle.id);
                for station in &vehicle.authorized_stations {
                    let row = AuthorizedStation::new(&vehicle.id, station);
                    t.authorized.insert(row.id.clone(), row);
                }
                Ok(())
            })
            .await?;
        Ok(classified)
    }

    /// Idempotent payment-status application for a locally-known booking.
    async fn apply_booking_update(&self, payload: BookingUpdatePayload) {
        let Some(status) = payload.payment_status else {
            debug!("booking_update without payment status ignored");
            return;
        };
        let result: Result<bool> = self
            .store
            .transaction(move |t| {
                let id = payload
                    .booking_id
                    .clone()
                    .or_else(|| {
                        payload
                            .verification_code
                            .as_deref()
                            .and_then(|code| t.booking_by_code(code))
                            .map(|b| b.id.clone())
                    });
                let Some(id) = id else { return Ok(false) };
                let Some(booking) = t.bookings.get_mut(&id) else { return Ok(false) };
                if booking.payment_status == status {
                    return Ok(false);
                }
                booking.payment_status = status;
                Ok(true)
            })
            .await;
        match result {
            Ok(true) => debug!("booking payment status applied"),
            Ok(false) => debug!("booking_update was a no-op"),
            Err(e) => warn!(err = %e, "booking_update failed"),
        }
    }

    /// Answer an inbound `sync_request` with the live queue rows.
    async fn report_queue_state(&self, message_id: Option<String>) {
        let rows = self
            .store
            .read(|t| {
                t.queues
                    .values()
                    .filter(|q| q.in_service())
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .await;
        let payload = serde_json::json!({
            "stationId": self.station_id,
            "queues": rows,
        });
        let mut frame = Frame::new(MessageType::QueueUpdate, payload);
        frame.message_id = message_id;
        if let Err(e) = self.link.send(frame).await {
            debug!(err = %e, "queue state report not sent");
        }
    }

    async fn ack(&self, sync_type: &str, outcome: &SyncOutcome, message_id: Option<String>) {
        let frame = Frame::new(MessageType::VehicleSyncAck, VehicleSyncAckPayload {
            message_id,
            sync_type: sync_type.to_owned(),
            success: outcome.success(),
            errors: outcome.errors.clone(),
            station_id: self.station_id.clone(),
        });
        if let Err(e) = self.link.send(frame).await {
            debug!(err = %e, "sync ack not sent");
        }
    }
}

fn vehicle_matches(local: &Vehicle, inbound: &SyncVehicle) -> bool {
    local.license_plate == inbound.license_plate
        && local.capacity == inbound.capacity
        && local.model == inbound.model
        && local.year == inbound.year
        && local.color == inbound.color
        && local.is_active == inbound.is_active
        && local.is_available == inbound.is_available
}

fn driver_matches(local: Option<&Driver>, inbound: Option<&SyncDriver>) -> bool {
    match (local, inbound) {
        (None, None) => true,
        (Some(local), Some(inbound)) => {
            local.cin == inbound.cin
                && local.phone_number == inbound.phone_number
                && local.first_name == inbound.first_name
                && local.last_name == inbound.last_name
                && local.origin_governorate_id == inbound.origin_governorate_id
                && local.origin_delegation_id == inbound.origin_delegation_id
                && local.origin_address == inbound.origin_address
                && local.account_status == inbound.account_status
                && local.is_active == inbound.is_active
        }
        _ => false,
    }
}

fn driver_from_sync(d: &SyncDriver, vehicle_id: &str) -> Driver {
    Driver {
        id: d.id.clone(),
        cin: d.cin.clone(),
        first_name: d.first_name.clone(),
        last_name: d.last_name.clone(),
        phone_number: d.phone_number.clone(),
        origin_governorate_id: d.origin_governorate_id.clone(),
        origin_delegation_id: d.origin_delegation_id.clone(),
        origin_address: d.origin_address.clone(),
        account_status: d.account_status.clone(),
        is_active: d.is_active,
        vehicle_id: vehicle_id.to_owned(),
    }
}

#[cfg(test)]
#[path = "inbound_tests.rs"]
mod tests;
