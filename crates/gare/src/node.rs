// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Composition root: build the three singletons (store, link, event bus),
//! wire the engines, spawn the background tasks, and expose the node's
//! logical operation surface to the client layer.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::AuthVerifier;
use crate::booking::BookingAllocator;
use crate::central::protocol::{Frame, MessageType, SyncRequestPayload};
use crate::central::{CentralLink, LinkState};
use crate::config::Config;
use crate::error::Result;
use crate::events::{EventBus, EventKind, EventSink, NodeEvent};
use crate::model::{Driver, Station, Vehicle};
use crate::queue::QueueEngine;
use crate::reconcile::{Reconciler, TripShipper};
use crate::reports::Reports;
use crate::staff::StaffDirectory;
use crate::store::Store;

/// Session sweep cadence.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

pub struct Node {
    pub station: Station,
    pub store: Arc<Store>,
    pub bus: EventBus,
    pub link: Arc<CentralLink>,
    pub queue: QueueEngine,
    pub allocator: BookingAllocator,
    pub auth: Arc<AuthVerifier>,
    pub staff: StaffDirectory,
    pub reports: Reports,
    reconciler: Arc<Reconciler>,
    shipper: Arc<TripShipper>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Frame>>>,
    config: Config,
}

impl Node {
    /// Assemble the node. Store problems here are fatal.
    pub fn build(config: Config) -> Result<Self> {
        let station = config.station();
        let store = Arc::new(Store::open(config.snapshot_path.clone())?);
        let bus = EventBus::new();
        let (link, inbound_rx) = CentralLink::new(config.link_config());

        let queue = QueueEngine::new(Arc::clone(&store), bus.clone(), &station.station_id);
        let allocator = BookingAllocator::new(Arc::clone(&store), bus.clone());
        let auth = Arc::new(AuthVerifier::new(
            Arc::clone(&store),
            Some(Arc::clone(&link)),
            config.jwt_secret.as_bytes().to_vec(),
            config.token_ttl(),
            config.session_idle_timeout(),
            &station.station_id,
        ));
        let staff = StaffDirectory::new(Arc::clone(&store), bus.clone());
        let reports = Reports::new(Arc::clone(&store));
        let reconciler = Reconciler::new(Arc::clone(&store), Arc::clone(&link), &station.station_id);
        let shipper = TripShipper::new(Arc::clone(&store), Arc::clone(&link), config.shipper_config());

        Ok(Self {
            station,
            store,
            bus,
            link,
            queue,
            allocator,
            auth,
            staff,
            reports,
            reconciler,
            shipper,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            config,
        })
    }

    /// Spawn the background tasks: central link, reconciler, trip drain,
    /// central uplink sink, session sweeper, bootstrap sync.
    pub async fn start(&self, cancel: CancellationToken) {
        let Some(inbound_rx) = self.inbound_rx.lock().await.take() else {
            warn!("node already started");
            return;
        };

        self.link.spawn(cancel.clone());
        self.reconciler.spawn(inbound_rx, cancel.clone());
        self.shipper.spawn(cancel.clone());

        self.bus.attach_sink(
            Arc::new(CentralUplinkSink {
                link: Arc::clone(&self.link),
                station_id: self.station.station_id.clone(),
            }),
            cancel.clone(),
        );

        spawn_session_sweeper(Arc::clone(&self.auth), cancel.clone());
        spawn_bootstrap_sync(
            Arc::clone(&self.link),
            Arc::clone(&self.store),
            self.station.station_id.clone(),
            Duration::from_secs(self.config.sync_interval_seconds),
            self.config.max_retry_attempts,
            cancel,
        );

        info!(
            station = %self.station.station_id,
            name = %self.station.station_name,
            "station node started"
        );
    }

    /// Final snapshot flush; call after cancelling the tasks.
    pub async fn shutdown(&self) {
        self.store.flush().await;
        info!(station = %self.station.station_id, "station node stopped");
    }

    // -- Vehicle read surface -------------------------------------------------

    pub async fn vehicles_list(&self) -> Vec<Vehicle> {
        self.store
            .read(|t| {
                let mut vehicles: Vec<Vehicle> = t.vehicles.values().cloned().collect();
                vehicles.sort_by(|a, b| a.license_plate.cmp(&b.license_plate));
                vehicles
            })
            .await
    }

    pub async fn vehicle_by_id(&self, id: &str) -> Option<(Vehicle, Option<Driver>)> {
        let id = id.to_owned();
        self.store
            .read(move |t| {
                t.vehicles.get(&id).map(|v| {
                    (v.clone(), t.driver_for_vehicle(&id).cloned())
                })
            })
            .await
    }

    pub async fn vehicle_by_driver_cin(&self, cin: &str) -> Option<(Vehicle, Driver)> {
        let cin = cin.to_owned();
        self.store
            .read(move |t| {
                let driver = t.driver_by_cin(&cin)?;
                let vehicle = t.vehicles.get(&driver.vehicle_id)?;
                Some((vehicle.clone(), driver.clone()))
            })
            .await
    }

    pub async fn vehicles_stats(&self) -> FleetStats {
        self.store
            .read(|t| FleetStats {
                total: t.vehicles.len() as u32,
                active: t.vehicles.values().filter(|v| v.is_active).count() as u32,
                available: t.vehicles.values().filter(|v| v.is_available).count() as u32,
                queued: t.queues.values().filter(|q| q.in_service()).count() as u32,
            })
            .await
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetStats {
    pub total: u32,
    pub active: u32,
    pub available: u32,
    pub queued: u32,
}

// -- Central uplink sink ------------------------------------------------------

/// Forwards booking and queue events to central while authenticated.
/// With the link down, events are simply not mirrored; central recovers
/// the picture from trip sync and full state pulls.
struct CentralUplinkSink {
    link: Arc<CentralLink>,
    station_id: String,
}

#[async_trait::async_trait]
impl EventSink for CentralUplinkSink {
    fn name(&self) -> &'static str {
        "central-uplink"
    }

    fn wants(&self, kind: EventKind) -> bool {
        matches!(
            kind,
            EventKind::BookingCreated
                | EventKind::BookingVerified
                | EventKind::QueueEntered
                | EventKind::QueueExited
                | EventKind::QueueStatusChanged
                | EventKind::QueueSeatsChanged
        )
    }

    async fn deliver(&self, event: &NodeEvent) -> anyhow::Result<()> {
        if !self.link.is_authenticated() {
            return Ok(());
        }
        let kind = match event.kind() {
            EventKind::BookingCreated | EventKind::BookingVerified => MessageType::BookingUpdate,
            _ => MessageType::QueueUpdate,
        };
        let payload = serde_json::json!({
            "stationId": self.station_id,
            "event": event,
        });
        // Losing the race with a disconnect is fine; the frame is dropped.
        if let Err(e) = self.link.send(Frame::new(kind, payload)).await {
            debug!(err = %e, "uplink frame dropped");
        }
        Ok(())
    }
}

// -- Background tasks ---------------------------------------------------------

fn spawn_session_sweeper(auth: Arc<AuthVerifier>, cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(SESSION_SWEEP_INTERVAL) => {
                    match auth.sweep_expired_sessions().await {
                        Ok(0) => {}
                        Ok(n) => info!(sessions = n, "expired sessions deactivated"),
                        Err(e) => warn!(err = %e, "session sweep failed"),
                    }
                }
            }
        }
    });
}

/// Until the first vehicle sync lands, nudge central for data a bounded
/// number of times per connected session.
fn spawn_bootstrap_sync(
    link: Arc<CentralLink>,
    store: Arc<Store>,
    station_id: String,
    interval: Duration,
    max_attempts: u32,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut attempts = 0u32;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    if link.state() != LinkState::Authenticated {
                        attempts = 0;
                        continue;
                    }
                    let have_vehicles = store.read(|t| !t.vehicles.is_empty()).await;
                    if have_vehicles || attempts >= max_attempts {
                        continue;
                    }
                    attempts += 1;
                    let frame = Frame::new(MessageType::SyncRequest, SyncRequestPayload {
                        station_id: station_id.clone(),
                        entity: Some("vehicles".to_owned()),
                    });
                    if let Err(e) = link.send(frame).await {
                        debug!(err = %e, "bootstrap sync request not sent");
                    } else {
                        info!(attempt = attempts, "bootstrap vehicle sync requested");
                    }
                }
            }
        }
    });
}

// -- Process entry ------------------------------------------------------------

/// Run the node until a termination signal.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let node = Node::build(config)?;
    node.start(cancel.clone()).await;

    shutdown_signal().await;
    info!("termination signal received, shutting down");
    cancel.cancel();
    // Let the select loops observe the cancellation and close the channel.
    tokio::time::sleep(Duration::from_millis(200)).await;
    node.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
