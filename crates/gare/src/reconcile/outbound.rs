// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound record shipping: drain PENDING trips to central.
//!
//! The store itself is the outbound queue: rows with
//! `sync_status=PENDING`. Each drain cycle takes a bounded batch and posts
//! every trip to the central HTTP API; a trip moves to SYNCED on ack, or to
//! FAILED once the per-request retry cap is exhausted. The drain only runs
//! while the link is authenticated, so an outage just lets rows accumulate.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::central::netprobe::http_client;
use crate::central::CentralLink;
use crate::error::Result;
use crate::ids::epoch_ms;
use crate::model::{SyncStatus, Trip};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct ShipperConfig {
    /// Central HTTP base (`CENTRAL_SERVER_URL`).
    pub central_base: String,
    /// Bearer secret for the central API (`API_SECRET`).
    pub api_secret: Option<String>,
    /// Drain cycle period (`TRIP_SYNC_INTERVAL_MS`).
    pub drain_interval: Duration,
    /// Rows per cycle (`BATCH_SYNC_SIZE`).
    pub batch_size: usize,
    /// Attempts per trip before FAILED (`MAX_SYNC_RETRY_ATTEMPTS`).
    pub retry_cap: u32,
    /// Pause between attempts (`SYNC_RETRY_DELAY_MS`).
    pub retry_delay: Duration,
}

impl ShipperConfig {
    pub fn new(central_base: impl Into<String>, api_secret: Option<String>) -> Self {
        Self {
            central_base: central_base.into(),
            api_secret,
            drain_interval: Duration::from_secs(30),
            batch_size: 50,
            retry_cap: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

pub struct TripShipper {
    store: Arc<Store>,
    link: Arc<CentralLink>,
    config: ShipperConfig,
    http: reqwest::Client,
}

impl TripShipper {
    pub fn new(store: Arc<Store>, link: Arc<CentralLink>, config: ShipperConfig) -> Arc<Self> {
        let http = http_client(Duration::from_secs(10));
        Arc::new(Self { store, link, config, http })
    }

    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) {
        let shipper = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(shipper.config.drain_interval) => {
                        if !shipper.link.is_authenticated() {
                            debug!("link down, trip drain skipped");
                            continue;
                        }
                        shipper.drain_once().await;
                    }
                }
            }
        });
    }

    /// One drain cycle. Returns how many trips reached SYNCED.
    pub async fn drain_once(&self) -> usize {
        let batch = self
            .store
            .read({
                let limit = self.config.batch_size;
                move |t| t.pending_trips(limit)
            })
            .await;
        if batch.is_empty() {
            return 0;
        }
        debug!(count = batch.len(), "draining pending trips");

        let mut shipped = 0;
        for trip in batch {
            let attempts = self.ship_with_retries(&trip).await;
            let trip_id = trip.id.clone();
            let outcome: Result<()> = self
                .store
                .transaction(move |t| {
                    if let Some(row) = t.trips.get_mut(&trip_id) {
                        row.sync_attempts += attempts.used;
                        if attempts.delivered {
                            row.sync_status = SyncStatus::Synced;
                            row.synced_at = Some(epoch_ms());
                        } else {
                            row.sync_status = SyncStatus::Failed;
                        }
                    }
                    Ok(())
                })
                .await;
            if let Err(e) = outcome {
                warn!(trip = %trip.id, err = %e, "trip sync bookkeeping failed");
                continue;
            }
            if attempts.delivered {
                shipped += 1;
            } else {
                warn!(trip = %trip.id, attempts = attempts.used, "trip marked FAILED");
            }
        }
        if shipped > 0 {
            info!(shipped, "trips synced to central");
        }
        shipped
    }

    async fn ship_with_retries(&self, trip: &Trip) -> ShipAttempts {
        let mut used = 0;
        while used < self.config.retry_cap {
            used += 1;
            match self.post_trip(trip).await {
                Ok(()) => return ShipAttempts { used, delivered: true },
                Err(e) => {
                    debug!(trip = %trip.id, attempt = used, err = %e, "trip upload failed");
                    if used < self.config.retry_cap {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }
        ShipAttempts { used, delivered: false }
    }

    async fn post_trip(&self, trip: &Trip) -> anyhow::Result<()> {
        let url = format!("{}/api/v1/trips", self.config.central_base.trim_end_matches('/'));
        let mut req = self.http.post(&url).json(trip);
        if let Some(ref secret) = self.config.api_secret {
            req = req.bearer_auth(secret);
        }
        let resp = req.send().await?;
        resp.error_for_status()?;
        Ok(())
    }
}

struct ShipAttempts {
    used: u32,
    delivered: bool,
}

#[cfg(test)]
#[path = "outbound_tests.rs"]
mod tests;
