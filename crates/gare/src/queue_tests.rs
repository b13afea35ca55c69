// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use super::*;
use crate::error::NodeError;
use crate::events::NodeEvent;
use crate::model::QueueStatus;
use crate::test_support::{booking, seed_vehicle, seeded_store, TEST_STATION_ID};

fn engine(store: Arc<Store>) -> QueueEngine {
    QueueEngine::new(store, EventBus::new(), TEST_STATION_ID)
}

fn enter_req(plate: &str) -> EnterQueueRequest {
    EnterQueueRequest {
        license_plate: plate.to_owned(),
        destination_id: "dest-1".to_owned(),
        destination_name: "Tunis".to_owned(),
        queue_type: QueueType::Regular,
    }
}

#[tokio::test]
async fn enter_assigns_increasing_positions() -> anyhow::Result<()> {
    let store = Arc::new(seeded_store().await);
    let engine = engine(Arc::clone(&store));

    let first = engine.enter(enter_req("100 TN 2200")).await?;
    let second = engine.enter(enter_req("145 TN 7581")).await?;

    assert_eq!(first.position, 1);
    assert_eq!(second.position, 2);

    let row = store
        .read(|t| t.queues.get(&first.queue_id).cloned())
        .await
        .ok_or_else(|| anyhow::anyhow!("row missing"))?;
    assert_eq!(row.status, QueueStatus::Waiting);
    assert_eq!(row.available_seats, 8);
    assert_eq!(row.base_price, 10.0);
    Ok(())
}

#[tokio::test]
async fn enter_rejects_unknown_inactive_unauthorized_and_duplicates() -> anyhow::Result<()> {
    let store = Arc::new(seeded_store().await);
    store
        .transaction(|t| {
            // veh-3: known but not authorized here.
            t.vehicles
                .insert("veh-3".into(), crate::test_support::vehicle("veh-3", "99 TN 1", 8));
            // veh-4: authorized but inactive.
            seed_vehicle(t, "veh-4", "99 TN 2", 8);
            if let Some(v) = t.vehicles.get_mut("veh-4") {
                v.is_active = false;
            }
            Ok(())
        })
        .await?;
    let engine = engine(Arc::clone(&store));

    assert!(matches!(
        engine.enter(enter_req("no such plate")).await,
        Err(NodeError::VehicleUnknown(_))
    ));
    assert!(matches!(
        engine.enter(enter_req("99 TN 1")).await,
        Err(NodeError::VehicleNotAuthorizedHere(_))
    ));
    assert!(matches!(
        engine.enter(enter_req("99 TN 2")).await,
        Err(NodeError::VehicleInactive(_))
    ));

    engine.enter(enter_req("100 TN 2200")).await?;
    assert!(matches!(
        engine.enter(enter_req("100 TN 2200")).await,
        Err(NodeError::VehicleAlreadyQueued(_))
    ));
    Ok(())
}

#[tokio::test]
async fn exit_compacts_and_reenter_takes_tail_position() -> anyhow::Result<()> {
    let store = Arc::new(seeded_store().await);
    store
        .transaction(|t| {
            seed_vehicle(t, "veh-3", "99 TN 3", 8);
            Ok(())
        })
        .await?;
    let engine = engine(Arc::clone(&store));

    engine.enter(enter_req("100 TN 2200")).await?;
    engine.enter(enter_req("145 TN 7581")).await?;
    engine.enter(enter_req("99 TN 3")).await?;

    // Remove the middle row; the third shifts to position 2.
    engine.exit("145 TN 7581").await?;
    let positions = store
        .read(|t| {
            t.queue_rows_for_destination("dest-1")
                .iter()
                .map(|q| (q.vehicle_id.clone(), q.queue_position))
                .collect::<Vec<_>>()
        })
        .await;
    assert_eq!(positions, vec![("veh-1".to_owned(), 1), ("veh-3".to_owned(), 2)]);

    // Re-enter lands at the tail: max position + 1.
    let rejoined = engine.enter(enter_req("145 TN 7581")).await?;
    assert_eq!(rejoined.position, 3);
    Ok(())
}

#[tokio::test]
async fn exit_refuses_with_outstanding_unverified_bookings() -> anyhow::Result<()> {
    let store = Arc::new(seeded_store().await);
    let engine = engine(Arc::clone(&store));

    let join = engine.enter(enter_req("100 TN 2200")).await?;
    store
        .transaction(|t| {
            t.bookings
                .insert("b1".into(), booking("b1", &join.queue_id, 2, "AAAAAA", "s1"));
            Ok(())
        })
        .await?;

    assert!(matches!(
        engine.exit("100 TN 2200").await,
        Err(NodeError::HasOutstandingBookings(1))
    ));

    // Verified bookings do not block exit.
    store
        .transaction(|t| {
            if let Some(b) = t.bookings.get_mut("b1") {
                b.is_verified = true;
            }
            Ok(())
        })
        .await?;
    engine.exit("100 TN 2200").await?;
    Ok(())
}

#[tokio::test]
async fn exit_when_not_queued_fails() {
    let store = Arc::new(seeded_store().await);
    let engine = engine(store);
    assert!(matches!(engine.exit("100 TN 2200").await, Err(NodeError::NotInQueue(_))));
    assert!(matches!(engine.exit("unknown").await, Err(NodeError::NotInQueue(_))));
}

#[tokio::test]
async fn status_walk_creates_trip_on_ready() -> anyhow::Result<()> {
    let store = Arc::new(seeded_store().await);
    let engine = engine(Arc::clone(&store));

    engine.enter(enter_req("100 TN 2200")).await?;
    engine
        .update_status("100 TN 2200", QueueStatus::Loading, false)
        .await?;

    // Seats remain: READY without force is refused.
    assert!(matches!(
        engine.update_status("100 TN 2200", QueueStatus::Ready, false).await,
        Err(NodeError::IllegalStateTransition { .. })
    ));

    engine
        .update_status("100 TN 2200", QueueStatus::Ready, true)
        .await?;
    let trips = store.read(|t| t.trips.len()).await;
    assert_eq!(trips, 1);

    engine
        .update_status("100 TN 2200", QueueStatus::Departed, false)
        .await?;

    // DEPARTED is terminal and out of every lookup.
    assert!(engine.list_available(Some("dest-1")).await.is_empty());
    let retained = store.read(|t| t.queues.len()).await;
    assert_eq!(retained, 1);
    assert!(matches!(
        engine.update_status("100 TN 2200", QueueStatus::Waiting, false).await,
        Err(NodeError::NotInQueue(_))
    ));
    Ok(())
}

#[tokio::test]
async fn illegal_transitions_are_rejected() -> anyhow::Result<()> {
    let store = Arc::new(seeded_store().await);
    let engine = engine(Arc::clone(&store));
    engine.enter(enter_req("100 TN 2200")).await?;

    assert!(matches!(
        engine.update_status("100 TN 2200", QueueStatus::Departed, false).await,
        Err(NodeError::IllegalStateTransition { from: QueueStatus::Waiting, to: QueueStatus::Departed })
    ));
    Ok(())
}

#[tokio::test]
async fn list_available_skips_full_rows() -> anyhow::Result<()> {
    let store = Arc::new(seeded_store().await);
    let engine = engine(Arc::clone(&store));
    let join = engine.enter(enter_req("100 TN 2200")).await?;
    engine.enter(enter_req("145 TN 7581")).await?;

    store
        .transaction(|t| {
            if let Some(q) = t.queues.get_mut(&join.queue_id) {
                q.available_seats = 0;
            }
            Ok(())
        })
        .await?;

    let rows = engine.list_available(Some("dest-1")).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.first().map(|r| r.vehicle_id.as_str()), Some("veh-2"));
    Ok(())
}

#[tokio::test]
async fn stats_aggregate_per_destination() -> anyhow::Result<()> {
    let store = Arc::new(seeded_store().await);
    let engine = engine(Arc::clone(&store));
    engine.enter(enter_req("100 TN 2200")).await?;
    let mut other = enter_req("145 TN 7581");
    other.destination_id = "dest-2".to_owned();
    engine.enter(other).await?;

    let stats = engine.stats().await;
    assert_eq!(stats.per_destination.len(), 2);
    assert_eq!(stats.vehicles_in_service, 2);
    assert_eq!(stats.total_available_seats, 16);
    Ok(())
}

#[tokio::test]
async fn enter_and_exit_emit_events() -> anyhow::Result<()> {
    let store = Arc::new(seeded_store().await);
    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let engine = QueueEngine::new(Arc::clone(&store), bus, TEST_STATION_ID);

    engine.enter(enter_req("100 TN 2200")).await?;
    engine.exit("100 TN 2200").await?;

    let entered = rx.recv().await?;
    assert!(matches!(entered, NodeEvent::QueueEntered { position: 1, .. }));
    let exited = rx.recv().await?;
    assert!(matches!(exited, NodeEvent::QueueExited { .. }));
    Ok(())
}
