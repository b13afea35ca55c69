// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::central::LinkConfig;
use crate::model::PaymentStatus;
use crate::test_support::{booking, TEST_STATION_ID};

fn sync_driver(id: &str, cin: &str) -> SyncDriver {
    SyncDriver {
        id: id.to_owned(),
        cin: cin.to_owned(),
        first_name: "Sami".to_owned(),
        last_name: "Trabelsi".to_owned(),
        phone_number: "21600000".to_owned(),
        origin_governorate_id: None,
        origin_delegation_id: None,
        origin_address: None,
        account_status: "APPROVED".to_owned(),
        is_active: true,
    }
}

fn sync_vehicle(id: &str, plate: &str) -> SyncVehicle {
    SyncVehicle {
        id: id.to_owned(),
        license_plate: plate.to_owned(),
        capacity: 8,
        model: None,
        year: None,
        color: None,
        is_active: true,
        is_available: true,
        driver: Some(sync_driver(&format!("drv-{id}"), "11223344")),
        authorized_stations: vec![TEST_STATION_ID.to_owned()],
    }
}

fn full_payload(vehicles: Vec<SyncVehicle>) -> VehicleSyncFullPayload {
    VehicleSyncFullPayload {
        count: vehicles.len(),
        vehicles,
        station_id: TEST_STATION_ID.to_owned(),
        sync_time: epoch_ms(),
    }
}

fn reconciler() -> (Arc<Reconciler>, Arc<Store>) {
    let store = Arc::new(Store::in_memory());
    let (link, _rx) = CentralLink::new(LinkConfig::new(
        "http://127.0.0.1:1",
        "ws://127.0.0.1:1/ws",
        TEST_STATION_ID,
        "Main",
    ));
    (Reconciler::new(Arc::clone(&store), link, TEST_STATION_ID), store)
}

#[tokio::test]
async fn full_sync_inserts_new_vehicles_with_drivers_and_authorizations() {
    let (reconciler, store) = reconciler();

    let outcome = reconciler
        .apply_full(full_payload(vec![sync_vehicle("veh-1", "100 TN 2200")]))
        .await;
    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.skipped, 0);
    assert!(outcome.success());

    let (vehicle, driver, authorized) = store
        .read(|t| {
            (
                t.vehicles.get("veh-1").cloned(),
                t.driver_for_vehicle("veh-1").cloned(),
                t.is_vehicle_authorized("veh-1", TEST_STATION_ID),
            )
        })
        .await;
    assert!(vehicle.is_some_and(|v| v.license_plate == "100 TN 2200"));
    assert!(driver.is_some_and(|d| d.cin == "11223344"));
    assert!(authorized);
}

#[tokio::test]
async fn full_sync_is_idempotent() {
    let (reconciler, store) = reconciler();
    let vehicles =
        vec![sync_vehicle("veh-1", "100 TN 2200"), sync_vehicle("veh-2", "145 TN 7581")];

    let first = reconciler.apply_full(full_payload(vehicles.clone())).await;
    assert_eq!((first.processed, first.skipped), (2, 0));

    let second = reconciler.apply_full(full_payload(vehicles)).await;
    assert_eq!((second.processed, second.skipped), (0, 2));

    let counts = store
        .read(|t| (t.vehicles.len(), t.drivers.len(), t.authorized.len()))
        .await;
    assert_eq!(counts, (2, 2, 2));
}

#[tokio::test]
async fn full_sync_classifies_new_unchanged_changed() {
    let (reconciler, _store) = reconciler();

    // V2 and V3 exist already.
    reconciler
        .apply_full(full_payload(vec![
            sync_vehicle("veh-2", "145 TN 7581"),
            sync_vehicle("veh-3", "199 TN 4000"),
        ]))
        .await;

    // Batch: V1 new, V2 unchanged, V3 changed capacity.
    let mut v3 = sync_vehicle("veh-3", "199 TN 4000");
    v3.capacity = 12;
    let outcome = reconciler
        .apply_full(full_payload(vec![
            sync_vehicle("veh-1", "100 TN 2200"),
            sync_vehicle("veh-2", "145 TN 7581"),
            v3,
        ]))
        .await;
    assert_eq!(outcome.processed, 2);
    assert_eq!(outcome.skipped, 1);
}

#[tokio::test]
async fn driver_change_alone_marks_the_vehicle_changed() {
    let (reconciler, store) = reconciler();
    reconciler
        .apply_full(full_payload(vec![sync_vehicle("veh-1", "100 TN 2200")]))
        .await;

    let mut update = sync_vehicle("veh-1", "100 TN 2200");
    if let Some(ref mut d) = update.driver {
        d.phone_number = "21688888".to_owned();
    }
    let outcome = reconciler.apply_full(full_payload(vec![update])).await;
    assert_eq!(outcome.processed, 1);

    let phone = store
        .read(|t| t.driver_for_vehicle("veh-1").map(|d| d.phone_number.clone()))
        .await;
    assert_eq!(phone.as_deref(), Some("21688888"));
}

#[tokio::test]
async fn driverless_update_removes_the_local_driver() {
    let (reconciler, store) = reconciler();
    reconciler
        .apply_full(full_payload(vec![sync_vehicle("veh-1", "100 TN 2200")]))
        .await;

    let mut update = sync_vehicle("veh-1", "100 TN 2200");
    update.driver = None;
    let outcome = reconciler
        .apply_update(VehicleSyncUpdatePayload {
            vehicle: update,
            station_id: TEST_STATION_ID.to_owned(),
        })
        .await;
    assert_eq!(outcome.processed, 1);

    let drivers = store.read(|t| t.drivers.len()).await;
    assert_eq!(drivers, 0);
}

#[tokio::test]
async fn foreign_vehicles_are_skipped_in_full_sync() {
    let (reconciler, store) = reconciler();
    let mut foreign = sync_vehicle("veh-9", "900 TN 9");
    foreign.authorized_stations = vec!["st-other".to_owned()];

    let outcome = reconciler.apply_full(full_payload(vec![foreign])).await;
    assert_eq!((outcome.processed, outcome.skipped), (0, 1));
    let vehicles = store.read(|t| t.vehicles.len()).await;
    assert_eq!(vehicles, 0);
}

#[tokio::test]
async fn update_with_withdrawn_authorization_deletes_locally() {
    let (reconciler, store) = reconciler();
    reconciler
        .apply_full(full_payload(vec![sync_vehicle("veh-1", "100 TN 2200")]))
        .await;

    let mut withdrawn = sync_vehicle("veh-1", "100 TN 2200");
    withdrawn.authorized_stations = vec!["st-other".to_owned()];
    let outcome = reconciler
        .apply_update(VehicleSyncUpdatePayload {
            vehicle: withdrawn,
            station_id: TEST_STATION_ID.to_owned(),
        })
        .await;
    assert_eq!(outcome.processed, 1);

    let counts = store
        .read(|t| (t.vehicles.len(), t.drivers.len(), t.authorized.len()))
        .await;
    assert_eq!(counts, (0, 0, 0));
}

#[tokio::test]
async fn no_change_update_performs_zero_writes() {
    let (reconciler, store) = reconciler();
    reconciler
        .apply_full(full_payload(vec![sync_vehicle("veh-1", "100 TN 2200")]))
        .await;
    let synced_at_before = store
        .read(|t| t.vehicles.get("veh-1").map(|v| v.synced_at))
        .await;

    let outcome = reconciler
        .apply_update(VehicleSyncUpdatePayload {
            vehicle: sync_vehicle("veh-1", "100 TN 2200"),
            station_id: TEST_STATION_ID.to_owned(),
        })
        .await;
    assert_eq!((outcome.processed, outcome.skipped), (0, 1));

    // The record was not rewritten: synced_at is untouched.
    let synced_at_after = store
        .read(|t| t.vehicles.get("veh-1").map(|v| v.synced_at))
        .await;
    assert_eq!(synced_at_before, synced_at_after);
}

#[tokio::test]
async fn delete_cascades_and_is_idempotent() {
    let (reconciler, store) = reconciler();
    reconciler
        .apply_full(full_payload(vec![sync_vehicle("veh-1", "100 TN 2200")]))
        .await;

    let first = reconciler.apply_delete("veh-1").await;
    assert_eq!(first.processed, 1);
    let counts = store
        .read(|t| (t.vehicles.len(), t.drivers.len(), t.authorized.len()))
        .await;
    assert_eq!(counts, (0, 0, 0));

    // Missing locally: no-op success.
    let second = reconciler.apply_delete("veh-1").await;
    assert_eq!((second.processed, second.skipped), (0, 1));
    assert!(second.success());
}

#[tokio::test]
async fn malformed_records_are_counted_not_fatal() {
    let (reconciler, _store) = reconciler();

    let mut bad = sync_vehicle("", "");
    bad.driver = None;
    let outcome = reconciler
        .apply_full(full_payload(vec![bad, sync_vehicle("veh-1", "100 TN 2200")]))
        .await;

    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.errors.len(), 1);
    assert!(!outcome.success());
    assert_eq!(reconciler.stale_inbound(), 1);
}

#[tokio::test]
async fn booking_update_applies_payment_status_idempotently() {
    let (reconciler, store) = reconciler();
    store
        .transaction(|t| {
            let mut b = booking("b1", "q1", 2, "AAAAAA", "staff-1");
            b.payment_status = PaymentStatus::Pending;
            t.bookings.insert("b1".into(), b);
            Ok(())
        })
        .await
        .unwrap_or_default();

    let payload = BookingUpdatePayload {
        booking_id: None,
        verification_code: Some("AAAAAA".to_owned()),
        payment_status: Some(PaymentStatus::Paid),
        extra: serde_json::Map::new(),
    };
    reconciler.apply_booking_update(payload.clone()).await;
    let status = store
        .read(|t| t.bookings.get("b1").map(|b| b.payment_status))
        .await;
    assert_eq!(status, Some(PaymentStatus::Paid));

    // Re-applying the same update is a no-op.
    reconciler.apply_booking_update(payload).await;
}
