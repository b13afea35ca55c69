// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for unit and integration tests.

use crate::model::{
    AuthorizedStation, Booking, BookingSource, Driver, PaymentMethod, PaymentStatus, QueueStatus,
    QueueType, Route, Staff, StaffRole, Station, Vehicle, VehicleQueue,
};
use crate::store::{Store, Tables};

pub const TEST_STATION_ID: &str = "st-main";

pub fn test_station() -> Station {
    Station {
        station_id: TEST_STATION_ID.to_owned(),
        station_name: "Main Station".to_owned(),
        delegation: "Centre".to_owned(),
        governorate: "Tunis".to_owned(),
    }
}

pub fn vehicle(id: &str, plate: &str, capacity: u32) -> Vehicle {
    Vehicle {
        id: id.to_owned(),
        license_plate: plate.to_owned(),
        capacity,
        model: None,
        year: None,
        color: None,
        is_active: true,
        is_available: true,
        synced_at: 0,
    }
}

pub fn driver(id: &str, cin: &str, vehicle_id: &str) -> Driver {
    Driver {
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
        vehicle_id: vehicle_id.to_owned(),
    }
}

pub fn route(id: &str, destination_id: &str, base_price: f64) -> Route {
    Route {
        id: id.to_owned(),
        station_id: destination_id.to_owned(),
        base_price,
        is_active: true,
    }
}

pub fn staff(id: &str, cin: &str, role: StaffRole) -> Staff {
    Staff {
        id: id.to_owned(),
        cin: cin.to_owned(),
        first_name: "Leila".to_owned(),
        last_name: "Gharbi".to_owned(),
        role,
        phone_number: "21611111".to_owned(),
        password: crate::auth::hash_password(cin),
        is_active: true,
        last_login: None,
    }
}

pub fn queue_row(
    id: &str,
    vehicle_id: &str,
    destination_id: &str,
    position: u32,
    seats: u32,
    price: f64,
) -> VehicleQueue {
    VehicleQueue {
        id: id.to_owned(),
        vehicle_id: vehicle_id.to_owned(),
        destination_id: destination_id.to_owned(),
        destination_name: format!("dest {destination_id}"),
        queue_type: QueueType::Regular,
        queue_position: position,
        status: QueueStatus::Waiting,
        total_seats: seats,
        available_seats: seats,
        base_price: price,
        estimated_departure: None,
    }
}

pub fn booking(id: &str, queue_id: &str, seats: u32, code: &str, created_by: &str) -> Booking {
    Booking {
        id: id.to_owned(),
        queue_id: queue_id.to_owned(),
        seats_booked: seats,
        total_amount: 0.0,
        booking_source: BookingSource::Station,
        payment_status: PaymentStatus::Paid,
        payment_method: PaymentMethod::Cash,
        verification_code: code.to_owned(),
        is_verified: false,
        verified_at: None,
        verified_by_id: None,
        created_by: created_by.to_owned(),
        created_at: crate::ids::epoch_ms(),
    }
}

pub fn trip_for(id: &str, queue_id: &str, start_time: u64) -> crate::model::Trip {
    crate::model::Trip {
        id: id.to_owned(),
        vehicle_id: "veh-1".to_owned(),
        license_plate: "100 TN 2200".to_owned(),
        destination_id: "dest-1".to_owned(),
        destination_name: "dest dest-1".to_owned(),
        queue_id: queue_id.to_owned(),
        seats_booked: 8,
        start_time,
        sync_status: crate::model::SyncStatus::Pending,
        sync_attempts: 0,
        synced_at: None,
    }
}

/// Insert a vehicle authorized at the test station, with its driver.
pub fn seed_vehicle(tables: &mut Tables, id: &str, plate: &str, capacity: u32) {
    tables.vehicles.insert(id.to_owned(), vehicle(id, plate, capacity));
    let auth = AuthorizedStation::new(id, TEST_STATION_ID);
    tables.authorized.insert(auth.id.clone(), auth);
}

/// A store pre-populated with two authorized vehicles and one destination.
pub async fn seeded_store() -> Store {
    let store = Store::in_memory();
    let seeded: crate::error::Result<()> = store
        .transaction(|t| {
            seed_vehicle(t, "veh-1", "100 TN 2200", 8);
            seed_vehicle(t, "veh-2", "145 TN 7581", 8);
            t.routes.insert("route-1".to_owned(), route("route-1", "dest-1", 10.0));
            Ok(())
        })
        .await;
    assert!(seeded.is_ok());
    store
}
