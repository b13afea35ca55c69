// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn frame_wire_shape() -> anyhow::Result<()> {
    let frame = Frame::new(
        MessageType::Authenticate,
        AuthenticatePayload {
            station_id: "st-1".into(),
            station_name: "Main".into(),
            timestamp: 42,
            public_ip: Some("41.226.11.8".into()),
        },
    )
    .with_message_id("authenticate_42_000001");

    let json = serde_json::to_value(&frame)?;
    assert_eq!(json.get("type").and_then(|v| v.as_str()), Some("authenticate"));
    assert_eq!(
        json.get("messageId").and_then(|v| v.as_str()),
        Some("authenticate_42_000001")
    );
    assert_eq!(
        json.pointer("/payload/stationId").and_then(|v| v.as_str()),
        Some("st-1")
    );
    assert_eq!(
        json.pointer("/payload/publicIp").and_then(|v| v.as_str()),
        Some("41.226.11.8")
    );
    Ok(())
}

#[test]
fn frame_without_message_id_omits_the_field() -> anyhow::Result<()> {
    let frame = Frame::new(MessageType::Heartbeat, HeartbeatPayload {
        station_id: "st-1".into(),
        timestamp: 1,
    });
    let json = serde_json::to_string(&frame)?;
    assert!(!json.contains("messageId"));
    Ok(())
}

#[test]
fn inbound_frame_parses_with_unknown_payload_fields() -> anyhow::Result<()> {
    let text = r#"{
        "type": "vehicle_sync_update",
        "payload": {
            "vehicle": {
                "id": "veh-1",
                "licensePlate": "100 TN 2200",
                "capacity": 8,
                "isActive": true,
                "isAvailable": true,
                "authorizedStations": ["st-1"],
                "somethingNew": 7
            },
            "stationId": "st-1"
        },
        "timestamp": 1712000000000
    }"#;
    let frame: Frame = serde_json::from_str(text)?;
    assert_eq!(frame.kind, MessageType::VehicleSyncUpdate);
    let payload: VehicleSyncUpdatePayload = frame.payload_as()?;
    assert_eq!(payload.vehicle.license_plate, "100 TN 2200");
    assert!(payload.vehicle.driver.is_none());
    assert_eq!(payload.vehicle.authorized_stations, vec!["st-1"]);
    Ok(())
}

#[test]
fn message_types_round_trip_snake_case() -> anyhow::Result<()> {
    for (kind, text) in [
        (MessageType::HeartbeatAck, "\"heartbeat_ack\""),
        (MessageType::VehicleSyncFull, "\"vehicle_sync_full\""),
        (MessageType::StaffLoginRequest, "\"staff_login_request\""),
        (MessageType::IpUpdateError, "\"ip_update_error\""),
    ] {
        assert_eq!(serde_json::to_string(&kind)?, text);
        let back: MessageType = serde_json::from_str(text)?;
        assert_eq!(back, kind);
    }
    Ok(())
}
