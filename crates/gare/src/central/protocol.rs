// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Central wire protocol: JSON frames over the persistent channel.
//!
//! Every frame is `{type, payload, timestamp, messageId?}`; the transport
//! provides message boundaries, so there is no length prefix. Frame types
//! are snake_case strings; payload fields follow the central server's
//! camelCase convention.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::epoch_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // Inbound (central → node)
    Connected,
    Authenticated,
    AuthError,
    HeartbeatAck,
    IpUpdateAck,
    IpUpdateError,
    ConnectionTestResponse,
    SyncResponse,
    DataUpdate,
    StationStatusUpdate,
    StaffLoginResponse,
    StaffVerifyResponse,
    VehicleSyncFull,
    VehicleSyncUpdate,
    VehicleSyncDelete,
    VehicleSyncError,
    Error,
    // Bidirectional
    SyncRequest,
    BookingUpdate,
    VehicleUpdate,
    QueueUpdate,
    // Outbound (node → central)
    Authenticate,
    Heartbeat,
    IpUpdate,
    ConnectionTest,
    VehicleSyncAck,
    StaffLoginRequest,
    StaffVerifyRequest,
}

/// One wire frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: u64,
    #[serde(
        rename = "messageId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub message_id: Option<String>,
}

impl Frame {
    /// Build a frame, stamping the current time. A payload that fails to
    /// serialize (impossible for our own types) degrades to `null`.
    pub fn new(kind: MessageType, payload: impl Serialize) -> Self {
        Self {
            kind,
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
            timestamp: epoch_ms(),
            message_id: None,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Decode the payload into a typed struct.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

// -- Handshake & timers -------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatePayload {
    pub station_id: String,
    pub station_name: String,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    pub station_id: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpUpdatePayload {
    pub station_id: String,
    pub public_ip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestPayload {
    pub station_id: String,
    pub timestamp: u64,
}

// -- Entity sync --------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDriver {
    pub id: String,
    pub cin: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_governorate_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_delegation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_address: Option<String>,
    pub account_status: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncVehicle {
    pub id: String,
    pub license_plate: String,
    pub capacity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub is_active: bool,
    pub is_available: bool,
    #[serde(default)]
    pub driver: Option<SyncDriver>,
    /// Station ids this vehicle may operate from.
    #[serde(default)]
    pub authorized_stations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleSyncFullPayload {
    pub vehicles: Vec<SyncVehicle>,
    pub station_id: String,
    pub sync_time: u64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleSyncUpdatePayload {
    pub vehicle: SyncVehicle,
    pub station_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleSyncDeletePayload {
    pub vehicle_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleSyncAckPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub sync_type: String,
    pub success: bool,
    pub errors: Vec<String>,
    pub station_id: String,
}

// -- Staff request/response flows ---------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffLoginRequestPayload {
    pub cin: String,
    pub password: String,
    pub station_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStaff {
    pub id: String,
    pub cin: String,
    pub first_name: String,
    pub last_name: String,
    pub role: crate::model::StaffRole,
    pub phone_number: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffLoginResponsePayload {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staff: Option<SyncStaff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffVerifyRequestPayload {
    pub cin: String,
    pub station_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffVerifyResponsePayload {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staff: Option<SyncStaff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// -- Lightweight update frames ------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingUpdatePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<crate::model::PaymentStatus>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequestPayload {
    pub station_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
