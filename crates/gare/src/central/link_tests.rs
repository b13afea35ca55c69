// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn config() -> LinkConfig {
    LinkConfig::new("http://127.0.0.1:1", "ws://127.0.0.1:1/ws", "st-1", "Main")
}

#[test]
fn defaults_match_the_contract() {
    let cfg = config();
    assert_eq!(cfg.probe_timeout, Duration::from_secs(5));
    assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
    assert_eq!(cfg.connection_test_interval, Duration::from_secs(60));
    assert_eq!(cfg.ip_refresh_interval, Duration::from_secs(3600));
    assert_eq!(cfg.reconnect_interval, Duration::from_secs(30));
    assert_eq!(cfg.request_timeout, Duration::from_secs(30));
}

#[tokio::test]
async fn starts_disconnected() {
    let (link, _rx) = CentralLink::new(config());
    assert_eq!(link.state(), LinkState::Disconnected);
    assert!(!link.is_authenticated());
}

#[tokio::test]
async fn send_fails_fast_when_not_authenticated() {
    let (link, _rx) = CentralLink::new(config());
    let frame = Frame::new(MessageType::QueueUpdate, serde_json::json!({}));
    assert!(matches!(link.send(frame).await, Err(NodeError::NotConnected)));
}

#[tokio::test]
async fn request_fails_fast_when_not_authenticated() {
    let (link, _rx) = CentralLink::new(config());
    let result = link.staff_login("12345678", "pw").await;
    assert!(matches!(result, Err(NodeError::NotConnected)));
}

#[test]
fn request_kinds_prefix_message_ids() {
    assert_eq!(request_kind(MessageType::StaffLoginRequest), "staff_login");
    assert_eq!(request_kind(MessageType::StaffVerifyRequest), "staff_verify");
    assert_eq!(request_kind(MessageType::Heartbeat), "request");
}

#[test]
fn link_state_serializes_screaming() -> anyhow::Result<()> {
    assert_eq!(serde_json::to_string(&LinkState::Authenticated)?, "\"AUTHENTICATED\"");
    Ok(())
}
