// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable bidirectional session to the central server.
//!
//! One task owns the channel. Each cycle probes reachability, opens the
//! WebSocket, authenticates, then services timers (heartbeat, connection
//! test, IP refresh), the outbound queue, and the inbound stream from a
//! single select loop. Any non-normal close schedules a reconnect at a
//! fixed interval, indefinitely: site-local connectivity is either up or
//! down, and rapid reattach beats load-shedding.
//!
//! Entity frames are never handled here: they go to the reconciler through
//! the inbound channel, so the link never blocks on store I/O.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::central::netprobe::{central_reachable, detect_public_ip, http_client};
use crate::central::protocol::{
    AuthenticatePayload, ConnectionTestPayload, Frame, HeartbeatPayload, IpUpdatePayload,
    MessageType, StaffLoginRequestPayload, StaffLoginResponsePayload, StaffVerifyRequestPayload,
    StaffVerifyResponsePayload,
};
use crate::error::{NodeError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

/// Depth of the outbound and inbound frame queues.
const FRAME_QUEUE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkState {
    Disconnected,
    Testing,
    Connecting,
    /// Channel open, authenticate frame sent, reply not yet seen.
    Connected,
    Authenticated,
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Central HTTP base (`CENTRAL_SERVER_URL`), used for the probe.
    pub http_base: String,
    /// Central WebSocket endpoint (`CENTRAL_SERVER_WS_URL`).
    pub ws_url: String,
    pub station_id: String,
    pub station_name: String,
    pub probe_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub connection_test_interval: Duration,
    pub ip_refresh_interval: Duration,
    pub reconnect_interval: Duration,
    pub request_timeout: Duration,
}

impl LinkConfig {
    pub fn new(
        http_base: impl Into<String>,
        ws_url: impl Into<String>,
        station_id: impl Into<String>,
        station_name: impl Into<String>,
    ) -> Self {
        Self {
            http_base: http_base.into(),
            ws_url: ws_url.into(),
            station_id: station_id.into(),
            station_name: station_name.into(),
            probe_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            connection_test_interval: Duration::from_secs(60),
            ip_refresh_interval: Duration::from_secs(3600),
            reconnect_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Whether the session select-loop keeps running after a control frame.
#[derive(PartialEq)]
enum Control {
    Continue,
    Close,
}

pub struct CentralLink {
    config: LinkConfig,
    state_tx: watch::Sender<LinkState>,
    outbound_tx: mpsc::Sender<Frame>,
    /// Taken once by the run task.
    outbound_rx: Mutex<Option<mpsc::Receiver<Frame>>>,
    inbound_tx: mpsc::Sender<Frame>,
    /// Pending request/response calls keyed by messageId.
    pending: Mutex<HashMap<String, oneshot::Sender<Frame>>>,
    public_ip: RwLock<Option<String>>,
    http: reqwest::Client,
}

impl CentralLink {
    /// Build the link. The returned receiver carries entity frames for the
    /// reconciler.
    pub fn new(config: LinkConfig) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        let (outbound_tx, outbound_rx) = mpsc::channel(FRAME_QUEUE);
        let (inbound_tx, inbound_rx) = mpsc::channel(FRAME_QUEUE);
        let http = http_client(config.probe_timeout);
        let link = Arc::new(Self {
            config,
            state_tx,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            inbound_tx,
            pending: Mutex::new(HashMap::new()),
            public_ip: RwLock::new(None),
            http,
        });
        (link, inbound_rx)
    }

    pub fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == LinkState::Authenticated
    }

    /// Watch state transitions (used by the uplink sink and tests).
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// Last detected public IP, if any.
    pub async fn public_ip(&self) -> Option<String> {
        self.public_ip.read().await.clone()
    }

    /// Enqueue a frame for central. Fails fast when not authenticated.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        if !self.is_authenticated() {
            return Err(NodeError::NotConnected);
        }
        self.outbound_tx.send(frame).await.map_err(|_| NodeError::NotConnected)
    }

    /// Request/response round trip correlated by messageId, 30 s hard cap.
    pub async fn request(&self, kind: MessageType, payload: impl Serialize) -> Result<Frame> {
        if !self.is_authenticated() {
            return Err(NodeError::NotConnected);
        }
        let id = crate::ids::message_id(request_kind(kind));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let frame = Frame::new(kind, payload).with_message_id(&id);
        if self.outbound_tx.send(frame).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(NodeError::NotConnected);
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // The session dropped and failed our pending entry.
            Ok(Err(_)) => Err(NodeError::NotConnected),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(NodeError::RequestTimedOut)
            }
        }
    }

    /// Central-side staff login (the local-miss fallback path).
    pub async fn staff_login(
        &self,
        cin: &str,
        password: &str,
    ) -> Result<StaffLoginResponsePayload> {
        let reply = self
            .request(
                MessageType::StaffLoginRequest,
                StaffLoginRequestPayload {
                    cin: cin.to_owned(),
                    password: password.to_owned(),
                    station_id: self.config.station_id.clone(),
                },
            )
            .await?;
        let payload: StaffLoginResponsePayload = reply
            .payload_as()
            .map_err(|e| NodeError::CentralRejected(format!("malformed staff login reply: {e}")))?;
        if !payload.success {
            return Err(NodeError::CentralRejected(
                payload.error.unwrap_or_else(|| "login refused".to_owned()),
            ));
        }
        Ok(payload)
    }

    /// Central-side staff existence/validity check.
    pub async fn staff_verify(&self, cin: &str) -> Result<StaffVerifyResponsePayload> {
        let reply = self
            .request(
                MessageType::StaffVerifyRequest,
                StaffVerifyRequestPayload {
                    cin: cin.to_owned(),
                    station_id: self.config.station_id.clone(),
                },
            )
            .await?;
        reply
            .payload_as()
            .map_err(|e| NodeError::CentralRejected(format!("malformed staff verify reply: {e}")))
    }

    /// Start the connection task. Call once at boot.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) {
        let link = Arc::clone(self);
        tokio::spawn(async move {
            link.run(cancel).await;
        });
    }

    async fn run(&self, cancel: CancellationToken) {
        let Some(mut outbound_rx) = self.outbound_rx.lock().await.take() else {
            warn!("central link task already running");
            return;
        };

        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.set_state(LinkState::Testing);
            if !central_reachable(&self.http, &self.config.http_base).await {
                debug!(base = %self.config.http_base, "central unreachable");
                self.set_state(LinkState::Disconnected);
                if !sleep_unless_cancelled(self.config.reconnect_interval, &cancel).await {
                    break;
                }
                continue;
            }

            self.set_state(LinkState::Connecting);
            let stream = match tokio_tungstenite::connect_async(&self.config.ws_url).await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!(url = %self.config.ws_url, err = %e, "central connect failed");
                    self.set_state(LinkState::Disconnected);
                    if !sleep_unless_cancelled(self.config.reconnect_interval, &cancel).await {
                        break;
                    }
                    continue;
                }
            };

            self.set_state(LinkState::Connected);
            info!(url = %self.config.ws_url, "central channel open");
            self.run_session(stream, &mut outbound_rx, &cancel).await;

            self.set_state(LinkState::Disconnected);
            self.fail_pending().await;
            if cancel.is_cancelled() {
                break;
            }
            info!(
                secs = self.config.reconnect_interval.as_secs(),
                "central session closed, reconnecting at fixed interval"
            );
            if !sleep_unless_cancelled(self.config.reconnect_interval, &cancel).await {
                break;
            }
        }

        self.set_state(LinkState::Disconnected);
    }

    /// One connected session: authenticate, then service timers, the
    /// outbound queue, and the inbound stream until close.
    async fn run_session(
        &self,
        stream: WsStream,
        outbound_rx: &mut mpsc::Receiver<Frame>,
        cancel: &CancellationToken,
    ) {
        let (mut sink, mut source) = stream.split();

        if self.authenticate(&mut sink).await.is_err() {
            return;
        }

        let start = tokio::time::Instant::now();
        let mut heartbeat = tokio::time::interval_at(
            start + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );
        let mut connection_test = tokio::time::interval_at(
            start + self.config.connection_test_interval,
            self.config.connection_test_interval,
        );
        let mut ip_refresh = tokio::time::interval_at(
            start + self.config.ip_refresh_interval,
            self.config.ip_refresh_interval,
        );
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        connection_test.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ip_refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // Heartbeats sent since the last ack. Two unacked marks the session
        // suspect.
        let mut unacked_heartbeats = 0u32;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Normal closure on shutdown.
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return;
                }
                _ = heartbeat.tick() => {
                    if !self.is_authenticated() {
                        continue;
                    }
                    if unacked_heartbeats >= 2 {
                        warn!("two heartbeat acks missed, closing suspect session");
                        return;
                    }
                    unacked_heartbeats += 1;
                    let frame = Frame::new(MessageType::Heartbeat, HeartbeatPayload {
                        station_id: self.config.station_id.clone(),
                        timestamp: crate::ids::epoch_ms(),
                    });
                    if send_frame(&mut sink, &frame).await.is_err() {
                        return;
                    }
                }
                _ = connection_test.tick() => {
                    if !self.is_authenticated() {
                        continue;
                    }
                    let frame = Frame::new(MessageType::ConnectionTest, ConnectionTestPayload {
                        station_id: self.config.station_id.clone(),
                        timestamp: crate::ids::epoch_ms(),
                    });
                    if send_frame(&mut sink, &frame).await.is_err() {
                        return;
                    }
                }
                _ = ip_refresh.tick() => {
                    if self.refresh_public_ip(&mut sink).await.is_err() {
                        debug!("ip refresh send failed");
                        return;
                    }
                }
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else { return };
                    if send_frame(&mut sink, &frame).await.is_err() {
                        return;
                    }
                }
                msg = source.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            let frame: Frame = match serde_json::from_str(&text) {
                                Ok(f) => f,
                                Err(e) => {
                                    debug!(err = %e, "unparseable central frame dropped");
                                    continue;
                                }
                            };
                            if self.handle_inbound(frame, &mut unacked_heartbeats).await == Control::Close {
                                return;
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            debug!("central closed the channel");
                            return;
                        }
                        Some(Ok(_)) => {} // binary, ping, pong
                        Some(Err(e)) => {
                            warn!(err = %e, "central channel error");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Send the authenticate frame; the public IP is detected lazily and
    /// cached across sessions.
    async fn authenticate(&self, sink: &mut WsSink) -> std::result::Result<(), ()> {
        let public_ip = match self.public_ip().await {
            Some(ip) => Some(ip),
            None => {
                let detected = detect_public_ip(&self.http).await;
                if let Some(ref ip) = detected {
                    *self.public_ip.write().await = Some(ip.clone());
                }
                detected
            }
        };
        let frame = Frame::new(MessageType::Authenticate, AuthenticatePayload {
            station_id: self.config.station_id.clone(),
            station_name: self.config.station_name.clone(),
            timestamp: crate::ids::epoch_ms(),
            public_ip,
        });
        send_frame(sink, &frame).await
    }

    /// Re-detect the public IP; a change while authenticated is reported.
    async fn refresh_public_ip(&self, sink: &mut WsSink) -> std::result::Result<(), ()> {
        let Some(ip) = detect_public_ip(&self.http).await else {
            return Ok(());
        };
        let changed = self.public_ip.read().await.as_deref() != Some(ip.as_str());
        if !changed {
            return Ok(());
        }
        info!(ip = %ip, "public ip changed");
        *self.public_ip.write().await = Some(ip.clone());
        if self.is_authenticated() {
            let frame = Frame::new(MessageType::IpUpdate, IpUpdatePayload {
                station_id: self.config.station_id.clone(),
                public_ip: ip,
            });
            return send_frame(sink, &frame).await;
        }
        Ok(())
    }

    /// Route one inbound frame: session control is handled here, pending
    /// calls are resolved by messageId, entity traffic goes to the
    /// reconciler channel.
    async fn handle_inbound(&self, frame: Frame, unacked_heartbeats: &mut u32) -> Control {
        match frame.kind {
            MessageType::Connected => {
                debug!("central hello");
            }
            MessageType::Authenticated => {
                info!(station = %self.config.station_id, "central session authenticated");
                self.set_state(LinkState::Authenticated);
            }
            MessageType::AuthError => {
                warn!(payload = %frame.payload, "central rejected authentication");
                return Control::Close;
            }
            MessageType::HeartbeatAck => {
                *unacked_heartbeats = 0;
            }
            MessageType::ConnectionTestResponse => {
                debug!("connection test answered");
            }
            MessageType::IpUpdateAck => {
                debug!("ip update acknowledged");
            }
            MessageType::IpUpdateError => {
                warn!(payload = %frame.payload, "ip update rejected");
            }
            MessageType::StaffLoginResponse
            | MessageType::StaffVerifyResponse
            | MessageType::SyncResponse => {
                if !self.resolve_pending(&frame).await {
                    debug!(kind = ?frame.kind, "uncorrelated response dropped");
                }
            }
            MessageType::Error => {
                warn!(payload = %frame.payload, "central error frame");
            }
            _ => {
                // Entity traffic: vehicle_sync_*, booking/vehicle/queue/data
                // updates, sync_request. The reconciler owns these.
                if self.inbound_tx.send(frame).await.is_err() {
                    warn!("reconciler inbound channel closed");
                    return Control::Close;
                }
            }
        }
        Control::Continue
    }

    async fn resolve_pending(&self, frame: &Frame) -> bool {
        let Some(ref id) = frame.message_id else { return false };
        let Some(tx) = self.pending.lock().await.remove(id) else {
            return false;
        };
        tx.send(frame.clone()).is_ok()
    }

    /// Drop every pending call; their awaiters observe `NotConnected`.
    async fn fail_pending(&self) {
        self.pending.lock().await.clear();
    }

    fn set_state(&self, state: LinkState) {
        self.state_tx.send_replace(state);
    }
}

async fn send_frame(sink: &mut WsSink, frame: &Frame) -> std::result::Result<(), ()> {
    let text = match serde_json::to_string(frame) {
        Ok(t) => t,
        Err(_) => return Err(()),
    };
    sink.send(WsMessage::Text(text.into())).await.map_err(|_| ())
}

async fn sleep_unless_cancelled(period: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(period) => true,
        _ = cancel.cancelled() => false,
    }
}

fn request_kind(kind: MessageType) -> &'static str {
    match kind {
        MessageType::StaffLoginRequest => "staff_login",
        MessageType::StaffVerifyRequest => "staff_verify",
        _ => "request",
    }
}

#[cfg(test)]
#[path = "link_tests.rs"]
mod tests;
