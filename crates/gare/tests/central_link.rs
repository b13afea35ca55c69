// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Link integration against an in-process mock central: authentication,
//! forced-close reconnection, offline operation with trip accumulation, and
//! the central staff-login fallback.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{any, get, post};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use gare::auth::AuthVerifier;
use gare::booking::{BookingAllocator, CashBookingRequest};
use gare::central::protocol::{Frame, MessageType, StaffLoginResponsePayload, SyncStaff};
use gare::central::{CentralLink, LinkConfig, LinkState};
use gare::events::EventBus;
use gare::model::{AuthorizedStation, QueueType, StaffRole, SyncStatus};
use gare::queue::{EnterQueueRequest, QueueEngine};
use gare::reconcile::{Reconciler, ShipperConfig, TripShipper};
use gare::store::Store;
use gare::test_support::seed_vehicle;

const STATION: &str = "st-link";

// ---------------------------------------------------------------------------
// Mock central
// ---------------------------------------------------------------------------

struct MockCentral {
    /// Every frame the mock received.
    frames: Mutex<Vec<Frame>>,
    /// Wakes all live connections to force-close them.
    disconnect: Notify,
    trip_uploads: AtomicU32,
}

impl MockCentral {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
            disconnect: Notify::new(),
            trip_uploads: AtomicU32::new(0),
        })
    }

    async fn received(&self, kind: MessageType) -> usize {
        self.frames.lock().await.iter().filter(|f| f.kind == kind).count()
    }
}

async fn spawn_mock_central(central: Arc<MockCentral>) -> anyhow::Result<String> {
    let app = axum::Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route(
            "/api/v1/trips",
            post(|State(central): State<Arc<MockCentral>>| async move {
                central.trip_uploads.fetch_add(1, Ordering::SeqCst);
                StatusCode::OK
            }),
        )
        .route(
            "/ws",
            any(
                |State(central): State<Arc<MockCentral>>, ws: WebSocketUpgrade| async move {
                    ws.on_upgrade(move |socket| serve_connection(central, socket))
                        .into_response()
                },
            ),
        )
        .with_state(central);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

/// Per-connection protocol: authenticate → authenticated, heartbeat → ack,
/// staff_login_request → success reply. Breaks on `disconnect`.
async fn serve_connection(central: Arc<MockCentral>, mut socket: WebSocket) {
    loop {
        tokio::select! {
            _ = central.disconnect.notified() => {
                // Abrupt close, as if the uplink dropped.
                return;
            }
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { return };
                let Message::Text(text) = msg else { continue };
                let Ok(frame) = serde_json::from_str::<Frame>(&text) else { continue };
                central.frames.lock().await.push(frame.clone());

                let reply = match frame.kind {
                    MessageType::Authenticate => {
                        Some(Frame::new(MessageType::Authenticated, serde_json::json!({})))
                    }
                    MessageType::Heartbeat => {
                        Some(Frame::new(MessageType::HeartbeatAck, serde_json::json!({})))
                    }
                    MessageType::ConnectionTest => Some(Frame::new(
                        MessageType::ConnectionTestResponse,
                        serde_json::json!({}),
                    )),
                    MessageType::StaffLoginRequest => {
                        let mut reply = Frame::new(
                            MessageType::StaffLoginResponse,
                            StaffLoginResponsePayload {
                                success: true,
                                token: None,
                                staff: Some(SyncStaff {
                                    id: "staff-central".to_owned(),
                                    cin: "55667788".to_owned(),
                                    first_name: "Mounir".to_owned(),
                                    last_name: "Jlassi".to_owned(),
                                    role: StaffRole::Supervisor,
                                    phone_number: "21655555".to_owned(),
                                    is_active: true,
                                }),
                                error: None,
                            },
                        );
                        reply.message_id = frame.message_id.clone();
                        Some(reply)
                    }
                    _ => None,
                };
                if let Some(reply) = reply {
                    let Ok(json) = serde_json::to_string(&reply) else { continue };
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast_link_config(base: &str) -> LinkConfig {
    let ws = format!("{}/ws", base.replacen("http://", "ws://", 1));
    let mut config = LinkConfig::new(base, ws, STATION, "Link Test");
    config.heartbeat_interval = Duration::from_millis(100);
    config.connection_test_interval = Duration::from_millis(250);
    config.reconnect_interval = Duration::from_millis(400);
    config.request_timeout = Duration::from_secs(2);
    config
}

async fn wait_for_state(
    link: &Arc<CentralLink>,
    want: LinkState,
    within: Duration,
) -> anyhow::Result<()> {
    let mut rx = link.subscribe_state();
    tokio::time::timeout(within, rx.wait_for(|s| *s == want))
        .await
        .map_err(|_| anyhow::anyhow!("state {want:?} not reached in {within:?}"))??;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn link_reaches_authenticated_and_heartbeats() -> anyhow::Result<()> {
    let central = MockCentral::new();
    let base = spawn_mock_central(Arc::clone(&central)).await?;
    let (link, _inbound) = CentralLink::new(fast_link_config(&base));
    let cancel = CancellationToken::new();
    link.spawn(cancel.clone());

    wait_for_state(&link, LinkState::Authenticated, Duration::from_secs(5)).await?;
    assert!(link.is_authenticated());

    // A few heartbeat cycles pass and stay acked.
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(link.is_authenticated());
    assert!(central.received(MessageType::Heartbeat).await >= 2);

    cancel.cancel();
    Ok(())
}

#[tokio::test]
async fn forced_close_reconnects_and_offline_work_drains() -> anyhow::Result<()> {
    let central = MockCentral::new();
    let base = spawn_mock_central(Arc::clone(&central)).await?;
    let store = Arc::new(Store::in_memory());
    let bus = EventBus::new();
    let (link, inbound) = CentralLink::new(fast_link_config(&base));
    let cancel = CancellationToken::new();
    link.spawn(cancel.clone());

    let reconciler = Reconciler::new(Arc::clone(&store), Arc::clone(&link), STATION);
    reconciler.spawn(inbound, cancel.clone());

    let mut shipper_config = ShipperConfig::new(&base, None);
    shipper_config.retry_delay = Duration::from_millis(10);
    let shipper = TripShipper::new(Arc::clone(&store), Arc::clone(&link), shipper_config);

    let queue = QueueEngine::new(Arc::clone(&store), bus.clone(), STATION);
    let allocator = BookingAllocator::new(Arc::clone(&store), bus.clone());

    wait_for_state(&link, LinkState::Authenticated, Duration::from_secs(5)).await?;

    // Force-close the channel from the central side.
    central.disconnect.notify_waiters();
    wait_for_state(&link, LinkState::Disconnected, Duration::from_secs(5)).await?;

    // During the outage, local operations keep succeeding.
    store
        .transaction(|t| {
            seed_vehicle(t, "veh-1", "100 TN 2200", 3);
            let auth = AuthorizedStation::new("veh-1", STATION);
            t.authorized.insert(auth.id.clone(), auth);
            Ok(())
        })
        .await?;
    queue
        .enter(EnterQueueRequest {
            license_plate: "100 TN 2200".to_owned(),
            destination_id: "dest-1".to_owned(),
            destination_name: "Tunis".to_owned(),
            queue_type: QueueType::Regular,
        })
        .await?;
    allocator
        .create_cash_booking(CashBookingRequest {
            destination_id: "dest-1".to_owned(),
            seats_requested: 3,
            staff_id: "staff-1".to_owned(),
        })
        .await?;

    // The full vehicle produced a trip that waits out the outage as PENDING.
    let pending = store.read(|t| t.pending_trips(10).len()).await;
    assert_eq!(pending, 1);

    // The fixed-interval retry reattaches well inside the contract's bound.
    wait_for_state(&link, LinkState::Authenticated, Duration::from_secs(5)).await?;

    // And the drain ships the backlog.
    let shipped = shipper.drain_once().await;
    assert_eq!(shipped, 1);
    assert_eq!(central.trip_uploads.load(Ordering::SeqCst), 1);
    let status = store
        .read(|t| t.trips.values().next().map(|t| t.sync_status))
        .await;
    assert_eq!(status, Some(SyncStatus::Synced));

    cancel.cancel();
    Ok(())
}

#[tokio::test]
async fn staff_login_falls_back_to_central() -> anyhow::Result<()> {
    let central = MockCentral::new();
    let base = spawn_mock_central(Arc::clone(&central)).await?;
    let store = Arc::new(Store::in_memory());
    let (link, _inbound) = CentralLink::new(fast_link_config(&base));
    let cancel = CancellationToken::new();
    link.spawn(cancel.clone());
    wait_for_state(&link, LinkState::Authenticated, Duration::from_secs(5)).await?;

    let auth = AuthVerifier::new(
        Arc::clone(&store),
        Some(Arc::clone(&link)),
        b"link-secret".to_vec(),
        Duration::from_secs(24 * 3600),
        Duration::from_secs(8 * 3600),
        STATION,
    );

    // Unknown locally: the verifier asks central and adopts the record.
    let login = auth.login("55667788", "pass55").await?;
    assert_eq!(login.staff.id, "staff-central");
    assert!(!login.created_offline);
    assert_eq!(central.received(MessageType::StaffLoginRequest).await, 1);

    // The adopted record now answers locally, and the session token holds.
    let verified = auth.verify_token(&login.token).await?;
    assert_eq!(verified.cin, "55667788");
    let second = auth.login("55667788", "pass55").await?;
    assert_eq!(second.staff.id, "staff-central");

    cancel.cancel();
    Ok(())
}
