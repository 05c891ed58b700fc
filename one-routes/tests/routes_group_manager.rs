use one_broker::{BrokerConfig, BrokerServer};
use one_core::{PublicKey, RouteId};
use one_crypto::CryptoApi;
use one_routes::{
    ConnectionEvent, ConnectionRoute, GroupConfig, IncomingDirect, IncomingViaBroker, OutgoingDial, ReconnectPolicy,
    RemoteKey, RoutesGroupManager,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const WAIT_FOR_EVENT: Duration = Duration::from_secs(5);

async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

struct Opened {
    remote_key: PublicKey,
    group_name: String,
    route_id: RouteId,
}

/// Drains `events` until an `Opened` event arrives, ignoring the
/// `StateChanged` events a successful offer also emits.
async fn wait_for_opened(events: &mut broadcast::Receiver<ConnectionEvent>) -> Opened {
    tokio::time::timeout(WAIT_FOR_EVENT, async {
        loop {
            match events.recv().await.expect("connection event channel closed unexpectedly") {
                ConnectionEvent::Opened {
                    remote_key,
                    group_name,
                    route_id,
                    ..
                } => {
                    return Opened {
                        remote_key,
                        group_name,
                        route_id,
                    }
                }
                ConnectionEvent::StateChanged { .. } | ConnectionEvent::Closed { .. } => continue,
            }
        }
    })
    .await
    .expect("no connection opened before the deadline")
}

#[tokio::test]
async fn outgoing_dial_reaches_an_incoming_direct_route_through_the_manager() {
    let acceptor_crypto = Arc::new(CryptoApi::generate());
    let dialer_crypto = Arc::new(CryptoApi::generate());
    let port = free_port().await;

    let acceptor_manager = RoutesGroupManager::new(acceptor_crypto.public_key());
    acceptor_manager.add_group(RemoteKey::Any, "pairing", GroupConfig::default());
    acceptor_manager
        .add_route(
            RemoteKey::Any,
            "pairing",
            Box::new(IncomingDirect::new("127.0.0.1", port, acceptor_crypto.clone(), "pairing")),
        )
        .await
        .expect("incoming direct route starts");
    let mut acceptor_events = acceptor_manager.subscribe();

    let dialer_manager = RoutesGroupManager::new(dialer_crypto.public_key());
    dialer_manager.add_group(RemoteKey::Specific(acceptor_crypto.public_key()), "pairing", GroupConfig::default());
    dialer_manager
        .add_route(
            RemoteKey::Specific(acceptor_crypto.public_key()),
            "pairing",
            Box::new(OutgoingDial::new(
                format!("ws://127.0.0.1:{port}/"),
                dialer_crypto.clone(),
                acceptor_crypto.public_key(),
                "pairing",
                ReconnectPolicy::Fixed(Duration::from_millis(20)),
            )),
        )
        .await
        .expect("outgoing dial route starts");
    let mut dialer_events = dialer_manager.subscribe();

    tokio::spawn(acceptor_manager.run());
    tokio::spawn(dialer_manager.run());

    let on_acceptor = wait_for_opened(&mut acceptor_events).await;
    assert_eq!(on_acceptor.remote_key, dialer_crypto.public_key());
    assert_eq!(on_acceptor.group_name, "pairing");

    let on_dialer = wait_for_opened(&mut dialer_events).await;
    assert_eq!(on_dialer.remote_key, acceptor_crypto.public_key());
    assert_eq!(on_dialer.route_id, RouteId(format!("outgoing-dial:ws://127.0.0.1:{port}/")));
}

#[tokio::test]
async fn outgoing_dial_reaches_an_incoming_via_broker_route_through_the_manager() {
    let broker_port = free_port().await;
    let broker = BrokerServer::new(BrokerConfig {
        host: "127.0.0.1".into(),
        port: broker_port,
        ping_interval: Duration::from_secs(30),
    });
    let (listener, _addr) = broker.bind().await.expect("broker binds");
    tokio::spawn(broker.serve(listener, std::future::pending::<()>()));

    let broker_url = format!("ws://127.0.0.1:{broker_port}/");
    let acceptor_crypto = Arc::new(CryptoApi::generate());
    let dialer_crypto = Arc::new(CryptoApi::generate());

    let acceptor_manager = RoutesGroupManager::new(acceptor_crypto.public_key());
    acceptor_manager.add_group(RemoteKey::Any, "pairing", GroupConfig::default());
    acceptor_manager
        .add_route(
            RemoteKey::Any,
            "pairing",
            Box::new(IncomingViaBroker::new(broker_url.clone(), acceptor_crypto.clone(), "pairing")),
        )
        .await
        .expect("incoming via broker route starts");
    let mut acceptor_events = acceptor_manager.subscribe();

    let dialer_manager = RoutesGroupManager::new(dialer_crypto.public_key());
    dialer_manager.add_group(RemoteKey::Specific(acceptor_crypto.public_key()), "pairing", GroupConfig::default());
    dialer_manager
        .add_route(
            RemoteKey::Specific(acceptor_crypto.public_key()),
            "pairing",
            Box::new(OutgoingDial::new(
                broker_url,
                dialer_crypto.clone(),
                acceptor_crypto.public_key(),
                "pairing",
                ReconnectPolicy::Fixed(Duration::from_millis(20)),
            )),
        )
        .await
        .expect("outgoing dial route starts");
    let mut dialer_events = dialer_manager.subscribe();

    tokio::spawn(acceptor_manager.run());
    tokio::spawn(dialer_manager.run());

    // Exercises the path comment #1 fixed: the broker's `connection_handover`
    // frame must not corrupt the acceptor's handshake read.
    let on_acceptor = wait_for_opened(&mut acceptor_events).await;
    assert_eq!(on_acceptor.remote_key, dialer_crypto.public_key());
    assert_eq!(on_acceptor.group_name, "pairing");

    let on_dialer = wait_for_opened(&mut dialer_events).await;
    assert_eq!(on_dialer.remote_key, acceptor_crypto.public_key());
}

#[tokio::test]
async fn unknown_group_name_closes_the_connection_without_panicking() {
    use futures_util::StreamExt;
    use tokio_tungstenite::tungstenite::Message;

    let acceptor_crypto = Arc::new(CryptoApi::generate());
    let dialer_crypto = CryptoApi::generate();
    let port = free_port().await;

    // `add_route` refuses to register a route against a group that doesn't
    // exist, so to reach the "no group matches this connection" path the
    // route is started directly, bypassing the manager's own bookkeeping —
    // exactly what happens if a group is ever removed out from under a
    // still-running route.
    let acceptor_manager = RoutesGroupManager::new(acceptor_crypto.public_key());
    let mut route = IncomingDirect::new("127.0.0.1", port, acceptor_crypto.clone(), "pairing");
    route
        .start(acceptor_manager.events_sender())
        .await
        .expect("route starts even with no group registered");
    tokio::spawn(acceptor_manager.run());

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}/"))
        .await
        .expect("dialer connects to the raw listener");
    one_handshake::dialer_handshake(&mut socket, &dialer_crypto, acceptor_crypto.public_key(), Duration::from_secs(5))
        .await
        .expect("handshake completes even though no group will ever claim the connection");

    // The manager has no group for this peer: it must close the connection
    // once the handshake's `RouteEvent` reaches `handle_event`, not panic.
    let next = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("the manager closes the unclaimed connection before the deadline");
    assert!(matches!(next, Some(Ok(Message::Close(_))) | None));
}
