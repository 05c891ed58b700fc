use futures_util::{SinkExt, StreamExt};
use one_broker::{BrokerConfig, BrokerServer};
use one_core::PublicKey;
use one_crypto::CryptoApi;
use one_handshake::WireMessage;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

async fn spawn_broker() -> (std::net::SocketAddr, tokio::sync::oneshot::Sender<()>) {
    let server = BrokerServer::new(BrokerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ping_interval: Duration::from_millis(50),
    });
    let (listener, addr) = server.bind().await.expect("bind");
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(server.serve(listener, async {
        let _ = shutdown_rx.await;
    }));
    (addr, shutdown_tx)
}

fn invert_bits(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(|b| !b).collect()
}

async fn register_listener(
    addr: std::net::SocketAddr,
    crypto: &CryptoApi,
) -> tokio_tungstenite::WebSocketStream<tokio::net::TcpStream> {
    let (stream, _) = tokio::net::TcpStream::connect(addr)
        .await
        .map(|s| (s, ()))
        .expect("tcp connect");
    let (mut ws, _) = tokio_tungstenite::client_async(format!("ws://{addr}/"), stream)
        .await
        .expect("ws handshake");

    let register = serde_json::to_string(&WireMessage::Register {
        public_key: crypto.public_key(),
    })
    .unwrap();
    ws.send(Message::Text(register)).await.unwrap();

    let auth_request = match ws.next().await.unwrap().unwrap() {
        Message::Text(text) => serde_json::from_str::<WireMessage>(&text).unwrap(),
        other => panic!("unexpected frame: {other:?}"),
    };
    let (challenge, broker_key) = match auth_request {
        WireMessage::AuthenticationRequest {
            challenge,
            public_key,
        } => (challenge, public_key),
        other => panic!("expected authentication_request, got {}", other.command()),
    };

    let mut session = crypto.encrypt_decrypt_for(broker_key);
    let plaintext = session.decrypt_with_embedded_nonce(&challenge).unwrap();
    let response = session
        .encrypt_and_embed_nonce(&invert_bits(&plaintext))
        .unwrap();

    let response_message = serde_json::to_string(&WireMessage::AuthenticationResponse { response }).unwrap();
    ws.send(Message::Text(response_message)).await.unwrap();

    match ws.next().await.unwrap().unwrap() {
        Message::Text(text) => {
            let message: WireMessage = serde_json::from_str(&text).unwrap();
            assert!(matches!(message, WireMessage::AuthenticationSuccess));
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    ws
}

#[tokio::test]
async fn dialer_with_no_registered_listener_is_closed() {
    let (addr, _shutdown) = spawn_broker().await;

    let (stream, _) = (tokio::net::TcpStream::connect(addr).await.unwrap(), ());
    let (mut ws, _) = tokio_tungstenite::client_async(format!("ws://{addr}/"), stream)
        .await
        .unwrap();

    let dialer_key = CryptoApi::generate().public_key();
    let target: PublicKey = CryptoApi::generate().public_key();
    let request = serde_json::to_string(&WireMessage::CommunicationRequest {
        source_public_key: dialer_key,
        target_public_key: target,
    })
    .unwrap();
    ws.send(Message::Text(request)).await.unwrap();

    let frame = ws.next().await.unwrap().unwrap();
    assert!(matches!(frame, Message::Close(Some(_))));
}

#[tokio::test]
async fn listener_registers_and_a_dialer_is_spliced_to_it() {
    let (addr, _shutdown) = spawn_broker().await;

    let listener_crypto = CryptoApi::generate();
    let mut listener_ws = register_listener(addr, &listener_crypto).await;

    let (stream, _) = (tokio::net::TcpStream::connect(addr).await.unwrap(), ());
    let (mut dialer_ws, _) = tokio_tungstenite::client_async(format!("ws://{addr}/"), stream)
        .await
        .unwrap();

    let dialer_key = CryptoApi::generate().public_key();
    let request = serde_json::to_string(&WireMessage::CommunicationRequest {
        source_public_key: dialer_key,
        target_public_key: listener_crypto.public_key(),
    })
    .unwrap();
    dialer_ws.send(Message::Text(request.clone())).await.unwrap();

    // the listener first sees the forwarded communication_request verbatim...
    let forwarded = match listener_ws.next().await.unwrap().unwrap() {
        Message::Text(text) => text,
        other => panic!("unexpected frame: {other:?}"),
    };
    assert_eq!(forwarded, request);

    // ...then a connection_handover just before splicing.
    let handover = match listener_ws.next().await.unwrap().unwrap() {
        Message::Text(text) => serde_json::from_str::<WireMessage>(&text).unwrap(),
        other => panic!("unexpected frame: {other:?}"),
    };
    assert!(matches!(handover, WireMessage::ConnectionHandover));

    dialer_ws
        .send(Message::Text("hello".into()))
        .await
        .unwrap();
    let echoed_to_listener = listener_ws.next().await.unwrap().unwrap();
    assert_eq!(echoed_to_listener, Message::Text("hello".into()));
}
