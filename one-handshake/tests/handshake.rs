use one_crypto::CryptoApi;
use one_handshake::{acceptor_handshake, dialer_handshake};
use std::time::Duration;

#[tokio::test]
async fn dialer_and_acceptor_agree_on_a_shared_session() {
    let (client_io, server_io) = tokio::io::duplex(8192);

    let dialer_crypto = CryptoApi::generate();
    let acceptor_crypto = CryptoApi::generate();
    let target = acceptor_crypto.public_key();

    let client_task = tokio::spawn(async move {
        let (mut client, _) = tokio_tungstenite::client_async("ws://example.invalid/", client_io)
            .await
            .expect("client handshake");
        dialer_handshake(&mut client, &dialer_crypto, target, Duration::from_secs(5)).await
    });

    let server_task = tokio::spawn(async move {
        let mut server = tokio_tungstenite::accept_async(server_io)
            .await
            .expect("server handshake");
        acceptor_handshake(&mut server, &acceptor_crypto, Duration::from_secs(5)).await
    });

    let dialer_outcome = client_task.await.unwrap().expect("dialer handshake");
    let acceptor_outcome = server_task.await.unwrap().expect("acceptor handshake");

    assert_eq!(
        dialer_outcome.session.outgoing_frame_count(),
        acceptor_outcome.session.incoming_frame_count()
    );
    assert_eq!(
        acceptor_outcome.session.outgoing_frame_count(),
        dialer_outcome.session.incoming_frame_count()
    );
}

#[tokio::test]
async fn acceptor_rejects_a_request_targeting_a_different_peer() {
    let (client_io, server_io) = tokio::io::duplex(8192);

    let dialer_crypto = CryptoApi::generate();
    let acceptor_crypto = CryptoApi::generate();
    let wrong_target = CryptoApi::generate().public_key();

    let client_task = tokio::spawn(async move {
        let (mut client, _) = tokio_tungstenite::client_async("ws://example.invalid/", client_io)
            .await
            .expect("client handshake");
        dialer_handshake(
            &mut client,
            &dialer_crypto,
            wrong_target,
            Duration::from_secs(5),
        )
        .await
    });

    let server_task = tokio::spawn(async move {
        let mut server = tokio_tungstenite::accept_async(server_io)
            .await
            .expect("server handshake");
        acceptor_handshake(&mut server, &acceptor_crypto, Duration::from_secs(5)).await
    });

    let _ = client_task.await.unwrap();
    let acceptor_result = server_task.await.unwrap();
    assert!(acceptor_result.is_err());
}
