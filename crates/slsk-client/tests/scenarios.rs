//! End-to-end scenarios driving [`SoulseekClient`] against fake server and
//! peer endpoints over real loopback TCP sockets.
//!
//! [`ServerSession::connect`](slsk_client::ServerSession) and
//! `PeerConnectionManager::dial`/`dial_transfer` dial `TcpStream` directly
//! with no injectable transport, so these exercise the facade the same way
//! `slsk-net::manager`'s own test module does: bind a loopback listener,
//! hand its address to the client, and play the remote side by hand.

use async_trait::async_trait;
use dashmap::DashMap;
use slsk_client::{
    decode_transfer_request, encode_transfer_response, ClientConfig, ClientEvent, ImmediateSlotAwaiter,
    SoulseekClient, TransferDirection, TransferResponse,
};
use slsk_core::codes::{peer, server};
use slsk_core::framing::{self, CodeWidth};
use slsk_core::state::ClientState;
use slsk_core::MAX_FRAME_SIZE;
use slsk_net::{read_handshake, peer_init, ConnectionType, Endpoint, EndpointCache};
use slsk_search::{encode_search_response, SearchResult, SearchScope};
use slsk_transfer::{socket, NoopGovernor};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

struct TestEndpointCache(DashMap<String, Endpoint>);

#[async_trait]
impl EndpointCache for TestEndpointCache {
    async fn get(&self, username: &str) -> Option<Endpoint> {
        self.0.get(username).map(|e| *e.value())
    }

    async fn put(&self, username: &str, endpoint: Endpoint) {
        self.0.insert(username.to_string(), endpoint);
    }

    async fn invalidate(&self, username: &str) {
        self.0.remove(username);
    }
}

/// Dial `addr`, retrying briefly: the client's own listener task binds its
/// socket after `connect()` already returned, so a peer dialing back in
/// immediately can race it.
async fn connect_with_retry(addr: SocketAddr) -> TcpStream {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(addr).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    TcpStream::connect(addr).await.expect("client listener never came up")
}

fn build_client(config: ClientConfig) -> (SoulseekClient, Arc<TestEndpointCache>) {
    let cache = Arc::new(TestEndpointCache(DashMap::new()));
    let client = SoulseekClient::new(config, cache.clone(), Arc::new(NoopGovernor), Arc::new(ImmediateSlotAwaiter));
    (client, cache)
}

/// Bind a fake server, accept one connection, run the login handshake to
/// success, and push the three post-login info frames. Returns the
/// listening address and a handle to the raw stream for further scripting.
async fn spawn_fake_server(
    parent_min_speed: u32,
    parent_speed_ratio: u32,
    wishlist_interval: u32,
) -> (SocketAddr, tokio::task::JoinHandle<TcpStream>) {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _login = framing::read_frame(&mut stream, CodeWidth::Four, MAX_FRAME_SIZE).await.unwrap();

        let mut payload = vec![1u8];
        framing::write_string(&mut payload, "welcome");
        payload.extend_from_slice(&[127, 0, 0, 1]);
        framing::write_frame(&mut stream, server::LOGIN, &payload, CodeWidth::Four)
            .await
            .unwrap();
        framing::write_frame(&mut stream, server::PARENT_MIN_SPEED, &parent_min_speed.to_le_bytes(), CodeWidth::Four)
            .await
            .unwrap();
        framing::write_frame(
            &mut stream,
            server::PARENT_SPEED_RATIO,
            &parent_speed_ratio.to_le_bytes(),
            CodeWidth::Four,
        )
        .await
        .unwrap();
        framing::write_frame(
            &mut stream,
            server::WISHLIST_INTERVAL,
            &wishlist_interval.to_le_bytes(),
            CodeWidth::Four,
        )
        .await
        .unwrap();

        stream
    });
    (addr, handle)
}

async fn drain_post_login_frames(stream: &mut TcpStream) {
    for _ in 0..3 {
        framing::read_frame(stream, CodeWidth::Four, MAX_FRAME_SIZE).await.unwrap();
    }
}

#[tokio::test]
async fn login_happy_path_sequences_state_and_post_login_frames() {
    let (server_addr, server_task) = spawn_fake_server(1000, 50, 720).await;
    let mut config = ClientConfig::new("alice", "hunter2", server_addr);
    config.enable_listener = false;
    let (client, _cache) = build_client(config);
    let mut events = client.subscribe();

    client.connect().await.unwrap();

    let mut states = Vec::new();
    for _ in 0..4 {
        match events.recv().await.unwrap() {
            ClientEvent::StateChanged { current, .. } => states.push(current),
            other => panic!("unexpected event before Connected: {other:?}"),
        }
    }
    assert_eq!(
        states,
        vec![ClientState::CONNECTING, ClientState::CONNECTED, ClientState::LOGGING_IN, ClientState::LOGGED_IN]
    );
    match events.recv().await.unwrap() {
        ClientEvent::Connected { greeting } => assert_eq!(greeting, "welcome"),
        other => panic!("expected Connected, got {other:?}"),
    }
    assert_eq!(client.state().await, ClientState::LOGGED_IN);

    let mut server = server_task.await.unwrap();
    let set_listen_port = framing::read_frame(&mut server, CodeWidth::Four, MAX_FRAME_SIZE).await.unwrap();
    assert_eq!(set_listen_port.code, server::SET_LISTEN_PORT);
    let toggle = framing::read_frame(&mut server, CodeWidth::Four, MAX_FRAME_SIZE).await.unwrap();
    assert_eq!(toggle.code, server::PRIVATE_ROOM_TOGGLE);
    let status = framing::read_frame(&mut server, CodeWidth::Four, MAX_FRAME_SIZE).await.unwrap();
    assert_eq!(status.code, server::HAVE_NO_PARENT);
}

#[tokio::test]
async fn search_collects_three_peer_results_in_arrival_order_and_completes() {
    let (server_addr, server_task) = spawn_fake_server(1000, 50, 720).await;
    let listen_port = {
        // Probe a free port up front: the listener task binds it but has no
        // channel back to report which one it chose, so the test has to
        // hand it a fixed number the way `ClientConfig::listen_port` would
        // normally be a deployment-chosen constant.
        let probe = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        probe.local_addr().unwrap().port()
    };
    let mut config = ClientConfig::new("alice", "hunter2", server_addr);
    config.enable_listener = true;
    config.listen_port = listen_port;
    config.starting_token = 42;
    config.search_max_results = Some(3);
    let (client, _cache) = build_client(config);
    let mut events = client.subscribe();

    client.connect().await.unwrap();
    let mut server = server_task.await.unwrap();
    drain_post_login_frames(&mut server).await;

    let token = client.search("the rolling stones", SearchScope::Network).await.unwrap();
    assert_eq!(token, 42);

    let request_frame = framing::read_frame(&mut server, CodeWidth::Four, MAX_FRAME_SIZE).await.unwrap();
    assert_eq!(request_frame.code, server::SEARCH_REQUEST);
    assert_eq!(u32::from_le_bytes(request_frame.payload[0..4].try_into().unwrap()), 42);
    let (query, _) = framing::read_string(&request_frame.payload[4..]).unwrap();
    assert_eq!(query, "the rolling stones");

    let listen_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), listen_port);
    let mut arrived = Vec::new();
    for username in ["A", "B", "C"] {
        let mut peer_stream = connect_with_retry(listen_addr).await;
        peer_init(&mut peer_stream, username, ConnectionType::PeerToPeer, 0).await.unwrap();

        let result = SearchResult {
            username: username.to_string(),
            files: vec![],
            has_free_slot: true,
            upload_speed: 0,
            queue_length: 0,
        };
        let payload = encode_search_response(42, &result);
        framing::write_frame(&mut peer_stream, peer::SEARCH_RESPONSE, &payload, CodeWidth::Four)
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            ClientEvent::SearchResult { token: t, result } => {
                assert_eq!(t, 42);
                arrived.push(result.username);
            }
            other => panic!("expected SearchResult, got {other:?}"),
        }
    }
    assert_eq!(arrived, vec!["A", "B", "C"]);

    match events.recv().await.unwrap() {
        ClientEvent::SearchCompleted { token: t } => assert_eq!(t, 42),
        other => panic!("expected SearchCompleted once response_limit was reached, got {other:?}"),
    }

    let session = client.search_coordinator().get(42).unwrap();
    assert!(session.is_done());
    assert_eq!(session.results_snapshot().len(), 3);
}

#[tokio::test]
async fn download_receives_exact_declared_size_and_completes() {
    let (server_addr, server_task) = spawn_fake_server(1000, 50, 720).await;
    let mut config = ClientConfig::new("alice", "hunter2", server_addr);
    config.enable_listener = false;
    config.starting_token = 7;
    let (client, cache) = build_client(config);
    client.connect().await.unwrap();
    let mut server = server_task.await.unwrap();
    drain_post_login_frames(&mut server).await;

    let peer_listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let peer_addr = peer_listener.local_addr().unwrap();
    cache
        .put("foo", Endpoint { ip: peer_addr.ip(), port: peer_addr.port() })
        .await;

    let filename = "/music/song.flac".to_string();
    let size: u64 = 1_048_576;
    let expected_token = 7u32;
    let peer_task = {
        let filename = filename.clone();
        tokio::spawn(async move {
            let (mut msg_stream, _) = peer_listener.accept().await.unwrap();
            let _ = read_handshake(&mut msg_stream).await.unwrap();

            let frame = framing::read_frame(&mut msg_stream, CodeWidth::Four, MAX_FRAME_SIZE).await.unwrap();
            assert_eq!(frame.code, peer::TRANSFER_REQUEST);
            let request = decode_transfer_request(&frame.payload).unwrap();
            assert_eq!(request.token, expected_token);
            assert_eq!(request.direction, TransferDirection::Download);
            assert_eq!(request.filename, filename);

            let response = TransferResponse {
                token: expected_token,
                allowed: true,
                size: Some(size),
                reason: None,
            };
            framing::write_frame(
                &mut msg_stream,
                peer::TRANSFER_RESPONSE,
                &encode_transfer_response(&response),
                CodeWidth::Four,
            )
            .await
            .unwrap();

            let (mut raw_stream, _) = peer_listener.accept().await.unwrap();
            let _ = read_handshake(&mut raw_stream).await.unwrap();
            let offset = socket::recv_offset(&mut raw_stream).await.unwrap();
            assert_eq!(offset, 0);
            socket::write_chunk(&mut raw_stream, &vec![7u8; size as usize]).await.unwrap();
        })
    };

    let mut events = client.subscribe();
    let token = client.download("foo", &filename).await.unwrap();
    assert_eq!(token, expected_token);

    let mut last_transferred = 0u64;
    loop {
        match events.recv().await.unwrap() {
            ClientEvent::DownloadProgress { token: t, transferred, total } => {
                assert_eq!(t, expected_token);
                assert_eq!(total, size);
                last_transferred = transferred;
            }
            ClientEvent::DownloadFinished { token: t, result } => {
                assert_eq!(t, expected_token);
                assert!(result.is_ok(), "download should have succeeded: {result:?}");
                break;
            }
            other => panic!("unexpected event during download: {other:?}"),
        }
    }
    assert_eq!(last_transferred, size);
    assert!(client.downloads().is_empty());
    peer_task.await.unwrap();
}

#[tokio::test]
async fn upload_per_user_cap_blocks_second_upload_until_first_releases() {
    let (server_addr, server_task) = spawn_fake_server(1000, 50, 720).await;
    let mut config = ClientConfig::new("alice", "hunter2", server_addr);
    config.enable_listener = false;
    config.maximum_concurrent_uploads_per_user = 1;
    config.starting_token = 50;
    let (client, cache) = build_client(config);
    client.connect().await.unwrap();
    let mut server = server_task.await.unwrap();
    drain_post_login_frames(&mut server).await;

    let peer_listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let peer_addr = peer_listener.local_addr().unwrap();
    cache
        .put("bar", Endpoint { ip: peer_addr.ip(), port: peer_addr.port() })
        .await;

    let peer_task = tokio::spawn(async move {
        let (mut msg_stream, _) = peer_listener.accept().await.unwrap();
        let _ = read_handshake(&mut msg_stream).await.unwrap();

        for i in 0..2u8 {
            let frame = framing::read_frame(&mut msg_stream, CodeWidth::Four, MAX_FRAME_SIZE).await.unwrap();
            assert_eq!(frame.code, peer::TRANSFER_REQUEST);
            let request = decode_transfer_request(&frame.payload).unwrap();
            if i == 0 {
                // Hold the first negotiation open long enough for the test
                // to observe the second upload still blocked on the
                // per-user admission slot before this one finishes.
                tokio::time::sleep(Duration::from_millis(150)).await;
            }
            let response = TransferResponse {
                token: request.token,
                allowed: true,
                size: request.size,
                reason: None,
            };
            framing::write_frame(
                &mut msg_stream,
                peer::TRANSFER_RESPONSE,
                &encode_transfer_response(&response),
                CodeWidth::Four,
            )
            .await
            .unwrap();

            let (mut raw_stream, _) = peer_listener.accept().await.unwrap();
            let _ = read_handshake(&mut raw_stream).await.unwrap();
            socket::send_offset(&mut raw_stream, 0).await.unwrap();

            let expected = request.size.unwrap_or(0) as usize;
            let mut received = 0usize;
            let mut buf = vec![0u8; 64 * 1024];
            while received < expected {
                let n = socket::read_chunk(&mut raw_stream, &mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received += n;
            }
            assert_eq!(received, expected);
        }
    });

    let mut events = client.subscribe();

    let client1 = client.clone();
    let first = tokio::spawn(async move { client1.upload("bar", "report.pdf", vec![1u8; 4096]).await });

    // Give the first call time to acquire the per-user slot and start
    // negotiating before the second one is attempted.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let client2 = client.clone();
    let mut second = tokio::spawn(async move { client2.upload("bar", "notes.txt", vec![2u8; 256]).await });

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        res = &mut second => panic!("second upload should still be blocked on bar's per-user slot, got {res:?}"),
    }

    let token1 = first.await.unwrap().unwrap();
    assert_eq!(token1, 50);
    loop {
        match events.recv().await.unwrap() {
            ClientEvent::UploadFinished { token, result } if token == token1 => {
                assert!(result.is_ok(), "first upload should have succeeded: {result:?}");
                break;
            }
            _ => {}
        }
    }

    let token2 = second.await.unwrap().unwrap();
    assert_eq!(token2, 51);
    loop {
        match events.recv().await.unwrap() {
            ClientEvent::UploadFinished { token, result } if token == token2 => {
                assert!(result.is_ok(), "second upload should have succeeded once admitted: {result:?}");
                break;
            }
            _ => {}
        }
    }

    peer_task.await.unwrap();
}

#[tokio::test]
async fn unknown_connect_to_peer_token_produces_no_transfer_event() {
    let (server_addr, server_task) = spawn_fake_server(1000, 50, 720).await;
    let mut config = ClientConfig::new("alice", "hunter2", server_addr);
    config.enable_listener = false;
    let (client, _cache) = build_client(config);
    client.connect().await.unwrap();
    let mut server = server_task.await.unwrap();
    drain_post_login_frames(&mut server).await;

    let peer_listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let peer_addr = peer_listener.local_addr().unwrap();
    let accept_task = tokio::spawn(async move {
        let (mut stream, _) = peer_listener.accept().await.unwrap();
        let _ = read_handshake(&mut stream).await.unwrap();
    });

    let mut events = client.subscribe();

    let mut payload = Vec::new();
    framing::write_string(&mut payload, "eve");
    framing::write_string(&mut payload, "F");
    let IpAddr::V4(ip) = peer_addr.ip() else { unreachable!("loopback bind is always v4") };
    payload.extend_from_slice(&ip.octets());
    payload.extend_from_slice(&peer_addr.port().to_le_bytes());
    payload.extend_from_slice(&999u32.to_le_bytes()); // token no in-flight transfer is waiting on
    framing::write_frame(&mut server, server::CONNECT_TO_PEER, &payload, CodeWidth::Four)
        .await
        .unwrap();

    accept_task.await.unwrap();

    let seen = tokio::time::timeout(Duration::from_millis(100), events.recv()).await;
    assert!(seen.is_err(), "an unmatched ConnectToPeer invitation should not raise any client event");
    assert!(client.downloads().is_empty());
    assert!(client.uploads().is_empty());
}

#[tokio::test]
async fn kicked_notification_tears_down_state_and_drains_registries() {
    let (server_addr, server_task) = spawn_fake_server(1000, 50, 720).await;
    let mut config = ClientConfig::new("alice", "hunter2", server_addr);
    config.enable_listener = false;
    config.starting_token = 80;
    let (client, _cache) = build_client(config);
    client.connect().await.unwrap();
    let mut server = server_task.await.unwrap();
    drain_post_login_frames(&mut server).await;

    let token = client.search("kicked while searching", SearchScope::Network).await.unwrap();
    framing::read_frame(&mut server, CodeWidth::Four, MAX_FRAME_SIZE).await.unwrap();
    assert!(client.search_coordinator().get(token).is_some());

    let mut events = client.subscribe();
    framing::write_frame(&mut server, server::KICKED, &[], CodeWidth::Four).await.unwrap();

    match events.recv().await.unwrap() {
        ClientEvent::StateChanged { current, .. } => assert_eq!(current, ClientState::DISCONNECTED),
        other => panic!("expected the disconnect StateChanged first, got {other:?}"),
    }
    match events.recv().await.unwrap() {
        ClientEvent::Kicked => {}
        other => panic!("expected Kicked next, got {other:?}"),
    }
    match events.recv().await.unwrap() {
        ClientEvent::Disconnected { reason } => assert_eq!(reason.as_deref(), Some("kicked")),
        other => panic!("expected Disconnected right after Kicked, got {other:?}"),
    }

    assert_eq!(client.state().await, ClientState::DISCONNECTED);
    assert!(client.search_coordinator().get(token).is_none(), "kick must cancel and drop pending searches");
    assert!(client.downloads().is_empty());
    assert!(client.uploads().is_empty());
}
