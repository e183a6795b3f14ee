//! End-to-end request/response exchanges between two in-process sessions.
//!
//! Each test runs the responder in a background tokio task and the initiator
//! in the test body, both on loopback.  Some go through a lossy router.

use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

use rand::{Rng, SeedableRng};
use reliable_udp::{
    httpfs::{FileStore, Request, Response},
    router::{Router, RouterConfig},
    session::ipv4,
    state::ConnectionState,
    Delivery, ReceivePolicy, Session, TransportConfig, TransportError,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast_config() -> TransportConfig {
    TransportConfig::default().with_initial_rtt(Duration::from_millis(100))
}

async fn session(config: TransportConfig) -> Session {
    Session::bind("127.0.0.1:0".parse().unwrap(), config)
        .await
        .expect("bind session")
}

fn v4(addr: SocketAddr) -> SocketAddrV4 {
    ipv4(addr).expect("loopback is IPv4")
}

/// Fail the test instead of hanging it.
async fn within<T>(secs: u64, fut: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(secs), fut)
        .await
        .expect("exchange timed out")
}

// ---------------------------------------------------------------------------
// Test 1: the single-fragment exchange
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hello_world_round_trip() {
    let mut server = session(fast_config()).await;
    let server_addr = v4(server.local_addr());

    let server_task = tokio::spawn(async move {
        let request = server.receive(ReceivePolicy::default()).await.expect("server receive");
        assert_eq!(request, Delivery::Complete(b"Hello World123456789".to_vec()));
        assert_eq!(server.state(), ConnectionState::Reversing);
        let acked = server.reply(b"pong").await.expect("server reply");
        assert_eq!(acked, 1);
        server.state()
    });

    let mut client = session(fast_config()).await;
    let acked = within(10, client.send(server_addr, b"Hello World123456789"))
        .await
        .expect("client send");
    assert_eq!(acked, 1);
    assert_eq!(client.state(), ConnectionState::AwaitingPeerResource);

    let reply = within(10, client.receive(ReceivePolicy::default()))
        .await
        .expect("client receive");
    assert_eq!(reply, Delivery::Complete(b"pong".to_vec()));
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(client.peer(), Some(server_addr));

    let server_state = within(10, server_task).await.unwrap();
    assert_eq!(server_state, ConnectionState::Closed);
}

// ---------------------------------------------------------------------------
// Test 2: empty blobs in both directions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_blobs_complete() {
    let mut server = session(fast_config()).await;
    let server_addr = v4(server.local_addr());

    let server_task = tokio::spawn(async move {
        let request = server.receive(ReceivePolicy::default()).await.expect("receive");
        assert_eq!(request, Delivery::Complete(Vec::new()));
        server.reply(b"").await.expect("reply")
    });

    let mut client = session(fast_config()).await;
    let reply = within(10, client.request(server_addr, b"", ReceivePolicy::default()))
        .await
        .expect("request");
    assert_eq!(reply, Delivery::Complete(Vec::new()));
    assert_eq!(within(10, server_task).await.unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Test 3: a large blob through a lossy, duplicating, reordering router
// ---------------------------------------------------------------------------

#[tokio::test]
async fn large_blob_survives_a_faulty_router() {
    let router = Router::bind(
        "127.0.0.1:0".parse().unwrap(),
        RouterConfig::default()
            .with_drop_rate(0.05)
            .with_duplicate_rate(0.05)
            .with_reordering(0.1, Duration::from_millis(20))
            .with_corrupt_rate(0.02)
            .with_seed(7),
    )
    .await
    .expect("bind router");
    let router_addr = router.local_addr();
    let router_task = router.spawn();

    let config = fast_config().with_fin_retries(8);
    let mut server = session(config.clone()).await.with_relay(router_addr);
    let server_addr = v4(server.local_addr());

    let mut rng = rand::rngs::StdRng::seed_from_u64(99);
    let blob: Vec<u8> = (0..50_000).map(|_| rng.gen()).collect();
    let expected_reply: Vec<u8> = blob.iter().rev().copied().collect();

    let server_task = tokio::spawn(async move {
        let policy = server.config().receive_policy();
        let request = server.receive(policy).await.expect("server receive");
        let mut reply = request.into_bytes();
        reply.reverse();
        server.reply(&reply).await.expect("server reply");
    });

    let mut client = session(config).await.with_relay(router_addr);
    let acked = within(60, client.send(server_addr, &blob))
        .await
        .expect("client send");
    assert_eq!(acked, 50);

    let policy = client.config().receive_policy();
    let reply = within(60, client.receive(policy)).await.expect("client receive");
    // A lost final FIN may downgrade the result, but every fragment was acked.
    assert_eq!(reply.bytes(), expected_reply.as_slice());

    within(60, server_task).await.unwrap();
    router_task.abort();
}

// ---------------------------------------------------------------------------
// Test 4: one server, several clients in turn
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_handles_clients_one_after_another() {
    const CLIENTS: usize = 3;

    let mut server = session(fast_config()).await;
    let server_addr = v4(server.local_addr());

    let server_task = tokio::spawn(async move {
        for _ in 0..CLIENTS {
            let request = server.receive(ReceivePolicy::default()).await.expect("receive");
            let reply = request.into_bytes().to_ascii_uppercase();
            server.reply(&reply).await.expect("reply");
        }
    });

    for i in 0..CLIENTS {
        let mut client = session(fast_config()).await;
        let msg = format!("client-{i}");
        let reply = within(10, client.request(server_addr, msg.as_bytes(), ReceivePolicy::default()))
            .await
            .expect("request");
        assert_eq!(reply.into_bytes(), msg.to_ascii_uppercase().into_bytes());
    }
    within(10, server_task).await.unwrap();
}

// ---------------------------------------------------------------------------
// Test 5: a silent peer and a send deadline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_deadline_resets_the_session() {
    // Bound but never read: every SYN vanishes.
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let silent_addr = v4(silent.local_addr().unwrap());

    let mut client = session(fast_config().with_deadline(Duration::from_millis(300))).await;
    let err = within(10, client.send(silent_addr, b"anyone?"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::DeadlineExceeded(_)), "{err}");
    assert_eq!(client.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn second_send_before_the_reply_is_rejected() {
    let mut server = session(fast_config()).await;
    let server_addr = v4(server.local_addr());
    let server_task = tokio::spawn(async move {
        server.receive(ReceivePolicy::default()).await.expect("receive");
        server
    });

    let mut client = session(fast_config()).await;
    within(10, client.send(server_addr, b"first")).await.expect("send");

    // The reply has not been collected yet.
    let err = client.send(server_addr, b"second").await.unwrap_err();
    assert!(matches!(err, TransportError::InvalidState { operation: "send", .. }));
    assert_eq!(client.state(), ConnectionState::AwaitingPeerResource);

    let server = within(10, server_task).await.unwrap();
    assert_eq!(server.state(), ConnectionState::Reversing);
}

// ---------------------------------------------------------------------------
// Test 6: httpfs over the transport
// ---------------------------------------------------------------------------

#[tokio::test]
async fn httpfs_post_then_get() {
    let root = std::env::temp_dir().join(format!("reliable-udp-httpfs-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&root);
    std::fs::create_dir_all(&root).unwrap();
    let store = FileStore::new(&root);

    let mut server = session(fast_config()).await;
    let server_addr = v4(server.local_addr());
    let server_task = tokio::spawn(async move {
        for _ in 0..2 {
            let bytes = server.receive(ReceivePolicy::default()).await.expect("receive");
            let request = Request::parse(bytes.bytes()).expect("parse request");
            let response = store.handle(&request);
            server.reply(&response.to_bytes()).await.expect("reply");
        }
    });

    let body = "line\n".repeat(500);
    let mut client = session(fast_config()).await;
    let posted = within(
        10,
        client.request(
            server_addr,
            &Request::post("/notes.txt", body.clone()).to_bytes(),
            ReceivePolicy::default(),
        ),
    )
    .await
    .expect("post");
    assert_eq!(Response::parse(posted.bytes()).unwrap().status, 201);

    let fetched = within(
        10,
        client.request(server_addr, &Request::get("/notes.txt").to_bytes(), ReceivePolicy::default()),
    )
    .await
    .expect("get");
    let response = Response::parse(fetched.bytes()).unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, body.into_bytes());

    within(10, server_task).await.unwrap();
}
