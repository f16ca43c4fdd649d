//! End-to-end transport tests over the in-memory link

use std::time::Duration;

use tokio::time::timeout;
use tokio_test::assert_ok;

use gatt_serial::{
    ConnectionState, DeviceIdentity, FramedTransport, ReadOutcome, SimNetwork, TransportConfig,
    TransportError, SERIAL_SERVICE_UUID,
};
use uuid::Uuid;

const SERVER_ADDR: &str = "AA:BB:CC:DD:EE:01";
const CLIENT_ADDR: &str = "AA:BB:CC:DD:EE:02";

/// Bring up an advertising server and a connected client on a fresh network
async fn connected_pair(net: &SimNetwork) -> (FramedTransport, FramedTransport) {
    let mut server = FramedTransport::with_link(
        TransportConfig::server().with_local_name("echo-box"),
        Box::new(net.endpoint(SERVER_ADDR, "echo-box")),
    );
    let mut client = FramedTransport::with_link(
        TransportConfig::client(SERVER_ADDR),
        Box::new(net.endpoint(CLIENT_ADDR, "probe")),
    );

    let server_task = tokio::spawn(async move {
        let accepted = server.advertise(Some(Duration::from_secs(5))).await;
        (server, accepted)
    });
    client.connect(SERVER_ADDR).await.expect("client connect");

    let (server, accepted) = server_task.await.expect("server task");
    assert!(accepted.expect("server advertise"), "server saw no client");
    (server, client)
}

#[tokio::test]
async fn test_open_brings_both_roles_to_connected() {
    let net = SimNetwork::new();
    let (server, client) = connected_pair(&net).await;

    assert_eq!(server.state(), ConnectionState::Connected);
    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(server.connected());
    assert!(client.connected());
    assert_eq!(client.name(), Some("echo-box"));

    let resolved = client.resolved_identity().expect("resolved endpoints");
    assert_eq!(resolved.service, SERIAL_SERVICE_UUID);
    assert!(resolved.write.is_some());
    assert!(resolved.notify.is_some());
}

#[tokio::test]
async fn test_packet_round_trip_both_directions() {
    let net = SimNetwork::new();
    let (mut server, mut client) = connected_pair(&net).await;

    assert!(client.write_packet(b"\x01\x02").await.unwrap());
    assert_eq!(server.read_packet().await.unwrap(), b"\x01\x02");

    assert!(server.write_packet(b"pong").await.unwrap());
    assert_eq!(client.read_packet().await.unwrap(), b"pong");
}

#[tokio::test]
async fn test_packet_sizes_across_header_boundaries() {
    let net = SimNetwork::new();
    let (mut server, mut client) = connected_pair(&net).await;

    for size in [0usize, 1, 255, 256, 65536] {
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        assert!(client.write_packet(&payload).await.unwrap());
        let received = server.read_packet().await.unwrap();
        assert_eq!(received.len(), size);
        assert_eq!(received, payload);
    }
}

#[tokio::test]
async fn test_read_packet_reassembles_fragmented_frame() {
    let net = SimNetwork::new();
    let (mut server, mut client) = connected_pair(&net).await;

    // Header split mid-way, payload split again: framing must not care how
    // the bytes were chunked on the wire.
    assert!(client.write(&[5, 0]).await.unwrap());
    assert!(client.write(&[0, 0, b'h', b'e']).await.unwrap());
    assert!(client.write(b"llo").await.unwrap());

    assert_eq!(server.read_packet().await.unwrap(), b"hello");
    assert_eq!(server.in_waiting().await, 0);
}

#[tokio::test]
async fn test_back_to_back_frames_in_one_chunk() {
    let net = SimNetwork::new();
    let (mut server, mut client) = connected_pair(&net).await;

    // Two complete frames in a single link write; the first read drains
    // everything, so the second frame rides through the requeue path.
    let mut wire = Vec::new();
    wire.extend_from_slice(&[2, 0, 0, 0, 0xAA, 0xBB]);
    wire.extend_from_slice(&[3, 0, 0, 0, 1, 2, 3]);
    assert!(client.write(&wire).await.unwrap());

    assert_eq!(server.read_packet().await.unwrap(), [0xAA, 0xBB]);
    assert_eq!(server.read_packet().await.unwrap(), [1, 2, 3]);
    assert_eq!(server.in_waiting().await, 0);
}

#[tokio::test]
async fn test_receive_drains_without_blocking() {
    let net = SimNetwork::new();
    let (mut server, mut client) = connected_pair(&net).await;

    assert!(client.write(b"raw bytes").await.unwrap());
    // Let the notification pump land the chunk.
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(server.in_waiting().await, 9);
    assert_eq!(server.receive().await.unwrap(), b"raw bytes");
    assert_eq!(server.receive().await.unwrap(), b"");
}

#[tokio::test]
async fn test_read_times_out_with_partial_data() {
    let net = SimNetwork::new();
    let (mut server, mut client) = connected_pair(&net).await;

    assert!(client.write(&[7]).await.unwrap());
    tokio::time::sleep(Duration::from_millis(20)).await;

    server.set_timeout(Some(Duration::from_millis(50)));
    let chunk = server.read(4).await.unwrap();
    assert_eq!(chunk.outcome, ReadOutcome::TimedOut);
    assert_eq!(chunk.data, vec![7]);
}

#[tokio::test]
async fn test_recvall_timeout_requeues_partial_bytes() {
    let net = SimNetwork::new();
    let (mut server, mut client) = connected_pair(&net).await;

    assert!(client.write(&[1, 2]).await.unwrap());
    tokio::time::sleep(Duration::from_millis(20)).await;

    server.set_timeout(Some(Duration::from_millis(50)));
    match server.recvall(5).await {
        Err(TransportError::TimedOut {
            received,
            requested,
        }) => {
            assert_eq!(received, 2);
            assert_eq!(requested, 5);
        }
        other => panic!("expected TimedOut, got {:?}", other.map(|_| ())),
    }

    // The partial bytes went back to the front of the stream intact.
    assert!(client.write(&[3, 4, 5]).await.unwrap());
    server.set_timeout(None);
    assert_eq!(server.recvall(5).await.unwrap(), vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_wake_event_interrupts_blocked_read() {
    let net = SimNetwork::new();
    let (mut server, _client) = connected_pair(&net).await;

    let wake = server.get_event();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        wake.signal();
    });

    let chunk = timeout(Duration::from_secs(1), server.read(16))
        .await
        .expect("wake must release the read")
        .unwrap();
    assert_eq!(chunk.outcome, ReadOutcome::Cancelled);
    assert!(chunk.data.is_empty());
}

#[tokio::test]
async fn test_recvall_cancelled_reports_counts() {
    let net = SimNetwork::new();
    let (mut server, mut client) = connected_pair(&net).await;

    assert!(client.write(&[9]).await.unwrap());
    tokio::time::sleep(Duration::from_millis(20)).await;

    let wake = server.get_event();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        wake.signal();
    });

    match timeout(Duration::from_secs(1), server.recvall(8))
        .await
        .expect("wake must release recvall")
    {
        Err(TransportError::Cancelled {
            received,
            requested,
        }) => {
            assert_eq!(received, 1);
            assert_eq!(requested, 8);
        }
        other => panic!("expected Cancelled, got {:?}", other.map(|_| ())),
    }
    // Partial byte is requeued, not lost.
    assert_eq!(server.receive().await.unwrap(), vec![9]);
}

#[tokio::test]
async fn test_oversized_frame_header_is_rejected() {
    let net = SimNetwork::new();
    let mut server = FramedTransport::with_link(
        TransportConfig::server().with_max_frame_size(1024),
        Box::new(net.endpoint(SERVER_ADDR, "srv")),
    );
    let mut client = FramedTransport::with_link(
        TransportConfig::client(SERVER_ADDR),
        Box::new(net.endpoint(CLIENT_ADDR, "cli")),
    );
    let server_task = tokio::spawn(async move {
        let accepted = server.advertise(Some(Duration::from_secs(5))).await;
        (server, accepted)
    });
    client.connect(SERVER_ADDR).await.unwrap();
    let (mut server, accepted) = server_task.await.unwrap();
    assert!(accepted.unwrap());

    // Header claims 2048 bytes against a 1024-byte limit.
    assert!(client.write(&[0, 8, 0, 0]).await.unwrap());
    match server.read_packet().await {
        Err(TransportError::FrameTooLarge { length, limit }) => {
            assert_eq!(length, 2048);
            assert_eq!(limit, 1024);
        }
        other => panic!("expected FrameTooLarge, got {:?}", other.map(|_| ())),
    }

    // The outbound guard applies the same limit before the wire.
    let oversized = vec![0u8; 2048];
    assert!(matches!(
        client.write_packet(&oversized).await,
        Err(TransportError::FrameTooLarge { length: 2048, .. })
    ));
}

#[tokio::test]
async fn test_discovery_deduplicates_first_sighting_wins() {
    let net = SimNetwork::new();
    net.script_device("11:22:33:44:55:66", Some("first")).await;
    net.script_device("11:22:33:44:55:66", Some("second")).await;
    net.script_device("AA:AA:AA:AA:AA:AA", None).await;

    let mut client = FramedTransport::with_link(
        TransportConfig::client(SERVER_ADDR),
        Box::new(net.endpoint(CLIENT_ADDR, "probe")),
    );
    let devices = client
        .discover(Some(Duration::from_millis(10)))
        .await
        .unwrap();

    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].address, "11:22:33:44:55:66");
    assert_eq!(devices[0].name.as_deref(), Some("first"));
    assert_eq!(devices[1].address, "AA:AA:AA:AA:AA:AA");
    assert_eq!(devices[1].name, None);
}

#[tokio::test]
async fn test_discovery_fails_when_radio_off() {
    let net = SimNetwork::new();
    net.set_powered(false).await;

    let mut client = FramedTransport::with_link(
        TransportConfig::client(SERVER_ADDR),
        Box::new(net.endpoint(CLIENT_ADDR, "probe")),
    );
    assert!(matches!(
        client.discover(Some(Duration::from_millis(10))).await,
        Err(TransportError::RadioOff)
    ));
    assert!(assert_ok!(client.set_powered(true).await));
    assert!(client.is_powered().await.unwrap());
}

#[tokio::test]
async fn test_connect_to_absent_device_fails() {
    let net = SimNetwork::new();
    let mut client = FramedTransport::with_link(
        TransportConfig::client("00:00:00:00:00:00"),
        Box::new(net.endpoint(CLIENT_ADDR, "probe")),
    );
    match client.open().await {
        Err(TransportError::DeviceNotFound { address }) => {
            assert_eq!(address, "00:00:00:00:00:00");
        }
        other => panic!("expected DeviceNotFound, got {:?}", other.map(|_| ())),
    }
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_identity_mismatch_leaves_advertisement_alive() {
    let net = SimNetwork::new();
    let mut server = FramedTransport::with_link(
        TransportConfig::server(),
        Box::new(net.endpoint(SERVER_ADDR, "srv")),
    );
    let server_task = tokio::spawn(async move {
        let accepted = server.advertise(Some(Duration::from_secs(5))).await;
        (server, accepted)
    });
    // Give the server a moment to register.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let wrong = DeviceIdentity::new(Uuid::from_u128(0xDEAD_BEEF), None, None);
    let mut impostor = FramedTransport::with_link(
        TransportConfig::client(SERVER_ADDR).with_identity(wrong),
        Box::new(net.endpoint("AA:BB:CC:DD:EE:03", "impostor")),
    );
    assert!(matches!(
        impostor.connect(SERVER_ADDR).await,
        Err(TransportError::ServiceNotFound { .. })
    ));

    // The rejected attempt must not have torn the advertisement down.
    let mut client = FramedTransport::with_link(
        TransportConfig::client(SERVER_ADDR),
        Box::new(net.endpoint(CLIENT_ADDR, "probe")),
    );
    client.connect(SERVER_ADDR).await.unwrap();
    let (mut server, accepted) = server_task.await.unwrap();
    assert!(accepted.unwrap());

    assert!(client.write_packet(b"still here").await.unwrap());
    assert_eq!(server.read_packet().await.unwrap(), b"still here");
}

#[tokio::test]
async fn test_advertise_timeout_returns_false() {
    let net = SimNetwork::new();
    let mut server = FramedTransport::with_link(
        TransportConfig::server(),
        Box::new(net.endpoint(SERVER_ADDR, "srv")),
    );
    let accepted = server.advertise(Some(Duration::from_millis(30))).await;
    assert!(!accepted.unwrap());
    assert_eq!(server.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_close_gates_io_until_reconnected() {
    let net = SimNetwork::new();
    let (_server, mut client) = connected_pair(&net).await;

    client.close().await;
    assert!(!client.connected());
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(matches!(
        client.write(b"x").await,
        Err(TransportError::NotConnected)
    ));
    assert!(matches!(
        client.read(1).await,
        Err(TransportError::NotConnected)
    ));

    // A fresh rendezvous re-opens the transport.
    let mut server = FramedTransport::with_link(
        TransportConfig::server(),
        Box::new(net.endpoint(SERVER_ADDR, "srv")),
    );
    let server_task = tokio::spawn(async move {
        let accepted = server.advertise(Some(Duration::from_secs(5))).await;
        (server, accepted)
    });
    client.connect(SERVER_ADDR).await.unwrap();
    let (mut server, accepted) = server_task.await.unwrap();
    assert!(accepted.unwrap());

    assert!(client.write_packet(b"again").await.unwrap());
    assert_eq!(server.read_packet().await.unwrap(), b"again");
}
