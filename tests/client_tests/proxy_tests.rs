//! Proxy Tests
//!
//! Connection, messaging and state errors of `ClientProxy`.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpListener};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver};
use framelink::protocol::pack;
use framelink::{ClientConfig, ClientEvent, ClientProxy, ServerEvent};

use crate::common::{collect_events, expect_event, read_frame, start_server, wait_until, TIMEOUT};

// =============================================================================
// Helper Functions
// =============================================================================

pub fn spawn_client(config: ClientConfig) -> (ClientProxy, Receiver<ClientEvent>) {
    let (tx, rx) = unbounded();
    let client = ClientProxy::new(config, Arc::new(tx)).unwrap();
    (client, rx)
}

fn error_message(event: ClientEvent) -> String {
    match event {
        ClientEvent::ErrorOccurred { message } => message,
        other => panic!("expected ErrorOccurred, got {:?}", other),
    }
}

// =============================================================================
// Messaging Tests
// =============================================================================

#[test]
fn test_connect_and_exchange_messages() {
    let (server, server_events, addr) = start_server(2);
    let (client, events) = spawn_client(ClientConfig::default());

    client.connect("127.0.0.1", addr.port());
    expect_event(&events, |e| *e == ClientEvent::Connected);
    let id = match expect_event(&server_events, |e| matches!(e, ServerEvent::ClientConnected { .. })) {
        ServerEvent::ClientConnected { id, .. } => id,
        other => panic!("unexpected event {:?}", other),
    };

    client.send("from client");
    match expect_event(&server_events, |e| matches!(e, ServerEvent::MessageReceived { .. })) {
        ServerEvent::MessageReceived { id: from, text } => {
            assert_eq!(from, id);
            assert_eq!(text, "from client");
        }
        other => panic!("unexpected event {:?}", other),
    }

    server.send_message(id, "from server");
    let event = expect_event(&events, |e| matches!(e, ClientEvent::MessageReceived { .. }));
    assert_eq!(
        event,
        ClientEvent::MessageReceived {
            text: "from server".to_string()
        }
    );
}

#[test]
fn test_messages_arrive_in_send_order() {
    let (server, server_events, addr) = start_server(1);
    let (client, events) = spawn_client(ClientConfig::default());

    client.connect("127.0.0.1", addr.port());
    expect_event(&events, |e| *e == ClientEvent::Connected);
    expect_event(&server_events, |e| matches!(e, ServerEvent::ClientConnected { .. }));

    for i in 0..25 {
        client.send(format!("n{}", i));
    }
    for i in 0..25 {
        match expect_event(&server_events, |e| matches!(e, ServerEvent::MessageReceived { .. })) {
            ServerEvent::MessageReceived { text, .. } => assert_eq!(text, format!("n{}", i)),
            other => panic!("unexpected event {:?}", other),
        }
    }
    drop(server);
}

#[test]
fn test_client_frames_match_wire_format() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    let (client, events) = spawn_client(ClientConfig::default());

    client.connect("127.0.0.1", port);
    let (mut peer, _) = listener.accept().unwrap();
    peer.set_read_timeout(Some(TIMEOUT)).unwrap();
    expect_event(&events, |e| *e == ClientEvent::Connected);

    client.send("raw check");
    assert_eq!(read_frame(&mut peer), "raw check");
}

// =============================================================================
// State Error Tests
// =============================================================================

#[test]
fn test_send_while_disconnected_reports_error() {
    let (client, events) = spawn_client(ClientConfig::default());

    client.send("nobody home");

    let message = error_message(expect_event(&events, |_| true));
    assert!(message.contains("not connected"), "message: {}", message);
}

#[test]
fn test_connect_while_connected_reports_error() {
    let (_server, _server_events, addr) = start_server(1);
    let (client, events) = spawn_client(ClientConfig::default());

    client.connect("127.0.0.1", addr.port());
    expect_event(&events, |e| *e == ClientEvent::Connected);

    client.connect("127.0.0.1", addr.port());
    let message = error_message(expect_event(&events, |_| true));
    assert!(message.contains("already connected"), "message: {}", message);
    assert!(client.is_connected());
}

#[test]
fn test_is_connected_tracks_state() {
    let (_server, _server_events, addr) = start_server(1);
    let (client, events) = spawn_client(ClientConfig::default());
    assert!(!client.is_connected());

    client.connect("127.0.0.1", addr.port());
    expect_event(&events, |e| *e == ClientEvent::Connected);
    assert!(client.is_connected());

    client.disconnect();
    expect_event(&events, |e| *e == ClientEvent::Disconnected);
    assert!(wait_until(|| !client.is_connected()));
}

#[test]
fn test_disconnect_when_idle_is_silent() {
    let (client, events) = spawn_client(ClientConfig::default());

    client.disconnect();
    assert!(collect_events(&events, Duration::from_millis(200)).is_empty());
}

// =============================================================================
// Graceful Close Tests
// =============================================================================

const LARGE_FRAME: usize = 8 * 1024 * 1024;

fn assert_single_frame(wire: &[u8], payload_len: usize) {
    assert_eq!(wire.len(), 4 + payload_len, "received {} bytes", wire.len());
    assert_eq!(&wire[..4], &(payload_len as u32).to_be_bytes());
    assert!(wire[4..].iter().all(|&b| b == b'x'));
}

#[test]
fn test_disconnect_delivers_queued_frames() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    let (client, events) = spawn_client(ClientConfig::default());

    client.connect("127.0.0.1", port);
    let (mut peer, _) = listener.accept().unwrap();
    peer.set_read_timeout(Some(TIMEOUT)).unwrap();
    expect_event(&events, |e| *e == ClientEvent::Connected);

    client.send("x".repeat(LARGE_FRAME));
    client.disconnect();
    client.send("too late");

    let message = error_message(expect_event(&events, |e| {
        matches!(e, ClientEvent::ErrorOccurred { .. })
    }));
    assert!(message.contains("not connected"), "message: {}", message);

    let mut wire = Vec::new();
    peer.read_to_end(&mut wire).unwrap();
    assert_single_frame(&wire, LARGE_FRAME);

    expect_event(&events, |e| *e == ClientEvent::Disconnected);
    assert!(!client.is_connected());
}

#[test]
fn test_drop_delivers_queued_frames() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    let (client, events) = spawn_client(ClientConfig::default());

    client.connect("127.0.0.1", port);
    let (mut peer, _) = listener.accept().unwrap();
    peer.set_read_timeout(Some(TIMEOUT)).unwrap();
    expect_event(&events, |e| *e == ClientEvent::Connected);

    let reader = thread::spawn(move || {
        let mut wire = Vec::new();
        peer.read_to_end(&mut wire).map(|_| wire)
    });

    client.send("x".repeat(LARGE_FRAME));
    drop(client);

    let wire = reader.join().unwrap().unwrap();
    assert_single_frame(&wire, LARGE_FRAME);
}

#[test]
fn test_unresolvable_host_is_reported_once() {
    let config = ClientConfig::builder()
        .auto_reconnect(true)
        .reconnect_interval(Duration::from_millis(100))
        .build();
    let (client, events) = spawn_client(config);

    client.connect("no-such-host.invalid", 9);
    expect_event(&events, |e| matches!(e, ClientEvent::ErrorOccurred { .. }));

    let later = collect_events(&events, Duration::from_millis(500));
    assert!(
        later.iter().all(|e| *e != ClientEvent::Reconnecting),
        "events: {:?}",
        later
    );
    assert!(!client.is_connected());
}

// =============================================================================
// Server Side Close Tests
// =============================================================================

#[test]
fn test_server_stop_is_a_clean_disconnect() {
    let (server, _server_events, addr) = start_server(1);
    let (client, events) = spawn_client(ClientConfig::default());

    client.connect("127.0.0.1", addr.port());
    expect_event(&events, |e| *e == ClientEvent::Connected);

    server.stop_server();

    let mut seen = Vec::new();
    loop {
        let event = expect_event(&events, |_| true);
        let done = event == ClientEvent::Disconnected;
        seen.push(event);
        if done {
            break;
        }
    }
    assert!(
        seen.iter()
            .all(|e| !matches!(e, ClientEvent::ErrorOccurred { .. })),
        "events: {:?}",
        seen
    );
    assert!(wait_until(|| !client.is_connected()));
}

#[test]
fn test_oversized_frame_from_server_disconnects() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    let (client, events) = spawn_client(ClientConfig::default());

    client.connect("127.0.0.1", port);
    let (mut peer, _) = listener.accept().unwrap();
    peer.set_read_timeout(Some(TIMEOUT)).unwrap();
    expect_event(&events, |e| *e == ClientEvent::Connected);

    // A valid frame first, then a header past the cap
    peer.write_all(&pack("before")).unwrap();
    peer.write_all(&(10_485_761u32).to_be_bytes()).unwrap();

    let event = expect_event(&events, |e| matches!(e, ClientEvent::MessageReceived { .. }));
    assert_eq!(
        event,
        ClientEvent::MessageReceived {
            text: "before".to_string()
        }
    );

    let message = error_message(expect_event(&events, |_| true));
    assert!(message.contains("Protocol violation"), "message: {}", message);
    expect_event(&events, |e| *e == ClientEvent::Disconnected);

    let mut buf = [0u8; 16];
    assert!(matches!(peer.read(&mut buf), Ok(0) | Err(_)));
}
