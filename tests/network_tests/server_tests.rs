//! Server Tests
//!
//! End-to-end behaviour of `Server` against plain blocking TCP clients.

use std::io::Write;
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::unbounded;
use framelink::protocol::pack;
use framelink::{Server, ServerEvent};

use crate::common::{
    collect_events, connect_client, expect_event, loopback_config, read_frame, reads_eof,
    start_server, wait_until, write_frame,
};

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_start_and_stop() {
    let (server, events, addr) = start_server(2);

    assert!(server.is_listening());
    assert_eq!(server.worker_count(), 2);
    assert_eq!(addr.ip(), Ipv4Addr::LOCALHOST);

    server.stop_server();
    expect_event(&events, |e| *e == ServerEvent::Stopped);
    assert!(!server.is_listening());
    assert_eq!(server.local_addr(), None);

    // Second stop is a no-op
    server.stop_server();
    assert!(collect_events(&events, Duration::from_millis(100)).is_empty());
}

#[test]
fn test_second_start_is_rejected() {
    let (server, events, addr) = start_server(1);

    assert!(!server.start_server(0));
    match expect_event(&events, |e| matches!(e, ServerEvent::ErrorOccurred { .. })) {
        ServerEvent::ErrorOccurred { message } => assert!(message.contains("already listening")),
        other => panic!("unexpected event {:?}", other),
    }

    // Still serving on the original port
    assert_eq!(server.local_addr(), Some(addr));
    let _client = connect_client(addr, &events);
}

#[test]
fn test_bind_failure_reports_error() {
    let occupied = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = occupied.local_addr().unwrap().port();

    let (tx, events) = unbounded();
    let server = Server::new(loopback_config(2), Arc::new(tx));

    assert!(!server.start_server(port));
    assert!(!server.is_listening());
    match expect_event(&events, |e| matches!(e, ServerEvent::ErrorOccurred { .. })) {
        ServerEvent::ErrorOccurred { message } => {
            assert!(message.contains("failed to listen"), "message: {}", message)
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(collect_events(&events, Duration::from_millis(100))
        .iter()
        .all(|e| !matches!(e, ServerEvent::Started { .. })));
}

#[test]
fn test_restart_after_stop() {
    let (server, events, _) = start_server(1);
    server.stop_server();
    expect_event(&events, |e| *e == ServerEvent::Stopped);

    assert!(server.start_server(0));
    expect_event(&events, |e| matches!(e, ServerEvent::Started { .. }));
    let addr = server.local_addr().unwrap();
    let _client = connect_client(addr, &events);
}

// =============================================================================
// Receive Tests
// =============================================================================

#[test]
fn test_message_received() {
    let (_server, events, addr) = start_server(2);
    let (mut client, id) = connect_client(addr, &events);

    write_frame(&mut client, "hello server");

    let event = expect_event(&events, |e| matches!(e, ServerEvent::MessageReceived { .. }));
    assert_eq!(
        event,
        ServerEvent::MessageReceived {
            id,
            text: "hello server".to_string()
        }
    );
}

#[test]
fn test_connected_address_is_plain_ipv4() {
    let (tx, events) = unbounded();
    let server = Server::new(loopback_config(1), Arc::new(tx));
    assert!(server.start_server(0));
    let addr = server.local_addr().unwrap();

    let _client = TcpStream::connect(addr).unwrap();
    match expect_event(&events, |e| matches!(e, ServerEvent::ClientConnected { .. })) {
        ServerEvent::ClientConnected { address, .. } => {
            assert!(address.starts_with("127.0.0.1:"), "address: {}", address)
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_fragmented_frame_is_one_message() {
    let (_server, events, addr) = start_server(1);
    let (mut client, _) = connect_client(addr, &events);

    let wire = pack("arrives in pieces");
    for piece in wire.chunks(3) {
        client.write_all(piece).unwrap();
        client.flush().unwrap();
        thread::sleep(Duration::from_millis(5));
    }

    match expect_event(&events, |e| matches!(e, ServerEvent::MessageReceived { .. })) {
        ServerEvent::MessageReceived { text, .. } => assert_eq!(text, "arrives in pieces"),
        other => panic!("unexpected event {:?}", other),
    }
    let extra = collect_events(&events, Duration::from_millis(100));
    assert!(extra
        .iter()
        .all(|e| !matches!(e, ServerEvent::MessageReceived { .. })));
}

#[test]
fn test_coalesced_frames_arrive_in_order() {
    let (_server, events, addr) = start_server(1);
    let (mut client, _) = connect_client(addr, &events);

    let mut wire = Vec::new();
    for i in 0..20 {
        wire.extend_from_slice(&pack(&format!("msg-{}", i)));
    }
    client.write_all(&wire).unwrap();

    for i in 0..20 {
        match expect_event(&events, |e| matches!(e, ServerEvent::MessageReceived { .. })) {
            ServerEvent::MessageReceived { text, .. } => assert_eq!(text, format!("msg-{}", i)),
            other => panic!("unexpected event {:?}", other),
        }
    }
}

#[test]
fn test_zero_length_frame_is_skipped() {
    let (_server, events, addr) = start_server(1);
    let (mut client, _) = connect_client(addr, &events);

    write_frame(&mut client, "");
    write_frame(&mut client, "after empty");

    match expect_event(&events, |e| matches!(e, ServerEvent::MessageReceived { .. })) {
        ServerEvent::MessageReceived { text, .. } => assert_eq!(text, "after empty"),
        other => panic!("unexpected event {:?}", other),
    }
}

// =============================================================================
// Send Tests
// =============================================================================

#[test]
fn test_send_message_reaches_client() {
    let (server, events, addr) = start_server(2);
    let (mut client, id) = connect_client(addr, &events);

    server.send_message(id, "hello client");
    assert_eq!(read_frame(&mut client), "hello client");
}

#[test]
fn test_broadcast_reaches_every_client() {
    let (server, events, addr) = start_server(3);

    let mut clients: Vec<TcpStream> = (0..5).map(|_| connect_client(addr, &events).0).collect();
    assert!(wait_until(|| server.connection_count() == 5));

    server.broadcast_message("everyone");
    for client in &mut clients {
        assert_eq!(read_frame(client), "everyone");
    }
}

#[test]
fn test_echo_round_trip() {
    let (server, events, addr) = start_server(2);
    let (mut client, _) = connect_client(addr, &events);

    for i in 0..10 {
        write_frame(&mut client, &format!("ping {}", i));
        match expect_event(&events, |e| matches!(e, ServerEvent::MessageReceived { .. })) {
            ServerEvent::MessageReceived { id, text } => server.send_message(id, text),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(read_frame(&mut client), format!("ping {}", i));
    }
}

// =============================================================================
// Disconnect Tests
// =============================================================================

#[test]
fn test_client_disconnect_is_reported() {
    let (server, events, addr) = start_server(2);
    let (client, id) = connect_client(addr, &events);
    assert!(wait_until(|| server.connection_count() == 1));

    drop(client);

    expect_event(&events, |e| *e == ServerEvent::ClientDisconnected { id });
    assert!(wait_until(|| server.connection_count() == 0));

    // Stale id: logged and ignored, nothing reported
    server.send_message(id, "too late");
    let late = collect_events(&events, Duration::from_millis(200));
    assert!(late.is_empty(), "unexpected events {:?}", late);
}

#[test]
fn test_disconnect_client() {
    let (server, events, addr) = start_server(2);
    let (mut client, id) = connect_client(addr, &events);

    server.send_message(id, "goodbye");
    server.disconnect_client(id);

    expect_event(&events, |e| *e == ServerEvent::ClientDisconnected { id });
    assert_eq!(read_frame(&mut client), "goodbye");
    assert!(reads_eof(&mut client));
}

#[test]
fn test_oversized_frame_closes_connection() {
    let (server, events, addr) = start_server(1);
    let (mut client, id) = connect_client(addr, &events);

    client
        .write_all(&(10_485_761u32).to_be_bytes())
        .unwrap();

    let mut errors = 0;
    loop {
        match expect_event(&events, |_| true) {
            ServerEvent::ErrorOccurred { message } => {
                assert!(message.contains("10485761"), "message: {}", message);
                errors += 1;
            }
            ServerEvent::ClientDisconnected { id: closed } => {
                assert_eq!(closed, id);
                break;
            }
            ServerEvent::MessageReceived { .. } => panic!("no message expected"),
            _ => {}
        }
    }
    assert_eq!(errors, 1);
    assert!(reads_eof(&mut client));
    assert!(wait_until(|| server.connection_count() == 0));
}

#[test]
fn test_stop_closes_clients() {
    let (server, events, addr) = start_server(2);
    let mut clients: Vec<TcpStream> = (0..3).map(|_| connect_client(addr, &events).0).collect();

    server.stop_server();
    expect_event(&events, |e| *e == ServerEvent::Stopped);

    for client in &mut clients {
        assert!(reads_eof(client));
    }
    assert_eq!(server.connection_count(), 0);
}
