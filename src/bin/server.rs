//! framelink Server Binary
//!
//! Starts the TCP server and drives it from stdin.
//!
//! Commands:
//! - `/send <id> <text>`  send to one connection
//! - `/kick <id>`         disconnect one connection
//! - `/count`             print the live connection count
//! - `/quit`              stop the server
//! - anything else        broadcast to every connection

use std::io::{self, BufRead};
use std::net::IpAddr;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use crossbeam::channel::unbounded;
use framelink::{ConnectionId, Server, ServerConfig, ServerEvent};
use tracing_subscriber::{fmt, EnvFilter};

/// framelink Server
#[derive(Parser, Debug)]
#[command(name = "framelink-server")]
#[command(about = "Multi-reactor TCP server for length-prefixed text messages")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "9000")]
    port: u16,

    /// Address to bind
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Number of I/O worker threads (defaults to host parallelism, at least 4)
    #[arg(short, long)]
    workers: Option<usize>,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,framelink=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("framelink server v{}", framelink::VERSION);

    let mut builder = ServerConfig::builder().bind_addr(args.bind);
    if let Some(workers) = args.workers {
        builder = builder.worker_count(workers);
    }
    let config = builder.build();

    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        std::process::exit(1);
    }

    let (events_tx, events_rx) = unbounded::<ServerEvent>();
    let server = Server::new(config, Arc::new(events_tx));

    // Print events as they arrive
    thread::spawn(move || {
        for event in events_rx {
            match event {
                ServerEvent::Started { port } => println!("* listening on port {}", port),
                ServerEvent::Stopped => println!("* stopped"),
                ServerEvent::ClientConnected { id, address } => {
                    println!("* [{}] connected from {}", id, address)
                }
                ServerEvent::ClientDisconnected { id } => println!("* [{}] disconnected", id),
                ServerEvent::MessageReceived { id, text } => println!("[{}] {}", id, text),
                ServerEvent::ErrorOccurred { message } => println!("! {}", message),
            }
        }
    });

    if !server.start_server(args.port) {
        tracing::error!("Failed to start server on port {}", args.port);
        std::process::exit(1);
    }

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to read stdin: {}", e);
                break;
            }
        };
        if !run_command(&server, line.trim_end()) {
            break;
        }
    }

    server.stop_server();
}

/// Returns false when the server should stop
fn run_command(server: &Server, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }

    let mut parts = line.splitn(3, ' ');
    match parts.next() {
        Some("/quit") => return false,
        Some("/count") => println!("* {} connections", server.connection_count()),
        Some("/send") => match (parse_id(parts.next()), parts.next()) {
            (Some(id), Some(text)) => server.send_message(id, text),
            _ => println!("! usage: /send <id> <text>"),
        },
        Some("/kick") => match parse_id(parts.next()) {
            Some(id) => server.disconnect_client(id),
            None => println!("! usage: /kick <id>"),
        },
        _ => server.broadcast_message(line),
    }
    true
}

fn parse_id(raw: Option<&str>) -> Option<ConnectionId> {
    raw?.parse::<u64>().ok().map(ConnectionId::from)
}
