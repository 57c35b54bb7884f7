//! framelink CLI Client
//!
//! Connects to a framelink server and sends each stdin line as a message.
//! `/quit` or end of input disconnects.

use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use framelink::network::CallbackSink;
use framelink::{ClientConfig, ClientEvent, ClientProxy};
use tracing_subscriber::{fmt, EnvFilter};

/// framelink CLI
#[derive(Parser, Debug)]
#[command(name = "framelink-cli")]
#[command(about = "CLI client for a framelink server")]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "9000")]
    port: u16,

    /// Reconnect automatically when the connection drops
    #[arg(short, long)]
    auto_reconnect: bool,

    /// Delay between reconnect attempts in milliseconds
    #[arg(short, long, default_value = "3000")]
    interval_ms: u64,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,framelink=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    let config = ClientConfig::builder()
        .auto_reconnect(args.auto_reconnect)
        .reconnect_interval(Duration::from_millis(args.interval_ms))
        .build();

    // Events are printed straight from the client thread
    let printer = CallbackSink(|event: ClientEvent| match event {
        ClientEvent::Connected => println!("* connected"),
        ClientEvent::Disconnected => println!("* disconnected"),
        ClientEvent::Reconnecting => println!("* reconnecting..."),
        ClientEvent::MessageReceived { text } => println!("< {}", text),
        ClientEvent::ErrorOccurred { message } => println!("! {}", message),
    });

    let client = match ClientProxy::new(config, Arc::new(printer)) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("Failed to start client: {}", e);
            std::process::exit(1);
        }
    };

    client.connect(args.host, args.port);

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to read stdin: {}", e);
                break;
            }
        };
        match line.trim_end() {
            "/quit" => break,
            "" => {}
            text => client.send(text),
        }
    }

    client.disconnect();
}
