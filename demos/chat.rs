//! Chat room server over WebSocket.
//!
//! Demonstrates:
//! - Resolving a connection identity from the `user` query parameter
//! - A `Chat` channel streaming from `room_<id>`
//! - Broadcasting from an action to every subscriber of a room
//! - Graceful shutdown on Ctrl+C
//!
//! Usage:
//!   cargo run --example chat
//!   cargo run --example chat -- --debug
//!   cargo run --example chat -- --port 9000
//!
//! Then connect with any WebSocket client:
//!
//! ```text
//! ws://127.0.0.1:8080/cable?user=alice
//! > {"command":"subscribe","identifier":"{\"channel\":\"Chat\",\"room\":1}"}
//! > {"command":"message","identifier":"{\"channel\":\"Chat\",\"room\":1}","data":"{\"action\":\"speak\",\"text\":\"hi\"}"}
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};

use cable_mux::{ChannelDescriptor, ConnectRequest, Error, Identity, Result, Server};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_PORT: u16 = 8080;

// ============================================================================
// Args
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    port: u16,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let port = args
            .iter()
            .position(|a| a == "--port")
            .and_then(|i| args.get(i + 1))
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        Self {
            debug: args.iter().any(|a| a == "--debug"),
            port,
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "cable_mux=debug"
    } else {
        "cable_mux=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

// ============================================================================
// Channels
// ============================================================================

fn room_stream(room: &Value) -> String {
    match room {
        Value::String(s) => format!("room_{s}"),
        other => format!("room_{other}"),
    }
}

fn chat_channel() -> ChannelDescriptor {
    ChannelDescriptor::builder("Chat")
        .on_subscribed(|ctx| {
            let room = ctx
                .param("room")
                .cloned()
                .ok_or_else(|| Error::handler("room parameter is required"))?;
            ctx.stream_from(room_stream(&room));
            Ok(())
        })
        .on_unsubscribed(|ctx| {
            if let Some(room) = ctx.param("room").cloned() {
                let user = ctx.identity().get("current_user").unwrap_or_default().to_string();
                ctx.broadcast(room_stream(&room), json!({ "left": user }));
            }
            Ok(())
        })
        .action("speak", |ctx, data| {
            let room = ctx
                .param("room")
                .cloned()
                .ok_or_else(|| Error::handler("room parameter is required"))?;
            let user = ctx.identity().get("current_user").unwrap_or_default().to_string();
            ctx.broadcast(
                room_stream(&room),
                json!({ "user": user, "text": data["text"] }),
            );
            Ok(())
        })
        .build()
}

fn resolve_user(request: &ConnectRequest) -> Result<Identity> {
    let user = request
        .query_param("user")
        .ok_or_else(|| Error::rejected("missing user query parameter"))?;
    Ok(Identity::new().with("current_user", user))
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== Chat Server ===\n");

    let server = Server::builder()
        .resolver(resolve_user)
        .channel(chat_channel())
        .build()?;

    let listener = server
        .listen(IpAddr::V4(Ipv4Addr::LOCALHOST), args.port)
        .await?;
    println!("[Listen] {}/cable?user=<name>", listener.ws_url());
    println!("         Press Ctrl+C to stop\n");

    tokio::signal::ctrl_c().await?;

    println!("\n[Shutdown] Disconnecting clients...");
    listener.shutdown();
    server.shutdown().await;
    println!("           ✓ Done");

    Ok(())
}
