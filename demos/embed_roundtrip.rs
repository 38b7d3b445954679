//! Host and Client talking over a local WebSocket.
//!
//! Demonstrates:
//! - Binding a Host on a local WebSocket server
//! - Connecting a Client that presents its frame origin
//! - Handshake, requests both ways, events and teardown
//!
//! Usage:
//!   cargo run --example embed_roundtrip
//!   cargo run --example embed_roundtrip -- --debug
//!   cargo run --example embed_roundtrip -- --signed

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use anyhow::Context;
use frame_channel::{
    ChannelEvent, Client, ClientConfig, HeartbeatConfig, Host, HostConfig, PendingServer,
    RequestClass, TOPIC_CHANNEL_CLOSED, WebSocketTransport,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const FRAME_ORIGIN: &str = "https://intel.example.com";
const CREDENTIAL: &str = "pk_test_demo42";
const SIGNING_KEY: &str = "demo-shared-secret";

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let debug = args.iter().any(|a| a == "--debug");
    let signed = args.iter().any(|a| a == "--signed");

    let filter = if debug {
        "frame_channel=debug"
    } else {
        "frame_channel=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    if let Err(e) = run(signed).await {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

async fn run(signed: bool) -> anyhow::Result<()> {
    println!("=== Embed Roundtrip ===\n");

    // ========================================================================
    // Transports
    // ========================================================================

    println!("[1] Binding host server...");
    let server = PendingServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await?;
    let ws_url = server.ws_url();
    println!("    ✓ Listening on {ws_url}\n");

    println!("[2] Connecting frame as {FRAME_ORIGIN}...");
    let (host_transport, frame_transport) = tokio::try_join!(
        server.accept(),
        WebSocketTransport::connect(&ws_url, FRAME_ORIGIN)
    )?;
    println!("    ✓ Connected\n");

    // ========================================================================
    // Configuration
    // ========================================================================

    let mut host_config = HostConfig::builder()
        .container_target("#intel-panel")
        .credential(CREDENTIAL)
        .expected_origin(FRAME_ORIGIN)
        .feature("alerts", true)
        .feature("reports", true)
        .heartbeat(HeartbeatConfig::new(Duration::from_secs(2)));
    let mut client_config = ClientConfig::builder()
        .host_origin(ws_url.as_str())
        .supported_feature("alerts");
    if signed {
        host_config = host_config.signing_key(SIGNING_KEY);
        client_config = client_config.signing_key(SIGNING_KEY);
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    println!("[3] Handshake...");
    let client = Client::new(client_config.build()?, frame_transport);
    let host = Host::attach(host_config.build()?, host_transport);

    let answer = client.handle();
    client.on("insights.sentiment", move |event| {
        if let ChannelEvent::Request(request) = event {
            answer.respond(&request.id, Ok(json!({"score": 0.82, "trend": "up"})))?;
        }
        Ok(())
    });

    let answer = host.handle();
    host.on("pos.cart", move |event| {
        if let ChannelEvent::Request(request) = event {
            answer.respond(&request.id, Ok(json!({"items": 3, "total": 42.5})))?;
        }
        Ok(())
    });
    host.on("alert", |event| {
        println!("    ← alert {:?}", event.data_as::<serde_json::Value>());
        Ok(())
    });
    host.on(TOPIC_CHANNEL_CLOSED, |event| {
        println!("    ← {event:?}");
        Ok(())
    });

    let (established, accepted) = tokio::join!(host.establish(), client.accepted());
    established.context("host handshake")?;
    accepted.context("client handshake")?;
    println!("    ✓ Connected to {:?}", host.peer_origin());
    println!("    ✓ Features {:?}\n", host.features());

    // ========================================================================
    // Traffic
    // ========================================================================

    println!("[4] Host → Client request...");
    let sentiment = host
        .request_with_class("insights.sentiment", json!({"window": "24h"}), RequestClass::Status)
        .await?;
    println!("    ✓ {sentiment}\n");

    println!("[5] Client → Host request...");
    let cart = client.request("pos.cart", json!({})).await?;
    println!("    ✓ {cart}\n");

    println!("[6] Client event...");
    client.emit("alert", json!({"severity": "high"})).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("[7] Idling through a few heartbeats...");
    tokio::time::sleep(Duration::from_secs(5)).await;
    println!("    ✓ Host {} / Client {}\n", host.state(), client.state());
    println!("    Diagnostics: {:?}\n", host.diagnostics());

    // ========================================================================
    // Teardown
    // ========================================================================

    println!("[8] Destroying host...");
    host.destroy();
    client
        .wait_for_state(frame_channel::ChannelState::Closed)
        .await?;
    println!("    ✓ Client {}\n", client.state());

    println!("=== Done ===");
    Ok(())
}
