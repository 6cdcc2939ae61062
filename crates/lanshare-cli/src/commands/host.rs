//! `host` command: listen for an incoming pairing and drive the session.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tokio::net::TcpListener;

use lanshare_core::code::PairCode;
use lanshare_core::discovery::{local_ip, Discovery};
use lanshare_core::session::Host;

use super::context::Engine;
use super::session_loop::{self, SessionInputs};
use super::HostArgs;

/// Listen on the configured TCP port, print a pair code, accept one
/// connection, and run the interactive session once paired.
pub async fn run(args: HostArgs) -> Result<()> {
    let engine = Engine::load()?;
    let download_dir = args
        .download_dir
        .unwrap_or_else(|| engine.default_download_dir());

    let code = match args.pair_code {
        Some(raw) => PairCode::parse(&raw).context("invalid --pair-code")?,
        None => PairCode::generate(last_octet(local_ip())),
    };

    let tcp_port = engine.config.network.tcp_port;
    let listener = TcpListener::bind(("0.0.0.0", tcp_port))
        .await
        .with_context(|| format!("failed to listen on tcp port {tcp_port}"))?;

    println!("listening on {} (tcp port {tcp_port})", local_ip());
    println!("pair code: {code}");

    let discovery = Discovery::bind(
        engine.config.network.discovery_port,
        engine.identity.device_id.clone(),
        engine.identity.hostname.clone(),
    )
    .await
    .context("failed to bind discovery socket")?;
    tokio::spawn(async move {
        if let Err(e) = discovery.serve().await {
            tracing::warn!(error = %e, "discovery responder stopped");
        }
    });

    let (stream, peer_addr) = listener
        .accept()
        .await
        .context("failed to accept incoming connection")?;
    println!("incoming connection from {peer_addr}");

    let host = Host::new(
        engine.identity.device_id.clone(),
        engine.identity.hostname.clone(),
        Arc::clone(&engine.trust),
        engine.config.network.max_payload_bytes,
        Duration::from_secs(engine.config.timeouts.handshake_timeout_secs),
    );

    let connected = host
        .accept(stream, peer_addr, &code, args.trust_peer_as.as_deref())
        .await
        .context("pairing failed")?;
    println!("paired with {}", connected.peer_hostname);

    let peer_label = connected.peer_hostname.clone();
    let peer_device_id = connected
        .peer_device_id
        .clone()
        .unwrap_or_else(|| peer_label.clone());

    session_loop::run(
        connected,
        SessionInputs {
            peer_label,
            peer_device_id,
            state: engine.state,
            state_root: engine.state_root(),
            download_dir,
            temp_dir: engine.temp_dir(),
            chunk_size: engine.config.transfer.chunk_size,
            max_payload: engine.config.network.max_payload_bytes,
            heartbeat_interval: Duration::from_secs(engine.config.timeouts.heartbeat_interval_secs),
            heartbeat_timeout: Duration::from_secs(engine.config.timeouts.heartbeat_timeout_secs),
        },
    )
    .await
}

fn last_octet(ip: IpAddr) -> u8 {
    match ip {
        IpAddr::V4(v4) => v4.octets()[3],
        IpAddr::V6(_) => 0,
    }
}
