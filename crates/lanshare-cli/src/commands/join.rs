//! `join` command: pair with a host by IP and code, then drive the session.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};

use lanshare_core::code::PairCode;
use lanshare_core::session::Joiner;

use super::context::Engine;
use super::session_loop::{self, SessionInputs};
use super::JoinArgs;

/// Dial a host, offer the pair code, and run the interactive session once
/// paired.
pub async fn run(args: JoinArgs) -> Result<()> {
    let engine = Engine::load()?;
    let download_dir = args
        .download_dir
        .unwrap_or_else(|| engine.default_download_dir());
    let code = PairCode::parse(&args.pair_code).context("invalid pair code")?;
    let addr = SocketAddr::new(args.ip, engine.config.network.tcp_port);

    let joiner = Joiner::new(
        engine.identity.device_id.clone(),
        engine.identity.hostname.clone(),
        Arc::clone(&engine.trust),
        engine.config.network.max_payload_bytes,
        Duration::from_secs(engine.config.timeouts.connect_secs),
        Duration::from_secs(engine.config.timeouts.handshake_timeout_secs),
    );

    println!("dialing {addr}...");
    let connected = joiner
        .connect(addr, &code, args.trust_peer_as.as_deref())
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
