//! `reconnect` command: re-establish a session with an already-trusted peer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};

use lanshare_core::discovery::Discovery;
use lanshare_core::session::Joiner;

use super::context::Engine;
use super::session_loop::{self, SessionInputs};
use super::ReconnectArgs;

/// Reconnect to a trusted peer: dial its last known IP, falling back to a
/// discovery broadcast if that fails, then run the interactive session.
pub async fn run(args: ReconnectArgs) -> Result<()> {
    let engine = Engine::load()?;
    let download_dir = args
        .download_dir
        .unwrap_or_else(|| engine.default_download_dir());

    let last_known_ip = {
        let trust = engine.trust.lock().unwrap();
        if !trust.is_trusted(&args.device_id) {
            bail!("{} is not a trusted device", args.device_id);
        }
        trust.ip_of(&args.device_id)
    };

    let joiner = Joiner::new(
        engine.identity.device_id.clone(),
        engine.identity.hostname.clone(),
        Arc::clone(&engine.trust),
        engine.config.network.max_payload_bytes,
        Duration::from_secs(engine.config.timeouts.connect_secs),
        Duration::from_secs(engine.config.timeouts.handshake_timeout_secs),
    );

    let tcp_port = engine.config.network.tcp_port;
    let connected = match try_dial(&joiner, last_known_ip, tcp_port).await {
        Some(connected) => connected,
        None => {
            println!("last known address unreachable, searching the network...");
            let discovery = Discovery::bind(
                engine.config.network.discovery_port,
                engine.identity.device_id.clone(),
                engine.identity.hostname.clone(),
            )
            .await
            .context("failed to bind discovery socket")?;
            let timeout = Duration::from_secs(engine.config.timeouts.discovery_timeout_secs);
            let found = discovery
                .find(&args.device_id, timeout)
                .await
                .context("discovery broadcast failed")?
                .with_context(|| format!("could not find {} on the network", args.device_id))?;
            try_dial(&joiner, Some(found), tcp_port)
                .await
                .with_context(|| format!("found {found} but reconnect handshake failed"))?
        }
    };

    println!("reconnected to {}", connected.peer_hostname);

    let peer_label = connected.peer_hostname.clone();
    let peer_device_id = connected
        .peer_device_id
        .clone()
        .unwrap_or_else(|| args.device_id.clone());

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

async fn try_dial(
    joiner: &Joiner,
    ip: Option<std::net::IpAddr>,
    tcp_port: u16,
) -> Option<lanshare_core::session::Connected> {
    let ip = ip?;
    joiner.reconnect(SocketAddr::new(ip, tcp_port)).await.ok()
}
