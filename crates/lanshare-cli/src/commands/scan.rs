//! `scan` command: look for a device on the network by id.

use anyhow::{Context, Result};

use lanshare_core::discovery::Discovery;

use super::context::Engine;
use super::ScanArgs;

/// Broadcast a discovery probe for `args.device_id` and print the result.
pub async fn run(args: ScanArgs) -> Result<()> {
    let engine = Engine::load()?;

    let discovery = Discovery::bind(
        engine.config.network.discovery_port,
        engine.identity.device_id.clone(),
        engine.identity.hostname.clone(),
    )
    .await
    .context("failed to bind discovery socket")?;

    println!("searching for {} ({:?})...", args.device_id, args.timeout);
    match discovery
        .find(&args.device_id, args.timeout)
        .await
        .context("discovery broadcast failed")?
    {
        Some(ip) => println!("{} is at {ip}", args.device_id),
        None => println!("{} did not respond", args.device_id),
    }
    Ok(())
}
