//! `trust` command: inspect and manage the local trust store.

use anyhow::Result;

use super::context::Engine;
use super::{TrustAction, TrustArgs};

/// List or remove entries in the local trust store.
pub async fn run(args: TrustArgs) -> Result<()> {
    let engine = Engine::load()?;

    match args.action {
        TrustAction::List => {
            let trust = engine.trust.lock().unwrap();
            let devices = trust.list();
            if devices.is_empty() {
                println!("no trusted devices");
                return Ok(());
            }
            println!("{:36}  {:20}  {:16}  last seen", "device id", "hostname", "last ip");
            for peer in devices {
                println!(
                    "{:36}  {:20}  {:16}  {}",
                    peer.device_id,
                    peer.hostname,
                    peer.last_ip,
                    peer.last_seen.to_rfc3339(),
                );
            }
        }
        TrustAction::Remove { device_id } => {
            let removed = {
                let mut trust = engine.trust.lock().unwrap();
                trust.remove(&device_id)?
            };
            if removed {
                println!("removed {device_id}");
            } else {
                println!("{device_id} was not trusted");
            }
        }
    }
    Ok(())
}
