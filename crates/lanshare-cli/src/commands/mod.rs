//! CLI command definitions and handlers.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

pub mod config;
pub mod context;
pub mod host;
pub mod join;
pub mod reconnect;
pub mod scan;
pub mod session_loop;
pub mod trust;

/// LanShare - peer-to-peer local network file sharing
#[derive(Parser)]
#[command(name = "lanshare")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Listen for an incoming pairing and drive an interactive session
    Host(HostArgs),

    /// Pair with a host and drive an interactive session
    Join(JoinArgs),

    /// Reconnect to an already-trusted peer
    Reconnect(ReconnectArgs),

    /// Scan the network for a device by id
    Scan(ScanArgs),

    /// Manage trusted devices
    Trust(TrustArgs),

    /// Inspect configuration
    Config(ConfigArgs),
}

#[derive(clap::Args)]
pub struct HostArgs {
    /// Use this pair code instead of generating a fresh one
    #[arg(long)]
    pub pair_code: Option<String>,

    /// The joiner's device id, if known ahead of time out of band (e.g.
    /// copied from the joiner's `lanshare config show`). Pairing records
    /// it as a trusted peer so a later `reconnect` can skip the pair code.
    /// The wire handshake itself carries no device id, so without this the
    /// host can never trust the joiner from pairing alone.
    #[arg(long)]
    pub trust_peer_as: Option<String>,

    /// Directory received files are written into
    #[arg(long)]
    pub download_dir: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct JoinArgs {
    /// The host's IP address
    pub ip: IpAddr,

    /// The pair code the host displayed
    pub pair_code: String,

    /// The host's device id, if known ahead of time out of band. Pairing
    /// records it as a trusted peer so a later `reconnect` can skip the
    /// pair code. The wire handshake itself carries no device id, so
    /// without this the joiner can never trust the host from pairing
    /// alone.
    #[arg(long)]
    pub trust_peer_as: Option<String>,

    /// Directory received files are written into
    #[arg(long)]
    pub download_dir: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct ReconnectArgs {
    /// Trusted device id to reconnect to
    pub device_id: String,

    /// Directory received files are written into
    #[arg(long)]
    pub download_dir: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct ScanArgs {
    /// Device id to look for
    pub device_id: String,

    /// How long to wait for a response, e.g. "5s", "500ms"
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub timeout: Duration,
}

#[derive(clap::Args)]
pub struct TrustArgs {
    #[command(subcommand)]
    pub action: TrustAction,
}

#[derive(Subcommand)]
pub enum TrustAction {
    /// List trusted devices
    List,
    /// Remove a trusted device
    Remove {
        /// Device id to remove
        device_id: String,
    },
}

#[derive(clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}

/// Parse a duration like `"5s"`, `"500ms"`, or `"2m"`. A bare number is
/// taken as seconds.
fn parse_duration(input: &str) -> Result<Duration, String> {
    let trimmed = input.trim();
    let split_at = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split_at);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{input}'"))?;
    match unit {
        "" | "s" => Ok(Duration::from_secs(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        other => Err(format!("unknown duration unit '{other}' in '{input}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_seconds_and_millis_and_minutes() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
    }

    #[test]
    fn parse_duration_rejects_unknown_unit() {
        assert!(parse_duration("5x").is_err());
    }
}
