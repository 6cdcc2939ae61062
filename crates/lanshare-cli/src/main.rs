//! LanShare CLI - peer-to-peer local network file sharing
//!
//! LanShare pairs two devices on the same LAN with a short one-shot code
//! and drives a resumable, chunked file transfer between them.
//!
//! ## Quick Start
//!
//! ```bash
//! # On the receiving machine
//! lanshare host
//!
//! # On the sending machine, using the code the host printed
//! lanshare join 192.168.1.42 7AK3Q9
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::Parser;

mod commands;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Host(args) => commands::host::run(args).await,
        Command::Join(args) => commands::join::run(args).await,
        Command::Reconnect(args) => commands::reconnect::run(args).await,
        Command::Scan(args) => commands::scan::run(args).await,
        Command::Trust(args) => commands::trust::run(args).await,
        Command::Config(args) => commands::config::run(args).await,
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,lanshare=info,lanshare_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
