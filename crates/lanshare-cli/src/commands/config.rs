//! `config` command: inspect the effective configuration.

use anyhow::{Context, Result};

use lanshare_core::config::Config;

use super::{ConfigAction, ConfigArgs};

/// Print the effective configuration or its file path.
pub async fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = Config::load_or_default();
            let text = toml::to_string_pretty(&config).context("failed to encode configuration")?;
            print!("{text}");
        }
        ConfigAction::Path => match Config::default_path() {
            Some(path) => println!("{}", path.display()),
            None => println!("no platform config directory could be determined"),
        },
    }
    Ok(())
}
