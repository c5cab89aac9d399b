//! CLI configuration inspection
//!
//! Provides `sketchwire config {show,get,defaults}`.

use crate::server::{load_config, DEFAULT_CONFIG};
use anyhow::{bail, Context, Result};
use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the fully resolved configuration as TOML
    Show,
    /// Print one setting
    Get {
        /// Setting key (dot notation: collab.lock_max_ttl_ms)
        key: String,
    },
    /// Print the built-in defaults
    Defaults,
}

pub fn run(cmd: ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            let config = load_config()?;
            let rendered =
                toml::to_string_pretty(&config).context("Failed to serialize configuration")?;
            print!("{}", rendered);
            Ok(())
        }
        ConfigCommands::Get { key } => {
            let config = load_config()?;
            let value = toml::Value::try_from(&config).context("Failed to serialize configuration")?;
            println!("{}", lookup(&value, &key)?);
            Ok(())
        }
        ConfigCommands::Defaults => {
            print!("{}", DEFAULT_CONFIG);
            Ok(())
        }
    }
}

fn lookup(root: &toml::Value, key: &str) -> Result<String> {
    let mut current = root;
    for part in key.split('.') {
        current = match current.get(part) {
            Some(next) => next,
            None => bail!("Unknown setting: {}", key),
        };
    }
    Ok(match current {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}
