//! `config`: show or initialise the configuration file.

use anyhow::{Context, Result};

use atelier_core::config::AtelierConfig;

pub fn cmd_config_show(config: &AtelierConfig) -> Result<()> {
    let mut shown = config.clone();
    if !shown.api.token.is_empty() {
        shown.api.token = "********".to_string();
    }
    println!("# {}", AtelierConfig::file_path().display());
    print!("{}", toml::to_string_pretty(&shown).context("failed to render config")?);
    Ok(())
}

pub fn cmd_config_init() -> Result<()> {
    let path = AtelierConfig::write_default_if_missing()?;
    println!("Config at {}", path.display());
    Ok(())
}
