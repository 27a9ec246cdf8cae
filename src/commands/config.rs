use anyhow::Result;

use crate::config::{Config, CONFIG_KEYS};
use crate::ui;

#[derive(Debug)]
pub enum ConfigAction {
    Get { key: String },
    Set { key: String, value: String },
    List { json: bool },
}

pub async fn execute(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Get { key } => get_config_value(&key),
        ConfigAction::Set { key, value } => set_config_value(&key, &value),
        ConfigAction::List { json } => list_config(json),
    }
}

fn normalize_key(key: &str) -> String {
    key.replace('-', "_")
}

fn get_config_value(key: &str) -> Result<()> {
    let config = Config::load()?;

    match config.get(&normalize_key(key))? {
        Some(value) => ui::info(&value),
        None => ui::info("(not set)"),
    }

    Ok(())
}

fn set_config_value(key: &str, value: &str) -> Result<()> {
    let key = normalize_key(key);
    if key == "token_secret" || key == "secret" {
        anyhow::bail!(
            "The token secret is never saved. Pass --secret or set NIM_TOKEN_SECRET instead."
        );
    }

    Config::update(|config| config.set_value(&key, value))?;
    ui::info(&format!("Set {key} to: {value}"));

    Ok(())
}

fn list_config(json: bool) -> Result<()> {
    let config = Config::load()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    ui::info("SolarNode Image Maker Configuration:");
    for key in CONFIG_KEYS {
        let value = config.get(key)?;
        ui::info(&format!(
            "  {}: {}",
            key,
            value.as_deref().unwrap_or("(not set)")
        ));
    }

    Ok(())
}
