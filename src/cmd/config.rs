//! Configuration view and validation commands: `splitfair config`.

use anyhow::Result;

use splitfair::config::{SplitfairConfig, SplitfairToml};

use super::super::ConfigCommands;

fn print_toml(toml: &SplitfairToml) {
    println!("[backend]");
    match &toml.backend.url {
        Some(url) => println!("  url = \"{}\"", url),
        None => println!("  url = (unset)"),
    }
    println!(
        "  anon_key = {}",
        if toml.backend.anon_key.is_some() { "(set)" } else { "(unset)" }
    );
    println!("  request_timeout_secs = {}", toml.backend.request_timeout_secs);
    println!();

    println!("[realtime]");
    println!("  channel_capacity = {}", toml.realtime.channel_capacity);
    println!();

    println!("[penalties]");
    for threshold in &toml.penalties.thresholds {
        println!(
            "  {} points -> {} extra task(s): {}",
            threshold.points, threshold.extra_tasks, threshold.message
        );
    }
    println!();

    println!("[logging]");
    println!("  level = \"{}\"", toml.logging.level);
    println!("  json = {}", toml.logging.json);
    println!("  debug_buffer = {}", toml.logging.debug_buffer);
    if let Some(file) = &toml.logging.file {
        println!("  file = \"{}\"", file.display());
    }
    println!();
}

pub fn cmd_config(config: &SplitfairConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.config_path();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("SplitFair Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No splitfair.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();
            print_toml(&config.toml);

            println!("Effective values (with env/CLI overrides):");
            println!(
                "  backend_url = {}",
                config.backend_url().unwrap_or_else(|| "(in-memory only)".to_string())
            );
            println!("  log_level = \"{}\"", config.log_level());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            if !config_path.exists() {
                println!("No splitfair.toml found. Using defaults (valid).");
                return Ok(());
            }
            config.toml.validate()?;
            println!("Configuration is valid.");
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("splitfair.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            SplitfairToml::default().save(&config_path)?;
            println!("Created splitfair.toml at {}", config_path.display());
        }
    }

    Ok(())
}
