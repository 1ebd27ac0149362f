//! Config command implementation.

use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::cli::ConfigAction;
use crate::config::Config;

pub fn cmd_config(action: ConfigAction, config: &Config) -> Result<()> {
    match action {
        ConfigAction::Path => println!("{}", Config::path().display()),
        ConfigAction::Show => print!("{}", show(config)?),
        ConfigAction::Init { force } => {
            let path = Config::path();
            init(&path, force)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}

fn show(config: &Config) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to serialize config")
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "Config already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save_to(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_round_trips() {
        let config = Config {
            device: Some("F3:F8:2E:FB:8C:3C".to_string()),
            ..Default::default()
        };
        let text = show(&config).unwrap();
        assert!(text.contains("device = \"F3:F8:2E:FB:8C:3C\""));
        assert_eq!(toml::from_str::<Config>(&text).unwrap(), config);
    }

    #[test]
    fn test_init_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "device = \"keep\"\n").unwrap();

        let err = init(&path, false).unwrap_err();
        assert!(err.to_string().contains("--force"));
        assert_eq!(
            Config::load_from(&path).unwrap().device.as_deref(),
            Some("keep")
        );

        init(&path, true).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_init_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("myo").join("config.toml");
        init(&path, false).unwrap();
        assert!(path.exists());
    }
}
