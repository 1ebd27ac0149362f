//! Utility functions for the CLI.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use myo_core::ConnectionConfig;

/// Write output to file or stdout
pub fn write_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}

/// Connection settings for a user-supplied timeout in seconds.
pub fn connection_config(timeout_secs: u64) -> ConnectionConfig {
    let timeout = Duration::from_secs(timeout_secs.max(1));
    ConnectionConfig::new()
        .connection_timeout(timeout)
        .scan_timeout(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_output_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_output(Some(&path), "hello\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }

    #[test]
    fn test_connection_config_never_zero() {
        let config = connection_config(0);
        assert_eq!(config.connection_timeout, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }
}
