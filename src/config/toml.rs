//! TOML configuration file parsing

use crate::config::cli::Cli;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Coordinator settings loadable from a TOML file
///
/// Example:
///
/// ```toml
/// listen_port = 9999
/// expected_participants = 3
/// storage_dir = "/var/lib/fedpix/rounds"
/// ```
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Port to listen on
    pub listen_port: Option<u16>,

    /// Number of participants expected per round
    pub expected_participants: Option<usize>,

    /// Directory for spooled contribution and aggregate images
    pub storage_dir: Option<PathBuf>,
}

/// Parse a TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<CoordinatorConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from a string
pub fn parse_toml_string(contents: &str) -> Result<CoordinatorConfig> {
    let config: CoordinatorConfig =
        ::toml::from_str(contents).context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
///
/// Returns the resolved (listen_port, expected_participants, storage_dir).
pub fn merge_cli_with_config(
    cli: &Cli,
    config: &CoordinatorConfig,
) -> (u16, Option<usize>, Option<PathBuf>) {
    // Flags left at their defaults yield to the file
    let listen_port = if cli.listen_port != 9999 {
        cli.listen_port
    } else {
        config.listen_port.unwrap_or(cli.listen_port)
    };

    let expected_participants = cli
        .expected_participants
        .or(config.expected_participants);

    let storage_dir = cli.storage_dir.clone().or_else(|| config.storage_dir.clone());

    (listen_port, expected_participants, storage_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("fedpix").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_parse_full_config() {
        let config = parse_toml_string(
            r#"
            listen_port = 7777
            expected_participants = 3
            storage_dir = "/tmp/rounds"
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_port, Some(7777));
        assert_eq!(config.expected_participants, Some(3));
        assert_eq!(config.storage_dir, Some(PathBuf::from("/tmp/rounds")));
    }

    #[test]
    fn test_parse_empty_config() {
        let config = parse_toml_string("").unwrap();
        assert!(config.listen_port.is_none());
        assert!(config.expected_participants.is_none());
        assert!(config.storage_dir.is_none());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(parse_toml_string("listen_prot = 7777").is_err());
    }

    #[test]
    fn test_cli_takes_precedence() {
        let config = parse_toml_string(
            r#"
            listen_port = 7777
            expected_participants = 3
            "#,
        )
        .unwrap();

        let cli = cli(&["--listen-port", "8888", "--expected-participants", "5"]);
        let (port, expected, storage) = merge_cli_with_config(&cli, &config);

        assert_eq!(port, 8888);
        assert_eq!(expected, Some(5));
        assert!(storage.is_none());
    }

    #[test]
    fn test_config_fills_cli_defaults() {
        let config = parse_toml_string(
            r#"
            listen_port = 7777
            storage_dir = "/tmp/rounds"
            "#,
        )
        .unwrap();

        let cli = cli(&[]);
        let (port, expected, storage) = merge_cli_with_config(&cli, &config);

        assert_eq!(port, 7777);
        assert!(expected.is_none());
        assert_eq!(storage, Some(PathBuf::from("/tmp/rounds")));
    }

    #[test]
    fn test_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coordinator.toml");
        fs::write(&path, "listen_port = 6000\n").unwrap();

        let config = parse_toml_file(&path).unwrap();
        assert_eq!(config.listen_port, Some(6000));

        assert!(parse_toml_file(&dir.path().join("missing.toml")).is_err());
    }
}
