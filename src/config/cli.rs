//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Coordinator mode (default) - collect contributions and serve the mean
    Coordinator,
    /// Participant mode - submit a local image and fetch the global average
    Participant,
    /// Reset mode - clear the coordinator's current round
    Reset,
}

/// fedpix - Federated pixel-wise image averaging
#[derive(Parser, Debug)]
#[command(name = "fedpix")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: coordinator, participant, or reset
    #[arg(long, value_enum, default_value = "coordinator")]
    pub mode: ExecutionMode,

    // === Coordinator Options ===
    /// Port for the coordinator to listen on (coordinator mode only)
    #[arg(long, default_value = "9999")]
    pub listen_port: u16,

    /// Number of participants expected per round
    ///
    /// When set, aggregate requests are answered only after this many
    /// contributions have arrived; participants poll until then.
    #[arg(long)]
    pub expected_participants: Option<usize>,

    /// Directory where contributions and the aggregate are spooled as BMP files
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// TOML configuration file (coordinator mode, CLI flags take precedence)
    #[arg(long)]
    pub config: Option<PathBuf>,

    // === Participant Options ===
    /// Coordinator address, host or host:port (participant and reset modes)
    #[arg(long)]
    pub coordinator: Option<String>,

    /// Port to connect to when --coordinator has no port
    #[arg(long, default_value = "9999")]
    pub coordinator_port: u16,

    /// Participant identifier (defaults to the local hostname)
    #[arg(long)]
    pub participant_id: Option<String>,

    /// Local grayscale BMP to contribute (participant mode)
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Where to write the received global average image
    #[arg(long, default_value = "global_average.bmp")]
    pub output: PathBuf,

    /// Contribute only, do not fetch the aggregate
    #[arg(long)]
    pub no_fetch: bool,

    /// How long to poll for the aggregate before giving up (seconds)
    #[arg(long, default_value = "60")]
    pub fetch_timeout: u64,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate argument combinations
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.mode {
            ExecutionMode::Coordinator => {
                if self.expected_participants == Some(0) {
                    anyhow::bail!("expected_participants must be at least 1");
                }
            }
            ExecutionMode::Participant => {
                if self.coordinator.is_none() {
                    anyhow::bail!("participant mode requires --coordinator");
                }
                if self.image.is_none() {
                    anyhow::bail!("participant mode requires --image");
                }
                if self.fetch_timeout == 0 && !self.no_fetch {
                    anyhow::bail!("fetch_timeout must be at least 1 second");
                }
            }
            ExecutionMode::Reset => {
                if self.coordinator.is_none() {
                    anyhow::bail!("reset mode requires --coordinator");
                }
            }
        }

        Ok(())
    }

    /// Coordinator address with the default port appended if missing
    pub fn coordinator_addr(&self) -> Option<String> {
        self.coordinator.as_ref().map(|addr| {
            let addr = addr.trim();
            if addr.contains(':') {
                addr.to_string()
            } else {
                format!("{}:{}", addr, self.coordinator_port)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("fedpix").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_default_mode_is_coordinator() {
        let cli = parse_cli(&[]);
        assert_eq!(cli.mode, ExecutionMode::Coordinator);
        assert_eq!(cli.listen_port, 9999);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_participant_requires_coordinator_and_image() {
        let cli = parse_cli(&["--mode", "participant", "--image", "local.bmp"]);
        assert!(cli.validate().is_err());

        let cli = parse_cli(&["--mode", "participant", "--coordinator", "10.0.1.5"]);
        assert!(cli.validate().is_err());

        let cli = parse_cli(&[
            "--mode",
            "participant",
            "--coordinator",
            "10.0.1.5",
            "--image",
            "local.bmp",
        ]);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_coordinator_addr_port_appended() {
        let cli = parse_cli(&["--coordinator", "10.0.1.5"]);
        assert_eq!(cli.coordinator_addr().unwrap(), "10.0.1.5:9999");

        let cli = parse_cli(&["--coordinator", "10.0.1.5:7777"]);
        assert_eq!(cli.coordinator_addr().unwrap(), "10.0.1.5:7777");

        let cli = parse_cli(&["--coordinator", "10.0.1.5", "--coordinator-port", "8888"]);
        assert_eq!(cli.coordinator_addr().unwrap(), "10.0.1.5:8888");
    }

    #[test]
    fn test_zero_expected_participants_rejected() {
        let cli = parse_cli(&["--expected-participants", "0"]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_reset_requires_coordinator() {
        let cli = parse_cli(&["--mode", "reset"]);
        assert!(cli.validate().is_err());

        let cli = parse_cli(&["--mode", "reset", "--coordinator", "10.0.1.5"]);
        assert!(cli.validate().is_ok());
    }
}
