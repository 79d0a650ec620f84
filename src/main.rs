//! fedpix CLI entry point

use anyhow::{Context, Result};
use fedpix::config::cli::{Cli, ExecutionMode};
use fedpix::config::toml as config_toml;
use fedpix::distributed::{Coordinator, Participant};
use std::time::Duration;

fn main() -> Result<()> {
    println!("fedpix v{}", env!("CARGO_PKG_VERSION"));
    println!("Federated pixel-wise image averaging");
    println!();

    let cli = Cli::parse_args();
    cli.validate()?;

    match cli.mode {
        ExecutionMode::Coordinator => run_coordinator(cli),
        ExecutionMode::Participant => run_participant(cli),
        ExecutionMode::Reset => run_reset(cli),
    }
}

/// Run in coordinator mode (collect contributions, serve the mean)
fn run_coordinator(cli: Cli) -> Result<()> {
    // Resolve settings from the optional TOML file (CLI takes precedence)
    let file_config = match cli.config {
        Some(ref path) => config_toml::parse_toml_file(path)?,
        None => config_toml::CoordinatorConfig::default(),
    };
    let (listen_port, expected_participants, storage_dir) =
        config_toml::merge_cli_with_config(&cli, &file_config);

    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(async {
        let coordinator = Coordinator::new(listen_port, expected_participants, storage_dir)
            .context("Failed to create coordinator")?;

        coordinator.run().await
    })
}

/// Run in participant mode (contribute the local image, fetch the average)
fn run_participant(cli: Cli) -> Result<()> {
    // validate() guarantees these are present
    let addr = cli
        .coordinator_addr()
        .context("participant mode requires --coordinator")?;
    let image_path = cli
        .image
        .as_ref()
        .context("participant mode requires --image")?;

    let output = if cli.no_fetch {
        None
    } else {
        Some(cli.output.as_path())
    };

    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(async {
        let participant = Participant::new(addr, cli.participant_id.clone())
            .context("Failed to create participant")?;

        participant
            .run(image_path, output, Duration::from_secs(cli.fetch_timeout))
            .await
    })
}

/// Run in reset mode (clear the coordinator's current round)
fn run_reset(cli: Cli) -> Result<()> {
    let addr = cli
        .coordinator_addr()
        .context("reset mode requires --coordinator")?;

    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(async {
        let participant = Participant::new(addr, cli.participant_id.clone())
            .context("Failed to create participant")?;

        participant.reset_round().await?;
        println!("Round reset");

        Ok(())
    })
}
