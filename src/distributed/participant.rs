//! Participant client
//!
//! This module implements the participant side of an averaging round.
//! The participant:
//! - Submits its local grayscale BMP to the coordinator
//! - Polls for the aggregate (the coordinator answers retryably while the
//!   round is still filling up)
//! - Writes the received global average image to disk

use crate::distributed::protocol::*;
use anyhow::{Context, Result};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::sleep;

/// Delay between aggregate polls while the round is incomplete
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Participant client
pub struct Participant {
    /// Coordinator address (host:port)
    coordinator_addr: String,

    /// Participant identifier (hostname by default)
    participant_id: String,
}

impl Participant {
    /// Create a new participant client
    ///
    /// When `participant_id` is None the local hostname is used.
    pub fn new(coordinator_addr: String, participant_id: Option<String>) -> Result<Self> {
        let participant_id = match participant_id {
            Some(id) => id,
            None => get_participant_id()?,
        };

        Ok(Self {
            coordinator_addr,
            participant_id,
        })
    }

    /// Participant identifier in use
    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Submit the local image to the coordinator
    ///
    /// Returns the number of contributions the coordinator holds after this
    /// one. A coordinator-side rejection (malformed image, dimension
    /// mismatch) surfaces as an error.
    pub async fn contribute(&self, image: &[u8]) -> Result<usize> {
        let mut stream = self.connect().await?;

        let msg = Message::Contribute(ContributeMessage {
            protocol_version: PROTOCOL_VERSION,
            participant_id: self.participant_id.clone(),
            image: image.to_vec(),
        });
        write_message(&mut stream, &msg).await?;

        match read_message(&mut stream).await? {
            Message::ContributeAck(ack) => Ok(ack.contributions),
            Message::Error(err) => {
                anyhow::bail!("Coordinator rejected contribution: {}", err.error)
            }
            other => anyhow::bail!("Unexpected reply to contribution: {:?}", other),
        }
    }

    /// Fetch the aggregate, polling until it is available
    ///
    /// Retryable coordinator errors (round still incomplete) are polled once
    /// per second until `timeout` elapses; anything else fails immediately.
    pub async fn fetch_aggregate(&self, timeout: Duration) -> Result<AggregateMessage> {
        let deadline = Instant::now() + timeout;

        loop {
            let mut stream = self.connect().await?;

            let msg = Message::FetchAggregate(FetchAggregateMessage {
                protocol_version: PROTOCOL_VERSION,
                participant_id: self.participant_id.clone(),
            });
            write_message(&mut stream, &msg).await?;

            match read_message(&mut stream).await? {
                Message::Aggregate(aggregate) => return Ok(aggregate),
                Message::Error(err) if err.retryable => {
                    if Instant::now() + POLL_INTERVAL > deadline {
                        anyhow::bail!(
                            "Timed out waiting for aggregate: {}",
                            err.error
                        );
                    }
                    println!("Aggregate not ready ({}), retrying...", err.error);
                    sleep(POLL_INTERVAL).await;
                }
                Message::Error(err) => {
                    anyhow::bail!("Coordinator refused aggregate: {}", err.error)
                }
                other => anyhow::bail!("Unexpected reply to fetch: {:?}", other),
            }
        }
    }

    /// Ask the coordinator to clear the current round
    pub async fn reset_round(&self) -> Result<()> {
        let mut stream = self.connect().await?;

        write_message(&mut stream, &Message::Reset).await?;

        match read_message(&mut stream).await? {
            Message::ResetAck => Ok(()),
            Message::Error(err) => anyhow::bail!("Coordinator refused reset: {}", err.error),
            other => anyhow::bail!("Unexpected reply to reset: {:?}", other),
        }
    }

    /// Run a full participant round
    ///
    /// Reads the local image, contributes it, optionally fetches the
    /// aggregate, and writes it to `output_path`.
    pub async fn run(
        self,
        image_path: &Path,
        output_path: Option<&Path>,
        fetch_timeout: Duration,
    ) -> Result<()> {
        println!("Participant ID: {}", self.participant_id);
        println!("Coordinator: {}", self.coordinator_addr);

        let image = std::fs::read(image_path)
            .with_context(|| format!("Failed to read image: {}", image_path.display()))?;

        let contributions = self.contribute(&image).await?;
        println!(
            "Contribution accepted ({} received by coordinator)",
            contributions
        );

        let output_path = match output_path {
            Some(path) => path,
            None => return Ok(()),
        };

        let aggregate = self.fetch_aggregate(fetch_timeout).await?;
        std::fs::write(output_path, &aggregate.image)
            .with_context(|| format!("Failed to write aggregate: {}", output_path.display()))?;

        println!(
            "Global average of {} images written to: {}",
            aggregate.contributions,
            output_path.display()
        );

        Ok(())
    }

    async fn connect(&self) -> Result<TcpStream> {
        TcpStream::connect(&self.coordinator_addr)
            .await
            .with_context(|| format!("Failed to connect to {}", self.coordinator_addr))
    }
}

/// Get the default participant identifier (hostname, falling back to
/// "unknown")
pub fn get_participant_id() -> Result<String> {
    if let Ok(name) = hostname::get() {
        if let Ok(name_str) = name.into_string() {
            return Ok(name_str);
        }
    }

    Ok("unknown".to_string())
}
